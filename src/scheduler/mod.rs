//! The per-file round loop.
//!
//! A fixed-size table of in-flight slots, a wait step, and a drain step that
//! reacts to each slot's outcome. The wait is a real multiplex (`nix::poll`)
//! over worker pipes, and "in-flight" means "has an outstanding reply".

use std::os::fd::BorrowedFd;

use log::{debug, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::config::{MULTIPLEX_TIMEOUT_MS, SHM_WINDOW_SIZE};
use crate::extractor::ExtractorDescriptor;
use crate::protocol::{Message, WireWhence};
use crate::shm::SharedWindow;
use crate::sink::Sink;
use crate::source::DataSource;
use crate::worker::WorkerChannel;

struct Slot {
    channel: WorkerChannel,
    name: String,
}

/// Run the out-of-process round over every extractor in `descriptors` whose
/// [`crate::extractor::ExecutionMode`] is `OutOfProcess`. Returns once every
/// worker has reported `DONE` or been retired.
pub fn run_round(descriptors: &[ExtractorDescriptor], source: &mut DataSource, sink: &mut Sink) {
    let out_of_process: Vec<&ExtractorDescriptor> = descriptors
        .iter()
        .filter(|d| d.mode == crate::extractor::ExecutionMode::OutOfProcess)
        .collect();
    if out_of_process.is_empty() {
        return;
    }

    let file_size = match source.size() {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to determine input size, skipping out-of-process round: {e}");
            return;
        }
    };
    let mut window = match SharedWindow::create() {
        Ok(w) => w,
        Err(e) => {
            warn!("failed to create shared-memory window, skipping out-of-process round: {e}");
            return;
        }
    };

    let mut slots: Vec<Option<Slot>> = Vec::with_capacity(out_of_process.len());
    for extractor in &out_of_process {
        match WorkerChannel::spawn(extractor, window.name(), SHM_WINDOW_SIZE as u32) {
            Ok(channel) => slots.push(Some(Slot {
                channel,
                name: extractor.short_name.clone(),
            })),
            Err(e) => {
                warn!("failed to spawn worker for '{}': {e}", extractor.short_name);
                slots.push(None);
            }
        }
    }
    if slots.iter().all(Option::is_none) {
        return;
    }

    if let Err(e) = window.fill(source, 0) {
        warn!("failed to fill the initial window, skipping out-of-process round: {e}");
        for slot in slots.into_iter().flatten() {
            slot.channel.destroy();
        }
        return;
    }
    for slot in slots.iter_mut().flatten() {
        let _ = slot.channel.send(&Message::ExtractStart {
            shm_ready_bytes: window.valid_len() as u32,
            file_size,
        });
    }

    let mut file_aborted = false;

    loop {
        let waiting: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Some(slot) => (slot.channel.pending_seek.is_none() && !slot.channel.round_finished).then_some(i),
                None => None,
            })
            .collect();

        if waiting.is_empty() {
            if !advance_window(&mut slots, &mut window, source) {
                break; // no channel has a servable seek left, or a source error ended the round
            }
            continue;
        }

        let borrowed: Vec<BorrowedFd> = waiting
            .iter()
            .map(|&i| slots[i].as_ref().unwrap().channel_fd())
            .collect();
        let mut pollfds: Vec<PollFd> = borrowed.iter().map(|fd| PollFd::new(*fd, PollFlags::POLLIN)).collect();

        let timeout = PollTimeout::try_from(MULTIPLEX_TIMEOUT_MS as i32).unwrap_or(PollTimeout::MAX);
        match poll(&mut pollfds, timeout) {
            Ok(0) => {
                // Timeout: every channel still running-not-seeking is hung.
                for &i in &waiting {
                    debug!("worker in slot {i} timed out after {MULTIPLEX_TIMEOUT_MS}ms, retiring it");
                    if let Some(slot) = slots[i].take() {
                        slot.channel.destroy();
                    }
                }
            }
            Ok(_) => {
                for (idx, &slot_i) in waiting.iter().enumerate() {
                    let ready = pollfds[idx]
                        .revents()
                        .map(|r| r.contains(PollFlags::POLLIN) || r.contains(PollFlags::POLLHUP))
                        .unwrap_or(false);
                    if !ready {
                        continue;
                    }
                    handle_ready_slot(&mut slots, slot_i, sink, &mut file_aborted, source);
                }
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                warn!("multiplex wait failed ({e}); aborting the round for every remaining worker");
                for slot in slots.iter_mut() {
                    if let Some(s) = slot.take() {
                        s.channel.destroy();
                    }
                }
                break;
            }
        }
    }

    for slot in slots.into_iter().flatten() {
        slot.channel.destroy();
    }
}

impl Slot {
    fn channel_fd(&self) -> BorrowedFd {
        unsafe { BorrowedFd::borrow_raw(self.channel.raw_read_fd()) }
    }
}

/// Handle one readable channel: pump frames off its pipe and react to
/// `DONE`/`SEEK`/`META`.
fn handle_ready_slot(
    slots: &mut [Option<Slot>],
    idx: usize,
    sink: &mut Sink,
    file_aborted: &mut bool,
    source: &mut DataSource,
) {
    let file_size = source.size().unwrap_or(0);
    let mut destroy = false;
    let mut metas = Vec::new();

    if let Some(slot) = slots[idx].as_mut() {
        let name = slot.name.clone();
        match slot.channel.pump() {
            Ok(result) => {
                if result.eof {
                    destroy = true;
                }
                for msg in result.messages {
                    match msg {
                        Message::Done => {
                            slot.channel.round_finished = true;
                            slot.channel.pending_seek = None;
                        }
                        Message::Seek {
                            whence,
                            requested_bytes: _,
                            file_offset,
                        } => {
                            let absolute = resolve_seek(whence, file_offset, file_size);
                            slot.channel.pending_seek = Some((absolute, whence));
                        }
                        Message::Meta {
                            format,
                            kind,
                            mime,
                            value,
                        } => {
                            if *file_aborted {
                                let _ = slot.channel.send(&Message::DiscardState);
                            } else {
                                metas.push((kind, format, mime, value));
                            }
                        }
                        _ => {
                            warn!("worker '{name}' sent an unexpected message out of protocol order");
                            destroy = true;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("worker '{name}' protocol error, retiring it: {e}");
                destroy = true;
            }
        }
    }

    let name = slots[idx].as_ref().map(|s| s.name.clone()).unwrap_or_default();
    for (kind, format, mime, value) in metas {
        if *file_aborted {
            break;
        }
        let control = sink(&name, kind, format, mime.as_deref(), &value);
        if control.is_stop() {
            *file_aborted = true;
            for slot in slots.iter_mut().flatten() {
                if slot.channel.pending_seek.is_some() {
                    let _ = slot.channel.send(&Message::DiscardState);
                    slot.channel.pending_seek = None;
                }
            }
        } else if let Some(slot) = slots[idx].as_mut() {
            let _ = slot.channel.send(&Message::ContinueExtracting);
        }
    }

    if destroy {
        if let Some(slot) = slots[idx].take() {
            slot.channel.destroy();
        }
    }
}

/// Convert a worker's `SEEK` request to an absolute offset. `END` is
/// resolved against the known file size, remapping offsets that would fall
/// before the start of the file to `0`; offsets that would overshoot past
/// end-of-file are clamped to `size` rather than wrapped to `0`.
fn resolve_seek(whence: WireWhence, requested: u64, file_size: u64) -> u64 {
    match whence {
        WireWhence::Set => requested.min(file_size),
        WireWhence::End => {
            if requested > file_size {
                0
            } else {
                file_size - requested
            }
        }
    }
}

/// No channel has a pending seek that the poll set would ever wake up on
/// its own — try to serve the minimum outstanding seek by moving the
/// window. Returns `false` if no channel has a servable seek (every
/// remaining channel is finished or dead) or a source error ends the round
/// early.
fn advance_window(slots: &mut [Option<Slot>], window: &mut SharedWindow, source: &mut DataSource) -> bool {
    let min_offset = slots
        .iter()
        .flatten()
        .filter(|s| !s.channel.round_finished)
        .filter_map(|s| s.channel.pending_seek.map(|(off, _)| off))
        .min();

    let Some(target) = min_offset else {
        return false;
    };

    if let Err(e) = window.fill(source, target) {
        warn!("source error while advancing the window, ending the round: {e}");
        return false;
    }
    let covered_end = window.base_offset() + window.valid_len() as u64;

    for slot in slots.iter_mut().flatten() {
        if slot.channel.round_finished {
            continue;
        }
        if let Some((off, _)) = slot.channel.pending_seek {
            if off >= window.base_offset() && off <= covered_end {
                let _ = slot.channel.send(&Message::UpdatedShm {
                    shm_ready_bytes: window.valid_len() as u32,
                    shm_offset: window.base_offset(),
                    file_size: source.size().unwrap_or(0),
                });
                slot.channel.pending_seek = None;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_seek_set_clamps_to_size_not_wrap() {
        assert_eq!(resolve_seek(WireWhence::Set, 1_000, 500), 500);
        assert_eq!(resolve_seek(WireWhence::Set, 10, 500), 10);
    }

    #[test]
    fn resolve_seek_end_remaps_past_start_to_zero() {
        assert_eq!(resolve_seek(WireWhence::End, 1_000, 500), 0);
        assert_eq!(resolve_seek(WireWhence::End, 100, 500), 400);
    }
}
