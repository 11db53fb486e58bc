//! The code that runs inside a forked worker process.
//!
//! Owns the worker's end of the pipes, its read-only mapping of the shared
//! window, and the three callbacks (`read`/`seek`/`proc`) an extractor
//! drives — the same [`WorkerApi`] contract the in-process sweep
//! ([`crate::inprocess`]) implements directly against the data source, so
//! both paths share one callback contract.

use std::ffi::CString;
use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd};

use memmap2::Mmap;
use nix::unistd::read;

use crate::extractor::{ExtractorDescriptor, ExtractorEntry, ExtractorFlags};
use crate::protocol::{decode, encode, Message, WireWhence};
use crate::source::SeekWhence;

/// Result of a `proc` callback: whether the extractor should keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    Continue,
    Stop,
}

/// The three operations an extractor needs from its host — identical in
/// shape whether the host is a worker process relaying over pipes, or the
/// in-process sweep calling the data source directly.
pub trait WorkerApi {
    /// Borrow up to `n` bytes starting at the current logical position.
    /// `Err` means the request could not be satisfied (the window was
    /// discarded, or the source errored) and the extractor should stop.
    fn read(&mut self, n: usize) -> Result<&[u8], ()>;
    fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, ()>;
    fn proc(&mut self, kind: u16, format: u16, mime: Option<&str>, bytes: &[u8]) -> ExtractOutcome;
}

/// Reads whole frames off a pipe, blocking and growing its buffer as needed.
/// Exits the process on EOF or any I/O error.
struct FrameReader {
    fd: OwnedFd,
    buf: Vec<u8>,
    len: usize,
}

impl FrameReader {
    fn new(fd: OwnedFd) -> FrameReader {
        FrameReader {
            fd,
            buf: vec![0u8; 4096],
            len: 0,
        }
    }

    fn recv(&mut self) -> Message {
        loop {
            match decode(&self.buf[..self.len]) {
                Ok((msg, consumed)) => {
                    self.buf.copy_within(consumed..self.len, 0);
                    self.len -= consumed;
                    return msg;
                }
                Err(crate::error::CodecError::Truncated { needed, .. }) => {
                    if needed > self.buf.len() {
                        self.buf.resize(needed, 0);
                    }
                    if self.len == self.buf.len() {
                        self.buf.resize(self.buf.len() * 2, 0);
                    }
                    let n = match read(&self.fd, &mut self.buf[self.len..]) {
                        Ok(n) => n,
                        Err(_) => std::process::exit(1),
                    };
                    if n == 0 {
                        std::process::exit(0);
                    }
                    self.len += n;
                }
                Err(_) => std::process::exit(1),
            }
        }
    }
}

fn send_or_exit(fd: &OwnedFd, msg: &Message) {
    let bytes = encode(msg);
    let mut sent = 0;
    while sent < bytes.len() {
        match nix::unistd::write(fd, &bytes[sent..]) {
            Ok(0) | Err(_) => std::process::exit(1),
            Ok(n) => sent += n,
        }
    }
}

/// The cached `(shm_offset, ready_bytes, file_size)` view plus the worker's
/// own logical read position.
struct CachedView {
    shm_offset: u64,
    ready_bytes: u32,
    file_size: u64,
}

/// Worker-side implementation of [`WorkerApi`] backed by the shared window
/// and the two pipes.
pub struct ProtocolWorkerApi<'a> {
    reader: &'a mut FrameReader,
    write_fd: &'a OwnedFd,
    map: &'a Mmap,
    view: CachedView,
    logical_pos: u64,
    seek_outstanding: bool,
    discarded: bool,
}

impl<'a> ProtocolWorkerApi<'a> {
    /// `true` if `offset` falls within the window's currently covered range
    /// (it may still hold fewer than the caller's requested byte count near
    /// end-of-window — that is a short read, not a miss).
    fn window_covers(&self, offset: u64) -> bool {
        offset >= self.view.shm_offset && offset < self.view.shm_offset + self.view.ready_bytes as u64
    }

    fn await_window_update(&mut self) -> Result<(), ()> {
        debug_assert!(!self.seek_outstanding, "worker re-issued SEEK while one was outstanding");
        self.seek_outstanding = true;
        loop {
            match self.reader.recv() {
                Message::UpdatedShm {
                    shm_ready_bytes,
                    shm_offset,
                    file_size,
                } => {
                    self.view = CachedView {
                        shm_offset,
                        ready_bytes: shm_ready_bytes,
                        file_size,
                    };
                    self.seek_outstanding = false;
                    return Ok(());
                }
                Message::DiscardState => {
                    self.discarded = true;
                    self.seek_outstanding = false;
                    return Err(());
                }
                _ => std::process::exit(1), // protocol violation by the engine itself
            }
        }
    }
}

impl<'a> WorkerApi for ProtocolWorkerApi<'a> {
    fn read(&mut self, n: usize) -> Result<&[u8], ()> {
        if self.discarded {
            return Err(());
        }
        if !self.window_covers(self.logical_pos) && self.logical_pos < self.view.file_size {
            send_or_exit(
                self.write_fd,
                &Message::Seek {
                    whence: WireWhence::Set,
                    requested_bytes: n.min(u32::MAX as usize) as u32,
                    file_offset: self.logical_pos,
                },
            );
            self.await_window_update()?;
        }
        let rel = (self.logical_pos.saturating_sub(self.view.shm_offset)) as usize;
        let available = (self.view.ready_bytes as usize).saturating_sub(rel);
        let give = n.min(available);
        Ok(&self.map[rel..rel + give])
    }

    fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, ()> {
        let target = match whence {
            SeekWhence::Set => offset.max(0) as u64,
            SeekWhence::Cur => (self.logical_pos as i64 + offset).max(0) as u64,
            SeekWhence::End => {
                let t = self.view.file_size as i64 + offset;
                if t < 0 {
                    0
                } else {
                    (t as u64).min(self.view.file_size)
                }
            }
        };
        self.logical_pos = target;
        Ok(target)
    }

    fn proc(&mut self, kind: u16, format: u16, mime: Option<&str>, bytes: &[u8]) -> ExtractOutcome {
        if self.discarded {
            return ExtractOutcome::Stop;
        }
        send_or_exit(
            self.write_fd,
            &Message::Meta {
                format,
                kind,
                mime: mime.map(|s| s.to_string()),
                value: bytes.to_vec(),
            },
        );
        loop {
            match self.reader.recv() {
                Message::ContinueExtracting => return ExtractOutcome::Continue,
                Message::DiscardState => {
                    self.discarded = true;
                    return ExtractOutcome::Stop;
                }
                _ => std::process::exit(1),
            }
        }
    }
}

/// Type a dynamically loaded extractor symbol must have: a raw pointer to a
/// [`ProtocolWorkerApi`], opaque to the extractor beyond the three
/// `extern "C"` trampolines the loader wires up for it. Plugin discovery
/// itself is out of scope — the engine is handed the path and symbol name
/// already resolved.
type DynamicEntry = unsafe extern "C" fn(*mut std::ffi::c_void);

/// Blocking worker loop: map the shared window from `INIT_STATE`, then
/// repeatedly await `EXTRACT_START`, run the extractor, and report `DONE`.
/// Never returns; every path out of this function is a process exit.
pub fn run_worker_loop(read_fd: OwnedFd, write_fd: OwnedFd, extractor: &ExtractorDescriptor) -> ! {
    let mut reader = FrameReader::new(read_fd);

    let (shm_name, shm_size) = match reader.recv() {
        Message::InitState { shm_name, shm_size } => (shm_name, shm_size),
        _ => std::process::exit(1),
    };

    let cname = match CString::new(shm_name) {
        Ok(c) => c,
        Err(_) => std::process::exit(1),
    };
    let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDONLY, 0) };
    if fd < 0 {
        std::process::exit(1);
    }
    let file = unsafe { File::from_raw_fd(fd) };
    let map = match unsafe { Mmap::map(&file) } {
        Ok(m) => m,
        Err(_) => std::process::exit(1),
    };
    drop(file);
    let _ = shm_size; // informational; the mapping's real length comes from the fd itself

    loop {
        let (ready_bytes, file_size) = match reader.recv() {
            Message::ExtractStart {
                shm_ready_bytes,
                file_size,
            } => (shm_ready_bytes, file_size),
            _ => std::process::exit(1),
        };

        let mut api = ProtocolWorkerApi {
            reader: &mut reader,
            write_fd: &write_fd,
            map: &map,
            view: CachedView {
                shm_offset: 0,
                ready_bytes,
                file_size,
            },
            logical_pos: 0,
            seek_outstanding: false,
            discarded: false,
        };

        match &extractor.entry {
            ExtractorEntry::Native(f) => f(&mut api),
            ExtractorEntry::Dynamic { library, symbol } => unsafe {
                match library.get::<DynamicEntry>(symbol.as_bytes()) {
                    Ok(sym) => sym(&mut api as *mut ProtocolWorkerApi as *mut std::ffi::c_void),
                    Err(_) => std::process::exit(1),
                }
            },
        }

        send_or_exit(&write_fd, &Message::Done);

        if extractor.flags.contains(ExtractorFlags::KILL_AFTER_EACH_FILE) {
            std::process::exit(0);
        }
    }
}
