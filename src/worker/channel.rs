//! One worker process, its bidirectional pipes, and its reassembly buffer.
//!
//! Process management: `nix::unistd::fork`, two `nix::unistd::pipe` pairs,
//! the child closing its unused ends before running the worker loop, the
//! parent closing its unused ends before talking to the child.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, pipe, read, write, ForkResult, Pid};

use crate::config::{REASSEMBLY_BUF_INITIAL, REASSEMBLY_BUF_MAX};
use crate::error::ChannelError;
use crate::extractor::ExtractorDescriptor;
use crate::protocol::{decode, encode, Message};
use crate::worker::runtime::run_worker_loop;

/// Frames drained from one `pump` call, in wire order.
pub struct PumpResult {
    pub messages: Vec<Message>,
    pub eof: bool,
}

/// One live out-of-process worker, from the engine's side.
pub struct WorkerChannel {
    pid: Pid,
    write_fd: OwnedFd,
    read_fd: OwnedFd,
    reassembly: Vec<u8>,
    reassembly_len: usize,
    /// Absolute offset + whence of an outstanding, not-yet-served SEEK.
    pub pending_seek: Option<(u64, crate::protocol::WireWhence)>,
    pub round_finished: bool,
}

impl WorkerChannel {
    /// Fork a worker process for `extractor`. The child runs
    /// [`run_worker_loop`] and never returns to this function; the parent
    /// gets back a handle to the two pipes and the child's pid.
    pub fn spawn(extractor: &ExtractorDescriptor, shm_name: &str, shm_size: u32) -> Result<WorkerChannel, ChannelError> {
        let (engine_read, worker_write) = pipe().map_err(|e| ChannelError::Spawn(e.into()))?;
        let (worker_read, engine_write) = pipe().map_err(|e| ChannelError::Spawn(e.into()))?;

        match unsafe { fork() }.map_err(|e| ChannelError::Spawn(e.into()))? {
            ForkResult::Child => {
                drop(engine_read);
                drop(engine_write);
                run_worker_loop(worker_read, worker_write, extractor);
                // The worker loop only returns by calling `std::process::exit`;
                // this is unreachable, but keeps the match arm's type `!`-free.
                std::process::exit(1);
            }
            ForkResult::Parent { child } => {
                drop(worker_read);
                drop(worker_write);
                let mut channel = WorkerChannel {
                    pid: child,
                    write_fd: engine_write,
                    read_fd: engine_read,
                    reassembly: vec![0u8; REASSEMBLY_BUF_INITIAL],
                    reassembly_len: 0,
                    pending_seek: None,
                    round_finished: false,
                };
                channel.send(&Message::InitState {
                    shm_name: shm_name.to_string(),
                    shm_size,
                })?;
                Ok(channel)
            }
        }
    }

    pub fn raw_read_fd(&self) -> std::os::fd::RawFd {
        self.read_fd.as_raw_fd()
    }

    /// Blocking send. Any short write is treated as fatal for this channel.
    pub fn send(&mut self, msg: &Message) -> Result<(), ChannelError> {
        let bytes = encode(msg);
        let mut sent = 0;
        while sent < bytes.len() {
            let n = write(&self.write_fd, &bytes[sent..]).map_err(|e| ChannelError::Io(e.into()))?;
            if n == 0 {
                return Err(ChannelError::ShortWrite);
            }
            sent += n;
        }
        Ok(())
    }

    /// Pull whatever bytes are currently available on the read pipe into the
    /// reassembly buffer, growing it (doubling, capped) if necessary, and
    /// return every complete frame found. Returns an empty, `eof: true`
    /// result on a clean EOF (worker exited). Frames are returned rather
    /// than dispatched through a callback so the caller can freely call
    /// `send` while reacting to them without fighting the borrow checker.
    pub fn pump(&mut self) -> Result<PumpResult, ChannelError> {
        if self.reassembly_len == self.reassembly.len() {
            let new_cap = (self.reassembly.len() * 2).min(REASSEMBLY_BUF_MAX);
            if new_cap == self.reassembly.len() {
                return Err(ChannelError::BufferOverflow(REASSEMBLY_BUF_MAX));
            }
            self.reassembly.resize(new_cap, 0);
        }

        let n = read(&self.read_fd, &mut self.reassembly[self.reassembly_len..])
            .map_err(|e| ChannelError::Io(e.into()))?;
        if n == 0 {
            return Ok(PumpResult { messages: Vec::new(), eof: true });
        }
        self.reassembly_len += n;

        let mut messages = Vec::new();
        let mut offset = 0;
        loop {
            match decode(&self.reassembly[offset..self.reassembly_len]) {
                Ok((msg, consumed)) => {
                    offset += consumed;
                    messages.push(msg);
                }
                Err(crate::error::CodecError::Truncated { .. }) => break,
                Err(other) => return Err(ChannelError::Protocol(other)),
            }
        }
        self.reassembly.copy_within(offset..self.reassembly_len, 0);
        self.reassembly_len -= offset;
        Ok(PumpResult { messages, eof: false })
    }

    /// Kill the worker with an unmaskable signal, reap it, and release the
    /// pipes. Dropping `self` afterwards closes both descriptors via
    /// `OwnedFd`.
    pub fn destroy(self) {
        let _ = kill(self.pid, Signal::SIGKILL);
        let _ = waitpid(self.pid, None);
    }
}
