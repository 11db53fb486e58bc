//! Error taxonomy.
//!
//! Everything below `EngineError` is internal plumbing: the scheduler and
//! channel layers match on these with `?` and react accordingly (destroy a
//! channel, skip a phase, retry) — they are never handed to the sink or the
//! caller. `EngineError` is the single case that *can* reach
//! [`crate::engine::Engine::extract_file`]/`extract_buffer`: the input
//! itself could not be opened at all, so there is no data source to drive a
//! round over.

use std::io;
use thiserror::Error;

/// Fatal, caller-visible failure: the input could not be turned into a data
/// source at all.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot open input: {0}")]
    Open(#[from] io::Error),
    #[error("input is empty")]
    EmptyInput,
}

/// Failures from the buffered source / decompressor / facade.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("seek to {offset} is beyond end of stream")]
    SeekBeyondEnd { offset: u64 },
    #[error("decompression failed: {0}")]
    Decompress(String),
    #[error("corrupt compressed header")]
    CorruptHeader,
}

/// Failures creating or filling the shared-memory window.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shm_open failed: {0}")]
    Create(#[source] io::Error),
    #[error("mmap failed: {0}")]
    Map(#[source] io::Error),
    #[error("source read failed while filling window: {0}")]
    Fill(#[from] SourceError),
}

/// Failures decoding or encoding a wire frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame is truncated, need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("META value_size {0} exceeds the {1}-byte cap")]
    ValueTooLarge(u32, usize),
    #[error("META mime string is not NUL-terminated")]
    MimeNotNulTerminated,
    #[error("SEEK.whence must be SET or END, got {0}")]
    InvalidWhence(u16),
}

/// Failures spawning or driving one worker channel.
///
/// Every variant here is handled by destroying the channel — callers never
/// see these directly, but the scheduler logs them.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("short write to worker pipe")]
    ShortWrite,
    #[error("worker pipe closed (EOF)")]
    Eof,
    #[error("io error on worker pipe: {0}")]
    Io(#[from] io::Error),
    #[error("reassembly buffer exceeded the {0}-byte cap")]
    BufferOverflow(usize),
    #[error(transparent)]
    Protocol(#[from] CodecError),
}
