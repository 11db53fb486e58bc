//! The out-of-process worker, split into the engine-side [`channel`] and
//! the in-worker [`runtime`].

pub mod channel;
pub mod runtime;

pub use channel::WorkerChannel;
pub use runtime::{ExtractOutcome, WorkerApi};
