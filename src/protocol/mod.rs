//! The fixed-layout message codec shared by the worker channel and the
//! worker runtime.

pub mod message;
pub mod opcode;

pub use message::{decode, encode, Message, WireWhence};
