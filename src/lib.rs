//! `metasift` — a metadata extraction engine that drives a fleet of
//! pluggable, potentially untrusted format extractors against a file or an
//! in-memory buffer and delivers their output to a caller-supplied sink.
//!
//! The [`Engine`] is the only entry point most callers need:
//!
//! ```no_run
//! use metasift::{Engine, SinkControl};
//!
//! let engine = Engine::new();
//! let mut sink = |origin: &str, _kind: u16, _format: u16, mime: Option<&str>, bytes: &[u8]| {
//!     println!("{origin}: {mime:?} ({} bytes)", bytes.len());
//!     SinkControl::Continue
//! };
//! engine.extract_file(std::path::Path::new("photo.jpg"), &[], &mut sink).unwrap();
//! ```
//!
//! Everything else — the buffered/decompressing data source, the
//! shared-memory window, the wire protocol, and the worker process
//! lifecycle — is orchestration machinery most callers never touch directly,
//! but is exposed as public modules for extractor authors and for embedding
//! the pieces individually.

pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod inprocess;
pub mod protocol;
pub mod scheduler;
pub mod shm;
pub mod sink;
pub mod source;
pub mod util;
pub mod worker;

pub use engine::Engine;
pub use error::EngineError;
pub use extractor::{ExecutionMode, ExtractorDescriptor, ExtractorFlags};
pub use sink::{Sink, SinkControl};
pub use source::DataSource;
