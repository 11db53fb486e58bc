//! The caller-facing API: extract metadata from a path or an in-memory
//! buffer, driving the out-of-process round and then the in-process sweep
//! against the same data source.

use std::path::Path;

use log::info;

use crate::error::EngineError;
use crate::extractor::ExtractorDescriptor;
use crate::inprocess;
use crate::scheduler;
use crate::sink::Sink;
use crate::source::DataSource;

/// Stateless entry point. Kept as a unit struct (rather than free functions)
/// to leave room for engine-wide configuration — a default worker timeout, a
/// logger handle — without another breaking API change.
#[derive(Debug, Default)]
pub struct Engine;

impl Engine {
    pub fn new() -> Engine {
        Engine
    }

    /// Extract metadata from a file on disk.
    pub fn extract_file(&self, path: &Path, extractors: &[ExtractorDescriptor], sink: &mut Sink) -> Result<(), EngineError> {
        let mut source = open_file(path)?;
        self.run(extractors, &mut source, sink);
        Ok(())
    }

    /// Extract metadata from an in-memory buffer.
    pub fn extract_buffer(&self, data: Vec<u8>, extractors: &[ExtractorDescriptor], sink: &mut Sink) -> Result<(), EngineError> {
        let mut source = open_buffer(data)?;
        self.run(extractors, &mut source, sink);
        Ok(())
    }

    fn run(&self, extractors: &[ExtractorDescriptor], source: &mut DataSource, sink: &mut Sink) {
        info!(
            "starting round over {} extractor(s), compressed={}",
            extractors.len(),
            source.is_compressed()
        );
        scheduler::run_round(extractors, source, sink);
        if let Some(name) = source.gzip_filename() {
            let control = sink("compressor", 0, 0, Some("text/plain"), name.as_bytes());
            if control.is_stop() {
                return;
            }
        }
        inprocess::run_sweep(extractors, source, sink);
    }
}

/// Open a path-backed source. `EngineError` is the one case visible to the
/// direct caller of `extract_file`/`extract_buffer` — the sole exception to
/// "no error is ever surfaced to the caller"; every other input-error case
/// is absorbed into "the sink saw nothing".
fn open_file(path: &Path) -> Result<DataSource, EngineError> {
    DataSource::open(path).map_err(to_engine_error)
}

fn open_buffer(data: Vec<u8>) -> Result<DataSource, EngineError> {
    DataSource::from_memory(data).map_err(to_engine_error)
}

fn to_engine_error(e: crate::error::SourceError) -> EngineError {
    match e {
        crate::error::SourceError::Io(io_err) => EngineError::Open(io_err),
        other => EngineError::Open(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExecutionMode, ExtractorDescriptor};
    use crate::sink::SinkControl;
    use std::sync::{Arc, Mutex};

    #[test]
    fn raw_buffer_with_no_extractors_calls_sink_zero_times() {
        let engine = Engine::new();
        let calls = Arc::new(Mutex::new(0));
        let calls2 = calls.clone();
        let mut sink = move |_: &str, _: u16, _: u16, _: Option<&str>, _: &[u8]| {
            *calls2.lock().unwrap() += 1;
            SinkControl::Continue
        };
        engine
            .extract_buffer(b"Hello, World".to_vec(), &[], &mut sink)
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn gzip_buffer_surfaces_filename_through_compressor_origin() {
        use std::io::Write;
        let mut enc = flate2::GzBuilder::new()
            .filename("readme.txt")
            .write(Vec::new(), flate2::Compression::fast());
        enc.write_all(b"data").unwrap();
        let gz = enc.finish().unwrap();

        let engine = Engine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut sink = move |origin: &str, _: u16, _: u16, mime: Option<&str>, bytes: &[u8]| {
            seen2
                .lock()
                .unwrap()
                .push((origin.to_string(), mime.map(str::to_string), bytes.to_vec()));
            SinkControl::Continue
        };
        engine.extract_buffer(gz, &[], &mut sink).unwrap();

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "compressor");
        assert_eq!(calls[0].2, b"readme.txt");
    }

    #[test]
    fn in_process_extractor_runs_against_rewound_source() {
        let engine = Engine::new();
        let descriptor = ExtractorDescriptor::native("echo-first-byte", ExecutionMode::InProcess, |api| {
            if let Ok(bytes) = api.read(1) {
                let b = bytes.to_vec();
                api.proc(1, 0, None, &b);
            }
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut sink = move |origin: &str, _: u16, _: u16, _: Option<&str>, bytes: &[u8]| {
            seen2.lock().unwrap().push((origin.to_string(), bytes.to_vec()));
            SinkControl::Continue
        };
        engine
            .extract_buffer(b"Zebra".to_vec(), std::slice::from_ref(&descriptor), &mut sink)
            .unwrap();
        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "echo-first-byte");
        assert_eq!(calls[0].1, b"Z");
    }
}
