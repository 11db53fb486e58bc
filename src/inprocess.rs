//! The in-process sweep.
//!
//! Implements the same [`WorkerApi`] contract the out-of-process worker
//! runtime exposes (`worker::runtime::ProtocolWorkerApi`), but backed
//! directly by the data source facade instead of a shared-memory window and
//! a pipe — there is no process boundary to cross, so `read` borrows
//! straight from a local scratch buffer and `proc` calls the sink directly.

use crate::extractor::{ExecutionMode, ExtractorDescriptor, ExtractorEntry};
use crate::sink::Sink;
use crate::source::{DataSource, SeekWhence};
use crate::worker::{ExtractOutcome, WorkerApi};

struct InProcessApi<'a, 'b> {
    source: &'a mut DataSource,
    scratch: Vec<u8>,
    name: &'a str,
    sink: &'a mut Sink<'b>,
    stopped: bool,
}

impl<'a, 'b> WorkerApi for InProcessApi<'a, 'b> {
    fn read(&mut self, n: usize) -> Result<&[u8], ()> {
        self.scratch.resize(n, 0);
        let got = self.source.read(&mut self.scratch).map_err(|_| ())?;
        Ok(&self.scratch[..got])
    }

    fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, ()> {
        self.source.seek(offset, whence).map_err(|_| ())
    }

    fn proc(&mut self, kind: u16, format: u16, mime: Option<&str>, bytes: &[u8]) -> ExtractOutcome {
        if self.stopped {
            return ExtractOutcome::Stop;
        }
        let control = (self.sink)(self.name, kind, format, mime, bytes);
        if control.is_stop() {
            self.stopped = true;
            ExtractOutcome::Stop
        } else {
            ExtractOutcome::Continue
        }
    }
}

/// Run every extractor flagged [`ExecutionMode::InProcess`] synchronously,
/// each against a freshly rewound view of `source`. Stops early across the
/// whole sweep once the sink returns "stop".
pub fn run_sweep(descriptors: &[ExtractorDescriptor], source: &mut DataSource, sink: &mut Sink) {
    for extractor in descriptors {
        if extractor.mode != ExecutionMode::InProcess {
            continue;
        }
        if source.seek(0, SeekWhence::Set).is_err() {
            continue;
        }
        let mut api = InProcessApi {
            source,
            scratch: Vec::new(),
            name: &extractor.short_name,
            sink,
            stopped: false,
        };
        match &extractor.entry {
            ExtractorEntry::Native(f) => f(&mut api),
            ExtractorEntry::Dynamic { .. } => {
                // Dynamically loaded extractors are invoked through the
                // worker runtime's `extern "C"` trampoline, which assumes an
                // out-of-process `ProtocolWorkerApi`; an in-process dynamic
                // extractor would need its own FFI adapter, which no caller
                // in this engine currently requests.
                log::warn!(
                    "extractor '{}' is flagged in-process but dynamically loaded; skipping",
                    extractor.short_name
                );
                continue;
            }
        }
        if api.stopped {
            break;
        }
    }
}
