//! End-to-end scenarios driving real forked workers through [`Engine`].
//! Each test spawns actual processes via `ExtractorDescriptor::native`, so
//! it exercises the fork/pipe/shm machinery exactly as a deployed extractor
//! would, not a mock of it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metasift::extractor::{ExecutionMode, ExtractorDescriptor};
use metasift::source::SeekWhence;
use metasift::worker::WorkerApi;
use metasift::{Engine, SinkControl};

type Seen = Arc<Mutex<Vec<(String, Option<String>, Vec<u8>)>>>;

fn recording_sink(seen: Seen) -> impl FnMut(&str, u16, u16, Option<&str>, &[u8]) -> SinkControl {
    move |origin, _kind, _format, mime, bytes| {
        seen.lock()
            .unwrap()
            .push((origin.to_string(), mime.map(str::to_string), bytes.to_vec()));
        SinkControl::Continue
    }
}

#[test]
fn raw_pass_through_never_calls_sink() {
    let engine = Engine::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = recording_sink(seen.clone());
    engine
        .extract_buffer(b"Hello, World".to_vec(), &[], &mut sink)
        .unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn gzip_header_filename_surfaces_as_compressor_metadata() {
    use std::io::Write;
    let mut enc = flate2::GzBuilder::new()
        .filename("readme.txt")
        .write(Vec::new(), flate2::Compression::fast());
    enc.write_all(b"data").unwrap();
    let gz = enc.finish().unwrap();

    let engine = Engine::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = recording_sink(seen.clone());
    engine.extract_buffer(gz, &[], &mut sink).unwrap();

    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "compressor");
    assert_eq!(calls[0].1.as_deref(), Some("text/plain"));
    assert_eq!(calls[0].2, b"readme.txt");
}

#[test]
fn two_workers_with_disjoint_seeks_each_see_their_own_slice() {
    let size = 128 * 1024usize;
    let mut buf = vec![0u8; size];
    for (i, b) in buf.iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
    let expected_a = buf[0..4].to_vec();
    let offset_b = 96 * 1024usize;
    let expected_b = buf[offset_b..offset_b + 4].to_vec();

    let worker_a = ExtractorDescriptor::native("A", ExecutionMode::OutOfProcess, |api| {
        if let Ok(bytes) = api.read(4) {
            let v = bytes.to_vec();
            api.proc(1, 0, None, &v);
        }
    });
    let worker_b = ExtractorDescriptor::native("B", ExecutionMode::OutOfProcess, move |api| {
        if api.seek(offset_b as i64, SeekWhence::Set).is_ok() {
            if let Ok(bytes) = api.read(4) {
                let v = bytes.to_vec();
                api.proc(2, 0, None, &v);
            }
        }
    });

    let engine = Engine::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = recording_sink(seen.clone());
    engine.extract_buffer(buf, &[worker_a, worker_b], &mut sink).unwrap();

    let calls = seen.lock().unwrap();
    let a = calls.iter().find(|c| c.0 == "A").expect("worker A reported metadata");
    let b = calls.iter().find(|c| c.0 == "B").expect("worker B reported metadata");
    assert_eq!(a.2, expected_a);
    assert_eq!(b.2, expected_b);
}

#[test]
fn hung_worker_is_retired_without_blocking_the_round() {
    let hung = ExtractorDescriptor::native("hung", ExecutionMode::OutOfProcess, |_api| {
        std::thread::sleep(Duration::from_secs(30));
    });
    let prompt = ExtractorDescriptor::native("prompt", ExecutionMode::OutOfProcess, |_api| {
        // Returns immediately; the worker loop sends DONE right after.
    });

    let engine = Engine::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = recording_sink(seen.clone());

    let start = Instant::now();
    engine
        .extract_buffer(b"irrelevant payload".to_vec(), &[hung, prompt], &mut sink)
        .unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_secs(5),
        "round should have retired the hung worker after the multiplex timeout, took {elapsed:?}"
    );
}

#[test]
fn oversized_meta_retires_its_worker_but_not_others() {
    let oversized = ExtractorDescriptor::native("oversized", ExecutionMode::OutOfProcess, |api| {
        let huge = vec![0u8; 33 * 1024 * 1024];
        api.proc(1, 0, None, &huge);
    });
    let well_behaved = ExtractorDescriptor::native("well-behaved", ExecutionMode::OutOfProcess, |api| {
        api.proc(2, 0, None, b"fine");
    });

    let engine = Engine::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut sink = recording_sink(seen.clone());
    engine
        .extract_buffer(b"irrelevant payload".to_vec(), &[oversized, well_behaved], &mut sink)
        .unwrap();

    let calls = seen.lock().unwrap();
    assert!(calls.iter().all(|c| c.0 != "oversized"), "oversized worker's META must not reach the sink");
    assert!(calls.iter().any(|c| c.0 == "well-behaved" && c.2 == b"fine"));
}

#[test]
fn sink_stop_mid_round_silences_the_rest_of_the_file() {
    let worker_a = ExtractorDescriptor::native("A", ExecutionMode::OutOfProcess, |api| {
        // The sink below stops on this call; a second proc() call after a
        // Stop outcome must short-circuit without reaching the sink again.
        if matches!(api.proc(1, 0, None, b"stop-me"), metasift::worker::ExtractOutcome::Stop) {
            api.proc(1, 0, None, b"should-never-be-seen");
        }
    });
    let worker_b = ExtractorDescriptor::native("B", ExecutionMode::OutOfProcess, |api| {
        // Gives worker A time to trigger the stop before B's own META lands.
        std::thread::sleep(Duration::from_millis(100));
        api.proc(2, 0, None, b"from-b");
    });

    let engine = Engine::new();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let mut sink = move |origin: &str, _k: u16, _f: u16, _m: Option<&str>, bytes: &[u8]| {
        seen2.lock().unwrap().push((origin.to_string(), None, bytes.to_vec()));
        SinkControl::Stop
    };
    engine
        .extract_buffer(b"irrelevant payload".to_vec(), &[worker_a, worker_b], &mut sink)
        .unwrap();

    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1, "the sink must not be called again once it has returned stop");
    assert_eq!(calls[0].0, "A");
    assert_eq!(calls[0].2, b"stop-me");
}
