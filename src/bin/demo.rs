//! A thin demonstration binary, not a metadata-extraction CLI front-end. It
//! exists only to give the library a runnable smoke test: point it at a
//! file, and it prints whatever metadata the registered extractors (none,
//! by default) surface.

use std::path::PathBuf;

use clap::Parser;
use metasift::{Engine, SinkControl};

#[derive(Parser)]
#[command(author, version, about = "Demo harness for the metasift extraction engine")]
struct Args {
    /// File to run through the engine.
    path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let engine = Engine::new();
    let mut count = 0usize;
    let mut sink = |origin: &str, kind: u16, format: u16, mime: Option<&str>, bytes: &[u8]| {
        count += 1;
        println!(
            "[{origin}] kind={kind} format={format} mime={mime:?} bytes={}",
            bytes.len()
        );
        SinkControl::Continue
    };

    engine
        .extract_file(&args.path, &[], &mut sink)
        .map_err(|e| anyhow::anyhow!("metasift-demo: {e}"))?;
    if count == 0 {
        println!("(no metadata surfaced — no extractors are registered by this demo)");
    }
    Ok(())
}
