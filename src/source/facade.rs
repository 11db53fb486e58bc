//! The single entry point the rest of the engine talks to: pick a concrete
//! reader once, then talk to it through one type, with a sniff-and-wrap step
//! that makes compression transparent to every caller above this layer.

use std::path::Path;

use crate::error::SourceError;
use crate::source::buffered::BufferedSource;
use crate::source::decompress::{CompressionKind, Decompressor};
use crate::source::SeekWhence;

enum Inner {
    Raw(BufferedSource),
    Compressed(Decompressor),
}

/// Uniform, possibly-decompressed view over one input file or buffer.
///
/// Every caller above this layer (the round scheduler and the in-process
/// sweep) sees the same three operations — `read`, `seek`, `size` — whether
/// or not the underlying bytes were gzip- or bzip2-compressed.
pub struct DataSource {
    inner: Inner,
}

/// How many leading bytes to read before deciding whether a source is
/// compressed (`1f 8b 08` / `"BZh"` — 3 bytes is enough for either).
const SNIFF_LEN: usize = 3;

impl DataSource {
    pub fn open(path: &Path) -> Result<DataSource, SourceError> {
        Self::wrap(BufferedSource::open(path)?)
    }

    pub fn from_memory(data: Vec<u8>) -> Result<DataSource, SourceError> {
        Self::wrap(BufferedSource::from_memory(data))
    }

    fn wrap(mut raw: BufferedSource) -> Result<DataSource, SourceError> {
        let mut prefix = [0u8; SNIFF_LEN];
        let n = raw.read(&mut prefix)?;
        raw.seek(0, SeekWhence::Set)?;
        let inner = match CompressionKind::sniff(&prefix[..n]) {
            Some(kind) => Inner::Compressed(Decompressor::new(raw, kind)?),
            None => Inner::Raw(raw),
        };
        Ok(DataSource { inner })
    }

    /// `true` if this source is gzip- or bzip2-wrapped.
    pub fn is_compressed(&self) -> bool {
        matches!(self.inner, Inner::Compressed(_))
    }

    /// Preliminary filename/comment recovered from a gzip header, if any.
    pub fn gzip_filename(&self) -> Option<&str> {
        match &self.inner {
            Inner::Compressed(d) if d.kind() == CompressionKind::Gzip => {
                d.preliminary.filename.as_deref()
            }
            _ => None,
        }
    }

    pub fn gzip_comment(&self) -> Option<&str> {
        match &self.inner {
            Inner::Compressed(d) if d.kind() == CompressionKind::Gzip => {
                d.preliminary.comment.as_deref()
            }
            _ => None,
        }
    }

    /// Logical size, decompressed if applicable. For a compressed source
    /// whose size has not yet been discovered, this forces a full
    /// decode-and-discard pass.
    pub fn size(&mut self) -> Result<u64, SourceError> {
        match &mut self.inner {
            Inner::Raw(b) => Ok(b.size()),
            Inner::Compressed(d) => d.force_uncompressed_size(),
        }
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
        match &mut self.inner {
            Inner::Raw(b) => b.read(dst),
            Inner::Compressed(d) => d.read(dst),
        }
    }

    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, SourceError> {
        match &mut self.inner {
            Inner::Raw(b) => b.seek(offset, whence),
            Inner::Compressed(d) => d.seek(offset, whence),
        }
    }

    pub fn pos(&self) -> u64 {
        match &self.inner {
            Inner::Raw(b) => b.pos(),
            Inner::Compressed(d) => d.logical_pos(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn raw_source_passthrough() {
        let mut ds = DataSource::from_memory(b"plain bytes here".to_vec()).unwrap();
        assert!(!ds.is_compressed());
        assert_eq!(ds.size().unwrap(), 16);
        let mut buf = [0u8; 5];
        ds.read(&mut buf).unwrap();
        assert_eq!(&buf, b"plain");
    }

    #[test]
    fn gzip_source_transparently_decoded() {
        let mut enc = flate2::GzBuilder::new()
            .filename("notes.txt")
            .write(Vec::new(), flate2::Compression::fast());
        enc.write_all(b"secret notes").unwrap();
        let gz = enc.finish().unwrap();

        let mut ds = DataSource::from_memory(gz).unwrap();
        assert!(ds.is_compressed());
        assert_eq!(ds.gzip_filename(), Some("notes.txt"));
        let mut out = vec![0u8; 12];
        ds.read(&mut out).unwrap();
        assert_eq!(&out, b"secret notes");
    }

    #[test]
    fn bzip2_sniff_selects_compressed_path() {
        // A minimal valid bzip2 stream is awkward to hand-construct; sniffing
        // is covered directly in decompress::tests. Here we only check that
        // a non-gzip, non-bzip2 buffer stays on the raw path.
        let mut ds = DataSource::from_memory(b"just some text".to_vec()).unwrap();
        assert!(!ds.is_compressed());
    }
}
