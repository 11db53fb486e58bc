//! Random-access, length-known byte source over a file handle or an
//! in-memory buffer, with a sliding read buffer for the file-backed case.
//!
//! A seekable source with an explicit capacity cap rather than `std::io`'s
//! unbounded internal buffer, since the decompressor above it needs precise
//! control over how far a refill is allowed to read ahead.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::config::BUFFERED_SOURCE_CAP;
use crate::error::SourceError;
use crate::source::SeekWhence;
use crate::util::{get_open_file_size, is_directory};

enum Backing {
    /// The buffer IS the input; `pos` is the only mutable state.
    Memory { data: Vec<u8>, pos: usize },
    /// A heap buffer of at most [`BUFFERED_SOURCE_CAP`] bytes sits between the
    /// file descriptor and the caller.
    File {
        file: File,
        size: u64,
        pos: u64,
        /// Absolute file offset of `buf[0]`.
        buf_offset: u64,
        buf: Vec<u8>,
        buf_len: usize,
        cap: usize,
    },
}

/// Random-access byte source, either memory-resident or file-backed.
pub struct BufferedSource {
    backing: Backing,
}

impl BufferedSource {
    /// Wrap an in-memory byte range. `seek` only ever moves a logical cursor;
    /// `read` copies out of `data`.
    pub fn from_memory(data: Vec<u8>) -> Self {
        BufferedSource {
            backing: Backing::Memory { data, pos: 0 },
        }
    }

    /// Open `path` as a file-backed source.
    ///
    /// Returns `Err` for directories and unreadable paths — the
    /// caller-visible effect is "no metadata", not a propagated error, but
    /// opening the handle is still fallible at this layer so the engine can
    /// decide whether to run the in-process sweep.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        if is_directory(path) {
            return Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "is a directory",
            )));
        }
        let file = File::open(path)?;
        let size = get_open_file_size(&file);
        Ok(BufferedSource {
            backing: Backing::File {
                file,
                size,
                pos: 0,
                buf_offset: 0,
                buf: Vec::new(),
                buf_len: 0,
                cap: BUFFERED_SOURCE_CAP,
            },
        })
    }

    /// Total size of the underlying (compressed, if applicable) byte range.
    pub fn size(&self) -> u64 {
        match &self.backing {
            Backing::Memory { data, .. } => data.len() as u64,
            Backing::File { size, .. } => *size,
        }
    }

    fn current_pos(&self) -> u64 {
        match &self.backing {
            Backing::Memory { pos, .. } => *pos as u64,
            Backing::File { pos, .. } => *pos,
        }
    }

    /// Current absolute read position.
    pub fn pos(&self) -> u64 {
        self.current_pos()
    }

    /// Seek to a new absolute position. A seek past end-of-file fails; a seek
    /// to exactly end-of-file succeeds and the next `read` returns `0`.
    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, SourceError> {
        let size = self.size();
        let base = match whence {
            SeekWhence::Set => 0i64,
            SeekWhence::Cur => self.current_pos() as i64,
            SeekWhence::End => size as i64,
        };
        let target = base
            .checked_add(offset)
            .ok_or(SourceError::SeekBeyondEnd { offset: u64::MAX })?;
        if target < 0 || target as u64 > size {
            return Err(SourceError::SeekBeyondEnd {
                offset: target.max(0) as u64,
            });
        }
        let target = target as u64;
        match &mut self.backing {
            Backing::Memory { pos, .. } => *pos = target as usize,
            Backing::File { pos, .. } => *pos = target,
        }
        Ok(target)
    }

    /// Copy up to `dst.len()` bytes starting at the current position into
    /// `dst`, returning the number actually produced (`0` at EOF). Only a
    /// system-level read error produces `Err`.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
        match &mut self.backing {
            Backing::Memory { data, pos } => {
                let available = data.len().saturating_sub(*pos);
                let n = dst.len().min(available);
                dst[..n].copy_from_slice(&data[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
            Backing::File {
                file,
                size,
                pos,
                buf_offset,
                buf,
                buf_len,
                cap,
            } => {
                let mut produced = 0usize;
                while produced < dst.len() && *pos < *size {
                    let in_buf = *pos >= *buf_offset && *pos < *buf_offset + *buf_len as u64;
                    if !in_buf {
                        // Refill: position the descriptor absolutely and read up to `cap` bytes.
                        file.seek(SeekFrom::Start(*pos))?;
                        buf.resize(*cap, 0);
                        let mut filled = 0usize;
                        while filled < *cap {
                            let n = file.read(&mut buf[filled..])?;
                            if n == 0 {
                                break;
                            }
                            filled += n;
                        }
                        *buf_offset = *pos;
                        *buf_len = filled;
                        if filled == 0 {
                            break; // EOF reached sooner than `size` suggested.
                        }
                    }
                    let buf_rel = (*pos - *buf_offset) as usize;
                    let available = *buf_len - buf_rel;
                    let want = (dst.len() - produced).min(available);
                    dst[produced..produced + want].copy_from_slice(&buf[buf_rel..buf_rel + want]);
                    produced += want;
                    *pos += want as u64;
                }
                Ok(produced)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn memory_read_and_seek() {
        let mut src = BufferedSource::from_memory(b"Hello, World".to_vec());
        assert_eq!(src.size(), 12);
        let mut buf = [0u8; 5];
        assert_eq!(src.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");
        src.seek(0, SeekWhence::Set).unwrap();
        let mut buf2 = [0u8; 12];
        assert_eq!(src.read(&mut buf2).unwrap(), 12);
        assert_eq!(&buf2, b"Hello, World");
    }

    #[test]
    fn memory_seek_to_eof_then_read_returns_zero() {
        let mut src = BufferedSource::from_memory(b"abc".to_vec());
        let pos = src.seek(0, SeekWhence::End).unwrap();
        assert_eq!(pos, 3);
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn memory_seek_past_eof_errors() {
        let mut src = BufferedSource::from_memory(b"abc".to_vec());
        assert!(src.seek(10, SeekWhence::Set).is_err());
    }

    #[test]
    fn file_backed_read_across_buffer_refill() {
        let mut f = NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();

        let mut src = BufferedSource::open(f.path()).unwrap();
        if let Backing::File { cap, .. } = &mut src.backing {
            *cap = 64; // force several refills well inside a 10 KiB file
        }
        let mut out = vec![0u8; data.len()];
        let mut total = 0;
        while total < out.len() {
            let n = src.read(&mut out[total..]).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn file_backed_backward_seek_then_read() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"0123456789").unwrap();
        f.flush().unwrap();
        let mut src = BufferedSource::open(f.path()).unwrap();
        let mut buf = [0u8; 4];
        src.read(&mut buf).unwrap();
        assert_eq!(&buf, b"0123");
        src.seek(2, SeekWhence::Set).unwrap();
        src.read(&mut buf).unwrap();
        assert_eq!(&buf, b"2345");
    }

    #[test]
    fn open_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BufferedSource::open(dir.path()).is_err());
    }
}
