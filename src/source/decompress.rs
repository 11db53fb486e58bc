//! Transparent gzip/bzip2 decompression with reset-and-replay backward
//! seeks.
//!
//! Keeps an internal source buffer alongside a decompression context, built
//! directly on the low-level push/pull decoders — `flate2::Decompress` and
//! `bzip2::Decompress` — rather than their `Read`-adapter types, since
//! backward seeks need explicit control over when the decoder is torn down
//! and replayed.

use flate2::{Decompress as InflateCore, FlushDecompress, Status as InflateStatus};

use crate::error::SourceError;
use crate::source::buffered::BufferedSource;
use crate::source::SeekWhence;

/// Compression format detected by sniffing the first bytes of the raw source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    Gzip,
    Bzip2,
}

impl CompressionKind {
    /// Sniff the compression kind from a file's leading bytes: `1f 8b 08` →
    /// gzip, `"BZh"` → bzip2; anything else → no decompression.
    pub fn sniff(prefix: &[u8]) -> Option<CompressionKind> {
        if prefix.len() >= 3 && prefix[0] == 0x1f && prefix[1] == 0x8b && prefix[2] == 0x08 {
            Some(CompressionKind::Gzip)
        } else if prefix.starts_with(b"BZh") {
            Some(CompressionKind::Bzip2)
        } else {
            None
        }
    }
}

/// Preliminary metadata recovered while parsing a gzip header.
#[derive(Debug, Clone, Default)]
pub struct GzipPreliminary {
    pub filename: Option<String>,
    pub comment: Option<String>,
}

const GZIP_FLG_FTEXT: u8 = 1 << 0;
const GZIP_FLG_FHCRC: u8 = 1 << 1;
const GZIP_FLG_FEXTRA: u8 = 1 << 2;
const GZIP_FLG_FNAME: u8 = 1 << 3;
const GZIP_FLG_FCOMMENT: u8 = 1 << 4;

const IN_CHUNK: usize = 8 * 1024;
const OUT_CHUNK: usize = 64 * 1024;

enum Core {
    Gzip(InflateCore),
    Bzip2(bzip2::Decompress),
}

impl Core {
    fn new(kind: CompressionKind) -> Core {
        match kind {
            CompressionKind::Gzip => Core::Gzip(InflateCore::new(false)),
            CompressionKind::Bzip2 => Core::Bzip2(bzip2::Decompress::new(false)),
        }
    }

    /// Decode as much of `input` as fits in `output`, returning
    /// `(bytes_consumed, bytes_produced, stream_ended)`.
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize, bool), SourceError> {
        match self {
            Core::Gzip(inf) => {
                let before_in = inf.total_in();
                let before_out = inf.total_out();
                let status = inf
                    .decompress(input, output, FlushDecompress::None)
                    .map_err(|e| SourceError::Decompress(e.to_string()))?;
                let consumed = (inf.total_in() - before_in) as usize;
                let produced = (inf.total_out() - before_out) as usize;
                Ok((consumed, produced, matches!(status, InflateStatus::StreamEnd)))
            }
            Core::Bzip2(dec) => {
                let before_in = dec.total_in();
                let before_out = dec.total_out();
                let status = dec
                    .decompress(input, output)
                    .map_err(|e| SourceError::Decompress(e.to_string()))?;
                let consumed = (dec.total_in() - before_in) as usize;
                let produced = (dec.total_out() - before_out) as usize;
                Ok((
                    consumed,
                    produced,
                    matches!(status, bzip2::Status::StreamEnd),
                ))
            }
        }
    }
}

/// Transparent decompression layer over a [`BufferedSource`] of raw
/// (compressed) bytes.
pub struct Decompressor {
    kind: CompressionKind,
    source: BufferedSource,
    /// Absolute offset in `source` where the first byte of (de)compressible
    /// payload begins — after the gzip header or the bzip2 magic.
    payload_start: u64,
    core: Core,
    /// Absolute offset in `source` the core has consumed input up to.
    compressed_pos: u64,
    /// Decoded output not yet handed to the caller.
    carry: Vec<u8>,
    carry_pos: usize,
    /// Logical (decompressed) offset of `carry[0]`.
    carry_logical_start: u64,
    logical_pos: u64,
    eos: bool,
    total_size: Option<u64>,
    pub preliminary: GzipPreliminary,
}

impl Decompressor {
    /// Build a decompressor over `source`, sniffing `kind` from its first
    /// bytes. `kind` must already have been determined by
    /// [`CompressionKind::sniff`].
    pub fn new(mut source: BufferedSource, kind: CompressionKind) -> Result<Decompressor, SourceError> {
        source.seek(0, SeekWhence::Set)?;
        let (payload_start, preliminary) = match kind {
            CompressionKind::Gzip => parse_gzip_header(&mut source)?,
            CompressionKind::Bzip2 => (0, GzipPreliminary::default()),
        };
        source.seek(payload_start as i64, SeekWhence::Set)?;
        Ok(Decompressor {
            kind,
            source,
            payload_start,
            core: Core::new(kind),
            compressed_pos: payload_start,
            carry: Vec::new(),
            carry_pos: 0,
            carry_logical_start: 0,
            logical_pos: 0,
            eos: false,
            total_size: None,
            preliminary,
        })
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// `uncompressed_size()` — known only after a successful decode reaches
    /// EOS.
    pub fn uncompressed_size(&self) -> Option<u64> {
        self.total_size
    }

    /// Force discovery of the uncompressed size by decoding-and-discarding to
    /// EOS, then restoring the caller's logical position.
    pub fn force_uncompressed_size(&mut self) -> Result<u64, SourceError> {
        if let Some(size) = self.total_size {
            return Ok(size);
        }
        let resume_at = self.logical_pos;
        self.reset_and_seek_to(u64::MAX)?; // MAX forces "decode until EOS".
        let size = self.logical_pos;
        self.total_size = Some(size);
        self.reset_and_seek_to(resume_at)?;
        Ok(size)
    }

    fn refill_carry(&mut self) -> Result<(), SourceError> {
        self.carry.clear();
        self.carry.resize(OUT_CHUNK, 0);
        self.carry_pos = 0;
        self.carry_logical_start = self.logical_pos;

        let mut produced_total = 0usize;
        loop {
            let mut inbuf = [0u8; IN_CHUNK];
            self.source.seek(self.compressed_pos as i64, SeekWhence::Set)?;
            let in_n = self.source.read(&mut inbuf)?;
            let (consumed, produced, ended) = self.core.step(&inbuf[..in_n], &mut self.carry[produced_total..])?;
            self.compressed_pos += consumed as u64;
            produced_total += produced;
            if ended {
                self.eos = true;
                if self.total_size.is_none() {
                    self.total_size = Some(self.logical_pos + produced_total as u64);
                }
                break;
            }
            if consumed == 0 && produced == 0 {
                // The decoder made no progress on this chunk (typically
                // because the compressed source is exhausted): treat as end
                // of stream rather than spinning.
                self.eos = true;
                if self.total_size.is_none() {
                    self.total_size = Some(self.logical_pos + produced_total as u64);
                }
                break;
            }
            if produced_total > 0 || produced_total == self.carry.len() {
                break;
            }
        }
        self.carry.truncate(produced_total);
        Ok(())
    }

    /// Decompress as much as requested, returning the number of bytes
    /// actually produced (`0` at end-of-stream).
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
        let mut produced = 0;
        while produced < dst.len() {
            if self.carry_pos < self.carry.len() {
                let n = (self.carry.len() - self.carry_pos).min(dst.len() - produced);
                dst[produced..produced + n]
                    .copy_from_slice(&self.carry[self.carry_pos..self.carry_pos + n]);
                self.carry_pos += n;
                produced += n;
                self.logical_pos += n as u64;
                continue;
            }
            if self.eos {
                break;
            }
            self.refill_carry()?;
            if self.carry.is_empty() {
                break;
            }
        }
        Ok(produced)
    }

    /// Tear down the decoder and replay forward from the start of the
    /// compressed payload until `target` logical bytes have been produced (or
    /// EOS, whichever comes first — used by `force_uncompressed_size` with
    /// `target = u64::MAX`).
    fn reset_and_seek_to(&mut self, target: u64) -> Result<(), SourceError> {
        self.core = Core::new(self.kind);
        self.compressed_pos = self.payload_start;
        self.carry.clear();
        self.carry_pos = 0;
        self.carry_logical_start = 0;
        self.logical_pos = 0;
        self.eos = false;

        let mut scratch = [0u8; OUT_CHUNK];
        while self.logical_pos < target && !self.eos {
            let n = self.read(&mut scratch)?;
            if n == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Seek the logical (decompressed) stream. Within the current decoded
    /// carry this is a cheap index update; forward beyond it, bytes are
    /// decompressed and discarded; backward, or relative to end when the
    /// uncompressed size is unknown, resets the decoder and replays from the
    /// start of the payload.
    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, SourceError> {
        let target: u64 = match whence {
            SeekWhence::Set => offset.max(0) as u64,
            SeekWhence::Cur => {
                let t = self.logical_pos as i64 + offset;
                if t < 0 {
                    return Err(SourceError::SeekBeyondEnd { offset: 0 });
                }
                t as u64
            }
            SeekWhence::End => {
                let size = match self.total_size {
                    Some(s) => s,
                    None => self.force_uncompressed_size()?,
                };
                let t = size as i64 + offset;
                if t < 0 {
                    0
                } else {
                    t as u64
                }
            }
        };

        if target == self.logical_pos {
            return Ok(target);
        }

        if target >= self.carry_logical_start
            && target < self.carry_logical_start + self.carry.len() as u64
        {
            self.carry_pos = (target - self.carry_logical_start) as usize;
            self.logical_pos = target;
            return Ok(target);
        }

        if target > self.logical_pos {
            let mut scratch = [0u8; OUT_CHUNK];
            while self.logical_pos < target {
                let want = ((target - self.logical_pos) as usize).min(scratch.len());
                let n = self.read(&mut scratch[..want])?;
                if n == 0 {
                    break;
                }
            }
            return Ok(self.logical_pos);
        }

        // Backward, outside the carry: reset and replay.
        self.reset_and_seek_to(target)?;
        Ok(self.logical_pos)
    }

    pub fn logical_pos(&self) -> u64 {
        self.logical_pos
    }
}

/// Parse a gzip header starting at offset 0 of `source`, returning the
/// absolute offset where the deflate payload begins and any FNAME/FCOMMENT
/// fields found. Leaves `source`'s cursor undefined; callers re-seek
/// afterwards.
fn parse_gzip_header(source: &mut BufferedSource) -> Result<(u64, GzipPreliminary), SourceError> {
    source.seek(0, SeekWhence::Set)?;
    let mut head = [0u8; 10];
    read_exact_or_err(source, &mut head)?;
    if head[0] != 0x1f || head[1] != 0x8b || head[2] != 0x08 {
        return Err(SourceError::CorruptHeader);
    }
    let flg = head[3];
    let mut pos = 10u64;

    if flg & GZIP_FLG_FEXTRA != 0 {
        let mut len_buf = [0u8; 2];
        source.seek(pos as i64, SeekWhence::Set)?;
        read_exact_or_err(source, &mut len_buf)?;
        let extra_len = u16::from_le_bytes(len_buf) as u64;
        pos += 2 + extra_len;
    }

    let mut preliminary = GzipPreliminary::default();
    if flg & GZIP_FLG_FNAME != 0 {
        let (s, new_pos) = read_nul_terminated(source, pos)?;
        preliminary.filename = Some(s);
        pos = new_pos;
    }
    if flg & GZIP_FLG_FCOMMENT != 0 {
        let (s, new_pos) = read_nul_terminated(source, pos)?;
        preliminary.comment = Some(s);
        pos = new_pos;
    }
    if flg & GZIP_FLG_FHCRC != 0 {
        pos += 2;
    }
    let _ = GZIP_FLG_FTEXT; // no behavioural effect; documented for completeness

    Ok((pos, preliminary))
}

fn read_exact_or_err(source: &mut BufferedSource, buf: &mut [u8]) -> Result<(), SourceError> {
    let mut total = 0;
    while total < buf.len() {
        let n = source.read(&mut buf[total..])?;
        if n == 0 {
            return Err(SourceError::CorruptHeader);
        }
        total += n;
    }
    Ok(())
}

fn read_nul_terminated(source: &mut BufferedSource, start: u64) -> Result<(String, u64), SourceError> {
    source.seek(start as i64, SeekWhence::Set)?;
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = source.read(&mut byte)?;
        if n == 0 {
            return Err(SourceError::CorruptHeader);
        }
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    let s = String::from_utf8_lossy(&bytes).into_owned();
    Ok((s, start + bytes.len() as u64 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip_bytes(name: Option<&str>, payload: &[u8]) -> Vec<u8> {
        let mut builder = flate2::GzBuilder::new();
        if let Some(n) = name {
            builder = builder.filename(n);
        }
        let mut enc = builder.write(Vec::new(), flate2::Compression::default());
        enc.write_all(payload).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn sniff_gzip() {
        let data = gzip_bytes(None, b"data");
        assert_eq!(CompressionKind::sniff(&data), Some(CompressionKind::Gzip));
    }

    #[test]
    fn sniff_bzip2_magic() {
        assert_eq!(
            CompressionKind::sniff(b"BZh91AY&SY"),
            Some(CompressionKind::Bzip2)
        );
    }

    #[test]
    fn sniff_none_for_plain_data() {
        assert_eq!(CompressionKind::sniff(b"Hello, World"), None);
    }

    #[test]
    fn gzip_filename_recovered_and_payload_decodes() {
        let data = gzip_bytes(Some("readme.txt"), b"data");
        let src = BufferedSource::from_memory(data);
        let mut dec = Decompressor::new(src, CompressionKind::Gzip).unwrap();
        assert_eq!(dec.preliminary.filename.as_deref(), Some("readme.txt"));
        let mut out = vec![0u8; 4];
        let n = dec.read(&mut out).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&out, b"data");
    }

    #[test]
    fn gzip_split_reads_match_single_read() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let data = gzip_bytes(None, &payload);

        let src1 = BufferedSource::from_memory(data.clone());
        let mut dec1 = Decompressor::new(src1, CompressionKind::Gzip).unwrap();
        let mut whole = vec![0u8; payload.len()];
        let mut got = 0;
        while got < whole.len() {
            let n = dec1.read(&mut whole[got..]).unwrap();
            if n == 0 {
                break;
            }
            got += n;
        }

        let src2 = BufferedSource::from_memory(data);
        let mut dec2 = Decompressor::new(src2, CompressionKind::Gzip).unwrap();
        let mut first_half = vec![0u8; payload.len() / 2];
        let mut got2 = 0;
        while got2 < first_half.len() {
            let n = dec2.read(&mut first_half[got2..]).unwrap();
            if n == 0 {
                break;
            }
            got2 += n;
        }
        let mut second_half = vec![0u8; payload.len() - payload.len() / 2];
        let mut got3 = 0;
        while got3 < second_half.len() {
            let n = dec2.read(&mut second_half[got3..]).unwrap();
            if n == 0 {
                break;
            }
            got3 += n;
        }

        assert_eq!(whole[..payload.len() / 2], first_half[..]);
        assert_eq!(whole[payload.len() / 2..], second_half[..]);
    }

    #[test]
    fn gzip_backward_seek_idempotent() {
        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 200) as u8).collect();
        let data = gzip_bytes(None, &payload);
        let src = BufferedSource::from_memory(data);
        let mut dec = Decompressor::new(src, CompressionKind::Gzip).unwrap();

        let mut first = vec![0u8; 500];
        let mut got = 0;
        while got < first.len() {
            let n = dec.read(&mut first[got..]).unwrap();
            got += n;
        }

        dec.seek(0, SeekWhence::Set).unwrap();
        let mut second = vec![0u8; 500];
        let mut got2 = 0;
        while got2 < second.len() {
            let n = dec.read(&mut second[got2..]).unwrap();
            got2 += n;
        }
        assert_eq!(first, second);
    }

    #[test]
    fn gzip_end_seek_with_unknown_size_discovers_size() {
        let payload = b"abcdefghij".to_vec();
        let data = gzip_bytes(None, &payload);
        let src = BufferedSource::from_memory(data);
        let mut dec = Decompressor::new(src, CompressionKind::Gzip).unwrap();
        assert_eq!(dec.uncompressed_size(), None);
        let pos = dec.seek(0, SeekWhence::End).unwrap();
        assert_eq!(pos, payload.len() as u64);
        assert_eq!(dec.uncompressed_size(), Some(payload.len() as u64));
    }
}
