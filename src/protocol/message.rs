//! Frame encode/decode for the worker protocol.
//!
//! Little-endian, fixed header per opcode, no alignment padding — manual
//! byte-slicing rather than a derive-based serializer.

use crate::config::META_VALUE_MAX;
use crate::error::CodecError;
use crate::protocol::opcode;

/// `SEEK.whence` as it appears on the wire: `CUR` never crosses a process
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireWhence {
    Set,
    End,
}

impl WireWhence {
    fn to_u16(self) -> u16 {
        match self {
            WireWhence::Set => 0,
            WireWhence::End => 2,
        }
    }

    fn from_u16(v: u16) -> Result<WireWhence, CodecError> {
        match v {
            0 => Ok(WireWhence::Set),
            2 => Ok(WireWhence::End),
            other => Err(CodecError::InvalidWhence(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    InitState { shm_name: String, shm_size: u32 },
    ExtractStart { shm_ready_bytes: u32, file_size: u64 },
    UpdatedShm {
        shm_ready_bytes: u32,
        shm_offset: u64,
        file_size: u64,
    },
    DiscardState,
    ContinueExtracting,
    Done,
    Seek {
        whence: WireWhence,
        requested_bytes: u32,
        file_offset: u64,
    },
    Meta {
        format: u16,
        kind: u16,
        mime: Option<String>,
        value: Vec<u8>,
    },
}

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Encode `msg` as a complete frame, opcode byte included.
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        Message::InitState { shm_name, shm_size } => {
            buf.push(opcode::INIT_STATE);
            buf.push(0); // reserved
            push_u16(&mut buf, 0); // reserved
            push_u32(&mut buf, shm_name.len() as u32);
            push_u32(&mut buf, *shm_size);
            buf.extend_from_slice(shm_name.as_bytes());
        }
        Message::ExtractStart {
            shm_ready_bytes,
            file_size,
        } => {
            buf.push(opcode::EXTRACT_START);
            buf.extend_from_slice(&[0u8; 3]);
            push_u32(&mut buf, *shm_ready_bytes);
            push_u64(&mut buf, *file_size);
        }
        Message::UpdatedShm {
            shm_ready_bytes,
            shm_offset,
            file_size,
        } => {
            buf.push(opcode::UPDATED_SHM);
            buf.extend_from_slice(&[0u8; 3]);
            push_u32(&mut buf, *shm_ready_bytes);
            push_u64(&mut buf, *shm_offset);
            push_u64(&mut buf, *file_size);
        }
        Message::DiscardState => {
            buf.push(opcode::DISCARD_STATE);
        }
        Message::ContinueExtracting => {
            buf.push(opcode::CONTINUE_EXTRACTING);
        }
        Message::Done => {
            buf.push(opcode::DONE);
        }
        Message::Seek {
            whence,
            requested_bytes,
            file_offset,
        } => {
            buf.push(opcode::SEEK);
            buf.push(0); // reserved
            push_u16(&mut buf, whence.to_u16());
            push_u32(&mut buf, *requested_bytes);
            push_u64(&mut buf, *file_offset);
        }
        Message::Meta {
            format,
            kind,
            mime,
            value,
        } => {
            buf.push(opcode::META);
            buf.push(0); // reserved
            push_u16(&mut buf, *format);
            push_u16(&mut buf, *kind);
            let mime_bytes: Vec<u8> = match mime {
                Some(s) => {
                    let mut b = s.as_bytes().to_vec();
                    b.push(0);
                    b
                }
                None => Vec::new(),
            };
            push_u16(&mut buf, mime_bytes.len() as u16);
            push_u32(&mut buf, value.len() as u32);
            buf.extend_from_slice(&mime_bytes);
            buf.extend_from_slice(value);
        }
    }
    buf
}

/// Try to decode one complete frame from the front of `buf`.
///
/// Returns `Ok((message, bytes_consumed))` on success. Returns
/// `Err(CodecError::Truncated { .. })` when `buf` does not yet hold a
/// complete frame — callers should wait for more bytes, not destroy the
/// channel, in that one case; every other `Err` is fatal for the channel.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), CodecError> {
    let op = *buf.first().ok_or(CodecError::Truncated { needed: 1, have: 0 })?;
    match op {
        opcode::INIT_STATE => {
            const FIXED: usize = 1 + 1 + 2 + 4 + 4;
            need(buf, FIXED)?;
            let name_len = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
            let shm_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
            let total = FIXED + name_len;
            need(buf, total)?;
            let shm_name = String::from_utf8_lossy(&buf[FIXED..total]).into_owned();
            Ok((Message::InitState { shm_name, shm_size }, total))
        }
        opcode::EXTRACT_START => {
            const FIXED: usize = 1 + 3 + 4 + 8;
            need(buf, FIXED)?;
            let shm_ready_bytes = u32::from_le_bytes(buf[4..8].try_into().unwrap());
            let file_size = u64::from_le_bytes(buf[8..16].try_into().unwrap());
            Ok((
                Message::ExtractStart {
                    shm_ready_bytes,
                    file_size,
                },
                FIXED,
            ))
        }
        opcode::UPDATED_SHM => {
            const FIXED: usize = 1 + 3 + 4 + 8 + 8;
            need(buf, FIXED)?;
            let shm_ready_bytes = u32::from_le_bytes(buf[4..8].try_into().unwrap());
            let shm_offset = u64::from_le_bytes(buf[8..16].try_into().unwrap());
            let file_size = u64::from_le_bytes(buf[16..24].try_into().unwrap());
            Ok((
                Message::UpdatedShm {
                    shm_ready_bytes,
                    shm_offset,
                    file_size,
                },
                FIXED,
            ))
        }
        opcode::DISCARD_STATE => Ok((Message::DiscardState, 1)),
        opcode::CONTINUE_EXTRACTING => Ok((Message::ContinueExtracting, 1)),
        opcode::DONE => Ok((Message::Done, 1)),
        opcode::SEEK => {
            const FIXED: usize = 1 + 1 + 2 + 4 + 8;
            need(buf, FIXED)?;
            let whence = WireWhence::from_u16(u16::from_le_bytes(buf[2..4].try_into().unwrap()))?;
            let requested_bytes = u32::from_le_bytes(buf[4..8].try_into().unwrap());
            let file_offset = u64::from_le_bytes(buf[8..16].try_into().unwrap());
            Ok((
                Message::Seek {
                    whence,
                    requested_bytes,
                    file_offset,
                },
                FIXED,
            ))
        }
        opcode::META => {
            const FIXED: usize = 1 + 1 + 2 + 2 + 2 + 4;
            need(buf, FIXED)?;
            let format = u16::from_le_bytes(buf[2..4].try_into().unwrap());
            let kind = u16::from_le_bytes(buf[4..6].try_into().unwrap());
            let mime_len = u16::from_le_bytes(buf[6..8].try_into().unwrap()) as usize;
            let value_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
            if value_size as usize > META_VALUE_MAX {
                return Err(CodecError::ValueTooLarge(value_size, META_VALUE_MAX));
            }
            let mime_start = FIXED;
            let mime_end = mime_start + mime_len;
            let value_end = mime_end + value_size as usize;
            need(buf, value_end)?;
            let mime = if mime_len > 0 {
                if buf[mime_end - 1] != 0 {
                    return Err(CodecError::MimeNotNulTerminated);
                }
                Some(String::from_utf8_lossy(&buf[mime_start..mime_end - 1]).into_owned())
            } else {
                None
            };
            let value = buf[mime_end..value_end].to_vec();
            Ok((
                Message::Meta {
                    format,
                    kind,
                    mime,
                    value,
                },
                value_end,
            ))
        }
        other => Err(CodecError::UnknownOpcode(other)),
    }
}

fn need(buf: &[u8], len: usize) -> Result<(), CodecError> {
    if buf.len() < len {
        Err(CodecError::Truncated {
            needed: len,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}
