//! Peer wire protocol messages
//!
//! Length-prefixed frames: a 4-byte big-endian length, then (unless it is a
//! keep-alive) one id byte and the payload. Unknown ids are preserved so the
//! session can log and skip them without dropping the connection.

use anyhow::Result;
use bytes::{Buf, BufMut, BytesMut};

use crate::error::TorrentError;

/// Known message ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

/// A peer wire protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield { bitfield: Bitfield },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    /// A message with an id we do not implement; payload already consumed
    Unknown { id: u8 },
}

impl Message {
    /// The id byte, or None for keep-alive
    pub fn message_id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke as u8),
            Message::Unchoke => Some(MessageId::Unchoke as u8),
            Message::Interested => Some(MessageId::Interested as u8),
            Message::NotInterested => Some(MessageId::NotInterested as u8),
            Message::Have { .. } => Some(MessageId::Have as u8),
            Message::Bitfield { .. } => Some(MessageId::Bitfield as u8),
            Message::Request { .. } => Some(MessageId::Request as u8),
            Message::Piece { .. } => Some(MessageId::Piece as u8),
            Message::Cancel { .. } => Some(MessageId::Cancel as u8),
            Message::Unknown { id } => Some(*id),
        }
    }

    /// Frame length excluding the 4-byte prefix
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested
            | Message::Unknown { .. } => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.as_bytes().len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
        }
    }

    /// Serialize to wire bytes including the length prefix
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);
        buf.put_u32(self.length());

        match self {
            Message::KeepAlive => {}
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {
                buf.put_u8(self.message_id().unwrap_or(0));
            }
            Message::Have { index } => {
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*index);
            }
            Message::Bitfield { bitfield } => {
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bitfield.as_bytes());
            }
            Message::Request { index, begin, length } => {
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Cancel { index, begin, length } => {
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Unknown { id } => {
                buf.put_u8(*id);
            }
        }

        buf.to_vec()
    }

    /// Parse a frame body (id byte plus payload, length prefix stripped)
    pub fn parse_frame(frame: &[u8]) -> Result<Self> {
        if frame.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let mut buf = BytesMut::from(frame);
        let id = buf.get_u8();

        match id {
            0 => Ok(Message::Choke),
            1 => Ok(Message::Unchoke),
            2 => Ok(Message::Interested),
            3 => Ok(Message::NotInterested),
            4 => {
                if buf.remaining() < 4 {
                    return Err(TorrentError::protocol(format!(
                        "have payload too short: {} bytes",
                        buf.remaining()
                    ))
                    .into());
                }
                Ok(Message::Have { index: buf.get_u32() })
            }
            5 => Ok(Message::Bitfield {
                bitfield: Bitfield::from_bytes(buf.to_vec()),
            }),
            6 | 8 => {
                if buf.remaining() != 12 {
                    return Err(TorrentError::protocol(format!(
                        "request/cancel payload must be 12 bytes, got {}",
                        buf.remaining()
                    ))
                    .into());
                }
                let index = buf.get_u32();
                let begin = buf.get_u32();
                let length = buf.get_u32();
                if id == 6 {
                    Ok(Message::Request { index, begin, length })
                } else {
                    Ok(Message::Cancel { index, begin, length })
                }
            }
            7 => {
                if buf.remaining() < 8 {
                    return Err(TorrentError::protocol(format!(
                        "piece payload too short: {} bytes",
                        buf.remaining()
                    ))
                    .into());
                }
                let index = buf.get_u32();
                let begin = buf.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    block: buf.to_vec(),
                })
            }
            id => Ok(Message::Unknown { id }),
        }
    }
}

/// Packed piece-availability bit array
///
/// Big-endian bit order: piece 0 is the most significant bit of byte 0.
/// Trailing bits past the last piece stay zero on transmit and are ignored
/// on receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bytes: Vec<u8>,
}

impl Bitfield {
    /// An all-zero bitfield sized for `num_pieces`
    pub fn new(num_pieces: usize) -> Self {
        Self {
            bytes: vec![0u8; num_pieces.div_ceil(8)],
        }
    }

    /// Wrap bytes received off the wire
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Whether bit `index` is set; out-of-range indices read as unset
    pub fn has_piece(&self, index: usize) -> bool {
        let byte_index = index / 8;
        match self.bytes.get(byte_index) {
            Some(byte) => (byte >> (7 - (index % 8))) & 1 == 1,
            None => false,
        }
    }

    /// Set bit `index`; out-of-range indices are ignored
    pub fn set_piece(&mut self, index: usize) {
        let byte_index = index / 8;
        if let Some(byte) = self.bytes.get_mut(byte_index) {
            *byte |= 1 << (7 - (index % 8));
        }
    }

    /// Number of set bits
    pub fn count_pieces(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Raw packed bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the backing array is empty (no bitfield received yet)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
