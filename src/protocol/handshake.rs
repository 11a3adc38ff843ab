//! BitTorrent handshake frame
//!
//! The first 68 bytes exchanged on every peer connection. The initiator
//! writes first, then reads; an info-hash mismatch aborts the connection.

use anyhow::Result;
use bytes::{BufMut, BytesMut};

use crate::error::TorrentError;

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Serialized handshake size in bytes
pub const HANDSHAKE_LEN: usize = 68;

/// BitTorrent handshake frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Reserved extension bits; zero on send
    pub reserved: [u8; 8],
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Sender's peer ID
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Create a handshake with no extensions advertised
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serialize to the 68-byte wire frame
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING.len() as u8);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.to_vec()
    }

    /// Deserialize from a 68-byte wire frame
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_LEN {
            return Err(TorrentError::protocol(format!(
                "handshake too short: expected {} bytes, got {}",
                HANDSHAKE_LEN,
                data.len()
            ))
            .into());
        }
        if data[0] as usize != PROTOCOL_STRING.len() {
            return Err(TorrentError::protocol(format!(
                "bad protocol string length: {}",
                data[0]
            ))
            .into());
        }
        if &data[1..20] != PROTOCOL_STRING {
            return Err(TorrentError::protocol("bad protocol string").into());
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Whether the remote handshake carries the info hash we expect
    pub fn matches(&self, expected_info_hash: &[u8; 20]) -> bool {
        &self.info_hash == expected_info_hash
    }
}
