//! Piece and block model
//!
//! A piece is divided into 16 KiB blocks, requested one at a time and
//! accumulated until the piece can be hashed against its declared SHA-1.
//! All mutation happens under the scheduler's lock; the struct itself
//! carries no synchronization.

use anyhow::Result;
use sha1::{Digest, Sha1};

use crate::error::TorrentError;

/// Block size used for peer requests (16 KiB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Lifecycle state of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceState {
    /// No blocks requested or held
    #[default]
    Missing,
    /// At least one block requested
    Pending,
    /// All blocks present and the hash verified
    Complete,
}

/// A block within a piece
#[derive(Debug, Clone)]
struct Block {
    /// Byte offset within the piece
    begin: u32,
    /// Block length in bytes
    length: u32,
    /// Payload, once received
    data: Option<Vec<u8>>,
}

/// A piece under acquisition
#[derive(Debug, Clone)]
pub struct Piece {
    /// Piece index
    pub index: u32,
    hash: [u8; 20],
    length: u32,
    blocks: Vec<Block>,
    requested: Vec<bool>,
    state: PieceState,
    downloaded: u32,
}

impl Piece {
    /// Create a piece of `length` bytes expecting `hash`
    ///
    /// Blocks are 16 KiB each; the final block takes the remainder.
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> Self {
        let num_blocks = length.div_ceil(BLOCK_SIZE) as usize;
        let blocks = (0..num_blocks)
            .map(|i| {
                let begin = i as u32 * BLOCK_SIZE;
                Block {
                    begin,
                    length: BLOCK_SIZE.min(length - begin),
                    data: None,
                }
            })
            .collect();

        Self {
            index,
            hash,
            length,
            blocks,
            requested: vec![false; num_blocks],
            state: PieceState::Missing,
            downloaded: 0,
        }
    }

    /// Piece length in bytes
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Bytes received so far
    pub fn downloaded(&self) -> u32 {
        self.downloaded
    }

    /// Current lifecycle state
    pub fn state(&self) -> PieceState {
        self.state
    }

    /// Number of blocks in the piece
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Install a received block at offset `begin`
    ///
    /// Fails with BlockMismatch when no block starts at `begin` or the
    /// payload length disagrees with the layout. Re-delivery of a block we
    /// already hold is ignored.
    pub fn add_block(&mut self, begin: u32, data: Vec<u8>) -> Result<()> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.begin == begin)
            .ok_or_else(|| {
                TorrentError::block_mismatch(format!(
                    "piece {} has no block at offset {}",
                    self.index, begin
                ))
            })?;

        if data.len() as u32 != block.length {
            return Err(TorrentError::block_mismatch(format!(
                "piece {} block at {}: got {} bytes, expected {}",
                self.index,
                begin,
                data.len(),
                block.length
            ))
            .into());
        }

        if block.data.is_none() {
            self.downloaded += data.len() as u32;
            block.data = Some(data);
        }
        Ok(())
    }

    /// Whether every block has been received
    pub fn is_full(&self) -> bool {
        self.downloaded == self.length
    }

    /// The next block to request, marking it requested
    ///
    /// Returns `(begin, length)`; None when every block is requested.
    pub fn next_request(&mut self) -> Option<(u32, u32)> {
        for (i, block) in self.blocks.iter().enumerate() {
            if block.data.is_none() && !self.requested[i] {
                self.requested[i] = true;
                self.state = PieceState::Pending;
                return Some((block.begin, block.length));
            }
        }
        None
    }

    /// Concatenate all block payloads in offset order
    ///
    /// Only valid when the piece is full.
    pub fn assemble(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.length as usize);
        for block in &self.blocks {
            if let Some(payload) = &block.data {
                data.extend_from_slice(payload);
            }
        }
        data
    }

    /// Hash the assembled piece against the expected digest
    ///
    /// Succeeding moves the piece to Complete. Callers reset the piece on
    /// failure; a partial piece always fails.
    pub fn verify(&mut self) -> bool {
        if !self.is_full() {
            return false;
        }

        let mut hasher = Sha1::new();
        hasher.update(self.assemble());
        let digest = hasher.finalize();

        if digest.as_slice() == self.hash {
            self.state = PieceState::Complete;
            true
        } else {
            false
        }
    }

    /// Drop all payloads and requested flags, returning to Missing
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.data = None;
        }
        self.requested.fill(false);
        self.downloaded = 0;
        self.state = PieceState::Missing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[test]
    fn test_block_layout() {
        let piece = Piece::new(0, [0u8; 20], BLOCK_SIZE * 2);
        assert_eq!(piece.block_count(), 2);

        // Final block takes the remainder
        let piece = Piece::new(0, [0u8; 20], BLOCK_SIZE + 100);
        assert_eq!(piece.block_count(), 2);

        let piece = Piece::new(0, [0u8; 20], 100);
        assert_eq!(piece.block_count(), 1);
    }

    #[test]
    fn test_add_block_tracks_downloaded() {
        let mut piece = Piece::new(0, [0u8; 20], BLOCK_SIZE * 2);
        piece.add_block(0, vec![1u8; BLOCK_SIZE as usize]).unwrap();
        assert_eq!(piece.downloaded(), BLOCK_SIZE);
        assert!(!piece.is_full());

        piece
            .add_block(BLOCK_SIZE, vec![2u8; BLOCK_SIZE as usize])
            .unwrap();
        assert!(piece.is_full());
    }

    #[test]
    fn test_add_block_wrong_offset() {
        let mut piece = Piece::new(3, [0u8; 20], BLOCK_SIZE);
        let err = piece.add_block(100, vec![0u8; 100]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::BlockMismatch { .. })
        ));
    }

    #[test]
    fn test_add_block_wrong_length() {
        let mut piece = Piece::new(0, [0u8; 20], BLOCK_SIZE);
        let err = piece.add_block(0, vec![0u8; 10]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::BlockMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_block_ignored() {
        let mut piece = Piece::new(0, [0u8; 20], BLOCK_SIZE);
        piece.add_block(0, vec![1u8; BLOCK_SIZE as usize]).unwrap();
        piece.add_block(0, vec![2u8; BLOCK_SIZE as usize]).unwrap();
        assert_eq!(piece.downloaded(), BLOCK_SIZE);
        assert_eq!(piece.assemble()[0], 1);
    }

    #[test]
    fn test_next_request_walks_blocks_once() {
        let mut piece = Piece::new(0, [0u8; 20], BLOCK_SIZE * 2 + 50);
        assert_eq!(piece.next_request(), Some((0, BLOCK_SIZE)));
        assert_eq!(piece.state(), PieceState::Pending);
        assert_eq!(piece.next_request(), Some((BLOCK_SIZE, BLOCK_SIZE)));
        assert_eq!(piece.next_request(), Some((BLOCK_SIZE * 2, 50)));
        assert_eq!(piece.next_request(), None);
    }

    #[test]
    fn test_verify_success() {
        let data = vec![0x5a; 1000];
        let mut piece = Piece::new(0, sha1_of(&data), 1000);
        piece.add_block(0, data.clone()).unwrap();

        assert!(piece.verify());
        assert_eq!(piece.state(), PieceState::Complete);
        assert_eq!(piece.assemble(), data);
    }

    #[test]
    fn test_verify_failure_and_reset() {
        let mut piece = Piece::new(0, [0u8; 20], 1000);
        piece.add_block(0, vec![0x5a; 1000]).unwrap();

        assert!(!piece.verify());
        assert_ne!(piece.state(), PieceState::Complete);

        piece.reset();
        assert_eq!(piece.state(), PieceState::Missing);
        assert_eq!(piece.downloaded(), 0);
        assert!(piece.assemble().is_empty());
        // Blocks are requestable again after a reset
        assert_eq!(piece.next_request(), Some((0, 1000)));
    }

    #[test]
    fn test_verify_partial_piece_fails() {
        let mut piece = Piece::new(0, [0u8; 20], BLOCK_SIZE * 2);
        piece.add_block(0, vec![0u8; BLOCK_SIZE as usize]).unwrap();
        assert!(!piece.verify());
    }

    #[test]
    fn test_assemble_multi_block_order() {
        let mut data = vec![0x11; BLOCK_SIZE as usize];
        data.extend(vec![0x22; 100]);
        let mut piece = Piece::new(0, sha1_of(&data), data.len() as u32);

        // Deliver out of order; assembly is by offset
        piece.add_block(BLOCK_SIZE, vec![0x22; 100]).unwrap();
        piece.add_block(0, vec![0x11; BLOCK_SIZE as usize]).unwrap();

        assert!(piece.verify());
        assert_eq!(piece.assemble(), data);
    }
}
