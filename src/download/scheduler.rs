//! Piece scheduler
//!
//! Pure synchronous state: which pieces are missing, in flight, and done,
//! who is fetching what, and when an assignment expires. The manager holds
//! the single lock around this struct; nothing here performs I/O.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::protocol::Bitfield;
use crate::storage::Piece;
use crate::torrent::TorrentInfo;

/// Piece selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceStrategy {
    /// Fetch the pieces fewest peers have first (swarm-friendly default)
    #[default]
    RarestFirst,
    /// Shuffle the candidates
    Random,
    /// Ascending index order
    Sequential,
}

/// An active assignment of one piece to one session
#[derive(Debug, Clone, Copy)]
struct InFlight {
    addr: SocketAddr,
    deadline: Instant,
}

/// What happened to a delivered block
#[derive(Debug)]
pub enum BlockOutcome {
    /// Not an expected block; dropped
    Ignored,
    /// Stored; `next` is the follow-up request for the same session
    Progress { next: Option<(u32, u32)> },
    /// The piece completed and verified; `data` is ready to persist
    Verified { data: Vec<u8> },
    /// The piece completed but failed verification; the sender is bad
    Corrupt,
}

/// Scheduler state for one download
pub struct PieceScheduler {
    pieces: Vec<Piece>,
    missing: HashSet<u32>,
    in_progress: HashMap<u32, InFlight>,
    downloaded: HashSet<u32>,
    completed: usize,
    bytes_downloaded: u64,
    max_concurrent: usize,
    strategy: PieceStrategy,
    piece_timeout: Duration,
}

impl PieceScheduler {
    /// Build the full piece table from the descriptor
    pub fn new(
        torrent: &TorrentInfo,
        strategy: PieceStrategy,
        max_concurrent: usize,
        piece_timeout: Duration,
    ) -> Self {
        let pieces = (0..torrent.num_pieces())
            .map(|i| {
                Piece::new(
                    i as u32,
                    torrent.piece_hash(i).unwrap_or([0u8; 20]),
                    torrent.piece_size(i) as u32,
                )
            })
            .collect::<Vec<_>>();
        let missing = (0..pieces.len() as u32).collect();

        Self {
            pieces,
            missing,
            in_progress: HashMap::new(),
            downloaded: HashSet::new(),
            completed: 0,
            bytes_downloaded: 0,
            max_concurrent,
            strategy,
            piece_timeout,
        }
    }

    /// Total number of pieces
    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// Number of verified pieces
    pub fn completed_count(&self) -> usize {
        self.completed
    }

    /// Pieces currently assigned to sessions
    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    /// Whether every piece has been verified
    pub fn is_complete(&self) -> bool {
        self.completed == self.pieces.len()
    }

    /// Verified fraction in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.pieces.is_empty() {
            1.0
        } else {
            self.completed as f64 / self.pieces.len() as f64
        }
    }

    /// Payload bytes received so far (including later-discarded pieces)
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded
    }

    /// Whether `index` has been verified
    pub fn is_downloaded(&self, index: u32) -> bool {
        self.downloaded.contains(&index)
    }

    /// Whether this session already has an assignment
    pub fn has_assignment(&self, addr: SocketAddr) -> bool {
        self.in_progress.values().any(|f| f.addr == addr)
    }

    /// Pick and assign a piece for `addr`
    ///
    /// `availability` counts how many unchoked peers hold each
    /// not-yet-downloaded piece. Candidates are ordered by the configured
    /// strategy; the first one not in flight that this peer actually has is
    /// assigned with a fresh deadline, and its first block request is
    /// returned as `(index, begin, length)`.
    pub fn assign_piece(
        &mut self,
        addr: SocketAddr,
        peer_bitfield: &Bitfield,
        availability: &HashMap<u32, usize>,
        now: Instant,
    ) -> Option<(u32, u32, u32)> {
        if self.in_progress.len() >= self.max_concurrent {
            return None;
        }
        if self.has_assignment(addr) {
            return None;
        }

        let mut candidates: Vec<u32> = availability
            .iter()
            .filter(|(index, count)| **count > 0 && !self.downloaded.contains(*index))
            .map(|(index, _)| *index)
            .collect();

        match self.strategy {
            PieceStrategy::RarestFirst => {
                candidates.sort_by_key(|index| (availability[index], *index));
            }
            PieceStrategy::Random => {
                candidates.shuffle(&mut rand::thread_rng());
            }
            PieceStrategy::Sequential => {
                candidates.sort_unstable();
            }
        }

        for index in candidates {
            if self.in_progress.contains_key(&index) {
                continue;
            }
            if !peer_bitfield.has_piece(index as usize) {
                continue;
            }

            let piece = &mut self.pieces[index as usize];
            let Some((begin, length)) = piece.next_request() else {
                continue;
            };
            self.missing.remove(&index);
            self.in_progress.insert(
                index,
                InFlight {
                    addr,
                    deadline: now + self.piece_timeout,
                },
            );
            debug!("assigned piece {} to {}", index, addr);
            return Some((index, begin, length));
        }
        None
    }

    /// Account for a block delivered by `addr`
    pub fn on_block(&mut self, addr: SocketAddr, index: u32, begin: u32, data: Vec<u8>) -> BlockOutcome {
        let Some(flight) = self.in_progress.get(&index) else {
            return BlockOutcome::Ignored;
        };
        if flight.addr != addr {
            // Only the assigned session may fill this piece
            return BlockOutcome::Ignored;
        }

        let received = data.len() as u64;
        let piece = &mut self.pieces[index as usize];
        if let Err(e) = piece.add_block(begin, data) {
            warn!("rejected block from {}: {}", addr, e);
            return BlockOutcome::Ignored;
        }
        self.bytes_downloaded += received;

        if !piece.is_full() {
            return BlockOutcome::Progress { next: piece.next_request() };
        }

        if piece.verify() {
            let data = piece.assemble();
            self.in_progress.remove(&index);
            self.downloaded.insert(index);
            self.completed += 1;
            debug!("piece {} verified ({}/{})", index, self.completed, self.pieces.len());
            BlockOutcome::Verified { data }
        } else {
            warn!("piece {} failed verification; resetting", index);
            piece.reset();
            self.in_progress.remove(&index);
            self.missing.insert(index);
            BlockOutcome::Corrupt
        }
    }

    /// Reset every in-flight piece whose deadline has passed
    ///
    /// Returns the affected `(piece, session)` pairs.
    pub fn expire_deadlines(&mut self, now: Instant) -> Vec<(u32, SocketAddr)> {
        let expired: Vec<(u32, SocketAddr)> = self
            .in_progress
            .iter()
            .filter(|(_, flight)| flight.deadline <= now)
            .map(|(index, flight)| (*index, flight.addr))
            .collect();

        for (index, addr) in &expired {
            warn!("piece {} assigned to {} timed out", index, addr);
            self.pieces[*index as usize].reset();
            self.in_progress.remove(index);
            self.missing.insert(*index);
        }
        expired
    }

    /// Let a closed session's assignment lapse on the next tick
    ///
    /// Recovery goes through the deadline path rather than resetting
    /// immediately, so there is exactly one reclamation mechanism.
    pub fn expire_session(&mut self, addr: SocketAddr, now: Instant) {
        for flight in self.in_progress.values_mut() {
            if flight.addr == addr {
                flight.deadline = now;
            }
        }
    }
}
