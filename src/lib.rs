//! gtorrent
//!
//! A BitTorrent download client: bencode codec, tracker client, peer wire
//! protocol, piece scheduling with hash verification, and scatter writes to
//! the output files.

pub mod bencode;
pub mod cli;
pub mod download;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use error::TorrentError;

pub use bencode::Value;
pub use cli::{CliArgs, Config, ProgressDisplay};
pub use download::{
    DownloadConfig, DownloadHooks, DownloadManager, DownloadState, DownloadStats, PieceStrategy,
};
pub use peer::{PeerPool, PeerSession, SessionEvent};
pub use protocol::{Bitfield, Handshake, Message};
pub use storage::{FileStorage, Piece, PieceState, BLOCK_SIZE};
pub use torrent::{TorrentInfo, TorrentParser};
pub use tracker::{generate_peer_id, AnnounceRequest, AnnounceResponse, PeerEndpoint, TrackerClient};
