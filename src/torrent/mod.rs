//! Torrent descriptor module
//!
//! Parses .torrent files into an immutable descriptor and exposes the
//! piece/file geometry the scheduler and storage writer work from.

pub mod info;
pub mod parser;

pub use info::{FileSpan, TorrentFile, TorrentInfo};
pub use parser::TorrentParser;
