//! Tracker module
//!
//! HTTP announce client: builds the query, decodes the bencode response,
//! and yields candidate peer endpoints in both compact and dictionary form.

pub mod announce;
pub mod client;
pub mod peer_id;

pub use announce::{AnnounceEvent, AnnounceRequest, AnnounceResponse, PeerEndpoint};
pub use client::TrackerClient;
pub use peer_id::generate_peer_id;
