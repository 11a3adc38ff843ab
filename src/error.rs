//! Error types for the torrent downloader
//!
//! One error enum covers every failure class the client can hit, from
//! malformed descriptors to dead peers. Variants carry just enough context
//! to log a useful message at the point of recovery.

use std::fmt;

/// Error type for all torrent operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Malformed bencode data (torrent file or tracker response)
    BencodeFormat {
        message: String,
    },

    /// Structurally valid bencode that does not describe a usable torrent
    DescriptorInvalid {
        message: String,
    },

    /// The tracker answered with a `failure reason`
    TrackerFailure {
        reason: String,
    },

    /// HTTP-level tracker failure (transport, status, unreadable body)
    TrackerHttp {
        message: String,
    },

    /// Peer handshake carried the wrong info hash or protocol string
    HandshakeMismatch {
        message: String,
        peer: Option<String>,
    },

    /// Peer sent something the wire protocol does not allow
    ProtocolViolation {
        message: String,
        peer: Option<String>,
    },

    /// A received block does not line up with the piece layout
    BlockMismatch {
        message: String,
    },

    /// An assembled piece failed its SHA-1 check
    PieceVerifyFailed {
        index: u32,
    },

    /// File I/O failure; fatal to the download
    StorageIo {
        message: String,
        path: Option<String>,
    },

    /// Peer connection failed or was torn down mid-stream
    ConnectionReset {
        message: String,
        peer: Option<String>,
    },

    /// An operation exceeded its deadline
    Timeout {
        operation: String,
    },

    /// Shutdown was requested
    Cancelled,
}

impl TorrentError {
    /// Create a new BencodeFormat error
    pub fn bencode(message: impl Into<String>) -> Self {
        TorrentError::BencodeFormat {
            message: message.into(),
        }
    }

    /// Create a new DescriptorInvalid error
    pub fn descriptor(message: impl Into<String>) -> Self {
        TorrentError::DescriptorInvalid {
            message: message.into(),
        }
    }

    /// Create a new TrackerFailure error
    pub fn tracker_failure(reason: impl Into<String>) -> Self {
        TorrentError::TrackerFailure {
            reason: reason.into(),
        }
    }

    /// Create a new TrackerHttp error
    pub fn tracker_http(message: impl Into<String>) -> Self {
        TorrentError::TrackerHttp {
            message: message.into(),
        }
    }

    /// Create a new HandshakeMismatch error for a peer
    pub fn handshake(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::HandshakeMismatch {
            message: message.into(),
            peer: Some(peer.into()),
        }
    }

    /// Create a new ProtocolViolation error
    pub fn protocol(message: impl Into<String>) -> Self {
        TorrentError::ProtocolViolation {
            message: message.into(),
            peer: None,
        }
    }

    /// Create a new ProtocolViolation error for a peer
    pub fn protocol_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::ProtocolViolation {
            message: message.into(),
            peer: Some(peer.into()),
        }
    }

    /// Create a new BlockMismatch error
    pub fn block_mismatch(message: impl Into<String>) -> Self {
        TorrentError::BlockMismatch {
            message: message.into(),
        }
    }

    /// Create a new StorageIo error
    pub fn storage(message: impl Into<String>) -> Self {
        TorrentError::StorageIo {
            message: message.into(),
            path: None,
        }
    }

    /// Create a new StorageIo error with the offending path
    pub fn storage_with_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        TorrentError::StorageIo {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create a new ConnectionReset error
    pub fn connection(message: impl Into<String>) -> Self {
        TorrentError::ConnectionReset {
            message: message.into(),
            peer: None,
        }
    }

    /// Create a new ConnectionReset error for a peer
    pub fn connection_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::ConnectionReset {
            message: message.into(),
            peer: Some(peer.into()),
        }
    }

    /// Create a new Timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        TorrentError::Timeout {
            operation: operation.into(),
        }
    }
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::BencodeFormat { message } => {
                write!(f, "bencode error: {}", message)
            }
            TorrentError::DescriptorInvalid { message } => {
                write!(f, "invalid torrent descriptor: {}", message)
            }
            TorrentError::TrackerFailure { reason } => {
                write!(f, "tracker failure: {}", reason)
            }
            TorrentError::TrackerHttp { message } => {
                write!(f, "tracker http error: {}", message)
            }
            TorrentError::HandshakeMismatch { message, peer } => {
                if let Some(p) = peer {
                    write!(f, "handshake mismatch: {} (peer: {})", message, p)
                } else {
                    write!(f, "handshake mismatch: {}", message)
                }
            }
            TorrentError::ProtocolViolation { message, peer } => {
                if let Some(p) = peer {
                    write!(f, "protocol violation: {} (peer: {})", message, p)
                } else {
                    write!(f, "protocol violation: {}", message)
                }
            }
            TorrentError::BlockMismatch { message } => {
                write!(f, "block mismatch: {}", message)
            }
            TorrentError::PieceVerifyFailed { index } => {
                write!(f, "piece {} failed hash verification", index)
            }
            TorrentError::StorageIo { message, path } => {
                if let Some(p) = path {
                    write!(f, "storage error: {} (path: {})", message, p)
                } else {
                    write!(f, "storage error: {}", message)
                }
            }
            TorrentError::ConnectionReset { message, peer } => {
                if let Some(p) = peer {
                    write!(f, "connection error: {} (peer: {})", message, p)
                } else {
                    write!(f, "connection error: {}", message)
                }
            }
            TorrentError::Timeout { operation } => {
                write!(f, "timed out: {}", operation)
            }
            TorrentError::Cancelled => {
                write!(f, "cancelled")
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<crate::bencode::BencodeError> for TorrentError {
    fn from(err: crate::bencode::BencodeError) -> Self {
        TorrentError::bencode(err.to_string())
    }
}

impl From<reqwest::Error> for TorrentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TorrentError::timeout("tracker request")
        } else {
            TorrentError::tracker_http(err.to_string())
        }
    }
}

impl From<url::ParseError> for TorrentError {
    fn from(err: url::ParseError) -> Self {
        TorrentError::tracker_http(format!("invalid announce url: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TorrentError::timeout("i/o operation")
    }
}
