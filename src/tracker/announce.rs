//! Announce request/response types and peer list parsing

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Result;
use tracing::warn;

use crate::bencode::Value;
use crate::error::TorrentError;

/// Optional event reported to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
    Completed,
    Stopped,
}

impl AnnounceEvent {
    /// Query-parameter spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnounceEvent::Started => "started",
            AnnounceEvent::Completed => "completed",
            AnnounceEvent::Stopped => "stopped",
        }
    }
}

/// Parameters for one announce request
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Option<AnnounceEvent>,
}

/// Decoded tracker response
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the next announce
    pub interval: u64,
    /// Candidate peers
    pub peers: Vec<PeerEndpoint>,
}

/// A candidate peer address from the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Present only in non-compact responses
    pub peer_id: Option<[u8; 20]>,
}

impl PeerEndpoint {
    /// Socket address for connecting
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parse a bencode tracker response body
pub fn parse_response(body: &[u8]) -> Result<AnnounceResponse> {
    let root = crate::bencode::decode(body).map_err(TorrentError::from)?;
    let dict = root
        .as_dict()
        .ok_or_else(|| TorrentError::tracker_http("response is not a dictionary"))?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()) {
        let reason = reason
            .as_str()
            .unwrap_or("unreadable failure reason")
            .to_string();
        return Err(TorrentError::tracker_failure(reason).into());
    }

    let interval = dict
        .get(b"interval".as_slice())
        .and_then(|v| v.as_int())
        .filter(|i| *i >= 0)
        .ok_or_else(|| TorrentError::tracker_http("missing interval"))? as u64;

    let peers = match dict.get(b"peers".as_slice()) {
        Some(Value::Bytes(compact)) => parse_compact_peers(compact)?,
        Some(Value::List(list)) => parse_peer_dicts(list)?,
        Some(_) => {
            return Err(TorrentError::tracker_http("peers field has unexpected type").into());
        }
        None => Vec::new(),
    };

    Ok(AnnounceResponse { interval, peers })
}

/// Parse the compact peer encoding: 6 bytes per peer, 4-byte IPv4 then
/// 2-byte big-endian port
pub fn parse_compact_peers(data: &[u8]) -> Result<Vec<PeerEndpoint>> {
    if data.len() % 6 != 0 {
        return Err(TorrentError::tracker_http(format!(
            "compact peer list length {} is not a multiple of 6",
            data.len()
        ))
        .into());
    }

    Ok(data
        .chunks_exact(6)
        .map(|chunk| PeerEndpoint {
            ip: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
            port: u16::from_be_bytes([chunk[4], chunk[5]]),
            peer_id: None,
        })
        .collect())
}

/// Parse the dictionary peer encoding
///
/// Entries with an `ip` we cannot parse as IPv4 are skipped; a missing `ip`
/// or `port` is an error.
fn parse_peer_dicts(list: &[Value]) -> Result<Vec<PeerEndpoint>> {
    let mut peers = Vec::with_capacity(list.len());
    for entry in list {
        let dict = entry
            .as_dict()
            .ok_or_else(|| TorrentError::tracker_http("peer entry is not a dictionary"))?;

        let ip_str = dict
            .get(b"ip".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| TorrentError::tracker_http("peer entry missing ip"))?;
        let port = dict
            .get(b"port".as_slice())
            .and_then(|v| v.as_int())
            .filter(|p| (0..=u16::MAX as i64).contains(p))
            .ok_or_else(|| TorrentError::tracker_http("peer entry missing port"))?
            as u16;

        let ip: Ipv4Addr = match ip_str.parse() {
            Ok(ip) => ip,
            Err(_) => {
                warn!("skipping peer with unparseable ip '{}'", ip_str);
                continue;
            }
        };

        let peer_id = dict
            .get(b"peer id".as_slice())
            .and_then(|v| v.as_bytes())
            .and_then(|b| <[u8; 20]>::try_from(b).ok());

        peers.push(PeerEndpoint { ip, port, peer_id });
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compact_peers() {
        let data = [
            0x7f, 0x00, 0x00, 0x01, 0x1a, 0xe1, // 127.0.0.1:6881
            0xc0, 0xa8, 0x01, 0x01, 0x1f, 0x90, // 192.168.1.1:8080
        ];
        let peers = parse_compact_peers(&data).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].to_string(), "127.0.0.1:6881");
        assert_eq!(peers[1].to_string(), "192.168.1.1:8080");
    }

    #[test]
    fn test_parse_compact_peers_bad_length() {
        let err = parse_compact_peers(&[1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::TrackerHttp { .. })
        ));
    }

    #[test]
    fn test_parse_response_compact() {
        let body = b"d8:intervali1800e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let response = parse_response(body).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].addr().to_string(), "127.0.0.1:6881");
    }

    #[test]
    fn test_parse_response_dict_peers() {
        let body =
            b"d8:intervali900e5:peersld2:ip9:127.0.0.14:porti6881eed2:ip11:192.168.1.14:porti8080eeee";
        let response = parse_response(body).unwrap();
        assert_eq!(response.interval, 900);
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].port, 6881);
        assert_eq!(response.peers[1].ip, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn test_parse_response_dict_peer_with_id() {
        let mut body = b"d8:intervali900e5:peersld2:ip9:127.0.0.17:peer id20:".to_vec();
        body.extend_from_slice(&[0x61; 20]);
        body.extend_from_slice(b"4:porti6881eeee");
        let response = parse_response(&body).unwrap();
        assert_eq!(response.peers[0].peer_id, Some([0x61; 20]));
    }

    #[test]
    fn test_parse_response_hostname_peer_skipped() {
        let body =
            b"d8:intervali900e5:peersld2:ip11:example.com4:porti6881eed2:ip9:127.0.0.14:porti1eeee";
        let response = parse_response(body).unwrap();
        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].ip, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_parse_response_failure_reason() {
        let body = b"d14:failure reason22:torrent not registerede";
        let err = parse_response(body).unwrap_err();
        match err.downcast_ref::<TorrentError>() {
            Some(TorrentError::TrackerFailure { reason }) => {
                assert_eq!(reason, "torrent not registered")
            }
            other => panic!("wrong error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_missing_interval() {
        let body = b"d5:peers0:e";
        assert!(parse_response(body).is_err());
    }

    #[test]
    fn test_parse_response_not_bencode() {
        let err = parse_response(b"<html>busy</html>").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::BencodeFormat { .. })
        ));
    }

    #[test]
    fn test_event_strings() {
        assert_eq!(AnnounceEvent::Started.as_str(), "started");
        assert_eq!(AnnounceEvent::Completed.as_str(), "completed");
        assert_eq!(AnnounceEvent::Stopped.as_str(), "stopped");
    }
}
