//! HTTP tracker client
//!
//! Builds the announce GET with binary-safe percent encoding for the info
//! hash and peer id; the `url` crate would re-encode raw bytes as UTF-8, so
//! the query string is assembled by hand.

use std::time::Duration;

use anyhow::Result;
use tracing::debug;
use url::Url;

use super::announce::{parse_response, AnnounceRequest, AnnounceResponse};
use crate::error::TorrentError;

/// Default tracker request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP announce client
pub struct TrackerClient {
    http: reqwest::Client,
}

impl TrackerClient {
    /// Create a client with the default request timeout
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TorrentError::from)?;
        Ok(Self { http })
    }

    /// Send an announce to `tracker_url` and decode the response
    pub async fn announce(
        &self,
        tracker_url: &str,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse> {
        let url = build_announce_url(tracker_url, request)?;
        debug!("announcing to {}", url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(TorrentError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TorrentError::tracker_http(format!(
                "tracker returned http {}",
                status
            ))
            .into());
        }

        let body = response.bytes().await.map_err(TorrentError::from)?;
        parse_response(&body)
    }
}

/// Build the announce URL with query parameters appended
fn build_announce_url(tracker_url: &str, request: &AnnounceRequest) -> Result<String> {
    let base = Url::parse(tracker_url).map_err(TorrentError::from)?;

    let mut query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        percent_encode(&request.info_hash),
        percent_encode(&request.peer_id),
        request.port,
        request.uploaded,
        request.downloaded,
        request.left,
    );
    if let Some(event) = request.event {
        query.push_str("&event=");
        query.push_str(event.as_str());
    }

    let mut url = base.to_string();
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(&query);
    Ok(url)
}

/// Percent-encode arbitrary bytes, keeping only URL-safe characters literal
fn percent_encode(data: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(data.len() * 3);
    for &byte in data {
        match byte {
            b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                out.push('%');
                out.push(HEX[(byte >> 4) as usize] as char);
                out.push(HEX[(byte & 0x0f) as usize] as char);
            }
        }
    }
    out
}
