//! Download statistics
//!
//! The snapshot handed to progress callbacks once per second, plus the
//! formatting helpers the CLI uses to render it.

use std::fmt;
use std::time::Duration;

/// Coarse lifecycle state reported alongside statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    Starting,
    Downloading,
    Complete,
    Stopped,
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadState::Starting => write!(f, "starting"),
            DownloadState::Downloading => write!(f, "downloading"),
            DownloadState::Complete => write!(f, "complete"),
            DownloadState::Stopped => write!(f, "stopped"),
        }
    }
}

/// One statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct DownloadStats {
    /// Payload bytes received from peers
    pub downloaded_bytes: u64,
    /// Receive rate over the last sampling window
    pub download_speed_bps: f64,
    /// Live peer sessions
    pub active_peers: usize,
    /// Verified pieces
    pub pieces_completed: usize,
    /// Total pieces in the torrent
    pub pieces_total: usize,
    /// Verified fraction in [0, 1]
    pub progress_fraction: f64,
    /// Estimated time to completion at the current rate
    pub time_remaining: Option<Duration>,
    /// Current lifecycle state
    pub state: DownloadState,
}

impl DownloadStats {
    /// Format a byte count as a human-readable size
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        format!("{:.2} {}", size, UNITS[unit])
    }

    /// Format a rate as a human-readable speed
    pub fn format_speed(bytes_per_sec: f64) -> String {
        format!("{}/s", Self::format_bytes(bytes_per_sec as u64))
    }

    /// Format a duration as h/m/s
    pub fn format_duration(duration: Duration) -> String {
        let total = duration.as_secs();
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;
        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// Estimate time remaining from bytes left and the current rate
    pub fn estimate_remaining(downloaded: u64, total: u64, speed: f64) -> Option<Duration> {
        if speed <= 0.0 || downloaded >= total {
            return None;
        }
        let remaining = total.saturating_sub(downloaded) as f64;
        Some(Duration::from_secs_f64(remaining / speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(DownloadStats::format_bytes(0), "0.00 B");
        assert_eq!(DownloadStats::format_bytes(1024), "1.00 KB");
        assert_eq!(DownloadStats::format_bytes(1536), "1.50 KB");
        assert_eq!(DownloadStats::format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(DownloadStats::format_speed(2048.0), "2.00 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(DownloadStats::format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(DownloadStats::format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(
            DownloadStats::format_duration(Duration::from_secs(3725)),
            "1h 2m 5s"
        );
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(
            DownloadStats::estimate_remaining(500, 1000, 100.0),
            Some(Duration::from_secs(5))
        );
        assert_eq!(DownloadStats::estimate_remaining(1000, 1000, 100.0), None);
        assert_eq!(DownloadStats::estimate_remaining(0, 1000, 0.0), None);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DownloadState::Downloading.to_string(), "downloading");
        assert_eq!(DownloadState::Complete.to_string(), "complete");
    }
}
