//! Progress display
//!
//! Renders the statistics snapshots from the download hooks as a one-line
//! progress bar, throttled so the terminal is not spammed.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::download::DownloadStats;

/// One-line CLI progress renderer
pub struct ProgressDisplay {
    start_time: Instant,
    last_update: Instant,
    update_interval: Duration,
    quiet: bool,
}

impl ProgressDisplay {
    /// Create a display; `quiet` suppresses everything but errors
    pub fn new(quiet: bool) -> Self {
        Self {
            start_time: Instant::now(),
            last_update: Instant::now() - Duration::from_secs(1),
            update_interval: Duration::from_millis(500),
            quiet,
        }
    }

    /// Render a snapshot, subject to throttling
    pub fn update(&mut self, stats: &DownloadStats, total: u64) -> io::Result<()> {
        if self.quiet || self.last_update.elapsed() < self.update_interval {
            return Ok(());
        }
        self.last_update = Instant::now();

        let percent = stats.progress_fraction * 100.0;
        let bar_width: usize = 40;
        let filled = (stats.progress_fraction * bar_width as f64) as usize;
        let bar: String = "=".repeat(filled.min(bar_width)) + &" ".repeat(bar_width.saturating_sub(filled));

        let eta = stats
            .time_remaining
            .map(DownloadStats::format_duration)
            .unwrap_or_else(|| "--".to_string());

        print!(
            "\r\x1b[2K[{}] {:.1}% | {} / {} | {} | peers: {} | pieces: {}/{} | eta: {}",
            bar,
            percent,
            DownloadStats::format_bytes(stats.downloaded_bytes),
            DownloadStats::format_bytes(total),
            DownloadStats::format_speed(stats.download_speed_bps),
            stats.active_peers,
            stats.pieces_completed,
            stats.pieces_total,
            eta,
        );
        io::stdout().flush()
    }

    /// Print the completion summary
    pub fn print_complete(&self, stats: &DownloadStats, total: u64) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!();
        println!("Download complete!");
        println!("  Size: {}", DownloadStats::format_bytes(total));
        println!("  Pieces: {}", stats.pieces_total);
        println!(
            "  Elapsed: {}",
            DownloadStats::format_duration(self.start_time.elapsed())
        );
        Ok(())
    }

    /// Print a one-off status line
    pub fn print_status(&self, message: &str) -> io::Result<()> {
        if !self.quiet {
            println!("{}", message);
        }
        Ok(())
    }

    /// Print an error line
    pub fn print_error(&self, message: &str) -> io::Result<()> {
        eprintln!("\r\x1b[2Kerror: {}", message);
        Ok(())
    }
}
