//! CLI argument parsing

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::download::PieceStrategy;

/// CLI arguments for the torrent downloader
#[derive(Debug, Parser)]
#[command(name = "gtorrent")]
#[command(about = "A BitTorrent CLI downloader", long_about = None)]
pub struct CliArgs {
    /// Path to the .torrent file
    #[arg(value_name = "TORRENT_FILE")]
    pub torrent_file: PathBuf,

    /// Download directory
    #[arg(value_name = "DOWNLOAD_PATH", default_value = ".")]
    pub download_path: PathBuf,

    /// Port reported to the tracker
    #[arg(short, long, default_value_t = 6881)]
    pub port: u16,

    /// Maximum number of peer connections
    #[arg(long, default_value_t = 30)]
    pub max_peers: usize,

    /// Maximum number of pieces in flight at once
    #[arg(long, default_value_t = 5)]
    pub max_concurrent: usize,

    /// Piece selection strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::RarestFirst)]
    pub strategy: StrategyArg,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Piece selection strategy as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    RarestFirst,
    Random,
    Sequential,
}

impl From<StrategyArg> for PieceStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::RarestFirst => PieceStrategy::RarestFirst,
            StrategyArg::Random => PieceStrategy::Random,
            StrategyArg::Sequential => PieceStrategy::Sequential,
        }
    }
}

impl CliArgs {
    /// Parse CLI arguments from the command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The log level implied by the verbosity flags
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
