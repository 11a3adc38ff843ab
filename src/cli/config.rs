//! CLI configuration

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::args::CliArgs;
use crate::download::DownloadConfig;

/// Validated run configuration built from the CLI arguments
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the .torrent file
    pub torrent_file: PathBuf,
    /// Download directory
    pub download_path: PathBuf,
    /// Scheduler, pool, and tracker knobs
    pub download: DownloadConfig,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Build a configuration from parsed arguments
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            torrent_file: args.torrent_file.clone(),
            download_path: args.download_path.clone(),
            download: DownloadConfig {
                download_path: args.download_path.clone(),
                port: args.port,
                max_peers: args.max_peers,
                max_concurrent: args.max_concurrent,
                strategy: args.strategy.into(),
                ..DownloadConfig::default()
            },
            quiet: args.quiet,
        }
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.download.port == 0 {
            return Err(anyhow::anyhow!("port cannot be 0"));
        }
        if self.download.max_peers == 0 {
            return Err(anyhow::anyhow!("max_peers must be at least 1"));
        }
        if self.download.max_concurrent == 0 {
            return Err(anyhow::anyhow!("max_concurrent must be at least 1"));
        }
        if self.download_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("download path cannot be empty"));
        }
        Ok(())
    }
}
