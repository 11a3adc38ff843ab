//! gtorrent - main entry point

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use gtorrent::{
    CliArgs, Config, DownloadHooks, DownloadManager, DownloadStats, ProgressDisplay, TorrentError,
    TorrentInfo, TorrentParser,
};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse_args();
    init_logging(&args);

    let config = Config::from_args(&args);
    config.validate().context("invalid configuration")?;

    let torrent = TorrentParser::parse_file(&config.torrent_file)
        .context("failed to load torrent file")?;
    display_torrent_info(&torrent, &config);

    let progress = Arc::new(Mutex::new(ProgressDisplay::new(config.quiet)));
    let total = torrent.total_length();
    let hooks = build_hooks(progress.clone(), total);

    let manager = Arc::new(
        DownloadManager::new(torrent, config.download.clone(), hooks)
            .await
            .context("failed to start download")?,
    );

    spawn_signal_handler(manager.clone());

    match manager.run().await {
        Ok(()) => {
            let stats = manager.stats();
            let display = progress.lock().unwrap();
            display.print_complete(&stats, total)?;
            Ok(())
        }
        Err(e) => {
            if matches!(e.downcast_ref::<TorrentError>(), Some(TorrentError::Cancelled)) {
                info!("download cancelled");
                let display = progress.lock().unwrap();
                display.print_status("\ncancelled")?;
                std::process::exit(130);
            }
            error!("download failed: {}", e);
            progress.lock().unwrap().print_error(&e.to_string())?;
            Err(e)
        }
    }
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_writer(std::io::stderr);

    if args.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

/// Print the descriptor summary before starting
fn display_torrent_info(torrent: &TorrentInfo, config: &Config) {
    if config.quiet {
        return;
    }
    println!("Torrent: {}", torrent.name);
    println!(
        "  Size: {} ({} pieces of {})",
        DownloadStats::format_bytes(torrent.total_length()),
        torrent.num_pieces(),
        DownloadStats::format_bytes(torrent.piece_length),
    );
    println!("  Info hash: {}", torrent.info_hash_hex());
    println!("  Tracker: {}", torrent.announce);
    println!("  Output: {}", config.download_path.display());
    println!();
}

/// Wire the progress display into the manager callbacks
fn build_hooks(progress: Arc<Mutex<ProgressDisplay>>, total: u64) -> DownloadHooks {
    DownloadHooks {
        on_stats_updated: Some(Box::new(move |stats| {
            if let Err(e) = progress.lock().unwrap().update(stats, total) {
                debug!("progress render failed: {}", e);
            }
        })),
        on_piece_completed: Some(Box::new(|index| {
            debug!("piece {} completed", index);
        })),
        on_peer_connected: Some(Box::new(|addr| {
            info!("peer connected: {}", addr);
        })),
        on_peer_disconnected: Some(Box::new(|addr| {
            info!("peer disconnected: {}", addr);
        })),
        on_download_complete: Some(Box::new(|| {
            info!("download complete");
        })),
    }
}

/// Translate SIGINT/SIGTERM into a graceful shutdown
///
/// A second interrupt terminates the process immediately.
fn spawn_signal_handler(manager: Arc<DownloadManager>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("shutdown requested; finishing up (interrupt again to force quit)");
        manager.trigger_shutdown();

        wait_for_signal().await;
        error!("second interrupt; terminating");
        std::process::exit(130);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("signal handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
