//! Download manager
//!
//! Wires the tracker client, peer pool, piece scheduler, and storage writer
//! together and runs the coordinating tasks: the session-event loop, the
//! 1 Hz scheduler tick, the 1 Hz statistics loop, and the tracker
//! re-announce loop. The scheduler mutex is never held across an await.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::download::scheduler::{BlockOutcome, PieceScheduler, PieceStrategy};
use crate::download::stats::{DownloadState, DownloadStats};
use crate::error::TorrentError;
use crate::peer::session::{PeerSession, SessionEvent};
use crate::peer::PeerPool;
use crate::protocol::Bitfield;
use crate::storage::FileStorage;
use crate::torrent::TorrentInfo;
use crate::tracker::{
    generate_peer_id, AnnounceEvent, AnnounceRequest, PeerEndpoint, TrackerClient,
};

/// Tunables for one download
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Directory the payload lands in
    pub download_path: PathBuf,
    /// Port reported to the tracker
    pub port: u16,
    /// Connection budget for the peer pool
    pub max_peers: usize,
    /// Pieces allowed in flight at once
    pub max_concurrent: usize,
    /// Piece selection policy
    pub strategy: PieceStrategy,
    /// How long an assigned piece may stay incomplete
    pub piece_timeout: Duration,
    /// Minimum delay between tracker announces
    pub announce_floor: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_path: PathBuf::from("."),
            port: 6881,
            max_peers: 30,
            max_concurrent: 5,
            strategy: PieceStrategy::RarestFirst,
            piece_timeout: Duration::from_secs(300),
            announce_floor: Duration::from_secs(30),
        }
    }
}

/// Progress callbacks, installed before anything starts
///
/// Every hook is optional; all fire on the manager's internal tasks, so
/// they should return quickly.
#[derive(Default)]
pub struct DownloadHooks {
    pub on_piece_completed: Option<Box<dyn Fn(u32) + Send + Sync>>,
    pub on_peer_connected: Option<Box<dyn Fn(SocketAddr) + Send + Sync>>,
    pub on_peer_disconnected: Option<Box<dyn Fn(SocketAddr) + Send + Sync>>,
    pub on_download_complete: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_stats_updated: Option<Box<dyn Fn(&DownloadStats) + Send + Sync>>,
}

/// State shared by the manager's tasks
struct Core {
    torrent: Arc<TorrentInfo>,
    config: DownloadConfig,
    pool: PeerPool,
    scheduler: StdMutex<PieceScheduler>,
    storage: FileStorage,
    hooks: DownloadHooks,
    state: StdMutex<DownloadState>,
    failure: StdMutex<Option<TorrentError>>,
    done_tx: watch::Sender<bool>,
    started_at: Instant,
}

/// Coordinates one complete download
pub struct DownloadManager {
    core: Arc<Core>,
    peer_id: [u8; 20],
    shutdown_tx: watch::Sender<bool>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    done_rx: watch::Receiver<bool>,
}

impl DownloadManager {
    /// Initialize storage and build the manager
    ///
    /// Fails when the output files cannot be created; that is fatal before
    /// anything else happens.
    pub async fn new(
        torrent: TorrentInfo,
        config: DownloadConfig,
        hooks: DownloadHooks,
    ) -> Result<Self> {
        let torrent = Arc::new(torrent);
        let peer_id = generate_peer_id();

        let storage = FileStorage::new(torrent.clone(), &config.download_path).await?;
        let scheduler = PieceScheduler::new(
            &torrent,
            config.strategy,
            config.max_concurrent,
            config.piece_timeout,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let pool = PeerPool::new(
            torrent.info_hash,
            peer_id,
            config.max_peers,
            events_tx,
            shutdown_rx,
        );

        let core = Arc::new(Core {
            torrent,
            config,
            pool,
            scheduler: StdMutex::new(scheduler),
            storage,
            hooks,
            state: StdMutex::new(DownloadState::Starting),
            failure: StdMutex::new(None),
            done_tx,
            started_at: Instant::now(),
        });

        Ok(Self {
            core,
            peer_id,
            shutdown_tx,
            events_rx: StdMutex::new(Some(events_rx)),
            done_rx,
        })
    }

    /// Spawn the event, tick, and stats loops
    pub fn start(&self) {
        let events_rx = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .expect("start called twice");

        *self.core.state.lock().unwrap() = DownloadState::Downloading;
        tokio::spawn(event_loop(
            self.core.clone(),
            events_rx,
            self.shutdown_tx.subscribe(),
        ));
        tokio::spawn(tick_loop(self.core.clone(), self.shutdown_tx.subscribe()));
        tokio::spawn(stats_loop(self.core.clone(), self.shutdown_tx.subscribe()));

        // A torrent with nothing to fetch is already done
        if self.core.scheduler.lock().unwrap().is_complete() {
            self.core.mark_complete();
        }
    }

    /// Spawn the tracker announce loop
    pub fn start_announcer(&self) {
        tokio::spawn(announce_loop(
            self.core.clone(),
            self.peer_id,
            self.shutdown_tx.subscribe(),
            self.done_rx.clone(),
        ));
    }

    /// Connect directly to known peer endpoints
    pub async fn add_peers(&self, peers: &[PeerEndpoint]) -> usize {
        let connected = self.core.pool.connect(peers).await;
        for addr in &connected {
            self.core.notify_peer_connected(*addr);
        }
        connected.len()
    }

    /// Request a graceful shutdown
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Block until the download completes, fails, or is cancelled
    pub async fn wait(&self) -> Result<()> {
        let mut done = self.done_rx.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *done.borrow_and_update() {
                return self.finish().await;
            }
            if *shutdown.borrow_and_update() {
                return self.cancel().await;
            }
            tokio::select! {
                _ = done.changed() => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Run the whole download: start tasks, announce, wait
    pub async fn run(&self) -> Result<()> {
        self.start();
        self.start_announcer();
        self.wait().await
    }

    /// Current statistics snapshot (speed not sampled here)
    pub fn stats(&self) -> DownloadStats {
        self.core.snapshot(0.0, 0)
    }

    async fn finish(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.core.pool.close_all().await;

        let failure = self.core.failure.lock().unwrap().clone();
        if let Some(err) = failure {
            let _ = self.core.storage.close().await;
            return Err(err.into());
        }

        self.core.storage.close().await?;
        info!(
            "download of '{}' finished in {:?}",
            self.core.torrent.name,
            self.core.started_at.elapsed()
        );
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        *self.core.state.lock().unwrap() = DownloadState::Stopped;
        self.core.pool.close_all().await;
        let _ = self.core.storage.close().await;
        Err(TorrentError::Cancelled.into())
    }
}

impl Core {
    /// Run one selection pass over the currently unchoked sessions
    async fn schedule_pass(&self) {
        let sessions = self.pool.unchoked_sessions().await;
        if sessions.is_empty() {
            return;
        }
        // Bitfields are snapshotted through session methods before taking
        // the scheduler lock.
        let views: Vec<(Arc<PeerSession>, Bitfield)> = sessions
            .into_iter()
            .map(|s| {
                let bitfield = s.bitfield();
                (s, bitfield)
            })
            .collect();

        let num_pieces = self.torrent.num_pieces();
        let requests = {
            let mut scheduler = self.scheduler.lock().unwrap();

            let mut availability: HashMap<u32, usize> = HashMap::new();
            for (_, bitfield) in &views {
                for index in 0..num_pieces {
                    if bitfield.has_piece(index) && !scheduler.is_downloaded(index as u32) {
                        *availability.entry(index as u32).or_insert(0) += 1;
                    }
                }
            }

            let now = Instant::now();
            let mut requests = Vec::new();
            for (session, bitfield) in &views {
                if let Some((index, begin, length)) =
                    scheduler.assign_piece(session.addr(), bitfield, &availability, now)
                {
                    requests.push((session.clone(), index, begin, length));
                }
            }
            requests
        };

        for (session, index, begin, length) in requests {
            if let Err(e) = session.request_block(index, begin, length).await {
                // The piece deadline reclaims the assignment
                debug!("first request for piece {} failed: {}", index, e);
            }
        }
    }

    /// Handle one session event
    async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Unchoked { addr } => {
                debug!("peer {} unchoked us", addr);
                self.schedule_pass().await;
            }
            SessionEvent::Choked { addr } => {
                // In-flight requests to this peer die on the piece deadline
                trace!("peer {} choked us", addr);
            }
            SessionEvent::Closed { addr } => {
                self.pool.remove(addr).await;
                self.scheduler
                    .lock()
                    .unwrap()
                    .expire_session(addr, Instant::now());
                self.notify_peer_disconnected(addr);
            }
            SessionEvent::Block { addr, index, begin, data } => {
                let outcome = self
                    .scheduler
                    .lock()
                    .unwrap()
                    .on_block(addr, index, begin, data);

                match outcome {
                    BlockOutcome::Ignored => {
                        trace!("ignored block for piece {} from {}", index, addr);
                    }
                    BlockOutcome::Progress { next: Some((begin, length)) } => {
                        if let Some(session) = self.pool.session(addr).await {
                            if let Err(e) = session.request_block(index, begin, length).await {
                                debug!("follow-up request for piece {} failed: {}", index, e);
                            }
                        }
                    }
                    BlockOutcome::Progress { next: None } => {}
                    BlockOutcome::Verified { data } => {
                        self.complete_piece(index, data).await;
                    }
                    BlockOutcome::Corrupt => {
                        warn!("peer {} sent a corrupt piece {}; dropping it", addr, index);
                        self.pool.remove(addr).await;
                    }
                }
            }
        }
    }

    /// Persist a verified piece and account for completion
    async fn complete_piece(&self, index: u32, data: Vec<u8>) {
        if let Err(e) = self.storage.write_piece(index, &data).await {
            error!("storage failure on piece {}: {}", index, e);
            self.fail(TorrentError::storage(format!(
                "failed to persist piece {}: {}",
                index, e
            )));
            return;
        }

        if let Some(hook) = &self.hooks.on_piece_completed {
            hook(index);
        }
        self.pool.broadcast_have(index).await;

        if self.scheduler.lock().unwrap().is_complete() {
            self.mark_complete();
        }
    }

    /// Flip to Complete exactly once
    fn mark_complete(&self) {
        *self.state.lock().unwrap() = DownloadState::Complete;
        if !self.done_tx.send_replace(true) {
            info!("all {} pieces verified", self.torrent.num_pieces());
            if let Some(hook) = &self.hooks.on_download_complete {
                hook();
            }
        }
    }

    /// Record a fatal error and stop the run
    fn fail(&self, err: TorrentError) {
        *self.failure.lock().unwrap() = Some(err);
        let _ = self.done_tx.send(true);
    }

    fn notify_peer_connected(&self, addr: SocketAddr) {
        debug!("peer connected: {}", addr);
        if let Some(hook) = &self.hooks.on_peer_connected {
            hook(addr);
        }
    }

    fn notify_peer_disconnected(&self, addr: SocketAddr) {
        debug!("peer disconnected: {}", addr);
        if let Some(hook) = &self.hooks.on_peer_disconnected {
            hook(addr);
        }
    }

    /// Build one statistics snapshot
    fn snapshot(&self, speed_bps: f64, active_peers: usize) -> DownloadStats {
        let (downloaded_bytes, pieces_completed, pieces_total, progress_fraction) = {
            let scheduler = self.scheduler.lock().unwrap();
            (
                scheduler.bytes_downloaded(),
                scheduler.completed_count(),
                scheduler.num_pieces(),
                scheduler.progress(),
            )
        };

        DownloadStats {
            downloaded_bytes,
            download_speed_bps: speed_bps,
            active_peers,
            pieces_completed,
            pieces_total,
            progress_fraction,
            time_remaining: DownloadStats::estimate_remaining(
                downloaded_bytes,
                self.torrent.total_length(),
                speed_bps,
            ),
            state: *self.state.lock().unwrap(),
        }
    }

    /// Announce parameters for the current progress
    fn announce_request(&self, peer_id: [u8; 20], event: Option<AnnounceEvent>) -> AnnounceRequest {
        let downloaded = self.scheduler.lock().unwrap().bytes_downloaded();
        let total = self.torrent.total_length();
        AnnounceRequest {
            info_hash: self.torrent.info_hash,
            peer_id,
            port: self.config.port,
            uploaded: 0,
            downloaded,
            left: total.saturating_sub(downloaded),
            event,
        }
    }
}

/// Dispatch session events until shutdown
async fn event_loop(
    core: Arc<Core>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => core.handle_event(event).await,
                    None => return,
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// 1 Hz scheduler tick: deadline sweep plus a selection pass
async fn tick_loop(core: Arc<Core>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        let expired = core
            .scheduler
            .lock()
            .unwrap()
            .expire_deadlines(Instant::now());
        for (index, addr) in expired {
            debug!("reclaimed piece {} from {}", index, addr);
        }
        core.schedule_pass().await;
    }
}

/// 1 Hz statistics sampling
async fn stats_loop(core: Arc<Core>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_bytes = 0u64;
    let mut last_time = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        let now = Instant::now();
        let bytes = core.scheduler.lock().unwrap().bytes_downloaded();
        let elapsed = now.duration_since(last_time).as_secs_f64();
        let speed = if elapsed > 0.0 {
            bytes.saturating_sub(last_bytes) as f64 / elapsed
        } else {
            0.0
        };
        last_bytes = bytes;
        last_time = now;

        let active_peers = core.pool.active_count().await;
        let stats = core.snapshot(speed, active_peers);
        if let Some(hook) = &core.hooks.on_stats_updated {
            hook(&stats);
        }
    }
}

/// Tracker announce loop with tier failover
///
/// Announces `started` first, then re-announces at the tracker-supplied
/// interval (never below the configured floor), feeding new candidates into
/// the pool. Ends with a courtesy `completed` or `stopped` announce.
async fn announce_loop(
    core: Arc<Core>,
    peer_id: [u8; 20],
    mut shutdown: watch::Receiver<bool>,
    mut done: watch::Receiver<bool>,
) {
    let client = match TrackerClient::new() {
        Ok(client) => client,
        Err(e) => {
            warn!("tracker client unavailable: {}", e);
            return;
        }
    };
    let urls = announce_urls(&core.torrent);
    let mut event = Some(AnnounceEvent::Started);

    loop {
        if *shutdown.borrow_and_update() || *done.borrow_and_update() {
            break;
        }

        let request = core.announce_request(peer_id, event);
        let mut interval = core.config.announce_floor;
        for url in &urls {
            match client.announce(url, &request).await {
                Ok(response) => {
                    debug!(
                        "tracker {} returned {} peers, interval {}s",
                        url,
                        response.peers.len(),
                        response.interval
                    );
                    interval = interval.max(Duration::from_secs(response.interval));
                    event = None;
                    let connected = core.pool.connect(&response.peers).await;
                    for addr in connected {
                        core.notify_peer_connected(addr);
                    }
                    break;
                }
                Err(e) => {
                    // Never fatal; the next tier or the next cycle retries
                    warn!("announce to {} failed: {}", url, e);
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
            _ = done.changed() => break,
        }
    }

    // Courtesy farewell; best effort only
    let farewell = if *done.borrow() {
        AnnounceEvent::Completed
    } else {
        AnnounceEvent::Stopped
    };
    let request = core.announce_request(peer_id, Some(farewell));
    for url in &urls {
        if client.announce(url, &request).await.is_ok() {
            break;
        }
    }
}

/// Primary announce URL followed by the backup tiers, deduplicated
fn announce_urls(torrent: &TorrentInfo) -> Vec<String> {
    let mut urls = vec![torrent.announce.clone()];
    for tier in &torrent.announce_list {
        for url in tier {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
    }
    urls
}
