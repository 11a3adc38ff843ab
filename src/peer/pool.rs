//! Peer pool
//!
//! Owns every active session, capped at `max_peers`. Connection attempts
//! walk the candidate list sequentially with a short pause so a fresh
//! tracker response does not turn into a SYN flood.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::peer::session::{PeerSession, SessionEvent};
use crate::tracker::PeerEndpoint;

/// Pause between consecutive connection attempts
const CONNECT_PAUSE: Duration = Duration::from_millis(100);

/// The set of active peer sessions
pub struct PeerPool {
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
    max_peers: usize,
    sessions: Mutex<HashMap<SocketAddr, Arc<PeerSession>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown: watch::Receiver<bool>,
}

impl PeerPool {
    /// Create an empty pool
    pub fn new(
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        max_peers: usize,
        events: mpsc::UnboundedSender<SessionEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            info_hash,
            our_peer_id,
            max_peers,
            sessions: Mutex::new(HashMap::new()),
            events,
            shutdown,
        }
    }

    /// Try to connect to each candidate, newest sessions first served
    ///
    /// Skips addresses already in the pool, stops at the connection budget,
    /// and returns the addresses that completed a handshake.
    pub async fn connect(&self, candidates: &[PeerEndpoint]) -> Vec<SocketAddr> {
        let mut connected = Vec::new();

        for (i, candidate) in candidates.iter().enumerate() {
            let addr = candidate.addr();
            {
                let sessions = self.sessions.lock().await;
                if sessions.len() >= self.max_peers {
                    debug!("connection budget reached ({} peers)", sessions.len());
                    break;
                }
                if sessions.contains_key(&addr) {
                    continue;
                }
            }

            if i > 0 {
                tokio::time::sleep(CONNECT_PAUSE).await;
            }
            if *self.shutdown.borrow() {
                break;
            }

            match PeerSession::connect(
                addr,
                self.info_hash,
                self.our_peer_id,
                self.events.clone(),
                self.shutdown.clone(),
            )
            .await
            {
                Ok(session) => {
                    self.sessions.lock().await.insert(addr, session);
                    connected.push(addr);
                }
                Err(e) => {
                    debug!("failed to connect to {}: {}", addr, e);
                }
            }
        }

        if !connected.is_empty() {
            info!("connected to {} new peers", connected.len());
        }
        connected
    }

    /// Look up a session by address
    pub async fn session(&self, addr: SocketAddr) -> Option<Arc<PeerSession>> {
        self.sessions.lock().await.get(&addr).cloned()
    }

    /// Sessions that are live and not choking us
    pub async fn unchoked_sessions(&self) -> Vec<Arc<PeerSession>> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| !s.is_closed() && !s.peer_choking())
            .cloned()
            .collect()
    }

    /// Number of live sessions
    pub async fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| !s.is_closed())
            .count()
    }

    /// Send a HAVE for `index` to every live session
    pub async fn broadcast_have(&self, index: u32) {
        let sessions: Vec<Arc<PeerSession>> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| !s.is_closed())
            .cloned()
            .collect();

        for session in sessions {
            if let Err(e) = session.send_have(index).await {
                warn!("failed to send have({}) to {}: {}", index, session.addr(), e);
            }
        }
    }

    /// Close and evict one session; true when it was present
    pub async fn remove(&self, addr: SocketAddr) -> bool {
        let session = self.sessions.lock().await.remove(&addr);
        match session {
            Some(session) => {
                session.close().await;
                debug!("removed peer {}", addr);
                true
            }
            None => false,
        }
    }

    /// Close every session
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<PeerSession>> =
            self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{wire, Handshake};
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const INFO_HASH: [u8; 20] = [0x77; 20];

    /// Minimal remote that completes handshakes and then idles
    async fn spawn_mock_peer() -> PeerEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let _ = wire::read_handshake(&mut stream).await;
                    let ours = Handshake::new(INFO_HASH, [0x55; 20]);
                    let _ = wire::write_handshake(&mut stream, &ours).await;
                    // Hold the socket open, consuming whatever arrives
                    let mut sink = vec![0u8; 1024];
                    loop {
                        match tokio::io::AsyncReadExt::read(&mut stream, &mut sink).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }
                    }
                });
            }
        });
        PeerEndpoint {
            ip: Ipv4Addr::LOCALHOST,
            port: addr.port(),
            peer_id: None,
        }
    }

    fn pool(max_peers: usize) -> (PeerPool, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        std::mem::forget(shutdown_tx);
        (
            PeerPool::new(INFO_HASH, [0x01; 20], max_peers, events_tx, shutdown_rx),
            events_rx,
        )
    }

    #[tokio::test]
    async fn test_connect_and_count() {
        let (pool, _events) = pool(10);
        let a = spawn_mock_peer().await;
        let b = spawn_mock_peer().await;

        let connected = pool.connect(&[a, b]).await;
        assert_eq!(connected.len(), 2);
        assert_eq!(pool.active_count().await, 2);
    }

    #[tokio::test]
    async fn test_connect_skips_existing() {
        let (pool, _events) = pool(10);
        let a = spawn_mock_peer().await;

        assert_eq!(pool.connect(&[a]).await.len(), 1);
        assert_eq!(pool.connect(&[a]).await.len(), 0);
        assert_eq!(pool.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_connect_respects_budget() {
        let (pool, _events) = pool(1);
        let a = spawn_mock_peer().await;
        let b = spawn_mock_peer().await;

        let connected = pool.connect(&[a, b]).await;
        assert_eq!(connected.len(), 1);
        assert_eq!(pool.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_connect_survives_dead_candidate() {
        let (pool, _events) = pool(10);
        // A port nothing listens on: bind then drop to reserve an address
        let dead = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            drop(listener);
            PeerEndpoint { ip: Ipv4Addr::LOCALHOST, port, peer_id: None }
        };
        let live = spawn_mock_peer().await;

        let connected = pool.connect(&[dead, live]).await;
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0], live.addr());
    }

    #[tokio::test]
    async fn test_remove() {
        let (pool, _events) = pool(10);
        let a = spawn_mock_peer().await;
        pool.connect(&[a]).await;

        assert!(pool.remove(a.addr()).await);
        assert!(!pool.remove(a.addr()).await);
        assert_eq!(pool.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_unchoked_sessions_initially_empty() {
        let (pool, _events) = pool(10);
        let a = spawn_mock_peer().await;
        pool.connect(&[a]).await;

        // Fresh sessions start choked
        assert!(pool.unchoked_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_all() {
        let (pool, _events) = pool(10);
        let a = spawn_mock_peer().await;
        let b = spawn_mock_peer().await;
        pool.connect(&[a, b]).await;

        pool.close_all().await;
        assert_eq!(pool.active_count().await, 0);
    }
}
