//! Peer session
//!
//! Owns one TCP connection through its whole life: connect, handshake,
//! ACTIVE message exchange, close. Incoming traffic is surfaced to the
//! scheduler as [`SessionEvent`]s over a channel that is wired up before
//! the read loop starts, so no early message can be lost.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::Result;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::TorrentError;
use crate::protocol::{wire, Bitfield, Handshake, Message};

/// TCP connect deadline
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Handshake exchange deadline
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// A peer silent for this long is considered dead
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(180);
/// Per-write deadline
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);
/// Keep-alive send period
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// What a session reports back to the scheduler
#[derive(Debug)]
pub enum SessionEvent {
    /// The peer unchoked us; requests may now succeed
    Unchoked { addr: SocketAddr },
    /// The peer choked us
    Choked { addr: SocketAddr },
    /// A block arrived
    Block {
        addr: SocketAddr,
        index: u32,
        begin: u32,
        data: Vec<u8>,
    },
    /// The session is gone; emitted exactly once per session
    Closed { addr: SocketAddr },
}

#[derive(Debug)]
struct SessionFlags {
    am_choking: bool,
    am_interested: bool,
    peer_choking: bool,
    peer_interested: bool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// An active connection to one peer
#[derive(Debug)]
pub struct PeerSession {
    addr: SocketAddr,
    remote_peer_id: [u8; 20],
    writer: Mutex<OwnedWriteHalf>,
    flags: StdMutex<SessionFlags>,
    bitfield: StdMutex<Bitfield>,
    closed: AtomicBool,
    close_signal: Notify,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl PeerSession {
    /// Connect, handshake, and enter the ACTIVE state
    ///
    /// On success the session has sent `interested`, spawned its read loop
    /// and keep-alive timer, and will deliver events on `events`.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        events: mpsc::UnboundedSender<SessionEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>> {
        debug!("connecting to peer {}", addr);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| TorrentError::timeout(format!("connect to {}", addr)))?
            .map_err(|e| {
                TorrentError::connection_with_peer(
                    format!("connect failed: {}", e),
                    addr.to_string(),
                )
            })?;

        let remote = timeout(HANDSHAKE_TIMEOUT, handshake(stream, info_hash, our_peer_id))
            .await
            .map_err(|_| TorrentError::timeout(format!("handshake with {}", addr)))??;
        let (stream, remote_peer_id) = remote;

        let (read_half, write_half) = stream.into_split();
        let session = Arc::new(Self {
            addr,
            remote_peer_id,
            writer: Mutex::new(write_half),
            flags: StdMutex::new(SessionFlags::default()),
            bitfield: StdMutex::new(Bitfield::default()),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            events,
        });

        // Entry actions for ACTIVE: announce interest once, then start the
        // read loop and keep-alive timer.
        session.send(&Message::Interested).await?;
        session.flags.lock().unwrap().am_interested = true;

        tokio::spawn(read_loop(session.clone(), read_half, shutdown.clone()));
        tokio::spawn(keepalive_loop(session.clone(), shutdown));

        info!("peer {} active", addr);
        Ok(session)
    }

    /// Remote socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Peer ID the remote presented in its handshake
    pub fn remote_peer_id(&self) -> [u8; 20] {
        self.remote_peer_id
    }

    /// Whether the peer is currently choking us
    pub fn peer_choking(&self) -> bool {
        self.flags.lock().unwrap().peer_choking
    }

    /// Whether the peer has announced interest in our pieces
    pub fn peer_interested(&self) -> bool {
        self.flags.lock().unwrap().peer_interested
    }

    /// Snapshot of the remote bitfield
    pub fn bitfield(&self) -> Bitfield {
        self.bitfield.lock().unwrap().clone()
    }

    /// Whether the peer claims to have a piece
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.lock().unwrap().has_piece(index as usize)
    }

    /// Whether the session has closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Request one block from the peer
    ///
    /// Fails without touching the socket when the peer is choking us or its
    /// bitfield lacks the piece.
    pub async fn request_block(&self, index: u32, begin: u32, length: u32) -> Result<()> {
        if self.peer_choking() {
            return Err(TorrentError::protocol_with_peer(
                format!("cannot request piece {}: peer is choking us", index),
                self.addr.to_string(),
            )
            .into());
        }
        if !self.has_piece(index) {
            return Err(TorrentError::protocol_with_peer(
                format!("cannot request piece {}: peer does not have it", index),
                self.addr.to_string(),
            )
            .into());
        }

        trace!(
            "requesting piece {} block at {} ({} bytes) from {}",
            index,
            begin,
            length,
            self.addr
        );
        self.send(&Message::Request { index, begin, length }).await
    }

    /// Announce a completed piece to this peer
    pub async fn send_have(&self, index: u32) -> Result<()> {
        self.send(&Message::Have { index }).await
    }

    /// Write one message with the write deadline applied
    async fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(TorrentError::connection_with_peer(
                "session is closed",
                self.addr.to_string(),
            )
            .into());
        }

        let mut writer = self.writer.lock().await;
        let result = timeout(WRITE_TIMEOUT, wire::write_message(&mut *writer, message)).await;
        drop(writer);

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.mark_closed();
                Err(TorrentError::connection_with_peer(
                    format!("write failed: {}", e),
                    self.addr.to_string(),
                )
                .into())
            }
            Err(_) => {
                self.mark_closed();
                Err(TorrentError::timeout(format!("write to {}", self.addr)).into())
            }
        }
    }

    /// Tear the session down
    pub async fn close(&self) {
        if !self.is_closed() {
            debug!("closing session to {}", self.addr);
        }
        self.mark_closed();
        let mut writer = self.writer.lock().await;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut *writer).await;
    }

    /// Flip to CLOSED and emit the Closed event exactly once
    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.notify_waiters();
            let _ = self.events.send(SessionEvent::Closed { addr: self.addr });
        }
    }
}

/// Exchange handshakes as the initiator and validate the response
async fn handshake(
    mut stream: TcpStream,
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
) -> Result<(TcpStream, [u8; 20])> {
    let addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let ours = Handshake::new(info_hash, our_peer_id);
    wire::write_handshake(&mut stream, &ours).await?;
    let theirs = wire::read_handshake(&mut stream).await?;

    if !theirs.matches(&info_hash) {
        return Err(TorrentError::handshake(
            format!(
                "info hash mismatch: expected {}, got {}",
                hex::encode(info_hash),
                hex::encode(theirs.info_hash)
            ),
            addr,
        )
        .into());
    }

    Ok((stream, theirs.peer_id))
}

/// Read loop: one task per session, runs until error, idle timeout, close,
/// or shutdown
async fn read_loop(
    session: Arc<PeerSession>,
    mut reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    // The bitfield message is only legal as the very first message.
    let mut first_message = true;

    loop {
        if session.is_closed() {
            break;
        }
        let message = tokio::select! {
            result = timeout(READ_IDLE_TIMEOUT, wire::read_message(&mut reader)) => {
                match result {
                    Ok(Ok(message)) => message,
                    Ok(Err(e)) => {
                        debug!("read from {} failed: {}", session.addr, e);
                        break;
                    }
                    Err(_) => {
                        debug!("peer {} idle for {:?}, closing", session.addr, READ_IDLE_TIMEOUT);
                        break;
                    }
                }
            }
            _ = session.close_signal.notified() => break,
            _ = shutdown.changed() => break,
        };

        if session.is_closed() {
            break;
        }
        if let Err(e) = dispatch(&session, message, first_message) {
            warn!("dropping peer {}: {}", session.addr, e);
            break;
        }
        first_message = false;
    }

    session.mark_closed();
}

/// Handle one incoming message
fn dispatch(session: &Arc<PeerSession>, message: Message, first_message: bool) -> Result<()> {
    match message {
        Message::KeepAlive => {}
        Message::Choke => {
            session.flags.lock().unwrap().peer_choking = true;
            trace!("peer {} choked us", session.addr);
            let _ = session.events.send(SessionEvent::Choked { addr: session.addr });
        }
        Message::Unchoke => {
            session.flags.lock().unwrap().peer_choking = false;
            debug!("peer {} unchoked us", session.addr);
            let _ = session.events.send(SessionEvent::Unchoked { addr: session.addr });
        }
        Message::Interested => {
            session.flags.lock().unwrap().peer_interested = true;
        }
        Message::NotInterested => {
            session.flags.lock().unwrap().peer_interested = false;
        }
        Message::Have { index } => {
            session.bitfield.lock().unwrap().set_piece(index as usize);
        }
        Message::Bitfield { bitfield } => {
            if !first_message {
                return Err(TorrentError::protocol_with_peer(
                    "bitfield after first message",
                    session.addr.to_string(),
                )
                .into());
            }
            debug!(
                "peer {} has {} pieces",
                session.addr,
                bitfield.count_pieces()
            );
            *session.bitfield.lock().unwrap() = bitfield;
        }
        Message::Piece { index, begin, block } => {
            let _ = session.events.send(SessionEvent::Block {
                addr: session.addr,
                index,
                begin,
                data: block,
            });
        }
        Message::Request { index, .. } => {
            // We do not seed; requests are acknowledged by being dropped.
            trace!("ignoring request for piece {} from {}", index, session.addr);
        }
        Message::Cancel { .. } => {
            trace!("ignoring cancel from {}", session.addr);
        }
        Message::Unknown { id } => {
            debug!("skipping unknown message id {} from {}", id, session.addr);
        }
    }
    Ok(())
}

/// Keep-alive loop: a zero-length frame every two minutes
async fn keepalive_loop(session: Arc<PeerSession>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = session.close_signal.notified() => return,
            _ = shutdown.changed() => return,
        }
        if session.is_closed() {
            return;
        }
        if let Err(e) = session.send(&Message::KeepAlive).await {
            debug!("keep-alive to {} failed: {}", session.addr, e);
            return;
        }
        trace!("sent keep-alive to {}", session.addr);
    }
}
