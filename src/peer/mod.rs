//! Peer module
//!
//! One session per remote peer (reader task, keep-alive task, outbound
//! request path) and the pool that owns all active sessions.

pub mod pool;
pub mod session;

pub use pool::PeerPool;
pub use session::{PeerSession, SessionEvent};
