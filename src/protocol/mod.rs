//! BitTorrent wire protocol module
//!
//! Handshake frame, length-prefixed messages, and the async framing used by
//! peer sessions.

pub mod handshake;
pub mod message;
pub mod wire;

pub use handshake::{Handshake, HANDSHAKE_LEN, PROTOCOL_STRING};
pub use message::{Bitfield, Message, MessageId};
pub use wire::{read_handshake, read_message, write_handshake, write_message};
