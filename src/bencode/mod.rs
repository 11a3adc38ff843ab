//! Bencode codec
//!
//! Implements the four bencode types with a canonical encoder and a strict
//! decoder. Canonical output matters: the SHA-1 of a re-encoded info
//! dictionary must reproduce the torrent's info hash byte for byte.

pub mod decode;
pub mod value;

pub use decode::{decode, decode_prefix, BencodeError};
pub use value::Value;
