//! Peer ID generation

/// Generate a fresh peer ID
///
/// Azureus-style convention: the 8-byte client prefix `-GT0001-` followed by
/// 12 random bytes.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[..8].copy_from_slice(b"-GT0001-");
    peer_id[8..].copy_from_slice(&rand::random::<[u8; 12]>());
    peer_id
}
