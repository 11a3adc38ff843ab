//! Torrent file parser
//!
//! Decodes the bencode document, extracts the descriptor fields, validates
//! the piece geometry, and computes the info hash by canonically re-encoding
//! the info dictionary.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, info};

use crate::bencode::{self, Value};
use crate::error::TorrentError;
use crate::torrent::info::{TorrentFile, TorrentInfo};

/// Parser for .torrent files
pub struct TorrentParser;

type Dict = BTreeMap<Vec<u8>, Value>;

impl TorrentParser {
    /// Parse a .torrent file from a path
    pub fn parse_file(path: &Path) -> Result<TorrentInfo> {
        info!("loading torrent file: {}", path.display());
        let data = std::fs::read(path).map_err(|e| {
            TorrentError::storage_with_path(
                format!("failed to read torrent file: {}", e),
                path.display().to_string(),
            )
        })?;
        Self::parse_bytes(&data)
    }

    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<TorrentInfo> {
        debug!("parsing torrent descriptor from {} bytes", data.len());
        let root = bencode::decode(data).map_err(TorrentError::from)?;
        Self::parse_value(&root)
    }

    /// Build a descriptor from a decoded bencode document
    pub fn parse_value(root: &Value) -> Result<TorrentInfo> {
        let dict = root
            .as_dict()
            .ok_or_else(|| TorrentError::descriptor("torrent root is not a dictionary"))?;

        let announce = require_str(dict, b"announce")?.to_string();
        let announce_list = parse_announce_list(dict)?;

        let info_value = dict
            .get(b"info".as_slice())
            .ok_or_else(|| TorrentError::descriptor("missing info dictionary"))?;
        let info_dict = info_value
            .as_dict()
            .ok_or_else(|| TorrentError::descriptor("info is not a dictionary"))?;

        // The info hash is the SHA-1 of the canonical re-encoding of the
        // info value, which equals the original file bytes for canonically
        // encoded torrents.
        let info_hash = TorrentInfo::compute_info_hash(&info_value.encode());

        let name = require_str(info_dict, b"name")?.to_string();
        let piece_length = require_int(info_dict, b"piece length")?;
        if piece_length <= 0 {
            return Err(TorrentError::descriptor("piece length must be positive").into());
        }
        let piece_length = piece_length as u64;

        let pieces_bytes = info_dict
            .get(b"pieces".as_slice())
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| TorrentError::descriptor("missing pieces string"))?;
        let pieces = parse_piece_hashes(pieces_bytes)?;

        let (length, files) = parse_layout(info_dict)?;

        let torrent = TorrentInfo {
            announce,
            announce_list,
            info_hash,
            piece_length,
            pieces,
            name,
            length,
            files,
        };
        validate_geometry(&torrent)?;

        info!(
            "parsed torrent '{}': {} bytes, {} pieces, info hash {}",
            torrent.name,
            torrent.total_length(),
            torrent.num_pieces(),
            torrent.info_hash_hex()
        );
        Ok(torrent)
    }
}

fn require_str<'a>(dict: &'a Dict, key: &[u8]) -> Result<&'a str> {
    dict.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            TorrentError::descriptor(format!(
                "missing or invalid field '{}'",
                String::from_utf8_lossy(key)
            ))
            .into()
        })
}

fn require_int(dict: &Dict, key: &[u8]) -> Result<i64> {
    dict.get(key)
        .and_then(|v| v.as_int())
        .ok_or_else(|| {
            TorrentError::descriptor(format!(
                "missing or invalid field '{}'",
                String::from_utf8_lossy(key)
            ))
            .into()
        })
}

fn parse_announce_list(dict: &Dict) -> Result<Vec<Vec<String>>> {
    let Some(value) = dict.get(b"announce-list".as_slice()) else {
        return Ok(Vec::new());
    };
    let tiers = value
        .as_list()
        .ok_or_else(|| TorrentError::descriptor("announce-list is not a list"))?;

    let mut out = Vec::with_capacity(tiers.len());
    for tier in tiers {
        let urls = tier
            .as_list()
            .ok_or_else(|| TorrentError::descriptor("announce-list tier is not a list"))?;
        let mut tier_urls = Vec::with_capacity(urls.len());
        for url in urls {
            let url = url
                .as_str()
                .ok_or_else(|| TorrentError::descriptor("tracker url is not a string"))?;
            tier_urls.push(url.to_string());
        }
        out.push(tier_urls);
    }
    Ok(out)
}

fn parse_piece_hashes(pieces: &[u8]) -> Result<Vec<[u8; 20]>> {
    if pieces.len() % 20 != 0 {
        return Err(TorrentError::descriptor(format!(
            "pieces string length {} is not a multiple of 20",
            pieces.len()
        ))
        .into());
    }
    Ok(pieces
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn parse_layout(info_dict: &Dict) -> Result<(Option<u64>, Option<Vec<TorrentFile>>)> {
    if let Some(length) = info_dict.get(b"length".as_slice()) {
        let length = length
            .as_int()
            .filter(|l| *l >= 0)
            .ok_or_else(|| TorrentError::descriptor("length is not a valid integer"))?;
        return Ok((Some(length as u64), None));
    }

    let files = info_dict
        .get(b"files".as_slice())
        .and_then(|v| v.as_list())
        .ok_or_else(|| TorrentError::descriptor("info has neither length nor files"))?;

    let mut out = Vec::with_capacity(files.len());
    for entry in files {
        let file_dict = entry
            .as_dict()
            .ok_or_else(|| TorrentError::descriptor("file entry is not a dictionary"))?;

        let length = file_dict
            .get(b"length".as_slice())
            .and_then(|v| v.as_int())
            .filter(|l| *l >= 0)
            .ok_or_else(|| TorrentError::descriptor("file entry missing length"))?;

        let path_list = file_dict
            .get(b"path".as_slice())
            .and_then(|v| v.as_list())
            .ok_or_else(|| TorrentError::descriptor("file entry missing path"))?;
        if path_list.is_empty() {
            return Err(TorrentError::descriptor("file entry has empty path").into());
        }

        let mut path = Vec::with_capacity(path_list.len());
        for component in path_list {
            let component = component
                .as_str()
                .ok_or_else(|| TorrentError::descriptor("path component is not a string"))?;
            path.push(component.to_string());
        }

        out.push(TorrentFile {
            length: length as u64,
            path,
        });
    }
    Ok((None, Some(out)))
}

/// Check that the declared hash count matches the payload geometry
///
/// `|pieces| * piece_length >= total > (|pieces| - 1) * piece_length` must
/// hold, i.e. the number of declared hashes equals the number of pieces the
/// total length actually needs.
fn validate_geometry(torrent: &TorrentInfo) -> Result<()> {
    let total = torrent.total_length();
    let expected = (total as u128).div_ceil(torrent.piece_length as u128) as usize;
    if torrent.num_pieces() != expected {
        return Err(TorrentError::descriptor(format!(
            "declared {} piece hashes but {} bytes at piece length {} require {}",
            torrent.num_pieces(),
            total,
            torrent.piece_length,
            expected
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pieces_value(n: usize) -> Vec<u8> {
        (0..n).flat_map(|i| [i as u8; 20]).collect()
    }

    fn single_file_torrent(total: u64, piece_length: u64, num_hashes: usize) -> Vec<u8> {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Value::Integer(total as i64));
        info.insert(b"name".to_vec(), Value::from("test.bin"));
        info.insert(b"piece length".to_vec(), Value::Integer(piece_length as i64));
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces_value(num_hashes)));

        let mut root = BTreeMap::new();
        root.insert(
            b"announce".to_vec(),
            Value::from("http://tracker.example.com/announce"),
        );
        root.insert(b"info".to_vec(), Value::Dict(info));
        Value::Dict(root).encode()
    }

    fn multi_file_torrent(files: &[(u64, &[&str])], piece_length: u64, num_hashes: usize) -> Vec<u8> {
        let entries: Vec<Value> = files
            .iter()
            .map(|(length, path)| {
                let mut d = BTreeMap::new();
                d.insert(b"length".to_vec(), Value::Integer(*length as i64));
                d.insert(
                    b"path".to_vec(),
                    Value::List(path.iter().map(|c| Value::from(*c)).collect()),
                );
                Value::Dict(d)
            })
            .collect();

        let mut info = BTreeMap::new();
        info.insert(b"files".to_vec(), Value::List(entries));
        info.insert(b"name".to_vec(), Value::from("test_dir"));
        info.insert(b"piece length".to_vec(), Value::Integer(piece_length as i64));
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces_value(num_hashes)));

        let mut root = BTreeMap::new();
        root.insert(
            b"announce".to_vec(),
            Value::from("http://tracker.example.com/announce"),
        );
        root.insert(b"info".to_vec(), Value::Dict(info));
        Value::Dict(root).encode()
    }

    #[test]
    fn test_parse_single_file() {
        // Three full 16 KiB pieces: 60-byte pieces string yields n=3
        let data = single_file_torrent(49152, 16384, 3);
        let torrent = TorrentParser::parse_bytes(&data).unwrap();

        assert_eq!(torrent.name, "test.bin");
        assert_eq!(torrent.total_length(), 49152);
        assert_eq!(torrent.num_pieces(), 3);
        assert_eq!(torrent.piece_size(0), 16384);
        assert_eq!(torrent.piece_size(1), 16384);
        assert_eq!(torrent.piece_size(2), 16384);
        assert!(!torrent.is_multi_file());
    }

    #[test]
    fn test_parse_multi_file() {
        let data = multi_file_torrent(
            &[(10000, &["file1.txt"]), (20000, &["subdir", "file2.txt"])],
            16384,
            2,
        );
        let torrent = TorrentParser::parse_bytes(&data).unwrap();

        assert_eq!(torrent.name, "test_dir");
        assert_eq!(torrent.total_length(), 30000);
        assert_eq!(torrent.num_pieces(), 2);
        assert_eq!(torrent.piece_size(1), 30000 - 16384);
        let files = torrent.files.as_ref().unwrap();
        assert_eq!(files[1].path, vec!["subdir", "file2.txt"]);
    }

    #[test]
    fn test_inconsistent_piece_count_rejected() {
        // 30000 bytes at 16384 needs 2 pieces; declaring 3 hashes is invalid
        let data = multi_file_torrent(
            &[(10000, &["file1.txt"]), (20000, &["subdir", "file2.txt"])],
            16384,
            3,
        );
        let err = TorrentParser::parse_bytes(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::DescriptorInvalid { .. })
        ));
    }

    #[test]
    fn test_missing_announce_rejected() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Value::Integer(16384));
        info.insert(b"name".to_vec(), Value::from("x"));
        info.insert(b"piece length".to_vec(), Value::Integer(16384));
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces_value(1)));
        let mut root = BTreeMap::new();
        root.insert(b"info".to_vec(), Value::Dict(info));
        let data = Value::Dict(root).encode();

        let err = TorrentParser::parse_bytes(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::DescriptorInvalid { .. })
        ));
    }

    #[test]
    fn test_ragged_pieces_string_rejected() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Value::Integer(16384));
        info.insert(b"name".to_vec(), Value::from("x"));
        info.insert(b"piece length".to_vec(), Value::Integer(16384));
        info.insert(b"pieces".to_vec(), Value::Bytes(vec![0u8; 21]));
        let mut root = BTreeMap::new();
        root.insert(b"announce".to_vec(), Value::from("http://t/a"));
        root.insert(b"info".to_vec(), Value::Dict(info));
        let data = Value::Dict(root).encode();

        assert!(TorrentParser::parse_bytes(&data).is_err());
    }

    #[test]
    fn test_announce_list_tiers() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Value::Integer(16384));
        info.insert(b"name".to_vec(), Value::from("x"));
        info.insert(b"piece length".to_vec(), Value::Integer(16384));
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces_value(1)));
        let mut root = BTreeMap::new();
        root.insert(b"announce".to_vec(), Value::from("http://t1/a"));
        root.insert(
            b"announce-list".to_vec(),
            Value::List(vec![
                Value::List(vec![Value::from("http://t1/a")]),
                Value::List(vec![Value::from("http://t2/a"), Value::from("http://t3/a")]),
            ]),
        );
        root.insert(b"info".to_vec(), Value::Dict(info));
        let data = Value::Dict(root).encode();

        let torrent = TorrentParser::parse_bytes(&data).unwrap();
        assert_eq!(torrent.announce, "http://t1/a");
        assert_eq!(torrent.announce_list.len(), 2);
        assert_eq!(torrent.announce_list[1], vec!["http://t2/a", "http://t3/a"]);
    }

    #[test]
    fn test_info_hash_matches_manual_encoding() {
        let data = single_file_torrent(16384, 16384, 1);
        let torrent = TorrentParser::parse_bytes(&data).unwrap();

        // The info hash must equal SHA-1 over the info value's bytes as they
        // appear in the canonical document.
        let root = crate::bencode::decode(&data).unwrap();
        let info_bytes = root.as_dict().unwrap()[b"info".as_slice()].encode();
        assert_eq!(torrent.info_hash, TorrentInfo::compute_info_hash(&info_bytes));
    }

    #[test]
    fn test_info_hash_stable_across_parses() {
        let data = single_file_torrent(49152, 16384, 3);
        let first = TorrentParser::parse_bytes(&data).unwrap();
        let second = TorrentParser::parse_bytes(&data).unwrap();
        assert_eq!(first.info_hash, second.info_hash);
    }

    #[test]
    fn test_not_a_dictionary() {
        let err = TorrentParser::parse_bytes(b"i42e").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::DescriptorInvalid { .. })
        ));
    }

    #[test]
    fn test_garbage_is_bencode_error() {
        let err = TorrentParser::parse_bytes(b"not bencode").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TorrentError>(),
            Some(TorrentError::BencodeFormat { .. })
        ));
    }
}
