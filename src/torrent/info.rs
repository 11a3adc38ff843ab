//! Torrent descriptor and piece/file geometry

use sha1::{Digest, Sha1};

/// A file entry in a multi-file torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// Path components relative to the torrent directory
    pub path: Vec<String>,
    /// File size in bytes
    pub length: u64,
}

/// The portion of a piece that lands inside one output file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    /// Index into the declared file order
    pub file_index: usize,
    /// Offset within that file where the overlap begins
    pub file_offset: u64,
    /// Number of overlapping bytes
    pub length: u64,
}

/// Immutable torrent descriptor
///
/// Built once by [`crate::torrent::TorrentParser`] and shared for the whole
/// run. `length` and `files` are mutually exclusive: single-file torrents
/// set `length`, multi-file torrents set `files` and treat `name` as the
/// directory name.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Primary tracker announce URL
    pub announce: String,
    /// Backup tracker tiers from `announce-list`
    pub announce_list: Vec<Vec<String>>,
    /// SHA-1 of the canonical bencoding of the info dictionary
    pub info_hash: [u8; 20],
    /// Size of each piece in bytes
    pub piece_length: u64,
    /// Per-piece SHA-1 hashes in piece order
    pub pieces: Vec<[u8; 20]>,
    /// Torrent name: output filename (single) or directory name (multi)
    pub name: String,
    /// Single-file payload size
    pub length: Option<u64>,
    /// Multi-file layout in declared order
    pub files: Option<Vec<TorrentFile>>,
}

impl TorrentInfo {
    /// Total payload size across all files
    pub fn total_length(&self) -> u64 {
        if let Some(length) = self.length {
            length
        } else if let Some(files) = &self.files {
            files.iter().map(|f| f.length).sum()
        } else {
            0
        }
    }

    /// Number of pieces
    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// Whether this torrent maps to a directory of files
    pub fn is_multi_file(&self) -> bool {
        self.files.is_some()
    }

    /// Size of piece `index` in bytes
    ///
    /// Every piece is `piece_length` except the last, which covers whatever
    /// remains of the total length.
    pub fn piece_size(&self, index: usize) -> u64 {
        let n = self.num_pieces();
        if n == 0 || index >= n {
            return 0;
        }
        if index < n - 1 {
            self.piece_length
        } else {
            self.total_length() - (n as u64 - 1) * self.piece_length
        }
    }

    /// Expected hash of piece `index`
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// The file ranges overlapped by piece `index`
    ///
    /// Treats the declared files as one concatenated byte stream; the piece
    /// occupies `[index * piece_length, index * piece_length + piece_size)`
    /// of that stream, and every file whose half-open range intersects it
    /// contributes a span.
    pub fn files_overlapping(&self, index: usize) -> Vec<FileSpan> {
        let piece_start = index as u64 * self.piece_length;
        let piece_end = piece_start + self.piece_size(index);
        if piece_start >= piece_end {
            return Vec::new();
        }

        let mut spans = Vec::new();
        let mut file_start = 0u64;
        for (file_index, length) in self.file_lengths().into_iter().enumerate() {
            let file_end = file_start + length;
            let overlap_start = piece_start.max(file_start);
            let overlap_end = piece_end.min(file_end);
            if overlap_start < overlap_end {
                spans.push(FileSpan {
                    file_index,
                    file_offset: overlap_start - file_start,
                    length: overlap_end - overlap_start,
                });
            }
            if file_start >= piece_end {
                break;
            }
            file_start = file_end;
        }
        spans
    }

    /// On-disk relative paths in declared file order
    ///
    /// Single-file: `[name]`. Multi-file: `[name, path components...]` per
    /// file, so all output lands under the torrent directory.
    pub fn file_paths(&self) -> Vec<Vec<String>> {
        match &self.files {
            Some(files) => files
                .iter()
                .map(|f| {
                    let mut path = Vec::with_capacity(f.path.len() + 1);
                    path.push(self.name.clone());
                    path.extend(f.path.iter().cloned());
                    path
                })
                .collect(),
            None => vec![vec![self.name.clone()]],
        }
    }

    /// Declared file lengths in order (the single file counts as one entry)
    pub fn file_lengths(&self) -> Vec<u64> {
        match &self.files {
            Some(files) => files.iter().map(|f| f.length).collect(),
            None => vec![self.length.unwrap_or(0)],
        }
    }

    /// Info hash rendered as lowercase hex
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// SHA-1 of the canonical info dictionary bytes
    pub fn compute_info_hash(info_bytes: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        hasher.finalize().into()
    }
}
