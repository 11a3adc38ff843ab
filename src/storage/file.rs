//! Scatter file writer
//!
//! Pre-sizes the output files at startup and maps each verified piece onto
//! the file ranges it overlaps. One mutex serializes every public method
//! over the whole handle table.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::TorrentError;
use crate::torrent::TorrentInfo;

/// Writes verified pieces to their on-disk locations
pub struct FileStorage {
    torrent: Arc<TorrentInfo>,
    files: Mutex<Vec<File>>,
}

impl FileStorage {
    /// Create directories, open every output file, and pre-size it
    ///
    /// Files open read-write-create and are truncated to their declared
    /// length; the filesystem keeps them sparse where it can.
    pub async fn new(torrent: Arc<TorrentInfo>, base_path: &Path) -> Result<Self> {
        info!(
            "initializing storage for '{}' under {}",
            torrent.name,
            base_path.display()
        );

        let paths = torrent.file_paths();
        let lengths = torrent.file_lengths();
        let mut files = Vec::with_capacity(paths.len());

        for (components, length) in paths.iter().zip(lengths) {
            let path: PathBuf = base_path.join(components.iter().collect::<PathBuf>());

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    TorrentError::storage_with_path(
                        format!("failed to create directory: {}", e),
                        parent.display().to_string(),
                    )
                })?;
            }

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .await
                .map_err(|e| {
                    TorrentError::storage_with_path(
                        format!("failed to open file: {}", e),
                        path.display().to_string(),
                    )
                })?;
            file.set_len(length).await.map_err(|e| {
                TorrentError::storage_with_path(
                    format!("failed to pre-size file: {}", e),
                    path.display().to_string(),
                )
            })?;

            debug!("opened {} ({} bytes)", path.display(), length);
            files.push(file);
        }

        Ok(Self {
            torrent,
            files: Mutex::new(files),
        })
    }

    /// Write a verified piece to every file range it overlaps
    pub async fn write_piece(&self, index: u32, data: &[u8]) -> Result<()> {
        let mut files = self.files.lock().await;

        let mut written = 0usize;
        for span in self.torrent.files_overlapping(index as usize) {
            let file = files.get_mut(span.file_index).ok_or_else(|| {
                TorrentError::storage(format!("no open file at index {}", span.file_index))
            })?;

            let slice = &data[written..written + span.length as usize];
            file.seek(SeekFrom::Start(span.file_offset))
                .await
                .map_err(|e| TorrentError::storage(format!("seek failed: {}", e)))?;
            file.write_all(slice)
                .await
                .map_err(|e| TorrentError::storage(format!("write failed: {}", e)))?;
            written += span.length as usize;
        }

        if written != data.len() {
            return Err(TorrentError::storage(format!(
                "piece {} wrote {} of {} bytes",
                index,
                written,
                data.len()
            ))
            .into());
        }

        debug!("wrote piece {} ({} bytes)", index, data.len());
        Ok(())
    }

    /// Read a piece back from the output files
    pub async fn read_piece(&self, index: u32) -> Result<Vec<u8>> {
        let mut files = self.files.lock().await;
        let mut data = Vec::with_capacity(self.torrent.piece_size(index as usize) as usize);

        for span in self.torrent.files_overlapping(index as usize) {
            let file = files.get_mut(span.file_index).ok_or_else(|| {
                TorrentError::storage(format!("no open file at index {}", span.file_index))
            })?;

            let mut chunk = vec![0u8; span.length as usize];
            file.seek(SeekFrom::Start(span.file_offset))
                .await
                .map_err(|e| TorrentError::storage(format!("seek failed: {}", e)))?;
            file.read_exact(&mut chunk)
                .await
                .map_err(|e| TorrentError::storage(format!("read failed: {}", e)))?;
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Flush every file to disk
    pub async fn close(&self) -> Result<()> {
        let mut files = self.files.lock().await;
        for file in files.iter_mut() {
            file.flush()
                .await
                .map_err(|e| TorrentError::storage(format!("flush failed: {}", e)))?;
            file.sync_all()
                .await
                .map_err(|e| TorrentError::storage(format!("sync failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentFile;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "gtorrent-test-{}-{:08x}",
            tag,
            rand::random::<u32>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn single_torrent(total: u64, piece_length: u64) -> Arc<TorrentInfo> {
        let n = (total as usize).div_ceil(piece_length as usize);
        Arc::new(TorrentInfo {
            announce: String::new(),
            announce_list: Vec::new(),
            info_hash: [0u8; 20],
            piece_length,
            pieces: vec![[0u8; 20]; n],
            name: "out.bin".to_string(),
            length: Some(total),
            files: None,
        })
    }

    fn multi_torrent(piece_length: u64) -> Arc<TorrentInfo> {
        let total = 30000u64;
        let n = (total as usize).div_ceil(piece_length as usize);
        Arc::new(TorrentInfo {
            announce: String::new(),
            announce_list: Vec::new(),
            info_hash: [0u8; 20],
            piece_length,
            pieces: vec![[0u8; 20]; n],
            name: "test_dir".to_string(),
            length: None,
            files: Some(vec![
                TorrentFile { length: 10000, path: vec!["file1.txt".to_string()] },
                TorrentFile {
                    length: 20000,
                    path: vec!["subdir".to_string(), "file2.txt".to_string()],
                },
            ]),
        })
    }

    fn piece_bytes(torrent: &TorrentInfo, index: usize) -> Vec<u8> {
        (0..torrent.piece_size(index))
            .map(|i| (index as u64 * 31 + i) as u8)
            .collect()
    }

    #[tokio::test]
    async fn test_single_file_pre_sized() {
        let dir = temp_dir("presize");
        let torrent = single_torrent(30000, 16384);
        let storage = FileStorage::new(torrent, &dir).await.unwrap();
        storage.close().await.unwrap();

        let metadata = std::fs::metadata(dir.join("out.bin")).unwrap();
        assert_eq!(metadata.len(), 30000);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_single_file_scatter_write_law() {
        let dir = temp_dir("single");
        let torrent = single_torrent(30000, 16384);
        let storage = FileStorage::new(torrent.clone(), &dir).await.unwrap();

        let mut expected = Vec::new();
        // Write out of order; read-back must equal concatenation in order
        for index in [1usize, 0] {
            let data = piece_bytes(&torrent, index);
            storage.write_piece(index as u32, &data).await.unwrap();
        }
        for index in 0..torrent.num_pieces() {
            expected.extend(piece_bytes(&torrent, index));
        }
        storage.close().await.unwrap();

        let on_disk = std::fs::read(dir.join("out.bin")).unwrap();
        assert_eq!(on_disk, expected);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_multi_file_scatter_write_law() {
        let dir = temp_dir("multi");
        let torrent = multi_torrent(16384);
        let storage = FileStorage::new(torrent.clone(), &dir).await.unwrap();

        let mut expected = Vec::new();
        for index in 0..torrent.num_pieces() {
            let data = piece_bytes(&torrent, index);
            storage.write_piece(index as u32, &data).await.unwrap();
            expected.extend(data);
        }
        storage.close().await.unwrap();

        // Reading the declared files in order and concatenating reproduces
        // the piece stream truncated to total length
        let mut on_disk = std::fs::read(dir.join("test_dir/file1.txt")).unwrap();
        on_disk.extend(std::fs::read(dir.join("test_dir/subdir/file2.txt")).unwrap());
        assert_eq!(on_disk.len() as u64, torrent.total_length());
        assert_eq!(on_disk, expected);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_read_piece_round_trip() {
        let dir = temp_dir("readback");
        let torrent = multi_torrent(16384);
        let storage = FileStorage::new(torrent.clone(), &dir).await.unwrap();

        let data = piece_bytes(&torrent, 0);
        storage.write_piece(0, &data).await.unwrap();
        assert_eq!(storage.read_piece(0).await.unwrap(), data);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_intermediate_directories_created() {
        let dir = temp_dir("dirs");
        let torrent = multi_torrent(16384);
        let _storage = FileStorage::new(torrent, &dir).await.unwrap();

        assert!(dir.join("test_dir/subdir").is_dir());
        assert!(dir.join("test_dir/subdir/file2.txt").is_file());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
