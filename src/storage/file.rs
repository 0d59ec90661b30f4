use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;

use crate::catalog::TorrentId;

use super::error::StorageError;
use super::sink::ChunkSink;

const FILE_HANDLE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct TorrentMeta {
    piece_length: u32,
    total_length: u64,
}

impl TorrentMeta {
    fn piece_count(&self) -> u32 {
        self.total_length.div_ceil(self.piece_length as u64) as u32
    }

    fn piece_len(&self, piece: u32) -> Result<u32, StorageError> {
        if piece >= self.piece_count() {
            return Err(StorageError::InvalidPieceIndex(piece));
        }
        let start = piece as u64 * self.piece_length as u64;
        Ok((self.total_length - start).min(self.piece_length as u64) as u32)
    }
}

struct SinkHandle {
    file: TokioMutex<File>,
    last_used: parking_lot::Mutex<Instant>,
}

/// Disk-backed chunk sink.
///
/// Stores each torrent as one flat data file (`<hex info hash>.dat`) under a
/// base directory, writing blocks sparsely at their absolute offsets. Open
/// handles are cached and evicted after idling.
pub struct FileSink {
    base_path: PathBuf,
    torrents: DashMap<TorrentId, TorrentMeta>,
    handles: DashMap<TorrentId, Arc<SinkHandle>>,
}

impl FileSink {
    /// Creates a sink rooted at `base_path`.
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            torrents: DashMap::new(),
            handles: DashMap::new(),
        }
    }

    /// Registers a torrent's layout so block offsets can be mapped to file
    /// positions. Re-registering keeps the existing layout.
    pub fn register(&self, torrent: TorrentId, piece_length: u32, total_length: u64) {
        self.torrents.entry(torrent).or_insert(TorrentMeta {
            piece_length,
            total_length,
        });
    }

    /// Forgets a torrent, flushing its data file in the background.
    pub fn unregister(&self, torrent: TorrentId) {
        self.torrents.remove(&torrent);
        if let Some((_, handle)) = self.handles.remove(&torrent) {
            tokio::spawn(async move {
                let file = handle.file.lock().await;
                let _ = file.sync_data().await;
            });
        }
    }

    fn meta(&self, torrent: TorrentId) -> Result<TorrentMeta, StorageError> {
        self.torrents
            .get(&torrent)
            .map(|m| *m)
            .ok_or(StorageError::TorrentNotFound(torrent))
    }

    fn data_path(&self, torrent: TorrentId) -> PathBuf {
        self.base_path.join(format!("{}.dat", torrent.to_hex()))
    }

    async fn get_or_open(&self, torrent: TorrentId) -> Result<Arc<SinkHandle>, StorageError> {
        if let Some(handle) = self.handles.get(&torrent) {
            *handle.last_used.lock() = Instant::now();
            return Ok(handle.clone());
        }

        let path = self.data_path(torrent);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        let handle = Arc::new(SinkHandle {
            file: TokioMutex::new(file),
            last_used: parking_lot::Mutex::new(Instant::now()),
        });
        self.handles.insert(torrent, handle.clone());
        Ok(handle)
    }

    /// Reads a whole piece back, for verification.
    pub async fn read_piece(&self, torrent: TorrentId, piece: u32) -> Result<Bytes, StorageError> {
        let meta = self.meta(torrent)?;
        let length = meta.piece_len(piece)? as usize;
        let start = piece as u64 * meta.piece_length as u64;

        let handle = self.get_or_open(torrent).await?;
        let mut file = handle.file.lock().await;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Flushes a torrent's data file to disk.
    pub async fn flush(&self, torrent: TorrentId) -> Result<(), StorageError> {
        let handle = match self.handles.get(&torrent) {
            Some(handle) => handle.clone(),
            None => return Ok(()),
        };
        let file = handle.file.lock().await;
        file.sync_data().await?;
        Ok(())
    }

    /// Closes handles that have been idle past the eviction timeout.
    pub async fn evict_idle_handles(&self) {
        let now = Instant::now();
        let to_evict: Vec<TorrentId> = self
            .handles
            .iter()
            .filter(|r| now.duration_since(*r.last_used.lock()) > FILE_HANDLE_IDLE_TIMEOUT)
            .map(|r| *r.key())
            .collect();

        for torrent in to_evict {
            if let Some((_, handle)) = self.handles.remove(&torrent) {
                let file = handle.file.lock().await;
                let _ = file.sync_data().await;
            }
        }
    }
}

#[async_trait]
impl ChunkSink for FileSink {
    async fn write_chunk(
        &self,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        data: Bytes,
    ) -> Result<(), StorageError> {
        let meta = self.meta(torrent)?;
        let piece_len = meta.piece_len(piece)?;
        if offset as u64 + data.len() as u64 > piece_len as u64 {
            return Err(StorageError::InvalidBlockOffset { piece, offset });
        }

        let start = piece as u64 * meta.piece_length as u64 + offset as u64;
        let handle = self.get_or_open(torrent).await?;
        let mut file = handle.file.lock().await;
        file.seek(SeekFrom::Start(start)).await?;
        file.write_all(&data).await?;
        Ok(())
    }
}
