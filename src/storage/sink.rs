use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::catalog::TorrentId;

use super::error::StorageError;

/// Destination for completed blocks.
///
/// Writes must be durable-or-error and idempotent for identical
/// `(torrent, piece, offset, data)`: duplicate stores are routine during
/// endgame. The scheduler awaits `write_chunk` inside its turn, so
/// implementations should return quickly and queue heavy I/O internally.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Writes one block of a piece.
    async fn write_chunk(
        &self,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        data: Bytes,
    ) -> Result<(), StorageError>;
}

/// In-memory chunk sink.
///
/// Keeps every written block keyed by locator. Useful for tests and for
/// embedders that assemble pieces in memory before flushing elsewhere.
#[derive(Debug, Default)]
pub struct MemorySink {
    blocks: DashMap<(TorrentId, u32, u32), Bytes>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the data stored for a locator, if any.
    pub fn block(&self, torrent: TorrentId, piece: u32, offset: u32) -> Option<Bytes> {
        self.blocks
            .get(&(torrent, piece, offset))
            .map(|b| b.clone())
    }

    /// Number of blocks stored.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl ChunkSink for MemorySink {
    async fn write_chunk(
        &self,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        data: Bytes,
    ) -> Result<(), StorageError> {
        self.blocks.insert((torrent, piece, offset), data);
        Ok(())
    }
}
