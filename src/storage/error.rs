use thiserror::Error;

use crate::catalog::TorrentId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("torrent not registered: {0}")]
    TorrentNotFound(TorrentId),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("invalid block offset: piece {piece}, offset {offset}")]
    InvalidBlockOffset { piece: u32, offset: u32 },
}
