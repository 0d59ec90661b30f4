use thiserror::Error;

use super::torrent_id::TorrentId;

/// Errors from piece catalog operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The torrent was never added to the catalog.
    #[error("torrent not registered: {0}")]
    UnknownTorrent(TorrentId),

    /// Piece index out of range for the torrent.
    #[error("invalid piece index: {0}")]
    InvalidPiece(u32),

    /// Remote bitfield does not match the torrent's piece count.
    #[error("bitfield for {got} pieces, torrent has {expected}")]
    InvalidBitfield {
        /// Piece count the remote's bitfield was sized for.
        got: usize,
        /// Piece count the torrent actually has.
        expected: u32,
    },

    /// The piece already has block entries.
    #[error("piece {0} already chunked")]
    AlreadyChunked(u32),

    /// The piece has no outstanding blocks to account for.
    #[error("piece {0} is not chunked")]
    NotChunked(u32),

    /// Malformed torrent id string.
    #[error("invalid torrent id")]
    InvalidTorrentId,
}
