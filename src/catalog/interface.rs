use std::collections::BTreeSet;

use crate::peer::Bitfield;
use crate::storage::VerifyOutcome;

use super::error::CatalogError;
use super::piece::BlockSpan;
use super::torrent_id::TorrentId;

/// Result of checking a remote bitfield for pieces we still want.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// The remote has pieces we want; the have-set is pruned to those.
    Interested(BTreeSet<u32>),
    /// Nothing the remote has is still wanted.
    NotInterested,
}

/// Result of decrementing a piece's missing-block counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingBlocks {
    /// The counter reached zero; the piece is complete.
    Full,
    /// Blocks still missing after the decrement.
    Remaining(u32),
}

/// Per-torrent piece bookkeeping consulted by the scheduler.
///
/// Implementations must be cheap and non-blocking: every method is called
/// from inside the scheduler actor's turn. All methods take `&self`;
/// implementations carry their own interior locking (the scheduler shares
/// the catalog with peer sessions and the verification path).
pub trait PieceCatalog: Send + Sync {
    /// Total piece count of the torrent.
    fn num_pieces(&self, torrent: TorrentId) -> Result<u32, CatalogError>;

    /// Pieces currently split into blocks, ascending.
    fn chunked_pieces(&self, torrent: TorrentId) -> Vec<u32>;

    /// Picks a fresh piece to chunkify from within `have`, or `None` when
    /// every wanted piece in `have` is already chunked or fetched.
    fn find_new(&self, torrent: TorrentId, have: &BTreeSet<u32>) -> Option<u32>;

    /// True once the piece has all of its blocks.
    fn is_fetched(&self, torrent: TorrentId, piece: u32) -> bool;

    /// Validates a remote bitfield and prunes it to pieces still wanted.
    ///
    /// A bitfield sized for the wrong piece count is an error; the peer
    /// session should drop the remote.
    fn check_interest(
        &self,
        torrent: TorrentId,
        remote: &Bitfield,
    ) -> Result<Interest, CatalogError>;

    /// Whether the torrent is in its endgame phase.
    fn is_endgame(&self, torrent: TorrentId) -> bool;

    /// Atomically decrements the piece's missing-block counter.
    fn decrease_missing(
        &self,
        torrent: TorrentId,
        piece: u32,
    ) -> Result<MissingBlocks, CatalogError>;

    /// Marks the piece as chunked and returns its block spans.
    fn chunkify_piece(
        &self,
        torrent: TorrentId,
        piece: u32,
    ) -> Result<Vec<BlockSpan>, CatalogError>;

    /// Consumes a verifier result for a finalized piece: a bad hash resets
    /// the piece to unchunked so the scheduler re-chunks it naturally.
    fn record_verified(&self, torrent: TorrentId, piece: u32, outcome: VerifyOutcome);
}
