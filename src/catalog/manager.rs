use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::peer::Bitfield;
use crate::storage::VerifyOutcome;

use super::error::CatalogError;
use super::interface::{Interest, MissingBlocks, PieceCatalog};
use super::piece::{block_count, chunk_blocks, BlockSpan, PieceState};
use super::torrent_id::TorrentId;

#[derive(Debug)]
struct PieceEntry {
    length: u32,
    state: PieceState,
}

#[derive(Debug)]
struct TorrentPieces {
    pieces: Vec<PieceEntry>,
    endgame: bool,
}

impl TorrentPieces {
    fn new(piece_length: u32, total_length: u64) -> Self {
        let piece_count = total_length.div_ceil(piece_length as u64) as usize;
        let pieces = (0..piece_count)
            .map(|i| {
                let offset = i as u64 * piece_length as u64;
                let length = (total_length - offset).min(piece_length as u64) as u32;
                PieceEntry {
                    length,
                    state: PieceState::Unchunked,
                }
            })
            .collect();
        Self {
            pieces,
            endgame: false,
        }
    }

    fn piece(&self, index: u32) -> Result<&PieceEntry, CatalogError> {
        self.pieces
            .get(index as usize)
            .ok_or(CatalogError::InvalidPiece(index))
    }

    fn piece_mut(&mut self, index: u32) -> Result<&mut PieceEntry, CatalogError> {
        self.pieces
            .get_mut(index as usize)
            .ok_or(CatalogError::InvalidPiece(index))
    }
}

/// In-memory piece catalog.
///
/// Tracks per-piece download state (`unchunked → chunked → fetched`) for
/// every registered torrent behind one `RwLock`. Mutation happens on three
/// paths only: chunkify, the missing-block decrement, and verifier-result
/// consumption, so contention on the lock is low.
#[derive(Debug, Default)]
pub struct TorrentCatalog {
    torrents: RwLock<HashMap<TorrentId, TorrentPieces>>,
}

impl TorrentCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a torrent with the given piece length and total content length.
    /// Adding an already-known torrent keeps its existing state.
    pub fn add_torrent(&self, torrent: TorrentId, piece_length: u32, total_length: u64) {
        self.torrents
            .write()
            .entry(torrent)
            .or_insert_with(|| TorrentPieces::new(piece_length, total_length));
    }

    /// Removes a torrent and all of its piece state.
    pub fn remove_torrent(&self, torrent: TorrentId) {
        self.torrents.write().remove(&torrent);
    }

    /// Switches the torrent into endgame. Pick requests that would otherwise
    /// come back empty will start handing out in-flight blocks.
    pub fn enter_endgame(&self, torrent: TorrentId) {
        if let Some(t) = self.torrents.write().get_mut(&torrent) {
            if !t.endgame {
                tracing::debug!(%torrent, "entering endgame");
                t.endgame = true;
            }
        }
    }

    /// Number of fetched pieces.
    pub fn fetched_count(&self, torrent: TorrentId) -> usize {
        self.torrents
            .read()
            .get(&torrent)
            .map(|t| {
                t.pieces
                    .iter()
                    .filter(|p| p.state == PieceState::Fetched)
                    .count()
            })
            .unwrap_or(0)
    }

    /// True once every piece of the torrent is fetched.
    pub fn is_complete(&self, torrent: TorrentId) -> bool {
        self.torrents
            .read()
            .get(&torrent)
            .map(|t| t.pieces.iter().all(|p| p.state == PieceState::Fetched))
            .unwrap_or(false)
    }

    /// Length of one piece.
    pub fn piece_length(&self, torrent: TorrentId, piece: u32) -> Result<u32, CatalogError> {
        let torrents = self.torrents.read();
        let t = torrents
            .get(&torrent)
            .ok_or(CatalogError::UnknownTorrent(torrent))?;
        Ok(t.piece(piece)?.length)
    }
}

impl PieceCatalog for TorrentCatalog {
    fn num_pieces(&self, torrent: TorrentId) -> Result<u32, CatalogError> {
        let torrents = self.torrents.read();
        let t = torrents
            .get(&torrent)
            .ok_or(CatalogError::UnknownTorrent(torrent))?;
        Ok(t.pieces.len() as u32)
    }

    fn chunked_pieces(&self, torrent: TorrentId) -> Vec<u32> {
        self.torrents
            .read()
            .get(&torrent)
            .map(|t| {
                t.pieces
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| matches!(p.state, PieceState::Chunked { .. }))
                    .map(|(i, _)| i as u32)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find_new(&self, torrent: TorrentId, have: &BTreeSet<u32>) -> Option<u32> {
        let torrents = self.torrents.read();
        let t = torrents.get(&torrent)?;
        have.iter()
            .copied()
            .find(|&p| {
                t.pieces
                    .get(p as usize)
                    .is_some_and(|entry| entry.state == PieceState::Unchunked)
            })
    }

    fn is_fetched(&self, torrent: TorrentId, piece: u32) -> bool {
        self.torrents
            .read()
            .get(&torrent)
            .and_then(|t| t.pieces.get(piece as usize))
            .is_some_and(|p| p.state == PieceState::Fetched)
    }

    fn check_interest(
        &self,
        torrent: TorrentId,
        remote: &Bitfield,
    ) -> Result<Interest, CatalogError> {
        let torrents = self.torrents.read();
        let t = torrents
            .get(&torrent)
            .ok_or(CatalogError::UnknownTorrent(torrent))?;

        let expected = t.pieces.len() as u32;
        if remote.piece_count() != expected as usize {
            return Err(CatalogError::InvalidBitfield {
                got: remote.piece_count(),
                expected,
            });
        }

        let pruned: BTreeSet<u32> = remote
            .to_have_set()
            .into_iter()
            .filter(|&p| t.pieces[p as usize].state != PieceState::Fetched)
            .collect();

        if pruned.is_empty() {
            Ok(Interest::NotInterested)
        } else {
            Ok(Interest::Interested(pruned))
        }
    }

    fn is_endgame(&self, torrent: TorrentId) -> bool {
        self.torrents
            .read()
            .get(&torrent)
            .map(|t| t.endgame)
            .unwrap_or(false)
    }

    fn decrease_missing(
        &self,
        torrent: TorrentId,
        piece: u32,
    ) -> Result<MissingBlocks, CatalogError> {
        let mut torrents = self.torrents.write();
        let t = torrents
            .get_mut(&torrent)
            .ok_or(CatalogError::UnknownTorrent(torrent))?;
        let entry = t.piece_mut(piece)?;

        match entry.state {
            PieceState::Chunked { missing } if missing <= 1 => {
                entry.state = PieceState::Fetched;
                Ok(MissingBlocks::Full)
            }
            PieceState::Chunked { missing } => {
                entry.state = PieceState::Chunked {
                    missing: missing - 1,
                };
                Ok(MissingBlocks::Remaining(missing - 1))
            }
            _ => Err(CatalogError::NotChunked(piece)),
        }
    }

    fn chunkify_piece(
        &self,
        torrent: TorrentId,
        piece: u32,
    ) -> Result<Vec<BlockSpan>, CatalogError> {
        let mut torrents = self.torrents.write();
        let t = torrents
            .get_mut(&torrent)
            .ok_or(CatalogError::UnknownTorrent(torrent))?;
        let entry = t.piece_mut(piece)?;

        if entry.state != PieceState::Unchunked {
            return Err(CatalogError::AlreadyChunked(piece));
        }

        entry.state = PieceState::Chunked {
            missing: block_count(entry.length),
        };
        Ok(chunk_blocks(entry.length))
    }

    fn record_verified(&self, torrent: TorrentId, piece: u32, outcome: VerifyOutcome) {
        let mut torrents = self.torrents.write();
        let Some(t) = torrents.get_mut(&torrent) else {
            return;
        };
        let Ok(entry) = t.piece_mut(piece) else {
            return;
        };

        match outcome {
            VerifyOutcome::Ok => {
                tracing::debug!(%torrent, piece, "piece verified");
            }
            VerifyOutcome::BadHash => {
                tracing::warn!(%torrent, piece, "piece failed hash check, re-queueing");
                entry.state = PieceState::Unchunked;
            }
        }
    }
}
