use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sha1::{Digest, Sha1};

use crate::catalog::TorrentId;

use super::file::FileSink;

/// Result of hashing a finalized piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The piece hash matches.
    Ok,
    /// The piece data does not match its expected hash.
    BadHash,
}

/// Piece hash verification, run off the scheduler actor.
///
/// The scheduler dispatches `check_piece` on a spawned task when a piece's
/// last block lands; the result is consumed by the catalog.
#[async_trait]
pub trait PieceVerifier: Send + Sync {
    /// Verifies one piece, reading it back from storage.
    async fn check_piece(&self, torrent: TorrentId, piece: u32) -> VerifyOutcome;
}

/// SHA-1 verifier over a [`FileSink`].
///
/// Holds the expected v1 piece hashes per torrent and compares them against
/// the stored data, hashing on the blocking thread pool.
pub struct Sha1Verifier {
    sink: Arc<FileSink>,
    hashes: DashMap<TorrentId, Arc<Vec<[u8; 20]>>>,
}

impl Sha1Verifier {
    /// Creates a verifier reading back from `sink`.
    pub fn new(sink: Arc<FileSink>) -> Self {
        Self {
            sink,
            hashes: DashMap::new(),
        }
    }

    /// Registers the expected piece hashes of a torrent.
    pub fn register(&self, torrent: TorrentId, piece_hashes: Vec<[u8; 20]>) {
        self.hashes.insert(torrent, Arc::new(piece_hashes));
    }

    /// Forgets a torrent's hashes.
    pub fn unregister(&self, torrent: TorrentId) {
        self.hashes.remove(&torrent);
    }
}

#[async_trait]
impl PieceVerifier for Sha1Verifier {
    async fn check_piece(&self, torrent: TorrentId, piece: u32) -> VerifyOutcome {
        let Some(hashes) = self.hashes.get(&torrent).map(|h| h.value().clone()) else {
            tracing::warn!(%torrent, piece, "no hashes registered for torrent");
            return VerifyOutcome::BadHash;
        };
        let Some(expected) = hashes.get(piece as usize).copied() else {
            tracing::warn!(%torrent, piece, "piece index beyond registered hashes");
            return VerifyOutcome::BadHash;
        };

        let data = match self.sink.read_piece(torrent, piece).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(%torrent, piece, error = %e, "piece read-back failed");
                return VerifyOutcome::BadHash;
            }
        };

        let valid = tokio::task::spawn_blocking(move || {
            let mut hasher = Sha1::new();
            hasher.update(&data);
            let digest: [u8; 20] = hasher.finalize().into();
            digest == expected
        })
        .await
        .unwrap_or(false);

        if valid {
            VerifyOutcome::Ok
        } else {
            VerifyOutcome::BadHash
        }
    }
}
