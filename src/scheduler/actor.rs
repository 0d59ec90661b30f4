use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot};

use crate::catalog::{BlockSpan, MissingBlocks, PieceCatalog, TorrentId};
use crate::constants::SCHEDULER_MAILBOX;
use crate::peer::{BlockRequest, PeerToken};
use crate::storage::{ChunkSink, PieceVerifier};

use super::block_index::{BlockIndex, IndexStats};
use super::error::SchedulerError;
use super::handle::SchedulerHandle;
use super::liveness::{Down, LivenessTracker};

/// Blocks assigned from one piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceBlocks {
    /// The piece index.
    pub piece: u32,
    /// The assigned blocks, ascending by offset.
    pub blocks: Vec<BlockSpan>,
}

impl PieceBlocks {
    /// Expands the group into per-block wire requests.
    pub fn requests(&self) -> Vec<BlockRequest> {
        self.blocks
            .iter()
            .map(|span| BlockRequest::new(self.piece, span.offset, span.length))
            .collect()
    }
}

/// Outcome of a `pick_blocks` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Picked {
    /// The remote has no piece we want.
    NotInterested,
    /// The remote has interesting pieces but none can be reserved right now.
    NoneEligible,
    /// Reserved blocks, grouped by piece.
    Normal(Vec<PieceBlocks>),
    /// Endgame assignments: not reserved, deliberately duplicated across
    /// peers.
    Endgame(Vec<PieceBlocks>),
}

impl Picked {
    /// Total number of blocks across all returned pieces.
    pub fn block_count(&self) -> usize {
        match self {
            Picked::Normal(groups) | Picked::Endgame(groups) => {
                groups.iter().map(|group| group.blocks.len()).sum()
            }
            _ => 0,
        }
    }
}

/// Outcome of `mark_fetched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The block was still unassigned; its entry is gone now.
    Found,
    /// The block is reserved by some peer (or already stored); the caller
    /// should cancel its outstanding request instead.
    Assigned,
}

/// Outcome of `select_by_piece`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Blocks reserved for the caller.
    Taken(PieceBlocks),
    /// The piece had no unassigned blocks left at call time.
    AlreadyTaken,
}

pub(super) enum Command {
    RegisterTorrent {
        torrent: TorrentId,
        owner: PeerToken,
        reply: oneshot::Sender<()>,
    },
    PickBlocks {
        peer: PeerToken,
        torrent: TorrentId,
        have: Option<BTreeSet<u32>>,
        budget: usize,
        reply: oneshot::Sender<Picked>,
    },
    StoreBlock {
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        data: Bytes,
    },
    MarkFetched {
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        length: u32,
        reply: oneshot::Sender<MarkOutcome>,
    },
    EndgameRelease {
        peer: PeerToken,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        length: u32,
        reply: oneshot::Sender<()>,
    },
    SelectByPiece {
        peer: PeerToken,
        torrent: TorrentId,
        piece: u32,
        max: usize,
        reply: oneshot::Sender<Selection>,
    },
    Chunkify {
        torrent: TorrentId,
        piece: u32,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Putback {
        peer: PeerToken,
    },
    Stats {
        torrent: TorrentId,
        reply: oneshot::Sender<IndexStats>,
    },
}

/// The scheduling actor.
///
/// Owns the block index outright and serializes every operation against it;
/// peer sessions interact through a [`SchedulerHandle`]. Death notifications
/// arrive on a separate lifecycle channel that is drained before commands,
/// so a disconnected peer's blocks are released before any later pick runs.
pub struct Scheduler {
    index: BlockIndex,
    liveness: LivenessTracker,
    catalog: Arc<dyn PieceCatalog>,
    sink: Arc<dyn ChunkSink>,
    verifier: Arc<dyn PieceVerifier>,
    commands: mpsc::Receiver<Command>,
    lifecycle: mpsc::UnboundedReceiver<PeerToken>,
}

impl Scheduler {
    /// Spawns the actor onto the current tokio runtime and returns its
    /// handle. The actor exits once every handle and session guard is gone.
    pub fn spawn(
        catalog: Arc<dyn PieceCatalog>,
        sink: Arc<dyn ChunkSink>,
        verifier: Arc<dyn PieceVerifier>,
    ) -> SchedulerHandle {
        let (commands_tx, commands_rx) = mpsc::channel(SCHEDULER_MAILBOX);
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let actor = Scheduler {
            index: BlockIndex::new(),
            liveness: LivenessTracker::new(),
            catalog,
            sink,
            verifier,
            commands: commands_rx,
            lifecycle: lifecycle_rx,
        };
        tokio::spawn(actor.run());
        SchedulerHandle::new(commands_tx, lifecycle_tx)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                down = self.lifecycle.recv() => match down {
                    Some(token) => self.on_down(token),
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
            }
        }
        tracing::debug!("scheduler actor stopped");
    }

    fn on_down(&mut self, token: PeerToken) {
        match self.liveness.classify_down(token) {
            Down::Owner(torrents) => {
                for torrent in torrents {
                    tracing::debug!(%token, %torrent, "owner died, purging torrent");
                    self.index.purge_torrent(torrent);
                }
            }
            Down::Worker => {
                let released = self.index.putback(token);
                tracing::debug!(%token, released, "peer died, reservations put back");
            }
            Down::Unknown => {
                tracing::debug!(%token, "death notification for unknown identity");
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::RegisterTorrent {
                torrent,
                owner,
                reply,
            } => {
                self.liveness.add_owner(owner, torrent);
                let _ = reply.send(());
            }
            Command::PickBlocks {
                peer,
                torrent,
                have,
                budget,
                reply,
            } => {
                let _ = reply.send(self.pick_blocks(peer, torrent, have, budget));
            }
            Command::StoreBlock {
                torrent,
                piece,
                offset,
                data,
            } => {
                self.store_block(torrent, piece, offset, data).await;
            }
            Command::MarkFetched {
                torrent,
                piece,
                offset,
                length,
                reply,
            } => {
                let outcome = if self.index.take_not_fetched(torrent, piece, offset, length) {
                    MarkOutcome::Found
                } else {
                    MarkOutcome::Assigned
                };
                let _ = reply.send(outcome);
            }
            Command::EndgameRelease {
                peer,
                torrent,
                piece,
                offset,
                length,
                reply,
            } => {
                self.index.release(torrent, piece, offset, length, peer);
                let _ = reply.send(());
            }
            Command::SelectByPiece {
                peer,
                torrent,
                piece,
                max,
                reply,
            } => {
                let _ = reply.send(self.select_by_piece(peer, torrent, piece, max));
            }
            Command::Chunkify {
                torrent,
                piece,
                reply,
            } => {
                let _ = reply.send(self.chunkify(torrent, piece));
            }
            Command::Putback { peer } => {
                let released = self.index.putback(peer);
                tracing::debug!(%peer, released, "reservations put back");
            }
            Command::Stats { torrent, reply } => {
                let _ = reply.send(self.index.stats(torrent));
            }
        }
    }

    /// The normal pick algorithm: walk the chunked pieces the remote has,
    /// reserve from the first one with unassigned blocks, chunkify a fresh
    /// piece when nothing chunked is left, and fall through to the endgame
    /// strategy when the torrent is in endgame and nothing was reserved.
    fn pick_blocks(
        &mut self,
        peer: PeerToken,
        torrent: TorrentId,
        have: Option<BTreeSet<u32>>,
        budget: usize,
    ) -> Picked {
        let Some(mut have) = have else {
            return Picked::NoneEligible;
        };
        if budget == 0 {
            return Picked::NoneEligible;
        }
        let full_have = have.clone();

        let mut picked: Vec<PieceBlocks> = Vec::new();
        let mut remaining = budget;
        let mut saw_chunked = false;

        while remaining > 0 {
            let mut candidate = None;
            for piece in self
                .catalog
                .chunked_pieces(torrent)
                .into_iter()
                .filter(|piece| have.contains(piece))
            {
                saw_chunked = true;
                if self.index.has_not_fetched(torrent, piece) {
                    candidate = Some(piece);
                    break;
                }
            }

            let piece = match candidate {
                Some(piece) => piece,
                None => {
                    let Some(fresh) = self.catalog.find_new(torrent, &have) else {
                        break;
                    };
                    match self.catalog.chunkify_piece(torrent, fresh) {
                        Ok(blocks) => {
                            self.index.insert_chunked(torrent, fresh, &blocks);
                            fresh
                        }
                        Err(e) => {
                            tracing::warn!(%torrent, piece = fresh, error = %e, "chunkify failed");
                            break;
                        }
                    }
                }
            };

            let blocks = self.index.reserve(torrent, piece, remaining, peer);
            have.remove(&piece);
            if blocks.is_empty() {
                // Reserved out from under us between the candidate scan and
                // the reservation: already_taken, retry without spending
                // budget.
                continue;
            }
            remaining -= blocks.len();
            picked.push(PieceBlocks { piece, blocks });
            self.liveness.add_worker(peer);
        }

        if !picked.is_empty() {
            return Picked::Normal(picked);
        }
        let fallback = if saw_chunked {
            Picked::NoneEligible
        } else {
            Picked::NotInterested
        };
        if self.catalog.is_endgame(torrent) {
            self.pick_endgame(torrent, &full_have, budget, fallback)
        } else {
            fallback
        }
    }

    /// The endgame pick: every in-flight block of the remote's pieces,
    /// uniformly shuffled, truncated to budget, grouped by piece. Nothing is
    /// reserved; duplicate requests across peers are reconciled on store.
    fn pick_endgame(
        &mut self,
        torrent: TorrentId,
        have: &BTreeSet<u32>,
        budget: usize,
        fallback: Picked,
    ) -> Picked {
        let mut candidates = self.index.endgame_blocks(torrent, have);
        if candidates.is_empty() {
            return fallback;
        }

        let mut rng = rand::rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(budget);

        let mut grouped: Vec<PieceBlocks> = Vec::new();
        for (piece, span) in candidates {
            match grouped.iter_mut().find(|group| group.piece == piece) {
                Some(group) => group.blocks.push(span),
                None => grouped.push(PieceBlocks {
                    piece,
                    blocks: vec![span],
                }),
            }
        }
        grouped.shuffle(&mut rng);
        Picked::Endgame(grouped)
    }

    fn select_by_piece(
        &mut self,
        peer: PeerToken,
        torrent: TorrentId,
        piece: u32,
        max: usize,
    ) -> Selection {
        let blocks = self.index.reserve(torrent, piece, max, peer);
        if blocks.is_empty() {
            Selection::AlreadyTaken
        } else {
            self.liveness.add_worker(peer);
            Selection::Taken(PieceBlocks { piece, blocks })
        }
    }

    fn chunkify(&mut self, torrent: TorrentId, piece: u32) -> Result<(), SchedulerError> {
        let blocks = self.catalog.chunkify_piece(torrent, piece)?;
        self.index.insert_chunked(torrent, piece, &blocks);
        Ok(())
    }

    /// Accepts a completed block: disk hand-off, index update, and piece
    /// finalization when the last block lands.
    async fn store_block(&mut self, torrent: TorrentId, piece: u32, offset: u32, data: Bytes) {
        if let Err(e) = self.sink.write_chunk(torrent, piece, offset, data).await {
            // The block stays reserved; a later putback re-queues it.
            tracing::error!(%torrent, piece, offset, error = %e, "chunk write failed");
            return;
        }

        let first_time =
            !self.catalog.is_fetched(torrent, piece) && self.index.insert_fetched(torrent, piece, offset);
        self.index.clear_assignments(torrent, piece, offset);

        if !first_time {
            tracing::trace!(%torrent, piece, offset, "duplicate store ignored");
            return;
        }

        match self.catalog.decrease_missing(torrent, piece) {
            Ok(MissingBlocks::Full) => self.finalize_piece(torrent, piece),
            Ok(MissingBlocks::Remaining(_)) => {}
            Err(e) => {
                tracing::warn!(%torrent, piece, error = %e, "missing-block decrement failed");
            }
        }
    }

    /// Fires exactly once per piece: drops the piece's entries from the
    /// index in this turn, then hands the hash check to a separate task so
    /// the actor is never stalled by hashing.
    fn finalize_piece(&mut self, torrent: TorrentId, piece: u32) {
        self.index.remove_piece(torrent, piece);
        tracing::debug!(%torrent, piece, "piece complete, dispatching verification");

        let verifier = self.verifier.clone();
        let catalog = self.catalog.clone();
        tokio::spawn(async move {
            let outcome = verifier.check_piece(torrent, piece).await;
            catalog.record_verified(torrent, piece, outcome);
        });
    }
}
