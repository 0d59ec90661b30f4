use std::collections::BTreeSet;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::catalog::TorrentId;
use crate::peer::PeerToken;

use super::actor::{Command, MarkOutcome, Picked, Selection};
use super::block_index::IndexStats;
use super::error::SchedulerError;

/// Cloneable handle to the scheduler actor.
///
/// Request-reply operations resolve once the actor has processed them;
/// fire-and-forget operations (`store_block`, `putback`) resolve once the
/// message is enqueued and get backpressure from the bounded mailbox. Every
/// operation returns [`SchedulerError::Closed`] once the actor is gone.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    lifecycle: mpsc::UnboundedSender<PeerToken>,
}

impl SchedulerHandle {
    pub(super) fn new(
        commands: mpsc::Sender<Command>,
        lifecycle: mpsc::UnboundedSender<PeerToken>,
    ) -> Self {
        Self {
            commands,
            lifecycle,
        }
    }

    async fn send(&self, command: Command) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    /// Records `owner` as the owner of `torrent` and starts watching its
    /// liveness: when the owner's session guard drops, the torrent's block
    /// entries are purged. Idempotent for the same owner.
    pub async fn register_torrent(
        &self,
        torrent: TorrentId,
        owner: PeerToken,
    ) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RegisterTorrent {
            torrent,
            owner,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Asks for up to `budget` blocks to request from a remote claiming
    /// `have`. Pass `None` while the remote's bitfield is still unknown.
    pub async fn pick_blocks(
        &self,
        peer: PeerToken,
        torrent: TorrentId,
        have: Option<BTreeSet<u32>>,
        budget: usize,
    ) -> Result<Picked, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PickBlocks {
            peer,
            torrent,
            have,
            budget,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Delivers a completed block. Fire-and-forget: the write, index update,
    /// and any piece finalization happen inside the actor.
    pub async fn store_block(
        &self,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        data: Bytes,
    ) -> Result<(), SchedulerError> {
        self.send(Command::StoreBlock {
            torrent,
            piece,
            offset,
            data,
        })
        .await
    }

    /// Reports that another peer already stored the block (endgame).
    /// `Found` means the unassigned entry was deleted; `Assigned` means some
    /// peer holds it and the caller should cancel its outstanding request.
    pub async fn mark_fetched(
        &self,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        length: u32,
    ) -> Result<MarkOutcome, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::MarkFetched {
            torrent,
            piece,
            offset,
            length,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Drops the caller's single reservation of a block during endgame,
    /// after a cancel or a completion raced by another peer.
    pub async fn endgame_release(
        &self,
        peer: PeerToken,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        length: u32,
    ) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EndgameRelease {
            peer,
            torrent,
            piece,
            offset,
            length,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Atomically reserves up to `max` unassigned blocks of one piece.
    pub async fn select_by_piece(
        &self,
        peer: PeerToken,
        torrent: TorrentId,
        piece: u32,
        max: usize,
    ) -> Result<Selection, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SelectByPiece {
            peer,
            torrent,
            piece,
            max,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Splits a piece into blocks and inserts them as unassigned entries.
    pub async fn chunkify(&self, torrent: TorrentId, piece: u32) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Chunkify {
            torrent,
            piece,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SchedulerError::Closed)?
    }

    /// Surrenders every reservation the peer holds, across all torrents.
    /// Fire-and-forget; used on choke or voluntary teardown.
    pub async fn putback(&self, peer: PeerToken) -> Result<(), SchedulerError> {
        self.send(Command::Putback { peer }).await
    }

    /// Entry counts of a torrent's blocks.
    pub async fn index_stats(&self, torrent: TorrentId) -> Result<IndexStats, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { torrent, reply }).await?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Delivers a death notification for a session identity. Processed
    /// before any command sent afterwards.
    pub fn notify_down(&self, token: PeerToken) {
        let _ = self.lifecycle.send(token);
    }

    /// Returns a guard that delivers the death notification for `token`
    /// when dropped, so sessions that unwind still surrender their
    /// reservations.
    pub fn session_guard(&self, token: PeerToken) -> SessionGuard {
        SessionGuard {
            token,
            lifecycle: self.lifecycle.clone(),
        }
    }
}

/// RAII observation of a session's termination.
#[derive(Debug)]
pub struct SessionGuard {
    token: PeerToken,
    lifecycle: mpsc::UnboundedSender<PeerToken>,
}

impl SessionGuard {
    /// The identity this guard watches.
    pub fn token(&self) -> PeerToken {
        self.token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.lifecycle.send(self.token);
    }
}
