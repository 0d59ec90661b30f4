use std::collections::{BTreeSet, HashMap, HashSet};

use crate::catalog::TorrentId;
use crate::peer::PeerToken;

/// Classification of a death notification.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Down {
    /// A torrent owner died; its torrents must be purged.
    Owner(Vec<TorrentId>),
    /// A peer worker died; its reservations must be put back.
    Worker,
    /// Never seen; nothing to do.
    Unknown,
}

/// Tracks the two populations the scheduler watches: torrent owners
/// (registered explicitly) and peer workers (registered on their first
/// successful reservation). The populations live in separate structures so
/// classifying a death is deterministic: owners win.
#[derive(Debug, Default)]
pub(super) struct LivenessTracker {
    owners: HashMap<PeerToken, BTreeSet<TorrentId>>,
    workers: HashSet<PeerToken>,
}

impl LivenessTracker {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Records `owner` as owning `torrent`. Idempotent.
    pub(super) fn add_owner(&mut self, owner: PeerToken, torrent: TorrentId) {
        self.owners.entry(owner).or_default().insert(torrent);
    }

    /// Adds a peer to the monitored-worker set. Idempotent.
    pub(super) fn add_worker(&mut self, peer: PeerToken) {
        self.workers.insert(peer);
    }

    /// Classifies a death notification and forgets the identity.
    pub(super) fn classify_down(&mut self, token: PeerToken) -> Down {
        if let Some(torrents) = self.owners.remove(&token) {
            self.workers.remove(&token);
            return Down::Owner(torrents.into_iter().collect());
        }
        if self.workers.remove(&token) {
            return Down::Worker;
        }
        Down::Unknown
    }
}
