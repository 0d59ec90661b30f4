use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::catalog::{BlockSpan, TorrentId};
use crate::peer::PeerToken;

/// Per-torrent entry counts, for monitoring and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Blocks waiting to be handed out.
    pub not_fetched: usize,
    /// Blocks reserved by some peer.
    pub assigned: usize,
    /// Blocks stored but whose piece is not yet finalized.
    pub fetched: usize,
}

impl IndexStats {
    /// Total entries across all states.
    pub fn total(&self) -> usize {
        self.not_fetched + self.assigned + self.fetched
    }
}

// One torrent's blocks, bucketed by status. BTreeMaps keep the ascending
// offset order that reservation and test replay rely on. The assigned bucket
// is keyed by (offset, holder) so endgame can carry several reservations of
// the same locator.
#[derive(Debug, Default)]
struct TorrentBlocks {
    not_fetched: HashMap<u32, BTreeMap<u32, u32>>,
    assigned: HashMap<u32, BTreeMap<(u32, PeerToken), u32>>,
    fetched: HashMap<u32, BTreeSet<u32>>,
}

impl TorrentBlocks {
    fn is_empty(&self) -> bool {
        self.not_fetched.is_empty() && self.assigned.is_empty() && self.fetched.is_empty()
    }
}

/// The block store: who has which block in which state.
///
/// Owned exclusively by the scheduler actor; every mutation runs inside one
/// actor turn. A reverse index per peer keeps `putback` proportional to the
/// peer's reservations instead of the whole store.
#[derive(Debug, Default)]
pub(super) struct BlockIndex {
    torrents: HashMap<TorrentId, TorrentBlocks>,
    by_peer: HashMap<PeerToken, BTreeSet<(TorrentId, u32, u32)>>,
}

impl BlockIndex {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Inserts one `not_fetched` entry per span of a freshly chunked piece.
    pub(super) fn insert_chunked(&mut self, torrent: TorrentId, piece: u32, blocks: &[BlockSpan]) {
        let offsets = self
            .torrents
            .entry(torrent)
            .or_default()
            .not_fetched
            .entry(piece)
            .or_default();
        for span in blocks {
            offsets.insert(span.offset, span.length);
        }
    }

    /// True if the piece has at least one `not_fetched` entry.
    pub(super) fn has_not_fetched(&self, torrent: TorrentId, piece: u32) -> bool {
        self.torrents
            .get(&torrent)
            .and_then(|t| t.not_fetched.get(&piece))
            .is_some_and(|offsets| !offsets.is_empty())
    }

    /// Atomically moves up to `max` `not_fetched` entries of the piece into
    /// `assigned` for `peer`, ascending by offset. An empty result means the
    /// piece had nothing left at call time.
    pub(super) fn reserve(
        &mut self,
        torrent: TorrentId,
        piece: u32,
        max: usize,
        peer: PeerToken,
    ) -> Vec<BlockSpan> {
        let Some(t) = self.torrents.get_mut(&torrent) else {
            return Vec::new();
        };
        let Some(offsets) = t.not_fetched.get_mut(&piece) else {
            return Vec::new();
        };

        let taken: Vec<u32> = offsets.keys().take(max).copied().collect();
        let mut spans = Vec::with_capacity(taken.len());
        for offset in taken {
            let length = match offsets.remove(&offset) {
                Some(length) => length,
                None => continue,
            };
            t.assigned
                .entry(piece)
                .or_default()
                .insert((offset, peer), length);
            self.by_peer
                .entry(peer)
                .or_default()
                .insert((torrent, piece, offset));
            spans.push(BlockSpan::new(offset, length));
        }
        if offsets.is_empty() {
            t.not_fetched.remove(&piece);
        }
        spans
    }

    /// Deletes the `not_fetched` entry at the locator. Returns false when no
    /// matching entry exists.
    pub(super) fn take_not_fetched(
        &mut self,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        length: u32,
    ) -> bool {
        let Some(t) = self.torrents.get_mut(&torrent) else {
            return false;
        };
        let Some(offsets) = t.not_fetched.get_mut(&piece) else {
            return false;
        };
        match offsets.get(&offset) {
            Some(&stored) if stored == length => {
                offsets.remove(&offset);
                if offsets.is_empty() {
                    t.not_fetched.remove(&piece);
                }
                true
            }
            _ => false,
        }
    }

    /// Removes the single `{assigned, peer}` entry at the locator.
    pub(super) fn release(
        &mut self,
        torrent: TorrentId,
        piece: u32,
        offset: u32,
        length: u32,
        peer: PeerToken,
    ) -> bool {
        let Some(t) = self.torrents.get_mut(&torrent) else {
            return false;
        };
        let Some(holders) = t.assigned.get_mut(&piece) else {
            return false;
        };
        if holders.get(&(offset, peer)) != Some(&length) {
            return false;
        }
        holders.remove(&(offset, peer));
        if holders.is_empty() {
            t.assigned.remove(&piece);
        }
        self.forget_peer_entry(peer, (torrent, piece, offset));
        true
    }

    /// Removes every assignment of the locator, whichever peers hold it.
    /// Returns how many were removed.
    pub(super) fn clear_assignments(&mut self, torrent: TorrentId, piece: u32, offset: u32) -> usize {
        let keys: Vec<(u32, PeerToken)> = {
            let Some(holders) = self
                .torrents
                .get_mut(&torrent)
                .and_then(|t| t.assigned.get_mut(&piece))
            else {
                return 0;
            };
            let keys: Vec<(u32, PeerToken)> = holders
                .keys()
                .filter(|&&(entry_offset, _)| entry_offset == offset)
                .copied()
                .collect();
            for key in &keys {
                holders.remove(key);
            }
            keys
        };

        if let Some(t) = self.torrents.get_mut(&torrent) {
            if t.assigned.get(&piece).is_some_and(|h| h.is_empty()) {
                t.assigned.remove(&piece);
            }
        }
        for &(_, holder) in &keys {
            self.forget_peer_entry(holder, (torrent, piece, offset));
        }
        keys.len()
    }

    /// Inserts a `fetched` entry for the offset. Returns false when one
    /// already exists (a duplicate store).
    pub(super) fn insert_fetched(&mut self, torrent: TorrentId, piece: u32, offset: u32) -> bool {
        self.torrents
            .entry(torrent)
            .or_default()
            .fetched
            .entry(piece)
            .or_default()
            .insert(offset)
    }

    /// Converts every `{assigned, peer}` entry, across all torrents, back to
    /// `not_fetched` at the same locator. Returns how many were converted.
    pub(super) fn putback(&mut self, peer: PeerToken) -> usize {
        let Some(entries) = self.by_peer.remove(&peer) else {
            return 0;
        };
        let mut released = 0;
        for (torrent, piece, offset) in entries {
            let Some(t) = self.torrents.get_mut(&torrent) else {
                continue;
            };
            let Some(holders) = t.assigned.get_mut(&piece) else {
                continue;
            };
            let Some(length) = holders.remove(&(offset, peer)) else {
                continue;
            };
            if holders.is_empty() {
                t.assigned.remove(&piece);
            }
            // Another endgame holder may have been put back first; one
            // not_fetched entry per locator.
            t.not_fetched
                .entry(piece)
                .or_default()
                .entry(offset)
                .or_insert(length);
            released += 1;
        }
        released
    }

    /// Drops every entry of a finalized piece.
    pub(super) fn remove_piece(&mut self, torrent: TorrentId, piece: u32) {
        let holders = {
            let Some(t) = self.torrents.get_mut(&torrent) else {
                return;
            };
            t.not_fetched.remove(&piece);
            t.fetched.remove(&piece);
            t.assigned.remove(&piece)
        };
        if let Some(holders) = holders {
            for ((offset, holder), _) in holders {
                self.forget_peer_entry(holder, (torrent, piece, offset));
            }
        }
        if self.torrents.get(&torrent).is_some_and(|t| t.is_empty()) {
            self.torrents.remove(&torrent);
        }
    }

    /// Drops every entry of a torrent.
    pub(super) fn purge_torrent(&mut self, torrent: TorrentId) {
        let Some(t) = self.torrents.remove(&torrent) else {
            return;
        };
        for (piece, holders) in t.assigned {
            for ((offset, holder), _) in holders {
                self.forget_peer_entry(holder, (torrent, piece, offset));
            }
        }
    }

    /// Every block whose piece is in `have` and which is still in flight:
    /// `not_fetched` or `assigned` to anyone, deduplicated by locator.
    pub(super) fn endgame_blocks(
        &self,
        torrent: TorrentId,
        have: &BTreeSet<u32>,
    ) -> Vec<(u32, BlockSpan)> {
        let Some(t) = self.torrents.get(&torrent) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for &piece in have {
            let mut merged: BTreeMap<u32, u32> = BTreeMap::new();
            if let Some(offsets) = t.not_fetched.get(&piece) {
                merged.extend(offsets.iter().map(|(&offset, &length)| (offset, length)));
            }
            if let Some(holders) = t.assigned.get(&piece) {
                for (&(offset, _), &length) in holders {
                    merged.entry(offset).or_insert(length);
                }
            }
            out.extend(
                merged
                    .into_iter()
                    .map(|(offset, length)| (piece, BlockSpan::new(offset, length))),
            );
        }
        out
    }

    /// Number of reservations held by a peer.
    pub(super) fn assigned_count(&self, peer: PeerToken) -> usize {
        self.by_peer.get(&peer).map(|set| set.len()).unwrap_or(0)
    }

    /// Entry counts for a torrent.
    pub(super) fn stats(&self, torrent: TorrentId) -> IndexStats {
        let Some(t) = self.torrents.get(&torrent) else {
            return IndexStats::default();
        };
        IndexStats {
            not_fetched: t.not_fetched.values().map(|m| m.len()).sum(),
            assigned: t.assigned.values().map(|m| m.len()).sum(),
            fetched: t.fetched.values().map(|s| s.len()).sum(),
        }
    }

    fn forget_peer_entry(&mut self, peer: PeerToken, entry: (TorrentId, u32, u32)) {
        if let Some(set) = self.by_peer.get_mut(&peer) {
            set.remove(&entry);
            if set.is_empty() {
                self.by_peer.remove(&peer);
            }
        }
    }
}
