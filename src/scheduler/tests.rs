use super::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::catalog::{chunk_blocks, BlockSpan, CatalogError, PieceCatalog, TorrentCatalog, TorrentId};
use crate::peer::PeerToken;
use crate::storage::{ChunkSink, MemorySink, PieceVerifier, StorageError, VerifyOutcome};

fn test_torrent() -> TorrentId {
    TorrentId::from_bytes([1u8; 20])
}

fn have(pieces: &[u32]) -> Option<BTreeSet<u32>> {
    Some(pieces.iter().copied().collect())
}

fn block_data(len: usize) -> Bytes {
    Bytes::from(vec![0xABu8; len])
}

struct RecordingVerifier {
    calls: mpsc::UnboundedSender<(TorrentId, u32)>,
}

#[async_trait]
impl PieceVerifier for RecordingVerifier {
    async fn check_piece(&self, torrent: TorrentId, piece: u32) -> VerifyOutcome {
        let _ = self.calls.send((torrent, piece));
        VerifyOutcome::Ok
    }
}

struct FailingSink;

#[async_trait]
impl ChunkSink for FailingSink {
    async fn write_chunk(
        &self,
        _torrent: TorrentId,
        _piece: u32,
        _offset: u32,
        _data: Bytes,
    ) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::other("disk full")))
    }
}

struct Harness {
    scheduler: SchedulerHandle,
    catalog: Arc<TorrentCatalog>,
    sink: Arc<MemorySink>,
    verified: mpsc::UnboundedReceiver<(TorrentId, u32)>,
}

fn harness() -> Harness {
    let catalog = Arc::new(TorrentCatalog::new());
    let sink = Arc::new(MemorySink::new());
    let (calls, verified) = mpsc::unbounded_channel();
    let verifier = Arc::new(RecordingVerifier { calls });
    let scheduler = Scheduler::spawn(catalog.clone(), sink.clone(), verifier);
    Harness {
        scheduler,
        catalog,
        sink,
        verified,
    }
}

#[tokio::test]
async fn test_fresh_chunkify() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    let owner = PeerToken::mint();
    h.scheduler.register_torrent(t, owner).await.unwrap();

    let a = PeerToken::mint();
    let picked = h.scheduler.pick_blocks(a, t, have(&[0]), 10).await.unwrap();
    assert_eq!(
        picked,
        Picked::Normal(vec![PieceBlocks {
            piece: 0,
            blocks: vec![BlockSpan::new(0, 16384), BlockSpan::new(16384, 16384)],
        }])
    );

    // Everything is reserved now; an identical pick finds nothing eligible.
    let again = h.scheduler.pick_blocks(a, t, have(&[0]), 10).await.unwrap();
    assert_eq!(again, Picked::NoneEligible);
}

#[tokio::test]
async fn test_unknown_have_set() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    let a = PeerToken::mint();
    let picked = h.scheduler.pick_blocks(a, t, None, 10).await.unwrap();
    assert_eq!(picked, Picked::NoneEligible);
}

#[tokio::test]
async fn test_not_interested_when_remote_has_nothing() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 65536);

    let a = PeerToken::mint();
    let picked = h.scheduler.pick_blocks(a, t, have(&[]), 10).await.unwrap();
    assert_eq!(picked, Picked::NotInterested);
}

#[tokio::test]
async fn test_budget_respected() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 49152, 49152);

    let a = PeerToken::mint();
    let picked = h.scheduler.pick_blocks(a, t, have(&[0]), 2).await.unwrap();
    assert_eq!(picked.block_count(), 2);

    let stats = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.assigned, 2);
    assert_eq!(stats.not_fetched, 1);
}

#[tokio::test]
async fn test_pick_spans_multiple_pieces() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 98304);

    let a = PeerToken::mint();
    let picked = h
        .scheduler
        .pick_blocks(a, t, have(&[0, 1, 2]), 5)
        .await
        .unwrap();
    assert_eq!(picked.block_count(), 5);
    match picked {
        Picked::Normal(groups) => {
            let pieces: Vec<u32> = groups.iter().map(|g| g.piece).collect();
            assert_eq!(pieces, vec![0, 1, 2]);
            assert_eq!(groups[2].blocks, vec![BlockSpan::new(0, 16384)]);
        }
        other => panic!("expected normal pick, got {:?}", other),
    }
}

#[tokio::test]
async fn test_no_double_reservation_between_peers() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    let a = PeerToken::mint();
    let b = PeerToken::mint();

    let first = h.scheduler.pick_blocks(a, t, have(&[0]), 1).await.unwrap();
    let second = h.scheduler.pick_blocks(b, t, have(&[0]), 10).await.unwrap();

    let Picked::Normal(first) = first else {
        panic!("expected normal pick");
    };
    let Picked::Normal(second) = second else {
        panic!("expected normal pick");
    };
    assert_eq!(first[0].blocks, vec![BlockSpan::new(0, 16384)]);
    assert_eq!(second[0].blocks, vec![BlockSpan::new(16384, 16384)]);
}

#[tokio::test]
async fn test_release_on_disconnect() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    let a = PeerToken::mint();
    let guard = h.scheduler.session_guard(a);
    let picked = h.scheduler.pick_blocks(a, t, have(&[0]), 10).await.unwrap();
    assert_eq!(picked.block_count(), 2);

    // Peer A dies; its reservations must be released before B's pick runs.
    drop(guard);

    let b = PeerToken::mint();
    let picked = h.scheduler.pick_blocks(b, t, have(&[0]), 10).await.unwrap();
    assert_eq!(
        picked,
        Picked::Normal(vec![PieceBlocks {
            piece: 0,
            blocks: vec![BlockSpan::new(0, 16384), BlockSpan::new(16384, 16384)],
        }])
    );
}

#[tokio::test]
async fn test_putback_round_trip() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 65536);

    let a = PeerToken::mint();
    h.scheduler
        .pick_blocks(a, t, have(&[0, 1]), 10)
        .await
        .unwrap();

    let during = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(during.assigned, 4);
    assert_eq!(during.not_fetched, 0);

    h.scheduler.putback(a).await.unwrap();

    let after = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(after.assigned, 0);
    assert_eq!(after.not_fetched, 4);
}

#[tokio::test]
async fn test_completion_fires_once() {
    let mut h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    let a = PeerToken::mint();
    h.scheduler.pick_blocks(a, t, have(&[0]), 10).await.unwrap();

    h.scheduler
        .store_block(t, 0, 0, block_data(16384))
        .await
        .unwrap();
    h.scheduler
        .store_block(t, 0, 16384, block_data(16384))
        .await
        .unwrap();

    let call = timeout(Duration::from_secs(5), h.verified.recv())
        .await
        .expect("verifier not invoked")
        .unwrap();
    assert_eq!(call, (t, 0));
    assert!(h.catalog.is_fetched(t, 0));

    let stats = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.total(), 0);

    assert_eq!(h.sink.block(t, 0, 0).unwrap().len(), 16384);
    assert_eq!(h.sink.block(t, 0, 16384).unwrap().len(), 16384);
}

#[tokio::test]
async fn test_duplicate_store_is_safe() {
    let mut h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    let a = PeerToken::mint();
    h.scheduler.pick_blocks(a, t, have(&[0]), 10).await.unwrap();

    for _ in 0..2 {
        h.scheduler
            .store_block(t, 0, 0, block_data(16384))
            .await
            .unwrap();
    }
    h.scheduler
        .store_block(t, 0, 16384, block_data(16384))
        .await
        .unwrap();

    let call = timeout(Duration::from_secs(5), h.verified.recv())
        .await
        .expect("verifier not invoked")
        .unwrap();
    assert_eq!(call, (t, 0));

    // A replay after finalization must not re-create entries or re-verify.
    h.scheduler
        .store_block(t, 0, 16384, block_data(16384))
        .await
        .unwrap();
    let stats = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.total(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.verified.try_recv().is_err());
}

#[tokio::test]
async fn test_endgame_offers_remaining_block() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 49152, 49152);

    let a = PeerToken::mint();
    h.scheduler.pick_blocks(a, t, have(&[0]), 3).await.unwrap();
    h.scheduler
        .store_block(t, 0, 0, block_data(16384))
        .await
        .unwrap();
    h.scheduler
        .store_block(t, 0, 16384, block_data(16384))
        .await
        .unwrap();

    h.catalog.enter_endgame(t);

    let b = PeerToken::mint();
    let picked = h.scheduler.pick_blocks(b, t, have(&[0]), 5).await.unwrap();
    assert_eq!(
        picked,
        Picked::Endgame(vec![PieceBlocks {
            piece: 0,
            blocks: vec![BlockSpan::new(32768, 16384)],
        }])
    );

    // Endgame assignments are not reservations.
    let stats = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.assigned, 1);
}

#[tokio::test]
async fn test_endgame_duplicates_across_peers() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    let a = PeerToken::mint();
    h.scheduler.pick_blocks(a, t, have(&[0]), 10).await.unwrap();
    h.catalog.enter_endgame(t);

    let b = PeerToken::mint();
    let c = PeerToken::mint();
    let picked_b = h.scheduler.pick_blocks(b, t, have(&[0]), 10).await.unwrap();
    let picked_c = h.scheduler.pick_blocks(c, t, have(&[0]), 10).await.unwrap();

    for picked in [&picked_b, &picked_c] {
        let Picked::Endgame(groups) = picked else {
            panic!("expected endgame pick, got {:?}", picked);
        };
        let mut offsets: Vec<u32> = groups
            .iter()
            .flat_map(|g| g.blocks.iter().map(|b| b.offset))
            .collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, 16384]);
    }
}

#[tokio::test]
async fn test_endgame_release() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    let a = PeerToken::mint();
    h.scheduler.pick_blocks(a, t, have(&[0]), 10).await.unwrap();

    h.scheduler.endgame_release(a, t, 0, 0, 16384).await.unwrap();
    let stats = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.assigned, 1);

    // Releasing a locator the peer does not hold is a no-op.
    h.scheduler.endgame_release(a, t, 0, 0, 16384).await.unwrap();
    let stats = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.assigned, 1);
}

#[tokio::test]
async fn test_purge_on_owner_death() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 65536);

    let owner = PeerToken::mint();
    let guard = h.scheduler.session_guard(owner);
    h.scheduler.register_torrent(t, owner).await.unwrap();

    let a = PeerToken::mint();
    h.scheduler
        .pick_blocks(a, t, have(&[0, 1]), 10)
        .await
        .unwrap();
    assert_eq!(h.scheduler.index_stats(t).await.unwrap().total(), 4);

    drop(guard);

    // Any request-reply operation after the drop observes the purge.
    let stats = h.scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.total(), 0);
}

#[tokio::test]
async fn test_mark_fetched() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);
    h.scheduler.chunkify(t, 0).await.unwrap();

    let outcome = h.scheduler.mark_fetched(t, 0, 16384, 16384).await.unwrap();
    assert_eq!(outcome, MarkOutcome::Found);

    let outcome = h.scheduler.mark_fetched(t, 0, 16384, 16384).await.unwrap();
    assert_eq!(outcome, MarkOutcome::Assigned);
}

#[tokio::test]
async fn test_select_by_piece() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);
    h.scheduler.chunkify(t, 0).await.unwrap();

    let a = PeerToken::mint();
    let selection = h.scheduler.select_by_piece(a, t, 0, 8).await.unwrap();
    assert_eq!(
        selection,
        Selection::Taken(PieceBlocks {
            piece: 0,
            blocks: vec![BlockSpan::new(0, 16384), BlockSpan::new(16384, 16384)],
        })
    );

    let b = PeerToken::mint();
    let selection = h.scheduler.select_by_piece(b, t, 0, 8).await.unwrap();
    assert_eq!(selection, Selection::AlreadyTaken);
}

#[tokio::test]
async fn test_chunkify_twice_fails() {
    let h = harness();
    let t = test_torrent();
    h.catalog.add_torrent(t, 32768, 32768);

    h.scheduler.chunkify(t, 0).await.unwrap();
    assert_eq!(
        h.scheduler.chunkify(t, 0).await,
        Err(SchedulerError::Catalog(CatalogError::AlreadyChunked(0)))
    );
}

#[tokio::test]
async fn test_failed_write_leaves_block_reserved() {
    let catalog = Arc::new(TorrentCatalog::new());
    let (calls, mut verified) = mpsc::unbounded_channel();
    let verifier = Arc::new(RecordingVerifier { calls });
    let scheduler = Scheduler::spawn(catalog.clone(), Arc::new(FailingSink), verifier);

    let t = test_torrent();
    catalog.add_torrent(t, 32768, 32768);

    let a = PeerToken::mint();
    scheduler.pick_blocks(a, t, have(&[0]), 10).await.unwrap();
    scheduler
        .store_block(t, 0, 0, block_data(16384))
        .await
        .unwrap();

    let stats = scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.assigned, 2);
    assert_eq!(stats.fetched, 0);
    assert!(verified.try_recv().is_err());

    // The eventual disconnect re-queues the block.
    scheduler.notify_down(a);
    let stats = scheduler.index_stats(t).await.unwrap();
    assert_eq!(stats.not_fetched, 2);
    assert_eq!(stats.assigned, 0);
}

#[test]
fn test_putback_conservation_random() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(0xB10C5);
    let t = test_torrent();
    let mut index = super::block_index::BlockIndex::new();
    let peers: Vec<PeerToken> = (0..4).map(|_| PeerToken::mint()).collect();

    const PIECES: u32 = 6;
    const BLOCKS_PER_PIECE: u32 = 3;
    for piece in 0..PIECES {
        index.insert_chunked(t, piece, &chunk_blocks(BLOCKS_PER_PIECE * 16384));
    }

    let mut taken = 0usize;
    for _ in 0..400 {
        match rng.random_range(0..4) {
            0 | 1 => {
                let piece = rng.random_range(0..PIECES);
                let peer = peers[rng.random_range(0..peers.len())];
                let max = rng.random_range(1..=BLOCKS_PER_PIECE as usize);
                index.reserve(t, piece, max, peer);
            }
            2 => {
                let peer = peers[rng.random_range(0..peers.len())];
                let before = index.stats(t);
                let held = index.assigned_count(peer);
                let released = index.putback(peer);
                assert_eq!(released, held);
                let after = index.stats(t);
                assert_eq!(after.not_fetched, before.not_fetched + held);
                assert_eq!(after.assigned, before.assigned - held);
                assert_eq!(index.assigned_count(peer), 0);
            }
            _ => {
                let piece = rng.random_range(0..PIECES);
                let offset = rng.random_range(0..BLOCKS_PER_PIECE) * 16384;
                if index.take_not_fetched(t, piece, offset, 16384) {
                    taken += 1;
                }
            }
        }

        // Reservations move entries between states, never create or lose
        // them: the in-flight population only shrinks via take.
        let stats = index.stats(t);
        assert_eq!(
            stats.not_fetched + stats.assigned,
            (PIECES * BLOCKS_PER_PIECE) as usize - taken
        );
    }
}

#[tokio::test]
async fn test_random_op_sequences_keep_index_consistent() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    let mut rng = StdRng::seed_from_u64(0x5EED);
    let h = harness();
    let t = test_torrent();

    const PIECES: u32 = 4;
    const BLOCKS_PER_PIECE: u32 = 3;
    h.catalog.add_torrent(
        t,
        BLOCKS_PER_PIECE * 16384,
        (PIECES * BLOCKS_PER_PIECE) as u64 * 16384,
    );

    let peers: Vec<PeerToken> = (0..3).map(|_| PeerToken::mint()).collect();
    let all_pieces: Vec<u32> = (0..PIECES).collect();

    // External model of the index, kept in lockstep with the actor.
    let mut held: HashMap<PeerToken, BTreeSet<(u32, u32)>> =
        peers.iter().map(|&p| (p, BTreeSet::new())).collect();
    let mut stored: BTreeSet<(u32, u32)> = BTreeSet::new();
    let mut completed: BTreeSet<u32> = BTreeSet::new();

    for _ in 0..150 {
        match rng.random_range(0..4) {
            0 | 1 => {
                let peer = peers[rng.random_range(0..peers.len())];
                let budget = rng.random_range(1..6usize);
                let picked = h
                    .scheduler
                    .pick_blocks(peer, t, have(&all_pieces), budget)
                    .await
                    .unwrap();
                assert!(picked.block_count() <= budget);
                if let Picked::Normal(groups) = picked {
                    for group in groups {
                        for span in group.blocks {
                            let locator = (group.piece, span.offset);
                            // A block handed out during normal play is
                            // reserved by nobody else.
                            for set in held.values() {
                                assert!(!set.contains(&locator));
                            }
                            held.get_mut(&peer).unwrap().insert(locator);
                        }
                    }
                }
            }
            2 => {
                let peer = peers[rng.random_range(0..peers.len())];
                h.scheduler.putback(peer).await.unwrap();
                held.get_mut(&peer).unwrap().clear();
            }
            _ => {
                // Deliver one of the blocks currently in flight.
                let in_flight: Vec<(PeerToken, (u32, u32))> = held
                    .iter()
                    .flat_map(|(&p, set)| set.iter().map(move |&loc| (p, loc)))
                    .collect();
                if in_flight.is_empty() {
                    continue;
                }
                let (peer, (piece, offset)) = in_flight[rng.random_range(0..in_flight.len())];
                h.scheduler
                    .store_block(t, piece, offset, block_data(16384))
                    .await
                    .unwrap();
                held.get_mut(&peer).unwrap().remove(&(piece, offset));
                stored.insert((piece, offset));
                if (0..BLOCKS_PER_PIECE).all(|b| stored.contains(&(piece, b * 16384))) {
                    completed.insert(piece);
                }
            }
        }

        let stats = h.scheduler.index_stats(t).await.unwrap();
        let assigned: usize = held.values().map(|set| set.len()).sum();
        let fetched_live = stored
            .iter()
            .filter(|(piece, _)| !completed.contains(piece))
            .count();
        let live_blocks = ((PIECES - completed.len() as u32) * BLOCKS_PER_PIECE) as usize;
        assert_eq!(stats.assigned, assigned);
        assert_eq!(stats.fetched, fetched_live);
        assert_eq!(stats.not_fetched, live_blocks - assigned - fetched_live);
    }
}

#[test]
fn test_index_endgame_blocks_dedup() {
    let t = test_torrent();
    let mut index = super::block_index::BlockIndex::new();
    index.insert_chunked(t, 0, &chunk_blocks(32768));

    let a = PeerToken::mint();
    let b = PeerToken::mint();
    index.reserve(t, 0, 2, a);
    index.putback(a);
    // One block unassigned, one reserved by B: the collection spans both.
    index.reserve(t, 0, 1, b);

    let have: BTreeSet<u32> = [0].into_iter().collect();
    let blocks = index.endgame_blocks(t, &have);
    let offsets: Vec<u32> = blocks.iter().map(|(_, span)| span.offset).collect();
    assert_eq!(offsets, vec![0, 16384]);
}

#[test]
fn test_piece_blocks_requests() {
    let group = PieceBlocks {
        piece: 4,
        blocks: vec![BlockSpan::new(0, 16384), BlockSpan::new(16384, 100)],
    };
    let requests = group.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].piece, 4);
    assert_eq!(requests[1].offset, 16384);
    assert_eq!(requests[1].length, 100);
}
