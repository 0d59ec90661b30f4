use std::collections::HashMap;
use std::time::Instant;

use crate::constants::{HIGH_WATERMARK, LOW_WATERMARK, REQUEST_TIMEOUT};

/// A request for a specific block of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    /// The piece index.
    pub piece: u32,
    /// Byte offset within the piece.
    pub offset: u32,
    /// Length of the block in bytes.
    pub length: u32,
}

impl BlockRequest {
    /// Creates a new block request.
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }
}

/// Outstanding-request bookkeeping for one peer session.
///
/// A session keeps between [`LOW_WATERMARK`] and [`HIGH_WATERMARK`] requests
/// in flight: when the count drops below the low mark it asks the scheduler
/// for enough blocks to refill to the high mark. The queue also tracks when
/// each request was sent so stale requests can be re-issued.
///
/// Requests removed from the queue without completing (choke, stale drain)
/// are still reserved in the scheduler; the session must hand them back via
/// `putback` or `endgame_release`.
#[derive(Debug, Default)]
pub struct RequestQueue {
    outstanding: HashMap<BlockRequest, Instant>,
}

impl RequestQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// How many more blocks this session should request right now.
    ///
    /// Zero while the queue sits between the watermarks; once it drops below
    /// the low mark, enough to refill to the high mark.
    pub fn wants(&self) -> usize {
        if self.outstanding.len() < LOW_WATERMARK {
            HIGH_WATERMARK - self.outstanding.len()
        } else {
            0
        }
    }

    /// Adds requests to the queue, skipping any already in flight.
    ///
    /// Returns the requests that were actually added, in input order; only
    /// those should go out on the wire. The running set is updated as each
    /// request is admitted, so a duplicate later in the same batch is also
    /// skipped.
    pub fn enqueue<I>(&mut self, requests: I) -> Vec<BlockRequest>
    where
        I: IntoIterator<Item = BlockRequest>,
    {
        let now = Instant::now();
        let mut admitted = Vec::new();
        for request in requests {
            if self.outstanding.contains_key(&request) {
                continue;
            }
            self.outstanding.insert(request, now);
            admitted.push(request);
        }
        admitted
    }

    /// Marks a request as completed. Returns false if it was not in flight
    /// (a duplicate or already-drained block, common during endgame).
    pub fn complete(&mut self, piece: u32, offset: u32, length: u32) -> bool {
        self.outstanding
            .remove(&BlockRequest::new(piece, offset, length))
            .is_some()
    }

    /// Removes and returns every in-flight request, oldest first.
    ///
    /// Used when the remote chokes us: the caller cancels the wire requests
    /// and surrenders the reservations to the scheduler.
    pub fn drain(&mut self) -> Vec<BlockRequest> {
        let mut drained: Vec<(BlockRequest, Instant)> = self.outstanding.drain().collect();
        drained.sort_by_key(|&(_, sent_at)| sent_at);
        drained.into_iter().map(|(request, _)| request).collect()
    }

    /// Removes and returns requests that have been outstanding longer than
    /// [`REQUEST_TIMEOUT`].
    pub fn drain_stale(&mut self) -> Vec<BlockRequest> {
        let now = Instant::now();
        let stale: Vec<BlockRequest> = self
            .outstanding
            .iter()
            .filter(|(_, &sent_at)| now.duration_since(sent_at) > REQUEST_TIMEOUT)
            .map(|(&request, _)| request)
            .collect();
        for request in &stale {
            self.outstanding.remove(request);
        }
        stale
    }
}
