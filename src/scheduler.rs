//! The chunk scheduling core.
//!
//! Decides which blocks each peer session requests next, tracks which blocks
//! are in flight to which peer, accepts completed blocks, detects piece
//! completion, and drives the endgame phase.
//!
//! The core is a single serialized actor ([`Scheduler`]) owning the block
//! index; many peer sessions talk to it concurrently through a cloneable
//! [`SchedulerHandle`], and the actor is the linearization point for every
//! reservation. During normal play a block is assigned to at most one peer;
//! endgame deliberately hands the same blocks to several peers and
//! reconciles the duplicates on store.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rsched::catalog::{TorrentCatalog, TorrentId};
//! use rsched::peer::PeerToken;
//! use rsched::scheduler::Scheduler;
//! use rsched::storage::{FileSink, Sha1Verifier};
//!
//! # async fn example() -> Result<(), rsched::scheduler::SchedulerError> {
//! let catalog = Arc::new(TorrentCatalog::new());
//! let sink = Arc::new(FileSink::new("/tmp/data".into()));
//! let verifier = Arc::new(Sha1Verifier::new(sink.clone()));
//!
//! let torrent = TorrentId::from_bytes([0u8; 20]);
//! catalog.add_torrent(torrent, 262144, 26214400);
//! sink.register(torrent, 262144, 26214400);
//!
//! let scheduler = Scheduler::spawn(catalog, sink, verifier);
//! let session = PeerToken::mint();
//! let _guard = scheduler.session_guard(session);
//! scheduler.register_torrent(torrent, session).await?;
//! # Ok(())
//! # }
//! ```

mod actor;
mod block_index;
mod error;
mod handle;
mod liveness;

pub use actor::{MarkOutcome, Picked, PieceBlocks, Scheduler, Selection};
pub use block_index::IndexStats;
pub use error::SchedulerError;
pub use handle::{SchedulerHandle, SessionGuard};

#[cfg(test)]
mod tests;
