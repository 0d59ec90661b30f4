//! rsched - chunk scheduling core for a BitTorrent client
//!
//! This library implements the subsystem that decides, for each connected
//! peer, which block-level requests to issue next: reservation tracking,
//! completion accounting, piece finalization, and the endgame phase that
//! accelerates the tail of a download.
//!
//! # Modules
//!
//! - [`scheduler`] - The serialized scheduling actor and its handle
//! - [`catalog`] - Per-torrent piece bookkeeping the scheduler consults
//! - [`peer`] - Identity tokens, bitfields, and request-queue bookkeeping
//! - [`storage`] - Disk sink and piece verification
//! - [`constants`] - Block layout and pipeline tuning parameters

pub mod catalog;
pub mod constants;
pub mod peer;
pub mod scheduler;
pub mod storage;

pub use catalog::{
    BlockSpan, CatalogError, Interest, MissingBlocks, PieceCatalog, PieceState, TorrentCatalog,
    TorrentId,
};
pub use peer::{Bitfield, BlockRequest, PeerToken, RequestQueue};
pub use scheduler::{
    IndexStats, MarkOutcome, Picked, PieceBlocks, Scheduler, SchedulerError, SchedulerHandle,
    Selection, SessionGuard,
};
pub use storage::{
    ChunkSink, FileSink, MemorySink, PieceVerifier, Sha1Verifier, StorageError, VerifyOutcome,
};
