//! Disk sink and piece verification.
//!
//! The scheduler hands completed blocks to a [`ChunkSink`] and finalized
//! pieces to a [`PieceVerifier`]; both are traits so embedders can bring
//! their own disk layer.
//!
//! # Components
//!
//! - [`ChunkSink`] - Durable, idempotent block writes
//! - [`MemorySink`] - In-memory sink for tests and embedding
//! - [`FileSink`] - Flat per-torrent data files on disk
//! - [`PieceVerifier`] - Off-actor piece hash checking
//! - [`Sha1Verifier`] - SHA-1 verification against known piece hashes

mod error;
mod file;
mod sink;
mod verifier;

pub use error::StorageError;
pub use file::FileSink;
pub use sink::{ChunkSink, MemorySink};
pub use verifier::{PieceVerifier, Sha1Verifier, VerifyOutcome};
