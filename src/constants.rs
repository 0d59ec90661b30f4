//! Protocol constants and tuning parameters.
//!
//! This module contains the constants used by the scheduling core: the block
//! layout, the request-pipeline watermarks, and the actor mailbox sizing.
//!
//! These values are based on defaults from popular clients like qBittorrent,
//! Transmission, and libtorrent.

use std::time::Duration;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard wire block size (16KB). Every piece is split into blocks of this
/// size, with a final short block when the piece length is not a multiple.
pub const BLOCK_SIZE: u32 = 16384;

/// Maximum request length per BEP 3 (128KB). Requests larger than this are suspicious.
pub const MAX_REQUEST_LENGTH: u32 = 131072;

// ============================================================================
// Request pipeline
// ============================================================================

/// When a session's outstanding-request count drops below this, it should ask
/// the scheduler for more blocks.
pub const LOW_WATERMARK: usize = 5;

/// Maximum outstanding block requests a session keeps in flight.
pub const HIGH_WATERMARK: usize = 30;

/// How long a block request may stay outstanding before the session treats it
/// as stale and re-requests it elsewhere.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Scheduler actor
// ============================================================================

/// Command mailbox depth of the scheduler actor. Fire-and-forget senders are
/// backpressured once this fills.
pub const SCHEDULER_MAILBOX: usize = 256;
