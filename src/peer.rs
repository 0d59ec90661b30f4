//! Peer-facing building blocks of the scheduling core.
//!
//! Peer sessions talk to the scheduler through opaque identity tokens and
//! block requests. This module provides those types plus the bookkeeping a
//! session keeps on its own side of the boundary: the remote bitfield and
//! the outstanding-request queue with its watermarks.

mod bitfield;
mod queue;
mod token;

pub use bitfield::Bitfield;
pub use queue::{BlockRequest, RequestQueue};
pub use token::PeerToken;
