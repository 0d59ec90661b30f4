use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a peer session or torrent owner.
///
/// Tokens are minted process-wide and never reused, so a token uniquely
/// names one session for the lifetime of the scheduler. The scheduler stores
/// only the token, never the session's state, which keeps the reference
/// graph between sessions and the scheduler acyclic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerToken(u64);

impl PeerToken {
    /// Mints a fresh token.
    pub fn mint() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw token value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PeerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerToken({})", self.0)
    }
}

impl fmt::Display for PeerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}
