use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors surfaced to scheduler callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler actor has shut down; no further operations complete.
    #[error("scheduler is shut down")]
    Closed,

    /// A catalog operation failed (invalid piece, unknown torrent, ...).
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
