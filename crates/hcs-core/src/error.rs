//! Error kinds surfaced at the core boundary.
//!
//! Per-tile failures are handled inside the workers and recorded as validity
//! bits; everything that escapes a public API is one of these kinds.

/// Error types for analysis, persistence, and query operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input such as a bad filename regex, a duplicate experiment
    /// id, or a colliding plate id.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced entity is absent from the store, e.g. an image file name
    /// or a class id no project class carries.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored rows violate an invariant, e.g. a parent object id without a
    /// parent class id that the repair migration could not resolve.
    #[error("corrupted: {0}")]
    Corrupted(String),

    /// Not enough memory to hold a tile in flight; the tile is marked
    /// invalid and skipped.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The job was stopped by the user; no finished timestamp is recorded.
    #[error("cancelled")]
    Cancelled,

    /// Generic error wrapper
    ///
    /// Wraps any other error type using anyhow::Error for flexible error
    /// handling while maintaining error context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True when the error represents a user-initiated stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
