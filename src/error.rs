//! Error types shared across the engine.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the adapter boundary, the patch applier, and the
/// persistence layer.
///
/// Diff computation itself is infallible: props are compared structurally and
/// malformed key sets degrade to documented behavior instead of erroring.
#[derive(Debug, Error)]
pub enum Error {
    /// The host adapter rejected an operation.
    #[error("adapter: {0}")]
    Adapter(String),

    /// An operation referenced a handle that was never created or was
    /// already detached from the live tree.
    #[error("operation against a detached or unknown handle")]
    DetachedHandle,

    /// A patch operation targeted a node that has no committed handle yet.
    #[error("node has no committed handle")]
    UncommittedNode,

    /// Persistence lookup miss. Distinguishable so callers can fall back to
    /// defaults for a first run.
    #[error("no saved state under key {key:?}")]
    NotFound { key: String },

    /// Persistence backend I/O failure.
    #[error("storage i/o")]
    Io(#[from] std::io::Error),

    /// Persistence encode/decode failure.
    #[error("storage encoding")]
    Encoding(#[from] serde_json::Error),
}

impl Error {
    /// True when this error is the benign "nothing saved yet" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
