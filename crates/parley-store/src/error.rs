use parley_shared::{ProtocolError, RoomId};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure reading or replacing a file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode a record.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A room log exists but does not parse. Mutations refuse to touch it.
    #[error("Corrupt log for room {room}: {source}")]
    CorruptLog {
        room: RoomId,
        #[source]
        source: serde_json::Error,
    },

    /// Room id outside the path-safe alphabet.
    #[error("Invalid identifier: {0}")]
    InvalidId(#[from] ProtocolError),

    #[error("Path traversal detected")]
    PathTraversal,

    #[error("Upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: usize, max: usize },

    #[error("Empty upload")]
    EmptyUpload,

    #[error("Record not found")]
    NotFound,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
