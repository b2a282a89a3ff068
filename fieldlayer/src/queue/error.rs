use thiserror::Error;

use super::entry::EntryId;

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue entry {0} not found")]
    NotFound(EntryId),

    /// The claim no longer owns the entry (reaped, or already finished).
    #[error("claim on {id} lost its lease {lease}")]
    LeaseLost { id: EntryId, lease: u64 },

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is malformed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported snapshot version {0}")]
    UnsupportedSnapshot(u32),
}
