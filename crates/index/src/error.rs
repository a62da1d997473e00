//! Indexer errors.

use crate::keys::KeyDecodeError;
use crate::query::QueryError;
use basalt_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the block and tx indexers.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The composite key is maintained by the indexer itself and may not
    /// appear as an event attribute.
    #[error("event type and attribute key {composite:?} is reserved; use a different key")]
    ReservedKey { composite: String },

    #[error("invalid height value {height}")]
    InvalidHeightValue { height: i64 },

    #[error("key not found")]
    KeyNotFound,

    #[error("failed to decode index key: {0}")]
    KeyDecode(#[from] KeyDecodeError),

    #[error("failed to decode stored {what}: {detail}")]
    Codec { what: &'static str, detail: String },

    #[error("invalid query: {0}")]
    Query(#[from] QueryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
