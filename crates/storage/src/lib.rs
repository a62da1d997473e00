//! Key/value storage abstraction.
//!
//! The state store and the indexers talk to storage through the
//! [`KvStore`] trait: point reads and writes, atomic synced batches, and
//! ordered range iteration. Two backends are provided:
//!
//! - [`MemoryKv`]: a BTreeMap behind a lock, for tests and simulation.
//!   Each test constructs an isolated store.
//! - [`RocksKv`]: RocksDB for production, with synchronous durability on
//!   batch commits.
//!
//! All operations are synchronous blocking I/O. Callers in async contexts
//! should use `spawn_blocking` if needed to avoid blocking the runtime.

mod memory;
mod rocks;

pub use memory::MemoryKv;
pub use rocks::{RocksConfig, RocksKv};

use thiserror::Error;

/// Errors surfaced by storage backends. I/O failures are passed through
/// verbatim; callers treat them as fatal for durable state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Backend(String),
}

/// A single write operation inside a [`Batch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered group of writes applied atomically.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Set(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Ordered key/value storage.
///
/// Implementations must apply [`KvStore::write_sync`] batches atomically:
/// either every operation in the batch becomes durable or none does.
/// Readers running concurrently with a batch observe either the pre-batch
/// or post-batch view, never a mix.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Durably write a single key.
    fn set_sync(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Durably delete a single key.
    fn delete_sync(&self, key: &[u8]) -> Result<(), StorageError>;

    /// Atomically and durably apply a batch.
    fn write_sync(&self, batch: Batch) -> Result<(), StorageError>;

    /// Iterate keys in `[start, end)` in ascending order. An `end` of
    /// `None` iterates to the end of the keyspace.
    fn iter_range<'a>(
        &'a self,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>, StorageError>;

    /// Iterate every key sharing `prefix`, in ascending order.
    fn iter_prefix<'a>(
        &'a self,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>, StorageError> {
        match next_prefix(prefix) {
            Some(end) => self.iter_range(prefix, Some(&end)),
            None => self.iter_range(prefix, None),
        }
    }

    /// Compact the whole keyspace. A no-op for backends without
    /// compaction.
    fn compact_all(&self) -> Result<(), StorageError>;
}

/// Smallest key strictly greater than every key with the given prefix,
/// or `None` when no such key exists (all-0xFF prefixes).
pub fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_prefix_increments_last_byte() {
        assert_eq!(next_prefix(b"abc"), Some(b"abd".to_vec()));
    }

    #[test]
    fn next_prefix_carries_past_ff() {
        assert_eq!(next_prefix(&[0x61, 0xff]), Some(vec![0x62]));
        assert_eq!(next_prefix(&[0xff, 0xff]), None);
        assert_eq!(next_prefix(&[]), None);
    }
}
