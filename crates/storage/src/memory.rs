//! In-memory storage backend.

use crate::{Batch, BatchOp, KvStore, StorageError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// BTreeMap-backed storage for tests and simulation.
///
/// Batches apply under a single write lock, so readers always observe
/// complete batches.
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        MemoryKv::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set_sync(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete_sync(&self, key: &[u8]) -> Result<(), StorageError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn write_sync(&self, batch: Batch) -> Result<(), StorageError> {
        let mut map = self.map.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter_range<'a>(
        &'a self,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>, StorageError> {
        let map = self.map.read();
        let upper = match end {
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        let items: Vec<(Vec<u8>, Vec<u8>)> = map
            .range((Bound::Included(start.to_vec()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(items.into_iter()))
    }

    fn compact_all(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_delete() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get(b"k").unwrap(), None);
        kv.set_sync(b"k", b"v").unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"v".to_vec()));
        kv.delete_sync(b"k").unwrap();
        assert_eq!(kv.get(b"k").unwrap(), None);
    }

    #[test]
    fn batch_applies_all_ops() {
        let kv = MemoryKv::new();
        kv.set_sync(b"stale", b"x").unwrap();

        let mut batch = Batch::new();
        batch.set(b"a".to_vec(), b"1".to_vec());
        batch.set(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"stale".to_vec());
        kv.write_sync(batch).unwrap();

        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(kv.get(b"stale").unwrap(), None);
    }

    #[test]
    fn prefix_iteration_is_ordered_and_bounded() {
        let kv = MemoryKv::new();
        kv.set_sync(b"a/1", b"1").unwrap();
        kv.set_sync(b"a/2", b"2").unwrap();
        kv.set_sync(b"b/1", b"3").unwrap();

        let keys: Vec<Vec<u8>> = kv
            .iter_prefix(b"a/")
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a/1".to_vec(), b"a/2".to_vec()]);
    }
}
