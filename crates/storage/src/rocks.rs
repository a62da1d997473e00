//! RocksDB storage backend.

use crate::{Batch, BatchOp, KvStore, StorageError};
use rocksdb::{Options, WriteBatch, WriteOptions, DB};
use std::path::Path;
use std::sync::Arc;

/// RocksDB tuning knobs.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    /// Maximum number of background compaction/flush jobs.
    pub max_background_jobs: i32,
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    pub keep_log_file_num: usize,
    /// Block cache size in bytes; `None` uses the RocksDB default.
    pub block_cache_size: Option<usize>,
    /// Bloom filter bits per key; `0.0` disables bloom filters.
    pub bloom_filter_bits: f64,
}

impl Default for RocksConfig {
    fn default() -> Self {
        RocksConfig {
            max_background_jobs: 4,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 4,
            keep_log_file_num: 10,
            block_cache_size: Some(256 * 1024 * 1024),
            bloom_filter_bits: 10.0,
        }
    }
}

/// RocksDB-backed storage for production use.
///
/// RocksDB is internally synchronized, so all operations take `&self`;
/// batch commits use sync writes so a crash never loses an acknowledged
/// save.
pub struct RocksKv {
    db: Arc<DB>,
}

impl RocksKv {
    /// Open or create a database at the given path with default tuning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_config(path, RocksConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: RocksConfig,
    ) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(config.max_background_jobs);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_keep_log_file_num(config.keep_log_file_num);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        if let Some(cache_size) = config.block_cache_size {
            let cache = rocksdb::Cache::new_lru_cache(cache_size);
            block_opts.set_block_cache(&cache);
        }
        if config.bloom_filter_bits > 0.0 {
            block_opts.set_bloom_filter(config.bloom_filter_bits, false);
        }
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, path).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(RocksKv { db: Arc::new(db) })
    }

    fn sync_write_opts() -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        write_opts
    }
}

impl KvStore for RocksKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn set_sync(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db
            .put_opt(key, value, &Self::sync_write_opts())
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn delete_sync(&self, key: &[u8]) -> Result<(), StorageError> {
        self.db
            .delete_opt(key, &Self::sync_write_opts())
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn write_sync(&self, batch: Batch) -> Result<(), StorageError> {
        let mut wb = WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set(key, value) => wb.put(&key, &value),
                BatchOp::Delete(key) => wb.delete(&key),
            }
        }
        self.db
            .write_opt(wb, &Self::sync_write_opts())
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn iter_range<'a>(
        &'a self,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>, StorageError> {
        let iter = self.db.iterator(rocksdb::IteratorMode::From(
            start,
            rocksdb::Direction::Forward,
        ));
        let end = end.map(|e| e.to_vec());
        Ok(Box::new(
            iter.take_while(move |item| match (item, &end) {
                (Ok((key, _)), Some(end)) => key.as_ref() < end.as_slice(),
                (Ok(_), None) => true,
                (Err(_), _) => false,
            })
            .filter_map(|item| item.ok().map(|(k, v)| (k.to_vec(), v.to_vec()))),
        ))
    }

    fn compact_all(&self) -> Result<(), StorageError> {
        self.db.compact_range::<&[u8], &[u8]>(None, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_write_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let kv = RocksKv::open(dir.path()).unwrap();
            let mut batch = Batch::new();
            batch.set(b"k1".to_vec(), b"v1".to_vec());
            batch.set(b"k2".to_vec(), b"v2".to_vec());
            kv.write_sync(batch).unwrap();
        }
        let kv = RocksKv::open(dir.path()).unwrap();
        assert_eq!(kv.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(kv.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn range_iteration_respects_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let kv = RocksKv::open(dir.path()).unwrap();
        for key in [&b"a"[..], b"b", b"c", b"d"] {
            kv.set_sync(key, b"x").unwrap();
        }
        let keys: Vec<Vec<u8>> = kv
            .iter_range(b"b", Some(b"d"))
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn compaction_is_callable() {
        let dir = tempfile::tempdir().unwrap();
        let kv = RocksKv::open(dir.path()).unwrap();
        kv.set_sync(b"k", b"v").unwrap();
        kv.delete_sync(b"k").unwrap();
        kv.compact_all().unwrap();
    }
}
