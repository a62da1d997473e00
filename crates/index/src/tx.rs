//! The transaction indexer.
//!
//! Indexes per-transaction results by hash and by event attributes, so
//! typed queries resolve to the transactions that emitted them.
//!
//! # Key layout
//!
//! - Result: `hash → sbor(TxResult)`
//! - Height: `("tx.height", "<height>", height, index, 0) → hash`
//! - Event: `(composite, value, height, index, event_seq) → hash`

use crate::error::IndexError;
use crate::keys::{append_i64, append_str, KeyReader};
use crate::query::{parse_number, Op, Operand, Query};
use crate::search::{group_of, plan, GroupedCandidates, Plan};
use basalt_storage::{Batch, KvStore};
use basalt_types::TxResult;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reserved composite keys maintained by the indexer itself.
pub const TX_HASH_COMPOSITE: &str = "tx.hash";
pub const TX_HEIGHT_COMPOSITE: &str = "tx.height";

pub const LAST_TX_INDEXER_RETAIN_HEIGHT_KEY: &[u8] = b"LastTxIndexerRetainHeightKey";
pub const TX_INDEXER_RETAIN_HEIGHT_KEY: &[u8] = b"TxIndexerRetainHeightKey";

const PRUNE_BATCH_SIZE: usize = 1_000;

fn event_key(composite: &str, value: &str, height: i64, index: u32, seq: i64) -> Vec<u8> {
    let mut key = Vec::new();
    append_str(&mut key, composite);
    append_str(&mut key, value);
    append_i64(&mut key, height);
    append_i64(&mut key, index as i64);
    append_i64(&mut key, seq);
    key
}

fn prefix_of(parts: &[&str]) -> Vec<u8> {
    let mut prefix = Vec::new();
    for part in parts {
        append_str(&mut prefix, part);
    }
    prefix
}

/// A decoded tx-index event key.
struct ParsedKey {
    value: String,
    height: i64,
    seq: i64,
}

fn parse_key(key: &[u8]) -> Option<ParsedKey> {
    let mut reader = KeyReader::new(key);
    let _composite = reader.read_str().ok()?;
    let value = reader.read_str().ok()?;
    let height = reader.read_i64().ok()?;
    let _index = reader.read_i64().ok()?;
    let seq = reader.read_i64().ok()?;
    reader.finish().ok()?;
    Some(ParsedKey { value, height, seq })
}

/// Transaction indexer over a dedicated KV store.
pub struct TxIndexer {
    store: Arc<dyn KvStore>,
    event_seq: Mutex<i64>,
    compact: bool,
    compaction_interval: i64,
    last_pruned: Mutex<i64>,
}

impl TxIndexer {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        TxIndexer {
            store,
            event_seq: Mutex::new(0),
            compact: false,
            compaction_interval: 1_000,
            last_pruned: Mutex::new(0),
        }
    }

    /// Enable compaction of the underlying store after
    /// `compaction_interval` accumulated deletions.
    pub fn with_compaction(mut self, compact: bool, compaction_interval: i64) -> Self {
        self.compact = compact;
        self.compaction_interval = compaction_interval;
        self
    }

    /// Index one block's transaction results atomically.
    pub fn add_batch(&self, results: &[TxResult]) -> Result<(), IndexError> {
        let mut batch = Batch::new();
        for result in results {
            self.index_into(&mut batch, result)?;
        }
        self.store.write_sync(batch)?;
        debug!(num_txs = results.len(), "indexed transactions");
        Ok(())
    }

    /// Index a single transaction result.
    pub fn index(&self, result: &TxResult) -> Result<(), IndexError> {
        let mut batch = Batch::new();
        self.index_into(&mut batch, result)?;
        self.store.write_sync(batch)?;
        Ok(())
    }

    fn index_into(&self, batch: &mut Batch, result: &TxResult) -> Result<(), IndexError> {
        let hash = result.tx_hash();
        let hash_bytes = hash.as_bytes().to_vec();

        let mut seq = self.event_seq.lock();
        for event in &result.result.events {
            *seq += 1;
            if event.kind.is_empty() {
                continue;
            }
            for attr in &event.attributes {
                if attr.key.is_empty() {
                    continue;
                }
                let composite = format!("{}.{}", event.kind, attr.key);
                if composite == TX_HASH_COMPOSITE || composite == TX_HEIGHT_COMPOSITE {
                    return Err(IndexError::ReservedKey { composite });
                }
                if attr.index {
                    batch.set(
                        event_key(&composite, &attr.value, result.height, result.index, *seq),
                        hash_bytes.clone(),
                    );
                }
            }
        }

        batch.set(
            event_key(
                TX_HEIGHT_COMPOSITE,
                &result.height.to_string(),
                result.height,
                result.index,
                0,
            ),
            hash_bytes.clone(),
        );
        batch.set(
            hash_bytes,
            sbor::basic_encode(result).expect("tx result encoding cannot fail"),
        );
        Ok(())
    }

    /// Look up a transaction result by hash.
    pub fn get(&self, hash: &[u8]) -> Result<Option<TxResult>, IndexError> {
        match self.store.get(hash)? {
            None => Ok(None),
            Some(bytes) => {
                let result = sbor::basic_decode(&bytes).map_err(|e| IndexError::Codec {
                    what: "tx result",
                    detail: format!("{e:?}"),
                })?;
                Ok(Some(result))
            }
        }
    }

    /// Resolve a query to the matching transaction results, ordered by
    /// `(height, index)`. Cancellation discards partial results.
    pub fn search(
        &self,
        query: &Query,
        token: &CancellationToken,
    ) -> Result<Vec<TxResult>, IndexError> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        let conditions = query.conditions();

        // A hash equality resolves with a single point read; any other
        // conditions are then checked against the loaded result.
        if let Some(hash) = hash_equality(conditions) {
            let Some(result) = self.get(&hash)? else {
                return Ok(Vec::new());
            };
            let height = result.height.to_string();
            let ok = conditions.iter().all(|cond| {
                if cond.tag == TX_HASH_COMPOSITE {
                    true
                } else if cond.tag == TX_HEIGHT_COMPOSITE {
                    cond.matches_value(&height)
                } else {
                    cond.matches_any(&result.result.events)
                }
            });
            return Ok(if ok { vec![result] } else { Vec::new() });
        }

        let plan = plan(conditions, TX_HEIGHT_COMPOSITE);
        if plan.height_impossible {
            return Ok(Vec::new());
        }

        if plan.only_height {
            return self.scan_heights(&plan, token);
        }

        let mut groups: GroupedCandidates<Vec<u8>> = GroupedCandidates::new();
        let mut exhausted = false;

        for (tag, range) in &plan.ranges {
            let matches = self.match_range(tag, range, &plan, token)?;
            if token.is_cancelled() {
                return Ok(Vec::new());
            }
            if !groups.add(group_of(tag), matches) {
                exhausted = true;
                break;
            }
        }

        if !exhausted {
            for (i, cond) in conditions.iter().enumerate() {
                if plan.skip[i] {
                    continue;
                }
                let matches = self.match_condition(cond, &plan, token)?;
                if token.is_cancelled() {
                    return Ok(Vec::new());
                }
                if !groups.add(group_of(&cond.tag), matches) {
                    exhausted = true;
                    break;
                }
            }
        }

        if exhausted {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for hash in groups.into_result() {
            if token.is_cancelled() {
                return Ok(Vec::new());
            }
            if let Some(result) = self.get(&hash)? {
                results.push(result);
            }
        }
        results.sort_unstable_by_key(|r| (r.height, r.index));
        Ok(results)
    }

    /// Serve a height-only query from the height keys.
    fn scan_heights(
        &self,
        plan: &Plan,
        token: &CancellationToken,
    ) -> Result<Vec<TxResult>, IndexError> {
        let prefix = match plan.height_eq {
            // Height equality narrows the scan to one height's span.
            Some(h) => prefix_of(&[TX_HEIGHT_COMPOSITE, &h.to_string()]),
            None => prefix_of(&[TX_HEIGHT_COMPOSITE]),
        };
        let mut results = Vec::new();
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        for (key, hash) in self.store.iter_prefix(&prefix)? {
            if token.is_cancelled() {
                return Ok(Vec::new());
            }
            let Some(parsed) = parse_key(&key) else {
                continue;
            };
            if plan.height_allowed(parsed.height) && seen.insert(hash.clone()) {
                if let Some(result) = self.get(&hash)? {
                    results.push(result);
                }
            }
        }
        results.sort_unstable_by_key(|r| (r.height, r.index));
        Ok(results)
    }

    fn match_range(
        &self,
        tag: &str,
        range: &crate::search::NumRange,
        plan: &Plan,
        token: &CancellationToken,
    ) -> Result<HashSet<(Vec<u8>, i64)>, IndexError> {
        let prefix = prefix_of(&[tag]);
        let mut matches = HashSet::new();
        for (key, hash) in self.store.iter_prefix(&prefix)? {
            if token.is_cancelled() {
                return Ok(matches);
            }
            let Some(parsed) = parse_key(&key) else {
                continue;
            };
            let Some(number) = parse_number(&parsed.value) else {
                continue;
            };
            if range.contains(&number) && plan.height_allowed(parsed.height) {
                matches.insert((hash, parsed.seq));
            }
        }
        Ok(matches)
    }

    fn match_condition(
        &self,
        cond: &crate::query::Condition,
        plan: &Plan,
        token: &CancellationToken,
    ) -> Result<HashSet<(Vec<u8>, i64)>, IndexError> {
        let mut matches = HashSet::new();
        let prefixes = match cond.op {
            Op::Eq => {
                let literal = cond
                    .operand
                    .as_ref()
                    .map(Operand::literal)
                    .unwrap_or_default();
                vec![prefix_of(&[&cond.tag, literal])]
            }
            Op::Exists | Op::Contains => vec![prefix_of(&[&cond.tag])],
            // Ranges were extracted by the plan.
            Op::Lt | Op::Leq | Op::Gt | Op::Geq => return Ok(matches),
        };
        let needle = match (&cond.op, &cond.operand) {
            (Op::Contains, Some(Operand::String(s))) => Some(s.as_str()),
            (Op::Contains, _) => return Ok(matches),
            _ => None,
        };
        for prefix in prefixes {
            for (key, hash) in self.store.iter_prefix(&prefix)? {
                if token.is_cancelled() {
                    return Ok(matches);
                }
                let Some(parsed) = parse_key(&key) else {
                    continue;
                };
                if let Some(needle) = needle {
                    if !parsed.value.contains(needle) {
                        continue;
                    }
                }
                if plan.height_allowed(parsed.height) {
                    matches.insert((hash, parsed.seq));
                }
            }
        }
        Ok(matches)
    }

    /// Delete all index entries for heights in `[last retain, retain)`.
    /// Returns the number of affected heights and the new retain height.
    pub fn prune(&self, retain_height: i64) -> Result<(i64, i64), IndexError> {
        let last_retain = self.get_last_retain_height()?.max(1);
        if retain_height <= last_retain {
            return Ok((0, last_retain));
        }

        let mut batch = Batch::new();
        let mut affected: HashSet<i64> = HashSet::new();
        let mut deleted: i64 = 0;
        for (key, value) in self.store.iter_range(&[], None)? {
            let height = match parse_key(&key) {
                Some(parsed) => Some(parsed.height),
                // Hash-keyed entries carry their height in the value.
                None => sbor::basic_decode::<TxResult>(&value).ok().map(|r| r.height),
            };
            let Some(height) = height else {
                continue;
            };
            if height >= last_retain && height < retain_height {
                batch.delete(key);
                affected.insert(height);
                deleted += 1;
                if batch.len() >= PRUNE_BATCH_SIZE {
                    self.store.write_sync(std::mem::take(&mut batch))?;
                }
            }
        }
        batch.set(LAST_TX_INDEXER_RETAIN_HEIGHT_KEY, retain_height.to_be_bytes());
        self.store.write_sync(batch)?;
        debug!(retain_height, deleted, "pruned tx index");

        if self.compact {
            let mut acc = self.last_pruned.lock();
            *acc += deleted;
            if *acc >= self.compaction_interval {
                self.store.compact_all()?;
                *acc = 0;
            }
        }
        Ok((affected.len() as i64, retain_height))
    }

    /// Persist the retain height requested by a data companion.
    pub fn set_retain_height(&self, retain_height: i64) -> Result<(), IndexError> {
        if retain_height < 0 {
            return Err(IndexError::InvalidHeightValue {
                height: retain_height,
            });
        }
        self.store
            .set_sync(TX_INDEXER_RETAIN_HEIGHT_KEY, &retain_height.to_be_bytes())?;
        Ok(())
    }

    pub fn get_retain_height(&self) -> Result<i64, IndexError> {
        let height = self
            .get_i64(TX_INDEXER_RETAIN_HEIGHT_KEY)?
            .ok_or(IndexError::KeyNotFound)?;
        if height < 0 {
            return Err(IndexError::InvalidHeightValue { height });
        }
        Ok(height)
    }

    fn get_last_retain_height(&self) -> Result<i64, IndexError> {
        let height = self.get_i64(LAST_TX_INDEXER_RETAIN_HEIGHT_KEY)?.unwrap_or(0);
        if height < 0 {
            return Err(IndexError::InvalidHeightValue { height });
        }
        Ok(height)
    }

    fn get_i64(&self, key: &[u8]) -> Result<Option<i64>, IndexError> {
        match self.store.get(key)? {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| IndexError::Codec {
                    what: "stored height",
                    detail: format!("{} bytes", bytes.len()),
                })?;
                Ok(Some(i64::from_be_bytes(arr)))
            }
        }
    }
}

/// Extract a `tx.hash = '<hex>'` point query, if that is the only way the
/// conjunction constrains the hash.
fn hash_equality(conditions: &[crate::query::Condition]) -> Option<Vec<u8>> {
    conditions.iter().find_map(|c| {
        if c.tag == TX_HASH_COMPOSITE && c.op == Op::Eq {
            if let Some(Operand::String(s)) = &c.operand {
                return hex::decode(s).ok();
            }
        }
        None
    })
}
