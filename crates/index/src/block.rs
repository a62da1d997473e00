//! The block indexer.
//!
//! Indexes the events of every committed block by height, so typed
//! queries over event attributes resolve to block heights.
//!
//! # Key layout
//!
//! - Primary: `("block.height", height) → be64(height)`
//! - Event: `(composite, value, height, context, event_seq) → be64(height)`
//!
//! The event sequence is a per-indexer monotonic counter, so attributes
//! written by the same event share a sequence number and conjunctions can
//! insist on same-event matches.

use crate::error::IndexError;
use crate::keys::{append_i64, append_str, KeyReader};
use crate::query::{parse_number, Op, Operand, Query};
use crate::search::{group_of, plan, GroupedCandidates, Plan};
use basalt_storage::{Batch, KvStore};
use basalt_types::Event;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Reserved composite key for the primary height index.
pub const BLOCK_HEIGHT_COMPOSITE: &str = "block.height";

/// Context tags distinguishing where in block processing an event was
/// emitted.
pub const CONTEXT_FINALIZE_BLOCK: &str = "finalize_block";
pub const CONTEXT_BEGIN_BLOCK: &str = "begin_block";
pub const CONTEXT_END_BLOCK: &str = "end_block";

pub const LAST_BLOCK_INDEXER_RETAIN_HEIGHT_KEY: &[u8] = b"LastBlockIndexerRetainHeightKey";
pub const BLOCK_INDEXER_RETAIN_HEIGHT_KEY: &[u8] = b"BlockIndexerRetainHeightKey";

/// Pruning flushes its delete batch every this many deletions.
const PRUNE_BATCH_SIZE: usize = 1_000;

/// The event bundle of one committed block.
#[derive(Debug, Clone)]
pub struct BlockEvents {
    pub height: i64,
    pub events: Vec<Event>,
}

fn height_key(height: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(BLOCK_HEIGHT_COMPOSITE.len() + 10);
    append_str(&mut key, BLOCK_HEIGHT_COMPOSITE);
    append_i64(&mut key, height);
    key
}

fn event_key(composite: &str, value: &str, height: i64, context: &str, seq: i64) -> Vec<u8> {
    let mut key = Vec::new();
    append_str(&mut key, composite);
    append_str(&mut key, value);
    append_i64(&mut key, height);
    append_str(&mut key, context);
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

/// A decoded index key.
enum ParsedKey {
    Primary {
        height: i64,
    },
    Event {
        value: String,
        height: i64,
        seq: i64,
    },
}

/// Decode an index key. Returns `None` for keys that are not part of the
/// index layout (e.g. the retain-height scalars).
fn parse_key(key: &[u8]) -> Option<ParsedKey> {
    let mut reader = KeyReader::new(key);
    let composite = reader.read_str().ok()?;
    if composite == BLOCK_HEIGHT_COMPOSITE {
        let height = reader.read_i64().ok()?;
        reader.finish().ok()?;
        return Some(ParsedKey::Primary { height });
    }
    let value = reader.read_str().ok()?;
    let height = reader.read_i64().ok()?;
    let _context = reader.read_str().ok()?;
    let seq = reader.read_i64().ok()?;
    reader.finish().ok()?;
    Some(ParsedKey::Event { value, height, seq })
}

/// Block indexer over a KV store. The store is expected to be dedicated
/// to this indexer.
pub struct BlockIndexer {
    store: Arc<dyn KvStore>,
    /// Monotonic per-process disambiguator correlating attributes of the
    /// same event.
    event_seq: Mutex<i64>,
    compact: bool,
    compaction_interval: i64,
    /// Deletions accumulated toward the next compaction.
    last_pruned: Mutex<i64>,
}

impl BlockIndexer {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        BlockIndexer {
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

    /// Whether the given height has been indexed.
    pub fn has(&self, height: i64) -> Result<bool, IndexError> {
        Ok(self.store.has(&height_key(height))?)
    }

    /// Index one block's events. Writes the primary height key and one
    /// event key per indexable attribute, atomically.
    pub fn index(&self, block: &BlockEvents) -> Result<(), IndexError> {
        let mut batch = Batch::new();
        let height = block.height;

        batch.set(height_key(height), height.to_be_bytes());
        self.index_events(&mut batch, &block.events, height, CONTEXT_FINALIZE_BLOCK)?;

        self.store.write_sync(batch)?;
        info!(height, events = block.events.len(), "indexed block events");
        Ok(())
    }

    fn index_events(
        &self,
        batch: &mut Batch,
        events: &[Event],
        height: i64,
        context: &str,
    ) -> Result<(), IndexError> {
        let mut seq = self.event_seq.lock();
        for event in events {
            *seq += 1;
            // Only index events with a non-empty type.
            if event.kind.is_empty() {
                continue;
            }
            for attr in &event.attributes {
                if attr.key.is_empty() {
                    continue;
                }
                let composite = format!("{}.{}", event.kind, attr.key);
                if composite == BLOCK_HEIGHT_COMPOSITE {
                    return Err(IndexError::ReservedKey { composite });
                }
                if attr.index {
                    batch.set(
                        event_key(&composite, &attr.value, height, context, *seq),
                        height.to_be_bytes(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Resolve a query to the matching block heights, ascending and
    /// deduplicated. Cancellation discards partial results and returns
    /// the empty slice.
    pub fn search(&self, query: &Query, token: &CancellationToken) -> Result<Vec<i64>, IndexError> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        let conditions = query.conditions();
        let plan = plan(conditions, BLOCK_HEIGHT_COMPOSITE);
        if plan.height_impossible {
            return Ok(Vec::new());
        }

        // Pure height constraints never need the event keys.
        if plan.only_height {
            if let Some(h) = plan.height_eq {
                let found = self.has(h)? && plan.height_allowed(h);
                return Ok(if found { vec![h] } else { Vec::new() });
            }
            return self.scan_heights(&plan, token);
        }

        // Candidates are (height, event seq) pairs, accumulated per
        // event type: conditions on the same type must be satisfied by
        // the same event, conditions on different types combine per
        // height.
        let mut groups: GroupedCandidates<i64> = GroupedCandidates::new();
        let mut exhausted = false;

        // Ranges first: they iterate the widest prefix spans, and an
        // empty result short-circuits the whole conjunction.
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

        // Keep only heights whose primary key still exists (pruning may
        // race a search), deduplicate, and order.
        let mut results = Vec::new();
        for height in groups.into_result() {
            if token.is_cancelled() {
                return Ok(Vec::new());
            }
            if self.has(height)? {
                results.push(height);
            }
        }
        results.sort_unstable();
        Ok(results)
    }

    /// Scan the primary keys for a height-only range query.
    fn scan_heights(
        &self,
        plan: &Plan,
        token: &CancellationToken,
    ) -> Result<Vec<i64>, IndexError> {
        let prefix = prefix_of(&[BLOCK_HEIGHT_COMPOSITE]);
        let mut results = Vec::new();
        for (key, _) in self.store.iter_prefix(&prefix)? {
            if token.is_cancelled() {
                return Ok(Vec::new());
            }
            if let Some(ParsedKey::Primary { height }) = parse_key(&key) {
                if plan.height_allowed(height) {
                    results.push(height);
                }
            }
        }
        results.sort_unstable();
        results.dedup();
        Ok(results)
    }

    /// Collect candidates matching a numeric range over one tag.
    fn match_range(
        &self,
        tag: &str,
        range: &crate::search::NumRange,
        plan: &Plan,
        token: &CancellationToken,
    ) -> Result<HashSet<(i64, i64)>, IndexError> {
        let prefix = prefix_of(&[tag]);
        let mut matches = HashSet::new();
        for (key, _) in self.store.iter_prefix(&prefix)? {
            if token.is_cancelled() {
                return Ok(matches);
            }
            let Some(ParsedKey::Event { value, height, seq }) = parse_key(&key) else {
                continue;
            };
            let Some(number) = parse_number(&value) else {
                continue;
            };
            if range.contains(&number) && plan.height_allowed(height) {
                matches.insert((height, seq));
            }
        }
        Ok(matches)
    }

    /// Collect candidates for an equality / existence / containment
    /// condition.
    fn match_condition(
        &self,
        cond: &crate::query::Condition,
        plan: &Plan,
        token: &CancellationToken,
    ) -> Result<HashSet<(i64, i64)>, IndexError> {
        let mut matches = HashSet::new();
        match cond.op {
            Op::Eq => {
                // Equality scans the exact (tag, value) span.
                let literal = cond
                    .operand
                    .as_ref()
                    .map(Operand::literal)
                    .unwrap_or_default();
                let prefix = prefix_of(&[&cond.tag, literal]);
                for (key, _) in self.store.iter_prefix(&prefix)? {
                    if token.is_cancelled() {
                        return Ok(matches);
                    }
                    if let Some(ParsedKey::Event { height, seq, .. }) = parse_key(&key) {
                        if plan.height_allowed(height) {
                            matches.insert((height, seq));
                        }
                    }
                }
            }
            Op::Exists => {
                let prefix = prefix_of(&[&cond.tag]);
                for (key, _) in self.store.iter_prefix(&prefix)? {
                    if token.is_cancelled() {
                        return Ok(matches);
                    }
                    if let Some(ParsedKey::Event { height, seq, .. }) = parse_key(&key) {
                        if plan.height_allowed(height) {
                            matches.insert((height, seq));
                        }
                    }
                }
            }
            Op::Contains => {
                let needle = match &cond.operand {
                    Some(Operand::String(s)) => s.as_str(),
                    _ => return Ok(matches),
                };
                let prefix = prefix_of(&[&cond.tag]);
                for (key, _) in self.store.iter_prefix(&prefix)? {
                    if token.is_cancelled() {
                        return Ok(matches);
                    }
                    if let Some(ParsedKey::Event { value, height, seq }) = parse_key(&key) {
                        if value.contains(needle) && plan.height_allowed(height) {
                            matches.insert((height, seq));
                        }
                    }
                }
            }
            // Ranges were extracted by the plan.
            Op::Lt | Op::Leq | Op::Gt | Op::Geq => {}
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
        for (key, _) in self.store.iter_range(&[], None)? {
            let height = match parse_key(&key) {
                Some(ParsedKey::Primary { height }) => height,
                Some(ParsedKey::Event { height, .. }) => height,
                // Foreign keys (retain scalars) are never pruned.
                None => continue,
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
        batch.set(LAST_BLOCK_INDEXER_RETAIN_HEIGHT_KEY, retain_height.to_be_bytes());
        self.store.write_sync(batch)?;
        info!(retain_height, deleted, "pruned block index");

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
            .set_sync(BLOCK_INDEXER_RETAIN_HEIGHT_KEY, &retain_height.to_be_bytes())?;
        Ok(())
    }

    pub fn get_retain_height(&self) -> Result<i64, IndexError> {
        let height = self
            .get_i64(BLOCK_INDEXER_RETAIN_HEIGHT_KEY)?
            .ok_or(IndexError::KeyNotFound)?;
        if height < 0 {
            return Err(IndexError::InvalidHeightValue { height });
        }
        Ok(height)
    }

    /// The height the last prune reached, or 0 if never pruned. Kept at
    /// the last flushed value so an interrupted prune resumes.
    fn get_last_retain_height(&self) -> Result<i64, IndexError> {
        let height = self
            .get_i64(LAST_BLOCK_INDEXER_RETAIN_HEIGHT_KEY)?
            .unwrap_or(0);
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

