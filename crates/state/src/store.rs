//! The durable state store.
//!
//! All chain state lives in one KV store under byte-exact keys:
//!
//! - `"stateKey"` — the latest [`State`]
//! - `"validatorsKey:<height>"` — a per-height validator record. The full
//!   set is embedded when the set changed at that height or the height is
//!   a checkpoint; otherwise the record only points at the height of the
//!   last change.
//! - `"consensusParamsKey:<height>"` — per-height params record, embedded
//!   when changed at that height.
//! - `"abciResponsesKey:<height>"` — the finalize-block response.
//!
//! Historical validator sets are reconstructed from the newest embedded
//! record at or below the requested height by replaying proposer-priority
//! increments, one per height. A full snapshot every
//! [`VALIDATOR_SET_CHECKPOINT_INTERVAL`] heights bounds the replay cost.
//!
//! `save` groups the state, the validator record, and the params record
//! into a single atomic synced batch, so concurrent readers observe
//! either the pre-save or the post-save view. Writes are serialized by an
//! internal lock; the consensus loop calls `save` serially anyway.

use crate::error::Error;
use crate::state::State;
use basalt_storage::{Batch, KvStore};
use basalt_types::{ConsensusParams, FinalizeBlockResponse, GenesisDoc, ValidatorSet};
use parking_lot::Mutex;
use sbor::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A full validator-set snapshot is written unconditionally every this
/// many heights, bounding worst-case replay at load.
pub const VALIDATOR_SET_CHECKPOINT_INTERVAL: i64 = 100_000;

/// Pruning flushes its delete batch every this many operations, so an
/// abrupt termination loses at most one batch.
const PRUNE_BATCH_SIZE: usize = 1_000;

const STATE_KEY: &[u8] = b"stateKey";
const APP_RETAIN_HEIGHT_KEY: &[u8] = b"AppRetainHeightKey";
const LAST_STATE_RETAIN_HEIGHT_KEY: &[u8] = b"LastStateRetainHeightKey";

fn validators_key(height: i64) -> Vec<u8> {
    format!("validatorsKey:{height}").into_bytes()
}

fn consensus_params_key(height: i64) -> Vec<u8> {
    format!("consensusParamsKey:{height}").into_bytes()
}

fn abci_responses_key(height: i64) -> Vec<u8> {
    format!("abciResponsesKey:{height}").into_bytes()
}

/// Per-height validator record: a pointer to the last change, plus the
/// full set at change and checkpoint heights.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
struct ValidatorsInfo {
    last_height_changed: i64,
    validator_set: Option<ValidatorSet>,
}

/// Per-height consensus-params record.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
struct ConsensusParamsInfo {
    last_height_changed: i64,
    params: Option<ConsensusParams>,
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Keep only the deterministic projection of finalize-block
    /// responses (the fields feeding `last_results_hash`).
    pub discard_abci_responses: bool,
    /// Compact the underlying KV store during pruning.
    pub compact: bool,
    /// Compact after this many accumulated deletions.
    pub compaction_interval: i64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            discard_abci_responses: false,
            compact: false,
            compaction_interval: 1_000,
        }
    }
}

/// KV-backed durable store for [`State`] and its history.
pub struct StateStore {
    db: Arc<dyn KvStore>,
    options: StoreOptions,
    /// Serializes `save`, `bootstrap`, and `prune`.
    write_lock: Mutex<()>,
    /// Deletions accumulated toward the next compaction.
    pruned_since_compaction: Mutex<i64>,
}

impl StateStore {
    pub fn new(db: Arc<dyn KvStore>, options: StoreOptions) -> Self {
        StateStore {
            db,
            options,
            write_lock: Mutex::new(()),
            pruned_since_compaction: Mutex::new(0),
        }
    }

    /// Return the saved state, or build, persist, and return the genesis
    /// state from the given file.
    pub fn load_from_db_or_genesis_file(&self, path: impl AsRef<Path>) -> Result<State, Error> {
        if let Some(state) = self.load()? {
            return Ok(state);
        }
        let doc = GenesisDoc::load(path)?;
        self.load_from_db_or_genesis_doc(&doc)
    }

    /// Like [`Self::load_from_db_or_genesis_file`], for an already-parsed
    /// document.
    pub fn load_from_db_or_genesis_doc(&self, doc: &GenesisDoc) -> Result<State, Error> {
        if let Some(state) = self.load()? {
            return Ok(state);
        }
        let state = State::from_genesis(doc)?;
        info!(chain_id = %state.chain_id, "initialized state from genesis");
        self.save(&state)?;
        Ok(state)
    }

    /// Load the latest saved state, if any.
    pub fn load(&self) -> Result<Option<State>, Error> {
        match self.db.get(STATE_KEY)? {
            None => Ok(None),
            Some(bytes) => {
                let state = sbor::basic_decode(&bytes).map_err(|e| Error::Codec {
                    what: "state",
                    detail: format!("{e:?}"),
                })?;
                Ok(Some(state))
            }
        }
    }

    /// Atomically persist the state together with the validator and
    /// params records for the upcoming heights.
    pub fn save(&self, state: &State) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let mut batch = Batch::new();

        let next_height = if state.last_block_height == 0 {
            state.initial_height
        } else {
            state.last_block_height + 1
        };

        // The very first save also records the initial validators:
        // set changes are delayed a block, so nothing else would cover
        // the initial height.
        if state.last_block_height == 0 {
            put_validators_info(&mut batch, next_height, next_height, &state.validators)?;
        }
        put_validators_info(
            &mut batch,
            next_height + 1,
            state.last_height_validators_changed,
            &state.next_validators,
        )?;
        put_consensus_params_info(
            &mut batch,
            next_height,
            state.last_height_consensus_params_changed,
            &state.consensus_params,
        )?;
        batch.set(STATE_KEY, encode_state(state));

        self.db.write_sync(batch)?;
        debug!(height = state.last_block_height, "state saved");
        Ok(())
    }

    /// Persist a state obtained out of band (e.g. state sync), writing
    /// validator records for its surrounding heights so historical loads
    /// work immediately.
    pub fn bootstrap(&self, state: &State) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let mut batch = Batch::new();

        let height = if state.last_block_height == 0 {
            state.initial_height
        } else {
            state.last_block_height + 1
        };

        if height > 1 && !state.last_validators.is_empty() {
            put_validators_info(&mut batch, height - 1, height - 1, &state.last_validators)?;
        }
        put_validators_info(&mut batch, height, height, &state.validators)?;
        put_validators_info(&mut batch, height + 1, height + 1, &state.next_validators)?;
        put_consensus_params_info(
            &mut batch,
            height,
            state.last_height_consensus_params_changed,
            &state.consensus_params,
        )?;
        batch.set(STATE_KEY, encode_state(state));

        self.db.write_sync(batch)?;
        info!(height = state.last_block_height, "state bootstrapped");
        Ok(())
    }

    /// Load the validator set active at `height`.
    ///
    /// Finds the newest embedded record at or below `height` and replays
    /// one priority increment per height in between.
    pub fn load_validators(&self, height: i64) -> Result<ValidatorSet, Error> {
        let info = self.load_validators_info(height)?;
        match info.validator_set {
            Some(set) => Ok(set),
            None => {
                let last_stored = last_stored_height_for(height, info.last_height_changed);
                let base = self.load_validators_info(last_stored).map_err(|_| {
                    Error::CheckpointMissing {
                        checkpoint_height: last_stored,
                        height,
                    }
                })?;
                let mut set = base.validator_set.ok_or(Error::CheckpointMissing {
                    checkpoint_height: last_stored,
                    height,
                })?;
                // A chain may store empty sets before the application
                // seeds validators; there is nothing to replay then.
                if !set.is_empty() {
                    set.increment_proposer_priority((height - last_stored) as i32);
                }
                Ok(set)
            }
        }
    }

    fn load_validators_info(&self, height: i64) -> Result<ValidatorsInfo, Error> {
        let bytes = self
            .db
            .get(&validators_key(height))?
            .ok_or(Error::NoValSetForHeight { height })?;
        sbor::basic_decode(&bytes).map_err(|e| Error::Codec {
            what: "validators info",
            detail: format!("{e:?}"),
        })
    }

    /// Load the consensus params active at `height`.
    pub fn load_consensus_params(&self, height: i64) -> Result<ConsensusParams, Error> {
        let info = self.load_consensus_params_info(height)?;
        match info.params {
            Some(params) => Ok(params),
            None => {
                let changed = info.last_height_changed;
                let base = self.load_consensus_params_info(changed).map_err(|_| {
                    Error::CheckpointMissing {
                        checkpoint_height: changed,
                        height,
                    }
                })?;
                base.params.ok_or(Error::CheckpointMissing {
                    checkpoint_height: changed,
                    height,
                })
            }
        }
    }

    fn load_consensus_params_info(&self, height: i64) -> Result<ConsensusParamsInfo, Error> {
        let bytes = self
            .db
            .get(&consensus_params_key(height))?
            .ok_or(Error::NoConsensusParamsForHeight { height })?;
        sbor::basic_decode(&bytes).map_err(|e| Error::Codec {
            what: "consensus params info",
            detail: format!("{e:?}"),
        })
    }

    /// Persist the application's response for `height`. Transaction
    /// results are always reduced to their deterministic projection;
    /// with `discard_abci_responses` only that projection survives.
    pub fn save_finalize_block_response(
        &self,
        height: i64,
        response: &FinalizeBlockResponse,
    ) -> Result<(), Error> {
        let tx_results = response
            .tx_results
            .iter()
            .map(|r| r.deterministic())
            .collect();
        let stored = if self.options.discard_abci_responses {
            FinalizeBlockResponse {
                tx_results,
                ..Default::default()
            }
        } else {
            FinalizeBlockResponse {
                tx_results,
                ..response.clone()
            }
        };
        self.db.set_sync(
            &abci_responses_key(height),
            &sbor::basic_encode(&stored).expect("response encoding cannot fail"),
        )?;
        Ok(())
    }

    /// Load the stored response for `height`.
    pub fn load_finalize_block_response(
        &self,
        height: i64,
    ) -> Result<FinalizeBlockResponse, Error> {
        let bytes = self
            .db
            .get(&abci_responses_key(height))?
            .ok_or(Error::NoFinalizeBlockResponseForHeight { height })?;
        sbor::basic_decode(&bytes).map_err(|e| Error::Codec {
            what: "finalize-block response",
            detail: format!("{e:?}"),
        })
    }

    /// Delete state history below `retain_height`, keeping every record
    /// needed to serve `retain_height` itself. Returns the number of
    /// pruned heights.
    pub fn prune(&self, retain_height: i64) -> Result<u64, Error> {
        let _guard = self.write_lock.lock();
        if retain_height < 1 {
            return Err(Error::InvalidHeightValue {
                height: retain_height,
            });
        }
        let base = self.get_i64(LAST_STATE_RETAIN_HEIGHT_KEY)?.unwrap_or(0).max(1);
        if retain_height <= base {
            return Ok(0);
        }

        // Records that must survive so retain_height stays servable.
        let val_info = self.load_validators_info(retain_height)?;
        let mut keep_vals = HashSet::new();
        if val_info.validator_set.is_none() {
            keep_vals.insert(last_stored_height_for(
                retain_height,
                val_info.last_height_changed,
            ));
            keep_vals.insert(val_info.last_height_changed);
        }
        let params_info = self.load_consensus_params_info(retain_height)?;
        let mut keep_params = HashSet::new();
        if params_info.params.is_none() {
            keep_params.insert(params_info.last_height_changed);
        }

        let mut batch = Batch::new();
        let mut pruned: u64 = 0;
        let mut deleted: i64 = 0;
        for height in base..retain_height {
            if keep_vals.contains(&height) {
                // A kept record must carry the full set once the records
                // below it are gone.
                let info = self.load_validators_info(height)?;
                if info.validator_set.is_none() {
                    let set = self.load_validators(height)?;
                    let info = ValidatorsInfo {
                        last_height_changed: height,
                        validator_set: Some(set),
                    };
                    batch.set(
                        validators_key(height),
                        sbor::basic_encode(&info).expect("record encoding cannot fail"),
                    );
                }
            } else {
                batch.delete(validators_key(height));
                deleted += 1;
            }
            if keep_params.contains(&height) {
                let info = self.load_consensus_params_info(height)?;
                if info.params.is_none() {
                    let params = self.load_consensus_params(height)?;
                    let info = ConsensusParamsInfo {
                        last_height_changed: height,
                        params: Some(params),
                    };
                    batch.set(
                        consensus_params_key(height),
                        sbor::basic_encode(&info).expect("record encoding cannot fail"),
                    );
                }
            } else {
                batch.delete(consensus_params_key(height));
                deleted += 1;
            }
            batch.delete(abci_responses_key(height));
            deleted += 1;
            pruned += 1;

            if batch.len() >= PRUNE_BATCH_SIZE {
                self.db.write_sync(std::mem::take(&mut batch))?;
            }
        }

        batch.set(LAST_STATE_RETAIN_HEIGHT_KEY, retain_height.to_be_bytes());
        self.db.write_sync(batch)?;
        info!(retain_height, pruned, "pruned state history");

        if self.options.compact {
            let mut acc = self.pruned_since_compaction.lock();
            *acc += deleted;
            if *acc >= self.options.compaction_interval {
                self.db.compact_all()?;
                *acc = 0;
            }
        }
        Ok(pruned)
    }

    /// Persist the retain height requested by a data companion.
    pub fn set_retain_height(&self, height: i64) -> Result<(), Error> {
        if height < 0 {
            return Err(Error::InvalidHeightValue { height });
        }
        self.db
            .set_sync(APP_RETAIN_HEIGHT_KEY, &height.to_be_bytes())?;
        Ok(())
    }

    /// Read the data-companion retain height.
    pub fn get_retain_height(&self) -> Result<i64, Error> {
        let height = self
            .get_i64(APP_RETAIN_HEIGHT_KEY)?
            .ok_or(Error::KeyNotFound)?;
        if height < 0 {
            return Err(Error::InvalidHeightValue { height });
        }
        Ok(height)
    }

    fn get_i64(&self, key: &[u8]) -> Result<Option<i64>, Error> {
        match self.db.get(key)? {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| Error::Codec {
                    what: "stored height",
                    detail: format!("{} bytes", bytes.len()),
                })?;
                Ok(Some(i64::from_be_bytes(arr)))
            }
        }
    }
}

/// Height of the newest record guaranteed to embed a full validator set
/// at or below `height`: the later of the last change and the last
/// periodic checkpoint.
fn last_stored_height_for(height: i64, last_height_changed: i64) -> i64 {
    let checkpoint = height - height % VALIDATOR_SET_CHECKPOINT_INTERVAL;
    checkpoint.max(last_height_changed)
}

fn put_validators_info(
    batch: &mut Batch,
    height: i64,
    last_height_changed: i64,
    set: &ValidatorSet,
) -> Result<(), Error> {
    if last_height_changed > height {
        return Err(Error::InvalidHeightValue {
            height: last_height_changed,
        });
    }
    let embed =
        height == last_height_changed || height % VALIDATOR_SET_CHECKPOINT_INTERVAL == 0;
    let info = ValidatorsInfo {
        last_height_changed,
        validator_set: embed.then(|| set.clone()),
    };
    batch.set(
        validators_key(height),
        sbor::basic_encode(&info).expect("record encoding cannot fail"),
    );
    Ok(())
}

fn put_consensus_params_info(
    batch: &mut Batch,
    height: i64,
    last_height_changed: i64,
    params: &ConsensusParams,
) -> Result<(), Error> {
    if last_height_changed > height {
        return Err(Error::InvalidHeightValue {
            height: last_height_changed,
        });
    }
    let info = ConsensusParamsInfo {
        last_height_changed,
        params: (height == last_height_changed).then(|| params.clone()),
    };
    batch.set(
        consensus_params_key(height),
        sbor::basic_encode(&info).expect("record encoding cannot fail"),
    );
    Ok(())
}

fn encode_state(state: &State) -> Vec<u8> {
    sbor::basic_encode(state).expect("state encoding cannot fail")
}
