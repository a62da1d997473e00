//! Finalize-block responses and deterministic transaction results.
//!
//! The application returns one [`FinalizeBlockResponse`] per committed
//! block. The state transition consumes it as opaque input, except for
//! the deterministic projection of the transaction results, which feeds
//! the `last_results_hash` every replica must agree on.

use crate::crypto::PublicKey;
use crate::events::Event;
use crate::hash::Hash;
use crate::merkle::merkle_root;
use crate::params::ConsensusParamsUpdate;
use sbor::prelude::*;

/// The result of executing a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ExecTxResult {
    pub code: u32,
    pub data: Vec<u8>,
    /// Free-form log output. Non-deterministic; excluded from hashing.
    pub log: String,
    /// Additional information. Non-deterministic; excluded from hashing.
    pub info: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub events: Vec<Event>,
    pub codespace: String,
}

impl ExecTxResult {
    /// The deterministic projection: the fields every replica computes
    /// identically. Logs, info, events, and codespace are stripped.
    pub fn deterministic(&self) -> ExecTxResult {
        ExecTxResult {
            code: self.code,
            data: self.data.clone(),
            gas_wanted: self.gas_wanted,
            gas_used: self.gas_used,
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Merkle root over the deterministic projections of the given results.
/// An empty list hashes to the empty-merkle sentinel.
pub fn tx_results_hash(results: &[ExecTxResult]) -> Hash {
    let leaves: Vec<Vec<u8>> = results
        .iter()
        .map(|r| sbor::basic_encode(&r.deterministic()).expect("tx result encoding cannot fail"))
        .collect();
    merkle_root(&leaves)
}

/// A power change for a single validator, as reported by the application.
/// `power == 0` removes the validator.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorUpdate {
    pub pub_key: PublicKey,
    pub power: i64,
}

impl ValidatorUpdate {
    pub fn new(pub_key: PublicKey, power: i64) -> Self {
        ValidatorUpdate { pub_key, power }
    }
}

/// Everything the application returns for a committed block.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct FinalizeBlockResponse {
    /// Events emitted by block execution (not tied to a transaction).
    pub events: Vec<Event>,
    /// Per-transaction results, in block order.
    pub tx_results: Vec<ExecTxResult>,
    /// Validator diff to apply with a one-block delay.
    pub validator_updates: Vec<ValidatorUpdate>,
    /// Consensus-parameter diff, if any.
    pub consensus_param_updates: Option<ConsensusParamsUpdate>,
    /// Application state root after this block.
    pub app_hash: Vec<u8>,
}

/// A transaction result paired with its position, as fed to the tx
/// indexer.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TxResult {
    pub height: i64,
    pub index: u32,
    pub tx: Vec<u8>,
    pub result: ExecTxResult,
}

impl TxResult {
    /// Hash identifying the transaction.
    pub fn tx_hash(&self) -> Hash {
        Hash::of(&self.tx)
    }
}
