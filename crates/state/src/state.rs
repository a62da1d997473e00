//! The blockchain state value.
//!
//! One [`State`] is produced per committed height. It is a plain value:
//! the transition builds a new one, the store persists it, and readers
//! copy it. Validator-set changes are delayed by one block, so the state
//! carries three sets: the one that signed the last block, the one for
//! the next block, and the one after that.

use crate::error::Error;
use basalt_types::{
    BlockId, ConsensusParams, GenesisDoc, Hash, ProtocolVersion, Timestamp, Validator,
    ValidatorSet,
};
use sbor::prelude::*;

/// Block protocol version this implementation speaks.
pub const BLOCK_PROTOCOL_VERSION: u64 = 1;

/// Consensus and software versions carried in the state.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Version {
    pub consensus: ProtocolVersion,
    pub software: String,
}

impl Version {
    fn initial(app: u64) -> Self {
        Version {
            consensus: ProtocolVersion {
                block: BLOCK_PROTOCOL_VERSION,
                app,
            },
            software: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The replicated chain state after `last_block_height`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct State {
    pub chain_id: String,
    pub initial_height: i64,

    /// Height of the last decided block; 0 before genesis is applied.
    pub last_block_height: i64,
    pub last_block_id: BlockId,
    pub last_block_time: Timestamp,

    /// Validators for height `last_block_height + 1`.
    pub validators: ValidatorSet,
    /// Validators for height `last_block_height + 2`. Updates land here
    /// first, one block early.
    pub next_validators: ValidatorSet,
    /// Validators that signed `last_block_height`; empty at height 0.
    pub last_validators: ValidatorSet,
    /// Lowest height whose validator set equals `validators`.
    pub last_height_validators_changed: i64,

    pub consensus_params: ConsensusParams,
    pub last_height_consensus_params_changed: i64,

    /// Merkle root of the previous block's deterministic tx results.
    pub last_results_hash: Hash,
    /// Application state root after the previous block.
    pub app_hash: Vec<u8>,

    pub version: Version,
}

impl State {
    /// Value copy. Mutating the copy never touches the original.
    pub fn copy(&self) -> State {
        self.clone()
    }

    /// Build the initial state from a validated genesis document.
    ///
    /// A genesis without validators produces empty sets; the application
    /// is expected to supply the initial validators at `InitChain`.
    pub fn from_genesis(doc: &GenesisDoc) -> Result<State, Error> {
        let params = doc
            .consensus_params
            .clone()
            .unwrap_or_default();

        let (validators, next_validators) = if doc.validators.is_empty() {
            (ValidatorSet::empty(), ValidatorSet::empty())
        } else {
            let vals: Vec<Validator> = doc
                .validators
                .iter()
                .map(|gv| Validator::new(gv.pub_key, gv.power))
                .collect();
            let set = ValidatorSet::new(vals)?;
            let next = set.copy_increment_proposer_priority(1);
            (set, next)
        };

        Ok(State {
            chain_id: doc.chain_id.clone(),
            initial_height: doc.initial_height,
            last_block_height: 0,
            last_block_id: BlockId::zero(),
            last_block_time: doc.genesis_time,
            validators,
            next_validators,
            last_validators: ValidatorSet::empty(),
            last_height_validators_changed: doc.initial_height,
            last_height_consensus_params_changed: doc.initial_height,
            last_results_hash: Hash::ZERO,
            app_hash: doc.app_hash.clone(),
            version: Version::initial(params.version.app),
            consensus_params: params,
        })
    }
}
