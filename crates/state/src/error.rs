//! State-machine and store errors.
//!
//! Every kind carries its identifying context so callers dispatch on the
//! variant, never on message text. Deterministic validation failures
//! (invalid updates, params bounds) halt progress and are never retried;
//! storage failures surface verbatim and the consensus loop must treat
//! them as fatal; lookup misses are expected at boundaries.

use basalt_storage::StorageError;
use basalt_types::{GenesisError, KeyType, ParamsError, ValidatorSetError};
use thiserror::Error;

/// Why a single validator update was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidValidatorUpdate {
    #[error("negative voting power {power}")]
    NegativePower { power: i64 },

    #[error("voting power {power} exceeds maximum {max}")]
    ExcessivePower { power: i64, max: i64 },

    #[error("key type {key_type} is not permitted by the consensus params")]
    DisallowedKeyType { key_type: KeyType },

    #[error(transparent)]
    ChangeSet(ValidatorSetError),
}

/// Errors surfaced by the state transition and the state store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not find validator set for height {height}")]
    NoValSetForHeight { height: i64 },

    #[error("could not find consensus params for height {height}")]
    NoConsensusParamsForHeight { height: i64 },

    #[error("could not find finalize-block response for height {height}")]
    NoFinalizeBlockResponseForHeight { height: i64 },

    #[error("invalid height value {height}")]
    InvalidHeightValue { height: i64 },

    #[error("key not found")]
    KeyNotFound,

    #[error("validator changes would result in an empty validator set")]
    EmptyValidatorSet,

    #[error("invalid validator update: {0}")]
    InvalidValidatorUpdate(#[from] InvalidValidatorUpdate),

    #[error("invalid consensus params: {0}")]
    ConsensusParams(#[from] ParamsError),

    #[error("invalid genesis document: {0}")]
    Genesis(#[from] GenesisError),

    /// A pointer record referenced a checkpoint that is not in the store.
    /// Indicates corruption or an over-eager prune.
    #[error(
        "validator/params checkpoint at height {checkpoint_height} is missing \
         (height {height} was requested)"
    )]
    CheckpointMissing { checkpoint_height: i64, height: i64 },

    #[error("failed to decode stored {what}: {detail}")]
    Codec { what: &'static str, detail: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ValidatorSetError> for Error {
    fn from(err: ValidatorSetError) -> Self {
        match err {
            ValidatorSetError::EmptySet => Error::EmptyValidatorSet,
            other => Error::InvalidValidatorUpdate(InvalidValidatorUpdate::ChangeSet(other)),
        }
    }
}
