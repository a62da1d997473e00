//! Core types for Basalt consensus.
//!
//! This crate provides the foundational types used throughout the
//! replication core:
//!
//! - **Primitives**: [`Hash`], merkle roots, public keys, addresses,
//!   timestamps
//! - **Validator sets**: [`Validator`], [`ValidatorSet`] with weighted
//!   round-robin proposer selection
//! - **Consensus parameters**: [`ConsensusParams`] and the partial-update
//!   merge
//! - **Block metadata**: [`BlockId`], [`Header`], protocol versions
//! - **Application responses**: [`FinalizeBlockResponse`], deterministic
//!   transaction-result projection, events
//! - **Genesis**: the JSON [`GenesisDoc`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.
//! Every type here is a value: mutation happens before publication, and
//! shared values are copied, never patched in place.

mod block;
mod crypto;
mod events;
mod genesis;
mod hash;
mod merkle;
mod params;
mod responses;
mod time;
mod validator;

pub use block::{BlockId, Header, PartSetHeader, ProtocolVersion};
pub use crypto::{Address, KeyError, KeyType, PublicKey, ADDRESS_SIZE};
pub use events::{Event, EventAttribute};
pub use genesis::{GenesisDoc, GenesisError, GenesisValidator, MAX_CHAIN_ID_LEN};
pub use hash::{Hash, HexError, HASH_SIZE};
pub use merkle::merkle_root;
pub use params::{
    BlockParams, ConsensusParams, ConsensusParamsUpdate, EvidenceParams, FeatureParams,
    ParamsError, ValidatorParams, VersionParams, MAX_BLOCK_SIZE_BYTES, NO_LIMIT,
};
pub use responses::{
    tx_results_hash, ExecTxResult, FinalizeBlockResponse, TxResult, ValidatorUpdate,
};
pub use time::{TimeError, Timestamp};
pub use validator::{
    Validator, ValidatorSet, ValidatorSetError, MAX_TOTAL_VOTING_POWER,
    PRIORITY_WINDOW_SIZE_FACTOR,
};
