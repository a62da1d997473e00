//! Blockchain state and its persistence.
//!
//! This crate owns the second half of the replication core: the
//! [`State`] value produced once per committed height, the pure
//! [`update_state`] transition that folds a decided block into it, and
//! the [`StateStore`] that records states, validator-set history,
//! consensus-parameter history, and per-height application responses.
//!
//! # Architecture
//!
//! The transition is synchronous and performs no I/O:
//!
//! ```text
//! (State, BlockId, Header, FinalizeBlockResponse, updates)
//!     → update_state() → State'
//!     → StateStore::save(State')
//! ```
//!
//! The consensus loop drives this pipeline serially; the store
//! serializes writes internally and groups each save into one atomic
//! synced batch.

mod error;
mod state;
mod store;
mod transition;

pub use error::{Error, InvalidValidatorUpdate};
pub use state::{State, Version, BLOCK_PROTOCOL_VERSION};
pub use store::{StateStore, StoreOptions, VALIDATOR_SET_CHECKPOINT_INTERVAL};
pub use transition::{update_state, validate_validator_updates};
