//! Event indexers for Basalt.
//!
//! Secondary indexes over the events a chain emits while committing
//! blocks, answering typed queries:
//!
//! - [`BlockIndexer`] maps event attributes to block heights
//! - [`TxIndexer`] maps event attributes to transaction results
//! - [`Query`] is the shared query language (`tag op operand AND …`)
//!
//! Both indexers write order-preserving keys into a dedicated KV store,
//! evaluate range conditions by prefix scans, correlate conditions on
//! the same event type through per-event sequence numbers, and support
//! pruning coordinated through durable retain heights.

mod block;
mod error;
mod keys;
mod query;
mod search;
mod tx;

pub use block::{
    BlockEvents, BlockIndexer, BLOCK_HEIGHT_COMPOSITE, BLOCK_INDEXER_RETAIN_HEIGHT_KEY,
    CONTEXT_BEGIN_BLOCK, CONTEXT_END_BLOCK, CONTEXT_FINALIZE_BLOCK,
    LAST_BLOCK_INDEXER_RETAIN_HEIGHT_KEY,
};
pub use error::IndexError;
pub use keys::{append_i64, append_str, KeyDecodeError, KeyReader};
pub use query::{
    parse_date, parse_number, parse_time, Condition, Op, Operand, Query, QueryError,
};
pub use tx::{
    TxIndexer, LAST_TX_INDEXER_RETAIN_HEIGHT_KEY, TX_HASH_COMPOSITE, TX_HEIGHT_COMPOSITE,
    TX_INDEXER_RETAIN_HEIGHT_KEY,
};
