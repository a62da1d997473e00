//! Block identifiers, headers, and protocol versions.
//!
//! The core never builds blocks; it consumes the header and identifier of
//! a block the consensus loop already decided on. Only the fields the
//! state transition reads are interpreted, the rest travel opaquely.

use crate::crypto::Address;
use crate::hash::Hash;
use crate::time::Timestamp;
use sbor::prelude::*;
use std::fmt;

/// Consensus and application protocol versions carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor)]
pub struct ProtocolVersion {
    /// Block protocol version.
    pub block: u64,
    /// Application protocol version (governed by consensus params).
    pub app: u64,
}

/// Metadata of the canonical part-set a block was gossiped as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

impl PartSetHeader {
    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash.is_zero()
    }
}

/// Unique identifier of a decided block: its hash plus the part-set
/// header it was propagated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor)]
pub struct BlockId {
    pub hash: Hash,
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    /// The empty identifier used before genesis is applied.
    pub fn zero() -> Self {
        BlockId::default()
    }

    pub fn is_zero(&self) -> bool {
        self.hash.is_zero() && self.part_set_header.is_zero()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.part_set_header.total)
    }
}

/// A decided block's header.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Header {
    pub version: ProtocolVersion,
    pub chain_id: String,
    pub height: i64,
    pub time: Timestamp,
    pub last_block_id: BlockId,

    /// Hash of the commit for the previous block.
    pub last_commit_hash: Hash,
    /// Merkle root of the block's transactions.
    pub data_hash: Hash,

    /// Hash of the validator set that signed this block.
    pub validators_hash: Hash,
    /// Hash of the validator set for the next block.
    pub next_validators_hash: Hash,
    /// Hash of the consensus parameters active at this height.
    pub consensus_hash: Hash,
    /// Application state root after the previous block.
    pub app_hash: Vec<u8>,
    /// Root of the previous block's deterministic transaction results.
    pub last_results_hash: Hash,

    pub proposer_address: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_block_id_is_zero() {
        assert!(BlockId::zero().is_zero());
        let id = BlockId {
            hash: Hash::of(b"block"),
            part_set_header: PartSetHeader {
                total: 1,
                hash: Hash::of(b"parts"),
            },
        };
        assert!(!id.is_zero());
    }
}
