//! Consensus parameters.
//!
//! Versioned tunables agreed on by every replica. Parameters change only
//! through the application's finalize-block response; the state machine
//! records the last height at which they changed so historical views can
//! be reconstructed from checkpoints.

use crate::crypto::KeyType;
use sbor::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on `block.max_bytes`.
pub const MAX_BLOCK_SIZE_BYTES: i64 = 100 * 1024 * 1024;

/// Sentinel meaning "no limit" for sizes and gas.
pub const NO_LIMIT: i64 = -1;

/// Block size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct BlockParams {
    /// Maximum block size in bytes, or -1 for the protocol maximum.
    pub max_bytes: i64,
    /// Maximum gas per block, or -1 for unlimited.
    pub max_gas: i64,
}

impl Default for BlockParams {
    fn default() -> Self {
        BlockParams {
            max_bytes: 4 * 1024 * 1024,
            max_gas: NO_LIMIT,
        }
    }
}

/// Evidence acceptance windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct EvidenceParams {
    /// Maximum age of evidence in blocks.
    pub max_age_num_blocks: i64,
    /// Maximum age of evidence in nanoseconds.
    pub max_age_duration: i64,
    /// Maximum total evidence size per block in bytes.
    pub max_bytes: i64,
}

impl Default for EvidenceParams {
    fn default() -> Self {
        EvidenceParams {
            max_age_num_blocks: 100_000,
            // 48 hours, matching a default 100k-block window at ~1.7s blocks.
            max_age_duration: 48 * 60 * 60 * 1_000_000_000,
            max_bytes: 1024 * 1024,
        }
    }
}

/// Accepted validator key types.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct ValidatorParams {
    pub pub_key_types: Vec<KeyType>,
}

impl Default for ValidatorParams {
    fn default() -> Self {
        ValidatorParams {
            pub_key_types: vec![KeyType::Ed25519],
        }
    }
}

impl ValidatorParams {
    pub fn allows(&self, key_type: KeyType) -> bool {
        self.pub_key_types.contains(&key_type)
    }
}

/// Application protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor, Serialize, Deserialize)]
pub struct VersionParams {
    pub app: u64,
}

/// Heights at which optional consensus features activate. Zero means the
/// feature is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor, Serialize, Deserialize)]
pub struct FeatureParams {
    pub vote_extensions_enable_height: i64,
    pub pbts_enable_height: i64,
}

/// The full consensus-parameter value. Compared deeply for equality.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block: BlockParams,
    pub evidence: EvidenceParams,
    pub validator: ValidatorParams,
    pub version: VersionParams,
    pub feature: FeatureParams,
}

impl ConsensusParams {
    /// Validate the parameter bounds.
    pub fn validate_basic(&self) -> Result<(), ParamsError> {
        if self.block.max_bytes == 0
            || self.block.max_bytes < NO_LIMIT
            || self.block.max_bytes > MAX_BLOCK_SIZE_BYTES
        {
            return Err(ParamsError::BlockMaxBytes {
                got: self.block.max_bytes,
                max: MAX_BLOCK_SIZE_BYTES,
            });
        }
        if self.block.max_gas < NO_LIMIT {
            return Err(ParamsError::BlockMaxGas {
                got: self.block.max_gas,
            });
        }
        if self.evidence.max_age_num_blocks <= 0 {
            return Err(ParamsError::EvidenceMaxAgeNumBlocks {
                got: self.evidence.max_age_num_blocks,
            });
        }
        if self.evidence.max_age_duration <= 0 {
            return Err(ParamsError::EvidenceMaxAgeDuration {
                got: self.evidence.max_age_duration,
            });
        }
        let block_max = if self.block.max_bytes == NO_LIMIT {
            MAX_BLOCK_SIZE_BYTES
        } else {
            self.block.max_bytes
        };
        if self.evidence.max_bytes < 0 || self.evidence.max_bytes > block_max {
            return Err(ParamsError::EvidenceMaxBytes {
                got: self.evidence.max_bytes,
                max: block_max,
            });
        }
        if self.validator.pub_key_types.is_empty() {
            return Err(ParamsError::EmptyPubKeyTypes);
        }
        if self.feature.vote_extensions_enable_height < 0 {
            return Err(ParamsError::NegativeEnableHeight {
                feature: "vote_extensions",
                got: self.feature.vote_extensions_enable_height,
            });
        }
        if self.feature.pbts_enable_height < 0 {
            return Err(ParamsError::NegativeEnableHeight {
                feature: "pbts",
                got: self.feature.pbts_enable_height,
            });
        }
        Ok(())
    }

    /// Merge a parameter diff field by field. Components absent from the
    /// diff inherit the current value.
    pub fn update(&self, diff: &ConsensusParamsUpdate) -> ConsensusParams {
        let mut next = self.clone();
        if let Some(block) = diff.block {
            next.block = block;
        }
        if let Some(evidence) = diff.evidence {
            next.evidence = evidence;
        }
        if let Some(validator) = &diff.validator {
            next.validator = validator.clone();
        }
        if let Some(version) = diff.version {
            next.version = version;
        }
        if let Some(feature) = diff.feature {
            next.feature = feature;
        }
        next
    }
}

/// A partial parameter change carried in a finalize-block response.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ConsensusParamsUpdate {
    pub block: Option<BlockParams>,
    pub evidence: Option<EvidenceParams>,
    pub validator: Option<ValidatorParams>,
    pub version: Option<VersionParams>,
    pub feature: Option<FeatureParams>,
}

impl ConsensusParamsUpdate {
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
            && self.evidence.is_none()
            && self.validator.is_none()
            && self.version.is_none()
            && self.feature.is_none()
    }
}

/// Consensus-parameter bound violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("block.max_bytes must be -1 or in [1, {max}], got {got}")]
    BlockMaxBytes { got: i64, max: i64 },

    #[error("block.max_gas must be >= -1, got {got}")]
    BlockMaxGas { got: i64 },

    #[error("evidence.max_age_num_blocks must be positive, got {got}")]
    EvidenceMaxAgeNumBlocks { got: i64 },

    #[error("evidence.max_age_duration must be positive, got {got}")]
    EvidenceMaxAgeDuration { got: i64 },

    #[error("evidence.max_bytes must be in [0, {max}], got {got}")]
    EvidenceMaxBytes { got: i64, max: i64 },

    #[error("validator.pub_key_types must not be empty")]
    EmptyPubKeyTypes,

    #[error("feature.{feature} enable height must be non-negative, got {got}")]
    NegativeEnableHeight { feature: &'static str, got: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ConsensusParams::default().validate_basic().unwrap();
    }

    #[test]
    fn block_size_bounds() {
        let mut p = ConsensusParams::default();
        p.block.max_bytes = 0;
        assert!(p.validate_basic().is_err());
        p.block.max_bytes = NO_LIMIT;
        p.validate_basic().unwrap();
        p.block.max_bytes = MAX_BLOCK_SIZE_BYTES + 1;
        assert!(p.validate_basic().is_err());
    }

    #[test]
    fn evidence_bytes_bounded_by_block() {
        let mut p = ConsensusParams::default();
        p.block.max_bytes = 1024;
        p.evidence.max_bytes = 2048;
        assert!(p.validate_basic().is_err());
        p.evidence.max_bytes = 1024;
        p.validate_basic().unwrap();
    }

    #[test]
    fn empty_key_types_rejected() {
        let mut p = ConsensusParams::default();
        p.validator.pub_key_types.clear();
        assert!(matches!(
            p.validate_basic(),
            Err(ParamsError::EmptyPubKeyTypes)
        ));
    }

    #[test]
    fn update_merges_only_present_fields() {
        let base = ConsensusParams::default();
        let diff = ConsensusParamsUpdate {
            block: Some(BlockParams {
                max_bytes: 1234,
                max_gas: 99,
            }),
            ..Default::default()
        };
        let next = base.update(&diff);
        assert_eq!(next.block.max_bytes, 1234);
        assert_eq!(next.block.max_gas, 99);
        assert_eq!(next.evidence, base.evidence, "absent fields must inherit");
        assert_eq!(next.validator, base.validator);
    }

    #[test]
    fn empty_update_is_identity() {
        let base = ConsensusParams::default();
        let diff = ConsensusParamsUpdate::default();
        assert!(diff.is_empty());
        assert_eq!(base.update(&diff), base);
    }
}
