//! Genesis documents.
//!
//! A genesis document is the JSON file a chain starts from. It is read
//! once, validated and completed (derived addresses filled in, defaults
//! applied), and turned into the initial chain state.

use crate::crypto::{Address, KeyError, KeyType, PublicKey};
use crate::params::{ConsensusParams, ParamsError};
use crate::time::Timestamp;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a chain identifier.
pub const MAX_CHAIN_ID_LEN: usize = 50;

/// One initial validator entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Validator address; derived from the key when absent.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_address")]
    pub address: Option<Address>,
    #[serde(with = "pub_key_json")]
    pub pub_key: PublicKey,
    #[serde(with = "int_string")]
    pub power: i64,
    #[serde(default)]
    pub name: String,
}

/// The genesis document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDoc {
    pub genesis_time: Timestamp,
    pub chain_id: String,
    #[serde(default, with = "int_string")]
    pub initial_height: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_params: Option<ConsensusParams>,
    /// May be empty; the application then supplies the initial set.
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
    #[serde(default, with = "hex_bytes")]
    pub app_hash: Vec<u8>,
}

impl GenesisDoc {
    /// Parse a genesis document from JSON and validate it.
    pub fn from_json(json: &[u8]) -> Result<Self, GenesisError> {
        let mut doc: GenesisDoc =
            serde_json::from_slice(json).map_err(|e| GenesisError::Json(e.to_string()))?;
        doc.validate_and_complete()?;
        Ok(doc)
    }

    /// Read a genesis document from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GenesisError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| GenesisError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_json(&bytes)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("genesis document serializes")
    }

    /// Check required fields, apply defaults, and fill derived addresses.
    pub fn validate_and_complete(&mut self) -> Result<(), GenesisError> {
        if self.chain_id.is_empty() {
            return Err(GenesisError::EmptyChainId);
        }
        if self.chain_id.len() > MAX_CHAIN_ID_LEN {
            return Err(GenesisError::ChainIdTooLong {
                max: MAX_CHAIN_ID_LEN,
            });
        }
        if self.initial_height < 0 {
            return Err(GenesisError::NegativeInitialHeight {
                got: self.initial_height,
            });
        }
        if self.initial_height == 0 {
            self.initial_height = 1;
        }

        let params = self.consensus_params.get_or_insert_with(ConsensusParams::default);
        params.validate_basic()?;

        for (i, val) in self.validators.iter_mut().enumerate() {
            if val.power <= 0 {
                return Err(GenesisError::NonPositivePower {
                    index: i,
                    power: val.power,
                });
            }
            if !params.validator.allows(val.pub_key.key_type()) {
                return Err(GenesisError::DisallowedKeyType {
                    index: i,
                    key_type: val.pub_key.key_type(),
                });
            }
            let derived = val.pub_key.address();
            match val.address {
                None => val.address = Some(derived),
                Some(addr) if addr != derived => {
                    return Err(GenesisError::AddressMismatch {
                        index: i,
                        expected: derived,
                        got: addr,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Errors from genesis parsing and validation.
#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("genesis chain_id must not be empty")]
    EmptyChainId,

    #[error("genesis chain_id longer than {max} characters")]
    ChainIdTooLong { max: usize },

    #[error("genesis initial_height must be non-negative, got {got}")]
    NegativeInitialHeight { got: i64 },

    #[error("genesis validator {index} has non-positive power {power}")]
    NonPositivePower { index: usize, power: i64 },

    #[error("genesis validator {index} uses disallowed key type {key_type}")]
    DisallowedKeyType { index: usize, key_type: KeyType },

    #[error("genesis validator {index} address {got} does not match its key (expected {expected})")]
    AddressMismatch {
        index: usize,
        expected: Address,
        got: Address,
    },

    #[error("invalid consensus params: {0}")]
    Params(#[from] ParamsError),

    #[error("invalid key material: {0}")]
    Key(#[from] KeyError),

    #[error("invalid genesis JSON: {0}")]
    Json(String),

    #[error("failed to read genesis file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// `{"type": "...", "value": "<base64>"}` form for public keys.
mod pub_key_json {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Raw {
        #[serde(rename = "type")]
        key_type: String,
        value: String,
    }

    pub fn serialize<S: Serializer>(key: &PublicKey, s: S) -> Result<S::Ok, S::Error> {
        Raw {
            key_type: key.key_type().as_str().to_string(),
            value: BASE64.encode(key.as_bytes()),
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PublicKey, D::Error> {
        let raw = Raw::deserialize(d)?;
        let key_type = KeyType::from_str(&raw.key_type).map_err(serde::de::Error::custom)?;
        let bytes = BASE64
            .decode(raw.value.as_bytes())
            .map_err(serde::de::Error::custom)?;
        PublicKey::from_bytes(key_type, &bytes).map_err(serde::de::Error::custom)
    }
}

/// Hex-encoded addresses; empty strings read as absent.
mod opt_address {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(addr: &Option<Address>, s: S) -> Result<S::Ok, S::Error> {
        match addr {
            Some(a) => s.serialize_str(&a.to_hex()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Address>, D::Error> {
        let s = String::deserialize(d)?;
        if s.is_empty() {
            return Ok(None);
        }
        Address::from_hex(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// Integers carried as JSON strings (the conventional genesis encoding);
/// plain numbers are accepted too.
mod int_string {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match StringOrInt::deserialize(d)? {
            StringOrInt::Int(v) => Ok(v),
            StringOrInt::String(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Hex-encoded byte strings (app hashes).
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode_upper(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
