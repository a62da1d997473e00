//! Public keys and validator addresses.
//!
//! The core consumes keys as opaque byte material: it derives addresses
//! and checks lengths, but performs no signature verification. Key types
//! accepted by a chain are governed by
//! [`ValidatorParams`](crate::params::ValidatorParams).

use sbor::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of bytes in an [`Address`].
pub const ADDRESS_SIZE: usize = 20;

const ED25519_KEY_SIZE: usize = 32;
const SECP256K1_KEY_SIZE: usize = 33;

/// A validator address: the first 20 bytes of the blake3 hash of the
/// public key bytes. Addresses order validator sets deterministically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
#[sbor(transparent)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|e| KeyError::InvalidAddress(e.to_string()))?;
        let arr: [u8; ADDRESS_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KeyError::InvalidAddress(format!("{} bytes", b.len())))?;
        Ok(Address(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

/// Supported public key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ed25519,
    Secp256k1,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Secp256k1 => "secp256k1",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(KeyType::Ed25519),
            "secp256k1" => Ok(KeyType::Secp256k1),
            other => Err(KeyError::UnknownKeyType(other.to_string())),
        }
    }
}

/// A validator public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum PublicKey {
    Ed25519([u8; ED25519_KEY_SIZE]),
    Secp256k1([u8; SECP256K1_KEY_SIZE]),
}

impl PublicKey {
    /// Construct a key from raw bytes, checking the expected length for
    /// the algorithm.
    pub fn from_bytes(key_type: KeyType, bytes: &[u8]) -> Result<Self, KeyError> {
        match key_type {
            KeyType::Ed25519 => {
                let arr: [u8; ED25519_KEY_SIZE] =
                    bytes.try_into().map_err(|_| KeyError::InvalidLength {
                        key_type,
                        expected: ED25519_KEY_SIZE,
                        actual: bytes.len(),
                    })?;
                Ok(PublicKey::Ed25519(arr))
            }
            KeyType::Secp256k1 => {
                let arr: [u8; SECP256K1_KEY_SIZE] =
                    bytes.try_into().map_err(|_| KeyError::InvalidLength {
                        key_type,
                        expected: SECP256K1_KEY_SIZE,
                        actual: bytes.len(),
                    })?;
                Ok(PublicKey::Secp256k1(arr))
            }
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Ed25519(_) => KeyType::Ed25519,
            PublicKey::Secp256k1(_) => KeyType::Secp256k1,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PublicKey::Ed25519(bytes) => bytes,
            PublicKey::Secp256k1(bytes) => bytes,
        }
    }

    /// Derive the address for this key.
    pub fn address(&self) -> Address {
        let digest = blake3::hash(self.as_bytes());
        let mut addr = [0u8; ADDRESS_SIZE];
        addr.copy_from_slice(&digest.as_bytes()[..ADDRESS_SIZE]);
        Address(addr)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey::{}({})",
            match self {
                PublicKey::Ed25519(_) => "Ed25519",
                PublicKey::Secp256k1(_) => "Secp256k1",
            },
            hex::encode(self.as_bytes())
        )
    }
}

/// Errors from key and address parsing.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("unknown key type: {0}")]
    UnknownKeyType(String),

    #[error("invalid {key_type} key length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        key_type: KeyType,
        expected: usize,
        actual: usize,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
