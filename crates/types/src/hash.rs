//! Content hashing.
//!
//! All hashing in Basalt uses blake3. [`Hash`] is the canonical 32-byte
//! digest used for block identifiers, validator-set hashes, and result
//! roots.

use sbor::prelude::*;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of bytes in a [`Hash`].
pub const HASH_SIZE: usize = 32;

/// A 32-byte blake3 digest. Defaults to [`Hash::ZERO`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
#[sbor(transparent)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    /// The all-zero hash, used as a placeholder before genesis.
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    /// Hash arbitrary bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Hash(*blake3::hash(bytes).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }

    /// Parse a hash from a hex string (64 characters).
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = hex::decode(s).map_err(|e| HexError::Invalid(e.to_string()))?;
        let arr: [u8; HASH_SIZE] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| HexError::WrongLength {
                expected: HASH_SIZE,
                actual: b.len(),
            })?;
        Ok(Hash(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors from parsing hex-encoded hashes.
#[derive(Debug, Error)]
pub enum HexError {
    #[error("invalid hex: {0}")]
    Invalid(String),

    #[error("wrong length: expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_round_trip() {
        let h = Hash::of(b"basalt");
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn hash_rejects_bad_hex() {
        assert!(Hash::from_hex("zz").is_err());
        assert!(Hash::from_hex("ab").is_err(), "short input must be rejected");
    }

    #[test]
    fn zero_hash_is_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::of(b"x").is_zero());
    }
}
