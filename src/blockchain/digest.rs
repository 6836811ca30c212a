use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Number of leading zero bytes a digest needs to meet the work target
pub const DIFFICULTY_BYTES: usize = 3;

/// Errors that can occur while handling digests
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Represents the output of the record hash function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(Vec<u8>);

impl Digest {
    /// Wraps raw digest bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Digest(bytes)
    }

    /// Parses the canonical lowercase hex form
    pub fn from_hex(s: &str) -> Result<Self, DigestError> {
        Ok(Digest(hex::decode(s)?))
    }

    /// Gets the raw digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Checks whether the digest meets the work target
    ///
    /// # Returns
    ///
    /// true iff the first `DIFFICULTY_BYTES` bytes are all zero
    pub fn is_valid(&self) -> bool {
        self.0.len() >= DIFFICULTY_BYTES && self.0[..DIFFICULTY_BYTES].iter().all(|b| *b == 0)
    }

    /// Encodes the digest as lowercase hex, two characters per byte
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Vec<u8>> for Digest {
    fn from(bytes: Vec<u8>) -> Self {
        Digest(bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
