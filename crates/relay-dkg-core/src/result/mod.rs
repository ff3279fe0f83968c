//! DKG result and its canonical hash
//!
//! A [`DkgResult`] is produced by the key generation subsystem and never
//! modified afterwards. Everything that has to decide "which result" compares
//! [`DkgResultHash`]es, computed over the canonical serialization:
//!
//! | bytes | field |
//! |---|---|
//! | 1 | success flag (1/0) |
//! | n | group public key, verbatim |
//! | N | one byte (1/0) per `disqualified` entry |
//! | N | one byte (1/0) per `inactive` entry |

pub mod votes;

pub use votes::DkgResultsVotes;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Size of a result hash in bytes
pub const HASH_SIZE: usize = 32;

/// Outcome of distributed key generation as published on chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgResult {
    /// Whether key generation produced a usable group key
    pub success: bool,
    /// Group public key, empty when `success` is false
    pub group_public_key: Vec<u8>,
    /// Per-member disqualification flags, indexed by member index - 1
    pub disqualified: Vec<bool>,
    /// Per-member inactivity flags, indexed by member index - 1
    pub inactive: Vec<bool>,
}

impl DkgResult {
    /// Canonical byte serialization; total and deterministic.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            1 + self.group_public_key.len() + self.disqualified.len() + self.inactive.len(),
        );
        bytes.push(self.success as u8);
        bytes.extend_from_slice(&self.group_public_key);
        bytes.extend(self.disqualified.iter().map(|flag| *flag as u8));
        bytes.extend(self.inactive.iter().map(|flag| *flag as u8));
        bytes
    }

    /// Hash of the canonical serialization
    pub fn hash(&self) -> DkgResultHash {
        DkgResultHash::of(self)
    }

    /// Compare against a possibly absent result.
    ///
    /// An absent result never equals a present one, even an empty one.
    pub fn equals(&self, other: Option<&DkgResult>) -> bool {
        other.map_or(false, |other| self == other)
    }

    /// Number of members flagged as disqualified or inactive
    pub fn misbehaved_count(&self) -> usize {
        self.disqualified
            .iter()
            .zip(self.inactive.iter())
            .filter(|(disqualified, inactive)| **disqualified || **inactive)
            .count()
    }
}

/// Fixed-size handle identifying a [`DkgResult`]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DkgResultHash(pub [u8; HASH_SIZE]);

impl DkgResultHash {
    /// Hash a result
    pub fn of(result: &DkgResult) -> Self {
        let digest = Sha3_256::digest(result.serialize());
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&digest);
        Self(hash)
    }

    /// Hash a result that may be absent; absence is a caller error.
    pub fn from_optional(result: Option<&DkgResult>) -> Result<Self> {
        result
            .map(Self::of)
            .ok_or_else(|| Error::InvalidInput("cannot hash an absent DKG result".into()))
    }

    /// Parse a hash from a byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let hash: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "result hash must be {} bytes, got {}",
                HASH_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(hash))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DkgResultHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DkgResultHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for DkgResultHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
