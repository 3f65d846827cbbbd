//! Owner identity hashing.
//!
//! A raw external identity (e.g. an email address) is hashed exactly once,
//! where it enters the system. Everything downstream only sees [`OwnerId`].

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::ValidationError;

/// Hashed, non-reversible owner key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an owner key that was already produced by [`hash_identity`],
    /// e.g. one read back from storage. Does not hash again.
    pub fn from_hashed(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OwnerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase hex SHA-256 of the raw identity. Deterministic and unsalted, so
/// keys are stable across restarts.
pub fn hash_identity(raw: &str) -> Result<OwnerId, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::InvalidOwner);
    }
    let mut h = Sha256::new();
    h.update(raw.as_bytes());
    Ok(OwnerId(hex::encode(h.finalize())))
}
