//! Hashing utilities for content addressing and change detection.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hash
//! - `hash_json()`: canonical JSON hashing used for step fingerprints and blobs
//! - `hash_bytes()`: arbitrary byte hashing

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type HashError = serde_json::Error;

/// A full 64-character SHA-256 hash.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string, e.g. `"9f86d081884c7d65..."`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a value through its canonical JSON form.
///
/// The value is first converted to a `serde_json::Value`, whose maps keep
/// their keys sorted, so `HashMap` fields and struct fields hash the same way
/// regardless of insertion order.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<ContentHash, HashError> {
  let canonical = serde_json::to_value(value)?;
  let serialized = serde_json::to_string(&canonical)?;
  Ok(hash_bytes(serialized.as_bytes()))
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}
