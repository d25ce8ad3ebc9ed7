//! Content-addressed blob storage and the package registry.
//!
//! Blobs are JSON documents addressed by the SHA-256 of their canonical form,
//! so storing the same content twice yields the same URL. The registry maps a
//! package name and variant to the URL of its latest deployment record.

mod file;
mod memory;

use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::util::hash::{ContentHash, hash_json};

pub use file::FileStorage;
pub use memory::MemoryStorage;

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("blob not found: {0}")]
  NotFound(String),

  #[error("failed to write {target}: {message}")]
  WriteFailed { target: String, message: String },

  #[error("failed to read storage: {0}")]
  Read(#[source] io::Error),

  #[error("failed to parse stored data: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize data: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported format version {found} (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },

  #[error("unsupported url: {0}")]
  UnsupportedUrl(String),
}

/// A registry entry: where a package variant's record lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub meta_url: Option<String>,
}

/// Blob and registry backend.
#[async_trait]
pub trait Storage: Send + Sync {
  async fn read_blob(&self, url: &str) -> Result<Value, StorageError>;

  /// Store a blob and return its content-derived URL.
  async fn put_blob(&self, value: &Value) -> Result<String, StorageError>;

  /// URL published for `name` (`package:version`) and `variant`.
  async fn get_url(&self, name: &str, variant: &str) -> Result<Option<String>, StorageError>;

  /// Point every name in `names` at `url` for `variant`.
  ///
  /// Returns one receipt (`name@variant`) per published name.
  async fn publish(
    &self,
    names: &[String],
    variant: &str,
    url: &str,
    meta_url: Option<&str>,
  ) -> Result<Vec<String>, StorageError>;
}

/// Content hash used as a blob address.
pub fn blob_hash(value: &Value) -> Result<ContentHash, StorageError> {
  hash_json(value).map_err(StorageError::Serialize)
}

/// Extract the hash from `<scheme>://<hash>`.
pub(crate) fn parse_blob_url<'a>(url: &'a str, scheme: &str) -> Result<&'a str, StorageError> {
  let hash = url
    .strip_prefix(scheme)
    .and_then(|rest| rest.strip_prefix("://"))
    .ok_or_else(|| StorageError::UnsupportedUrl(url.to_string()))?;

  if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
    return Err(StorageError::UnsupportedUrl(url.to_string()));
  }
  Ok(hash)
}

pub(crate) fn receipt(name: &str, variant: &str) -> String {
  format!("{name}@{variant}")
}
