use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{RegistryEntry, Storage, StorageError, blob_hash, parse_blob_url, receipt};

const SCHEME: &str = "mem";

/// Storage kept entirely in memory. URLs use the `mem://` scheme.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  blobs: RwLock<HashMap<String, Value>>,
  registry: RwLock<BTreeMap<(String, String), RegistryEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored blobs.
  pub async fn blob_count(&self) -> usize {
    self.blobs.read().await.len()
  }

  pub async fn entry(&self, name: &str, variant: &str) -> Option<RegistryEntry> {
    self
      .registry
      .read()
      .await
      .get(&(name.to_string(), variant.to_string()))
      .cloned()
  }
}

#[async_trait]
impl Storage for MemoryStorage {
  async fn read_blob(&self, url: &str) -> Result<Value, StorageError> {
    let hash = parse_blob_url(url, SCHEME)?;
    self
      .blobs
      .read()
      .await
      .get(hash)
      .cloned()
      .ok_or_else(|| StorageError::NotFound(url.to_string()))
  }

  async fn put_blob(&self, value: &Value) -> Result<String, StorageError> {
    let hash = blob_hash(value)?;
    let url = format!("{SCHEME}://{hash}");
    self.blobs.write().await.insert(hash.0, value.clone());
    Ok(url)
  }

  async fn get_url(&self, name: &str, variant: &str) -> Result<Option<String>, StorageError> {
    Ok(self.entry(name, variant).await.map(|entry| entry.url))
  }

  async fn publish(
    &self,
    names: &[String],
    variant: &str,
    url: &str,
    meta_url: Option<&str>,
  ) -> Result<Vec<String>, StorageError> {
    let mut registry = self.registry.write().await;
    let mut receipts = Vec::with_capacity(names.len());
    for name in names {
      registry.insert(
        (name.clone(), variant.to_string()),
        RegistryEntry {
          url: url.to_string(),
          meta_url: meta_url.map(str::to_string),
        },
      );
      receipts.push(receipt(name, variant));
    }
    Ok(receipts)
  }
}
