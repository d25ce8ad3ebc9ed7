//! Filesystem storage.
//!
//! # Storage Layout
//!
//! ```text
//! {root}/
//! ├── registry.json      # RegistryIndex: name -> variant -> entry
//! └── blobs/
//!     └── <sha256>.json  # one file per blob
//! ```

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{RegistryEntry, Storage, StorageError, blob_hash, parse_blob_url, receipt};
use crate::config::storage_dir;
use crate::consts::REGISTRY_INDEX_VERSION;

const SCHEME: &str = "file";
const BLOBS_DIR: &str = "blobs";
const REGISTRY_FILENAME: &str = "registry.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegistryIndex {
  version: u32,
  #[serde(default)]
  packages: BTreeMap<String, BTreeMap<String, RegistryEntry>>,
}

impl RegistryIndex {
  fn new() -> Self {
    Self {
      version: REGISTRY_INDEX_VERSION,
      packages: BTreeMap::new(),
    }
  }
}

/// Storage rooted at a directory. URLs use the `file://` scheme.
#[derive(Debug)]
pub struct FileStorage {
  root: PathBuf,
  /// Serializes read-modify-write cycles of the registry index.
  registry_lock: Mutex<()>,
}

impl FileStorage {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      registry_lock: Mutex::new(()),
    }
  }

  /// Storage at [`storage_dir`].
  pub fn default_location() -> Self {
    Self::new(storage_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn blob_path(&self, hash: &str) -> PathBuf {
    self.root.join(BLOBS_DIR).join(format!("{hash}.json"))
  }

  fn registry_path(&self) -> PathBuf {
    self.root.join(REGISTRY_FILENAME)
  }

  async fn load_index(&self) -> Result<RegistryIndex, StorageError> {
    let content = match fs::read_to_string(self.registry_path()).await {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RegistryIndex::new()),
      Err(e) => return Err(StorageError::Read(e)),
    };

    let index: RegistryIndex = serde_json::from_str(&content).map_err(StorageError::Parse)?;
    if index.version != REGISTRY_INDEX_VERSION {
      return Err(StorageError::UnsupportedVersion {
        found: index.version,
        expected: REGISTRY_INDEX_VERSION,
      });
    }
    Ok(index)
  }

  async fn save_index(&self, index: &RegistryIndex) -> Result<(), StorageError> {
    let content = serde_json::to_string_pretty(index).map_err(StorageError::Serialize)?;
    write_atomic(&self.registry_path(), content.as_bytes()).await
  }
}

/// Write to a uniquely named temp file next to `path`, then rename over it.
async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StorageError> {
  let target = path.to_path_buf();
  let content = content.to_vec();
  let written = tokio::task::spawn_blocking(move || -> io::Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(&content)?;
    temp.persist(&target).map_err(|e| e.error)?;
    Ok(())
  })
  .await
  .map_err(io::Error::other)
  .and_then(|result| result);

  written.map_err(|e| StorageError::WriteFailed {
    target: path.display().to_string(),
    message: e.to_string(),
  })
}

#[async_trait]
impl Storage for FileStorage {
  async fn read_blob(&self, url: &str) -> Result<Value, StorageError> {
    let hash = parse_blob_url(url, SCHEME)?;
    let content = fs::read_to_string(self.blob_path(hash)).await.map_err(|e| {
      if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(url.to_string())
      } else {
        StorageError::Read(e)
      }
    })?;
    serde_json::from_str(&content).map_err(StorageError::Parse)
  }

  async fn put_blob(&self, value: &Value) -> Result<String, StorageError> {
    let hash = blob_hash(value)?;
    let path = self.blob_path(&hash.0);
    let url = format!("{SCHEME}://{hash}");

    if fs::try_exists(&path).await.unwrap_or(false) {
      debug!(url = %url, "blob already stored");
      return Ok(url);
    }

    let content = serde_json::to_vec(value).map_err(StorageError::Serialize)?;
    write_atomic(&path, &content).await?;
    debug!(url = %url, bytes = content.len(), "stored blob");
    Ok(url)
  }

  async fn get_url(&self, name: &str, variant: &str) -> Result<Option<String>, StorageError> {
    let index = self.load_index().await?;
    Ok(
      index
        .packages
        .get(name)
        .and_then(|variants| variants.get(variant))
        .map(|entry| entry.url.clone()),
    )
  }

  async fn publish(
    &self,
    names: &[String],
    variant: &str,
    url: &str,
    meta_url: Option<&str>,
  ) -> Result<Vec<String>, StorageError> {
    let _guard = self.registry_lock.lock().await;
    let mut index = self.load_index().await?;

    let mut receipts = Vec::with_capacity(names.len());
    for name in names {
      index.packages.entry(name.clone()).or_default().insert(
        variant.to_string(),
        RegistryEntry {
          url: url.to_string(),
          meta_url: meta_url.map(str::to_string),
        },
      );
      receipts.push(receipt(name, variant));
    }

    self.save_index(&index).await?;
    debug!(variant, url, names = names.len(), "published package");
    Ok(receipts)
  }
}
