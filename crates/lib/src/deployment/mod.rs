//! Persisted deployment records.
//!
//! A record captures one build of a package on one chain: the definition
//! used, the build options, the fingerprint hash and artifacts of every step
//! that completed, and whether all steps completed. The next build on the
//! same chain reads it back to skip unchanged steps.
//!
//! Records are versioned with [`DEPLOYMENT_FORMAT_VERSION`]; any other
//! version is rejected instead of being read with the wrong layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::consts::DEPLOYMENT_FORMAT_VERSION;
use crate::context::ChainArtifacts;
use crate::definition::{Definition, PackageRef};
use crate::storage::{Storage, StorageError};
use crate::util::hash::ContentHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
  Complete,
  Partial,
}

/// Persisted outcome of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
  /// Hash of the fingerprint returned by the plugin's `get_state`.
  pub hash: ContentHash,
  #[serde(default)]
  pub artifacts: ChainArtifacts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
  pub version: u32,
  pub def: Definition,
  #[serde(default)]
  pub options: BTreeMap<String, Value>,
  #[serde(default)]
  pub state: BTreeMap<String, StepState>,
  pub status: DeploymentStatus,
  #[serde(default)]
  pub meta: BTreeMap<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub misc_url: Option<String>,
  pub chain_id: u64,
  pub timestamp: u64,
}

impl DeploymentRecord {
  /// Decode a record, checking the format version before anything else.
  pub fn from_value(value: Value) -> Result<Self, StorageError> {
    let found = value
      .get("version")
      .and_then(Value::as_u64)
      .and_then(|v| u32::try_from(v).ok())
      .unwrap_or(0);
    if found != DEPLOYMENT_FORMAT_VERSION {
      return Err(StorageError::UnsupportedVersion {
        found,
        expected: DEPLOYMENT_FORMAT_VERSION,
      });
    }
    serde_json::from_value(value).map_err(StorageError::Parse)
  }

  pub fn to_value(&self) -> Result<Value, StorageError> {
    serde_json::to_value(self).map_err(StorageError::Serialize)
  }

  pub fn is_complete(&self) -> bool {
    self.status == DeploymentStatus::Complete
  }
}

/// Read a record from a blob URL.
pub async fn read_deployment(storage: &dyn Storage, url: &str) -> Result<DeploymentRecord, StorageError> {
  let value = storage.read_blob(url).await?;
  DeploymentRecord::from_value(value)
}

/// Find the latest record published for `package` on `chain_id`.
///
/// Returns the record URL together with the record.
pub async fn load_deployment(
  storage: &dyn Storage,
  package: &PackageRef,
  chain_id: u64,
) -> Result<Option<(String, DeploymentRecord)>, StorageError> {
  let variant = package.variant(chain_id);
  let Some(url) = storage.get_url(&package.registry_name(), &variant).await? else {
    debug!(package = %package, variant = %variant, "no prior deployment");
    return Ok(None);
  };
  let record = read_deployment(storage, &url).await?;
  Ok(Some((url, record)))
}

/// Store a record and publish it as `name:version` and `name:latest`.
///
/// Returns the record URL and the publish receipts.
pub async fn save_deployment(
  storage: &dyn Storage,
  package: &PackageRef,
  record: &DeploymentRecord,
) -> Result<(String, Vec<String>), StorageError> {
  let url = storage.put_blob(&record.to_value()?).await?;

  let mut names = vec![package.registry_name()];
  let latest = package.latest_name();
  if !names.contains(&latest) {
    names.push(latest);
  }

  let variant = package.variant(record.chain_id);
  let meta_url = if record.meta.is_empty() {
    None
  } else {
    let meta = serde_json::to_value(&record.meta).map_err(StorageError::Serialize)?;
    Some(storage.put_blob(&meta).await?)
  };

  let receipts = storage.publish(&names, &variant, &url, meta_url.as_deref()).await?;
  info!(
    package = %package,
    variant = %variant,
    url = %url,
    status = ?record.status,
    "saved deployment"
  );
  Ok((url, receipts))
}
