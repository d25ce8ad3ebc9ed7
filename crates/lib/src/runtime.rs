//! Chain access handed to action plugins.
//!
//! RPC and wallet mechanics live behind [`ChainProvider`] and [`Signer`].
//! [`ChainRuntime`] bundles the provider with storage and the event bus, and
//! caches every contract artifact fetched during a build so they can be
//! stored alongside the deployment record.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::action::PluginError;
use crate::deployment::{self, DeploymentRecord};
use crate::execute::{BuildEvent, EventBus};
use crate::storage::{Storage, StorageError};

/// Compiled output of a contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
  pub contract_name: String,
  #[serde(default)]
  pub source_name: String,
  #[serde(default)]
  pub abi: Value,
  pub bytecode: String,
  #[serde(default)]
  pub deployed_bytecode: String,
  #[serde(default)]
  pub link_references: Value,
}

/// What a transaction is going to do, used to pick a default signer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnIntent {
  /// `None` for contract creation.
  pub to: Option<String>,
  pub data: String,
  #[serde(default)]
  pub value: Option<String>,
}

pub trait Signer: Send + Sync {
  fn address(&self) -> &str;
}

/// Connection to the chain being deployed to.
#[async_trait]
pub trait ChainProvider: Send + Sync {
  fn chain_id(&self) -> u64;

  /// True for local or forked chains whose state is thrown away.
  fn is_ephemeral(&self) -> bool {
    false
  }

  async fn get_signer(&self, address: &str) -> Result<Arc<dyn Signer>, PluginError>;

  async fn get_default_signer(&self, intent: &TxnIntent, salt: Option<&str>) -> Result<Arc<dyn Signer>, PluginError>;

  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, PluginError>;
}

/// Everything a plugin may use to touch the outside world.
pub struct ChainRuntime {
  provider: Arc<dyn ChainProvider>,
  storage: Arc<dyn Storage>,
  events: EventBus,
  artifacts: Mutex<BTreeMap<String, ContractArtifact>>,
}

impl ChainRuntime {
  pub fn new(provider: Arc<dyn ChainProvider>, storage: Arc<dyn Storage>) -> Self {
    Self {
      provider,
      storage,
      events: EventBus::new(),
      artifacts: Mutex::new(BTreeMap::new()),
    }
  }

  pub fn with_events(mut self, events: EventBus) -> Self {
    self.events = events;
    self
  }

  pub fn provider(&self) -> &dyn ChainProvider {
    self.provider.as_ref()
  }

  pub fn storage(&self) -> &dyn Storage {
    self.storage.as_ref()
  }

  pub fn events(&self) -> &EventBus {
    &self.events
  }

  pub fn chain_id(&self) -> u64 {
    self.provider.chain_id()
  }

  pub async fn signer(&self, address: &str) -> Result<Arc<dyn Signer>, PluginError> {
    self.provider.get_signer(address).await
  }

  pub async fn default_signer(&self, intent: &TxnIntent, salt: Option<&str>) -> Result<Arc<dyn Signer>, PluginError> {
    self.provider.get_default_signer(intent, salt).await
  }

  /// Fetch a contract artifact, remembering it for the misc blob.
  pub async fn artifact(&self, name: &str) -> Result<ContractArtifact, PluginError> {
    let mut cache = self.artifacts.lock().await;
    if let Some(artifact) = cache.get(name) {
      return Ok(artifact.clone());
    }
    let artifact = self.provider.get_artifact(name).await?;
    cache.insert(name.to_string(), artifact.clone());
    Ok(artifact)
  }

  /// Pre-populate the artifact cache, e.g. from a prior build's misc blob.
  pub async fn seed_artifacts(&self, artifacts: BTreeMap<String, ContractArtifact>) {
    let mut cache = self.artifacts.lock().await;
    for (name, artifact) in artifacts {
      cache.entry(name).or_insert(artifact);
    }
  }

  /// Artifacts collected so far.
  pub async fn misc(&self) -> MiscData {
    MiscData {
      artifacts: self.artifacts.lock().await.clone(),
    }
  }

  /// Look up a published package, emitting `ResolveDeploy`.
  pub async fn resolve_url(&self, name: &str, variant: &str) -> Result<Option<String>, StorageError> {
    let url = self.storage.get_url(name, variant).await?;
    debug!(package = name, variant, url = ?url, "resolved package");
    self.events.emit(&BuildEvent::ResolveDeploy {
      package: name.to_string(),
      variant: variant.to_string(),
      url: url.clone(),
    });
    Ok(url)
  }

  /// Download a deployment record, emitting `DownloadDeploy`.
  pub async fn load_deployment(&self, url: &str) -> Result<DeploymentRecord, StorageError> {
    self.events.emit(&BuildEvent::DownloadDeploy { url: url.to_string() });
    deployment::read_deployment(self.storage(), url).await
  }
}

/// Build-wide data stored next to the deployment record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiscData {
  #[serde(default)]
  pub artifacts: BTreeMap<String, ContractArtifact>,
}
