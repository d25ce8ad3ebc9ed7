//! Action plugins.
//!
//! Every step of a build is an action of some kind (`var`, `import`,
//! `contract`, ...). Each kind is implemented by an [`ActionPlugin`] and
//! registered in an [`ActionRegistry`] that is handed to the graph builder and
//! the execution engine. Adding a kind means implementing the trait; nothing
//! else in the crate needs to change.
//!
//! # Built-in kinds
//!
//! - [`var::VarAction`] - key/value settings
//! - [`import::ImportAction`] - outputs of another published package

pub mod import;
mod registry;
pub mod var;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::AccessResult;
use crate::context::{BuildContext, ChainArtifacts};
use crate::definition::PackageRef;
use crate::runtime::ChainRuntime;

pub use registry::{ActionRegistry, RegistryError};

/// Error type returned by plugin hooks.
pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// Scheduling phase of an action kind.
///
/// Within each pass the engine visits phases in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Import,
  Contract,
  Invoke,
  Script,
}

/// Fixed order in which phases are scanned.
pub const PHASE_ORDER: [Phase; 4] = [Phase::Import, Phase::Contract, Phase::Invoke, Phase::Script];

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::Import => "import",
      Phase::Contract => "contract",
      Phase::Invoke => "invoke",
      Phase::Script => "script",
    };
    write!(f, "{name}")
  }
}

/// Package-level information passed to every hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
  pub package: PackageRef,
  pub chain_id: u64,
  /// Id of the step being processed (`kind.label`). Empty outside a step.
  pub current_step: String,
}

impl PackageState {
  pub fn new(package: PackageRef, chain_id: u64) -> Self {
    Self {
      package,
      chain_id,
      current_step: String::new(),
    }
  }

  pub fn for_step(&self, step: &str) -> Self {
    Self {
      current_step: step.to_string(),
      ..self.clone()
    }
  }

  /// Label part of the current step id.
  pub fn current_label(&self) -> &str {
    self
      .current_step
      .split_once('.')
      .map(|(_, label)| label)
      .unwrap_or(&self.current_step)
  }
}

/// The behavior contract of an action kind.
///
/// Hooks receive the raw config (as written in the definition) or the
/// resolved config (after [`ActionPlugin::config_inject`]) as noted.
#[async_trait]
pub trait ActionPlugin: Send + Sync {
  /// Kind name used in definitions, e.g. `"contract"`.
  fn kind(&self) -> &str;

  /// Human-readable name of the kind.
  fn label(&self) -> &str;

  fn phase(&self) -> Phase {
    Phase::Script
  }

  /// Whether labels of this kind must be unique across all kinds.
  fn requires_unique_label(&self) -> bool {
    true
  }

  /// Upper bound for a single `exec` or `import_existing` call.
  fn timeout(&self) -> Option<Duration> {
    None
  }

  /// Check a raw config, returning one message per problem.
  fn validate(&self, _config: &Value) -> Vec<String> {
    Vec::new()
  }

  /// Resolve templates in a raw config.
  fn config_inject(
    &self,
    ctx: &BuildContext,
    config: &Value,
    _package: &PackageState,
  ) -> Result<Value, PluginError> {
    Ok(ctx.inject_templates(config)?)
  }

  /// Deterministic description of everything that affects the chain.
  ///
  /// The engine hashes the returned value; an unchanged hash means `exec` is
  /// skipped and the previous artifacts are reused.
  async fn get_state(
    &self,
    runtime: &ChainRuntime,
    ctx: &BuildContext,
    config: &Value,
    package: &PackageState,
  ) -> Result<Value, PluginError>;

  /// Context paths read by a raw config. `None` means only explicit
  /// `depends` are used.
  fn get_inputs(&self, _config: &Value, _known_outputs: &BTreeSet<String>) -> Option<AccessResult> {
    None
  }

  /// Context paths (`namespace.label`) this action will produce.
  fn get_outputs(&self, _config: &Value, _package: &PackageState) -> Vec<String> {
    Vec::new()
  }

  /// Perform the action.
  async fn exec(
    &self,
    runtime: &ChainRuntime,
    ctx: &BuildContext,
    config: &Value,
    package: &PackageState,
  ) -> Result<ChainArtifacts, PluginError>;

  /// Adopt transactions that were sent outside of the engine.
  ///
  /// Returns `Ok(None)` when the kind does not support adoption.
  async fn import_existing(
    &self,
    _runtime: &ChainRuntime,
    _ctx: &BuildContext,
    _config: &Value,
    _package: &PackageState,
    _txn_hashes: &[String],
  ) -> Result<Option<ChainArtifacts>, PluginError> {
    Ok(None)
  }
}

/// Settings-like keys of a config: everything except `depends`.
pub(crate) fn config_entries(config: &Value) -> impl Iterator<Item = (&String, &Value)> {
  config
    .as_object()
    .into_iter()
    .flat_map(|map| map.iter())
    .filter(|(key, _)| key.as_str() != crate::consts::DEPENDS_KEY)
}
