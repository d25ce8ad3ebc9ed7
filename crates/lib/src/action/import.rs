//! The `import` action: reuse the outputs of another published package.
//!
//! ```toml
//! [import.core]
//! source = "core-protocol:2.1.0@main"
//! chain_id = 1   # optional, defaults to the chain being deployed
//! preset = "main"  # optional, overrides the preset in `source`
//! ```
//!
//! The imported deployment becomes `imports.<label>`, exposing its contracts
//! and settings to templates.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::{ActionPlugin, Phase, PackageState, PluginError};
use crate::access::{AccessResult, template_inputs};
use crate::context::{BuildContext, ChainArtifacts, ImportData};
use crate::definition::PackageRef;
use crate::deployment::DeploymentStatus;
use crate::runtime::ChainRuntime;
use crate::template;

#[derive(Debug, Error)]
pub enum ImportError {
  #[error("invalid import config: {0}")]
  InvalidConfig(String),

  #[error("package {package} has no deployment for variant {variant}")]
  NotFound { package: String, variant: String },

  #[error("deployment of {package} at {url} is incomplete")]
  Incomplete { package: String, url: String },
}

#[derive(Debug, Clone, Deserialize)]
struct ImportConfig {
  source: String,
  #[serde(default)]
  chain_id: Option<u64>,
  #[serde(default)]
  preset: Option<String>,
}

/// Fingerprint of an import; a new upstream URL re-runs the import.
#[derive(Debug, Clone, Serialize)]
struct ImportState {
  source: String,
  variant: String,
  url: String,
}

struct ResolvedImport {
  package: PackageRef,
  chain_id: u64,
  variant: String,
  url: String,
}

pub struct ImportAction;

impl ImportAction {
  fn parse_config(config: &Value) -> Result<ImportConfig, ImportError> {
    serde_json::from_value(config.clone()).map_err(|e| ImportError::InvalidConfig(e.to_string()))
  }

  async fn resolve(runtime: &ChainRuntime, ctx: &BuildContext, config: &Value) -> Result<ResolvedImport, PluginError> {
    let config = Self::parse_config(config)?;
    let mut package = PackageRef::parse(&config.source)?;
    if let Some(preset) = config.preset {
      package.preset = preset;
    }
    let chain_id = config.chain_id.unwrap_or(ctx.chain_id);
    let variant = package.variant(chain_id);

    let url = runtime
      .resolve_url(&package.registry_name(), &variant)
      .await?
      .ok_or_else(|| ImportError::NotFound {
        package: package.to_string(),
        variant: variant.clone(),
      })?;

    Ok(ResolvedImport {
      package,
      chain_id,
      variant,
      url,
    })
  }
}

#[async_trait]
impl ActionPlugin for ImportAction {
  fn kind(&self) -> &str {
    "import"
  }

  fn label(&self) -> &str {
    "Import Package"
  }

  fn phase(&self) -> Phase {
    Phase::Import
  }

  fn validate(&self, config: &Value) -> Vec<String> {
    let config = match Self::parse_config(config) {
      Ok(config) => config,
      Err(e) => return vec![e.to_string()],
    };

    let mut issues = Vec::new();
    if !template::is_template(&config.source)
      && let Err(e) = PackageRef::parse(&config.source)
    {
      issues.push(e.to_string());
    }
    if config.preset.as_deref() == Some("") {
      issues.push("preset must not be empty".to_string());
    }
    issues
  }

  async fn get_state(
    &self,
    runtime: &ChainRuntime,
    ctx: &BuildContext,
    config: &Value,
    _package: &PackageState,
  ) -> Result<Value, PluginError> {
    let resolved = Self::resolve(runtime, ctx, config).await?;
    Ok(serde_json::to_value(ImportState {
      source: resolved.package.to_string(),
      variant: resolved.variant,
      url: resolved.url,
    })?)
  }

  fn get_inputs(&self, config: &Value, _known_outputs: &BTreeSet<String>) -> Option<AccessResult> {
    Some(template_inputs(config))
  }

  fn get_outputs(&self, _config: &Value, package: &PackageState) -> Vec<String> {
    vec![format!("imports.{}", package.current_label())]
  }

  async fn exec(
    &self,
    runtime: &ChainRuntime,
    ctx: &BuildContext,
    config: &Value,
    package: &PackageState,
  ) -> Result<ChainArtifacts, PluginError> {
    let resolved = Self::resolve(runtime, ctx, config).await?;
    let record = runtime.load_deployment(&resolved.url).await?;

    if record.status != DeploymentStatus::Complete {
      return Err(Box::new(ImportError::Incomplete {
        package: resolved.package.to_string(),
        url: resolved.url,
      }));
    }

    let mut data = ImportData {
      url: resolved.url,
      preset: resolved.package.preset.clone(),
      chain_id: resolved.chain_id,
      ..Default::default()
    };
    for step in record.state.values() {
      data.contracts.extend(step.artifacts.contracts.clone());
      data.settings.extend(step.artifacts.settings.clone());
    }

    debug!(
      step = %package.current_step,
      source = %resolved.package,
      contracts = data.contracts.len(),
      "imported package"
    );

    let mut artifacts = ChainArtifacts::default();
    artifacts.imports.insert(package.current_label().to_string(), data);
    Ok(artifacts)
  }
}
