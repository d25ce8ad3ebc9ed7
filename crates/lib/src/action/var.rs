//! The `var` action: named settings.
//!
//! ```toml
//! [var.main]
//! owner = "0x0000000000000000000000000000000000000001"
//! supply = "<%= parseEther('1000') %>"
//! ```
//!
//! Each key becomes `settings.<key>`. A value passed in the build options
//! under the same key replaces the configured one.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;

use super::{ActionPlugin, PackageState, PluginError, config_entries};
use crate::access::{AccessResult, template_inputs};
use crate::context::{BuildContext, ChainArtifacts};
use crate::runtime::ChainRuntime;

pub struct VarAction;

impl VarAction {
  fn settings(ctx: &BuildContext, config: &Value) -> BTreeMap<String, Value> {
    config_entries(config)
      .map(|(key, value)| {
        let value = ctx.overrides.get(key).unwrap_or(value);
        (key.clone(), value.clone())
      })
      .collect()
  }
}

#[async_trait]
impl ActionPlugin for VarAction {
  fn kind(&self) -> &str {
    "var"
  }

  fn label(&self) -> &str {
    "Variable"
  }

  fn requires_unique_label(&self) -> bool {
    false
  }

  fn validate(&self, config: &Value) -> Vec<String> {
    let mut issues = Vec::new();
    if !config.is_object() {
      issues.push("var config must be a table".to_string());
      return issues;
    }
    for (key, value) in config_entries(config) {
      if value.is_object() || value.is_array() || value.is_null() {
        issues.push(format!("setting '{key}' must be a string, number or boolean"));
      }
    }
    issues
  }

  async fn get_state(
    &self,
    _runtime: &ChainRuntime,
    ctx: &BuildContext,
    config: &Value,
    _package: &PackageState,
  ) -> Result<Value, PluginError> {
    Ok(serde_json::to_value(Self::settings(ctx, config))?)
  }

  fn get_inputs(&self, config: &Value, _known_outputs: &BTreeSet<String>) -> Option<AccessResult> {
    Some(template_inputs(config))
  }

  fn get_outputs(&self, config: &Value, _package: &PackageState) -> Vec<String> {
    config_entries(config).map(|(key, _)| format!("settings.{key}")).collect()
  }

  async fn exec(
    &self,
    _runtime: &ChainRuntime,
    ctx: &BuildContext,
    config: &Value,
    _package: &PackageState,
  ) -> Result<ChainArtifacts, PluginError> {
    Ok(ChainArtifacts {
      settings: Self::settings(ctx, config),
      ..Default::default()
    })
  }
}
