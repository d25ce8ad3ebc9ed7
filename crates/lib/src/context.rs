//! The evaluation context shared by all steps of a build.
//!
//! The context holds the namespaces actions read through templates
//! (`settings`, `contracts`, `imports`, `txns`, `extras`) plus a few scalars
//! describing the build. Artifacts produced by a step are merged into it
//! before any dependent step runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::PackageRef;
use crate::execute::ExecuteError;
use crate::template::{self, Expr, Scope, Segment, TemplateError, helpers};

/// A deployed contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractData {
  pub address: String,
  #[serde(default)]
  pub abi: Value,
  #[serde(default)]
  pub constructor_args: Vec<Value>,
  #[serde(default)]
  pub deploy_txn_hash: String,
  pub contract_name: String,
  #[serde(default)]
  pub source_name: String,
  /// Step id that produced this contract.
  pub deployed_on: String,
}

/// An executed transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
  pub hash: String,
  /// Decoded events by event name.
  #[serde(default)]
  pub events: BTreeMap<String, Vec<Value>>,
  pub deployed_on: String,
  #[serde(default)]
  pub signer: String,
}

/// Outputs of an imported package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportData {
  pub url: String,
  pub preset: String,
  pub chain_id: u64,
  #[serde(default)]
  pub contracts: BTreeMap<String, ContractData>,
  #[serde(default)]
  pub settings: BTreeMap<String, Value>,
}

/// Everything a single step produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainArtifacts {
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub settings: BTreeMap<String, Value>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub contracts: BTreeMap<String, ContractData>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub txns: BTreeMap<String, TransactionData>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub imports: BTreeMap<String, ImportData>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub extras: BTreeMap<String, Value>,
}

impl ChainArtifacts {
  pub fn is_empty(&self) -> bool {
    self.settings.is_empty()
      && self.contracts.is_empty()
      && self.txns.is_empty()
      && self.imports.is_empty()
      && self.extras.is_empty()
  }

  /// Every `(namespace, label)` pair these artifacts publish.
  pub fn labels(&self) -> Vec<(&'static str, &str)> {
    let mut labels = Vec::new();
    labels.extend(self.settings.keys().map(|k| ("settings", k.as_str())));
    labels.extend(self.contracts.keys().map(|k| ("contracts", k.as_str())));
    labels.extend(self.txns.keys().map(|k| ("txns", k.as_str())));
    labels.extend(self.imports.keys().map(|k| ("imports", k.as_str())));
    labels.extend(self.extras.keys().map(|k| ("extras", k.as_str())));
    labels
  }
}

/// Running context for template evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildContext {
  pub settings: BTreeMap<String, Value>,
  pub contracts: BTreeMap<String, Value>,
  pub txns: BTreeMap<String, Value>,
  pub imports: BTreeMap<String, Value>,
  pub extras: BTreeMap<String, Value>,
  pub chain_id: u64,
  pub timestamp: u64,
  pub package: PackageRef,
  /// Setting values supplied by the build options.
  pub overrides: BTreeMap<String, Value>,
  /// `namespace.label` -> id of the step that produced it.
  owners: BTreeMap<String, String>,
}

impl BuildContext {
  pub fn new(chain_id: u64, timestamp: u64, package: PackageRef) -> Self {
    Self {
      settings: BTreeMap::new(),
      contracts: BTreeMap::new(),
      txns: BTreeMap::new(),
      imports: BTreeMap::new(),
      extras: BTreeMap::new(),
      chain_id,
      timestamp,
      package,
      overrides: BTreeMap::new(),
      owners: BTreeMap::new(),
    }
  }

  pub fn with_overrides(mut self, overrides: BTreeMap<String, Value>) -> Self {
    self.overrides = overrides;
    self
  }

  /// A context with the same scalars and overrides but empty namespaces.
  pub fn fresh(&self) -> Self {
    Self::new(self.chain_id, self.timestamp, self.package.clone()).with_overrides(self.overrides.clone())
  }

  /// Step that produced `namespace.label`, if any.
  pub fn owner(&self, namespace: &str, label: &str) -> Option<&str> {
    self.owners.get(&format!("{namespace}.{label}")).map(String::as_str)
  }

  /// Merge the artifacts of `step` into the namespaces.
  ///
  /// Fails without modifying the context if any label is already owned by a
  /// different step.
  pub fn merge(&mut self, step: &str, artifacts: &ChainArtifacts) -> Result<(), ExecuteError> {
    for (namespace, label) in artifacts.labels() {
      let prior = self.owner(namespace, label);
      if let Some(prior) = prior.filter(|prior| *prior != step) {
        return Err(ExecuteError::DuplicateOutputLabel {
          namespace: namespace.to_string(),
          label: label.to_string(),
          step: step.to_string(),
          prior: prior.to_string(),
        });
      }
    }

    for (k, v) in &artifacts.settings {
      self.settings.insert(k.clone(), v.clone());
    }
    for (k, v) in &artifacts.contracts {
      self.contracts.insert(k.clone(), artifact_value(step, v)?);
    }
    for (k, v) in &artifacts.txns {
      self.txns.insert(k.clone(), artifact_value(step, v)?);
    }
    for (k, v) in &artifacts.imports {
      self.imports.insert(k.clone(), artifact_value(step, v)?);
    }
    for (k, v) in &artifacts.extras {
      self.extras.insert(k.clone(), v.clone());
    }
    for (namespace, label) in artifacts.labels() {
      self.owners.insert(format!("{namespace}.{label}"), step.to_string());
    }
    Ok(())
  }

  /// Evaluate a template string.
  ///
  /// A string consisting of exactly one tag keeps the JSON type of the
  /// evaluated value; anything else renders to a string.
  pub fn expand(&self, input: &str) -> Result<Value, TemplateError> {
    let segments = template::parse(input)?;
    if let [Segment::Expr(expr)] = segments.as_slice() {
      return template::evaluate(expr, self);
    }
    template::render_segments(&segments, self).map(Value::String)
  }

  /// Expand every template string inside a config, recursively.
  pub fn inject_templates(&self, config: &Value) -> Result<Value, TemplateError> {
    Ok(match config {
      Value::String(s) if template::is_template(s) => self.expand(s)?,
      Value::Array(items) => Value::Array(
        items
          .iter()
          .map(|item| self.inject_templates(item))
          .collect::<Result<Vec<_>, TemplateError>>()?,
      ),
      Value::Object(map) => Value::Object(
        map
          .iter()
          .map(|(k, v)| Ok((k.clone(), self.inject_templates(v)?)))
          .collect::<Result<_, TemplateError>>()?,
      ),
      other => other.clone(),
    })
  }

  fn namespace(&self, name: &str) -> Option<&BTreeMap<String, Value>> {
    match name {
      "settings" => Some(&self.settings),
      "contracts" => Some(&self.contracts),
      "txns" => Some(&self.txns),
      "imports" => Some(&self.imports),
      "extras" => Some(&self.extras),
      _ => None,
    }
  }
}

fn artifact_value<T: Serialize>(step: &str, value: &T) -> Result<Value, ExecuteError> {
  serde_json::to_value(value).map_err(|source| ExecuteError::Artifacts {
    step: step.to_string(),
    source,
  })
}

impl Scope for BuildContext {
  type Value = Value;

  fn lookup(&self, name: &str) -> Result<Value, TemplateError> {
    if let Some(ns) = self.namespace(name) {
      return Ok(Value::Object(ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect()));
    }
    match name {
      "chainId" => Ok(Value::from(self.chain_id)),
      "timestamp" => Ok(Value::from(self.timestamp)),
      "package" => Ok(serde_json::json!({
        "name": self.package.name,
        "version": self.package.version,
        "preset": self.package.preset,
      })),
      _ => Err(TemplateError::UnknownIdentifier(name.to_string())),
    }
  }

  fn member(&self, target: &Value, key: &str) -> Result<Option<Value>, TemplateError> {
    match target {
      Value::Object(map) => Ok(map.get(key).cloned()),
      Value::Array(items) => Ok(key.parse::<usize>().ok().and_then(|i| items.get(i)).cloned()),
      Value::Null => Err(TemplateError::NotIndexable(format!("null (reading '{key}')"))),
      _ => Ok(None),
    }
  }

  fn is_helper(&self, name: &str) -> bool {
    helpers::is_helper(name)
  }

  fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    helpers::call(name, args)
  }

  fn literal(&self, value: &Value) -> Value {
    value.clone()
  }

  fn key_of(&self, value: &Value, expr: &Expr) -> Result<String, TemplateError> {
    match value {
      Value::String(s) => Ok(s.clone()),
      Value::Number(n) => Ok(n.to_string()),
      other => Err(TemplateError::NotIndexable(format!("{other} used as key in {expr}"))),
    }
  }

  fn render(&self, value: &Value) -> Result<String, TemplateError> {
    Ok(helpers::display(value))
  }
}
