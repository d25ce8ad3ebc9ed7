//! Build definitions.
//!
//! A definition names a package and lists its actions as a two-level tree:
//! action kind, then label, then the raw config of that action. In TOML:
//!
//! ```toml
//! name = "token"
//! version = "1.0.0"
//!
//! [var.main]
//! owner = "0x0000000000000000000000000000000000000001"
//!
//! [contract.Token]
//! artifact = "Token"
//! args = ["<%= settings.owner %>"]
//! ```

mod package;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use package::{DEFAULT_PRESET, DEFAULT_VERSION, PackageRef};

/// Raw action tree: kind -> label -> config.
pub type RawActions = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("failed to parse definition: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("failed to parse definition: {0}")]
  Json(#[from] serde_json::Error),

  #[error("invalid definition: {0}")]
  Invalid(String),

  #[error("invalid package reference '{input}': {reason}")]
  InvalidPackageRef { input: String, reason: String },
}

/// A parsed build definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
  pub name: String,
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(flatten)]
  pub actions: RawActions,
}

impl Definition {
  pub fn from_toml_str(source: &str) -> Result<Self, DefinitionError> {
    let def: Definition = toml::from_str(source)?;
    def.validate()?;
    Ok(def)
  }

  pub fn from_json(value: Value) -> Result<Self, DefinitionError> {
    let def: Definition = serde_json::from_value(value)?;
    def.validate()?;
    Ok(def)
  }

  /// The package this definition publishes under `preset`.
  pub fn package(&self, preset: &str) -> PackageRef {
    PackageRef::new(&self.name, &self.version, preset)
  }

  fn validate(&self) -> Result<(), DefinitionError> {
    let reference = format!("{}:{}", self.name, self.version);
    PackageRef::parse(&reference)?;

    for (kind, actions) in &self.actions {
      for (label, config) in actions {
        if label.is_empty() || label.contains('.') {
          return Err(DefinitionError::Invalid(format!("invalid action label '{kind}.{label}'")));
        }
        if !config.is_object() {
          return Err(DefinitionError::Invalid(format!("action '{kind}.{label}' must be a table")));
        }
      }
    }
    Ok(())
  }
}
