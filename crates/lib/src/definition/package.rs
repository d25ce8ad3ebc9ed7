//! Package references of the form `name:version@preset`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::DefinitionError;

pub const DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_PRESET: &str = "main";

/// A reference to a published deployment package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
  pub name: String,
  pub version: String,
  pub preset: String,
}

impl PackageRef {
  pub fn new(name: impl Into<String>, version: impl Into<String>, preset: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
      preset: preset.into(),
    }
  }

  /// Parse `name[:version][@preset]`.
  pub fn parse(input: &str) -> Result<Self, DefinitionError> {
    let invalid = |reason: &str| DefinitionError::InvalidPackageRef {
      input: input.to_string(),
      reason: reason.to_string(),
    };

    let (rest, preset) = match input.split_once('@') {
      Some((rest, preset)) => (rest, preset),
      None => (input, DEFAULT_PRESET),
    };
    let (name, version) = match rest.split_once(':') {
      Some((name, version)) => (name, version),
      None => (rest, DEFAULT_VERSION),
    };

    if name.is_empty() {
      return Err(invalid("missing package name"));
    }
    if version.is_empty() {
      return Err(invalid("empty version"));
    }
    if preset.is_empty() {
      return Err(invalid("empty preset"));
    }
    if [name, version, preset].iter().any(|part| part.contains([':', '@', '/'])) {
      return Err(invalid("unexpected separator"));
    }

    Ok(Self::new(name, version, preset))
  }

  /// Registry key for one deployment of this package: `<chain_id>-<preset>`.
  pub fn variant(&self, chain_id: u64) -> String {
    format!("{chain_id}-{}", self.preset)
  }

  /// Registry name: `name:version`.
  pub fn registry_name(&self) -> String {
    format!("{}:{}", self.name, self.version)
  }

  /// Registry name tracking the most recent publish: `name:latest`.
  pub fn latest_name(&self) -> String {
    format!("{}:{DEFAULT_VERSION}", self.name)
  }
}

impl fmt::Display for PackageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}@{}", self.name, self.version, self.preset)
  }
}

impl FromStr for PackageRef {
  type Err = DefinitionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}
