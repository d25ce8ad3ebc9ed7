use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::PackageState;

/// One action of a definition, identified by `kind.label`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionNode {
  pub id: String,
  pub kind: String,
  pub label: String,
  /// Config as written in the definition.
  pub config: Value,
  /// Ids listed in the config's `depends`.
  pub explicit_deps: Vec<String>,
  /// Ids inferred from the template paths the config reads.
  pub inferred_deps: Vec<String>,
  /// Union of explicit and inferred ids with redundant edges removed.
  pub deps: Vec<String>,
  /// Context paths this action produces.
  pub outputs: Vec<String>,
}

/// A group of actions that share the same layer dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLayer {
  /// Sorted ids of every action in the layer.
  pub actions: Vec<String>,
  /// Sorted ids of the layers this layer depends on.
  pub depends: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GraphOptions {
  /// Fail instead of warning when a template cannot be analyzed and the
  /// action lists no explicit dependencies.
  pub strict_dependencies: bool,
  pub package: PackageState,
}

impl GraphOptions {
  pub fn new(package: PackageState) -> Self {
    Self {
      strict_dependencies: false,
      package,
    }
  }

  pub fn strict(mut self, strict: bool) -> Self {
    self.strict_dependencies = strict;
    self
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("unknown action kind: {0}")]
  UnknownKind(String),

  #[error("label '{label}' is used by both {first} and {second}")]
  DuplicateLabel { label: String, first: String, second: String },

  #[error("output '{output}' is produced by both {first} and {second}")]
  DuplicateOutput { output: String, first: String, second: String },

  #[error("invalid action configuration:{}", format_issues(.0))]
  SchemaInvalid(BTreeMap<String, Vec<String>>),

  #[error("{action} depends on unknown action {dependency}")]
  MissingDependency { action: String, dependency: String },

  #[error(
    "cannot infer dependencies of {action}: template '{template}' could not be analyzed; list them in `depends`"
  )]
  AmbiguousDependency { action: String, template: String },

  #[error("dependency cycle: {}", .0.join(" -> "))]
  Cycle(Vec<String>),

  #[error("redundant dependency {action} -> {dependency} remained after pruning")]
  RedundantEdge { action: String, dependency: String },
}

fn format_issues(issues: &BTreeMap<String, Vec<String>>) -> String {
  let mut out = String::new();
  for (action, messages) in issues {
    for message in messages {
      out.push_str(&format!("\n  {action}: {message}"));
    }
  }
  out
}
