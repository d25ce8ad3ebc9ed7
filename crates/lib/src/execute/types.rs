//! Types for build execution.
//!
//! This module defines the error type, options and report of a build.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::PluginError;
use crate::context::BuildContext;
use crate::deployment::StepState;
use crate::graph::GraphError;
use crate::storage::StorageError;
use crate::template::TemplateError;

/// Errors that can occur during a build.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// The definition did not produce a valid graph.
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// No plugin is registered for an action kind.
  #[error("no plugin registered for action kind '{0}'")]
  PluginNotFound(String),

  /// Two steps produced the same label in one namespace.
  #[error("{step} produces {namespace}.{label}, which was already produced by {prior}")]
  DuplicateOutputLabel {
    namespace: String,
    label: String,
    step: String,
    prior: String,
  },

  /// The prior deployment belongs to another chain.
  #[error("deployment is for chain {expected}, but the provider is connected to chain {actual}")]
  ChainMismatch { expected: u64, actual: u64 },

  /// A plugin hook failed.
  #[error("step {step} failed: {source}")]
  StepFailed {
    step: String,
    #[source]
    source: PluginError,
  },

  /// A template in the step's config could not be resolved.
  #[error("step {step}: {source}")]
  Template {
    step: String,
    #[source]
    source: TemplateError,
  },

  /// A plugin exceeded its timeout.
  #[error("step {step} timed out after {after:?}")]
  Timeout { step: String, after: Duration },

  /// Transactions were given for adoption but the kind cannot adopt them.
  #[error("step {0} does not support importing existing transactions")]
  ImportUnsupported(String),

  /// No step could run while some remained.
  #[error("build stalled with pending steps: {}", .pending.join(", "))]
  Stalled { pending: Vec<String> },

  #[error("storage error: {0}")]
  Storage(#[from] StorageError),

  /// The fingerprint of a step could not be hashed.
  #[error("failed to hash state of {step}: {source}")]
  Hash {
    step: String,
    #[source]
    source: serde_json::Error,
  },

  /// Artifacts of a step could not be converted for the context.
  #[error("invalid artifacts from {step}: {source}")]
  Artifacts {
    step: String,
    #[source]
    source: serde_json::Error,
  },
}

impl ExecuteError {
  /// Wrap a plugin error, keeping template errors distinguishable.
  pub fn step(step: &str, error: PluginError) -> Self {
    match error.downcast::<TemplateError>() {
      Ok(source) => ExecuteError::Template {
        step: step.to_string(),
        source: *source,
      },
      Err(source) => ExecuteError::StepFailed {
        step: step.to_string(),
        source,
      },
    }
  }
}

/// Lifecycle of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
  NotStarted,
  Running,
  Completed,
  /// Stopped at a step boundary; committed steps are kept.
  Cancelled,
  Failed,
}

impl fmt::Display for BuildStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BuildStatus::NotStarted => "not-started",
      BuildStatus::Running => "running",
      BuildStatus::Completed => "completed",
      BuildStatus::Cancelled => "cancelled",
      BuildStatus::Failed => "failed",
    };
    write!(f, "{name}")
  }
}

/// Options supplied for a single build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOptions {
  /// Setting overrides applied by `var` actions.
  #[serde(default)]
  pub settings: BTreeMap<String, Value>,

  /// Step id -> hashes of transactions sent outside the engine to adopt
  /// instead of executing the step.
  #[serde(default)]
  pub adopt: BTreeMap<String, Vec<String>>,

  /// Free-form metadata stored with the record.
  #[serde(default)]
  pub meta: BTreeMap<String, Value>,
}

/// Outcome of [`super::Builder::build`].
#[derive(Debug)]
pub struct BuildReport {
  pub status: BuildStatus,
  /// State of every committed step.
  pub state: BTreeMap<String, StepState>,
  /// Running context after the last committed step.
  pub context: BuildContext,
  /// Steps whose `exec` or `import_existing` ran.
  pub executed: Vec<String>,
  /// Steps whose previous artifacts were reused.
  pub reused: Vec<String>,
  pub error: Option<ExecuteError>,
}

impl BuildReport {
  pub fn is_complete(&self) -> bool {
    self.status == BuildStatus::Completed
  }
}
