//! Build execution.
//!
//! The [`Builder`] walks a [`DependencyGraph`] one step at a time:
//! - steps run only after all their dependencies
//! - each pass visits phases in [`PHASE_ORDER`], then steps in topological order
//! - a step whose fingerprint hash matches the previous build reuses its
//!   previous artifacts instead of calling `exec`
//! - cancellation is checked between steps only
//!
//! [`deploy`] wraps a build with loading the previous record and persisting
//! the new one.

mod events;
mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::{ActionPlugin, ActionRegistry, PHASE_ORDER, PackageState, PluginError};
use crate::consts::DEPLOYMENT_FORMAT_VERSION;
use crate::context::{BuildContext, ChainArtifacts};
use crate::definition::Definition;
use crate::deployment::{self, DeploymentRecord, DeploymentStatus, StepState};
use crate::graph::{ActionNode, DependencyGraph, GraphOptions};
use crate::runtime::{ChainRuntime, MiscData};
use crate::storage::StorageError;
use crate::util::hash::hash_json;

pub use events::{BuildEvent, BuildObserver, ChannelObserver, EventBus, SkipReason};
pub use types::{BuildOptions, BuildReport, BuildStatus, ExecuteError};

/// Runs the steps of one graph against one chain.
pub struct Builder<'a> {
  graph: &'a DependencyGraph,
  registry: &'a ActionRegistry,
  runtime: &'a ChainRuntime,
  package: PackageState,
  options: BuildOptions,
  timestamp: u64,
  status: BuildStatus,
}

/// Result of a single step.
struct StepOutcome {
  state: StepState,
  executed: bool,
}

impl<'a> Builder<'a> {
  pub fn new(
    graph: &'a DependencyGraph,
    registry: &'a ActionRegistry,
    runtime: &'a ChainRuntime,
    package: PackageState,
    options: BuildOptions,
  ) -> Self {
    Self {
      graph,
      registry,
      runtime,
      package,
      options,
      timestamp: 0,
      status: BuildStatus::NotStarted,
    }
  }

  /// Value of the `timestamp` template scalar.
  pub fn with_timestamp(mut self, timestamp: u64) -> Self {
    self.timestamp = timestamp;
    self
  }

  pub fn status(&self) -> BuildStatus {
    self.status
  }

  /// Run every step, reusing `prior` step states whose fingerprint is
  /// unchanged.
  ///
  /// Never returns early on a step error: the report carries the error along
  /// with every step committed before it.
  pub async fn build(
    &mut self,
    prior: Option<&BTreeMap<String, StepState>>,
    cancel: &CancellationToken,
  ) -> BuildReport {
    self.status = BuildStatus::Running;
    let chain_id = self.runtime.chain_id();
    info!(
      package = %self.package.package,
      chain_id,
      steps = self.graph.len(),
      "starting build"
    );

    let empty = BTreeMap::new();
    let prior = prior.unwrap_or(&empty);

    let mut ctx = BuildContext::new(chain_id, self.timestamp, self.package.package.clone())
      .with_overrides(self.options.settings.clone());
    let mut state: BTreeMap<String, StepState> = BTreeMap::new();
    let mut done: BTreeSet<String> = BTreeSet::new();
    let mut executed = Vec::new();
    let mut reused = Vec::new();
    let mut failure = None;
    let mut pass = 0;

    let status = 'passes: loop {
      pass += 1;
      let mut progressed = false;

      for phase in PHASE_ORDER {
        for id in self.graph.topological_order() {
          if done.contains(id) {
            continue;
          }
          let Some(node) = self.graph.node(id) else {
            continue;
          };
          let Some(plugin) = self.registry.get(&node.kind) else {
            failure = Some(ExecuteError::PluginNotFound(node.kind.clone()));
            break 'passes BuildStatus::Failed;
          };
          if plugin.phase() != phase || !node.deps.iter().all(|dep| done.contains(dep)) {
            continue;
          }

          if cancel.is_cancelled() {
            info!(step = %id, completed = done.len(), "build cancelled");
            break 'passes BuildStatus::Cancelled;
          }

          match self.run_step(node, plugin.as_ref(), &mut ctx, prior, &state).await {
            Ok(outcome) => {
              if outcome.executed {
                executed.push(id.clone());
              } else {
                reused.push(id.clone());
              }
              state.insert(id.clone(), outcome.state);
              done.insert(id.clone());
              progressed = true;
            }
            Err(e) => {
              error!(step = %id, error = %e, "step failed");
              failure = Some(e);
              break 'passes BuildStatus::Failed;
            }
          }
        }
      }

      debug!(pass, done = done.len(), total = self.graph.len(), "finished pass");

      if done.len() == self.graph.len() {
        break BuildStatus::Completed;
      }
      if !progressed {
        let pending: Vec<String> = self
          .graph
          .topological_order()
          .iter()
          .filter(|id| !done.contains(*id))
          .cloned()
          .collect();
        failure = Some(ExecuteError::Stalled { pending });
        break BuildStatus::Failed;
      }
    };

    self.status = status;
    info!(
      status = %status,
      executed = executed.len(),
      reused = reused.len(),
      "build finished"
    );

    BuildReport {
      status,
      state,
      context: ctx,
      executed,
      reused,
      error: failure,
    }
  }

  async fn run_step(
    &self,
    node: &ActionNode,
    plugin: &dyn ActionPlugin,
    ctx: &mut BuildContext,
    prior: &BTreeMap<String, StepState>,
    committed: &BTreeMap<String, StepState>,
  ) -> Result<StepOutcome, ExecuteError> {
    let id = node.id.as_str();
    let package = self.package.for_step(id);
    let events = self.runtime.events();
    events.emit(&BuildEvent::PreStep { step: id.to_string() });

    let replayed = if self.runtime.provider().is_ephemeral() {
      Some(self.replay(id, ctx, committed)?)
    } else {
      None
    };
    let step_ctx = replayed.as_ref().unwrap_or(&*ctx);

    let config = plugin
      .config_inject(step_ctx, &node.config, &package)
      .map_err(|e| ExecuteError::step(id, e))?;
    let fingerprint = plugin
      .get_state(self.runtime, step_ctx, &config, &package)
      .await
      .map_err(|e| ExecuteError::step(id, e))?;
    let hash = hash_json(&fingerprint).map_err(|source| ExecuteError::Hash {
      step: id.to_string(),
      source,
    })?;

    let adopt = self.options.adopt.get(id);
    let unchanged = prior.get(id).filter(|previous| adopt.is_none() && previous.hash == hash);

    let (artifacts, executed) = match unchanged {
      Some(previous) => {
        debug!(step = %id, hash = %hash, "step unchanged, reusing artifacts");
        events.emit(&BuildEvent::StepSkipped {
          step: id.to_string(),
          reason: SkipReason::Unchanged,
        });
        (previous.artifacts.clone(), false)
      }
      None => {
        let artifacts = match adopt {
          Some(txn_hashes) => {
            let adopted = with_timeout(
              id,
              plugin.timeout(),
              plugin.import_existing(self.runtime, step_ctx, &config, &package, txn_hashes),
            )
            .await?;
            adopted.ok_or_else(|| ExecuteError::ImportUnsupported(id.to_string()))?
          }
          None => {
            with_timeout(
              id,
              plugin.timeout(),
              plugin.exec(self.runtime, step_ctx, &config, &package),
            )
            .await?
          }
        };
        info!(step = %id, hash = %hash, adopted = adopt.is_some(), "executed step");
        emit_artifact_events(self.runtime.events(), id, &artifacts);
        (artifacts, true)
      }
    };

    ctx.merge(id, &artifacts)?;
    events.emit(&BuildEvent::PostStep {
      step: id.to_string(),
      executed,
    });

    Ok(StepOutcome {
      state: StepState { hash, artifacts },
      executed,
    })
  }

  /// A fresh context holding only the artifacts of the step's transitive
  /// dependencies.
  fn replay(
    &self,
    id: &str,
    ctx: &BuildContext,
    committed: &BTreeMap<String, StepState>,
  ) -> Result<BuildContext, ExecuteError> {
    let deps = self.graph.transitive_dependencies(id);
    let mut replayed = ctx.fresh();
    for dep in self.graph.topological_order().iter().filter(|dep| deps.contains(*dep)) {
      if let Some(step) = committed.get(dep) {
        replayed.merge(dep, &step.artifacts)?;
      }
    }
    Ok(replayed)
  }
}

fn emit_artifact_events(events: &EventBus, step: &str, artifacts: &ChainArtifacts) {
  for (name, contract) in &artifacts.contracts {
    events.emit(&BuildEvent::ContractDeployed {
      step: step.to_string(),
      name: name.clone(),
      address: contract.address.clone(),
    });
  }
  for (name, txn) in &artifacts.txns {
    events.emit(&BuildEvent::TxnExecuted {
      step: step.to_string(),
      name: name.clone(),
      hash: txn.hash.clone(),
    });
  }
}

async fn with_timeout<T>(
  step: &str,
  limit: Option<Duration>,
  fut: impl Future<Output = Result<T, PluginError>>,
) -> Result<T, ExecuteError> {
  let result = match limit {
    Some(after) => tokio::time::timeout(after, fut).await.map_err(|_| ExecuteError::Timeout {
      step: step.to_string(),
      after,
    })?,
    None => fut.await,
  };
  result.map_err(|e| ExecuteError::step(step, e))
}

/// Everything needed to deploy a definition.
pub struct DeployPlan<'a> {
  pub definition: &'a Definition,
  pub registry: &'a ActionRegistry,
  pub runtime: &'a ChainRuntime,
  pub preset: String,
  pub options: BuildOptions,
  pub strict_dependencies: bool,
  /// Seconds since the epoch recorded for this build.
  pub timestamp: u64,
}

/// A persisted deployment.
#[derive(Debug)]
pub struct DeployOutcome {
  pub url: String,
  pub receipts: Vec<String>,
  pub record: DeploymentRecord,
  pub report: BuildReport,
}

/// Build a definition and persist the resulting record.
///
/// The record is written whether the build completes, is cancelled or fails.
/// A failed build returns the step error after the partial record is saved.
pub async fn deploy(plan: DeployPlan<'_>, cancel: &CancellationToken) -> Result<DeployOutcome, ExecuteError> {
  let DeployPlan {
    definition,
    registry,
    runtime,
    preset,
    options,
    strict_dependencies,
    timestamp,
  } = plan;

  let package = definition.package(&preset);
  let chain_id = runtime.chain_id();
  let package_state = PackageState::new(package.clone(), chain_id);

  let graph_options = GraphOptions::new(package_state.clone()).strict(strict_dependencies);
  let graph = DependencyGraph::build(&definition.actions, registry, &graph_options)?;

  let prior = deployment::load_deployment(runtime.storage(), &package, chain_id).await?;
  if let Some((url, record)) = &prior {
    if record.chain_id != chain_id {
      return Err(ExecuteError::ChainMismatch {
        expected: record.chain_id,
        actual: chain_id,
      });
    }
    debug!(url = %url, steps = record.state.len(), status = ?record.status, "loaded prior deployment");
    if let Some(misc_url) = &record.misc_url {
      seed_misc(runtime, misc_url).await;
    }
  }

  let mut builder =
    Builder::new(&graph, registry, runtime, package_state, options.clone()).with_timestamp(timestamp);
  let mut report = builder
    .build(prior.as_ref().map(|(_, record)| &record.state), cancel)
    .await;

  let misc = serde_json::to_value(runtime.misc().await).map_err(StorageError::Serialize)?;
  let misc_url = runtime.storage().put_blob(&misc).await?;

  // Steps this build never reached keep their previous state, so a resumed
  // build can still reuse them once their fingerprint is rechecked.
  let mut state = report.state.clone();
  if !report.is_complete()
    && let Some((_, record)) = &prior
  {
    for (id, step) in &record.state {
      if graph.node(id).is_some() && !state.contains_key(id) {
        debug!(step = %id, "keeping previous state for unreached step");
        state.insert(id.clone(), step.clone());
      }
    }
  }

  let record = DeploymentRecord {
    version: DEPLOYMENT_FORMAT_VERSION,
    def: definition.clone(),
    options: options.settings.clone(),
    state,
    status: if report.is_complete() {
      DeploymentStatus::Complete
    } else {
      DeploymentStatus::Partial
    },
    meta: options.meta.clone(),
    misc_url: Some(misc_url),
    chain_id,
    timestamp,
  };
  let (url, receipts) = deployment::save_deployment(runtime.storage(), &package, &record).await?;

  if let Some(error) = report.error.take() {
    return Err(error);
  }

  Ok(DeployOutcome {
    url,
    receipts,
    record,
    report,
  })
}

/// Load artifacts cached by a previous build so reused steps keep them in
/// the next misc blob.
async fn seed_misc(runtime: &ChainRuntime, misc_url: &str) {
  let misc = match runtime.storage().read_blob(misc_url).await {
    Ok(value) => serde_json::from_value::<MiscData>(value),
    Err(e) => {
      warn!(url = %misc_url, error = %e, "could not read previous misc data");
      return;
    }
  };
  match misc {
    Ok(misc) => runtime.seed_artifacts(misc.artifacts).await,
    Err(e) => warn!(url = %misc_url, error = %e, "could not parse previous misc data"),
  }
}
