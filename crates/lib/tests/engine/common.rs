//! Shared helpers for engine integration tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chainplan_lib::access::{self, AccessResult};
use chainplan_lib::action::{ActionPlugin, ActionRegistry, PackageState, Phase, PluginError};
use chainplan_lib::context::{BuildContext, ChainArtifacts, ContractData, TransactionData};
use chainplan_lib::definition::Definition;
use chainplan_lib::execute::{self, BuildOptions, DeployOutcome, DeployPlan, EventBus, ExecuteError};
use chainplan_lib::runtime::{ChainProvider, ChainRuntime, ContractArtifact, Signer, TxnIntent};
use chainplan_lib::storage::Storage;
use chainplan_lib::util::hash::hash_json;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

pub const CHAIN_ID: u64 = 13370;

struct TestSigner(String);

impl Signer for TestSigner {
  fn address(&self) -> &str {
    &self.0
  }
}

/// Provider for a local chain that never fails.
pub struct TestProvider {
  pub chain_id: u64,
  pub ephemeral: bool,
}

impl TestProvider {
  pub fn new() -> Self {
    Self {
      chain_id: CHAIN_ID,
      ephemeral: false,
    }
  }
}

#[async_trait]
impl ChainProvider for TestProvider {
  fn chain_id(&self) -> u64 {
    self.chain_id
  }

  fn is_ephemeral(&self) -> bool {
    self.ephemeral
  }

  async fn get_signer(&self, address: &str) -> Result<Arc<dyn Signer>, PluginError> {
    Ok(Arc::new(TestSigner(address.to_string())))
  }

  async fn get_default_signer(&self, _intent: &TxnIntent, _salt: Option<&str>) -> Result<Arc<dyn Signer>, PluginError> {
    Ok(Arc::new(TestSigner("0xdeployer".to_string())))
  }

  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, PluginError> {
    Ok(ContractArtifact {
      contract_name: name.to_string(),
      bytecode: "0x6080".to_string(),
      ..Default::default()
    })
  }
}

/// Calls made to [`ChainAction::exec`], shared between clones.
#[derive(Clone, Default)]
pub struct ExecLog {
  steps: Arc<Mutex<Vec<String>>>,
  failing: Arc<Mutex<BTreeSet<String>>>,
  count: Arc<AtomicUsize>,
}

impl ExecLog {
  pub fn steps(&self) -> Vec<String> {
    self.steps.lock().unwrap().clone()
  }

  pub fn count(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }

  pub fn clear(&self) {
    self.steps.lock().unwrap().clear();
    self.count.store(0, Ordering::SeqCst);
  }

  pub fn fail(&self, step: &str) {
    self.failing.lock().unwrap().insert(step.to_string());
  }

  pub fn recover(&self, step: &str) {
    self.failing.lock().unwrap().remove(step);
  }
}

/// Stand-in for the `contract` and `invoke` kinds. Addresses and transaction
/// hashes are derived from the resolved config.
pub struct ChainAction {
  kind: &'static str,
  phase: Phase,
  log: ExecLog,
}

#[async_trait]
impl ActionPlugin for ChainAction {
  fn kind(&self) -> &str {
    self.kind
  }

  fn label(&self) -> &str {
    "Chain action"
  }

  fn phase(&self) -> Phase {
    self.phase
  }

  async fn get_state(
    &self,
    _runtime: &ChainRuntime,
    _ctx: &BuildContext,
    config: &Value,
    _package: &PackageState,
  ) -> Result<Value, PluginError> {
    Ok(config.clone())
  }

  fn get_inputs(&self, config: &Value, _known_outputs: &BTreeSet<String>) -> Option<AccessResult> {
    Some(access::template_inputs(config))
  }

  fn get_outputs(&self, _config: &Value, package: &PackageState) -> Vec<String> {
    let namespace = if self.phase == Phase::Contract { "contracts" } else { "txns" };
    vec![format!("{namespace}.{}", package.current_label())]
  }

  async fn exec(
    &self,
    runtime: &ChainRuntime,
    _ctx: &BuildContext,
    config: &Value,
    package: &PackageState,
  ) -> Result<ChainArtifacts, PluginError> {
    let step = package.current_step.clone();
    if self.log.failing.lock().unwrap().contains(&step) {
      return Err(format!("{step} reverted").into());
    }
    self.log.steps.lock().unwrap().push(step.clone());
    self.log.count.fetch_add(1, Ordering::SeqCst);

    let label = package.current_label().to_string();
    let digest = hash_json(&json!({"step": step, "config": config}))?.0;
    let mut artifacts = ChainArtifacts::default();
    if self.phase == Phase::Contract {
      let artifact = runtime.artifact(&label).await?;
      artifacts.contracts.insert(
        label,
        ContractData {
          address: format!("0x{}", &digest[..40]),
          deploy_txn_hash: format!("0x{digest}"),
          contract_name: artifact.contract_name,
          deployed_on: step,
          ..Default::default()
        },
      );
    } else {
      artifacts.txns.insert(
        label,
        TransactionData {
          hash: format!("0x{digest}"),
          deployed_on: step,
          ..Default::default()
        },
      );
    }
    Ok(artifacts)
  }
}

/// Built-in kinds plus `contract` and `invoke` backed by `log`.
pub fn registry(log: &ExecLog) -> ActionRegistry {
  let mut registry = ActionRegistry::with_builtins();
  registry
    .register(ChainAction {
      kind: "contract",
      phase: Phase::Contract,
      log: log.clone(),
    })
    .unwrap();
  registry
    .register(ChainAction {
      kind: "invoke",
      phase: Phase::Invoke,
      log: log.clone(),
    })
    .unwrap();
  registry
}

pub fn runtime(storage: Arc<dyn Storage>) -> ChainRuntime {
  ChainRuntime::new(Arc::new(TestProvider::new()), storage)
}

/// Runtime whose event bus cancels `cancel` after `after` steps have been
/// committed.
pub fn cancelling_runtime(storage: Arc<dyn Storage>, cancel: &CancellationToken, after: usize) -> ChainRuntime {
  let token = cancel.clone();
  let committed = AtomicUsize::new(0);
  let events = EventBus::new().with_observer(move |event: &execute::BuildEvent| {
    if let execute::BuildEvent::PostStep { .. } = event
      && committed.fetch_add(1, Ordering::SeqCst) + 1 == after
    {
      token.cancel();
    }
  });
  runtime(storage).with_events(events)
}

pub fn definition(value: Value) -> Definition {
  Definition::from_json(value).unwrap()
}

/// Token system: one setting, two contracts, one call.
pub fn token_definition() -> Definition {
  definition(json!({
    "name": "token",
    "version": "1.0.0",
    "var": {"main": {"owner": "0x0000000000000000000000000000000000000001", "supply": "1000"}},
    "contract": {
      "Token": {"args": ["<%= settings.owner %>", "<%= parseEther(settings.supply) %>"]},
      "Vault": {"args": ["<%= contracts.Token.address %>"]},
    },
    "invoke": {
      "fund": {"target": "<%= contracts.Token.address %>", "to": "<%= contracts.Vault.address %>"},
    }
  }))
}

pub async fn deploy_with(
  definition: &Definition,
  registry: &ActionRegistry,
  runtime: &ChainRuntime,
  options: BuildOptions,
  timestamp: u64,
  cancel: &CancellationToken,
) -> Result<DeployOutcome, ExecuteError> {
  execute::deploy(
    DeployPlan {
      definition,
      registry,
      runtime,
      preset: "main".to_string(),
      options,
      strict_dependencies: false,
      timestamp,
    },
    cancel,
  )
  .await
}

pub async fn deploy(
  definition: &Definition,
  registry: &ActionRegistry,
  runtime: &ChainRuntime,
  timestamp: u64,
) -> Result<DeployOutcome, ExecuteError> {
  deploy_with(
    definition,
    registry,
    runtime,
    BuildOptions::default(),
    timestamp,
    &CancellationToken::new(),
  )
  .await
}
