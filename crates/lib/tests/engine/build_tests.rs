use std::sync::Arc;

use chainplan_lib::definition::PackageRef;
use chainplan_lib::deployment::{self, DeploymentRecord, DeploymentStatus};
use chainplan_lib::execute::{BuildEvent, BuildOptions, BuildStatus, ChannelObserver, EventBus, ExecuteError, SkipReason};
use chainplan_lib::storage::MemoryStorage;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::common::{
  CHAIN_ID, ExecLog, cancelling_runtime, definition, deploy, deploy_with, registry, runtime, token_definition,
};

fn token_package() -> PackageRef {
  PackageRef::new("token", "1.0.0", "main")
}

async fn stored_record(storage: &MemoryStorage) -> DeploymentRecord {
  let (_, record) = deployment::load_deployment(storage, &token_package(), CHAIN_ID)
    .await
    .unwrap()
    .unwrap();
  record
}

#[tokio::test]
async fn first_build_executes_every_step() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();

  let outcome = deploy(&token_definition(), &registry(&log), &runtime(storage.clone()), 1).await.unwrap();

  assert_eq!(log.steps(), ["contract.Token", "contract.Vault", "invoke.fund"]);
  assert_eq!(
    outcome.report.executed,
    ["var.main", "contract.Token", "contract.Vault", "invoke.fund"]
  );
  assert!(outcome.record.is_complete());
  assert_eq!(outcome.record.state.len(), 4);
  assert_eq!(
    outcome.receipts,
    ["token:1.0.0@13370-main", "token:latest@13370-main"]
  );

  let token = &outcome.report.context.contracts["Token"];
  assert_eq!(
    outcome.report.context.contracts["Vault"],
    json!({
      "address": outcome.record.state["contract.Vault"].artifacts.contracts["Vault"].address,
      "abi": null,
      "constructorArgs": [],
      "deployTxnHash": outcome.record.state["contract.Vault"].artifacts.contracts["Vault"].deploy_txn_hash,
      "contractName": "Vault",
      "sourceName": "",
      "deployedOn": "contract.Vault",
    })
  );
  assert!(token["address"].as_str().unwrap().starts_with("0x"));
}

#[tokio::test]
async fn rerun_without_changes_executes_nothing() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);
  let definition = token_definition();

  let first = deploy(&definition, &registry, &runtime(storage.clone()), 1).await.unwrap();
  log.clear();

  let (observer, mut rx) = ChannelObserver::new();
  let rerun_runtime = runtime(storage.clone()).with_events(EventBus::new().with_observer(observer));
  let second = deploy(&definition, &registry, &rerun_runtime, 2).await.unwrap();

  assert_eq!(log.count(), 0);
  assert!(second.report.executed.is_empty());
  assert_eq!(second.report.reused.len(), 4);
  assert_eq!(
    second.record,
    DeploymentRecord {
      timestamp: 2,
      ..first.record.clone()
    }
  );

  let mut skipped = 0;
  while let Ok(event) = rx.try_recv() {
    if let BuildEvent::StepSkipped { reason, .. } = event {
      assert_eq!(reason, SkipReason::Unchanged);
      skipped += 1;
    }
  }
  assert_eq!(skipped, 4);
}

#[tokio::test]
async fn changed_setting_reruns_dependents_only() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);
  let definition = token_definition();

  deploy(&definition, &registry, &runtime(storage.clone()), 1).await.unwrap();
  log.clear();

  let options = BuildOptions {
    settings: [("supply".to_string(), json!("2000"))].into(),
    ..Default::default()
  };
  let outcome = deploy_with(
    &definition,
    &registry,
    &runtime(storage.clone()),
    options,
    2,
    &CancellationToken::new(),
  )
  .await
  .unwrap();

  // Token's args change; Vault and fund read Token's new address.
  assert_eq!(log.steps(), ["contract.Token", "contract.Vault", "invoke.fund"]);
  assert_eq!(outcome.record.options["supply"], json!("2000"));
}

#[tokio::test]
async fn cancel_persists_partial_record_and_resumes() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);
  let definition = token_definition();

  let cancel = CancellationToken::new();
  let outcome = deploy_with(
    &definition,
    &registry,
    &cancelling_runtime(storage.clone(), &cancel, 2),
    BuildOptions::default(),
    1,
    &cancel,
  )
  .await
  .unwrap();

  assert_eq!(outcome.report.status, BuildStatus::Cancelled);
  assert_eq!(outcome.record.status, DeploymentStatus::Partial);
  assert_eq!(
    outcome.record.state.keys().collect::<Vec<_>>(),
    ["contract.Token", "var.main"]
  );
  assert_eq!(stored_record(&storage).await, outcome.record);

  log.clear();
  let resumed = deploy(&definition, &registry, &runtime(storage.clone()), 2).await.unwrap();
  assert_eq!(log.steps(), ["contract.Vault", "invoke.fund"]);
  assert_eq!(resumed.report.reused, ["var.main", "contract.Token"]);
  assert!(resumed.record.is_complete());
}

#[tokio::test]
async fn cancelled_before_start_commits_nothing() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let cancel = CancellationToken::new();
  cancel.cancel();

  let outcome = deploy_with(
    &token_definition(),
    &registry(&log),
    &runtime(storage.clone()),
    BuildOptions::default(),
    1,
    &cancel,
  )
  .await
  .unwrap();

  assert_eq!(outcome.report.status, BuildStatus::Cancelled);
  assert!(outcome.record.state.is_empty());
  assert_eq!(log.count(), 0);
}

#[tokio::test]
async fn cancelled_rebuild_keeps_previous_steps() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);
  let definition = token_definition();

  let first = deploy(&definition, &registry, &runtime(storage.clone()), 1).await.unwrap();
  log.clear();

  let cancel = CancellationToken::new();
  cancel.cancel();
  let cancelled = deploy_with(
    &definition,
    &registry,
    &runtime(storage.clone()),
    BuildOptions::default(),
    2,
    &cancel,
  )
  .await
  .unwrap();
  assert_eq!(cancelled.record.status, DeploymentStatus::Partial);
  assert_eq!(cancelled.record.state, first.record.state);

  let resumed = deploy(&definition, &registry, &runtime(storage.clone()), 3).await.unwrap();
  assert_eq!(log.count(), 0);
  assert_eq!(resumed.report.reused.len(), 4);
  assert!(resumed.record.is_complete());
  assert_eq!(resumed.record.state, first.record.state);
}

#[tokio::test]
async fn failed_rebuild_keeps_unreached_steps() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);
  let definition = token_definition();

  let first = deploy(&definition, &registry, &runtime(storage.clone()), 1).await.unwrap();
  log.clear();

  log.fail("contract.Token");
  let options = BuildOptions {
    settings: [("supply".to_string(), json!("2000"))].into(),
    ..Default::default()
  };
  let error = deploy_with(
    &definition,
    &registry,
    &runtime(storage.clone()),
    options,
    2,
    &CancellationToken::new(),
  )
  .await
  .unwrap_err();
  assert!(matches!(error, ExecuteError::StepFailed { ref step, .. } if step == "contract.Token"));

  let record = stored_record(&storage).await;
  assert_eq!(record.status, DeploymentStatus::Partial);
  assert_eq!(record.state.len(), 4);
  for step in ["contract.Token", "contract.Vault", "invoke.fund"] {
    assert_eq!(record.state[step], first.record.state[step]);
  }

  // Back on the original settings, every chain step still matches.
  log.recover("contract.Token");
  let resumed = deploy(&definition, &registry, &runtime(storage.clone()), 3).await.unwrap();
  assert_eq!(log.count(), 0);
  assert!(resumed.record.is_complete());
  assert_eq!(resumed.record.state["contract.Vault"], first.record.state["contract.Vault"]);
}

#[tokio::test]
async fn failed_step_persists_partial_record() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);
  let definition = token_definition();

  log.fail("contract.Vault");
  let error = deploy(&definition, &registry, &runtime(storage.clone()), 1).await.unwrap_err();
  match &error {
    ExecuteError::StepFailed { step, .. } => assert_eq!(step, "contract.Vault"),
    other => panic!("expected StepFailed, got {other:?}"),
  }

  let record = stored_record(&storage).await;
  assert_eq!(record.status, DeploymentStatus::Partial);
  assert_eq!(record.state.keys().collect::<Vec<_>>(), ["contract.Token", "var.main"]);

  log.recover("contract.Vault");
  log.clear();
  let resumed = deploy(&definition, &registry, &runtime(storage.clone()), 2).await.unwrap();
  assert_eq!(log.steps(), ["contract.Vault", "invoke.fund"]);
  assert!(resumed.record.is_complete());
}

#[tokio::test]
async fn template_errors_name_the_step() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let definition = definition(json!({
    "name": "broken",
    "version": "1.0.0",
    "contract": {"Token": {"args": ["<%= settings.missing %>"]}},
  }));

  let error = deploy(&definition, &registry(&log), &runtime(storage), 1).await.unwrap_err();
  assert!(matches!(error, ExecuteError::Template { ref step, .. } if step == "contract.Token"));
  assert_eq!(log.count(), 0);
}

#[tokio::test]
async fn adopted_transactions_need_support() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let options = BuildOptions {
    adopt: [("contract.Token".to_string(), vec!["0xabc".to_string()])].into(),
    ..Default::default()
  };

  let error = deploy_with(
    &token_definition(),
    &registry(&log),
    &runtime(storage),
    options,
    1,
    &CancellationToken::new(),
  )
  .await
  .unwrap_err();
  assert!(matches!(error, ExecuteError::ImportUnsupported(ref step) if step == "contract.Token"));
}

#[tokio::test]
async fn events_follow_step_order() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let (observer, mut rx) = ChannelObserver::new();
  let runtime = runtime(storage).with_events(EventBus::new().with_observer(observer));

  deploy(&token_definition(), &registry(&log), &runtime, 1).await.unwrap();

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  let pre: Vec<&str> = events
    .iter()
    .filter_map(|event| match event {
      BuildEvent::PreStep { step } => Some(step.as_str()),
      _ => None,
    })
    .collect();
  assert_eq!(pre, ["var.main", "contract.Token", "contract.Vault", "invoke.fund"]);

  let deployed = events
    .iter()
    .filter(|event| matches!(event, BuildEvent::ContractDeployed { .. }))
    .count();
  assert_eq!(deployed, 2);
  assert!(events.iter().any(|event| matches!(
    event,
    BuildEvent::TxnExecuted { step, name, .. } if step == "invoke.fund" && name == "fund"
  )));
}
