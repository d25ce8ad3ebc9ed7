use std::sync::Arc;

use chainplan_lib::execute::{BuildOptions, ExecuteError};
use chainplan_lib::storage::MemoryStorage;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::common::{ExecLog, definition, deploy, deploy_with, registry, runtime};

fn core(owner: &str) -> chainplan_lib::definition::Definition {
  definition(json!({
    "name": "core",
    "version": "1.0.0",
    "var": {"main": {"owner": owner}},
    "contract": {"Token": {"args": ["<%= settings.owner %>"]}},
  }))
}

fn app() -> chainplan_lib::definition::Definition {
  definition(json!({
    "name": "app",
    "version": "1.0.0",
    "import": {"core": {"source": "core:1.0.0"}},
    "contract": {"Market": {"token": "<%= imports.core.contracts.Token.address %>"}},
  }))
}

#[tokio::test]
async fn import_exposes_upstream_contracts() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);

  let upstream = deploy(&core("0x01"), &registry, &runtime(storage.clone()), 1).await.unwrap();
  let outcome = deploy(&app(), &registry, &runtime(storage.clone()), 2).await.unwrap();

  let imported = &outcome.record.state["import.core"].artifacts.imports["core"];
  assert_eq!(imported.url, upstream.url);
  assert_eq!(imported.settings["owner"], json!("0x01"));
  assert_eq!(
    imported.contracts["Token"],
    upstream.record.state["contract.Token"].artifacts.contracts["Token"]
  );
  assert_eq!(outcome.report.executed, ["import.core", "contract.Market"]);
}

#[tokio::test]
async fn import_is_reused_until_upstream_changes() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);

  deploy(&core("0x01"), &registry, &runtime(storage.clone()), 1).await.unwrap();
  deploy(&app(), &registry, &runtime(storage.clone()), 2).await.unwrap();

  let unchanged = deploy(&app(), &registry, &runtime(storage.clone()), 3).await.unwrap();
  assert!(unchanged.report.executed.is_empty());

  deploy(&core("0x02"), &registry, &runtime(storage.clone()), 4).await.unwrap();
  log.clear();
  let refreshed = deploy(&app(), &registry, &runtime(storage.clone()), 5).await.unwrap();
  assert_eq!(refreshed.report.executed, ["import.core", "contract.Market"]);
  assert_eq!(log.steps(), ["contract.Market"]);
}

#[tokio::test]
async fn missing_upstream_fails_the_import() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();

  let error = deploy(&app(), &registry(&log), &runtime(storage), 1).await.unwrap_err();
  match error {
    ExecuteError::StepFailed { step, source } => {
      assert_eq!(step, "import.core");
      assert!(source.to_string().contains("has no deployment"));
    }
    other => panic!("expected StepFailed, got {other:?}"),
  }
}

#[tokio::test]
async fn partial_upstream_cannot_be_imported() {
  let storage = Arc::new(MemoryStorage::new());
  let log = ExecLog::default();
  let registry = registry(&log);

  let cancel = CancellationToken::new();
  cancel.cancel();
  deploy_with(
    &core("0x01"),
    &registry,
    &runtime(storage.clone()),
    BuildOptions::default(),
    1,
    &cancel,
  )
  .await
  .unwrap();

  let error = deploy(&app(), &registry, &runtime(storage), 2).await.unwrap_err();
  assert!(error.to_string().contains("incomplete"));
}
