use std::sync::Arc;

use chainplan_lib::definition::PackageRef;
use chainplan_lib::deployment;
use chainplan_lib::execute::ExecuteError;
use chainplan_lib::storage::{FileStorage, Storage, StorageError};
use serde_json::json;
use tempfile::TempDir;

use super::common::{CHAIN_ID, ExecLog, deploy, registry, runtime, token_definition};

#[tokio::test]
async fn file_storage_survives_reopening() {
  let temp = TempDir::new().unwrap();
  let log = ExecLog::default();
  let registry = registry(&log);
  let definition = token_definition();

  let first = deploy(&definition, &registry, &runtime(Arc::new(FileStorage::new(temp.path()))), 1)
    .await
    .unwrap();
  assert!(temp.path().join("registry.json").exists());
  log.clear();

  let reopened = Arc::new(FileStorage::new(temp.path()));
  let second = deploy(&definition, &registry, &runtime(reopened.clone()), 2).await.unwrap();
  assert_eq!(log.count(), 0);
  assert_eq!(second.record.state, first.record.state);

  let (url, record) = deployment::load_deployment(reopened.as_ref(), &PackageRef::new("token", "latest", "main"), CHAIN_ID)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(url, second.url);
  assert_eq!(record, second.record);
}

#[tokio::test]
async fn unsupported_record_version_is_rejected() {
  let temp = TempDir::new().unwrap();
  let storage = Arc::new(FileStorage::new(temp.path()));

  let url = storage
    .put_blob(&json!({"version": 99, "def": {"name": "token", "version": "1.0.0"}}))
    .await
    .unwrap();
  storage
    .publish(&["token:1.0.0".to_string()], "13370-main", &url, None)
    .await
    .unwrap();

  let log = ExecLog::default();
  let error = deploy(&token_definition(), &registry(&log), &runtime(storage), 1)
    .await
    .unwrap_err();
  assert!(matches!(
    error,
    ExecuteError::Storage(StorageError::UnsupportedVersion { found: 99, expected: 1 })
  ));
  assert_eq!(log.count(), 0);
}
