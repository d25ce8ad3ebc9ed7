//! Environment-driven locations.

use std::path::PathBuf;

use crate::consts::{APP_NAME, STORAGE_DIR_ENV};

/// Returns the user's home directory
#[cfg(not(windows))]
fn home_dir() -> PathBuf {
  std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Directory used by [`crate::storage::FileStorage::default_location`].
///
/// `CHAINPLAN_STORAGE_DIR` overrides the default `{data_dir}/storage`.
pub fn storage_dir() -> PathBuf {
  match std::env::var(STORAGE_DIR_ENV) {
    Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => data_dir().join("storage"),
  }
}
