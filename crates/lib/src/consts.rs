//! Crate-wide constants.

/// Application name used for data directories and environment variables.
pub const APP_NAME: &str = "chainplan";

/// Environment variable overriding the storage directory.
pub const STORAGE_DIR_ENV: &str = "CHAINPLAN_STORAGE_DIR";

/// Context namespaces that actions read from and write to.
pub const NAMESPACES: [&str; 5] = ["settings", "contracts", "imports", "txns", "extras"];

/// Config key holding the explicit dependency list of an action.
pub const DEPENDS_KEY: &str = "depends";

/// Version of the persisted deployment record format.
pub const DEPLOYMENT_FORMAT_VERSION: u32 = 1;

/// Version of the file storage registry index.
pub const REGISTRY_INDEX_VERSION: u32 = 1;
