//! chainplan-lib: declarative smart-contract deployments
//!
//! A deployment is described by a [`definition::Definition`]: named actions of
//! various kinds whose configs reference each other through `<%= ... %>`
//! templates. This crate provides:
//! - `graph`: dependency inference, pruning, ordering and state layers
//! - `execute`: the build engine with fingerprint caching and cancellation
//! - `action`: the plugin contract and registry, plus the `var` and `import` kinds
//! - `deployment` and `storage`: persisted records and where they live

pub mod access;
pub mod action;
pub mod config;
pub mod consts;
pub mod context;
pub mod definition;
pub mod deployment;
pub mod execute;
pub mod graph;
pub mod runtime;
pub mod storage;
pub mod template;
pub mod util;
