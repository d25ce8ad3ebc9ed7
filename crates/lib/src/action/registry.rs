use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::ActionPlugin;
use super::import::ImportAction;
use super::var::VarAction;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
  #[error("action kind '{0}' is already registered")]
  DuplicateKind(String),

  #[error("action kind '{0}' has no label")]
  MissingLabel(String),

  #[error("action kind name is empty")]
  EmptyKind,
}

/// Action kinds available to a build, by kind name.
#[derive(Clone, Default)]
pub struct ActionRegistry {
  plugins: BTreeMap<String, Arc<dyn ActionPlugin>>,
}

impl std::fmt::Debug for ActionRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActionRegistry")
      .field("kinds", &self.plugins.keys().collect::<Vec<_>>())
      .finish()
  }
}

impl ActionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the `var` and `import` kinds.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.plugins.insert("var".to_string(), Arc::new(VarAction));
    registry.plugins.insert("import".to_string(), Arc::new(ImportAction));
    registry
  }

  pub fn register(&mut self, plugin: impl ActionPlugin + 'static) -> Result<(), RegistryError> {
    self.register_arc(Arc::new(plugin))
  }

  pub fn register_arc(&mut self, plugin: Arc<dyn ActionPlugin>) -> Result<(), RegistryError> {
    let kind = plugin.kind().to_string();
    if kind.is_empty() {
      return Err(RegistryError::EmptyKind);
    }
    if plugin.label().trim().is_empty() {
      return Err(RegistryError::MissingLabel(kind));
    }
    if self.plugins.contains_key(&kind) {
      return Err(RegistryError::DuplicateKind(kind));
    }
    self.plugins.insert(kind, plugin);
    Ok(())
  }

  pub fn get(&self, kind: &str) -> Option<Arc<dyn ActionPlugin>> {
    self.plugins.get(kind).cloned()
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.plugins.contains_key(kind)
  }

  pub fn kinds(&self) -> impl Iterator<Item = &str> {
    self.plugins.keys().map(String::as_str)
  }
}
