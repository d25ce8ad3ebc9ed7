//! Dependency graph of a build definition.
//!
//! The graph is built once per definition:
//!
//! 1. Flatten the action tree into `kind.label` nodes and validate them.
//! 2. Index every output path to the node producing it.
//! 3. Resolve dependencies: explicit `depends` plus paths read by templates.
//! 4. Reject cycles.
//! 5. Order nodes by depth.
//! 6. Remove redundant edges, then verify none remain.
//!
//! State layers are computed on first use and cached.

mod cycle;
mod layers;
mod prune;
mod types;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::action::ActionRegistry;
use crate::consts::DEPENDS_KEY;
use crate::definition::RawActions;

pub use cycle::find_cycle;
pub use layers::compute_layers;
pub use prune::{prune_redundant, verify_minimal};
pub use types::{ActionNode, GraphError, GraphOptions, StateLayer};

/// A validated, acyclic and minimal dependency graph.
#[derive(Debug)]
pub struct DependencyGraph {
  nodes: BTreeMap<String, ActionNode>,
  /// Node ids sorted by (depth, id).
  order: Vec<String>,
  depths: HashMap<String, usize>,
  dependents: BTreeMap<String, Vec<String>>,
  pruned: Vec<(String, String)>,
  layers: OnceLock<BTreeMap<String, StateLayer>>,
}

impl DependencyGraph {
  /// Build the graph for a raw action tree.
  ///
  /// # Errors
  ///
  /// Fails on unknown kinds, duplicate labels or outputs, invalid configs,
  /// missing dependencies, unanalyzable templates in strict mode, and cycles.
  pub fn build(actions: &RawActions, registry: &ActionRegistry, options: &GraphOptions) -> Result<Self, GraphError> {
    let mut nodes = flatten(actions, registry)?;
    let outputs = index_outputs(&mut nodes, registry, options)?;
    resolve_dependencies(&mut nodes, registry, &outputs, options)?;

    let mut deps: BTreeMap<String, Vec<String>> = nodes.iter().map(|(id, node)| (id.clone(), node.deps.clone())).collect();

    if let Some(cycle) = find_cycle(&deps) {
      return Err(GraphError::Cycle(cycle));
    }

    let depths = compute_depths(&deps);
    let mut order: Vec<String> = nodes.keys().cloned().collect();
    order.sort_by(|a, b| depths[a].cmp(&depths[b]).then_with(|| a.cmp(b)));

    let pruned = prune_redundant(&order, &mut deps);
    verify_minimal(&deps)?;

    let mut dependents: BTreeMap<String, Vec<String>> = nodes.keys().map(|id| (id.clone(), Vec::new())).collect();
    for (id, node_deps) in &deps {
      for dep in node_deps {
        if let Some(list) = dependents.get_mut(dep) {
          list.push(id.clone());
        }
      }
    }

    for (id, node) in nodes.iter_mut() {
      if let Some(node_deps) = deps.remove(id) {
        node.deps = node_deps;
      }
    }

    debug!(nodes = nodes.len(), pruned = pruned.len(), "built dependency graph");

    Ok(Self {
      nodes,
      order,
      depths,
      dependents,
      pruned,
      layers: OnceLock::new(),
    })
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn node(&self, id: &str) -> Option<&ActionNode> {
    self.nodes.get(id)
  }

  /// All nodes in id order.
  pub fn nodes(&self) -> impl Iterator<Item = &ActionNode> {
    self.nodes.values()
  }

  /// Node ids with every dependency before its dependents.
  pub fn topological_order(&self) -> &[String] {
    &self.order
  }

  /// Nodes without dependencies.
  pub fn roots(&self) -> Vec<&str> {
    self
      .order
      .iter()
      .filter(|id| self.nodes[id.as_str()].deps.is_empty())
      .map(String::as_str)
      .collect()
  }

  /// Nodes nothing depends on.
  pub fn leaves(&self) -> Vec<&str> {
    self
      .order
      .iter()
      .filter(|id| self.dependents.get(id.as_str()).is_none_or(Vec::is_empty))
      .map(String::as_str)
      .collect()
  }

  pub fn depth(&self, id: &str) -> Option<usize> {
    self.depths.get(id).copied()
  }

  /// Direct dependencies after pruning.
  pub fn dependencies(&self, id: &str) -> &[String] {
    self.nodes.get(id).map(|node| node.deps.as_slice()).unwrap_or_default()
  }

  /// Nodes that depend directly on `id`.
  pub fn dependents(&self, id: &str) -> &[String] {
    self.dependents.get(id).map(Vec::as_slice).unwrap_or_default()
  }

  /// Every node `id` depends on, directly or not.
  pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    let mut stack: Vec<&str> = self.dependencies(id).iter().map(String::as_str).collect();
    while let Some(dep) = stack.pop() {
      if result.insert(dep.to_string()) {
        stack.extend(self.dependencies(dep).iter().map(String::as_str));
      }
    }
    result
  }

  /// Edges removed as redundant while building.
  pub fn pruned_edges(&self) -> &[(String, String)] {
    &self.pruned
  }

  /// Layer of every node, computed on first call.
  pub fn state_layers(&self) -> &BTreeMap<String, StateLayer> {
    self.layers.get_or_init(|| {
      let deps: BTreeMap<String, Vec<String>> = self
        .nodes
        .iter()
        .map(|(id, node)| (id.clone(), node.deps.clone()))
        .collect();
      compute_layers(&self.order, &deps)
    })
  }

  pub fn layer_of(&self, id: &str) -> Option<&StateLayer> {
    self.state_layers().get(id)
  }
}

fn flatten(actions: &RawActions, registry: &ActionRegistry) -> Result<BTreeMap<String, ActionNode>, GraphError> {
  let mut nodes = BTreeMap::new();
  let mut labels: BTreeMap<&str, String> = BTreeMap::new();
  let mut issues: BTreeMap<String, Vec<String>> = BTreeMap::new();

  for (kind, entries) in actions {
    let plugin = registry.get(kind).ok_or_else(|| GraphError::UnknownKind(kind.clone()))?;

    for (label, config) in entries {
      let id = format!("{kind}.{label}");

      if plugin.requires_unique_label() {
        if let Some(first) = labels.get(label.as_str()) {
          return Err(GraphError::DuplicateLabel {
            label: label.clone(),
            first: first.clone(),
            second: id,
          });
        }
        labels.insert(label.as_str(), id.clone());
      }

      let mut node_issues = plugin.validate(config);
      let explicit_deps = match parse_depends(config) {
        Ok(deps) => deps,
        Err(message) => {
          node_issues.push(message);
          Vec::new()
        }
      };
      if !node_issues.is_empty() {
        issues.insert(id.clone(), node_issues);
      }

      nodes.insert(
        id.clone(),
        ActionNode {
          id,
          kind: kind.clone(),
          label: label.clone(),
          config: config.clone(),
          explicit_deps,
          inferred_deps: Vec::new(),
          deps: Vec::new(),
          outputs: Vec::new(),
        },
      );
    }
  }

  if !issues.is_empty() {
    return Err(GraphError::SchemaInvalid(issues));
  }
  Ok(nodes)
}

fn parse_depends(config: &Value) -> Result<Vec<String>, String> {
  match config.get(DEPENDS_KEY) {
    None => Ok(Vec::new()),
    Some(Value::Array(items)) => items
      .iter()
      .map(|item| {
        item
          .as_str()
          .map(str::to_string)
          .ok_or_else(|| format!("`{DEPENDS_KEY}` entries must be strings, got {item}"))
      })
      .collect(),
    Some(other) => Err(format!("`{DEPENDS_KEY}` must be an array of action ids, got {other}")),
  }
}

/// Build the output path -> producing node index.
fn index_outputs(
  nodes: &mut BTreeMap<String, ActionNode>,
  registry: &ActionRegistry,
  options: &GraphOptions,
) -> Result<BTreeMap<String, String>, GraphError> {
  let mut index: BTreeMap<String, String> = BTreeMap::new();

  for (id, node) in nodes.iter_mut() {
    let plugin = registry.get(&node.kind).ok_or_else(|| GraphError::UnknownKind(node.kind.clone()))?;
    let outputs = plugin.get_outputs(&node.config, &options.package.for_step(id));

    for output in &outputs {
      if let Some(first) = index.get(output) {
        return Err(GraphError::DuplicateOutput {
          output: output.clone(),
          first: first.clone(),
          second: id.clone(),
        });
      }
      index.insert(output.clone(), id.clone());
    }
    node.outputs = outputs;
  }

  Ok(index)
}

fn resolve_dependencies(
  nodes: &mut BTreeMap<String, ActionNode>,
  registry: &ActionRegistry,
  outputs: &BTreeMap<String, String>,
  options: &GraphOptions,
) -> Result<(), GraphError> {
  let known_ids: BTreeSet<String> = nodes.keys().cloned().collect();
  let known_outputs: BTreeSet<String> = outputs.keys().cloned().collect();

  for (id, node) in nodes.iter_mut() {
    for dep in &node.explicit_deps {
      if !known_ids.contains(dep) {
        return Err(GraphError::MissingDependency {
          action: id.clone(),
          dependency: dep.clone(),
        });
      }
    }

    let plugin = registry.get(&node.kind).ok_or_else(|| GraphError::UnknownKind(node.kind.clone()))?;
    let mut inferred = BTreeSet::new();

    if let Some(inputs) = plugin.get_inputs(&node.config, &known_outputs) {
      for path in &inputs.accesses {
        match outputs.get(path) {
          Some(producer) if producer == id => {}
          Some(producer) => {
            inferred.insert(producer.clone());
          }
          None if path.starts_with("settings.") => {
            trace!(step = %id, path = %path, "unresolved setting");
          }
          None => {
            warn!(step = %id, path = %path, "template reads a path no action produces");
          }
        }
      }

      if inputs.unable_to_compute && node.explicit_deps.is_empty() {
        let template = inputs.failed_template.unwrap_or_default();
        if options.strict_dependencies {
          return Err(GraphError::AmbiguousDependency {
            action: id.clone(),
            template,
          });
        }
        warn!(
          step = %id,
          template = %template,
          "could not infer dependencies from template; consider listing them in `depends`"
        );
      }
    }

    let mut deps: BTreeSet<String> = node.explicit_deps.iter().cloned().collect();
    deps.extend(inferred.iter().cloned());

    node.inferred_deps = inferred.into_iter().collect();
    node.deps = deps.into_iter().collect();
  }

  Ok(())
}

/// Depth of every node: 0 without dependencies, else one more than the
/// deepest dependency. `deps` must be acyclic.
fn compute_depths(deps: &BTreeMap<String, Vec<String>>) -> HashMap<String, usize> {
  let mut depths: HashMap<String, usize> = HashMap::with_capacity(deps.len());

  for id in deps.keys() {
    let mut stack: Vec<(&str, bool)> = vec![(id.as_str(), false)];
    while let Some((current, expanded)) = stack.pop() {
      if depths.contains_key(current) {
        continue;
      }
      let node_deps = deps.get(current).map(Vec::as_slice).unwrap_or_default();
      if expanded {
        let depth = node_deps
          .iter()
          .filter_map(|dep| depths.get(dep.as_str()))
          .map(|d| d + 1)
          .max()
          .unwrap_or(0);
        depths.insert(current.to_string(), depth);
      } else {
        stack.push((current, true));
        for dep in node_deps {
          if !depths.contains_key(dep.as_str()) {
            stack.push((dep.as_str(), false));
          }
        }
      }
    }
  }

  depths
}
