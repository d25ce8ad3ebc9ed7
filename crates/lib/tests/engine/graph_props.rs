//! Properties of graphs built from random DAGs.
//!
//! Node `i` may depend on any node `j < i`, so every generated graph is
//! acyclic and node ids sort in index order.

use std::collections::{BTreeMap, BTreeSet};

use chainplan_lib::action::PackageState;
use chainplan_lib::definition::{PackageRef, RawActions};
use chainplan_lib::graph::{DependencyGraph, GraphError, GraphOptions, find_cycle};
use proptest::prelude::*;
use serde_json::json;

use super::common::{ExecLog, registry};

fn id(index: usize) -> String {
  format!("contract.n{index:02}")
}

/// Number of nodes and, for every `(i, j)` with `j < i`, whether `i` depends
/// on `j`.
fn dag_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<String>>> {
  (1usize..10)
    .prop_flat_map(|n| proptest::collection::vec(any::<bool>(), n * n).prop_map(move |bits| (n, bits)))
    .prop_map(|(n, bits)| {
      (0..n)
        .map(|i| {
          let deps = (0..i).filter(|j| bits[i * n + j]).map(id).collect();
          (id(i), deps)
        })
        .collect()
    })
}

fn raw_actions(deps: &BTreeMap<String, Vec<String>>) -> RawActions {
  let labels = deps
    .iter()
    .map(|(id, deps)| {
      let label = id.trim_start_matches("contract.").to_string();
      (label, json!({"depends": deps}))
    })
    .collect();
  BTreeMap::from([("contract".to_string(), labels)])
}

fn build(deps: &BTreeMap<String, Vec<String>>) -> Result<DependencyGraph, GraphError> {
  let options = GraphOptions::new(PackageState::new(PackageRef::new("props", "1.0.0", "main"), 13370));
  DependencyGraph::build(&raw_actions(deps), &registry(&ExecLog::default()), &options)
}

fn closure(deps: &BTreeMap<String, Vec<String>>, id: &str) -> BTreeSet<String> {
  let mut seen = BTreeSet::new();
  let mut stack: Vec<&str> = deps[id].iter().map(String::as_str).collect();
  while let Some(next) = stack.pop() {
    if seen.insert(next.to_string()) {
      stack.extend(deps[next].iter().map(String::as_str));
    }
  }
  seen
}

proptest! {
  #[test]
  fn acyclic_graphs_have_no_cycle(deps in dag_strategy()) {
    prop_assert_eq!(find_cycle(&deps), None);
    prop_assert!(build(&deps).is_ok());
  }

  #[test]
  fn pruned_dependencies_are_minimal(deps in dag_strategy()) {
    let graph = build(&deps).unwrap();
    for node in graph.nodes() {
      let direct = graph.dependencies(&node.id);
      for a in direct {
        for b in direct {
          if a != b {
            prop_assert!(
              !graph.transitive_dependencies(b).contains(a),
              "{} keeps {} although {} reaches it", node.id, a, b
            );
          }
        }
      }
    }
  }

  #[test]
  fn pruning_keeps_reachability(deps in dag_strategy()) {
    let graph = build(&deps).unwrap();
    for id in deps.keys() {
      prop_assert_eq!(graph.transitive_dependencies(id), closure(&deps, id));
    }
  }

  #[test]
  fn order_respects_depth(deps in dag_strategy()) {
    let graph = build(&deps).unwrap();
    let position: BTreeMap<&str, usize> = graph
      .topological_order()
      .iter()
      .enumerate()
      .map(|(i, id)| (id.as_str(), i))
      .collect();

    for node in graph.nodes() {
      for dep in graph.dependencies(&node.id) {
        prop_assert!(graph.depth(dep) < graph.depth(&node.id));
        prop_assert!(position[dep.as_str()] < position[node.id.as_str()]);
      }
    }
  }

  #[test]
  fn layers_partition_nodes(deps in dag_strategy()) {
    let graph = build(&deps).unwrap();
    let first = graph.state_layers().clone();
    prop_assert_eq!(&first, graph.state_layers());

    let distinct: BTreeSet<&Vec<String>> = first.values().map(|layer| &layer.actions).collect();
    let mut members: Vec<&String> = distinct.iter().flat_map(|actions| actions.iter()).collect();
    members.sort();
    let all: Vec<&String> = deps.keys().collect();
    prop_assert_eq!(members, all);

    for (id, layer) in &first {
      prop_assert!(layer.actions.contains(id));
      for member in &layer.actions {
        prop_assert_eq!(&first[member], layer);
      }
    }
  }

  #[test]
  fn back_edge_is_reported_as_cycle(deps in dag_strategy()) {
    let last = id(deps.len() - 1);
    let first = id(0);
    prop_assume!(closure(&deps, &last).contains(&first));

    let mut cyclic = deps.clone();
    cyclic.get_mut(&first).unwrap().push(last.clone());
    match build(&cyclic) {
      Err(GraphError::Cycle(cycle)) => {
        prop_assert!(cycle.len() >= 3);
        prop_assert_eq!(cycle.first(), cycle.last());
        prop_assert_eq!(cycle[0].as_str(), first.as_str());
      }
      other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|g| g.len())),
    }
  }
}
