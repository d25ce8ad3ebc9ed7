//! Transitive reduction of the dependency edges.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::{DfsSpace, has_path_connecting};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::warn;

use super::GraphError;

/// Remove every direct dependency that is reachable through another direct
/// dependency of the same node.
///
/// `order` must list dependencies before their dependents. Returns the
/// removed `(action, dependency)` edges.
pub fn prune_redundant(order: &[String], deps: &mut BTreeMap<String, Vec<String>>) -> Vec<(String, String)> {
  let mut closures: HashMap<&str, BTreeSet<String>> = HashMap::with_capacity(order.len());
  let mut removed = Vec::new();

  for id in order {
    let direct = deps.get(id).cloned().unwrap_or_default();

    let (kept, dropped): (Vec<String>, Vec<String>) = direct.iter().cloned().partition(|dep| {
      !direct
        .iter()
        .any(|other| other != dep && closures.get(other.as_str()).is_some_and(|c| c.contains(dep)))
    });

    for dep in dropped {
      warn!(step = %id, dependency = %dep, "removing redundant dependency");
      removed.push((id.clone(), dep));
    }

    let mut closure = BTreeSet::new();
    for dep in &kept {
      closure.insert(dep.clone());
      if let Some(inner) = closures.get(dep.as_str()) {
        closure.extend(inner.iter().cloned());
      }
    }
    closures.insert(id.as_str(), closure);
    deps.insert(id.clone(), kept);
  }

  removed
}

/// Check independently that no redundant edge is left.
pub fn verify_minimal(deps: &BTreeMap<String, Vec<String>>) -> Result<(), GraphError> {
  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let mut indices: HashMap<&str, NodeIndex> = HashMap::with_capacity(deps.len());

  for id in deps.keys() {
    indices.insert(id.as_str(), graph.add_node(id.as_str()));
  }
  for (id, node_deps) in deps {
    for dep in node_deps {
      if let Some(&dep_idx) = indices.get(dep.as_str()) {
        graph.add_edge(indices[id.as_str()], dep_idx, ());
      }
    }
  }

  let mut space = DfsSpace::new(&graph);
  for (id, node_deps) in deps {
    for dep in node_deps {
      for other in node_deps.iter().filter(|other| *other != dep) {
        let (Some(&from), Some(&to)) = (indices.get(other.as_str()), indices.get(dep.as_str())) else {
          continue;
        };
        if has_path_connecting(&graph, from, to, Some(&mut space)) {
          return Err(GraphError::RedundantEdge {
            action: id.clone(),
            dependency: dep.clone(),
          });
        }
      }
    }
  }
  Ok(())
}
