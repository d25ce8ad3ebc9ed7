//! State layers.
//!
//! A layer groups actions that are snapshotted together on an ephemeral
//! chain. Every layer has at most one dependent layer: when two layers end
//! up depending on the same layer, they are merged. Layers are tracked with
//! a union-find over action positions in topological order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::unionfind::UnionFind;

use super::StateLayer;

struct LayerBuilder {
  sets: UnionFind<usize>,
  /// Layer root -> roots of the layers it depends on. Entries may be stale
  /// and are normalized through `find` when read.
  deps: HashMap<usize, BTreeSet<usize>>,
  /// Layer root -> root of the single layer depending on it.
  attached: HashMap<usize, usize>,
}

impl LayerBuilder {
  fn new(len: usize) -> Self {
    Self {
      sets: UnionFind::new(len),
      deps: HashMap::new(),
      attached: HashMap::new(),
    }
  }

  fn find(&mut self, x: usize) -> usize {
    self.sets.find_mut(x)
  }

  fn layer_deps(&mut self, root: usize) -> BTreeSet<usize> {
    let raw = self.deps.get(&root).cloned().unwrap_or_default();
    raw.into_iter().map(|d| self.find(d)).filter(|d| *d != root).collect()
  }

  /// Whether `target` is reachable from `from` through layer dependencies.
  fn reaches(&mut self, from: usize, target: usize) -> bool {
    let mut stack = vec![from];
    let mut visited = BTreeSet::new();
    while let Some(layer) = stack.pop() {
      if !visited.insert(layer) {
        continue;
      }
      for dep in self.layer_deps(layer) {
        if dep == target {
          return true;
        }
        stack.push(dep);
      }
    }
    false
  }

  fn attachment(&mut self, layer: usize) -> Option<usize> {
    let dependent = *self.attached.get(&layer)?;
    Some(self.find(dependent))
  }

  /// Merge two layers, cascading into their dependents when both layers
  /// were attached to different groups.
  fn merge(&mut self, a: usize, b: usize) {
    let mut pending = vec![(a, b)];

    while let Some((a, b)) = pending.pop() {
      let (ra, rb) = (self.find(a), self.find(b));
      if ra == rb {
        continue;
      }
      self.sets.union(ra, rb);
      let root = self.find(ra);

      let mut deps = self.deps.remove(&ra).unwrap_or_default();
      deps.extend(self.deps.remove(&rb).unwrap_or_default());
      let deps: BTreeSet<usize> = deps.into_iter().map(|d| self.find(d)).filter(|d| *d != root).collect();
      self.deps.insert(root, deps);

      let dependent_a = self.attached.remove(&ra).map(|d| self.find(d));
      let dependent_b = self.attached.remove(&rb).map(|d| self.find(d));
      match (dependent_a, dependent_b) {
        (Some(x), Some(y)) if x != y => {
          self.attached.insert(root, x);
          pending.push((x, y));
        }
        (Some(x), _) | (None, Some(x)) => {
          if x != root {
            self.attached.insert(root, x);
          }
        }
        (None, None) => {}
      }
    }
  }

  fn add(&mut self, index: usize, dep_indices: &[usize]) {
    let own = self.find(index);
    let mut candidates: BTreeSet<usize> = dep_indices.iter().map(|d| self.find(*d)).collect();
    candidates.remove(&own);

    let all: Vec<usize> = candidates.iter().copied().collect();
    let direct: Vec<usize> = all
      .iter()
      .copied()
      .filter(|c| !all.iter().any(|other| other != c && self.reaches(*other, *c)))
      .collect();

    for dep_layer in direct {
      let dep_layer = self.find(dep_layer);
      let own = self.find(index);
      if dep_layer == own {
        continue;
      }
      match self.attachment(dep_layer) {
        Some(dependent) if dependent != own => self.merge(own, dependent),
        Some(_) => {}
        None => {
          self.attached.insert(dep_layer, own);
          self.deps.entry(own).or_default().insert(dep_layer);
        }
      }
    }
  }
}

/// Compute the layer of every action.
///
/// `order` is the topological order; `deps` maps each id to its resolved
/// dependencies. The layer id is the first member in topological order.
pub fn compute_layers(order: &[String], deps: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, StateLayer> {
  let position: HashMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
  let mut builder = LayerBuilder::new(order.len());

  for (index, id) in order.iter().enumerate() {
    let dep_indices: Vec<usize> = deps
      .get(id)
      .into_iter()
      .flatten()
      .filter_map(|dep| position.get(dep.as_str()).copied())
      .collect();
    builder.add(index, &dep_indices);
  }

  let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
  for index in 0..order.len() {
    let root = builder.find(index);
    members.entry(root).or_default().push(index);
  }

  // Members are pushed in ascending position, so the first is the earliest.
  let layer_name: HashMap<usize, &str> = members
    .iter()
    .map(|(root, indices)| (*root, order[indices[0]].as_str()))
    .collect();

  let mut layers = BTreeMap::new();
  for (root, indices) in &members {
    let mut actions: Vec<String> = indices.iter().map(|i| order[*i].clone()).collect();
    actions.sort();

    let mut depends: Vec<String> = builder
      .layer_deps(*root)
      .into_iter()
      .filter_map(|d| layer_name.get(&d).map(|name| name.to_string()))
      .collect();
    depends.sort();
    depends.dedup();

    let layer = StateLayer { actions, depends };
    for index in indices {
      layers.insert(order[*index].clone(), layer.clone());
    }
  }
  layers
}
