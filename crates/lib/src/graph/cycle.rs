use std::collections::{BTreeMap, HashSet};

/// Find a dependency cycle.
///
/// Nodes are visited in id order. The returned cycle starts and ends with
/// the node that was re-entered, each element depending on the next.
pub fn find_cycle(deps: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
  let mut search = CycleSearch {
    deps,
    seen: HashSet::new(),
    path: Vec::new(),
    on_path: HashSet::new(),
  };

  for id in deps.keys() {
    if !search.seen.contains(id.as_str())
      && let Some(cycle) = search.visit(id)
    {
      return Some(cycle);
    }
  }
  None
}

struct CycleSearch<'a> {
  deps: &'a BTreeMap<String, Vec<String>>,
  seen: HashSet<&'a str>,
  path: Vec<&'a str>,
  on_path: HashSet<&'a str>,
}

impl<'a> CycleSearch<'a> {
  fn visit(&mut self, id: &'a str) -> Option<Vec<String>> {
    self.seen.insert(id);
    self.path.push(id);
    self.on_path.insert(id);

    let deps = self.deps;
    for dep in deps.get(id).into_iter().flatten() {
      let dep = dep.as_str();
      if self.on_path.contains(dep) {
        let start = self.path.iter().position(|node| *node == dep).unwrap_or(0);
        let mut cycle: Vec<String> = self.path[start..].iter().map(|node| node.to_string()).collect();
        cycle.push(dep.to_string());
        return Some(cycle);
      }
      if !self.seen.contains(dep)
        && let Some(cycle) = self.visit(dep)
      {
        return Some(cycle);
      }
    }

    self.path.pop();
    self.on_path.remove(id);
    None
  }
}
