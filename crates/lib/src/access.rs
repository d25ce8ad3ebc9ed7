//! Static analysis of template strings.
//!
//! The access recorder evaluates a template against probe values instead of
//! real data and records every namespace property the template reads. The
//! graph builder uses the recorded paths to infer dependencies between
//! actions without executing anything.
//!
//! Only the first property read on a namespace is recorded:
//! `contracts.Token.address` records `contracts.Token`, which is the output
//! label an action publishes.

use std::cell::RefCell;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::consts::{DEPENDS_KEY, NAMESPACES};
use crate::template::{self, Expr, Scope, Segment, TemplateError, helpers};

/// The outcome of analyzing one or more templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResult {
  /// Sorted, deduplicated dotted paths such as `settings.owner`.
  pub accesses: Vec<String>,

  /// True when at least one template could not be fully analyzed.
  pub unable_to_compute: bool,

  /// The first template that failed analysis, kept for diagnostics.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failed_template: Option<String>,
}

impl AccessResult {
  /// Combine two results: accesses are unioned, failure flags are ORed.
  pub fn merge(mut self, other: AccessResult) -> AccessResult {
    let mut accesses: BTreeSet<String> = self.accesses.into_iter().collect();
    accesses.extend(other.accesses);
    self.accesses = accesses.into_iter().collect();
    self.unable_to_compute |= other.unable_to_compute;
    if self.failed_template.is_none() {
      self.failed_template = other.failed_template;
    }
    self
  }
}

/// A stand-in value produced while recording.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
  /// A top-level namespace such as `contracts`.
  Namespace(&'static str),

  /// A value below a namespace. Reads on it are not recorded.
  Field(String),

  /// A literal written in the template.
  Literal(Value),

  /// Output of a helper or a scalar; its content is never known.
  Unknown,
}

/// Scope that records namespace reads.
#[derive(Debug, Default)]
pub struct AccessRecorder {
  accessed: RefCell<BTreeSet<String>>,
}

impl AccessRecorder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Paths recorded so far, sorted.
  pub fn accesses(&self) -> Vec<String> {
    self.accessed.borrow().iter().cloned().collect()
  }

  fn record(&self, path: String) {
    self.accessed.borrow_mut().insert(path);
  }
}

impl Scope for AccessRecorder {
  type Value = Probe;

  fn lookup(&self, name: &str) -> Result<Probe, TemplateError> {
    if let Some(ns) = NAMESPACES.iter().copied().find(|ns| *ns == name) {
      return Ok(Probe::Namespace(ns));
    }
    match name {
      "chainId" | "timestamp" | "package" => Ok(Probe::Unknown),
      _ => Err(TemplateError::UnknownIdentifier(name.to_string())),
    }
  }

  fn member(&self, target: &Probe, key: &str) -> Result<Option<Probe>, TemplateError> {
    Ok(Some(match target {
      Probe::Namespace(ns) if key.is_empty() => {
        return Err(TemplateError::Undefined(format!("{ns}[<computed>]")));
      }
      Probe::Namespace(ns) => {
        let path = format!("{ns}.{key}");
        self.record(path.clone());
        Probe::Field(path)
      }
      Probe::Field(path) => Probe::Field(format!("{path}.{key}")),
      Probe::Literal(_) | Probe::Unknown => Probe::Unknown,
    }))
  }

  fn is_helper(&self, name: &str) -> bool {
    helpers::is_helper(name)
  }

  fn call(&self, _name: &str, _args: Vec<Probe>) -> Result<Probe, TemplateError> {
    Ok(Probe::Unknown)
  }

  fn literal(&self, value: &Value) -> Probe {
    Probe::Literal(value.clone())
  }

  /// A computed key is empty. It only fails when it selects a namespace
  /// property, since reads below that are never recorded.
  fn key_of(&self, value: &Probe, expr: &Expr) -> Result<String, TemplateError> {
    match value {
      Probe::Literal(Value::String(s)) => Ok(s.clone()),
      Probe::Literal(Value::Number(n)) => Ok(n.to_string()),
      Probe::Field(_) | Probe::Unknown => Ok(String::new()),
      Probe::Literal(_) | Probe::Namespace(_) => Err(TemplateError::Undefined(expr.to_string())),
    }
  }

  fn render(&self, _value: &Probe) -> Result<String, TemplateError> {
    Ok(String::new())
  }
}

/// Determine which context paths a template reads.
///
/// Evaluation stops at the first error; paths recorded before it are still
/// returned with `unable_to_compute` set.
pub fn compute_accesses(input: &str) -> AccessResult {
  let recorder = AccessRecorder::new();
  let (segments, parse_error) = template::parse_partial(input);

  let mut failed = parse_error.is_some();
  for segment in &segments {
    let Segment::Expr(expr) = segment else {
      continue;
    };
    if let Err(e) = template::evaluate(expr, &recorder) {
      trace!(template = input, error = %e, "template analysis stopped");
      failed = true;
      break;
    }
  }

  AccessResult {
    accesses: recorder.accesses(),
    unable_to_compute: failed,
    failed_template: failed.then(|| input.to_string()),
  }
}

/// Analyze every string inside an action config.
///
/// The top-level `depends` field is skipped since it names actions rather
/// than context paths.
pub fn template_inputs(config: &Value) -> AccessResult {
  let mut result = AccessResult::default();
  match config {
    Value::Object(map) => {
      for (key, value) in map {
        if key != DEPENDS_KEY {
          collect(value, &mut result);
        }
      }
    }
    other => collect(other, &mut result),
  }
  result
}

fn collect(value: &Value, result: &mut AccessResult) {
  match value {
    Value::String(s) if template::is_template(s) => {
      let found = compute_accesses(s);
      *result = std::mem::take(result).merge(found);
    }
    Value::Array(items) => items.iter().for_each(|item| collect(item, result)),
    Value::Object(map) => map.values().for_each(|item| collect(item, result)),
    _ => {}
  }
}
