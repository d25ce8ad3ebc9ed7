//! Expression evaluation over an abstract scope.
//!
//! The evaluator walks an [`Expr`] tree and delegates every data operation
//! to a [`Scope`]. The build context implements it over JSON values; the
//! access recorder implements it over probes that only record what is read.

use serde_json::Value;

use super::{Expr, Segment, TemplateError, parse};

/// Data source for template evaluation.
pub trait Scope {
  type Value: Clone;

  /// Resolve a top-level identifier such as `settings` or `chainId`.
  fn lookup(&self, name: &str) -> Result<Self::Value, TemplateError>;

  /// Read `key` from `target`. `Ok(None)` means the property does not exist.
  fn member(&self, target: &Self::Value, key: &str) -> Result<Option<Self::Value>, TemplateError>;

  fn is_helper(&self, name: &str) -> bool;

  fn call(&self, name: &str, args: Vec<Self::Value>) -> Result<Self::Value, TemplateError>;

  fn literal(&self, value: &Value) -> Self::Value;

  /// Turn an evaluated index expression into a property key.
  fn key_of(&self, value: &Self::Value, expr: &Expr) -> Result<String, TemplateError>;

  fn render(&self, value: &Self::Value) -> Result<String, TemplateError>;
}

/// Evaluate a single expression.
pub fn evaluate<S: Scope + ?Sized>(expr: &Expr, scope: &S) -> Result<S::Value, TemplateError> {
  match expr {
    Expr::Ident(name) => scope.lookup(name),
    Expr::Literal(value) => Ok(scope.literal(value)),
    Expr::Member(target, key) => {
      let target = evaluate(target, scope)?;
      scope
        .member(&target, key)?
        .ok_or_else(|| TemplateError::Undefined(expr.to_string()))
    }
    Expr::Index(target, index) => {
      let target = evaluate(target, scope)?;
      let index_value = evaluate(index, scope)?;
      let key = scope.key_of(&index_value, index)?;
      scope
        .member(&target, &key)?
        .ok_or_else(|| TemplateError::Undefined(expr.to_string()))
    }
    Expr::Call(name, args) => {
      if !scope.is_helper(name) {
        return Err(TemplateError::UnknownHelper(name.clone()));
      }
      let values = args
        .iter()
        .map(|arg| evaluate(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;
      scope.call(name, values)
    }
  }
}

/// Render already-parsed segments to a string.
pub fn render_segments<S: Scope + ?Sized>(segments: &[Segment], scope: &S) -> Result<String, TemplateError> {
  let mut result = String::new();
  for segment in segments {
    match segment {
      Segment::Literal(text) => result.push_str(text),
      Segment::Expr(expr) => {
        let value = evaluate(expr, scope)?;
        result.push_str(&scope.render(&value)?);
      }
    }
  }
  Ok(result)
}

/// Parse and render a template string.
pub fn render<S: Scope + ?Sized>(input: &str, scope: &S) -> Result<String, TemplateError> {
  let segments = parse(input)?;
  render_segments(&segments, scope)
}
