//! Helper functions callable from templates.
//!
//! Amounts are returned as decimal strings because wei values overflow JSON
//! numbers.

use serde_json::Value;

use super::TemplateError;

/// Names of every helper available in templates.
pub const HELPERS: &[&str] = &["lower", "upper", "concat", "json", "parseEther", "parseUnits", "defaultTo"];

const ETHER_DECIMALS: u32 = 18;

/// Decimal digits in the largest uint256.
const MAX_DECIMALS: u32 = 77;

pub fn is_helper(name: &str) -> bool {
  HELPERS.contains(&name)
}

/// Invoke a helper by name.
pub fn call(name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
  match name {
    "lower" => Ok(Value::String(single_string(name, &args)?.to_lowercase())),
    "upper" => Ok(Value::String(single_string(name, &args)?.to_uppercase())),
    "concat" => Ok(Value::String(args.iter().map(display).collect())),
    "json" => {
      let [value] = args.as_slice() else {
        return Err(arity(name, 1, args.len()));
      };
      Ok(Value::String(value.to_string()))
    }
    "parseEther" => {
      let [value] = args.as_slice() else {
        return Err(arity(name, 1, args.len()));
      };
      scale_decimal(name, &amount_text(name, value)?, ETHER_DECIMALS).map(Value::String)
    }
    "parseUnits" => {
      let [value, decimals] = args.as_slice() else {
        return Err(arity(name, 2, args.len()));
      };
      let decimals = decimals
        .as_u64()
        .and_then(|d| u32::try_from(d).ok())
        .ok_or_else(|| helper_error(name, format!("decimals must be a non-negative integer, got {decimals}")))?;
      if decimals > MAX_DECIMALS {
        return Err(helper_error(
          name,
          format!("decimals must be at most {MAX_DECIMALS}, got {decimals}"),
        ));
      }
      scale_decimal(name, &amount_text(name, value)?, decimals).map(Value::String)
    }
    "defaultTo" => {
      let [value, fallback] = args.as_slice() else {
        return Err(arity(name, 2, args.len()));
      };
      let empty = value.is_null() || value.as_str().is_some_and(str::is_empty);
      Ok(if empty { fallback.clone() } else { value.clone() })
    }
    _ => Err(TemplateError::UnknownHelper(name.to_string())),
  }
}

/// Display a value the way templates render it.
pub fn display(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    other => other.to_string(),
  }
}

fn helper_error(helper: &str, message: String) -> TemplateError {
  TemplateError::HelperArgs {
    helper: helper.to_string(),
    message,
  }
}

fn arity(helper: &str, expected: usize, found: usize) -> TemplateError {
  helper_error(helper, format!("expected {expected} argument(s), got {found}"))
}

fn single_string<'a>(helper: &str, args: &'a [Value]) -> Result<&'a str, TemplateError> {
  match args {
    [Value::String(s)] => Ok(s),
    [other] => Err(helper_error(helper, format!("expected a string, got {other}"))),
    _ => Err(arity(helper, 1, args.len())),
  }
}

fn amount_text(helper: &str, value: &Value) -> Result<String, TemplateError> {
  match value {
    Value::String(s) => Ok(s.trim().to_string()),
    Value::Number(n) => Ok(n.to_string()),
    other => Err(helper_error(helper, format!("expected a decimal amount, got {other}"))),
  }
}

/// Multiply a non-negative decimal string by `10^decimals`.
fn scale_decimal(helper: &str, amount: &str, decimals: u32) -> Result<String, TemplateError> {
  let invalid = || helper_error(helper, format!("invalid decimal amount '{amount}'"));

  let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
  if whole.is_empty() && fraction.is_empty() {
    return Err(invalid());
  }
  if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
    return Err(invalid());
  }

  let decimals = decimals as usize;
  if fraction.len() > decimals {
    return Err(helper_error(
      helper,
      format!("'{amount}' has more than {decimals} decimal places"),
    ));
  }

  let mut digits = String::with_capacity(whole.len() + decimals);
  digits.push_str(whole);
  digits.push_str(fraction);
  digits.extend(std::iter::repeat_n('0', decimals - fraction.len()));

  let trimmed = digits.trim_start_matches('0');
  Ok(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
}
