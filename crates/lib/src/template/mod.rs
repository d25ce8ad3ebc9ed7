//! Template parsing for action configuration strings.
//!
//! Action configs reference values produced by earlier steps through
//! template tags. This module parses template strings into segments and
//! expression trees; [`eval`] evaluates them against a [`Scope`].
//!
//! # Template Format
//!
//! - `<%= expr %>` - evaluate `expr` and insert its rendered value
//! - anything outside a tag is literal text
//!
//! # Expressions
//!
//! - identifiers: `settings`, `contracts`, `chainId`, ...
//! - member access: `contracts.Token.address`
//! - index access: `imports["core"]`, `txns.mint.events.Transfer[0]`
//! - helper calls: `parseEther(settings.amount)`
//! - literals: `'text'`, `"text"`, `42`, `1.5`, `true`, `false`, `null`
//!
//! # Example
//!
//! ```
//! use chainplan_lib::template::{parse, Expr, Segment};
//!
//! let segments = parse("owner=<%= settings.owner %>").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("owner=".to_string()),
//!     Segment::Expr(Expr::Member(Box::new(Expr::Ident("settings".to_string())), "owner".to_string())),
//! ]);
//! ```

pub mod eval;
pub mod helpers;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

pub use eval::{Scope, evaluate, render, render_segments};

const OPEN_TAG: &str = "<%=";
const CLOSE_TAG: &str = "%>";

/// A segment of parsed template text.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
  /// Literal text (no tags)
  Literal(String),

  /// An expression to evaluate
  Expr(Expr),
}

/// A parsed template expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  /// A top-level name such as `settings`.
  Ident(String),

  /// `target.key`
  Member(Box<Expr>, String),

  /// `target[index]`
  Index(Box<Expr>, Box<Expr>),

  /// `helper(args...)`
  Call(String, Vec<Expr>),

  /// A string, number, boolean or null literal.
  Literal(Value),
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expr::Ident(name) => write!(f, "{name}"),
      Expr::Member(target, key) => write!(f, "{target}.{key}"),
      Expr::Index(target, index) => write!(f, "{target}[{index}]"),
      Expr::Call(name, args) => {
        write!(f, "{name}(")?;
        for (i, arg) in args.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{arg}")?;
        }
        write!(f, ")")
      }
      Expr::Literal(value) => write!(f, "{value}"),
    }
  }
}

/// Errors that can occur during template parsing or evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed template tag at position {0}")]
  Unclosed(usize),

  #[error("syntax error in '{expr}': {message}")]
  Syntax { expr: String, message: String },

  #[error("unknown identifier: {0}")]
  UnknownIdentifier(String),

  #[error("unknown helper: {0}")]
  UnknownHelper(String),

  #[error("undefined value: {0}")]
  Undefined(String),

  #[error("cannot read properties of {0}")]
  NotIndexable(String),

  #[error("invalid arguments to {helper}: {message}")]
  HelperArgs { helper: String, message: String },
}

/// Returns true if the string contains at least one template tag.
pub fn is_template(input: &str) -> bool {
  input.contains(OPEN_TAG)
}

/// Parse a template string into segments.
///
/// # Errors
///
/// Returns an error if a tag is unclosed or its expression is malformed.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let (segments, error) = parse_partial(input);
  match error {
    Some(e) => Err(e),
    None => Ok(segments),
  }
}

/// Parse as much of a template as possible.
///
/// Returns the segments that parsed successfully before the first error,
/// together with that error. Used by the access recorder, which still reports
/// the accesses of the well-formed prefix of a broken template.
pub fn parse_partial(input: &str) -> (Vec<Segment>, Option<TemplateError>) {
  let mut segments = Vec::new();
  let mut rest = input;
  let mut offset = 0;

  while let Some(start) = rest.find(OPEN_TAG) {
    if start > 0 {
      segments.push(Segment::Literal(rest[..start].to_string()));
    }

    let body_start = start + OPEN_TAG.len();
    let Some(end) = rest[body_start..].find(CLOSE_TAG) else {
      return (segments, Some(TemplateError::Unclosed(offset + start)));
    };

    match parse_expr(rest[body_start..body_start + end].trim()) {
      Ok(expr) => segments.push(Segment::Expr(expr)),
      Err(e) => return (segments, Some(e)),
    }

    let consumed = body_start + end + CLOSE_TAG.len();
    offset += consumed;
    rest = &rest[consumed..];
  }

  if !rest.is_empty() {
    segments.push(Segment::Literal(rest.to_string()));
  }

  (segments, None)
}

/// Parse a single expression (the text between `<%=` and `%>`).
pub fn parse_expr(source: &str) -> Result<Expr, TemplateError> {
  let tokens = tokenize(source)?;
  let mut parser = Parser {
    source,
    tokens,
    pos: 0,
  };

  let expr = parser.expression()?;
  if parser.pos < parser.tokens.len() {
    return Err(parser.error(format!("unexpected {}", parser.tokens[parser.pos])));
  }
  Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Ident(String),
  Str(String),
  Num(String),
  Dot,
  Comma,
  LParen,
  RParen,
  LBracket,
  RBracket,
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Token::Ident(s) => write!(f, "identifier '{s}'"),
      Token::Str(s) => write!(f, "string '{s}'"),
      Token::Num(s) => write!(f, "number {s}"),
      Token::Dot => write!(f, "'.'"),
      Token::Comma => write!(f, "','"),
      Token::LParen => write!(f, "'('"),
      Token::RParen => write!(f, "')'"),
      Token::LBracket => write!(f, "'['"),
      Token::RBracket => write!(f, "']'"),
    }
  }
}

fn tokenize(source: &str) -> Result<Vec<Token>, TemplateError> {
  let syntax = |message: String| TemplateError::Syntax {
    expr: source.to_string(),
    message,
  };

  let mut tokens = Vec::new();
  let mut chars = source.chars().peekable();

  while let Some(&ch) = chars.peek() {
    match ch {
      c if c.is_whitespace() => {
        chars.next();
      }
      '.' => {
        chars.next();
        tokens.push(Token::Dot);
      }
      ',' => {
        chars.next();
        tokens.push(Token::Comma);
      }
      '(' => {
        chars.next();
        tokens.push(Token::LParen);
      }
      ')' => {
        chars.next();
        tokens.push(Token::RParen);
      }
      '[' => {
        chars.next();
        tokens.push(Token::LBracket);
      }
      ']' => {
        chars.next();
        tokens.push(Token::RBracket);
      }
      '\'' | '"' => {
        let quote = ch;
        chars.next();
        let mut text = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
          match c {
            '\\' => match chars.next() {
              Some('n') => text.push('\n'),
              Some('t') => text.push('\t'),
              Some(other) => text.push(other),
              None => break,
            },
            c if c == quote => {
              closed = true;
              break;
            }
            c => text.push(c),
          }
        }
        if !closed {
          return Err(syntax("unterminated string literal".to_string()));
        }
        tokens.push(Token::Str(text));
      }
      c if c.is_ascii_digit() || c == '-' => {
        let mut number = String::new();
        number.push(c);
        chars.next();
        while let Some(&c) = chars.peek() {
          if c.is_ascii_digit() || c == '.' {
            number.push(c);
            chars.next();
          } else {
            break;
          }
        }
        if number == "-" {
          return Err(syntax("unexpected '-'".to_string()));
        }
        tokens.push(Token::Num(number));
      }
      c if c.is_alphabetic() || c == '_' || c == '$' => {
        let mut ident = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_alphanumeric() || c == '_' || c == '$' {
            ident.push(c);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push(Token::Ident(ident));
      }
      other => return Err(syntax(format!("unexpected character '{other}'"))),
    }
  }

  Ok(tokens)
}

struct Parser<'a> {
  source: &'a str,
  tokens: Vec<Token>,
  pos: usize,
}

impl Parser<'_> {
  fn error(&self, message: String) -> TemplateError {
    TemplateError::Syntax {
      expr: self.source.to_string(),
      message,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    if token.is_some() {
      self.pos += 1;
    }
    token
  }

  fn expect(&mut self, expected: Token) -> Result<(), TemplateError> {
    match self.next() {
      Some(token) if token == expected => Ok(()),
      Some(token) => Err(self.error(format!("expected {expected}, found {token}"))),
      None => Err(self.error(format!("expected {expected}, found end of expression"))),
    }
  }

  fn expression(&mut self) -> Result<Expr, TemplateError> {
    let mut expr = self.primary()?;

    loop {
      match self.peek() {
        Some(Token::Dot) => {
          self.next();
          match self.next() {
            Some(Token::Ident(key)) => expr = Expr::Member(Box::new(expr), key),
            Some(token) => return Err(self.error(format!("expected property name, found {token}"))),
            None => return Err(self.error("expected property name after '.'".to_string())),
          }
        }
        Some(Token::LBracket) => {
          self.next();
          let index = self.expression()?;
          self.expect(Token::RBracket)?;
          expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Some(Token::LParen) => {
          let Expr::Ident(name) = expr else {
            return Err(self.error(format!("'{expr}' is not callable")));
          };
          self.next();
          let args = self.arguments()?;
          expr = Expr::Call(name, args);
        }
        _ => break,
      }
    }

    Ok(expr)
  }

  fn arguments(&mut self) -> Result<Vec<Expr>, TemplateError> {
    let mut args = Vec::new();
    if self.peek() == Some(&Token::RParen) {
      self.next();
      return Ok(args);
    }

    loop {
      args.push(self.expression()?);
      match self.next() {
        Some(Token::Comma) => continue,
        Some(Token::RParen) => return Ok(args),
        Some(token) => return Err(self.error(format!("expected ',' or ')', found {token}"))),
        None => return Err(self.error("unclosed argument list".to_string())),
      }
    }
  }

  fn primary(&mut self) -> Result<Expr, TemplateError> {
    match self.next() {
      Some(Token::Ident(name)) => Ok(match name.as_str() {
        "true" => Expr::Literal(Value::Bool(true)),
        "false" => Expr::Literal(Value::Bool(false)),
        "null" => Expr::Literal(Value::Null),
        _ => Expr::Ident(name),
      }),
      Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text))),
      Some(Token::Num(text)) => parse_number(&text)
        .map(Expr::Literal)
        .ok_or_else(|| self.error(format!("invalid number {text}"))),
      Some(Token::LParen) => {
        let expr = self.expression()?;
        self.expect(Token::RParen)?;
        Ok(expr)
      }
      Some(token) => Err(self.error(format!("unexpected {token}"))),
      None => Err(self.error("empty expression".to_string())),
    }
  }
}

fn parse_number(text: &str) -> Option<Value> {
  if let Ok(n) = text.parse::<i64>() {
    return Some(Value::from(n));
  }
  if let Ok(n) = text.parse::<u64>() {
    return Some(Value::from(n));
  }
  text
    .parse::<f64>()
    .ok()
    .and_then(serde_json::Number::from_f64)
    .map(Value::Number)
}
