//! Pattern matching over assertion values
//!
//! This module provides:
//! - `Pattern`: the match predicate with discard and capture positions
//! - Positional capture extraction (pre-order)
//! - Interest encoding (`observe(P)`) so subscriptions are themselves visible
//! - Shape validation against declared label arities

use crate::assertion::{write_list, Shape, ShapeRegistry, SyntaxError, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label of interest assertions published for subscriptions
pub const OBSERVE_LABEL: &str = "observe";
const DISCARD_LABEL: &str = "discard";
const CAPTURE_LABEL: &str = "capture";

/// Malformed pattern or assertion, reported at registration time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("record label must not be empty")]
    EmptyLabel,

    #[error("record `{label}` has arity {found}, declared arity is {expected}")]
    ArityMismatch {
        label: String,
        expected: usize,
        found: usize,
    },

    #[error("label `{label}` already declared with arity {declared}, not {requested}")]
    ShapeConflict {
        label: String,
        declared: usize,
        requested: usize,
    },

    #[error("patterns capture {left} and {right} values; they must agree")]
    CaptureMismatch { left: usize, right: usize },
}

/// Match predicate over values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pattern {
    /// Matches anything, captures nothing
    Discard,
    /// Matches what the inner pattern matches and binds the value
    Capture(Box<Pattern>),
    /// Matches exactly this value
    Literal(Value),
    /// Matches records with this label, the same arity and matching fields
    Record { label: String, fields: Vec<Pattern> },
    /// Matches sequences of the same length with matching items
    Seq(Vec<Pattern>),
}

/// Captured values of one match, in pre-order
pub type Captures = Vec<Value>;

impl Pattern {
    pub fn discard() -> Self {
        Pattern::Discard
    }

    pub fn capture(inner: Pattern) -> Self {
        Pattern::Capture(Box::new(inner))
    }

    /// Capture anything (`$`)
    pub fn bind() -> Self {
        Pattern::capture(Pattern::Discard)
    }

    pub fn literal(value: Value) -> Self {
        Pattern::Literal(value)
    }

    pub fn int(n: i64) -> Self {
        Pattern::Literal(Value::Int(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Pattern::Literal(Value::string(s))
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Pattern::Literal(Value::symbol(s))
    }

    pub fn record(label: impl Into<String>, fields: Vec<Pattern>) -> Self {
        Pattern::Record {
            label: label.into(),
            fields,
        }
    }

    pub fn seq(items: Vec<Pattern>) -> Self {
        Pattern::Seq(items)
    }

    /// Meta-pattern over interest assertions: matches `observe(P')` where
    /// `P'` is an encoded subscription pattern matched by `inner`
    pub fn observe(inner: Pattern) -> Self {
        Pattern::record(OBSERVE_LABEL, vec![inner])
    }

    /// Match a value, returning its captures
    pub fn matches(&self, value: &Value) -> Option<Captures> {
        let mut captures = Vec::new();
        if self.match_into(value, &mut captures) {
            Some(captures)
        } else {
            None
        }
    }

    pub fn is_match(&self, value: &Value) -> bool {
        self.matches(value).is_some()
    }

    fn match_into(&self, value: &Value, captures: &mut Captures) -> bool {
        match self {
            Pattern::Discard => true,
            Pattern::Capture(inner) => {
                captures.push(value.clone());
                inner.match_into(value, captures)
            }
            Pattern::Literal(expected) => expected == value,
            Pattern::Record { label, fields } => match value {
                Value::Record {
                    label: actual,
                    fields: values,
                } if actual == label && values.len() == fields.len() => fields
                    .iter()
                    .zip(values)
                    .all(|(pattern, value)| pattern.match_into(value, captures)),
                _ => false,
            },
            Pattern::Seq(items) => match value {
                Value::Seq(values) if values.len() == items.len() => items
                    .iter()
                    .zip(values)
                    .all(|(pattern, value)| pattern.match_into(value, captures)),
                _ => false,
            },
        }
    }

    /// Number of captures a match produces
    pub fn capture_count(&self) -> usize {
        match self {
            Pattern::Discard | Pattern::Literal(_) => 0,
            Pattern::Capture(inner) => 1 + inner.capture_count(),
            Pattern::Record { fields: items, .. } | Pattern::Seq(items) => {
                items.iter().map(Pattern::capture_count).sum()
            }
        }
    }

    /// The value this pattern denotes, if it has no discard or capture
    pub fn to_literal(&self) -> Option<Value> {
        match self {
            Pattern::Discard | Pattern::Capture(_) => None,
            Pattern::Literal(value) => Some(value.clone()),
            Pattern::Record { label, fields } => Some(Value::Record {
                label: label.clone(),
                fields: fields
                    .iter()
                    .map(Pattern::to_literal)
                    .collect::<Option<Vec<_>>>()?,
            }),
            Pattern::Seq(items) => items
                .iter()
                .map(Pattern::to_literal)
                .collect::<Option<Vec<_>>>()
                .map(Value::Seq),
        }
    }

    /// Encode the pattern as a value for interest assertions
    ///
    /// `_` becomes `discard()`, a capture becomes `capture(p)`, literals
    /// stand for themselves.
    pub fn to_value(&self) -> Value {
        match self {
            Pattern::Discard => Value::record(DISCARD_LABEL, vec![]),
            Pattern::Capture(inner) => Value::record(CAPTURE_LABEL, vec![inner.to_value()]),
            Pattern::Literal(value) => value.clone(),
            Pattern::Record { label, fields } => {
                Value::record(label.clone(), fields.iter().map(Pattern::to_value).collect())
            }
            Pattern::Seq(items) => Value::Seq(items.iter().map(Pattern::to_value).collect()),
        }
    }

    /// The `observe(P')` assertion announcing interest in this pattern
    pub fn interest(&self) -> Value {
        Value::record(OBSERVE_LABEL, vec![self.to_value()])
    }

    /// The shape of every value this pattern can match, if fixed
    pub fn shape(&self) -> Option<Shape> {
        match self {
            Pattern::Discard => None,
            Pattern::Capture(inner) => inner.shape(),
            Pattern::Literal(value) => Some(value.shape()),
            Pattern::Record { label, fields } => Some(Shape::record(label.clone(), fields.len())),
            Pattern::Seq(items) => Some(Shape::Seq(items.len())),
        }
    }

    /// The constant first field of a record pattern, if any
    pub fn first_field_literal(&self) -> Option<Value> {
        match self {
            Pattern::Capture(inner) => inner.first_field_literal(),
            Pattern::Literal(value) => value.field(0).cloned(),
            Pattern::Record { fields, .. } => fields.first().and_then(Pattern::to_literal),
            _ => None,
        }
    }

    /// Reject empty labels and records that contradict declared arities
    pub fn validate(&self, shapes: &ShapeRegistry) -> Result<(), PatternError> {
        match self {
            Pattern::Discard => Ok(()),
            Pattern::Capture(inner) => inner.validate(shapes),
            Pattern::Literal(value) => shapes.check_value(value),
            Pattern::Record { label, fields } => {
                shapes.check_record(label, fields.len())?;
                fields.iter().try_for_each(|field| field.validate(shapes))
            }
            Pattern::Seq(items) => items.iter().try_for_each(|item| item.validate(shapes)),
        }
    }
}

impl From<Value> for Pattern {
    fn from(value: Value) -> Self {
        Pattern::Literal(value)
    }
}

impl FromStr for Pattern {
    type Err = SyntaxError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        crate::assertion::parse_pattern(source)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Discard => write!(f, "_"),
            Pattern::Capture(inner) if **inner == Pattern::Discard => write!(f, "$"),
            Pattern::Capture(inner) => write!(f, "$:{inner}"),
            Pattern::Literal(value) => write!(f, "{value}"),
            Pattern::Record { label, fields } => {
                write!(f, "{label}(")?;
                write_list(f, fields)?;
                write!(f, ")")
            }
            Pattern::Seq(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[test]
    fn test_record_match_with_captures() {
        let pattern = Pattern::record("session", vec![Pattern::bind(), Pattern::Discard]);
        let captures = pattern.matches(&record!("session", "a@x", "pw")).unwrap();
        assert_eq!(captures, vec![Value::string("a@x")]);
        assert!(pattern.matches(&record!("session", "a@x")).is_none());
        assert!(pattern.matches(&record!("account", "a@x", "pw")).is_none());
    }

    #[test]
    fn test_captures_are_preorder() {
        let pattern: Pattern = "pair($:point($, $), $)".parse().unwrap();
        let value: Value = "pair(point(1, 2), 3)".parse().unwrap();
        let captures = pattern.matches(&value).unwrap();
        assert_eq!(captures.len(), pattern.capture_count());
        assert_eq!(
            captures,
            vec![
                "point(1, 2)".parse::<Value>().unwrap(),
                Value::int(1),
                Value::int(2),
                Value::int(3),
            ]
        );
    }

    #[test]
    fn test_interest_encoding() {
        let pattern: Pattern = "account($, _)".parse().unwrap();
        insta::assert_snapshot!(
            pattern.interest().to_string(),
            @"observe(account(capture(discard()), discard()))"
        );
        let meta = Pattern::observe(Pattern::record(
            "account",
            vec![Pattern::bind(), Pattern::Discard],
        ));
        let literal_interest = Pattern::record(
            "account",
            vec![Pattern::string("a@x"), Pattern::Discard],
        )
        .interest();
        assert_eq!(meta.matches(&literal_interest), Some(vec![Value::string("a@x")]));
    }

    #[test]
    fn test_index_keys() {
        let pattern: Pattern = r#"task("t1", $)"#.parse().unwrap();
        assert_eq!(pattern.shape(), Some(Shape::record("task", 2)));
        assert_eq!(pattern.first_field_literal(), Some(Value::string("t1")));
        assert_eq!(Pattern::bind().shape(), None);
        let open: Pattern = "task($, 1)".parse().unwrap();
        assert_eq!(open.first_field_literal(), None);
    }

    #[test]
    fn test_validate_against_declared_shapes() {
        let mut shapes = ShapeRegistry::new();
        shapes.declare("account", 1).unwrap();
        assert!(Pattern::record("account", vec![Pattern::bind()])
            .validate(&shapes)
            .is_ok());
        assert!(matches!(
            Pattern::record("account", vec![]).validate(&shapes),
            Err(PatternError::ArityMismatch { .. })
        ));
        assert_eq!(
            Pattern::record("", vec![]).validate(&shapes),
            Err(PatternError::EmptyLabel)
        );
    }
}
