//! Assertion values
//!
//! Assertions are immutable, structurally comparable values. The engine
//! treats them as opaque payloads: only patterns look inside them.
//!
//! This module provides:
//! - `Value`: the closed tagged union exchanged through dataspaces
//! - `Shape`: the index class of a value (label + arity for records)
//! - Text syntax (`FromStr`) and preserves interop

mod interop;
mod shape;
mod syntax;

pub use interop::InteropError;
pub use shape::{Shape, ShapeRegistry};
pub(crate) use syntax::parse_pattern;
pub use syntax::SyntaxError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A structured fact published into a dataspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    /// Signed integer
    Int(i64),
    /// Text string
    Str(String),
    /// Bare symbol
    Symbol(String),
    /// Tagged tuple; the arity of a label is fixed per protocol
    Record { label: String, fields: Vec<Value> },
    /// Ordered sequence
    Seq(Vec<Value>),
}

impl Value {
    pub fn int(value: i64) -> Self {
        Value::Int(value)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    pub fn record(label: impl Into<String>, fields: Vec<Value>) -> Self {
        Value::Record {
            label: label.into(),
            fields,
        }
    }

    pub fn seq(items: Vec<Value>) -> Self {
        Value::Seq(items)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Record label, if this is a record
    pub fn label(&self) -> Option<&str> {
        match self {
            Value::Record { label, .. } => Some(label),
            _ => None,
        }
    }

    /// Record fields, if this is a record
    pub fn fields(&self) -> Option<&[Value]> {
        match self {
            Value::Record { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// A single record field
    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields().and_then(|fields| fields.get(index))
    }

    /// Check whether this is a record with the given label and arity
    pub fn is_record(&self, label: &str, arity: usize) -> bool {
        matches!(self, Value::Record { label: l, fields } if l == label && fields.len() == arity)
    }

    /// The index class of this value
    pub fn shape(&self) -> Shape {
        Shape::of(self)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Record { label, fields } => {
                write!(f, "{label}(")?;
                write_list(f, fields)?;
                write!(f, ")")
            }
            Value::Seq(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
        }
    }
}

pub(crate) fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl FromStr for Value {
    type Err = SyntaxError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        parse_pattern(source)?
            .to_literal()
            .ok_or(SyntaxError::NotAValue)
    }
}

/// Build a record value: `record!("account", Value::string("a@x"))`
#[macro_export]
macro_rules! record {
    ($label:expr $(, $field:expr)* $(,)?) => {
        $crate::assertion::Value::record($label, vec![$($crate::assertion::Value::from($field)),*])
    };
}
