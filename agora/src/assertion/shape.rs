//! Value shapes and declared record arities

use super::Value;
use crate::pattern::PatternError;
use std::collections::HashMap;
use std::fmt;

/// The index class of a value
///
/// Records are classed by label and arity, so a change to one tag only
/// touches the subscriptions over that tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Shape {
    Int,
    Str,
    Symbol,
    Record { label: String, arity: usize },
    Seq(usize),
}

impl Shape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Int(_) => Shape::Int,
            Value::Str(_) => Shape::Str,
            Value::Symbol(_) => Shape::Symbol,
            Value::Record { label, fields } => Shape::Record {
                label: label.clone(),
                arity: fields.len(),
            },
            Value::Seq(items) => Shape::Seq(items.len()),
        }
    }

    pub fn record(label: impl Into<String>, arity: usize) -> Self {
        Shape::Record {
            label: label.into(),
            arity,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Int => write!(f, "int"),
            Shape::Str => write!(f, "string"),
            Shape::Symbol => write!(f, "symbol"),
            Shape::Record { label, arity } => write!(f, "{label}/{arity}"),
            Shape::Seq(len) => write!(f, "seq/{len}"),
        }
    }
}

/// Declared arities for record labels
///
/// Labels without a declaration accept any arity. Once declared, records
/// and record patterns with a different arity are malformed.
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    arities: HashMap<String, usize>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the arity of a label
    ///
    /// Re-declaring the same arity is a no-op; a different arity is rejected.
    pub fn declare(&mut self, label: impl Into<String>, arity: usize) -> Result<(), PatternError> {
        let label = label.into();
        match self.arities.get(&label) {
            Some(&declared) if declared != arity => Err(PatternError::ShapeConflict {
                label,
                declared,
                requested: arity,
            }),
            Some(_) => Ok(()),
            None => {
                self.arities.insert(label, arity);
                Ok(())
            }
        }
    }

    /// Declared arity of a label
    pub fn arity(&self, label: &str) -> Option<usize> {
        self.arities.get(label).copied()
    }

    /// Check one record occurrence against the declarations
    pub fn check_record(&self, label: &str, arity: usize) -> Result<(), PatternError> {
        if label.is_empty() {
            return Err(PatternError::EmptyLabel);
        }
        match self.arity(label) {
            Some(expected) if expected != arity => Err(PatternError::ArityMismatch {
                label: label.to_string(),
                expected,
                found: arity,
            }),
            _ => Ok(()),
        }
    }

    /// Check every record nested in a value
    pub fn check_value(&self, value: &Value) -> Result<(), PatternError> {
        match value {
            Value::Record { label, fields } => {
                self.check_record(label, fields.len())?;
                fields.iter().try_for_each(|field| self.check_value(field))
            }
            Value::Seq(items) => items.iter().try_for_each(|item| self.check_value(item)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_of_record() {
        let v = Value::record("task", vec![Value::int(1), Value::int(2)]);
        assert_eq!(v.shape(), Shape::record("task", 2));
        assert_eq!(v.shape().to_string(), "task/2");
    }

    #[test]
    fn test_declare_conflict() {
        let mut shapes = ShapeRegistry::new();
        shapes.declare("account", 1).unwrap();
        shapes.declare("account", 1).unwrap();
        assert!(matches!(
            shapes.declare("account", 2),
            Err(PatternError::ShapeConflict { declared: 1, .. })
        ));
    }

    #[test]
    fn test_check_nested_value() {
        let mut shapes = ShapeRegistry::new();
        shapes.declare("account", 1).unwrap();
        let bad = Value::seq(vec![Value::record("account", vec![])]);
        assert!(matches!(
            shapes.check_value(&bad),
            Err(PatternError::ArityMismatch { expected: 1, found: 0, .. })
        ));
    }
}
