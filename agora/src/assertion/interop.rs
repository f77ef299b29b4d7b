//! Conversion between `Value` and preserves `IOValue`
//!
//! Records map to preserves records with a symbol label, sequences to
//! preserves sequences. Preserves values with no `Value` counterpart
//! (floats, sets, dictionaries, byte strings, non-symbol labels) are rejected.

use super::Value;
use preserves::types::{AtomClass, CompoundClass, ValueClass};
use preserves::IOValue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteropError {
    #[error("record label must be a symbol")]
    NonSymbolLabel,

    #[error("integer does not fit in i64")]
    IntegerRange,

    #[error("unsupported preserves value class: {0}")]
    Unsupported(String),
}

impl From<&Value> for IOValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Int(n) => IOValue::new(*n),
            Value::Str(s) => IOValue::new(s.clone()),
            Value::Symbol(s) => IOValue::symbol(s.clone()),
            Value::Record { label, fields } => IOValue::record(
                IOValue::symbol(label.clone()),
                fields.iter().map(IOValue::from).collect(),
            ),
            Value::Seq(items) => IOValue::new(items.iter().map(IOValue::from).collect::<Vec<_>>()),
        }
    }
}

impl From<Value> for IOValue {
    fn from(value: Value) -> Self {
        IOValue::from(&value)
    }
}

impl TryFrom<&IOValue> for Value {
    type Error = InteropError;

    fn try_from(value: &IOValue) -> Result<Self, Self::Error> {
        if value.is_record() {
            let label = value
                .label()
                .as_symbol()
                .map(|sym| sym.as_ref().to_string())
                .ok_or(InteropError::NonSymbolLabel)?;
            let fields = value
                .iter()
                .map(|field| Value::try_from(&IOValue::from(field)))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Record { label, fields });
        }
        if let Some(text) = value.as_string() {
            return Ok(Value::Str(text.to_string()));
        }
        if let Some(sym) = value.as_symbol() {
            return Ok(Value::Symbol(sym.as_ref().to_string()));
        }
        let inner = value.value();
        match inner.value_class() {
            ValueClass::Atomic(AtomClass::SignedInteger) => {
                let big = inner
                    .as_signed_integer()
                    .ok_or(InteropError::IntegerRange)?;
                i64::try_from(big.as_ref())
                    .map(Value::Int)
                    .map_err(|_| InteropError::IntegerRange)
            }
            ValueClass::Compound(CompoundClass::Sequence) => inner
                .iter()
                .map(|child| Value::try_from(&IOValue::from(child)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Seq),
            other => Err(InteropError::Unsupported(format!("{other:?}"))),
        }
    }
}

impl TryFrom<IOValue> for Value {
    type Error = InteropError;

    fn try_from(value: IOValue) -> Result<Self, Self::Error> {
        Value::try_from(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trips_through_preserves() {
        let value = Value::record(
            "account",
            vec![Value::string("a@x"), Value::int(3), Value::symbol("open")],
        );
        let io = IOValue::from(&value);
        assert!(io.is_record());
        assert_eq!(Value::try_from(&io).unwrap(), value);
    }

    #[test]
    fn test_non_symbol_label_rejected() {
        let io = IOValue::record(IOValue::new("label".to_string()), vec![]);
        assert_eq!(Value::try_from(&io), Err(InteropError::NonSymbolLabel));
    }
}
