//! Runtime values for the engine.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::FieldType;

/// A single field value.
///
/// The variants mirror the closed set of [`FieldType`]s. Equality, hashing
/// and ordering are structural.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// Immutable string.
    Str(Arc<str>),
    /// Opaque byte string; only equality is meaningful.
    Opaque(Arc<[u8]>),
}

/// A row of values. Tuples are copied between collections, never shared.
pub type Tuple = Vec<Value>;

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Opaque(bytes) => {
                write!(f, "0x")?;
                for b in bytes.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl Value {
    /// Create a string value.
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Create an opaque value from raw bytes.
    pub fn opaque(bytes: impl AsRef<[u8]>) -> Self {
        Value::Opaque(Arc::from(bytes.as_ref()))
    }

    /// The field type this value inhabits.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Int(_) => FieldType::Int,
            Value::Bool(_) => FieldType::Bool,
            Value::Str(_) => FieldType::Str,
            Value::Opaque(_) => FieldType::Opaque,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values of the same type. Returns `None` across types
    /// and for opaque values, which carry no ordering.
    pub fn partial_cmp_val(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    // Arithmetic returns `None` on type mismatch, overflow and division by zero.

    pub fn add(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int),
            (Value::Str(a), Value::Str(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Some(Value::string(s))
            }
            _ => None,
        }
    }

    pub fn sub(&self, other: &Value) -> Option<Value> {
        int_op(self, other, i64::checked_sub)
    }

    pub fn mul(&self, other: &Value) -> Option<Value> {
        int_op(self, other, i64::checked_mul)
    }

    pub fn div(&self, other: &Value) -> Option<Value> {
        int_op(self, other, i64::checked_div)
    }

    pub fn rem(&self, other: &Value) -> Option<Value> {
        int_op(self, other, i64::checked_rem)
    }

    pub fn neg(&self) -> Option<Value> {
        self.as_int().and_then(i64::checked_neg).map(Value::Int)
    }

    pub fn abs(&self) -> Option<Value> {
        self.as_int().and_then(i64::checked_abs).map(Value::Int)
    }

    pub fn not(&self) -> Option<Value> {
        self.as_bool().map(|b| Value::Bool(!b))
    }

    /// Length of a string (in chars) or opaque value (in bytes).
    pub fn len(&self) -> Option<Value> {
        match self {
            Value::Str(s) => i64::try_from(s.chars().count()).ok().map(Value::Int),
            Value::Opaque(b) => i64::try_from(b.len()).ok().map(Value::Int),
            _ => None,
        }
    }
}

fn int_op(a: &Value, b: &Value, op: fn(i64, i64) -> Option<i64>) -> Option<Value> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => op(*a, *b).map(Value::Int),
        _ => None,
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Opaque(Arc::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(Value::from("george"), Value::string(String::from("george")));
        assert_ne!(Value::from(1), Value::from(true));
        assert_eq!(Value::opaque([1u8, 2]), Value::from(vec![1u8, 2]));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(Value::Int(2).add(&Value::Int(3)), Some(Value::Int(5)));
        assert_eq!(Value::Int(7).rem(&Value::Int(4)), Some(Value::Int(3)));
        assert_eq!(Value::Int(1).div(&Value::Int(0)), None);
        assert_eq!(Value::Int(i64::MAX).add(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).add(&Value::Bool(true)), None);
        assert_eq!(Value::from("ab").add(&Value::from("cd")), Some(Value::from("abcd")));
    }

    #[test]
    fn test_comparison_within_type_only() {
        assert_eq!(
            Value::Int(1).partial_cmp_val(&Value::Int(2)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int(1).partial_cmp_val(&Value::from("1")), None);
        assert_eq!(Value::opaque([1u8]).partial_cmp_val(&Value::opaque([2u8])), None);
    }

    #[test]
    fn test_display_and_debug() {
        assert_eq!(Value::from("yellow").to_string(), "yellow");
        assert_eq!(format!("{:?}", Value::from("yellow")), "\"yellow\"");
        assert_eq!(format!("{:?}", Value::opaque([0xab_u8, 0x01])), "0xab01");
        assert_eq!(Value::Int(-4).to_string(), "-4");
    }

    #[test]
    fn test_string_len() {
        assert_eq!(Value::from("héllo").len(), Some(Value::Int(5)));
        assert_eq!(Value::Int(3).len(), None);
    }
}
