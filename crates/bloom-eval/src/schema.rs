//! Collection schemas and tuple validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Tuple, Value};

/// The closed set of field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    Bool,
    Str,
    Opaque,
}

impl FieldType {
    /// The keyword used for this type in program text.
    pub fn keyword(self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Bool => "bool",
            FieldType::Str => "string",
            FieldType::Opaque => "opaque",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A named, typed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
}

/// Why a tuple does not conform to a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("expected {expected} fields, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("field `{field}` expects {expected}, found {found}")]
    Type {
        field: String,
        expected: FieldType,
        found: FieldType,
    },
    #[error("join key columns ({left}, {right}) are out of range or differ in type")]
    JoinKey { left: usize, right: usize },
}

/// An ordered list of fields. The first `key_len` fields form the key.
///
/// A schema whose key covers every field behaves as a plain set. With a
/// shorter key, two distinct tuples may not share a key within one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
    key_len: usize,
}

impl Schema {
    /// Schema in which every field is part of the key.
    pub fn new<N: Into<String>>(fields: impl IntoIterator<Item = (N, FieldType)>) -> Self {
        let fields: Vec<Field> = fields
            .into_iter()
            .map(|(name, ty)| Field {
                name: name.into(),
                ty,
            })
            .collect();
        let key_len = fields.len();
        Schema { fields, key_len }
    }

    /// Schema with explicit key fields followed by value fields.
    pub fn keyed<K: Into<String>, V: Into<String>>(
        keys: impl IntoIterator<Item = (K, FieldType)>,
        values: impl IntoIterator<Item = (V, FieldType)>,
    ) -> Self {
        let mut schema = Schema::new(keys);
        schema.key_len = schema.fields.len();
        schema
            .fields
            .extend(values.into_iter().map(|(name, ty)| Field {
                name: name.into(),
                ty,
            }));
        schema
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn field_types(&self) -> impl Iterator<Item = FieldType> + '_ {
        self.fields.iter().map(|f| f.ty)
    }

    /// Position of the field with the given name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Whether some fields lie outside the key.
    pub fn is_keyed(&self) -> bool {
        self.key_len < self.fields.len()
    }

    /// The key prefix of a conforming tuple.
    pub fn key<'a>(&self, tuple: &'a [Value]) -> &'a [Value] {
        &tuple[..self.key_len.min(tuple.len())]
    }

    /// Check that `values` has the declared arity and field types.
    pub fn check(&self, values: &[Value]) -> Result<(), SchemaError> {
        if values.len() != self.fields.len() {
            return Err(SchemaError::Arity {
                expected: self.fields.len(),
                found: values.len(),
            });
        }
        for (field, value) in self.fields.iter().zip(values) {
            let found = value.field_type();
            if found != field.ty {
                return Err(SchemaError::Type {
                    field: field.name.clone(),
                    expected: field.ty,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Build a tuple, failing if `values` does not conform.
    pub fn make(&self, values: Vec<Value>) -> Result<Tuple, SchemaError> {
        self.check(&values)?;
        Ok(values)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                if i == self.key_len {
                    write!(f, " => ")?;
                } else {
                    write!(f, ", ")?;
                }
            }
            write!(f, "{}: {}", field.name, field.ty)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peeps() -> Schema {
        Schema::new([
            ("name", FieldType::Str),
            ("id", FieldType::Int),
            ("color", FieldType::Str),
        ])
    }

    #[test]
    fn test_make_conforming() {
        let tuple = peeps()
            .make(vec!["yolanda".into(), 11.into(), "yellow".into()])
            .unwrap();
        assert_eq!(tuple.len(), 3);
    }

    #[test]
    fn test_make_arity_mismatch() {
        let err = peeps().make(vec!["yolanda".into()]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::Arity {
                expected: 3,
                found: 1
            }
        );
    }

    #[test]
    fn test_make_type_mismatch() {
        let err = peeps()
            .make(vec!["yolanda".into(), "11".into(), "yellow".into()])
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::Type {
                field: "id".into(),
                expected: FieldType::Int,
                found: FieldType::Str
            }
        );
    }

    #[test]
    fn test_keyed_schema() {
        let nodes = Schema::keyed([("name", FieldType::Str)], [("reachable", FieldType::Bool)]);
        assert!(nodes.is_keyed());
        assert_eq!(nodes.key_len(), 1);
        let tuple = vec![Value::from("a"), Value::from(true)];
        assert_eq!(nodes.key(&tuple), &[Value::from("a")]);
        assert_eq!(nodes.to_string(), "(name: string => reachable: bool)");
        assert!(!peeps().is_keyed());
    }

    #[test]
    fn test_position() {
        assert_eq!(peeps().position("color"), Some(2));
        assert_eq!(peeps().position("missing"), None);
    }
}
