//! Engine error types.

use thiserror::Error;

use crate::schema::SchemaError;
use crate::value::Tuple;

/// Error type returned by external collaborators (stores and sinks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum EvalError {
    /// A tuple inserted or produced does not conform to the target schema.
    #[error("tuple rejected by `{collection}`{}: {source}", rule_suffix(.rule))]
    SchemaMismatch {
        collection: String,
        rule: Option<String>,
        #[source]
        source: SchemaError,
    },

    #[error("unknown collection `{0}`")]
    UnknownCollection(String),

    #[error("collection `{0}` is declared more than once")]
    DuplicateCollection(String),

    #[error("collection `{0}` is a stream sink and cannot be read")]
    WriteOnlySource(String),

    /// Two distinct tuples with the same key would coexist.
    #[error("key {key:?} of `{collection}` is bound to {existing:?}; cannot also hold {incoming:?}")]
    KeyConflict {
        collection: String,
        key: Tuple,
        existing: Tuple,
        incoming: Tuple,
    },

    /// The fixpoint safety cutoff was exceeded; the tick is abandoned.
    #[error("tick {tick} did not reach a fixpoint within {iterations} iterations")]
    NonTerminatingFixpoint { tick: u64, iterations: usize },

    /// A durable store or stream sink failed. The engine does not retry.
    #[error("external collaborator failed for `{collection}`: {source}")]
    ExternalIo {
        collection: String,
        #[source]
        source: BoxError,
    },
}

fn rule_suffix(rule: &Option<String>) -> String {
    rule.as_ref()
        .map(|label| format!(" (from rule `{label}`)"))
        .unwrap_or_default()
}

impl EvalError {
    pub(crate) fn schema(collection: &str, source: SchemaError) -> Self {
        EvalError::SchemaMismatch {
            collection: collection.to_string(),
            rule: None,
            source,
        }
    }

    pub(crate) fn external(collection: &str, source: BoxError) -> Self {
        EvalError::ExternalIo {
            collection: collection.to_string(),
            source,
        }
    }

    /// Attribute a schema mismatch to the rule that produced the tuple.
    pub(crate) fn in_rule(self, label: &str) -> Self {
        match self {
            EvalError::SchemaMismatch {
                collection,
                rule: None,
                source,
            } => EvalError::SchemaMismatch {
                collection,
                rule: Some(label.to_string()),
                source,
            },
            other => other,
        }
    }
}

pub type Result<T, E = EvalError> = std::result::Result<T, E>;
