//! Tick-driven evaluation engine for Bloom-style dataflow programs.
//!
//! A [`Program`] declares schema-typed collections and rules relating them.
//! An [`Engine`] owns the program's collections and advances a logical clock:
//! each [`Engine::tick`] applies tuples staged by the previous tick, runs the
//! merge-now rules to a fixpoint, and stages the output of next-tick rules.
//!
//! # Example
//!
//! ```
//! use bloom_eval::{
//!     CollectSink, Collaborators, Engine, EngineConfig, FieldType, Operator, Program, Schema,
//!     TemporalOp, Value,
//! };
//!
//! let mut b = Program::builder();
//! b.table("peeps", Schema::new([("name", FieldType::Str), ("id", FieldType::Int)]))?;
//! b.table("names", Schema::new([("name", FieldType::Str)]))?;
//! b.rule(
//!     "names",
//!     TemporalOp::MergeNextTick,
//!     Operator::map("peeps", |p| Some(vec![p[0].clone()])),
//! )?;
//!
//! let io = Collaborators::new(CollectSink::new());
//! let mut engine = Engine::with_collaborators(b.build(), EngineConfig::default(), io)?;
//! engine.insert("peeps", [vec![Value::from("george"), Value::from(5)]])?;
//!
//! engine.tick()?;
//! assert!(engine.contents("names")?.is_empty());
//! engine.tick()?;
//! assert_eq!(engine.contents("names")?, vec![vec![Value::from("george")]]);
//! # Ok::<(), bloom_eval::EvalError>(())
//! ```

mod collection;
mod error;
mod eval;
mod operator;
mod program;
mod rule;
pub mod schema;
pub mod sink;
pub mod store;
pub mod value;

pub use collection::{Collection, Persistence};
pub use error::{BoxError, EvalError, Result};
pub use eval::{CollectionChange, Engine, EngineConfig, TickReport};
pub use operator::{MapFn, Operator, PairFn};
pub use program::{CollectionDecl, CollectionId, Program, ProgramBuilder};
pub use rule::{Rule, TemporalOp};
pub use schema::{Field, FieldType, Schema, SchemaError};
pub use sink::{CollectSink, Collaborators, DurableStore, StreamSink, WriterSink};
pub use store::{JsonlStore, MemoryStore};
pub use value::{Tuple, Value};
