//! Lowering of Bloom program text into engine programs.
//!
//! [`compile`] parses program text with `bloom-syntax`, resolves collection
//! names, binds closure parameters to the schemas of their sources and
//! type-checks every rule body before any tick runs. The result is an
//! ordinary [`bloom_eval::Program`].
//!
//! ```
//! use bloom_eval::{CollectSink, Collaborators, Engine, EngineConfig};
//!
//! let program = bloom_ir::compile(r#"
//!     state { table peeps(name: string, id: int); }
//!     bootstrap { peeps <= [("george", 5)]; }
//!     bloom { stdio <~ peeps.map(|p| format!("Hello {}", p.name)); }
//! "#)?;
//!
//! let sink = CollectSink::new();
//! let io = Collaborators::new(sink.clone());
//! let mut engine = Engine::with_collaborators(program, EngineConfig::default(), io)?;
//! engine.tick()?;
//! assert_eq!(sink.lines(), vec!["Hello george".to_string()]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod compile;
mod lower;

use bloom_eval::{EvalError, Program};
use bloom_syntax::line_col;
use proc_macro2::Span;
use thiserror::Error;

pub use lower::{STDIO, lower, parse_pattern, parse_row};

#[derive(Debug, Error)]
pub enum LowerError {
    #[error("parse error at {loc}: {0}", loc = location(.0))]
    Parse(#[from] syn::Error),

    /// Raised by the engine while building the program.
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("type error at {line}:{column}: {message}")]
    Type {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("unsupported at {line}:{column}: {message}")]
    Unsupported {
        line: usize,
        column: usize,
        message: String,
    },
}

fn location(err: &syn::Error) -> String {
    let (line, column) = line_col(err.span());
    format!("{line}:{column}")
}

pub(crate) fn type_error(span: Span, message: impl Into<String>) -> LowerError {
    let (line, column) = line_col(span);
    LowerError::Type {
        line,
        column,
        message: message.into(),
    }
}

pub(crate) fn unsupported(span: Span, message: impl Into<String>) -> LowerError {
    let (line, column) = line_col(span);
    LowerError::Unsupported {
        line,
        column,
        message: message.into(),
    }
}

/// Parse and lower program text.
pub fn compile(src: &str) -> Result<Program, LowerError> {
    let ast = bloom_syntax::parse_program(src)?;
    lower(&ast)
}
