//! Parser for Bloom program text.
//!
//! Programs are written in a small block syntax whose expressions are Rust
//! expressions, parsed with `syn`:
//!
//! ```
//! use bloom_syntax::parse_program;
//!
//! let input = r#"
//!     state {
//!         table peeps(name: string, id: int, color: string);
//!         table names(name: string);
//!     }
//!     bloom {
//!         names <+ peeps.map(|p| [p.name]);
//!         stdio <~ names.map(|n| format!("Hello {}", n.name));
//!     }
//! "#;
//!
//! let program = parse_program(input).unwrap();
//! assert_eq!(program.collections.len(), 2);
//! assert_eq!(program.rules().count(), 2);
//! ```

mod syntax;
mod utils;

pub use syntax::*;
pub use utils::{join_spans, line_col};
