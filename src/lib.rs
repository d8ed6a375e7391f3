//! Loads Kconfig configuration trees, evaluates their dependency
//! expressions, propagates values through forward and reverse
//! dependencies, and serializes the selection to a `.config` file.
//!
//! The pipeline: the [`reader`] feeds logical lines to the [`parser`],
//! which builds the entry tree in a symbol arena ([`model`]); the graph
//! builder compiles every expression ([`expr`]), partitions the universe
//! into dependency layers, and precomputes per-symbol controls frontiers;
//! the evaluator materializes defaults and cascades edits layer by layer.
//!
//! ```no_run
//! # async fn demo() -> kconfig_core::Result<()> {
//! let tree = kconfig_core::Kconfig::load("Kconfig").await?;
//! let audit = tree.lookup("AUDIT").unwrap();
//! tree.set_value(audit, "y")?;
//! tree.write_dot_config(".config").await?;
//! # Ok(())
//! # }
//! ```

mod dotconfig;
mod eval;
mod graph;

pub mod env;
pub mod error;
pub mod expr;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod reader;
pub mod tri;

pub use env::{EnvProvider, MapEnv, ProcessEnv};
pub use error::{Error, Location, Result};
pub use model::{
    AttrKind, Attribute, Change, EntryKind, Kconfig, Symbol, SymbolId, SymbolState, ValueType,
};
pub use tri::Tri;
