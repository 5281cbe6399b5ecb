//! Where/Condition Compiler
//!
//! Structured where input ([`WhereClause`]), operator statements ([`ops`])
//! and the compiler that turns them into dialect-neutral [`Predicate`] nodes.

pub mod compiler;
pub mod ops;
pub mod types;

pub use compiler::{compile, CompileOptions};
pub use types::*;
