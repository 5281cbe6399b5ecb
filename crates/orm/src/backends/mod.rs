//! Database Backend Abstractions
//!
//! Collaborator interfaces consumed by the association core, plus the
//! sqlx-backed PostgreSQL adapter.

pub mod core;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use postgres::PostgresExecutor;
