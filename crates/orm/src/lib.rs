//! # elif-assoc: Association core for the elif.rs ORM
//!
//! Relationship metadata, condition compilation, query composition over
//! relationship paths, and batched association hydration.
//!
//! Entities and their relationships are registered once into an immutable
//! [`Registry`]. Queries are composed with [`QueryBuilder`] and executed
//! through a [`Connection`], which bundles the statement executor, the
//! transaction provider and the lifecycle hook runner. Loaded associations
//! are read from [`Record`] slots.

pub mod backends;
pub mod conditions;
pub mod config;
pub mod error;
pub mod inflection;
pub mod loading;
pub mod model;
pub mod query;
pub mod relationships;
pub mod testing;
pub mod transaction;

// Re-export core traits and types
pub use backends::{
    CompiledStatement, Connection, LifecycleHooks, MutationKind, NoopHooks, PostgresExecutor, Row,
    StatementExecutor, TransactionProvider,
};
pub use conditions::{ops, CompileOptions, Operator, Range, WhereClause, WhereValue};
pub use config::OrmConfig;
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use loading::{EagerLoader, LoadPlan};
pub use model::{AssociationSlot, ColumnType, Entity, Model, Record};
pub use query::{OrderBy, OrderDirection, QueryBuilder, ScopeBypass};
pub use relationships::{BelongsTo, HasAssociation, Registry, RegistryBuilder, Relationship, RelationshipKind};
pub use transaction::{Passthrough, QueryContext, Transaction, TransactionHandle};
