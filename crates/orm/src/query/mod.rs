//! Query Builder Module - fluent query composition over registered entities

pub mod builder;
pub mod dml;
pub mod execution;
pub mod joins;
pub mod ordering;
pub mod pagination;
pub mod scopes;
pub mod sql_generation;
pub mod types;
pub mod where_clause;

pub use builder::QueryBuilder;
pub use ordering::{OrderBy, OrderDirection};
pub use scopes::ScopeBypass;
pub use types::{Aggregate, JoinType, Projection, ResolvedJoin};
