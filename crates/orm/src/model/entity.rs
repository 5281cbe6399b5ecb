//! Entity Types - table shape, primary key, inheritance and scopes of a registered entity

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conditions::WhereClause;
use crate::query::QueryBuilder;

/// Column types relevant to key validation and row decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Float,
    Numeric,
    Text,
    Boolean,
    Uuid,
    Timestamp,
    Date,
    Json,
}

impl ColumnType {
    pub fn is_integer(self) -> bool {
        matches!(self, ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt)
    }

    /// Whether a foreign key of this type can reference a key of `other`
    pub fn is_compatible_with(self, other: ColumnType) -> bool {
        self == other || (self.is_integer() && other.is_integer())
    }
}

/// A declared column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Implicit filter applied to every read of an entity unless bypassed
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultScope {
    pub name: String,
    pub clause: WhereClause,
}

/// Named scope callable through [`QueryBuilder::scope`]
pub type ScopeFn = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

/// Scope name registered for soft-deleting entities
pub const SOFT_DELETE_SCOPE: &str = "soft_delete";

/// Scope name registered for single-table-inheritance children
pub const STI_SCOPE: &str = "sti";

/// A named relational row shape
///
/// ```ignore
/// let post = Entity::new("Post", "posts")
///     .column("id", ColumnType::BigInt)
///     .column("user_id", ColumnType::BigInt)
///     .column("title", ColumnType::Text)
///     .soft_delete()
///     .default_scope("published", WhereClause::new().with("published", true));
/// ```
#[derive(Clone)]
pub struct Entity {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) primary_key: String,
    pub(crate) columns: Vec<Column>,
    pub(crate) soft_delete: bool,
    pub(crate) sti_parent: Option<String>,
    pub(crate) default_scopes: Vec<DefaultScope>,
    pub(crate) scopes: HashMap<String, ScopeFn>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scopes: Vec<&String> = self.scopes.keys().collect();
        scopes.sort();
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("columns", &self.columns)
            .field("soft_delete", &self.soft_delete)
            .field("sti_parent", &self.sti_parent)
            .field("default_scopes", &self.default_scopes)
            .field("scopes", &scopes)
            .finish()
    }
}

impl Entity {
    /// Create an entity with primary key `id`
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
            soft_delete: false,
            sti_parent: None,
            default_scopes: Vec::new(),
            scopes: HashMap::new(),
        }
    }

    /// Single-table-inheritance child. Table, primary key, columns,
    /// relationships and default scopes are inherited from `parent`.
    pub fn sti_child(name: &str, parent: &str) -> Self {
        let mut entity = Self::new(name, "");
        entity.sti_parent = Some(parent.to_string());
        entity
    }

    pub fn primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.to_string();
        self
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.column_type = column_type,
            None => self.columns.push(Column {
                name: name.to_string(),
                column_type,
            }),
        }
        self
    }

    /// Exclude rows with a non-null deletion timestamp from default reads
    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    pub fn default_scope(mut self, name: &str, clause: WhereClause) -> Self {
        self.default_scopes.retain(|scope| scope.name != name);
        self.default_scopes.push(DefaultScope {
            name: name.to_string(),
            clause,
        });
        self
    }

    pub fn scope<F>(mut self, name: &str, scope: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        self.scopes.insert(name.to_string(), Arc::new(scope));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key_column(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }

    /// Whether `name` is declared or is the primary key
    pub fn has_column(&self, name: &str) -> bool {
        self.primary_key == name || self.columns.iter().any(|c| c.name == name)
    }

    pub fn soft_deletes(&self) -> bool {
        self.soft_delete
    }

    pub fn sti_parent(&self) -> Option<&str> {
        self.sti_parent.as_deref()
    }

    /// Default scopes in application order
    pub fn default_scopes(&self) -> &[DefaultScope] {
        &self.default_scopes
    }

    pub fn named_scope(&self, name: &str) -> Option<&ScopeFn> {
        self.scopes.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_family_is_compatible() {
        assert!(ColumnType::Integer.is_compatible_with(ColumnType::BigInt));
        assert!(ColumnType::SmallInt.is_compatible_with(ColumnType::Integer));
        assert!(ColumnType::Uuid.is_compatible_with(ColumnType::Uuid));
        assert!(!ColumnType::Text.is_compatible_with(ColumnType::BigInt));
        assert!(!ColumnType::Uuid.is_compatible_with(ColumnType::Text));
    }

    #[test]
    fn test_redeclared_column_keeps_position() {
        let entity = Entity::new("User", "users")
            .column("id", ColumnType::Integer)
            .column("email", ColumnType::Text)
            .column("id", ColumnType::BigInt);

        assert_eq!(entity.columns().len(), 2);
        assert_eq!(entity.columns()[0].name, "id");
        assert_eq!(entity.column_type("id"), Some(ColumnType::BigInt));
    }

    #[test]
    fn test_default_scope_replaces_same_name() {
        let entity = Entity::new("Post", "posts")
            .default_scope("published", WhereClause::new().with("published", true))
            .default_scope("published", WhereClause::new().with("published", false));

        assert_eq!(entity.default_scopes().len(), 1);
        assert_eq!(
            entity.default_scopes()[0].clause,
            WhereClause::new().with("published", false)
        );
    }
}
