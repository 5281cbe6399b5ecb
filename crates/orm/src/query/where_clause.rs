//! Query Builder WHERE clause operations
//!
//! Conditions are recorded as written and routed when the statement is
//! compiled, once every join alias is known. Bare keys address the root
//! entity, `alias.column` keys and nested clauses address a joined alias.

use std::collections::HashMap;

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::*;
use crate::conditions::{compile, ColumnRef, CompileOptions, Predicate, WhereClause, WhereValue};
use crate::error::{ModelError, ModelResult};
use crate::relationships::Registry;

impl QueryBuilder {
    /// Add every entry of `clause` (ANDed)
    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        if !clause.is_empty() {
            self.wheres.push(WhereEntry::All {
                clause,
                negate: false,
            });
        }
        self
    }

    /// Add every entry of `clause`, each inverted
    pub fn where_not(mut self, clause: WhereClause) -> Self {
        if !clause.is_empty() {
            self.wheres.push(WhereEntry::All {
                clause,
                negate: true,
            });
        }
        self
    }

    /// Match rows satisfying at least one of `clauses`
    pub fn where_any(mut self, clauses: Vec<WhereClause>) -> Self {
        self.wheres.push(WhereEntry::Any(clauses));
        self
    }

    /// Conditions on a joined alias
    pub fn where_on(self, alias: &str, clause: WhereClause) -> Self {
        self.where_clause(WhereClause::new().with(alias, clause))
    }

    /// Add WHERE condition with equality
    pub fn where_eq<V: Into<WhereValue>>(self, column: &str, value: V) -> Self {
        self.where_clause(WhereClause::new().with(column, value))
    }

    /// Add WHERE condition with not equal
    pub fn where_ne<V: Into<WhereValue>>(self, column: &str, value: V) -> Self {
        self.where_not(WhereClause::new().with(column, value))
    }

    /// Add WHERE column IN (values)
    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_clause(WhereClause::new().with(column, WhereValue::list(values)))
    }

    /// Add WHERE column IS NULL
    pub fn where_null(self, column: &str) -> Self {
        self.where_clause(WhereClause::new().with(column, WhereValue::Null))
    }

    /// Add WHERE column IS NOT NULL
    pub fn where_not_null(self, column: &str) -> Self {
        self.where_not(WhereClause::new().with(column, WhereValue::Null))
    }

    /// Compile and route every recorded where entry
    pub(crate) fn where_predicates(
        &self,
        root_alias: &str,
        aliases: &HashMap<String, String>,
    ) -> ModelResult<Vec<Predicate>> {
        let options = CompileOptions::default().with_passthrough(&self.context.passthrough);
        let router = Router {
            registry: &self.registry,
            root_alias,
            aliases,
        };

        let mut predicates = Vec::new();
        for entry in &self.wheres {
            match entry {
                WhereEntry::All { clause, negate } => {
                    let options = if *negate { options.negated() } else { options };
                    for predicate in compile(clause, &options)? {
                        predicates.push(router.route(predicate)?);
                    }
                }
                WhereEntry::Any(clauses) => {
                    let mut branches = Vec::with_capacity(clauses.len());
                    for clause in clauses {
                        let routed = compile(clause, &options)?
                            .into_iter()
                            .map(|predicate| router.route(predicate))
                            .collect::<ModelResult<Vec<_>>>()?;
                        branches.push(Predicate::All(routed));
                    }
                    predicates.push(Predicate::Any(branches));
                }
            }
        }
        Ok(predicates)
    }

    /// Route a single column reference, as used by ORDER BY and projections
    pub(crate) fn route_column(
        &self,
        column: &ColumnRef,
        root_alias: &str,
        aliases: &HashMap<String, String>,
    ) -> ModelResult<ColumnRef> {
        Router {
            registry: &self.registry,
            root_alias,
            aliases,
        }
        .column(column.clone())
    }
}

/// Qualifies and validates column references against the alias map
struct Router<'a> {
    registry: &'a Registry,
    root_alias: &'a str,
    aliases: &'a HashMap<String, String>,
}

impl Router<'_> {
    fn route(&self, predicate: Predicate) -> ModelResult<Predicate> {
        let routed = match predicate {
            Predicate::Compare {
                column,
                operator,
                operand,
            } => Predicate::Compare {
                column: self.column(column)?,
                operator,
                operand,
            },
            Predicate::Columns {
                left,
                operator,
                right,
            } => Predicate::Columns {
                left: self.column(left)?,
                operator,
                right: self.column(right)?,
            },
            Predicate::Literal(value) => Predicate::Literal(value),
            Predicate::All(parts) => Predicate::All(
                parts
                    .into_iter()
                    .map(|part| self.route(part))
                    .collect::<ModelResult<_>>()?,
            ),
            Predicate::Any(parts) => Predicate::Any(
                parts
                    .into_iter()
                    .map(|part| self.route(part))
                    .collect::<ModelResult<_>>()?,
            ),
        };
        Ok(routed)
    }

    fn column(&self, column: ColumnRef) -> ModelResult<ColumnRef> {
        let alias = column.alias.clone().unwrap_or_else(|| self.root_alias.to_string());
        let entity_name = self
            .aliases
            .get(&alias)
            .ok_or_else(|| ModelError::Query(format!("Unknown table alias '{}'", alias)))?;
        let entity = self.registry.entity(entity_name)?;
        if !entity.has_column(&column.name) {
            return Err(ModelError::UnknownColumn {
                entity: entity.name().to_string(),
                column: column.name,
            });
        }
        Ok(ColumnRef::qualified(&alias, &column.name))
    }
}
