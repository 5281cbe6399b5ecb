//! Query Builder DML terminals - update and destroy in two phases
//!
//! The matching primary keys are selected first with the builder's joins,
//! conditions, order and limit; the mutation then targets exactly those keys.
//! An empty match issues no mutating statement.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use super::builder::QueryBuilder;
use super::sql_generation::SqlWriter;
use super::types::Projection;
use crate::backends::{CompiledStatement, Connection, MutationKind, Row};
use crate::error::{ModelError, ModelResult};
use crate::model::{Entity, SOFT_DELETE_SCOPE};
use crate::relationships::{Dependent, HasAssociation};
use crate::transaction::Transaction;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a destroy-family terminal does to matched rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    /// Soft delete when the entity soft-deletes, hard delete otherwise
    Destroy,
    /// Hard delete regardless of soft delete
    ReallyDestroy,
    /// Clear the soft delete column
    Undestroy,
}

/// Matched keys plus the owner-key columns dependents cascade through
struct Matched {
    keys: Vec<Value>,
    rows: Vec<Row>,
}

impl QueryBuilder {
    /// Apply `changes` (a JSON object of column → value) to every matching row.
    /// Returns the number of rows updated.
    pub async fn update(self, connection: &Connection, changes: Value) -> ModelResult<u64> {
        let entity = self.root_entity()?;
        let changes = match changes {
            Value::Object(changes) => changes,
            other => {
                return Err(ModelError::Query(format!(
                    "update expects an object of column values, got {}",
                    other
                )))
            }
        };
        if changes.is_empty() {
            return Ok(0);
        }
        if let Some(column) = changes.keys().find(|column| !entity.has_column(column)) {
            return Err(ModelError::UnknownColumn {
                entity: entity.name().to_string(),
                column: column.clone(),
            });
        }

        let matched = self.matching(connection, &[]).await?;
        if matched.keys.is_empty() {
            return Ok(0);
        }

        let changes: Vec<(String, Value)> = changes.into_iter().collect();
        let affected = self
            .mutate_keys(connection, &matched.keys, Some(changes.as_slice()))
            .await?;
        self.announce(connection, &matched.keys, MutationKind::Update)
            .await?;
        Ok(affected)
    }

    /// Destroy matching rows (a soft delete when the entity soft-deletes),
    /// cascading to `dependent: Destroy` associations in one transaction
    pub async fn destroy(self, connection: &Connection) -> ModelResult<u64> {
        self.remove(connection, Removal::Destroy).await
    }

    /// Hard delete matching rows even when the entity soft-deletes
    pub async fn really_destroy(self, connection: &Connection) -> ModelResult<u64> {
        self.remove(connection, Removal::ReallyDestroy).await
    }

    /// Restore soft deleted rows matching the query
    pub async fn undestroy(self, connection: &Connection) -> ModelResult<u64> {
        let entity = self.root_entity()?;
        if !entity.soft_deletes() {
            return Err(ModelError::Configuration(format!(
                "{} does not soft delete; nothing to undestroy",
                entity.name()
            )));
        }
        self.remove(connection, Removal::Undestroy).await
    }

    /// Run the removal and its cascades inside one transaction: the bound
    /// one when present, a fresh one otherwise
    async fn remove(self, connection: &Connection, removal: Removal) -> ModelResult<u64> {
        if self.context.transaction().is_some() || self.dependents()?.is_empty() {
            return self.remove_within(connection, removal).await;
        }

        let transaction = Transaction::begin(connection).await?;
        let scoped = self.with_transaction(transaction.handle());
        match scoped.remove_within(connection, removal).await {
            Ok(affected) => {
                transaction.commit().await?;
                Ok(affected)
            }
            Err(error) => {
                if let Err(rollback) = transaction.rollback().await {
                    warn!(error = %rollback, "rollback after failed destroy also failed");
                }
                Err(error)
            }
        }
    }

    fn remove_within<'a>(&'a self, connection: &'a Connection, removal: Removal) -> BoxFuture<'a, ModelResult<u64>> {
        Box::pin(async move {
            let entity = self.root_entity()?;
            let soft_column = self.registry.config().soft_delete_column.clone();

            let query = match removal {
                Removal::Undestroy => self
                    .clone()
                    .remove_default_scope(SOFT_DELETE_SCOPE)
                    .where_not_null(&soft_column),
                _ => self.clone(),
            };

            let dependents = self.dependents()?;
            let owner_keys: Vec<String> = dependents
                .iter()
                .map(|has| has.owner_key(&self.registry))
                .collect::<ModelResult<_>>()?;
            let matched = query.matching(connection, &owner_keys).await?;
            if matched.keys.is_empty() {
                return Ok(0);
            }

            // dependents first so their foreign keys never dangle
            for (has, owner_key) in dependents.iter().zip(&owner_keys) {
                if removal == Removal::Undestroy && !self.registry.entity(has.target()?)?.soft_deletes() {
                    continue;
                }
                let values = distinct_values(matched.rows.iter().map(|row| row.get(owner_key)));
                let cascaded = self.dependent_query(has, values)?;
                let count = cascaded.remove_within(connection, removal).await?;
                debug!(entity = %entity.name(), association = %has.name(), rows = count, "cascaded");
            }

            let soft = entity.soft_deletes() && removal == Removal::Destroy;
            let (changes, kind) = match removal {
                Removal::Destroy if soft => (
                    Some(vec![(soft_column, Value::from(Utc::now().to_rfc3339()))]),
                    MutationKind::SoftDestroy,
                ),
                Removal::Undestroy => (Some(vec![(soft_column, Value::Null)]), MutationKind::Undestroy),
                _ => (None, MutationKind::Destroy),
            };

            let affected = query
                .mutate_keys(connection, &matched.keys, changes.as_deref())
                .await?;
            query.announce(connection, &matched.keys, kind).await?;
            Ok(affected)
        })
    }

    /// `dependent: Destroy` associations of the root entity
    fn dependents(&self) -> ModelResult<Vec<&HasAssociation>> {
        let set = self.registry.relationships_of(&self.entity)?;
        Ok(set
            .has_one
            .into_iter()
            .chain(set.has_many)
            .filter(|has| has.dependent() == Some(Dependent::Destroy) && has.through_name().is_none())
            .collect())
    }

    /// Query over the dependent rows of the matched owners
    fn dependent_query(&self, has: &HasAssociation, owner_values: Vec<Value>) -> ModelResult<QueryBuilder> {
        let mut query = QueryBuilder::new(self.registry.clone(), has.target()?)
            .with_context(self.context.clone())
            .where_in(has.foreign_key(&self.registry)?, owner_values)
            .where_clause(has.conditions().clone())
            .where_not(has.negated_conditions().clone());
        query.bypass = has.scope_bypass().union(&self.association_bypass);
        query.association_bypass = self.association_bypass.clone();
        if let Some(type_column) = has.type_column() {
            let type_name = self.registry.polymorphic_type_name(&self.entity)?;
            query = query.where_eq(&type_column, type_name);
        }
        Ok(query)
    }

    /// Phase one: matching primary keys (deduplicated, in query order) plus
    /// the extra columns cascades need
    async fn matching(&self, connection: &Connection, extra: &[String]) -> ModelResult<Matched> {
        let key = self.root_entity()?.primary_key_column().to_string();
        let mut columns = vec![key.clone()];
        for column in extra {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }

        let statement = self.select_statement(&Projection::Columns(columns))?;
        let rows = connection
            .fetch_all(&statement, self.context.transaction())
            .await?;

        let mut seen = HashSet::new();
        let mut matched = Matched {
            keys: Vec::new(),
            rows: Vec::new(),
        };
        for row in rows {
            let value = row.get(&key).cloned().unwrap_or(Value::Null);
            if value.is_null() || !seen.insert(value.to_string()) {
                continue;
            }
            matched.keys.push(value);
            matched.rows.push(row);
        }
        Ok(matched)
    }

    /// Phase two: UPDATE (with `changes`) or DELETE by primary key, chunked
    async fn mutate_keys(
        &self,
        connection: &Connection,
        keys: &[Value],
        changes: Option<&[(String, Value)]>,
    ) -> ModelResult<u64> {
        let entity = self.root_entity()?;
        let batch = self.registry.config().max_batch_size.max(1);

        let mut affected = 0;
        for chunk in keys.chunks(batch) {
            let statement = mutation_statement(entity, chunk, changes);
            affected += connection
                .execute(&statement, self.context.transaction())
                .await?;
        }
        Ok(affected)
    }

    /// Report each mutated row to the hook runner
    async fn announce(&self, connection: &Connection, keys: &[Value], kind: MutationKind) -> ModelResult<()> {
        for key in keys {
            connection
                .hooks()
                .after_row_mutation(&self.entity, key, kind, self.context.transaction())
                .await?;
        }
        Ok(())
    }
}

fn mutation_statement(
    entity: &Entity,
    keys: &[Value],
    changes: Option<&[(String, Value)]>,
) -> CompiledStatement {
    let table = entity.table();
    let primary_key = entity.primary_key_column();
    let mut writer = SqlWriter::new();
    match changes {
        Some(changes) => {
            writer.push("UPDATE ").table(table, table).push(" SET ");
            for (index, (column, value)) in changes.iter().enumerate() {
                if index > 0 {
                    writer.push(", ");
                }
                writer.ident(column).push(" = ");
                // untyped NULL parameters would be inferred as text
                if value.is_null() {
                    writer.push("NULL");
                } else {
                    writer.typed_param(value.clone(), entity.column_type(column));
                }
            }
        }
        None => {
            writer.push("DELETE FROM ").table(table, table);
        }
    }
    writer.push(" WHERE ").ident(primary_key).push(" IN ").param_list(keys, entity.column_type(primary_key));
    writer.finish()
}

fn distinct_values<'a>(values: impl Iterator<Item = Option<&'a Value>>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .flatten()
        .filter(|value| !value.is_null() && seen.insert(value.to_string()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnType;
    use serde_json::json;

    #[test]
    fn test_mutation_statements() {
        let posts = Entity::new("Post", "posts")
            .column("id", ColumnType::BigInt)
            .column("title", ColumnType::Text);
        let keys = vec![json!(1), json!(2)];
        let delete = mutation_statement(&posts, &keys, None);
        assert_eq!(delete.sql, "DELETE FROM \"posts\" WHERE \"id\" IN ($1, $2)");

        let changes = vec![
            ("title".to_string(), json!("x")),
            ("deleted_at".to_string(), Value::Null),
        ];
        let update = mutation_statement(&posts, &keys, Some(&changes));
        assert_eq!(
            update.sql,
            "UPDATE \"posts\" SET \"title\" = $1, \"deleted_at\" = NULL WHERE \"id\" IN ($2, $3)"
        );
        assert_eq!(update.params, vec![json!("x"), json!(1), json!(2)]);
        assert_eq!(
            update.param_types,
            vec![Some(ColumnType::Text), Some(ColumnType::BigInt), Some(ColumnType::BigInt)]
        );
    }

    #[test]
    fn test_distinct_values_skips_nulls_and_duplicates() {
        let values = [json!(1), json!(1), Value::Null, json!(2)];
        assert_eq!(
            distinct_values(values.iter().map(Some)),
            vec![json!(1), json!(2)]
        );
    }
}
