//! Query Builder execution - read terminals
//!
//! Every terminal compiles one statement, hands it to the connection's
//! executor under the builder's transaction, and materializes the rows.
//! `all` and the terminals built on it then run the load plan.

use serde_json::Value;
use tracing::debug;

use super::builder::QueryBuilder;
use super::ordering::OrderBy;
use super::types::{Aggregate, Projection};
use crate::backends::{Connection, Row};
use crate::conditions::{ColumnRef, WhereClause};
use crate::error::{ModelError, ModelResult};
use crate::loading::EagerLoader;
use crate::model::{Model, Record};

impl QueryBuilder {
    /// Execute the query and return records, hydrating the load plan
    pub async fn all(self, connection: &Connection) -> ModelResult<Vec<Record>> {
        let statement = self.to_statement()?;
        let rows = connection
            .fetch_all(&statement, self.context.transaction())
            .await?;

        let records = rows
            .into_iter()
            .map(|row| self.registry.instantiate(&self.entity, row))
            .collect::<ModelResult<Vec<_>>>()?;
        debug!(entity = %self.entity, rows = records.len(), "query returned");

        if self.load_plan.is_empty() {
            return Ok(records);
        }
        EagerLoader::new(self.registry.clone(), connection, self.context.clone())
            .with_association_bypass(self.association_bypass.clone())
            .load_owned(records, &self.load_plan)
            .await
    }

    /// First record by the query's order, or by primary key when unordered
    pub async fn first(self, connection: &Connection) -> ModelResult<Option<Record>> {
        let query = if self.order.is_empty() {
            let key = self.root_entity()?.primary_key_column().to_string();
            self.order_by(&key)
        } else {
            self
        };
        Ok(query.limit(1).all(connection).await?.into_iter().next())
    }

    /// Last record: the query's order reversed, or highest primary key
    pub async fn last(mut self, connection: &Connection) -> ModelResult<Option<Record>> {
        if self.order.is_empty() {
            let key = self.root_entity()?.primary_key_column().to_string();
            self.order.push(OrderBy::desc(&key));
        } else {
            self.order = self.order.iter().map(OrderBy::reversed).collect();
        }
        Ok(self.limit(1).all(connection).await?.into_iter().next())
    }

    /// Record with the given primary key
    pub async fn find<V: Into<Value>>(self, connection: &Connection, key: V) -> ModelResult<Option<Record>> {
        let column = self.root_entity()?.primary_key_column().to_string();
        self.where_eq(&column, key.into()).first(connection).await
    }

    /// First record matching `clause`
    pub async fn find_by(self, connection: &Connection, clause: WhereClause) -> ModelResult<Option<Record>> {
        self.where_clause(clause).first(connection).await
    }

    /// Number of matching rows
    pub async fn count(self, connection: &Connection) -> ModelResult<u64> {
        let value = self.aggregate(connection, Aggregate::Count, None).await?;
        value.as_u64().ok_or_else(|| {
            ModelError::Serialization(format!("COUNT returned a non-integer value: {}", value))
        })
    }

    pub async fn max(self, connection: &Connection, column: &str) -> ModelResult<Value> {
        self.aggregate(connection, Aggregate::Max, Some(column)).await
    }

    pub async fn min(self, connection: &Connection, column: &str) -> ModelResult<Value> {
        self.aggregate(connection, Aggregate::Min, Some(column)).await
    }

    /// SUM of a column; `null` when nothing matched
    pub async fn sum(self, connection: &Connection, column: &str) -> ModelResult<Value> {
        self.aggregate(connection, Aggregate::Sum, Some(column)).await
    }

    async fn aggregate(
        self,
        connection: &Connection,
        aggregate: Aggregate,
        column: Option<&str>,
    ) -> ModelResult<Value> {
        let projection = Projection::Aggregate(aggregate, column.map(str::to_string));
        let statement = self.select_statement(&projection)?;
        let rows = connection
            .fetch_all(&statement, self.context.transaction())
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("aggregate"))
            .unwrap_or(Value::Null))
    }

    /// Values of one column, in query order
    pub async fn pluck(self, connection: &Connection, column: &str) -> ModelResult<Vec<Value>> {
        let statement = self.select_statement(&Projection::Columns(vec![column.to_string()]))?;
        let rows = connection
            .fetch_all(&statement, self.context.transaction())
            .await?;
        let name = ColumnRef::parse(column).name;
        Ok(rows
            .into_iter()
            .map(|mut row: Row| row.remove(&name).unwrap_or(Value::Null))
            .collect())
    }

    /// Whether any row matches
    pub async fn exists(self, connection: &Connection) -> ModelResult<bool> {
        let statement = self.select_statement(&Projection::Exists)?;
        let rows = connection
            .fetch_all(&statement, self.context.transaction())
            .await?;
        Ok(!rows.is_empty())
    }

    /// [`QueryBuilder::all`] decoded into `M`
    pub async fn all_as<M: Model>(self, connection: &Connection) -> ModelResult<Vec<M>> {
        self.all(connection)
            .await?
            .iter()
            .map(M::from_record)
            .collect()
    }

    /// [`QueryBuilder::first`] decoded into `M`
    pub async fn first_as<M: Model>(self, connection: &Connection) -> ModelResult<Option<M>> {
        self.first(connection)
            .await?
            .as_ref()
            .map(M::from_record)
            .transpose()
    }
}
