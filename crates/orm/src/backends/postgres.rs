//! PostgreSQL Backend Implementation
//!
//! Statement executor and transaction provider backed by a sqlx `PgPool`.
//! Open transactions are kept by handle id so that any number of
//! independently transacted call chains can share one executor.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Pool, Postgres, Row as SqlxRow, TypeInfo};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::core::*;
use crate::error::{ModelError, ModelResult};
use crate::model::ColumnType;
use crate::transaction::TransactionHandle;

type PgTransaction = sqlx::Transaction<'static, Postgres>;

/// sqlx-backed [`StatementExecutor`] and [`TransactionProvider`]
#[derive(Clone)]
pub struct PostgresExecutor {
    pool: Pool<Postgres>,
    transactions: Arc<DashMap<Uuid, Arc<Mutex<PgTransaction>>>>,
}

impl PostgresExecutor {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            transactions: Arc::new(DashMap::new()),
        }
    }

    /// Connect a pool with default options
    pub async fn connect(database_url: &str, max_connections: u32) -> ModelResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| ModelError::Database(format!("Failed to create PostgreSQL pool: {}", e)))?;
        Ok(Self::new(pool))
    }

    /// A [`Connection`] using this executor for both statements and transactions
    pub fn into_connection(self) -> Connection {
        let shared = Arc::new(self);
        Connection::new(shared.clone(), shared)
    }

    fn open_transaction(&self, handle: &TransactionHandle) -> ModelResult<Arc<Mutex<PgTransaction>>> {
        self.transactions
            .get(&handle.id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ModelError::Transaction(format!("Transaction {} is not open", handle.id()))
            })
    }

    fn take_transaction(&self, handle: &TransactionHandle) -> ModelResult<PgTransaction> {
        let (_, shared) = self.transactions.remove(&handle.id()).ok_or_else(|| {
            ModelError::Transaction(format!("Transaction {} is not open", handle.id()))
        })?;
        Arc::try_unwrap(shared)
            .map(Mutex::into_inner)
            .map_err(|_| {
                ModelError::Transaction(format!(
                    "Transaction {} still has statements in flight",
                    handle.id()
                ))
            })
    }
}

#[async_trait]
impl StatementExecutor for PostgresExecutor {
    async fn fetch_all(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<Vec<Row>> {
        let query = bind_params(sqlx::query(&statement.sql), statement)?;

        let rows = match transaction {
            Some(handle) => {
                let shared = self.open_transaction(handle)?;
                let mut tx = shared.lock().await;
                query.fetch_all(&mut **tx).await?
            }
            None => query.fetch_all(&self.pool).await?,
        };

        rows.iter().map(row_to_json).collect()
    }

    async fn execute(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<u64> {
        let query = bind_params(sqlx::query(&statement.sql), statement)?;

        let result = match transaction {
            Some(handle) => {
                let shared = self.open_transaction(handle)?;
                let mut tx = shared.lock().await;
                query.execute(&mut **tx).await?
            }
            None => query.execute(&self.pool).await?,
        };

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TransactionProvider for PostgresExecutor {
    async fn begin(&self) -> ModelResult<TransactionHandle> {
        let tx = self.pool.begin().await?;
        let handle = TransactionHandle::new();
        self.transactions
            .insert(handle.id(), Arc::new(Mutex::new(tx)));
        Ok(handle)
    }

    async fn commit(&self, handle: &TransactionHandle) -> ModelResult<()> {
        let tx = self.take_transaction(handle)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, handle: &TransactionHandle) -> ModelResult<()> {
        let tx = self.take_transaction(handle)?;
        tx.rollback().await?;
        Ok(())
    }

    /// Dropping the sqlx transaction queues its rollback and hands the
    /// connection back to the pool once no statement holds it
    fn abandon(&self, handle: &TransactionHandle) {
        if self.transactions.remove(&handle.id()).is_some() {
            warn!(transaction = %handle.id(), "abandoned transaction rolled back");
        }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    statement: &CompiledStatement,
) -> ModelResult<Query<'q, Postgres, PgArguments>> {
    for (index, value) in statement.params.iter().enumerate() {
        query = match PgParam::new(value, statement.param_type(index))? {
            PgParam::Null => query.bind(Option::<String>::None),
            PgParam::Bool(b) => query.bind(b),
            PgParam::Int(i) => query.bind(i),
            PgParam::Float(f) => query.bind(f),
            PgParam::Decimal(d) => query.bind(d),
            PgParam::Text(text) => query.bind(text),
            PgParam::Uuid(uuid) => query.bind(uuid),
            PgParam::TimestampTz(timestamp) => query.bind(timestamp),
            PgParam::Timestamp(timestamp) => query.bind(timestamp),
            PgParam::Date(date) => query.bind(date),
            PgParam::Json(json) => query.bind(sqlx::types::Json(json)),
        };
    }
    Ok(query)
}

/// A JSON parameter converted to the PostgreSQL type it is bound as
#[derive(Debug, Clone, PartialEq)]
enum PgParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Uuid(Uuid),
    TimestampTz(DateTime<Utc>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Json(Value),
}

impl PgParam {
    /// Strings are only bound as uuid, timestamp, date or numeric when the
    /// column they meet is declared with that type; otherwise they stay text.
    fn new(value: &Value, column_type: Option<ColumnType>) -> ModelResult<Self> {
        let invalid = |expected: &str| {
            ModelError::Serialization(format!("Cannot bind {} as {}", value, expected))
        };

        Ok(match (value, column_type) {
            (Value::Null, _) => PgParam::Null,
            (Value::Bool(b), _) => PgParam::Bool(*b),
            (Value::Number(n), Some(ColumnType::Numeric)) => {
                PgParam::Decimal(parse_decimal(&n.to_string()).ok_or_else(|| invalid("numeric"))?)
            }
            (Value::Number(n), Some(ColumnType::Float)) => {
                PgParam::Float(n.as_f64().ok_or_else(|| invalid("float"))?)
            }
            (Value::Number(n), _) => match n.as_i64() {
                Some(i) => PgParam::Int(i),
                None => PgParam::Float(n.as_f64().ok_or_else(|| invalid("float"))?),
            },
            (Value::String(s), Some(ColumnType::Uuid)) => {
                PgParam::Uuid(Uuid::parse_str(s).map_err(|_| invalid("uuid"))?)
            }
            (Value::String(s), Some(ColumnType::Timestamp)) => {
                match DateTime::parse_from_rfc3339(s) {
                    Ok(timestamp) => PgParam::TimestampTz(timestamp.with_timezone(&Utc)),
                    Err(_) => PgParam::Timestamp(
                        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                            .map_err(|_| invalid("timestamp"))?,
                    ),
                }
            }
            (Value::String(s), Some(ColumnType::Date)) => {
                PgParam::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid("date"))?)
            }
            (Value::String(s), Some(ColumnType::Numeric)) => {
                PgParam::Decimal(parse_decimal(s).ok_or_else(|| invalid("numeric"))?)
            }
            (Value::String(s), _) => PgParam::Text(s.clone()),
            (other, _) => PgParam::Json(other.clone()),
        })
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Convert a PostgreSQL row to a JSON row keyed by column name
fn row_to_json(row: &PgRow) -> ModelResult<Row> {
    let mut map = Row::new();

    for (index, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let value = match type_name {
            "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::from),
            "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
            "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
            "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
            "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|f| Value::from(f as f64)),
            "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
            // decimal text keeps every digit
            "NUMERIC" => row
                .try_get::<Option<Decimal>, _>(index)?
                .map(|d| Value::from(d.to_string())),
            "UUID" => row
                .try_get::<Option<Uuid>, _>(index)?
                .map(|u| Value::from(u.to_string())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(|t| Value::from(t.to_rfc3339())),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|t| Value::from(t.to_string())),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(index)?
                .map(|d| Value::from(d.to_string())),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
            _ => row
                .try_get::<Option<String>, _>(index)
                .map_err(|e| {
                    ModelError::Serialization(format!(
                        "Cannot decode column '{}' of type {}: {}",
                        column.name(),
                        type_name,
                        e
                    ))
                })?
                .map(Value::from),
        };
        map.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }

    Ok(map)
}
