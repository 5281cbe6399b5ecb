//! Batch loading - one `IN (...)` query per chunk of keys

use std::collections::HashSet;

use serde_json::Value;

use crate::backends::Connection;
use crate::error::ModelResult;
use crate::model::Record;
use crate::query::QueryBuilder;

/// Comparable form of a key value; strings compare by content so a UUID
/// read as text matches the same UUID anywhere else
pub(crate) fn key_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Distinct non-null values, in first-seen order
pub(crate) fn distinct_keys<'a, I>(values: I) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| !value.is_null() && seen.insert(key_string(value)))
        .cloned()
        .collect()
}

/// Runs a target query restricted to a set of keys, chunked by batch size
pub(crate) struct BatchLoader<'c> {
    connection: &'c Connection,
    batch_size: usize,
}

impl<'c> BatchLoader<'c> {
    pub(crate) fn new(connection: &'c Connection, batch_size: usize) -> Self {
        Self {
            connection,
            batch_size: batch_size.max(1),
        }
    }

    /// Records of `query` whose `column` is one of `keys`. No statement is
    /// issued for an empty key set.
    pub(crate) async fn load(&self, query: &QueryBuilder, column: &str, keys: &[Value]) -> ModelResult<Vec<Record>> {
        let mut records = Vec::new();
        for chunk in keys.chunks(self.batch_size) {
            let statement = query.clone().where_in(column, chunk.to_vec()).to_statement()?;
            let rows = self
                .connection
                .fetch_all(&statement, query.context().transaction())
                .await?;
            for row in rows {
                records.push(query.registry().instantiate(query.entity(), row)?);
            }
        }
        Ok(records)
    }
}
