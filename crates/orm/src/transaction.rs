//! Transaction and Scope Context
//!
//! A [`QueryContext`] threads one transaction handle and the caller's
//! passthrough values through a builder chain and every nested query it
//! issues (through-chain joins, loader sub-queries, cascades). Binding is
//! always explicit; nothing is read from ambient state.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backends::Connection;
use crate::error::{ModelError, ModelResult};

/// Opaque handle to a transaction opened by a [`crate::backends::TransactionProvider`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    id: Uuid,
}

impl TransactionHandle {
    /// Mint a fresh handle; providers call this from `begin`
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for TransactionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-supplied values substituted into association conditions at query time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Passthrough {
    values: HashMap<String, Value>,
}

impl Passthrough {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Later values win
    pub fn merge(&mut self, other: &Passthrough) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Transaction handle and passthrough bag carried by a builder chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    pub transaction: Option<TransactionHandle>,
    pub passthrough: Passthrough,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction(mut self, transaction: &TransactionHandle) -> Self {
        self.transaction = Some(transaction.clone());
        self
    }

    pub fn with_passthrough(mut self, passthrough: &Passthrough) -> Self {
        self.passthrough.merge(passthrough);
        self
    }

    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.transaction.as_ref()
    }
}

/// Transaction guard with explicit commit/rollback
pub struct Transaction {
    handle: TransactionHandle,
    connection: Connection,
    finished: bool,
}

impl Transaction {
    /// Begin a transaction through the connection's transaction provider
    pub async fn begin(connection: &Connection) -> ModelResult<Transaction> {
        let handle = connection
            .transactions()
            .begin()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        debug!(transaction = %handle.id(), "transaction started");

        Ok(Transaction {
            handle,
            connection: connection.clone(),
            finished: false,
        })
    }

    pub fn handle(&self) -> &TransactionHandle {
        &self.handle
    }

    /// Context bound to this transaction
    pub fn context(&self) -> QueryContext {
        QueryContext::new().with_transaction(&self.handle)
    }

    /// Commit and fire the after-commit hook
    pub async fn commit(mut self) -> ModelResult<()> {
        self.finished = true;
        self.connection
            .transactions()
            .commit(&self.handle)
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to commit transaction: {}", e)))?;
        debug!(transaction = %self.handle.id(), "transaction committed");
        self.connection.hooks().after_commit(&self.handle).await
    }

    pub async fn rollback(mut self) -> ModelResult<()> {
        self.finished = true;
        self.connection
            .transactions()
            .rollback(&self.handle)
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to rollback transaction: {}", e)))?;
        debug!(transaction = %self.handle.id(), "transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                transaction = %self.handle.id(),
                "Transaction dropped without explicit commit or rollback, abandoning it"
            );
            self.connection.transactions().abandon(&self.handle);
        }
    }
}
