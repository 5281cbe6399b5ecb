//! Core Collaborator Traits
//!
//! The association core never talks to a database directly. It compiles
//! statements and hands them to a [`StatementExecutor`], opens transactions
//! through a [`TransactionProvider`], and announces mutation points to a
//! [`LifecycleHooks`] runner. [`Connection`] bundles the three.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::OrmConfig;
use crate::error::ModelResult;
use crate::model::ColumnType;
use crate::transaction::TransactionHandle;

/// A row as returned by an executor, keyed by column name
pub type Row = serde_json::Map<String, Value>;

/// Parametrized statement with `$n` placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Declared type of the column each parameter is compared with or
    /// assigned to, when known
    pub param_types: Vec<Option<ColumnType>>,
}

impl CompiledStatement {
    /// Statement whose parameters carry no column type
    pub fn new(sql: String, params: Vec<Value>) -> Self {
        let param_types = vec![None; params.len()];
        Self {
            sql,
            params,
            param_types,
        }
    }

    pub fn with_param_types(mut self, param_types: Vec<Option<ColumnType>>) -> Self {
        self.param_types = param_types;
        self
    }

    /// Declared column type of the parameter at `index`
    pub fn param_type(&self, index: usize) -> Option<ColumnType> {
        self.param_types.get(index).copied().flatten()
    }
}

impl fmt::Display for CompiledStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Executes compiled statements, optionally inside a transaction
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute a query and return the result rows
    async fn fetch_all(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<Vec<Row>>;

    /// Execute a statement and return the affected row count
    async fn execute(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<u64>;
}

/// Opens and finishes transactions
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    async fn begin(&self) -> ModelResult<TransactionHandle>;

    async fn commit(&self, handle: &TransactionHandle) -> ModelResult<()>;

    async fn rollback(&self, handle: &TransactionHandle) -> ModelResult<()>;

    /// Release a transaction that will never be committed or rolled back
    /// explicitly. Called from `Drop`, so it cannot wait; the provider must
    /// still make sure the work is rolled back and its resources freed.
    fn abandon(&self, _handle: &TransactionHandle) {}
}

/// Kind of row mutation reported to the hook runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Update,
    Destroy,
    SoftDestroy,
    Undestroy,
}

/// Invocation points for an external lifecycle hook runner. The core only
/// guarantees when these are called; hook logic lives elsewhere.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Called before every statement is handed to the executor
    async fn before_statement(&self, _statement: &CompiledStatement) -> ModelResult<()> {
        Ok(())
    }

    /// Called once per matched row after a mutating statement succeeded
    async fn after_row_mutation(
        &self,
        _entity: &str,
        _primary_key: &Value,
        _kind: MutationKind,
        _transaction: Option<&TransactionHandle>,
    ) -> ModelResult<()> {
        Ok(())
    }

    /// Called after a transaction committed
    async fn after_commit(&self, _transaction: &TransactionHandle) -> ModelResult<()> {
        Ok(())
    }
}

/// Hook runner that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {}

/// Executor, transaction provider and hook runner used by terminal operations
#[derive(Clone)]
pub struct Connection {
    executor: Arc<dyn StatementExecutor>,
    transactions: Arc<dyn TransactionProvider>,
    hooks: Arc<dyn LifecycleHooks>,
    log_statements: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("log_statements", &self.log_statements)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        executor: Arc<dyn StatementExecutor>,
        transactions: Arc<dyn TransactionProvider>,
    ) -> Self {
        Self {
            executor,
            transactions,
            hooks: Arc::new(NoopHooks),
            log_statements: true,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Apply the connection-level settings of `config`
    pub fn configured(self, config: &OrmConfig) -> Self {
        self.with_statement_logging(config.log_statements)
    }

    pub fn transactions(&self) -> &Arc<dyn TransactionProvider> {
        &self.transactions
    }

    pub fn hooks(&self) -> &Arc<dyn LifecycleHooks> {
        &self.hooks
    }

    /// Run a query, annotating failures with the statement
    pub async fn fetch_all(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<Vec<Row>> {
        self.before(statement, transaction).await?;
        self.executor
            .fetch_all(statement, transaction)
            .await
            .map_err(|e| e.with_statement(&statement.sql, &statement.params))
    }

    /// Run a mutating statement, annotating failures with the statement
    pub async fn execute(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<u64> {
        self.before(statement, transaction).await?;
        self.executor
            .execute(statement, transaction)
            .await
            .map_err(|e| e.with_statement(&statement.sql, &statement.params))
    }

    async fn before(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<()> {
        if self.log_statements {
            debug!(
                sql = %statement.sql,
                params = statement.params.len(),
                transaction = ?transaction.map(|t| t.id()),
                "executing statement"
            );
        }
        self.hooks.before_statement(statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockExecutor;

    #[test]
    fn test_configured_connection_follows_logging_flag() {
        let config = OrmConfig {
            log_statements: false,
            ..OrmConfig::default()
        };
        let connection = MockExecutor::new().connection().configured(&config);
        assert!(!connection.log_statements);
        assert!(MockExecutor::new().connection().log_statements);
    }
}
