//! Testing utilities
//!
//! [`MockExecutor`] answers compiled statements from scripted responses and
//! records everything it was asked to run, so query composition and
//! hydration can be asserted without a live database.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::backends::{
    CompiledStatement, Connection, LifecycleHooks, MutationKind, Row, StatementExecutor,
    TransactionProvider,
};
use crate::error::{ModelError, ModelResult};
use crate::transaction::TransactionHandle;

#[derive(Debug, Clone)]
enum MockResponse {
    Rows(Vec<Row>),
    Affected(u64),
    Error(String),
}

#[derive(Debug, Clone)]
struct Rule {
    fragment: String,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MockState {
    queue: VecDeque<MockResponse>,
    rules: Vec<Rule>,
    statements: Vec<(CompiledStatement, Option<TransactionHandle>)>,
    begun: Vec<TransactionHandle>,
    committed: Vec<TransactionHandle>,
    rolled_back: Vec<TransactionHandle>,
    abandoned: Vec<TransactionHandle>,
}

/// Scripted in-memory statement executor and transaction provider
///
/// Responses are consumed first-in first-out; a query only consumes queued
/// rows and a mutating statement only a queued count. Queries with no
/// scripted response fall back to the first rule whose fragment occurs in
/// the SQL, and then to an empty result.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Connection`] backed by this executor
    pub fn connection(&self) -> Connection {
        let shared = Arc::new(self.clone());
        Connection::new(shared.clone(), shared)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the state from the others
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue the rows returned by the next query. Non-object values are skipped.
    pub fn push_rows(&self, rows: Vec<Value>) -> &Self {
        let rows = rows.into_iter().filter_map(into_row).collect();
        self.state().queue.push_back(MockResponse::Rows(rows));
        self
    }

    /// Queue the affected row count returned by the next mutating statement
    pub fn push_affected(&self, count: u64) -> &Self {
        self.state().queue.push_back(MockResponse::Affected(count));
        self
    }

    /// Queue a driver failure for the next statement
    pub fn push_error(&self, cause: &str) -> &Self {
        self.state()
            .queue
            .push_back(MockResponse::Error(cause.to_string()));
        self
    }

    /// Answer every unscripted query whose SQL contains `fragment`
    pub fn when(&self, fragment: &str, rows: Vec<Value>) -> &Self {
        self.state().rules.push(Rule {
            fragment: fragment.to_string(),
            rows: rows.into_iter().filter_map(into_row).collect(),
        });
        self
    }

    /// Every statement executed so far, in order
    pub fn statements(&self) -> Vec<CompiledStatement> {
        self.state()
            .statements
            .iter()
            .map(|(statement, _)| statement.clone())
            .collect()
    }

    /// SQL of every statement executed so far
    pub fn sql(&self) -> Vec<String> {
        self.state()
            .statements
            .iter()
            .map(|(statement, _)| statement.sql.clone())
            .collect()
    }

    /// Transaction each statement ran in
    pub fn transactions_used(&self) -> Vec<Option<TransactionHandle>> {
        self.state()
            .statements
            .iter()
            .map(|(_, transaction)| transaction.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state().statements.len()
    }

    pub fn began(&self) -> Vec<TransactionHandle> {
        self.state().begun.clone()
    }

    pub fn committed(&self) -> Vec<TransactionHandle> {
        self.state().committed.clone()
    }

    pub fn rolled_back(&self) -> Vec<TransactionHandle> {
        self.state().rolled_back.clone()
    }

    /// Transactions dropped without commit or rollback
    pub fn abandoned(&self) -> Vec<TransactionHandle> {
        self.state().abandoned.clone()
    }

    /// Forget recorded statements, keeping scripted responses
    pub fn clear_statements(&self) {
        self.state().statements.clear();
    }

    /// Record the statement and take the next scripted response if it fits:
    /// rows for queries, counts for mutating statements, errors for both
    fn record(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
        query: bool,
    ) -> Option<MockResponse> {
        let mut state = self.state();
        state
            .statements
            .push((statement.clone(), transaction.cloned()));
        let fits = match state.queue.front() {
            Some(MockResponse::Rows(_)) => query,
            Some(MockResponse::Affected(_)) => !query,
            Some(MockResponse::Error(_)) => true,
            None => false,
        };
        if fits {
            state.queue.pop_front()
        } else {
            None
        }
    }

    fn rule_rows(&self, sql: &str) -> Vec<Row> {
        self.state()
            .rules
            .iter()
            .find(|rule| sql.contains(&rule.fragment))
            .map(|rule| rule.rows.clone())
            .unwrap_or_default()
    }
}

fn into_row(value: Value) -> Option<Row> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[async_trait]
impl StatementExecutor for MockExecutor {
    async fn fetch_all(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<Vec<Row>> {
        match self.record(statement, transaction, true) {
            Some(MockResponse::Rows(rows)) => Ok(rows),
            Some(MockResponse::Error(cause)) => Err(ModelError::Database(cause)),
            Some(MockResponse::Affected(_)) | None => Ok(self.rule_rows(&statement.sql)),
        }
    }

    async fn execute(
        &self,
        statement: &CompiledStatement,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<u64> {
        match self.record(statement, transaction, false) {
            Some(MockResponse::Affected(count)) => Ok(count),
            Some(MockResponse::Rows(rows)) => Ok(rows.len() as u64),
            Some(MockResponse::Error(cause)) => Err(ModelError::Database(cause)),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl TransactionProvider for MockExecutor {
    async fn begin(&self) -> ModelResult<TransactionHandle> {
        let handle = TransactionHandle::new();
        self.state().begun.push(handle.clone());
        Ok(handle)
    }

    async fn commit(&self, handle: &TransactionHandle) -> ModelResult<()> {
        self.state().committed.push(handle.clone());
        Ok(())
    }

    async fn rollback(&self, handle: &TransactionHandle) -> ModelResult<()> {
        self.state().rolled_back.push(handle.clone());
        Ok(())
    }

    fn abandon(&self, handle: &TransactionHandle) {
        self.state().abandoned.push(handle.clone());
    }
}

/// A mutation reported to [`RecordingHooks`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMutation {
    pub entity: String,
    pub primary_key: Value,
    pub kind: MutationKind,
    pub transaction: Option<TransactionHandle>,
}

/// Hook runner that records every invocation
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    statements: Arc<Mutex<Vec<String>>>,
    mutations: Arc<Mutex<Vec<RecordedMutation>>>,
    commits: Arc<Mutex<Vec<TransactionHandle>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    pub fn mutations(&self) -> Vec<RecordedMutation> {
        lock(&self.mutations).clone()
    }

    pub fn commits(&self) -> Vec<TransactionHandle> {
        lock(&self.commits).clone()
    }
}

#[async_trait]
impl LifecycleHooks for RecordingHooks {
    async fn before_statement(&self, statement: &CompiledStatement) -> ModelResult<()> {
        lock(&self.statements).push(statement.sql.clone());
        Ok(())
    }

    async fn after_row_mutation(
        &self,
        entity: &str,
        primary_key: &Value,
        kind: MutationKind,
        transaction: Option<&TransactionHandle>,
    ) -> ModelResult<()> {
        lock(&self.mutations).push(RecordedMutation {
            entity: entity.to_string(),
            primary_key: primary_key.clone(),
            kind,
            transaction: transaction.cloned(),
        });
        Ok(())
    }

    async fn after_commit(&self, transaction: &TransactionHandle) -> ModelResult<()> {
        lock(&self.commits).push(transaction.clone());
        Ok(())
    }
}
