//! Query Builder - Core builder implementation
//!
//! A builder is a plain value: every chained call consumes it and returns
//! the next state, so concurrent branches cloned from a common prefix never
//! share mutable state.

use std::sync::Arc;

use super::ordering::OrderBy;
use super::scopes::ScopeBypass;
use super::types::{JoinNode, WhereEntry};
use crate::conditions::WhereClause;
use crate::error::ModelResult;
use crate::loading::LoadPlan;
use crate::relationships::Registry;
use crate::transaction::{Passthrough, QueryContext, TransactionHandle};

/// Query builder for one entity
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub(crate) registry: Arc<Registry>,
    pub(crate) entity: String,
    pub(crate) joins: Vec<JoinNode>,
    pub(crate) wheres: Vec<WhereEntry>,
    pub(crate) order: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) distinct: bool,
    pub(crate) bypass: ScopeBypass,
    pub(crate) association_bypass: ScopeBypass,
    pub(crate) context: QueryContext,
    pub(crate) load_plan: LoadPlan,
}

impl QueryBuilder {
    /// Create a new query builder for `entity`
    pub fn new(registry: Arc<Registry>, entity: &str) -> Self {
        Self {
            registry,
            entity: entity.to_string(),
            joins: Vec::new(),
            wheres: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            bypass: ScopeBypass::None,
            association_bypass: ScopeBypass::None,
            context: QueryContext::new(),
            load_plan: LoadPlan::new(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    /// Replace the transaction and passthrough context
    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// Run every statement of this chain, including loader and cascade
    /// statements, inside `transaction`
    pub fn with_transaction(mut self, transaction: &TransactionHandle) -> Self {
        self.context.transaction = Some(transaction.clone());
        self
    }

    /// Supply values for passthrough conditions; later values win
    pub fn passthrough(mut self, passthrough: &Passthrough) -> Self {
        self.context.passthrough.merge(passthrough);
        self
    }

    /// Add SELECT DISTINCT
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Hydrate `path` (dot separated relationship names) onto the results
    pub fn preload(mut self, path: &str) -> Self {
        self.load_plan.add(path, WhereClause::new());
        self
    }

    /// Hydrate `path` with extra conditions on its last relationship
    pub fn preload_where(mut self, path: &str, clause: WhereClause) -> Self {
        self.load_plan.add(path, clause);
        self
    }

    pub fn load_plan(&self) -> &LoadPlan {
        &self.load_plan
    }

    /// Fail early when the entity is not registered
    pub(crate) fn root_entity(&self) -> ModelResult<&crate::model::Entity> {
        self.registry.entity(&self.entity)
    }
}
