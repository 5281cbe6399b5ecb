//! Eager loader - hydrates a load plan onto already fetched records
//!
//! Loading runs level by level. At each level every requested association
//! costs one query per chunk of owner keys (one per candidate type for
//! polymorphic belongs-to), never one per owner. Through associations are
//! bridged hop by hop into hidden slots and flattened onto the owners.
//! Slots that are already loaded are left alone, so loading twice is a no-op.
//! A load either hydrates every level or leaves the caller's records as
//! they were.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, trace};

use super::batch_loader::{distinct_keys, key_string, BatchLoader};
use super::plan::{LoadNode, LoadPlan};
use crate::backends::Connection;
use crate::conditions::WhereClause;
use crate::error::{ModelError, ModelResult};
use crate::model::{AssociationSlot, Record, HIDDEN_SLOT_PREFIX};
use crate::query::ordering::{compare_values, sort_by_order};
use crate::query::{OrderBy, QueryBuilder, ScopeBypass};
use crate::relationships::{BelongsTo, HasAssociation, Hop, Registry, Relationship, RelationshipPath, SelfCondition};
use crate::transaction::QueryContext;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Filters applied to the query of one hop
#[derive(Debug, Default)]
struct HopFilter {
    clauses: Vec<WhereClause>,
    negated: Vec<WhereClause>,
    bypass: ScopeBypass,
    order: Vec<OrderBy>,
}

/// Hydrates associations through a connection, inside the caller's context
pub struct EagerLoader<'c> {
    registry: Arc<Registry>,
    connection: &'c Connection,
    context: QueryContext,
    association_bypass: ScopeBypass,
}

impl<'c> EagerLoader<'c> {
    pub fn new(registry: Arc<Registry>, connection: &'c Connection, context: QueryContext) -> Self {
        Self {
            registry,
            connection,
            context,
            association_bypass: ScopeBypass::None,
        }
    }

    /// Default scopes to skip on every loaded association
    pub fn with_association_bypass(mut self, bypass: ScopeBypass) -> Self {
        self.association_bypass = bypass;
        self
    }

    /// Hydrate `plan` onto `records`. Levels are loaded into a copy that
    /// replaces `records` only once every statement has succeeded.
    pub async fn load(&self, records: &mut [Record], plan: &LoadPlan) -> ModelResult<()> {
        if records.is_empty() || plan.is_empty() {
            return Ok(());
        }
        let mut scratch = records.to_vec();
        self.hydrate(&mut scratch, plan).await?;
        for (record, hydrated) in records.iter_mut().zip(scratch) {
            *record = hydrated;
        }
        Ok(())
    }

    /// Hydrate `plan` onto records nobody else can observe; on failure they
    /// are dropped along with the partial work
    pub async fn load_owned(&self, mut records: Vec<Record>, plan: &LoadPlan) -> ModelResult<Vec<Record>> {
        self.hydrate(&mut records, plan).await?;
        Ok(records)
    }

    async fn hydrate(&self, records: &mut [Record], plan: &LoadPlan) -> ModelResult<()> {
        let roots: Vec<&mut Record> = records.iter_mut().collect();
        self.load_level(roots, plan, 0).await
    }

    fn load_level<'r>(
        &'r self,
        mut roots: Vec<&'r mut Record>,
        plan: &'r LoadPlan,
        depth: usize,
    ) -> BoxFuture<'r, ModelResult<()>> {
        Box::pin(async move {
            if roots.is_empty() || plan.is_empty() {
                return Ok(());
            }
            debug!(depth, records = roots.len(), associations = plan.nodes().len(), "loading association level");

            for node in plan.nodes() {
                self.load_node(&mut roots, node).await?;
                if !node.children.is_empty() {
                    let next: Vec<&mut Record> = roots
                        .iter_mut()
                        .flat_map(|record| record.loaded_mut(&node.name))
                        .collect();
                    self.load_level(next, &node.children, depth + 1).await?;
                }
            }
            Ok(())
        })
    }

    /// Load one association onto every root declaring it
    async fn load_node(&self, roots: &mut [&mut Record], node: &LoadNode) -> ModelResult<()> {
        let mut declared = false;
        let mut groups: Vec<(Arc<Relationship>, HashSet<usize>)> = Vec::new();

        for (index, record) in roots.iter().enumerate() {
            let relationship = match self.registry.relationship(record.entity(), &node.name) {
                Ok(relationship) => relationship,
                Err(ModelError::UnknownAssociation { .. }) => continue,
                Err(error) => return Err(error),
            };
            declared = true;
            if record.is_loaded(&node.name) {
                continue;
            }
            match groups.iter_mut().find(|(r, _)| Arc::ptr_eq(r, relationship)) {
                Some((_, indices)) => {
                    indices.insert(index);
                }
                None => groups.push((relationship.clone(), HashSet::from([index]))),
            }
        }

        if !declared {
            return Err(ModelError::UnknownAssociation {
                entity: roots.first().map(|r| r.entity().to_string()).unwrap_or_default(),
                association: node.name.clone(),
            });
        }

        for (relationship, indices) in groups {
            let mut owners: Vec<&mut Record> = roots
                .iter_mut()
                .enumerate()
                .filter(|(index, _)| indices.contains(index))
                .map(|(_, record)| &mut **record)
                .collect();

            match relationship.as_ref() {
                Relationship::BelongsTo(belongs_to) => {
                    let filter = self.hop_filter(&relationship, &[], Some(&node.clause));
                    self.load_belongs_to(belongs_to, &mut owners, &node.name, &filter)
                        .await?;
                }
                _ => {
                    let path = self
                        .registry
                        .resolve_path(relationship.owner(), relationship.name())?;
                    self.load_path(&path, &relationship, &mut owners, node).await?;
                }
            }
        }
        Ok(())
    }

    /// Load a has association, bridging through chains when the path has
    /// more than one hop
    async fn load_path(
        &self,
        path: &RelationshipPath,
        relationship: &Arc<Relationship>,
        owners: &mut [&mut Record],
        node: &LoadNode,
    ) -> ModelResult<()> {
        let last = path.hops.len() - 1;
        let direct = path.hops.len() == 1;
        let slots: Vec<String> = (0..path.hops.len())
            .map(|index| {
                if direct {
                    node.name.clone()
                } else {
                    format!("{}{}.{}", HIDDEN_SLOT_PREFIX, node.name, index)
                }
            })
            .collect();

        {
            let mut level: Vec<&mut Record> = owners.iter_mut().map(|record| &mut **record).collect();
            for (index, hop) in path.hops.iter().enumerate() {
                if level.is_empty() {
                    break;
                }
                let clause = (index == last).then_some(&node.clause);
                let filter = self.hop_filter(&hop.relationship, &hop.terminating_relationships(), clause);
                self.load_hop(hop, &mut level, &slots[index], &filter).await?;

                let slot = &slots[index];
                level = level
                    .into_iter()
                    .flat_map(|record| record.loaded_mut(slot))
                    .collect();
            }
        }

        if direct {
            return Ok(());
        }

        let outer = relationship.as_has();
        for owner in owners.iter_mut() {
            if owner.is_loaded(&node.name) {
                continue;
            }
            let mut results = Vec::new();
            let mut chain: Vec<&Record> = vec![&**owner];
            collect_through(path, &slots, 0, &mut chain, &mut results);

            if let Some(outer) = outer {
                if outer.is_distinct() {
                    let mut seen = HashSet::new();
                    results.retain(|record| seen.insert((record.entity().to_string(), key_string(&record.primary_key()))));
                }
                sort_by_order(&mut results, outer.order(), |record, column| record.value(column));
            }

            let collection = outer.map(HasAssociation::is_collection).unwrap_or(true);
            let count = results.len();
            let slot = if collection {
                AssociationSlot::Many {
                    items: results,
                    sealed: true,
                }
            } else {
                AssociationSlot::One(results.into_iter().next().map(Box::new))
            };
            owner.install(&node.name, slot);
            trace!(association = %node.name, loaded = count, "hydrated through association");
        }
        Ok(())
    }

    async fn load_hop(
        &self,
        hop: &Hop,
        records: &mut [&mut Record],
        slot: &str,
        filter: &HopFilter,
    ) -> ModelResult<()> {
        match hop.relationship.as_ref() {
            Relationship::BelongsTo(belongs_to) => {
                self.load_belongs_to(belongs_to, records, slot, filter).await
            }
            Relationship::HasOne(has) | Relationship::HasMany(has) => {
                self.load_has(hop, has, records, slot, filter).await
            }
        }
    }

    /// Batched has-one/has-many: `target.fk IN (owner keys)`
    async fn load_has(
        &self,
        hop: &Hop,
        has: &HasAssociation,
        records: &mut [&mut Record],
        slot: &str,
        filter: &HopFilter,
    ) -> ModelResult<()> {
        let foreign_key = has.foreign_key(&self.registry)?;
        let owner_key = has.owner_key(&self.registry)?;

        let pending: Vec<usize> = (0..records.len())
            .filter(|&index| !records[index].is_loaded(slot))
            .collect();
        let keys = distinct_keys(
            pending
                .iter()
                .filter_map(|&index| records[index].get(&owner_key)),
        );

        let mut query = self.target_query(&hop.target, filter);
        if let Some(type_column) = has.type_column() {
            query = query.where_eq(&type_column, self.registry.polymorphic_type_name(&hop.owner)?);
        }
        let loaded = self.batch().load(&query, foreign_key, &keys).await?;

        let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
        for record in loaded {
            let key = key_string(&record.value(foreign_key));
            grouped.entry(key).or_default().push(record);
        }

        let mut hydrated = 0;
        for index in pending {
            let owner = &mut *records[index];
            let key = owner.get(&owner_key).map(key_string);
            let mut items: Vec<Record> = key
                .and_then(|key| grouped.get(&key))
                .map(|candidates| {
                    candidates
                        .iter()
                        .filter(|candidate| self_conditions_hold(has.self_conditions(), candidate, owner))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            if has.is_distinct() {
                let mut seen = HashSet::new();
                items.retain(|record| seen.insert(key_string(&record.primary_key())));
            }
            hydrated += items.len();

            let slot_value = if has.is_collection() {
                AssociationSlot::Many { items, sealed: true }
            } else {
                AssociationSlot::One(items.into_iter().next().map(Box::new))
            };
            owner.install(slot, slot_value);
        }
        trace!(association = %slot, owners = records.len(), loaded = hydrated, "hydrated has association");
        Ok(())
    }

    /// Batched belongs-to: `target.key IN (foreign keys)`, one query per
    /// candidate type when polymorphic
    async fn load_belongs_to(
        &self,
        belongs_to: &BelongsTo,
        records: &mut [&mut Record],
        slot: &str,
        filter: &HopFilter,
    ) -> ModelResult<()> {
        let foreign_key = belongs_to.foreign_key(&self.registry)?.to_string();
        let type_column = belongs_to.type_column();

        // candidate entity per owner; owners without one resolve to nothing
        let mut by_target: Vec<(String, Vec<usize>)> = Vec::new();
        let mut unresolved = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if record.is_loaded(slot) {
                continue;
            }
            if record.value(&foreign_key).is_null() {
                unresolved.push(index);
                continue;
            }
            let target = match &type_column {
                Some(column) => self.polymorphic_candidate(belongs_to, &record.value(column))?,
                None => belongs_to.targets().first().cloned(),
            };
            match target {
                Some(target) => match by_target.iter_mut().find(|(t, _)| *t == target) {
                    Some((_, indices)) => indices.push(index),
                    None => by_target.push((target, vec![index])),
                },
                None => unresolved.push(index),
            }
        }

        for index in unresolved {
            records[index].install(slot, AssociationSlot::One(None));
        }

        for (target, indices) in by_target {
            let target_key = belongs_to.target_key(&self.registry, &target)?;
            let keys = distinct_keys(indices.iter().filter_map(|&index| records[index].get(&foreign_key)));
            let query = self.target_query(&target, filter);
            let loaded = self.batch().load(&query, &target_key, &keys).await?;

            let by_key: HashMap<String, Record> = loaded
                .into_iter()
                .map(|record| (key_string(&record.value(&target_key)), record))
                .collect();

            let mut hydrated = 0;
            for index in &indices {
                let owner = &mut *records[*index];
                let found = by_key.get(&key_string(&owner.value(&foreign_key))).cloned();
                hydrated += usize::from(found.is_some());
                owner.install(slot, AssociationSlot::One(found.map(Box::new)));
            }
            trace!(association = %slot, target = %target, owners = indices.len(), loaded = hydrated, "hydrated belongs_to association");
        }
        Ok(())
    }

    /// Candidate entity whose polymorphic type value matches `type_value`
    fn polymorphic_candidate(
        &self,
        belongs_to: &BelongsTo,
        type_value: &serde_json::Value,
    ) -> ModelResult<Option<String>> {
        let Some(type_value) = type_value.as_str() else {
            return Ok(None);
        };
        for candidate in belongs_to.targets() {
            if self.registry.polymorphic_type_name(candidate)? == type_value {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }

    /// Conditions, bypass and order for a hop: its own relationship's, those
    /// of through relationships ending at it, and the call-site clause
    fn hop_filter(
        &self,
        relationship: &Relationship,
        terminating: &[&Relationship],
        call_site: Option<&WhereClause>,
    ) -> HopFilter {
        let mut filter = HopFilter {
            bypass: relationship.scope_bypass().union(&self.association_bypass),
            ..HopFilter::default()
        };
        for has in std::iter::once(relationship)
            .chain(terminating.iter().copied())
            .filter_map(Relationship::as_has)
        {
            filter.clauses.push(has.conditions().clone());
            filter.negated.push(has.negated_conditions().clone());
            filter.order.extend(has.order().iter().cloned());
        }
        for relationship in terminating {
            filter.bypass = filter.bypass.union(relationship.scope_bypass());
        }
        if let Some(clause) = call_site {
            filter.clauses.push(clause.clone());
        }
        filter
    }

    fn target_query(&self, target: &str, filter: &HopFilter) -> QueryBuilder {
        let mut query = QueryBuilder::new(self.registry.clone(), target).with_context(self.context.clone());
        query.bypass = filter.bypass.clone();
        query.association_bypass = self.association_bypass.clone();
        for clause in &filter.clauses {
            query = query.where_clause(clause.clone());
        }
        for clause in &filter.negated {
            query = query.where_not(clause.clone());
        }
        for order in &filter.order {
            query.order.push(order.clone());
        }
        query
    }

    fn batch(&self) -> BatchLoader<'_> {
        BatchLoader::new(self.connection, self.registry.config().max_batch_size)
    }
}

impl Hop {
    fn terminating_relationships(&self) -> Vec<&Relationship> {
        self.terminating.iter().map(|t| t.relationship.as_ref()).collect()
    }
}

/// Walk the hidden slots from `chain[0]`, collecting every record reached
/// at the last hop whose through self-conditions hold along its chain
fn collect_through<'a>(
    path: &RelationshipPath,
    slots: &[String],
    index: usize,
    chain: &mut Vec<&'a Record>,
    results: &mut Vec<Record>,
) {
    let current = chain[chain.len() - 1];
    for next in current.loaded(&slots[index]) {
        chain.push(next);
        let holds = path.hops[index].terminating.iter().all(|terminating| {
            terminating
                .relationship
                .as_has()
                .map(|has| self_conditions_hold(has.self_conditions(), next, chain[terminating.start]))
                .unwrap_or(true)
        });
        if holds {
            if index + 1 == path.hops.len() {
                results.push(next.clone());
            } else {
                collect_through(path, slots, index + 1, chain, results);
            }
        }
        chain.pop();
    }
}

fn self_conditions_hold(conditions: &[SelfCondition], target: &Record, owner: &Record) -> bool {
    conditions.iter().all(|condition| {
        let left = target.value(&condition.target_column);
        let right = owner.value(&condition.owner_column);
        let equal = !left.is_null() && !right.is_null() && compare_values(&left, &right).is_eq();
        equal != condition.negated
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(entity: &str, value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => Record::new(entity, "id", map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_self_conditions() {
        let owner = record("User", json!({"id": 1, "team_id": 7}));
        let same = record("User", json!({"id": 2, "team_id": 7}));
        let other = record("User", json!({"id": 3, "team_id": 8}));

        let equal = [SelfCondition {
            target_column: "team_id".to_string(),
            owner_column: "team_id".to_string(),
            negated: false,
        }];
        assert!(self_conditions_hold(&equal, &same, &owner));
        assert!(!self_conditions_hold(&equal, &other, &owner));

        let different = [SelfCondition {
            negated: true,
            ..equal[0].clone()
        }];
        assert!(self_conditions_hold(&different, &other, &owner));
        assert!(self_conditions_hold(&[], &other, &owner));
    }
}
