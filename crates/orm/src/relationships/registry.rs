//! Relationship Registry - immutable per-process record of entities and their relationships
//!
//! Built once through [`RegistryBuilder`] during startup and shared as an
//! `Arc<Registry>` by the query composer and the loader. Through chains are
//! resolved on first use and memoized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::metadata::{BelongsTo, HasAssociation, Relationship};
use crate::backends::Row;
use crate::conditions::{WhereClause, WhereValue};
use crate::config::OrmConfig;
use crate::error::{ModelError, ModelResult};
use crate::model::{ColumnType, DefaultScope, Entity, Record, SOFT_DELETE_SCOPE, STI_SCOPE};
use crate::query::QueryBuilder;

/// Column and key metadata consulted while routing where clauses
pub trait SchemaMetadata: Send + Sync {
    fn columns_of(&self, entity: &str) -> ModelResult<Vec<String>>;

    fn primary_key_of(&self, entity: &str) -> ModelResult<String>;
}

/// Relationships of one entity grouped by kind, in declaration order
#[derive(Debug, Default)]
pub struct RelationshipSet<'a> {
    pub belongs_to: Vec<&'a BelongsTo>,
    pub has_one: Vec<&'a HasAssociation>,
    pub has_many: Vec<&'a HasAssociation>,
}

impl RelationshipSet<'_> {
    pub fn len(&self) -> usize {
        self.belongs_to.len() + self.has_one.len() + self.has_many.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One direct edge of a resolved relationship path
#[derive(Debug, Clone)]
pub struct Hop {
    /// Entity the edge is followed from
    pub owner: String,
    pub relationship: Arc<Relationship>,
    /// Entity the edge arrives at
    pub target: String,
    /// Through relationships whose chain ends at this edge; their
    /// conditions, ordering and distinctness apply here
    pub terminating: Vec<Terminating>,
}

/// A through relationship ending at a hop
#[derive(Debug, Clone)]
pub struct Terminating {
    pub relationship: Arc<Relationship>,
    /// Index of the hop the relationship starts from; its owner is the
    /// entity that hop is followed from
    pub start: usize,
}

impl Hop {
    pub fn name(&self) -> &str {
        self.relationship.name()
    }
}

/// A relationship flattened to its chain of direct edges
#[derive(Debug, Clone)]
pub struct RelationshipPath {
    pub hops: Vec<Hop>,
}

impl RelationshipPath {
    pub fn target(&self) -> &str {
        self.terminal().target.as_str()
    }

    pub fn terminal(&self) -> &Hop {
        // resolution never yields an empty path
        &self.hops[self.hops.len() - 1]
    }

    pub fn is_direct(&self) -> bool {
        self.hops.len() == 1 && self.hops[0].terminating.is_empty()
    }
}

/// Collects entity and relationship declarations
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    config: OrmConfig,
    entities: Vec<Entity>,
    relationships: Vec<(String, String, Relationship)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Declare relationship `name` on `owner`; declarations keep their order
    pub fn register_relationship<R: Into<Relationship>>(
        mut self,
        owner: &str,
        name: &str,
        relationship: R,
    ) -> Self {
        let mut relationship = relationship.into();
        relationship.bind(owner, name);
        self.relationships
            .push((owner.to_string(), name.to_string(), relationship));
        self
    }

    /// Validate declarations, resolve single-table inheritance and freeze
    pub fn build(self) -> ModelResult<Arc<Registry>> {
        self.config.validate()?;

        let mut raw: HashMap<String, Entity> = HashMap::new();
        let mut order = Vec::with_capacity(self.entities.len());
        for entity in self.entities {
            if raw.contains_key(&entity.name) {
                return Err(ModelError::Configuration(format!(
                    "Entity '{}' is registered twice",
                    entity.name
                )));
            }
            order.push(entity.name.clone());
            raw.insert(entity.name.clone(), entity);
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for name in &order {
            if let Some(parent) = raw[name].sti_parent.clone() {
                if !raw.contains_key(&parent) {
                    return Err(ModelError::UnknownEntity(parent));
                }
                children.entry(parent).or_default().push(name.clone());
            }
        }

        let mut entities = HashMap::new();
        for name in &order {
            resolve_entity(name, &raw, &children, &self.config, &mut entities, &mut Vec::new())?;
        }

        let mut relationships: HashMap<String, Vec<Arc<Relationship>>> = HashMap::new();
        for (owner, name, relationship) in self.relationships {
            if !entities.contains_key(&owner) {
                return Err(ModelError::UnknownEntity(owner));
            }
            let declared = relationships.entry(owner.clone()).or_default();
            if declared.iter().any(|r| r.name() == name) {
                return Err(ModelError::Configuration(format!(
                    "Relationship '{}' is declared twice on {}",
                    name, owner
                )));
            }
            declared.push(Arc::new(relationship));
        }

        debug!(
            entities = entities.len(),
            relationships = relationships.values().map(Vec::len).sum::<usize>(),
            "relationship registry built"
        );

        Ok(Arc::new(Registry {
            config: self.config,
            order,
            entities,
            children,
            relationships,
            paths: DashMap::new(),
        }))
    }
}

fn resolve_entity(
    name: &str,
    raw: &HashMap<String, Entity>,
    children: &HashMap<String, Vec<String>>,
    config: &OrmConfig,
    resolved: &mut HashMap<String, Entity>,
    visiting: &mut Vec<String>,
) -> ModelResult<()> {
    if resolved.contains_key(name) {
        return Ok(());
    }
    if visiting.iter().any(|v| v == name) {
        return Err(ModelError::Configuration(format!(
            "Inheritance cycle through '{}'",
            name
        )));
    }
    visiting.push(name.to_string());

    let declared = &raw[name];
    let mut entity = match &declared.sti_parent {
        None => {
            let mut entity = declared.clone();
            entity.default_scopes.clear();
            if entity.soft_delete && !entity.has_column(&config.soft_delete_column) {
                entity = entity.column(&config.soft_delete_column, ColumnType::Timestamp);
            }
            if entity.soft_delete {
                entity.default_scopes.push(DefaultScope {
                    name: SOFT_DELETE_SCOPE.to_string(),
                    clause: WhereClause::new().with(&config.soft_delete_column, WhereValue::Null),
                });
            }
            entity
        }
        Some(parent) => {
            resolve_entity(parent, raw, children, config, resolved, visiting)?;
            let base = &resolved[parent.as_str()];
            let mut entity = base.clone();
            entity.name = declared.name.clone();
            entity.sti_parent = Some(parent.clone());
            entity.scopes = base.scopes.clone();
            entity.scopes.extend(declared.scopes.clone());
            if declared.soft_delete && !base.soft_delete {
                entity.soft_delete = true;
                if !entity.has_column(&config.soft_delete_column) {
                    entity = entity.column(&config.soft_delete_column, ColumnType::Timestamp);
                }
                entity.default_scopes.insert(
                    0,
                    DefaultScope {
                        name: SOFT_DELETE_SCOPE.to_string(),
                        clause: WhereClause::new().with(&config.soft_delete_column, WhereValue::Null),
                    },
                );
            }
            for column in &declared.columns {
                entity = entity.column(&column.name, column.column_type);
            }
            entity.default_scopes.retain(|scope| scope.name != STI_SCOPE);

            let mut family = vec![Value::from(declared.name.clone())];
            family.extend(descendants(name, children).into_iter().map(Value::from));
            entity.default_scopes.push(DefaultScope {
                name: STI_SCOPE.to_string(),
                clause: WhereClause::new().with(&config.sti_type_column, WhereValue::List(family)),
            });
            entity
        }
    };

    if children.contains_key(name) && !entity.has_column(&config.sti_type_column) {
        entity = entity.column(&config.sti_type_column, ColumnType::Text);
    }
    for scope in &declared.default_scopes {
        entity = entity.default_scope(&scope.name, scope.clause.clone());
    }

    visiting.pop();
    resolved.insert(name.to_string(), entity);
    Ok(())
}

fn descendants(name: &str, children: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut found = Vec::new();
    let mut pending: Vec<&String> = children.get(name).map(|c| c.iter().collect()).unwrap_or_default();
    while let Some(child) = pending.pop() {
        found.push(child.clone());
        if let Some(grandchildren) = children.get(child) {
            pending.extend(grandchildren.iter());
        }
    }
    found
}

/// Immutable registry of entities and relationship declarations
#[derive(Debug)]
pub struct Registry {
    config: OrmConfig,
    order: Vec<String>,
    entities: HashMap<String, Entity>,
    children: HashMap<String, Vec<String>>,
    relationships: HashMap<String, Vec<Arc<Relationship>>>,
    paths: DashMap<(String, String), Arc<RelationshipPath>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn entity(&self, name: &str) -> ModelResult<&Entity> {
        self.entities
            .get(name)
            .ok_or_else(|| ModelError::UnknownEntity(name.to_string()))
    }

    /// Entities in registration order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// Start a query against `entity`
    pub fn query(self: &Arc<Self>, entity: &str) -> QueryBuilder {
        QueryBuilder::new(self.clone(), entity)
    }

    /// `entity` followed by its STI ancestors
    fn lineage<'a>(&'a self, entity: &'a str) -> Vec<&'a str> {
        let mut lineage = vec![entity];
        let mut current = entity;
        while let Some(parent) = self.entities.get(current).and_then(|e| e.sti_parent()) {
            lineage.push(parent);
            current = parent;
        }
        lineage
    }

    /// Relationship declared on `entity` or inherited from an STI ancestor
    pub fn relationship(&self, entity: &str, name: &str) -> ModelResult<&Arc<Relationship>> {
        self.entity(entity)?;
        self.lineage(entity)
            .into_iter()
            .filter_map(|owner| self.relationships.get(owner))
            .find_map(|declared| declared.iter().find(|r| r.name() == name))
            .ok_or_else(|| ModelError::UnknownAssociation {
                entity: entity.to_string(),
                association: name.to_string(),
            })
    }

    pub fn declares(&self, entity: &str, name: &str) -> bool {
        self.relationship(entity, name).is_ok()
    }

    /// Relationships of `entity` grouped by kind; inherited ones come first
    pub fn relationships_of(&self, entity: &str) -> ModelResult<RelationshipSet<'_>> {
        self.entity(entity)?;
        let lineage = self.lineage(entity);
        let mut set = RelationshipSet::default();

        // most derived declaration of a name wins
        let mut seen = HashSet::new();
        let mut visible: Vec<&Arc<Relationship>> = Vec::new();
        for owner in &lineage {
            for relationship in self.relationships.get(*owner).into_iter().flatten() {
                if seen.insert(relationship.name()) {
                    visible.push(relationship);
                }
            }
        }
        let depth_of = |owner: &str| lineage.iter().position(|o| *o == owner).unwrap_or(0);
        visible.sort_by_key(|r| std::cmp::Reverse(depth_of(r.owner())));

        for relationship in visible {
            match relationship.as_ref() {
                Relationship::BelongsTo(r) => set.belongs_to.push(r),
                Relationship::HasOne(r) => set.has_one.push(r),
                Relationship::HasMany(r) => set.has_many.push(r),
            }
        }
        Ok(set)
    }

    /// Root of the entity's STI hierarchy (itself when not inherited)
    pub fn sti_root<'a>(&'a self, entity: &'a str) -> &'a str {
        self.lineage(entity).last().copied().unwrap_or(entity)
    }

    /// `entity` and every STI descendant
    pub fn sti_family(&self, entity: &str) -> Vec<String> {
        let mut family = vec![entity.to_string()];
        family.extend(descendants(entity, &self.children));
        family
    }

    pub fn has_sti_children(&self, entity: &str) -> bool {
        self.children.contains_key(entity)
    }

    /// Whether `candidate` is `ancestor` or inherits from it
    pub fn is_sti_descendant(&self, candidate: &str, ancestor: &str) -> bool {
        self.lineage(candidate).contains(&ancestor)
    }

    /// Value stored in polymorphic type columns for records of `entity`
    pub fn polymorphic_type_name(&self, entity: &str) -> ModelResult<String> {
        self.entity(entity)?;
        Ok(self.sti_root(entity).to_string())
    }

    /// Entity a row read as `queried` materializes as
    pub fn runtime_entity<'a>(&'a self, queried: &'a str, row: &Row) -> &'a str {
        if !self.has_sti_children(self.sti_root(queried)) {
            return queried;
        }
        match row.get(&self.config.sti_type_column).and_then(Value::as_str) {
            Some(discriminator) => match self.entities.get_key_value(discriminator) {
                Some((name, _)) if self.is_sti_descendant(name, queried) => name.as_str(),
                _ => queried,
            },
            None => queried,
        }
    }

    /// Materialize a row read from `queried`'s table
    pub fn instantiate(&self, queried: &str, row: Row) -> ModelResult<Record> {
        let runtime = self.runtime_entity(queried, &row);
        let entity = self.entity(runtime)?;
        Ok(Record::new(entity.name(), entity.primary_key_column(), row))
    }

    /// Build a record from a JSON object
    pub fn record(&self, entity: &str, attributes: Value) -> ModelResult<Record> {
        match attributes {
            Value::Object(row) => self.instantiate(entity, row),
            other => Err(ModelError::Serialization(format!(
                "record attributes must be an object, got {}",
                other
            ))),
        }
    }

    /// Flatten `entity.name` to its direct edges, resolving through chains.
    /// Results are memoized per `(entity, name)`.
    pub fn resolve_path(&self, entity: &str, name: &str) -> ModelResult<Arc<RelationshipPath>> {
        let key = (entity.to_string(), name.to_string());
        if let Some(path) = self.paths.get(&key) {
            return Ok(path.value().clone());
        }

        let relationship = self.relationship(entity, name)?;
        let hops = self.expand(entity, relationship, 0, (entity, name))?;
        let path = Arc::new(RelationshipPath { hops });
        self.paths.insert(key, path.clone());
        Ok(path)
    }

    fn expand(
        &self,
        owner: &str,
        relationship: &Arc<Relationship>,
        depth: usize,
        root: (&str, &str),
    ) -> ModelResult<Vec<Hop>> {
        if depth > self.config.max_through_depth {
            return Err(ModelError::ThroughDepthExceeded {
                entity: root.0.to_string(),
                relationship: root.1.to_string(),
                max_depth: self.config.max_through_depth,
            });
        }

        let through = match relationship.as_ref() {
            Relationship::BelongsTo(belongs_to) => {
                if belongs_to.targets().len() != 1 {
                    return Err(ModelError::CannotJoinPolymorphicBelongsTo {
                        entity: owner.to_string(),
                        relationship: belongs_to.name().to_string(),
                    });
                }
                return Ok(vec![Hop {
                    owner: owner.to_string(),
                    relationship: relationship.clone(),
                    target: belongs_to.targets()[0].clone(),
                    terminating: Vec::new(),
                }]);
            }
            Relationship::HasOne(has) | Relationship::HasMany(has) => match has.through_name() {
                None => {
                    return Ok(vec![Hop {
                        owner: owner.to_string(),
                        relationship: relationship.clone(),
                        target: has.target()?.to_string(),
                        terminating: Vec::new(),
                    }]);
                }
                Some(through) => (has, through),
            },
        };
        let (has, through) = through;

        let through_relationship = self.relationship(owner, through).map_err(|_| {
            ModelError::Configuration(format!(
                "{}.{} goes through '{}', which {} does not declare",
                owner,
                has.name(),
                through,
                owner
            ))
        })?;
        let mut hops = self.expand(owner, through_relationship, depth + 1, root)?;

        let through_target = hops[hops.len() - 1].target.clone();
        let source = self
            .relationship(&through_target, has.source_name())
            .map_err(|_| ModelError::MissingThroughSource {
                owner: owner.to_string(),
                relationship: has.name().to_string(),
                through: through.to_string(),
                through_target: through_target.clone(),
                source_name: has.source_name().to_string(),
            })?;
        let offset = hops.len();
        for mut hop in self.expand(&through_target, source, depth + 1, root)? {
            for terminating in &mut hop.terminating {
                terminating.start += offset;
            }
            hops.push(hop);
        }

        let last = hops.len() - 1;
        hops[last].terminating.push(Terminating {
            relationship: relationship.clone(),
            start: 0,
        });
        Ok(hops)
    }
}

impl SchemaMetadata for Registry {
    fn columns_of(&self, entity: &str) -> ModelResult<Vec<String>> {
        Ok(self
            .entity(entity)?
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }

    fn primary_key_of(&self, entity: &str) -> ModelResult<String> {
        Ok(self.entity(entity)?.primary_key_column().to_string())
    }
}
