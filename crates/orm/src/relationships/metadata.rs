//! Relationship Metadata System - declarations for belongs_to, has_one and has_many edges

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::registry::Registry;
use crate::conditions::WhereClause;
use crate::error::{ModelError, ModelResult};
use crate::inflection::{foreign_key_for_table, polymorphic_columns};
use crate::model::ColumnType;
use crate::query::{OrderBy, ScopeBypass};

/// The kind of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// Many-to-one; the foreign key lives on the owner
    BelongsTo,
    /// One-to-one; the foreign key lives on the target
    HasOne,
    /// One-to-many; the foreign key lives on the target
    HasMany,
}

impl RelationshipKind {
    pub fn is_collection(self) -> bool {
        matches!(self, RelationshipKind::HasMany)
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipKind::BelongsTo => write!(f, "belongs_to"),
            RelationshipKind::HasOne => write!(f, "has_one"),
            RelationshipKind::HasMany => write!(f, "has_many"),
        }
    }
}

type TargetFn = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Lazily evaluated list of candidate target entities
///
/// The thunk runs on first use and its answer is kept, so declarations may
/// name entities registered later.
#[derive(Clone)]
pub struct TargetResolver {
    resolve: TargetFn,
    resolved: Arc<OnceCell<Vec<String>>>,
}

impl TargetResolver {
    pub fn lazy<F>(resolve: F) -> Self
    where
        F: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(resolve),
            resolved: Arc::new(OnceCell::new()),
        }
    }

    pub fn entity(name: &str) -> Self {
        let name = name.to_string();
        Self::lazy(move || vec![name.clone()])
    }

    pub fn entities<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        Self::lazy(move || names.clone())
    }

    pub fn targets(&self) -> &[String] {
        self.resolved.get_or_init(|| (self.resolve)())
    }
}

impl fmt::Debug for TargetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolved.get() {
            Some(targets) => f.debug_tuple("TargetResolver").field(targets).finish(),
            None => f.write_str("TargetResolver(<unresolved>)"),
        }
    }
}

/// Cascade behaviour when the owner is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependent {
    Destroy,
}

/// Condition comparing a target column with a column of the owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfCondition {
    pub target_column: String,
    pub owner_column: String,
    pub negated: bool,
}

/// Many-to-one edge
#[derive(Debug, Clone)]
pub struct BelongsTo {
    pub(crate) name: String,
    pub(crate) owner: String,
    target: TargetResolver,
    foreign_key: Option<String>,
    primary_key: Option<String>,
    polymorphic: bool,
    optional: bool,
    scope_bypass: ScopeBypass,
    resolved_foreign_key: OnceCell<String>,
}

impl BelongsTo {
    pub fn new(target: TargetResolver) -> Self {
        Self {
            name: String::new(),
            owner: String::new(),
            target,
            foreign_key: None,
            primary_key: None,
            polymorphic: false,
            optional: false,
            scope_bypass: ScopeBypass::None,
            resolved_foreign_key: OnceCell::new(),
        }
    }

    /// Column on the owner holding the target's key
    pub fn with_foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    /// Column on the target referenced by the foreign key, instead of its primary key
    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.primary_key = Some(column.to_string());
        self
    }

    /// Target type is stored in a `<name>_type` column
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn without_default_scopes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_bypass = self.scope_bypass.with_names(names);
        self
    }

    pub fn without_all_default_scopes(mut self) -> Self {
        self.scope_bypass = ScopeBypass::All;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn targets(&self) -> &[String] {
        self.target.targets()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.polymorphic
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn primary_key_override(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn scope_bypass(&self) -> &ScopeBypass {
        &self.scope_bypass
    }

    /// Type discriminator column on the owner, for polymorphic edges
    pub fn type_column(&self) -> Option<String> {
        self.polymorphic.then(|| polymorphic_columns(&self.name).1)
    }

    /// Column of `target` the foreign key points at
    pub fn target_key(&self, registry: &Registry, target: &str) -> ModelResult<String> {
        match &self.primary_key {
            Some(column) => Ok(column.clone()),
            None => Ok(registry.entity(target)?.primary_key_column().to_string()),
        }
    }

    /// Foreign key on the owner, inferred or validated on first use
    pub fn foreign_key(&self, registry: &Registry) -> ModelResult<&str> {
        self.resolved_foreign_key
            .get_or_try_init(|| match &self.foreign_key {
                Some(column) => {
                    let owner = registry.entity(&self.owner)?;
                    let fk_type = column_type_or_missing(owner.column_type(column), self, column)?;
                    for target in self.targets() {
                        let key = self.target_key(registry, target)?;
                        let key_type = registry.entity(target)?.column_type(&key);
                        check_compatible(fk_type, key_type, &key, self.owner(), self.name(), column)?;
                    }
                    Ok(column.clone())
                }
                None if self.polymorphic => Ok(polymorphic_columns(&self.name).0),
                None => {
                    let target = registry.entity(single_target(self.targets(), self)?)?;
                    Ok(foreign_key_for_table(target.table()))
                }
            })
            .map(String::as_str)
    }
}

/// One-to-one or one-to-many edge, direct or through another relationship
#[derive(Debug, Clone)]
pub struct HasAssociation {
    pub(crate) name: String,
    pub(crate) owner: String,
    collection: bool,
    target: Option<TargetResolver>,
    foreign_key: Option<String>,
    primary_key: Option<String>,
    polymorphic_as: Option<String>,
    through: Option<String>,
    source: Option<String>,
    conditions: WhereClause,
    negated_conditions: WhereClause,
    self_conditions: Vec<SelfCondition>,
    scope_bypass: ScopeBypass,
    distinct: bool,
    order: Vec<OrderBy>,
    dependent: Option<Dependent>,
    resolved_foreign_key: OnceCell<String>,
}

impl HasAssociation {
    pub fn new(target: TargetResolver, collection: bool) -> Self {
        Self::with_target(Some(target), collection)
    }

    fn with_target(target: Option<TargetResolver>, collection: bool) -> Self {
        Self {
            name: String::new(),
            owner: String::new(),
            collection,
            target,
            foreign_key: None,
            primary_key: None,
            polymorphic_as: None,
            through: None,
            source: None,
            conditions: WhereClause::new(),
            negated_conditions: WhereClause::new(),
            self_conditions: Vec::new(),
            scope_bypass: ScopeBypass::None,
            distinct: false,
            order: Vec::new(),
            dependent: None,
            resolved_foreign_key: OnceCell::new(),
        }
    }

    /// Composition of the owner's `through` relationship and a source on its target
    pub fn through(through: &str, collection: bool) -> Self {
        let mut association = Self::with_target(None, collection);
        association.through = Some(through.to_string());
        association
    }

    /// Relationship on the through target to follow; defaults to this relationship's name
    pub fn source(mut self, name: &str) -> Self {
        self.source = Some(name.to_string());
        self
    }

    /// Column on the target holding the owner's key
    pub fn with_foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    /// Column on the owner referenced by the foreign key, instead of its primary key
    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.primary_key = Some(column.to_string());
        self
    }

    /// Inverse of a polymorphic belongs_to named `name` on the target
    pub fn polymorphic_as(mut self, name: &str) -> Self {
        self.polymorphic_as = Some(name.to_string());
        self
    }

    /// Static conditions on the target
    pub fn on(mut self, clause: WhereClause) -> Self {
        self.conditions = std::mem::take(&mut self.conditions).merge(clause);
        self
    }

    /// Static conditions on the target, each negated
    pub fn not_on(mut self, clause: WhereClause) -> Self {
        self.negated_conditions = std::mem::take(&mut self.negated_conditions).merge(clause);
        self
    }

    /// `target.target_column = owner.owner_column`
    pub fn self_on(mut self, target_column: &str, owner_column: &str) -> Self {
        self.self_conditions.push(SelfCondition {
            target_column: target_column.to_string(),
            owner_column: owner_column.to_string(),
            negated: false,
        });
        self
    }

    /// `target.target_column != owner.owner_column`
    pub fn self_not_on(mut self, target_column: &str, owner_column: &str) -> Self {
        self.self_conditions.push(SelfCondition {
            target_column: target_column.to_string(),
            owner_column: owner_column.to_string(),
            negated: true,
        });
        self
    }

    pub fn without_default_scopes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_bypass = self.scope_bypass.with_names(names);
        self
    }

    pub fn without_all_default_scopes(mut self) -> Self {
        self.scope_bypass = ScopeBypass::All;
        self
    }

    /// Drop duplicate targets (by primary key)
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order.push(OrderBy::asc(column));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order.push(OrderBy::desc(column));
        self
    }

    pub fn dependent_destroy(mut self) -> Self {
        self.dependent = Some(Dependent::Destroy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn through_name(&self) -> Option<&str> {
        self.through.as_deref()
    }

    /// Relationship followed on the through target
    pub fn source_name(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    /// Declared target of a direct edge
    pub fn target(&self) -> ModelResult<&str> {
        let resolver = self.target.as_ref().ok_or_else(|| {
            ModelError::Configuration(format!(
                "{}.{} is a through association; resolve its path instead",
                self.owner, self.name
            ))
        })?;
        single_target(resolver.targets(), self)
    }

    pub fn polymorphic_name(&self) -> Option<&str> {
        self.polymorphic_as.as_deref()
    }

    /// Type discriminator column on the target, for polymorphic edges
    pub fn type_column(&self) -> Option<String> {
        self.polymorphic_as
            .as_deref()
            .map(|name| polymorphic_columns(name).1)
    }

    pub fn primary_key_override(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn conditions(&self) -> &WhereClause {
        &self.conditions
    }

    pub fn negated_conditions(&self) -> &WhereClause {
        &self.negated_conditions
    }

    pub fn self_conditions(&self) -> &[SelfCondition] {
        &self.self_conditions
    }

    pub fn scope_bypass(&self) -> &ScopeBypass {
        &self.scope_bypass
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn order(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn dependent(&self) -> Option<Dependent> {
        self.dependent
    }

    /// Column of the owner the foreign key points at
    pub fn owner_key(&self, registry: &Registry) -> ModelResult<String> {
        match &self.primary_key {
            Some(column) => Ok(column.clone()),
            None => Ok(registry.entity(&self.owner)?.primary_key_column().to_string()),
        }
    }

    /// Foreign key on the target, inferred or validated on first use
    pub fn foreign_key(&self, registry: &Registry) -> ModelResult<&str> {
        self.resolved_foreign_key
            .get_or_try_init(|| {
                let owner = registry.entity(&self.owner)?;
                let target = registry.entity(self.target()?)?;
                match (&self.foreign_key, &self.polymorphic_as) {
                    (Some(column), _) => {
                        let fk_type = column_type_or_missing(target.column_type(column), self, column)?;
                        let key = self.owner_key(registry)?;
                        check_compatible(fk_type, owner.column_type(&key), &key, self.owner(), self.name(), column)?;
                        Ok(column.clone())
                    }
                    (None, Some(name)) => Ok(polymorphic_columns(name).0),
                    (None, None) => Ok(foreign_key_for_table(owner.table())),
                }
            })
            .map(String::as_str)
    }
}

/// A declared relationship
#[derive(Debug, Clone)]
pub enum Relationship {
    BelongsTo(BelongsTo),
    HasOne(HasAssociation),
    HasMany(HasAssociation),
}

impl Relationship {
    pub fn belongs_to(target: &str) -> BelongsTo {
        BelongsTo::new(TargetResolver::entity(target))
    }

    /// Polymorphic belongs_to over the given candidate targets
    pub fn belongs_to_any<I, S>(targets: I) -> BelongsTo
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BelongsTo::new(TargetResolver::entities(targets)).polymorphic()
    }

    pub fn has_one(target: &str) -> HasAssociation {
        HasAssociation::new(TargetResolver::entity(target), false)
    }

    pub fn has_many(target: &str) -> HasAssociation {
        HasAssociation::new(TargetResolver::entity(target), true)
    }

    pub fn has_one_through(through: &str) -> HasAssociation {
        HasAssociation::through(through, false)
    }

    pub fn has_many_through(through: &str) -> HasAssociation {
        HasAssociation::through(through, true)
    }

    pub fn kind(&self) -> RelationshipKind {
        match self {
            Relationship::BelongsTo(_) => RelationshipKind::BelongsTo,
            Relationship::HasOne(_) => RelationshipKind::HasOne,
            Relationship::HasMany(_) => RelationshipKind::HasMany,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Relationship::BelongsTo(r) => &r.name,
            Relationship::HasOne(r) | Relationship::HasMany(r) => &r.name,
        }
    }

    /// Entity that declared the relationship
    pub fn owner(&self) -> &str {
        match self {
            Relationship::BelongsTo(r) => &r.owner,
            Relationship::HasOne(r) | Relationship::HasMany(r) => &r.owner,
        }
    }

    pub fn through_name(&self) -> Option<&str> {
        match self {
            Relationship::BelongsTo(_) => None,
            Relationship::HasOne(r) | Relationship::HasMany(r) => r.through_name(),
        }
    }

    pub fn is_through(&self) -> bool {
        self.through_name().is_some()
    }

    pub fn as_has(&self) -> Option<&HasAssociation> {
        match self {
            Relationship::BelongsTo(_) => None,
            Relationship::HasOne(r) | Relationship::HasMany(r) => Some(r),
        }
    }

    pub fn as_belongs_to(&self) -> Option<&BelongsTo> {
        match self {
            Relationship::BelongsTo(r) => Some(r),
            _ => None,
        }
    }

    pub fn scope_bypass(&self) -> &ScopeBypass {
        match self {
            Relationship::BelongsTo(r) => r.scope_bypass(),
            Relationship::HasOne(r) | Relationship::HasMany(r) => r.scope_bypass(),
        }
    }

    pub(crate) fn bind(&mut self, owner: &str, name: &str) {
        match self {
            Relationship::BelongsTo(r) => {
                r.owner = owner.to_string();
                r.name = name.to_string();
            }
            Relationship::HasOne(r) | Relationship::HasMany(r) => {
                r.owner = owner.to_string();
                r.name = name.to_string();
            }
        }
    }
}

impl From<BelongsTo> for Relationship {
    fn from(relationship: BelongsTo) -> Self {
        Relationship::BelongsTo(relationship)
    }
}

impl From<HasAssociation> for Relationship {
    fn from(relationship: HasAssociation) -> Self {
        if relationship.collection {
            Relationship::HasMany(relationship)
        } else {
            Relationship::HasOne(relationship)
        }
    }
}

trait Named {
    fn owner(&self) -> &str;
    fn name(&self) -> &str;
}

impl Named for BelongsTo {
    fn owner(&self) -> &str {
        &self.owner
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for HasAssociation {
    fn owner(&self) -> &str {
        &self.owner
    }
    fn name(&self) -> &str {
        &self.name
    }
}

fn single_target<'a, R: Named>(targets: &'a [String], relationship: &R) -> ModelResult<&'a str> {
    match targets {
        [target] => Ok(target),
        [] => Err(ModelError::Configuration(format!(
            "{}.{} resolves to no target entity",
            relationship.owner(),
            relationship.name()
        ))),
        _ => Err(ModelError::CannotJoinPolymorphicBelongsTo {
            entity: relationship.owner().to_string(),
            relationship: relationship.name().to_string(),
        }),
    }
}

fn column_type_or_missing<R: Named>(
    column_type: Option<ColumnType>,
    relationship: &R,
    column: &str,
) -> ModelResult<ColumnType> {
    column_type.ok_or_else(|| ModelError::InvalidForeignKey {
        entity: relationship.owner().to_string(),
        relationship: relationship.name().to_string(),
        foreign_key: column.to_string(),
        reason: "column is not declared".to_string(),
    })
}

fn check_compatible(
    fk_type: ColumnType,
    key_type: Option<ColumnType>,
    key: &str,
    owner: &str,
    relationship: &str,
    foreign_key: &str,
) -> ModelResult<()> {
    match key_type {
        Some(key_type) if !fk_type.is_compatible_with(key_type) => Err(ModelError::InvalidForeignKey {
            entity: owner.to_string(),
            relationship: relationship.to_string(),
            foreign_key: foreign_key.to_string(),
            reason: format!(
                "type {:?} does not match {:?} of referenced key '{}'",
                fk_type, key_type, key
            ),
        }),
        _ => Ok(()),
    }
}
