//! Records - runtime entity instances and their association slots

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backends::Row;
use crate::error::{ModelError, ModelResult};
use crate::relationships::{Registry, Relationship};

/// Hydration state of one association on one record
///
/// A slot only exists once the association was loaded (or assigned).
/// `Many` slots are sealed when their loader level finishes; sealed slots
/// are never written again.
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationSlot {
    One(Option<Box<Record>>),
    Many { items: Vec<Record>, sealed: bool },
}

impl AssociationSlot {
    pub fn is_loaded(&self) -> bool {
        match self {
            AssociationSlot::One(_) => true,
            AssociationSlot::Many { sealed, .. } => *sealed,
        }
    }

    fn as_slice(&self) -> &[Record] {
        match self {
            AssociationSlot::One(value) => value.as_deref().map(std::slice::from_ref).unwrap_or(&[]),
            AssociationSlot::Many { items, .. } => items,
        }
    }

    pub(crate) fn records_mut(&mut self) -> Vec<&mut Record> {
        match self {
            AssociationSlot::One(value) => value.as_deref_mut().into_iter().collect(),
            AssociationSlot::Many { items, .. } => items.iter_mut().collect(),
        }
    }
}

/// A materialized row of a registered entity
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: String,
    primary_key: String,
    attributes: Row,
    associations: HashMap<String, AssociationSlot>,
}

impl Record {
    pub(crate) fn new(entity: &str, primary_key: &str, attributes: Row) -> Self {
        Self {
            entity: entity.to_string(),
            primary_key: primary_key.to_string(),
            attributes,
            associations: HashMap::new(),
        }
    }

    /// Runtime entity name (the STI child when the row's discriminator names one)
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    /// Attribute value, `Value::Null` when absent
    pub fn value(&self, column: &str) -> Value {
        self.attributes.get(column).cloned().unwrap_or(Value::Null)
    }

    pub fn set<V: Into<Value>>(&mut self, column: &str, value: V) {
        self.attributes.insert(column.to_string(), value.into());
    }

    pub fn primary_key(&self) -> Value {
        self.value(&self.primary_key)
    }

    pub fn primary_key_column(&self) -> &str {
        &self.primary_key
    }

    pub fn is_loaded(&self, association: &str) -> bool {
        self.associations
            .get(association)
            .map(AssociationSlot::is_loaded)
            .unwrap_or(false)
    }

    fn slot(&self, association: &str) -> ModelResult<&AssociationSlot> {
        self.associations
            .get(association)
            .filter(|slot| slot.is_loaded())
            .ok_or_else(|| ModelError::NonLoadedAssociation {
                entity: self.entity.clone(),
                association: association.to_string(),
            })
    }

    /// Loaded single association; `None` when loaded and absent
    pub fn one(&self, association: &str) -> ModelResult<Option<&Record>> {
        Ok(self.slot(association)?.as_slice().first())
    }

    /// Loaded collection; an empty slice when loaded and empty
    pub fn many(&self, association: &str) -> ModelResult<&[Record]> {
        Ok(self.slot(association)?.as_slice())
    }

    /// Assign a belongs-to target, copying its primary key into the foreign
    /// key and, when polymorphic, its type name into the type column
    pub fn set_belongs_to(
        &mut self,
        registry: &Registry,
        association: &str,
        target: Option<Record>,
    ) -> ModelResult<()> {
        let relationship = registry.relationship(&self.entity, association)?;
        let belongs_to = match relationship.as_ref() {
            Relationship::BelongsTo(belongs_to) => belongs_to,
            _ => {
                return Err(ModelError::Query(format!(
                    "'{}' on {} is not a belongs_to association",
                    association, self.entity
                )))
            }
        };

        let foreign_key = belongs_to.foreign_key(registry)?.to_string();
        match &target {
            Some(target) => {
                let accepted = belongs_to
                    .targets()
                    .iter()
                    .any(|candidate| registry.is_sti_descendant(target.entity(), candidate));
                if !accepted {
                    return Err(ModelError::Query(format!(
                        "{} is not a valid target for {}.{}",
                        target.entity(),
                        self.entity,
                        association
                    )));
                }
                let key = match belongs_to.primary_key_override() {
                    Some(column) => target.value(column),
                    None => target.primary_key(),
                };
                self.set(&foreign_key, key);
                if let Some(type_column) = belongs_to.type_column() {
                    let type_name = registry.polymorphic_type_name(target.entity())?;
                    self.set(&type_column, type_name);
                }
            }
            None => {
                self.set(&foreign_key, Value::Null);
                if let Some(type_column) = belongs_to.type_column() {
                    self.set(&type_column, Value::Null);
                }
            }
        }

        self.associations.insert(
            association.to_string(),
            AssociationSlot::One(target.map(Box::new)),
        );
        Ok(())
    }

    /// Decode the attributes into a typed struct
    pub fn decode<T: DeserializeOwned>(&self) -> ModelResult<T> {
        Ok(serde_json::from_value(Value::Object(self.attributes.clone()))?)
    }

    /// Attributes plus every loaded association, nested
    pub fn to_json(&self) -> Value {
        let mut map = self.attributes.clone();
        let mut names: Vec<&String> = self.associations.keys().collect();
        names.sort();
        for name in names {
            let slot = &self.associations[name];
            if !slot.is_loaded() || name.starts_with(HIDDEN_SLOT_PREFIX) {
                continue;
            }
            let value = match slot {
                AssociationSlot::One(value) => value
                    .as_ref()
                    .map(|record| record.to_json())
                    .unwrap_or(Value::Null),
                AssociationSlot::Many { items, .. } => {
                    Value::Array(items.iter().map(Record::to_json).collect())
                }
            };
            map.insert(name.clone(), value);
        }
        Value::Object(map)
    }

    /// Install a loaded slot unless one is already loaded. Returns whether
    /// the slot was written.
    pub(crate) fn install(&mut self, association: &str, slot: AssociationSlot) -> bool {
        if self.is_loaded(association) {
            return false;
        }
        self.associations.insert(association.to_string(), slot);
        true
    }

    /// Loaded records under `association`, for the next loader level
    pub(crate) fn loaded_mut(&mut self, association: &str) -> Vec<&mut Record> {
        self.associations
            .get_mut(association)
            .map(AssociationSlot::records_mut)
            .unwrap_or_default()
    }

    pub(crate) fn loaded(&self, association: &str) -> &[Record] {
        self.associations
            .get(association)
            .map(AssociationSlot::as_slice)
            .unwrap_or(&[])
    }
}

/// Slots written while bridging through chains; skipped by [`Record::to_json`]
pub(crate) const HIDDEN_SLOT_PREFIX: &str = "__";
