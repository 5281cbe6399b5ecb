//! Model System - entity definitions, runtime records and typed models
//!
//! - `entity`: registered entity types (columns, STI, default and named scopes)
//! - `record`: runtime instances with association slots
//! - `core_trait`: typed `Model` trait decoding records

pub mod core_trait;
pub mod entity;
pub mod record;

pub use core_trait::Model;
pub use entity::{Column, ColumnType, DefaultScope, Entity, ScopeFn, SOFT_DELETE_SCOPE, STI_SCOPE};
pub use record::{AssociationSlot, Record};
pub(crate) use record::HIDDEN_SLOT_PREFIX;
