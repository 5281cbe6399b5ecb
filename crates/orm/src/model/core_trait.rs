//! Core Model Trait - typed views over records of a registered entity
//!
//! Relationship metadata lives in the registry; a [`Model`] only names the
//! entity it decodes and the shape its attributes deserialize into.

use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::record::Record;
use crate::error::ModelResult;
use crate::query::QueryBuilder;
use crate::relationships::Registry;

/// Typed model decoded from a [`Record`]
pub trait Model: Send + Sync + Debug + DeserializeOwned {
    /// Registered entity name
    const ENTITY: &'static str;

    /// Decode a record of this entity (or one of its STI children)
    fn from_record(record: &Record) -> ModelResult<Self> {
        record.decode()
    }

    /// Start a query against this model's entity
    fn query(registry: &Arc<Registry>) -> QueryBuilder {
        QueryBuilder::new(registry.clone(), Self::ENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Post {
        id: i64,
        title: String,
    }

    impl Model for Post {
        const ENTITY: &'static str = "Post";
    }

    #[test]
    fn test_from_record_uses_serde() {
        let record = match json!({"id": 10, "title": "hello", "body": "ignored"}) {
            serde_json::Value::Object(map) => Record::new("Post", "id", map),
            _ => unreachable!(),
        };
        assert_eq!(
            Post::from_record(&record).unwrap(),
            Post {
                id: 10,
                title: "hello".to_string()
            }
        );
    }
}
