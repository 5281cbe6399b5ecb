//! Error types for association resolution, query composition and hydration
//!
//! Every failure of a builder or load chain surfaces as a [`ModelError`].
//! Configuration errors are raised at declaration or first-use time and are
//! never fixed by retrying; execution errors come from the statement executor
//! and carry the compiled statement that failed.

use serde_json::Value;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// A `through` relationship names a source that the through target does not declare
    #[error(
        "Missing through source: {through_target} has no relationship '{source_name}' \
         (required by {owner}.{relationship} through '{through}'). Either set an explicit \
         `source` on {owner}.{relationship}, or define '{source_name}' on {through_target}"
    )]
    MissingThroughSource {
        owner: String,
        relationship: String,
        through: String,
        through_target: String,
        source_name: String,
    },

    /// Polymorphic belongs-to edges have no single target table to join
    #[error(
        "Cannot join polymorphic belongs_to '{relationship}' on {entity}: the target table \
         is ambiguous. Load it with preload instead"
    )]
    CannotJoinPolymorphicBelongsTo { entity: String, relationship: String },

    /// An explicit foreign key override is missing or has the wrong type
    #[error("Invalid foreign key '{foreign_key}' for {entity}.{relationship}: {reason}")]
    InvalidForeignKey {
        entity: String,
        relationship: String,
        foreign_key: String,
        reason: String,
    },

    /// Similarity thresholds must lie within [0, 1]
    #[error("Invalid similarity score {score}: must be between 0 and 1")]
    InvalidScore { score: f64 },

    /// The operator has no entry in the inversion table
    #[error("Operator '{operator}' cannot be negated")]
    UnsupportedNegation { operator: String },

    /// A through chain did not bottom out within the configured depth
    #[error("Through chain for {entity}.{relationship} exceeds the maximum depth of {max_depth}")]
    ThroughDepthExceeded {
        entity: String,
        relationship: String,
        max_depth: usize,
    },

    /// The entity was never registered
    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    /// The named scope was never registered on the entity
    #[error("Unknown scope '{scope}' on {entity}")]
    UnknownScope { entity: String, scope: String },

    /// A condition expects a passthrough value the caller did not supply
    #[error("Missing passthrough value '{0}'")]
    MissingPassthrough(String),

    /// The relationship is not declared on the resolved runtime type
    #[error("Unknown association '{association}' on {entity}")]
    UnknownAssociation { entity: String, association: String },

    /// The column is neither a column of the entity nor a joined alias
    #[error("Unknown column '{column}' on {entity}")]
    UnknownColumn { entity: String, column: String },

    /// The association was read before it was loaded
    #[error("Association '{association}' on {entity} has not been loaded")]
    NonLoadedAssociation { entity: String, association: String },

    /// The statement executor failed
    #[error("Statement execution failed: {cause} (sql: {sql})")]
    StatementExecution {
        sql: String,
        params: Vec<Value>,
        cause: String,
    },

    /// Database driver error not yet tied to a statement
    #[error("Database error: {0}")]
    Database(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Query building error
    #[error("Query error: {0}")]
    Query(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ModelError {
    /// Configuration errors are raised at declaration or first use and never
    /// succeed on retry
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ModelError::MissingThroughSource { .. }
                | ModelError::CannotJoinPolymorphicBelongsTo { .. }
                | ModelError::InvalidForeignKey { .. }
                | ModelError::InvalidScore { .. }
                | ModelError::UnsupportedNegation { .. }
                | ModelError::ThroughDepthExceeded { .. }
                | ModelError::UnknownEntity(_)
                | ModelError::UnknownScope { .. }
                | ModelError::Configuration(_)
        )
    }

    /// Attach the failing statement to a driver error. Errors that already
    /// carry a statement, and non-execution errors, pass through unchanged.
    pub fn with_statement(self, sql: &str, params: &[Value]) -> Self {
        match self {
            ModelError::Database(cause) => ModelError::StatementExecution {
                sql: sql.to_string(),
                params: params.to_vec(),
                cause,
            },
            other => other,
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_through_source_names_both_fixes() {
        let err = ModelError::MissingThroughSource {
            owner: "User".to_string(),
            relationship: "ratings".to_string(),
            through: "comments".to_string(),
            through_target: "Comment".to_string(),
            source_name: "ratings".to_string(),
        };

        let message = err.to_string();
        assert!(message.contains("explicit `source`"));
        assert!(message.contains("define 'ratings' on Comment"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_with_statement_annotates_driver_errors_only() {
        let annotated = ModelError::Database("connection reset".to_string())
            .with_statement("SELECT 1", &[Value::from(1)]);
        match annotated {
            ModelError::StatementExecution { sql, params, cause } => {
                assert_eq!(sql, "SELECT 1");
                assert_eq!(params, vec![Value::from(1)]);
                assert_eq!(cause, "connection reset");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let untouched = ModelError::UnknownEntity("Ghost".to_string()).with_statement("SELECT 1", &[]);
        assert!(matches!(untouched, ModelError::UnknownEntity(_)));
    }

    #[test]
    fn test_state_errors_are_not_configuration_errors() {
        let err = ModelError::NonLoadedAssociation {
            entity: "User".to_string(),
            association: "posts".to_string(),
        };
        assert!(!err.is_configuration_error());
        assert_eq!(err.to_string(), "Association 'posts' on User has not been loaded");
    }
}
