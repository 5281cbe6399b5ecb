//! ORM configuration
//!
//! Fixed when the registry is built and threaded through the composer and
//! loader together with it.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Configuration for query composition and association loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    /// Maximum number of hops followed while resolving a through chain
    pub max_through_depth: usize,
    /// Maximum number of keys placed in a single loader `IN (...)` list
    pub max_batch_size: usize,
    /// Column used by soft-deleting entities
    pub soft_delete_column: String,
    /// Discriminator column shared by single-table-inheritance hierarchies
    pub sti_type_column: String,
    /// Emit every compiled statement at debug level
    pub log_statements: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            max_through_depth: 16,
            max_batch_size: 1000,
            soft_delete_column: "deleted_at".to_string(),
            sti_type_column: "type".to_string(),
            log_statements: true,
        }
    }
}

impl OrmConfig {
    /// Build a configuration from `ELIF_ORM_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> ModelResult<Self> {
        let mut config = Self::default();

        if let Ok(depth) = env::var("ELIF_ORM_MAX_THROUGH_DEPTH") {
            config.max_through_depth = parse_usize("ELIF_ORM_MAX_THROUGH_DEPTH", &depth)?;
        }

        if let Ok(size) = env::var("ELIF_ORM_MAX_BATCH_SIZE") {
            config.max_batch_size = parse_usize("ELIF_ORM_MAX_BATCH_SIZE", &size)?;
        }

        if let Ok(column) = env::var("ELIF_ORM_SOFT_DELETE_COLUMN") {
            config.soft_delete_column = column;
        }

        if let Ok(column) = env::var("ELIF_ORM_STI_TYPE_COLUMN") {
            config.sti_type_column = column;
        }

        if let Ok(flag) = env::var("ELIF_ORM_LOG_STATEMENTS") {
            config.log_statements = flag.parse().map_err(|_| {
                ModelError::Configuration(format!(
                    "ELIF_ORM_LOG_STATEMENTS must be true or false, got '{}'",
                    flag
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ModelResult<()> {
        if self.max_through_depth == 0 {
            return Err(ModelError::Configuration(
                "max_through_depth must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ModelError::Configuration(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.soft_delete_column.is_empty() || self.sti_type_column.is_empty() {
            return Err(ModelError::Configuration(
                "soft_delete_column and sti_type_column cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_usize(var: &str, raw: &str) -> ModelResult<usize> {
    raw.parse().map_err(|_| {
        ModelError::Configuration(format!("{} must be a positive integer, got '{}'", var, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrmConfig::default();
        assert_eq!(config.max_through_depth, 16);
        assert_eq!(config.max_batch_size, 1000);
        assert_eq!(config.soft_delete_column, "deleted_at");
        assert_eq!(config.sti_type_column, "type");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let config = OrmConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: OrmConfig = serde_json::from_str(r#"{"max_batch_size": 50}"#).unwrap();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.max_through_depth, 16);
    }
}
