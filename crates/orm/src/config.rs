//! Session configuration
//!
//! Settings can be built in code or read from `KESTREL_*` environment
//! variables.

use std::env;
use std::str::FromStr;

use thiserror::Error;

use crate::transactions::IsolationLevel;

/// How deleted entities are written at commit time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Persist `Deleted = true` with a version guarded update
    #[default]
    Soft,
    /// Remove the row with a version guarded delete
    Hard,
}

impl FromStr for DeleteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "soft" => Ok(DeleteMode::Soft),
            "hard" => Ok(DeleteMode::Hard),
            _ => Err(ConfigError::InvalidValue {
                field: "delete_mode".to_string(),
                value: s.to_string(),
                expected: "soft or hard".to_string(),
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

/// Per-session behaviour
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Soft or hard deletes
    pub delete_mode: DeleteMode,
    /// Isolation level of the physical transaction
    pub isolation_level: IsolationLevel,
    /// Prefix of generated savepoint names
    pub savepoint_prefix: String,
    /// Exclude soft-deleted rows from queries
    pub filter_deleted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            delete_mode: DeleteMode::Soft,
            isolation_level: IsolationLevel::ReadCommitted,
            savepoint_prefix: "sp_".to_string(),
            filter_deleted: true,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, defaults otherwise
    pub fn from_env() -> Result<Self, ConfigError> {
        let delete_mode = get_env_or_default("KESTREL_DELETE_MODE", "soft");
        let isolation_level = get_env_or_default("KESTREL_ISOLATION_LEVEL", "read_committed");
        let savepoint_prefix = get_env_or_default("KESTREL_SAVEPOINT_PREFIX", "sp_");
        let filter_deleted = get_env_or_default("KESTREL_FILTER_DELETED", "true");

        let config = SessionConfig {
            delete_mode: delete_mode.parse()?,
            isolation_level: isolation_level.parse()?,
            savepoint_prefix,
            filter_deleted: parse_bool("filter_deleted", &filter_deleted)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix_ok = self
            .savepoint_prefix
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && self
                .savepoint_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !prefix_ok {
            return Err(ConfigError::ValidationFailed {
                field: "savepoint_prefix".to_string(),
                reason: "must be a plain SQL identifier".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_delete_mode(mut self, delete_mode: DeleteMode) -> Self {
        self.delete_mode = delete_mode;
        self
    }

    pub fn with_isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    pub fn with_savepoint_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.savepoint_prefix = prefix.into();
        self
    }

    pub fn with_filter_deleted(mut self, filter_deleted: bool) -> Self {
        self.filter_deleted = filter_deleted;
        self
    }
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.delete_mode, DeleteMode::Soft);
        assert_eq!(config.isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(config.savepoint_prefix, "sp_");
        assert!(config.filter_deleted);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env() {
        env::set_var("KESTREL_DELETE_MODE", "hard");
        env::set_var("KESTREL_ISOLATION_LEVEL", "serializable");
        let config = SessionConfig::from_env().unwrap();
        env::remove_var("KESTREL_DELETE_MODE");
        env::remove_var("KESTREL_ISOLATION_LEVEL");

        assert_eq!(config.delete_mode, DeleteMode::Hard);
        assert_eq!(config.isolation_level, IsolationLevel::Serializable);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            "archive".parse::<DeleteMode>(),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(parse_bool("filter_deleted", "maybe").is_err());

        let config = SessionConfig::default().with_savepoint_prefix("sp-1");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }
}
