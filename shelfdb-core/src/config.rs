// shelfdb-core/src/config.rs
// Database configuration: id assignment and log level

use serde::Deserialize;
use std::str::FromStr;

use crate::document::DocumentId;
use crate::logging::{self, LogLevel};

/// Environment variable selecting the id strategy
pub const ID_STRATEGY_ENV_VAR: &str = "SHELFDB_ID_STRATEGY";

/// How the store assigns `_id` to documents that arrive without one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// 1, 2, 3, ... per collection
    #[default]
    AutoIncrement,
    /// UUID v4 strings
    ObjectId,
}

impl IdStrategy {
    /// Next id given the collection's counter; `None` when integer ids run out
    pub fn next_id(&self, last_id: u64) -> Option<DocumentId> {
        match self {
            IdStrategy::AutoIncrement => DocumentId::new_auto(last_id),
            IdStrategy::ObjectId => Some(DocumentId::new_object_id()),
        }
    }
}

impl FromStr for IdStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "auto_increment" | "auto" => Ok(IdStrategy::AutoIncrement),
            "object_id" | "uuid" => Ok(IdStrategy::ObjectId),
            other => Err(format!("unknown id strategy '{}'", other)),
        }
    }
}

/// Options for opening a [`Database`](crate::Database)
///
/// Deserializable from JSON so the CLI can read it from a file:
///
/// ```
/// use shelfdb_core::config::{DatabaseConfig, IdStrategy};
///
/// let config: DatabaseConfig =
///     serde_json::from_str(r#"{"id_strategy": "object_id"}"#).unwrap();
/// assert_eq!(config.id_strategy, IdStrategy::ObjectId);
/// assert_eq!(config.log_level, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub id_strategy: IdStrategy,

    /// Applied to the global logger when the database opens; `None` leaves it alone
    pub log_level: Option<LogLevel>,
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_strategy(mut self, id_strategy: IdStrategy) -> Self {
        self.id_strategy = id_strategy;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Defaults overridden by `SHELFDB_LOG` and `SHELFDB_ID_STRATEGY`
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().overlay(
            std::env::var(logging::LOG_ENV_VAR).ok().as_deref(),
            std::env::var(ID_STRATEGY_ENV_VAR).ok().as_deref(),
        )
    }

    fn overlay(mut self, log_level: Option<&str>, id_strategy: Option<&str>) -> Self {
        if let Some(level) = log_level.and_then(|raw| raw.parse().ok()) {
            self.log_level = Some(level);
        }
        if let Some(strategy) = id_strategy.and_then(|raw| raw.parse().ok()) {
            self.id_strategy = strategy;
        }
        self
    }

    pub(crate) fn apply_logging(&self) {
        if let Some(level) = self.log_level {
            logging::set_log_level(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_strategy_parsing() {
        assert_eq!("auto-increment".parse(), Ok(IdStrategy::AutoIncrement));
        assert_eq!("OBJECT_ID".parse(), Ok(IdStrategy::ObjectId));
        assert!("snowflake".parse::<IdStrategy>().is_err());
    }

    #[test]
    fn test_next_id() {
        assert_eq!(IdStrategy::AutoIncrement.next_id(4), Some(DocumentId::Int(5)));
        assert_eq!(IdStrategy::AutoIncrement.next_id(i64::MAX as u64), None);
        assert!(matches!(
            IdStrategy::ObjectId.next_id(i64::MAX as u64),
            Some(DocumentId::String(_))
        ));
    }

    #[test]
    fn test_overlay_ignores_garbage() {
        let config = DatabaseConfig::default().overlay(Some("chatty"), Some("uuid"));
        assert_eq!(config.log_level, None);
        assert_eq!(config.id_strategy, IdStrategy::ObjectId);

        let config = DatabaseConfig::default().overlay(Some("debug"), None);
        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert_eq!(config.id_strategy, IdStrategy::AutoIncrement);
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let parsed: Result<DatabaseConfig, _> = serde_json::from_str(r#"{"durability": "safe"}"#);
        assert!(parsed.is_err());

        let parsed: DatabaseConfig = serde_json::from_str(r#"{"log_level": "info"}"#).unwrap();
        assert_eq!(parsed, DatabaseConfig::new().with_log_level(LogLevel::Info));
    }
}
