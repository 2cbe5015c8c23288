//! Event store configuration, read from the environment.
//!
//! | variable | default | meaning |
//! |---|---|---|
//! | `TALLY_BACKEND` | `memory` | `memory` or `postgres` |
//! | `DATABASE_URL` | none | required when the backend is `postgres` |
//! | `TALLY_TABLE` | `event_store` | table holding every partition |
//! | `TALLY_PAGE_SIZE` | `100` | records per backend page |
//! | `TALLY_OPERATION_TIMEOUT_MS` | none | default deadline for operation contexts |
//! | `TALLY_MAX_APPEND_ATTEMPTS` | `3` | recorder attempts before a conflict is surfaced |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::context::OperationContext;
use crate::event_store::{BackendError, DEFAULT_PAGE_SIZE, InMemoryKeyedStore, KeyedStore, PostgresKeyedStore};

pub const DEFAULT_TABLE: &str = "event_store";
pub const DEFAULT_MAX_APPEND_ATTEMPTS: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {var} '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown backend '{other}' (expected memory or postgres)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStoreConfig {
    pub backend: BackendKind,
    pub database_url: Option<String>,
    pub table: String,
    pub page_size: usize,
    pub operation_timeout: Option<Duration>,
    pub max_append_attempts: u32,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            database_url: None,
            table: DEFAULT_TABLE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            operation_timeout: None,
            max_append_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
        }
    }
}

impl EventStoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("TALLY_BACKEND") {
            config.backend = value.parse().map_err(|reason| ConfigError::Invalid {
                var: "TALLY_BACKEND",
                value: value.clone(),
                reason,
            })?;
        }

        config.database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());
        if config.backend == BackendKind::Postgres && config.database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        if let Some(table) = lookup("TALLY_TABLE") {
            if !is_sql_identifier(&table) {
                return Err(ConfigError::Invalid {
                    var: "TALLY_TABLE",
                    value: table,
                    reason: "must be letters, digits and underscores, not starting with a digit"
                        .to_string(),
                });
            }
            config.table = table;
        }

        if let Some(value) = lookup("TALLY_PAGE_SIZE") {
            config.page_size = parse_positive("TALLY_PAGE_SIZE", &value)?;
        }

        if let Some(value) = lookup("TALLY_OPERATION_TIMEOUT_MS") {
            let ms: u64 = parse_positive("TALLY_OPERATION_TIMEOUT_MS", &value)?;
            config.operation_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(value) = lookup("TALLY_MAX_APPEND_ATTEMPTS") {
            config.max_append_attempts = parse_positive("TALLY_MAX_APPEND_ATTEMPTS", &value)?;
        }

        Ok(config)
    }

    /// Context carrying the configured default deadline, if any.
    pub fn operation_context(&self) -> OperationContext {
        let ctx = OperationContext::background();
        match self.operation_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    /// Open the configured backend.
    pub async fn open_backend(&self) -> Result<Arc<dyn KeyedStore>, BackendError> {
        match self.backend {
            BackendKind::Memory => {
                tracing::info!(page_size = self.page_size, "using in-memory event store");
                Ok(Arc::new(InMemoryKeyedStore::with_page_size(self.page_size)))
            }
            BackendKind::Postgres => {
                tracing::info!(table = %self.table, "using postgres event store");
                Ok(Arc::new(PostgresKeyedStore::connect(self).await?))
            }
        }
    }
}

fn parse_positive<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let parsed: T = value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if parsed <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}

fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory() {
        let config = EventStoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EventStoreConfig::default());
        assert_eq!(config.table, "event_store");
        assert_eq!(config.page_size, 100);
    }

    #[test]
    fn reads_every_variable() {
        let config = EventStoreConfig::from_lookup(lookup(&[
            ("TALLY_BACKEND", "Postgres"),
            ("DATABASE_URL", "postgres://localhost/tally"),
            ("TALLY_TABLE", "character_events"),
            ("TALLY_PAGE_SIZE", "25"),
            ("TALLY_OPERATION_TIMEOUT_MS", "1500"),
            ("TALLY_MAX_APPEND_ATTEMPTS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.backend, BackendKind::Postgres);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/tally"));
        assert_eq!(config.table, "character_events");
        assert_eq!(config.page_size, 25);
        assert_eq!(config.operation_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_append_attempts, 5);
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = EventStoreConfig::from_lookup(lookup(&[("TALLY_BACKEND", "postgres")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            EventStoreConfig::from_lookup(lookup(&[("TALLY_BACKEND", "dynamo")])),
            Err(ConfigError::Invalid { var: "TALLY_BACKEND", .. })
        ));
        assert!(matches!(
            EventStoreConfig::from_lookup(lookup(&[("TALLY_PAGE_SIZE", "0")])),
            Err(ConfigError::Invalid { var: "TALLY_PAGE_SIZE", .. })
        ));
        assert!(matches!(
            EventStoreConfig::from_lookup(lookup(&[("TALLY_PAGE_SIZE", "many")])),
            Err(ConfigError::Invalid { var: "TALLY_PAGE_SIZE", .. })
        ));
        assert!(matches!(
            EventStoreConfig::from_lookup(lookup(&[("TALLY_TABLE", "events; DROP TABLE x")])),
            Err(ConfigError::Invalid { var: "TALLY_TABLE", .. })
        ));
    }

    #[tokio::test]
    async fn memory_backend_opens_without_a_database() {
        let config = EventStoreConfig::default();
        assert!(config.open_backend().await.is_ok());
        assert!(config.operation_context().deadline().is_none());
    }
}
