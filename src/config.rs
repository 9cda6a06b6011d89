use anyhow::{anyhow, Context, Result};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::RetryConfig;

// ============================================================================
// Configuration - Environment Settings
// ============================================================================
//
// Everything is read from the environment (a `.env` file is honoured when
// present). Unset variables fall back to defaults suitable for a local
// single-node setup; only the selected backend's connection string matters.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Scylla,
    Postgres,
    Redis,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Scylla => "scylla",
            Backend::Postgres => "postgres",
            Backend::Redis => "redis",
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "scylla" | "scylladb" => Ok(Backend::Scylla),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "redis" => Ok(Backend::Redis),
            other => Err(anyhow!("unknown event store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: Backend,

    // ScyllaDB
    pub scylla_nodes: Vec<String>,
    pub scylla_keyspace: String,
    pub scylla_table: String,

    // Postgres
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Redis
    pub redis_url: String,
    pub redis_key_prefix: String,

    // Shared store tuning
    pub page_size: NonZeroU32,
    pub publish_retry: RetryConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys take defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let mut publish_retry = RetryConfig::revision_conflict();
        if let Some(attempts) = lookup("PUBLISH_MAX_ATTEMPTS") {
            publish_retry.max_attempts = attempts.parse().context("PUBLISH_MAX_ATTEMPTS")?;
        }
        if let Some(delay) = lookup("PUBLISH_INITIAL_DELAY_MS") {
            publish_retry.initial_delay = Duration::from_millis(delay.parse().context("PUBLISH_INITIAL_DELAY_MS")?);
        }

        let settings = Self {
            backend: value("EVENT_STORE_BACKEND", "memory").parse()?,
            scylla_nodes: value("SCYLLA_NODES", "127.0.0.1:9042")
                .split(',')
                .map(|node| node.trim().to_string())
                .filter(|node| !node.is_empty())
                .collect(),
            scylla_keyspace: value("SCYLLA_KEYSPACE", "event_streams"),
            scylla_table: value("SCYLLA_TABLE", "change_sets"),
            database_url: lookup("DATABASE_URL"),
            database_max_connections: value("DATABASE_MAX_CONNECTIONS", "5")
                .parse()
                .context("DATABASE_MAX_CONNECTIONS")?,
            redis_url: value("REDIS_URL", "redis://127.0.0.1:6379"),
            redis_key_prefix: value("REDIS_KEY_PREFIX", "change-set."),
            page_size: value("EVENT_STORE_PAGE_SIZE", "97")
                .parse()
                .context("EVENT_STORE_PAGE_SIZE must be a positive integer")?,
            publish_retry,
        };

        tracing::debug!(
            backend = settings.backend.as_str(),
            page_size = settings.page_size.get(),
            publish_attempts = settings.publish_retry.max_attempts,
            "Loaded settings"
        );

        Ok(settings)
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required for the postgres backend")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();

        assert_eq!(settings.backend, Backend::Memory);
        assert_eq!(settings.scylla_nodes, vec!["127.0.0.1:9042".to_string()]);
        assert_eq!(settings.scylla_keyspace, "event_streams");
        assert_eq!(settings.scylla_table, "change_sets");
        assert_eq!(settings.redis_key_prefix, "change-set.");
        assert_eq!(settings.page_size.get(), 97);
        assert_eq!(settings.publish_retry.max_attempts, 10);
        assert!(settings.database_url().is_err());
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("EVENT_STORE_BACKEND", "Postgres"),
            ("SCYLLA_NODES", "10.0.0.1:9042, 10.0.0.2:9042"),
            ("DATABASE_URL", "postgres://localhost/events"),
            ("EVENT_STORE_PAGE_SIZE", "25"),
            ("PUBLISH_MAX_ATTEMPTS", "3"),
            ("PUBLISH_INITIAL_DELAY_MS", "50"),
        ])
        .unwrap();

        assert_eq!(settings.backend, Backend::Postgres);
        assert_eq!(settings.scylla_nodes.len(), 2);
        assert_eq!(settings.database_url().unwrap(), "postgres://localhost/events");
        assert_eq!(settings.page_size.get(), 25);
        assert_eq!(settings.publish_retry.max_attempts, 3);
        assert_eq!(settings.publish_retry.initial_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(settings(&[("EVENT_STORE_BACKEND", "cassandra")]).is_err());
        assert!(settings(&[("EVENT_STORE_PAGE_SIZE", "0")]).is_err());
        assert!(settings(&[("EVENT_STORE_PAGE_SIZE", "many")]).is_err());
    }
}
