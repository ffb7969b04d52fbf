use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// StoreBackend
// ---------------------------------------------------------------------------

/// Which `Store` implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local storage; everything is lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("unknown store backend: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    /// Required for the postgres backend.
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    /// A sensor whose newest reading is older than this counts as offline.
    pub sensor_stale_after: Duration,
    /// Delay before a queued command is driven to completion by the
    /// simulator; `None` disables simulation.
    pub simulated_execution: Option<Duration>,
    pub retention_interval: Duration,
    pub alert_retention_days: i64,
    pub command_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let optional = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let store_backend: StoreBackend = optional("STORE_BACKEND", "postgres")
            .trim()
            .parse()
            .context("STORE_BACKEND must be 'postgres' or 'memory'")?;
        let database_url = match store_backend {
            StoreBackend::Postgres => Some(required(&lookup, "DATABASE_URL")?),
            StoreBackend::Memory => lookup("DATABASE_URL"),
        };

        // Simulated devices would race real ones for pending commands, so the
        // simulation only defaults on for the in-memory demo backend.
        let simulated_default = match store_backend {
            StoreBackend::Postgres => "0",
            StoreBackend::Memory => "1000",
        };
        let simulated_ms: u64 = optional("SIMULATED_EXECUTION_MS", simulated_default)
            .parse()
            .context("SIMULATED_EXECUTION_MS must be a non-negative integer")?;

        Ok(Self {
            store_backend,
            database_url,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "5000")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            db_max_connections: positive(optional("DB_MAX_CONNECTIONS", "10"), "DB_MAX_CONNECTIONS")?,
            db_acquire_timeout: Duration::from_secs(positive(
                optional("DB_ACQUIRE_TIMEOUT_SECS", "5"),
                "DB_ACQUIRE_TIMEOUT_SECS",
            )?),
            sensor_stale_after: Duration::from_secs(positive(
                optional("SENSOR_STALE_AFTER_SECS", "300"),
                "SENSOR_STALE_AFTER_SECS",
            )?),
            simulated_execution: (simulated_ms > 0).then(|| Duration::from_millis(simulated_ms)),
            retention_interval: Duration::from_secs(positive(
                optional("RETENTION_INTERVAL_SECS", "3600"),
                "RETENTION_INTERVAL_SECS",
            )?),
            alert_retention_days: positive(optional("ALERT_RETENTION_DAYS", "30"), "ALERT_RETENTION_DAYS")?,
            command_retention_days: positive(
                optional("COMMAND_RETENTION_DAYS", "7"),
                "COMMAND_RETENTION_DAYS",
            )?,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key).with_context(|| format!("missing required env var: {key}"))
}

fn positive<T>(raw: String, key: &str) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
{
    raw.trim()
        .parse::<T>()
        .ok()
        .filter(|v| *v > T::default())
        .with_context(|| format!("{key} must be a positive integer, got: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_database_url() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/env")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.server_host, "0.0.0.0");
        assert_eq!(config.server_port, 5000);
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.db_acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.sensor_stale_after, Duration::from_secs(300));
        assert!(config.simulated_execution.is_none());
        assert_eq!(config.retention_interval, Duration::from_secs(3600));
        assert_eq!(config.alert_retention_days, 30);
        assert_eq!(config.command_retention_days, 7);
    }

    #[test]
    fn postgres_requires_database_url() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn memory_backend_needs_no_database() {
        let config = load(&[("STORE_BACKEND", "memory")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert!(config.database_url.is_none());
        assert_eq!(config.simulated_execution, Some(Duration::from_millis(1000)));
    }

    #[test]
    fn postgres_simulation_is_opt_in() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/env"),
            ("SIMULATED_EXECUTION_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.simulated_execution, Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_disables_simulation() {
        let config = load(&[("STORE_BACKEND", "memory"), ("SIMULATED_EXECUTION_MS", "0")]).unwrap();
        assert!(config.simulated_execution.is_none());
    }

    #[test]
    fn unknown_backend_errors() {
        let err = load(&[("STORE_BACKEND", "mongo")]).unwrap_err();
        assert!(err.to_string().contains("STORE_BACKEND"));
    }

    #[test]
    fn invalid_numbers_error() {
        let err = load(&[("STORE_BACKEND", "memory"), ("SERVER_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));

        let err = load(&[("STORE_BACKEND", "memory"), ("SENSOR_STALE_AFTER_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("SENSOR_STALE_AFTER_SECS"));
    }

    #[test]
    fn store_backend_from_str() {
        assert_eq!("postgres".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }
}
