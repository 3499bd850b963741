//! Environment-driven configuration, loaded once at startup and held behind
//! a `RwLock` so the scheduler can pick up changes at the top of every tick.

use crate::domains::jobs::models::job::OperationType;
use anyhow::Context;
use std::env;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Per-operation-type tunables: timeout, max retries, retry delay.
#[derive(Debug, Clone, Copy)]
pub struct OperationConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl OperationConfig {
    fn new(timeout_secs: u64, max_retries: u32, retry_delay_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
            retry_delay: Duration::from_secs(retry_delay_secs),
        }
    }
}

/// Typed map of per-`OperationType` parameters — deliberately not a
/// `HashMap<String, _>` lookup.
#[derive(Debug, Clone)]
pub struct OperationConfigMap {
    discovery: OperationConfig,
    get: OperationConfig,
    walk: OperationConfig,
    table: OperationConfig,
    bulk: OperationConfig,
}

impl OperationConfigMap {
    pub fn get(&self, operation_type: OperationType) -> OperationConfig {
        match operation_type {
            OperationType::Discovery => self.discovery,
            OperationType::Get => self.get,
            OperationType::Walk => self.walk,
            OperationType::Table => self.table,
            OperationType::Bulk => self.bulk,
        }
    }
}

impl Default for OperationConfigMap {
    fn default() -> Self {
        Self {
            discovery: OperationConfig::new(10, 0, 0),
            get: OperationConfig::new(5, 2, 120),
            walk: OperationConfig::new(15, 2, 120),
            table: OperationConfig::new(20, 2, 120),
            bulk: OperationConfig::new(30, 1, 180),
        }
    }
}

/// Process-wide configuration, reloadable at the top of every scheduler
/// tick. Nothing here is cached for the process lifetime.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub max_executions_per_minute: u32,
    pub pool_size: usize,
    pub pool_queue_capacity_factor: usize,
    pub tick_interval: Duration,
    pub operation_configs: OperationConfigMap,
    pub execution_wall_clock_ceiling: Duration,
    pub olt_lock_timeout: Duration,
    pub shutdown_grace: Duration,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl AppConfig {
    /// Loads configuration from environment variables, reading a local
    /// `.env` file first if one is present (development convenience only).
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let max_executions_per_minute = env::var("MAX_EXECUTIONS_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6);

        let pool_size = env::var("POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let pool_queue_capacity_factor = env::var("POOL_QUEUE_CAPACITY_FACTOR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        let tick_interval_secs: u64 = env::var("TICK_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let wall_clock_ceiling_secs: u64 = env::var("EXECUTION_WALL_CLOCK_CEILING_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(180);

        let olt_lock_timeout_secs: u64 = env::var("OLT_LOCK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let shutdown_grace_secs: u64 = env::var("SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let log_format = match env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };

        Ok(Self {
            database_url,
            bind_addr,
            max_executions_per_minute,
            pool_size,
            pool_queue_capacity_factor,
            tick_interval: Duration::from_secs(tick_interval_secs),
            operation_configs: OperationConfigMap::default(),
            execution_wall_clock_ceiling: Duration::from_secs(wall_clock_ceiling_secs),
            olt_lock_timeout: Duration::from_secs(olt_lock_timeout_secs),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            log_format,
        })
    }
}

/// Shared, reloadable handle to the running configuration. The scheduler
/// reads through this at the top of every tick rather than caching a copy.
pub type SharedConfig = Arc<RwLock<AppConfig>>;

pub fn shared(config: AppConfig) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_config_defaults_match_spec() {
        let map = OperationConfigMap::default();
        let discovery = map.get(OperationType::Discovery);
        assert_eq!(discovery.timeout, Duration::from_secs(10));
        assert_eq!(discovery.max_retries, 0);

        let get = map.get(OperationType::Get);
        assert_eq!(get.timeout, Duration::from_secs(5));
        assert_eq!(get.max_retries, 2);
        assert_eq!(get.retry_delay, Duration::from_secs(120));
    }
}
