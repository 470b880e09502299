//! Connection pool configuration.

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use revend_core::{DataAccessError, RevendResult};
use serde::Deserialize;
use std::time::Duration;
use tokio_postgres::NoTls;

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout in seconds
    pub timeout_secs: u64,
    /// Rows fetched per cursor round trip
    pub fetch_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 4,
            timeout_secs: 30,
            fetch_size: 500,
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("REVEND_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("REVEND_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("REVEND_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("REVEND_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("REVEND_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("REVEND_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout_secs: std::env::var("REVEND_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            fetch_size: std::env::var("REVEND_DB_FETCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fetch_size),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> RevendResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool = PoolConfig::new(self.max_size.max(1));
        pool.timeouts = Timeouts {
            wait: Some(self.timeout()),
            create: Some(self.timeout()),
            recycle: Some(self.timeout()),
        };
        cfg.pool = Some(pool);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DataAccessError::ConnectionFailed {
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}
