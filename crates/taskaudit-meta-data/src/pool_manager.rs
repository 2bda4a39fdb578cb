//! Connection pool management with read/write separation
//!
//! The pipeline writes records and counters continuously while status polls
//! read the same job rows, so reads get their own pool.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use taskaudit_config::DatabaseConfig;

/// Extension trait for saturating cast from usize to u32
trait SaturatingCast {
    fn saturating_cast(self) -> u32;
}

impl SaturatingCast for usize {
    fn saturating_cast(self) -> u32 {
        u32::try_from(self).unwrap_or(u32::MAX)
    }
}

/// Configuration for connection pools
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections for write pool
    pub write_pool_size: u32,
    /// Maximum connections for read pool
    pub read_pool_size: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Idle timeout in seconds
    pub idle_timeout: u64,
    /// Maximum lifetime in seconds
    pub max_lifetime: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            write_pool_size: 10,
            read_pool_size: 10,
            connect_timeout: 30,
            idle_timeout: 600,
            max_lifetime: 1800,
        }
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            write_pool_size: config.max_connections,
            read_pool_size: config.max_connections,
            connect_timeout: config.timeout_seconds,
            idle_timeout: config.idle_timeout_seconds,
            ..Self::default()
        }
    }
}

/// Manages the write and read connection pools
#[derive(Clone)]
#[allow(clippy::struct_field_names)]
pub struct PoolManager {
    /// Pool for inserts, counter updates and status transitions
    write_pool: PgPool,
    /// Pool for status polls and lookups
    read_pool: PgPool,
}

impl PoolManager {
    /// Create a new pool manager with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Database URL is malformed or contains invalid parameters
    /// - Database server is unreachable or refuses connections
    /// - Authentication fails due to invalid credentials
    /// - Connection timeout is exceeded for either pool
    pub async fn new(db_config: &DatabaseConfig, config: PoolConfig) -> Result<Self> {
        let base_options = db_config
            .connect_options()
            .context("Invalid database connection options")?
            .application_name("taskaudit");

        let write_pool = PgPoolOptions::new()
            .max_connections(config.write_pool_size)
            .min_connections(db_config.min_connections.min(config.write_pool_size))
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .max_lifetime(Duration::from_secs(config.max_lifetime))
            .connect_with(base_options.clone())
            .await
            .context("Failed to create write pool")?;

        let read_pool = PgPoolOptions::new()
            .max_connections(config.read_pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .max_lifetime(Duration::from_secs(config.max_lifetime))
            .connect_with(base_options)
            .await
            .context("Failed to create read pool")?;

        Ok(Self {
            write_pool,
            read_pool,
        })
    }

    /// Use one existing pool for both reads and writes (tests, small deployments)
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            write_pool: pool.clone(),
            read_pool: pool,
        }
    }

    /// Get the write pool
    pub const fn write_pool(&self) -> &PgPool {
        &self.write_pool
    }

    /// Get the read pool
    pub const fn read_pool(&self) -> &PgPool {
        &self.read_pool
    }

    /// Create from `TASKAUDIT_DATABASE_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails (see `new` method errors)
    pub async fn from_env() -> Result<Self> {
        let db_config = DatabaseConfig::from_env();
        Self::new(&db_config, PoolConfig::from(&db_config)).await
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            write_pool: ConnectionStats {
                size: self.write_pool.size(),
                idle: self.write_pool.num_idle().saturating_cast(),
                max: self.write_pool.options().get_max_connections(),
            },
            read_pool: ConnectionStats {
                size: self.read_pool.size(),
                idle: self.read_pool.num_idle().saturating_cast(),
                max: self.read_pool.options().get_max_connections(),
            },
        }
    }

    /// Close all pools
    pub async fn close(&self) {
        self.write_pool.close().await;
        self.read_pool.close().await;
    }
}

/// Statistics for a connection pool
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// Current number of connections
    pub size: u32,
    /// Number of idle connections
    pub idle: u32,
    /// Maximum connections allowed
    pub max: u32,
}

/// Combined statistics for both pools
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub write_pool: ConnectionStats,
    pub read_pool: ConnectionStats,
}

impl PoolStats {
    /// Get total connections across all pools
    pub const fn total_connections(&self) -> u32 {
        self.write_pool.size.saturating_add(self.read_pool.size)
    }

    /// Get total idle connections
    pub const fn total_idle(&self) -> u32 {
        self.write_pool.idle.saturating_add(self.read_pool.idle)
    }

    /// Get utilization percentage
    #[allow(clippy::cast_precision_loss)] // Acceptable precision loss for utilization percentage
    pub fn utilization(&self) -> f32 {
        let total = self.total_connections() as f32;
        let idle = self.total_idle() as f32;
        if total > 0.0 {
            ((total - idle) / total) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_follows_database_config() {
        let db = DatabaseConfig {
            max_connections: 7,
            timeout_seconds: 12,
            ..DatabaseConfig::default()
        };
        let config = PoolConfig::from(&db);
        assert_eq!(config.write_pool_size, 7);
        assert_eq!(config.read_pool_size, 7);
        assert_eq!(config.connect_timeout, 12);
    }

    #[tokio::test]
    async fn test_close_shuts_both_pools() {
        let options = DatabaseConfig::default().connect_options().unwrap_or_default();
        let pools = PoolManager::from_pool(PgPoolOptions::new().connect_lazy_with(options));
        assert_eq!(pools.stats().total_connections(), 0);

        pools.close().await;
        assert!(pools.write_pool().is_closed());
        assert!(pools.read_pool().is_closed());
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            write_pool: ConnectionStats {
                size: 5,
                idle: 2,
                max: 10,
            },
            read_pool: ConnectionStats {
                size: 5,
                idle: 3,
                max: 10,
            },
        };

        assert_eq!(stats.total_connections(), 10);
        assert_eq!(stats.total_idle(), 5);
        assert!((stats.utilization() - 50.0).abs() < 0.1);
    }
}
