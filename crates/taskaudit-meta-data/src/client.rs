//! Database client combining pool manager and repository

use anyhow::Result;
use taskaudit_config::DatabaseConfig;

use crate::migrations::run_migrations;
use crate::pool_manager::{PoolConfig, PoolManager};
use crate::repository::DbRepository;

/// Database client combining pool manager and repository
pub struct DataClient {
    pools: PoolManager,
    repository: DbRepository,
}

impl DataClient {
    /// Create new data client from pool manager
    pub fn new(pools: PoolManager) -> Self {
        let repository = DbRepository::new(pools.clone());
        Self { pools, repository }
    }

    /// Connect both pools and, when `auto_migrate` is set, apply migrations
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Database connection fails
    /// - Pool creation fails due to invalid configuration
    /// - A migration cannot be applied
    pub async fn initialize(config: &DatabaseConfig) -> Result<Self> {
        let pools = PoolManager::new(config, PoolConfig::from(config)).await?;
        if config.auto_migrate {
            run_migrations(pools.write_pool()).await?;
        }
        tracing::info!(
            database = %config.safe_connection_string(),
            "Connected to database"
        );
        Ok(Self::new(pools))
    }

    /// Get repository for database operations
    pub const fn repository(&self) -> &DbRepository {
        &self.repository
    }

    /// Get pool manager
    pub const fn pools(&self) -> &PoolManager {
        &self.pools
    }
}
