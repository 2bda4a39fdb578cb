//! Taskaudit job and record stores on `PostgreSQL`

pub mod client;
pub mod error;
pub mod migrations;
pub mod mock;
pub mod models;
pub mod pool_manager;
pub mod repository;
pub mod traits;

pub use client::DataClient;
pub use error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
pub use migrations::{initialize_database, run_migrations};
pub use mock::MockRepository;
pub use models::*;
pub use pool_manager::{PoolConfig, PoolManager};
pub use repository::DbRepository;
pub use taskaudit_config::DatabaseConfig;
pub use traits::{JobRepository, RecordRepository};
