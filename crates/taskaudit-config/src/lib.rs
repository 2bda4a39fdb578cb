//! Centralized configuration management for taskaudit
//!
//! Configuration follows a simple hierarchy:
//! 1. Safe defaults (defined as constants)
//! 2. Optional TOML file (see [`source::ConfigurationLoader`])
//! 3. Environment variable overrides (`TASKAUDIT_*`)
//! 4. Runtime validation

pub mod error;
pub mod source;
pub mod validation;

pub use error::{ConfigError, ConfigResult};

use serde::{Deserialize, Serialize};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
};
use std::str::FromStr;
use std::time::Duration;
use validation::Validate;

// =============================================================================
// SAFE DEFAULTS - Work for any environment (dev, staging, prod, test)
// =============================================================================

// Database Configuration (safe local defaults)
const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_DB_NAME: &str = "taskaudit";
const DEFAULT_DB_USER: &str = "taskaudit";
const DEFAULT_DB_PASSWORD: &str = "localdev123";
const DEFAULT_DB_SSL_MODE: &str = "disable";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_DB_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_DB_IDLE_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_AUTO_MIGRATE: bool = true;

// Embedding provider (OpenAI-compatible `/embeddings` endpoint)
const DEFAULT_EMBEDDING_PROVIDER_URL: &str = "http://localhost:11434/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
const DEFAULT_EMBEDDING_REQUEST_BATCH_SIZE: usize = 50;
const DEFAULT_EMBEDDING_TIMEOUT_SECONDS: u64 = 30; // Bounds a stuck provider call

// Ingestion pipeline
const DEFAULT_INGESTION_CHUNK_SIZE: usize = 100;
const DEFAULT_VECTOR_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_EMBEDDING_RETRIES: u32 = 3;
const DEFAULT_EMPTY_BATCH_BACKOFF_MS: u64 = 2000;
const DEFAULT_MIN_CONTENT_LENGTH: usize = 3;
const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_ENDPOINT_TIMEOUT_SECONDS: u64 = 60;

// Chunked uploads
const DEFAULT_UPLOAD_SERVER_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_UPLOAD_CHUNK_SIZE_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_UPLOAD_CHUNKED_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024;
const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_UPLOAD_RETRY_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_UPLOAD_MAX_SESSION_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_UPLOAD_MAX_SESSIONS: usize = 64;
const DEFAULT_UPLOAD_SESSION_TTL_SECONDS: u64 = 900;

// Telemetry Configuration
const DEFAULT_TRACING_LEVEL: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "pretty";
const DEFAULT_SERVICE_NAME: &str = "taskaudit";

/// Read and parse an environment variable, ignoring unparsable values
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Read a non-empty environment variable
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Core configuration for the whole taskaudit application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Vector generator configuration
    pub embedding: EmbeddingConfig,

    /// Phase 1 / Phase 2 pipeline tuning
    pub ingestion: IngestionConfig,

    /// Chunked upload client/assembler configuration
    pub upload: UploadConfig,

    /// Logging configuration
    pub telemetry: TelemetryConfig,
}

impl ApplicationConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Overlay `TASKAUDIT_*` environment variables on top of current values
    pub fn apply_env_overrides(&mut self) {
        self.database.apply_env_overrides();
        self.embedding.apply_env_overrides();
        self.ingestion.apply_env_overrides();
        self.upload.apply_env_overrides();
        self.telemetry.apply_env_overrides();
    }
}

impl Validate for ApplicationConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.database.validate()?;
        self.embedding.validate()?;
        self.ingestion.validate()?;
        self.upload.validate()?;
        self.telemetry.validate()?;

        // Cross-field validation - uploads are only chunked above the chunk size
        if self.upload.chunked_threshold_bytes < self.upload.chunk_size_bytes {
            return Err(ConfigError::Generic {
                message: format!(
                    "upload.chunked_threshold_bytes ({}) must be >= upload.chunk_size_bytes ({})",
                    self.upload.chunked_threshold_bytes, self.upload.chunk_size_bytes
                ),
            });
        }

        Ok(())
    }
}

/// Database configuration - `PostgreSQL` connection and pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection string; takes precedence over the individual fields
    pub url: Option<String>,

    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Database name
    pub database: String,

    /// Username for authentication
    pub username: String,

    /// Password for authentication (use environment variables for security)
    #[serde(skip_serializing)]
    pub password: String,

    /// SSL mode for connections ("disable", "prefer", "require")
    pub ssl_mode: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,

    /// Minimum number of connections in pool
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub timeout_seconds: u64,

    /// Idle timeout in seconds
    pub idle_timeout_seconds: u64,

    /// Run migrations on startup
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            database: DEFAULT_DB_NAME.to_string(),
            username: DEFAULT_DB_USER.to_string(),
            password: DEFAULT_DB_PASSWORD.to_string(),
            ssl_mode: DEFAULT_DB_SSL_MODE.to_string(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            timeout_seconds: DEFAULT_DB_TIMEOUT_SECONDS,
            idle_timeout_seconds: DEFAULT_DB_IDLE_TIMEOUT_SECONDS,
            auto_migrate: DEFAULT_AUTO_MIGRATE,
        }
    }
}

impl DatabaseConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_string("TASKAUDIT_DATABASE_URL") {
            self.url = Some(url);
        }
        if let Some(host) = env_string("TASKAUDIT_DATABASE_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse("TASKAUDIT_DATABASE_PORT") {
            self.port = port;
        }
        if let Some(database) = env_string("TASKAUDIT_DATABASE_NAME") {
            self.database = database;
        }
        if let Some(username) = env_string("TASKAUDIT_DATABASE_USERNAME") {
            self.username = username;
        }
        match env_string("TASKAUDIT_DATABASE_PASSWORD") {
            Some(password) => self.password = password,
            None if self.url.is_none() && self.password == DEFAULT_DB_PASSWORD => {
                tracing::warn!(
                    "Using default database password - set TASKAUDIT_DATABASE_PASSWORD. NEVER use the default password in production!"
                );
            }
            None => {}
        }
        if let Some(ssl_mode) = env_string("TASKAUDIT_DATABASE_SSL_MODE") {
            self.ssl_mode = ssl_mode;
        }
        if let Some(max) = env_parse("TASKAUDIT_DATABASE_MAX_CONNECTIONS") {
            self.max_connections = max;
        }
        if let Some(min) = env_parse("TASKAUDIT_DATABASE_MIN_CONNECTIONS") {
            self.min_connections = min;
        }
        if let Some(timeout) = env_parse("TASKAUDIT_DATABASE_TIMEOUT_SECONDS") {
            self.timeout_seconds = timeout;
        }
        if let Some(idle) = env_parse("TASKAUDIT_DATABASE_IDLE_TIMEOUT_SECONDS") {
            self.idle_timeout_seconds = idle;
        }
        if let Some(auto_migrate) = env_parse("TASKAUDIT_DATABASE_AUTO_MIGRATE") {
            self.auto_migrate = auto_migrate;
        }
    }

    /// Convert string SSL mode to `PgSslMode`
    fn parse_ssl_mode(&self) -> PgSslMode {
        match self.ssl_mode.as_str() {
            "disable" => PgSslMode::Disable,
            "require" => PgSslMode::Require,
            _ => PgSslMode::Prefer,
        }
    }

    /// Build `PostgreSQL` connection options
    ///
    /// # Errors
    /// Returns an error if `url` is set but is not a valid connection string
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url);
        }

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
            .ssl_mode(self.parse_ssl_mode()))
    }

    /// Create a `PostgreSQL` connection pool with proper configuration
    ///
    /// # Errors
    /// Returns an error if the options are invalid or connecting fails
    pub async fn create_pool(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.timeout_seconds))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds))
            .connect_with(self.connect_options()?)
            .await
    }

    /// Get connection info for logging (NO PASSWORD!)
    pub fn safe_connection_string(&self) -> String {
        if self.url.is_some() {
            return "<connection url from TASKAUDIT_DATABASE_URL>".to_string();
        }
        format!(
            "{}@{}:{}/{} (ssl: {})",
            self.username, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.url.is_none() {
            validation::validate_non_empty(&self.host, "database.host")?;
            validation::validate_port(self.port)?;
            validation::validate_non_empty(&self.database, "database.database")?;
        }
        validation::validate_range(
            u64::from(self.max_connections),
            1,
            1000,
            "database.max_connections",
        )?;
        validation::validate_range(
            u64::from(self.min_connections),
            0,
            u64::from(self.max_connections),
            "database.min_connections",
        )?;
        validation::validate_range(self.timeout_seconds, 1, 3600, "database.timeout_seconds")?;
        Ok(())
    }
}

/// Vector generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API (the `/embeddings` path is appended)
    pub provider_url: String,

    /// Model identifier sent with each request
    pub model: String,

    /// Bearer token, if the provider requires one
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Expected embedding dimensions (informational; checked on responses)
    pub dimensions: usize,

    /// Maximum texts per provider request
    pub request_batch_size: usize,

    /// Timeout for a single provider request; a timed out batch counts as a full failure
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider_url: DEFAULT_EMBEDDING_PROVIDER_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key: None,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            request_batch_size: DEFAULT_EMBEDDING_REQUEST_BATCH_SIZE,
            timeout_seconds: DEFAULT_EMBEDDING_TIMEOUT_SECONDS,
        }
    }
}

impl EmbeddingConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_string("TASKAUDIT_EMBEDDING_PROVIDER_URL") {
            self.provider_url = url;
        }
        if let Some(model) = env_string("TASKAUDIT_EMBEDDING_MODEL") {
            self.model = model;
        }
        if let Some(key) = env_string("TASKAUDIT_EMBEDDING_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(dimensions) = env_parse("TASKAUDIT_EMBEDDING_DIMENSIONS") {
            self.dimensions = dimensions;
        }
        if let Some(batch) = env_parse("TASKAUDIT_EMBEDDING_REQUEST_BATCH_SIZE") {
            self.request_batch_size = batch;
        }
        if let Some(timeout) = env_parse("TASKAUDIT_EMBEDDING_TIMEOUT_SECONDS") {
            self.timeout_seconds = timeout;
        }
    }

    /// Request timeout as a `Duration`
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Validate for EmbeddingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_url(&self.provider_url, "embedding.provider_url")?;
        validation::validate_non_empty(&self.model, "embedding.model")?;
        validation::validate_range(self.dimensions as u64, 1, 65_536, "embedding.dimensions")?;
        validation::validate_range(
            self.request_batch_size as u64,
            1,
            2048,
            "embedding.request_batch_size",
        )?;
        validation::validate_range(self.timeout_seconds, 1, 600, "embedding.timeout_seconds")?;
        Ok(())
    }
}

/// Ingestion pipeline configuration (Phase 1 loading and Phase 2 vectorizing)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Rows per Phase 1 batch (progress checkpoint + cancellation check)
    pub chunk_size: usize,

    /// Records fetched per Phase 2 scan iteration
    pub vector_batch_size: usize,

    /// Failed embedding attempts tolerated before a record is permanently marked
    pub max_embedding_retries: u32,

    /// Pause after a Phase 2 batch with zero successes
    pub empty_batch_backoff_ms: u64,

    /// Minimum trimmed length for a well-known content field to be accepted
    pub min_content_length: usize,

    /// Largest raw payload accepted for a single job
    pub max_payload_bytes: u64,

    /// Timeout when fetching rows from an endpoint payload
    pub endpoint_timeout_seconds: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_INGESTION_CHUNK_SIZE,
            vector_batch_size: DEFAULT_VECTOR_BATCH_SIZE,
            max_embedding_retries: DEFAULT_MAX_EMBEDDING_RETRIES,
            empty_batch_backoff_ms: DEFAULT_EMPTY_BATCH_BACKOFF_MS,
            min_content_length: DEFAULT_MIN_CONTENT_LENGTH,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            endpoint_timeout_seconds: DEFAULT_ENDPOINT_TIMEOUT_SECONDS,
        }
    }
}

impl IngestionConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(size) = env_parse("TASKAUDIT_INGESTION_CHUNK_SIZE") {
            self.chunk_size = size;
        }
        if let Some(size) = env_parse("TASKAUDIT_INGESTION_VECTOR_BATCH_SIZE") {
            self.vector_batch_size = size;
        }
        if let Some(retries) = env_parse("TASKAUDIT_INGESTION_MAX_EMBEDDING_RETRIES") {
            self.max_embedding_retries = retries;
        }
        if let Some(backoff) = env_parse("TASKAUDIT_INGESTION_EMPTY_BATCH_BACKOFF_MS") {
            self.empty_batch_backoff_ms = backoff;
        }
        if let Some(min) = env_parse("TASKAUDIT_INGESTION_MIN_CONTENT_LENGTH") {
            self.min_content_length = min;
        }
        if let Some(max) = env_parse("TASKAUDIT_INGESTION_MAX_PAYLOAD_BYTES") {
            self.max_payload_bytes = max;
        }
        if let Some(timeout) = env_parse("TASKAUDIT_INGESTION_ENDPOINT_TIMEOUT_SECONDS") {
            self.endpoint_timeout_seconds = timeout;
        }
    }

    /// Backoff after an all-failed Phase 2 batch
    pub const fn empty_batch_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_batch_backoff_ms)
    }
}

impl Validate for IngestionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(self.chunk_size as u64, 1, 10_000, "ingestion.chunk_size")?;
        validation::validate_range(
            self.vector_batch_size as u64,
            1,
            2048,
            "ingestion.vector_batch_size",
        )?;
        validation::validate_range(
            u64::from(self.max_embedding_retries),
            1,
            100,
            "ingestion.max_embedding_retries",
        )?;
        validation::validate_range(
            self.empty_batch_backoff_ms,
            0,
            600_000,
            "ingestion.empty_batch_backoff_ms",
        )?;
        validation::validate_range(
            self.max_payload_bytes,
            1,
            u64::MAX,
            "ingestion.max_payload_bytes",
        )?;
        validation::validate_range(
            self.endpoint_timeout_seconds,
            1,
            3600,
            "ingestion.endpoint_timeout_seconds",
        )?;
        Ok(())
    }
}

/// Chunked upload configuration, shared by the client and the server-side assembler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Base URL of the ingestion server the client uploads to
    pub server_url: String,

    /// Size of each uploaded byte range
    pub chunk_size_bytes: u64,

    /// Payloads at or above this size are uploaded in chunks
    pub chunked_threshold_bytes: u64,

    /// Attempts per chunk before the upload is aborted
    pub max_attempts: u32,

    /// Linear backoff unit: attempt `n` waits `n * retry_base_delay_ms`
    pub retry_base_delay_ms: u64,

    /// Upper bound of bytes the assembler buffers for one session
    pub max_session_bytes: u64,

    /// Upload sessions the assembler keeps open at once
    pub max_sessions: usize,

    /// Sessions without a new chunk for this long are dropped
    pub session_ttl_seconds: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_UPLOAD_SERVER_URL.to_string(),
            chunk_size_bytes: DEFAULT_UPLOAD_CHUNK_SIZE_BYTES,
            chunked_threshold_bytes: DEFAULT_UPLOAD_CHUNKED_THRESHOLD_BYTES,
            max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_UPLOAD_RETRY_BASE_DELAY_MS,
            max_session_bytes: DEFAULT_UPLOAD_MAX_SESSION_BYTES,
            max_sessions: DEFAULT_UPLOAD_MAX_SESSIONS,
            session_ttl_seconds: DEFAULT_UPLOAD_SESSION_TTL_SECONDS,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_string("TASKAUDIT_UPLOAD_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(size) = env_parse("TASKAUDIT_UPLOAD_CHUNK_SIZE_BYTES") {
            self.chunk_size_bytes = size;
        }
        if let Some(threshold) = env_parse("TASKAUDIT_UPLOAD_CHUNKED_THRESHOLD_BYTES") {
            self.chunked_threshold_bytes = threshold;
        }
        if let Some(attempts) = env_parse("TASKAUDIT_UPLOAD_MAX_ATTEMPTS") {
            self.max_attempts = attempts;
        }
        if let Some(delay) = env_parse("TASKAUDIT_UPLOAD_RETRY_BASE_DELAY_MS") {
            self.retry_base_delay_ms = delay;
        }
        if let Some(max) = env_parse("TASKAUDIT_UPLOAD_MAX_SESSION_BYTES") {
            self.max_session_bytes = max;
        }
        if let Some(max) = env_parse("TASKAUDIT_UPLOAD_MAX_SESSIONS") {
            self.max_sessions = max;
        }
        if let Some(ttl) = env_parse("TASKAUDIT_UPLOAD_SESSION_TTL_SECONDS") {
            self.session_ttl_seconds = ttl;
        }
    }

    /// Idle time after which an upload session is dropped
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }
}

impl Validate for UploadConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_url(&self.server_url, "upload.server_url")?;
        validation::validate_range(
            self.chunk_size_bytes,
            1024,
            1024 * 1024 * 1024,
            "upload.chunk_size_bytes",
        )?;
        validation::validate_range(u64::from(self.max_attempts), 1, 20, "upload.max_attempts")?;
        validation::validate_range(
            self.max_session_bytes,
            self.chunk_size_bytes,
            u64::MAX,
            "upload.max_session_bytes",
        )?;
        validation::validate_range(self.max_sessions as u64, 1, 10_000, "upload.max_sessions")?;
        validation::validate_range(
            self.session_ttl_seconds,
            1,
            86_400,
            "upload.session_ttl_seconds",
        )?;
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Tracing level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub tracing_level: String,

    /// "pretty" or "json"
    pub log_format: String,

    /// Directory for daily rotated log files; stderr only when unset
    pub log_dir: Option<String>,

    /// Service name attached to log files
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tracing_level: DEFAULT_TRACING_LEVEL.to_string(),
            log_format: DEFAULT_LOG_FORMAT.to_string(),
            log_dir: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(level) = env_string("TASKAUDIT_TELEMETRY_TRACING_LEVEL") {
            self.tracing_level = level;
        }
        if let Some(format) = env_string("TASKAUDIT_TELEMETRY_LOG_FORMAT") {
            self.log_format = format;
        }
        if let Some(dir) = env_string("TASKAUDIT_TELEMETRY_LOG_DIR") {
            self.log_dir = Some(dir);
        }
        if let Some(name) = env_string("TASKAUDIT_TELEMETRY_SERVICE_NAME") {
            self.service_name = name;
        }
    }
}

impl Validate for TelemetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_non_empty(&self.service_name, "telemetry.service_name")?;

        match self.log_format.to_lowercase().as_str() {
            "pretty" | "text" | "json" => {}
            _ => {
                return Err(ConfigError::Generic {
                    message: format!("Invalid log format: {}", self.log_format),
                });
            }
        }

        match self.tracing_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(ConfigError::Generic {
                message: format!("Invalid tracing level: {}", self.tracing_level),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ApplicationConfig::default();
        let result = config.validate();
        assert!(result.is_ok(), "defaults should validate: {result:?}");
    }

    #[test]
    fn test_pipeline_defaults() {
        let config = IngestionConfig::default();
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.vector_batch_size, 50);
        assert_eq!(config.max_embedding_retries, 3);
        assert_eq!(config.empty_batch_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let mut config = ApplicationConfig::default();
        config.ingestion.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_provider_url_is_rejected() {
        let mut config = ApplicationConfig::default();
        config.embedding.provider_url = "not-a-url".to_string();
        let err = config.validate();
        assert!(err.is_err());
        if let Err(e) = err {
            assert!(e.to_string().contains("embedding.provider_url"));
        }
    }

    #[test]
    fn test_threshold_below_chunk_size_is_rejected() {
        let mut config = ApplicationConfig::default();
        config.upload.chunk_size_bytes = 8 * 1024 * 1024;
        config.upload.chunked_threshold_bytes = 1024 * 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_session_limits() {
        let config = UploadConfig::default();
        assert_eq!(config.max_sessions, 64);
        assert_eq!(config.session_ttl(), Duration::from_secs(900));

        let mut config = ApplicationConfig::default();
        config.upload.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_tracing_level_is_rejected() {
        let mut config = ApplicationConfig::default();
        config.telemetry.tracing_level = "loud".to_string();
        let err = config.validate();
        assert!(err.is_err());
        if let Err(e) = err {
            assert!(e.to_string().contains("Invalid tracing level"));
        }
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut config = ApplicationConfig::default();
        config.embedding.api_key = Some("sk-secret".to_string());
        let toml_string = toml::to_string(&config).unwrap_or_default();
        assert!(toml_string.contains("[ingestion]"));
        assert!(!toml_string.contains("sk-secret"));
        assert!(!toml_string.contains(DEFAULT_DB_PASSWORD));
    }

    #[test]
    fn test_safe_connection_string_hides_password() {
        let config = DatabaseConfig::default();
        let safe = config.safe_connection_string();
        assert!(safe.contains("taskaudit@localhost:5432"));
        assert!(!safe.contains(DEFAULT_DB_PASSWORD));
    }

    #[test]
    fn test_url_takes_precedence_for_connect_options() {
        let config = DatabaseConfig {
            url: Some("postgres://u:p@db.internal:6543/other".to_string()),
            ..DatabaseConfig::default()
        };
        let options = config.connect_options();
        assert!(options.is_ok());
        if let Ok(options) = options {
            assert_eq!(options.get_host(), "db.internal");
            assert_eq!(options.get_port(), 6543);
        }
    }
}
