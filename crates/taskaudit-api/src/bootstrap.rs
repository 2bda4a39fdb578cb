//! Service wiring for the API server
//!
//! Builds the database client, embedding service, scheduler and upload
//! assembler once, in dependency order, and serves the router until a
//! shutdown signal arrives.

use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use taskaudit_config::{ApplicationConfig, UploadConfig};
use taskaudit_embeddings::{DefaultEmbeddingService, EmbeddingService};
use taskaudit_ingestion::{InMemoryPayloadCache, JobScheduler, PipelineStore};
use taskaudit_meta_data::DataClient;
use taskaudit_upload::UploadAssembler;
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::create_router;
use crate::state::AppState;

/// Headroom for JSON framing around an inline payload
const BODY_LIMIT_SLACK: u64 = 64 * 1024;

/// Connect to Postgres, applying migrations when configured
///
/// # Errors
///
/// Returns an error if the connection or a migration fails
pub async fn setup_database(config: &ApplicationConfig) -> anyhow::Result<Arc<DataClient>> {
    info!("Initializing database connection pool...");
    let client = DataClient::initialize(&config.database)
        .await
        .context("Failed to initialize database")?;
    Ok(Arc::new(client))
}

/// # Errors
///
/// Returns an error if the provider HTTP client cannot be built
pub fn setup_embedding_service(
    config: &ApplicationConfig,
) -> anyhow::Result<Arc<dyn EmbeddingService>> {
    info!(
        provider = %config.embedding.provider_url,
        model = %config.embedding.model,
        "Initializing embedding service..."
    );
    let service =
        DefaultEmbeddingService::new(&config.embedding).context("Failed to build embedding service")?;
    Ok(Arc::new(service))
}

/// Scheduler over the Postgres stores with a fresh in-memory payload cache
///
/// # Errors
///
/// Returns an error if the scheduler's HTTP client cannot be built
pub fn setup_scheduler(
    config: &ApplicationConfig,
    db_client: &DataClient,
    embeddings: Arc<dyn EmbeddingService>,
) -> anyhow::Result<JobScheduler> {
    let store: Arc<dyn PipelineStore> = Arc::new(db_client.repository().clone());
    JobScheduler::new(
        store,
        embeddings,
        Arc::new(InMemoryPayloadCache::new()),
        &config.ingestion,
    )
    .context("Failed to build job scheduler")
}

/// Largest request body the server accepts
pub fn body_limit(config: &UploadConfig) -> usize {
    let largest = config
        .chunk_size_bytes
        .max(config.chunked_threshold_bytes)
        .saturating_add(BODY_LIMIT_SLACK);
    usize::try_from(largest).unwrap_or(usize::MAX)
}

/// Build every service and recover jobs left over from the last run
///
/// # Errors
///
/// Returns an error if any service fails to initialize or recovery cannot
/// read the job store
pub async fn initialize_app_state(config: &ApplicationConfig) -> anyhow::Result<AppState> {
    let db_client = setup_database(config).await?;
    let embeddings = setup_embedding_service(config)?;
    let scheduler = setup_scheduler(config, &db_client, embeddings)?;

    let report = scheduler
        .recover()
        .await
        .context("Failed to recover unfinished jobs")?;
    info!(
        partitions = report.partitions,
        resumed_vectorization = report.resumed_vectorization,
        "Recovered unfinished jobs"
    );

    let assembler = Arc::new(UploadAssembler::from_config(&config.upload));
    info!("Application state initialized successfully");
    Ok(AppState::new(scheduler, assembler).with_pools(db_client.pools().clone()))
}

/// Serve until `shutdown` resolves, then stop the scheduler and close the pools
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    body_limit: usize,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let scheduler = state.scheduler.clone();
    let pools = state.pools.clone();
    let app = create_router(state, body_limit);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Taskaudit API listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server failed")?;

    scheduler.shutdown().await;
    if let Some(pools) = pools {
        pools.close().await;
        info!("Database pools closed");
    }
    Ok(())
}
