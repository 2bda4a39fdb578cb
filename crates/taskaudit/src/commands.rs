//! Subcommand handlers

use anyhow::{Context, bail};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use taskaudit_api::bootstrap;
use taskaudit_config::ApplicationConfig;
use taskaudit_ingestion::{
    EndpointSource, IngestionJob, IngestionOptions, IngestionPayload, JobScheduler, JobStatus,
};
use taskaudit_upload::{ChunkedUploader, PayloadFormat, UploadMetadata};
use tracing::info;

use crate::{Command, FormatArg, JobTarget};

const JOB_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run(command: Command, config: &ApplicationConfig) -> anyhow::Result<()> {
    match command {
        Command::Serve { bind } => serve(config, &bind).await,
        Command::Migrate => migrate(config).await,
        Command::Ingest {
            target,
            file,
            format,
            endpoint,
            pointer,
            headers,
        } => {
            let payload = match (file, endpoint) {
                (Some(path), _) => read_payload(&path, format).await?,
                (None, Some(url)) => IngestionPayload::Endpoint(EndpointSource {
                    url,
                    headers: headers.into_iter().collect::<BTreeMap<_, _>>(),
                    pointer,
                }),
                (None, None) => bail!("Either --file or --endpoint is required"),
            };
            ingest(config, payload, &target).await
        }
        Command::Status { job_id } => {
            let scheduler = local_scheduler(config).await?;
            print_json(&scheduler.get_status(&job_id).await?)
        }
        Command::List { project, limit } => {
            let scheduler = local_scheduler(config).await?;
            print_json(&scheduler.list_recent(&project, limit).await?)
        }
        Command::Cancel { job_id } => {
            let scheduler = local_scheduler(config).await?;
            if scheduler.cancel(&job_id).await? {
                println!("Job {job_id} cancelled");
            } else {
                println!("Job {job_id} had already stopped");
            }
            Ok(())
        }
        Command::Delete { job_id } => {
            let scheduler = local_scheduler(config).await?;
            scheduler.delete_job(&job_id).await?;
            println!("Job {job_id} deleted");
            Ok(())
        }
        Command::Upload {
            file,
            target,
            format,
            server,
        } => upload(config, &file, &target, format, server).await,
    }
}

async fn serve(config: &ApplicationConfig, bind: &str) -> anyhow::Result<()> {
    let state = bootstrap::initialize_app_state(config).await?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    bootstrap::serve(
        listener,
        state,
        bootstrap::body_limit(&config.upload),
        shutdown_signal(),
    )
    .await
}

async fn migrate(config: &ApplicationConfig) -> anyhow::Result<()> {
    taskaudit_meta_data::initialize_database(&config.database).await?;
    println!("Migrations applied");
    Ok(())
}

/// Scheduler for one-shot commands; it never recovers other jobs
async fn local_scheduler(config: &ApplicationConfig) -> anyhow::Result<JobScheduler> {
    let db_client = bootstrap::setup_database(config).await?;
    let embeddings = bootstrap::setup_embedding_service(config)?;
    bootstrap::setup_scheduler(config, &db_client, embeddings)
}

fn job_options(target: &JobTarget) -> IngestionOptions {
    let options = IngestionOptions::new(target.project.clone(), target.record_type)
        .with_keywords(target.keywords.iter().cloned())
        .with_embeddings(target.embeddings);
    match &target.source {
        Some(source) => options.with_source(source.clone()),
        None => options,
    }
}

fn payload_format(path: &Path, format: Option<FormatArg>) -> PayloadFormat {
    format.map_or_else(|| PayloadFormat::from_extension(path), PayloadFormat::from)
}

async fn read_payload(path: &Path, format: Option<FormatArg>) -> anyhow::Result<IngestionPayload> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(match payload_format(path, format) {
        PayloadFormat::Csv => IngestionPayload::Csv(text),
        PayloadFormat::Json => IngestionPayload::Json(text),
    })
}

async fn ingest(
    config: &ApplicationConfig,
    payload: IngestionPayload,
    target: &JobTarget,
) -> anyhow::Result<()> {
    let scheduler = local_scheduler(config).await?;
    let job_id = scheduler.enqueue(payload, job_options(target)).await?;
    info!(%job_id, project_id = %target.project, "Ingestion started");

    let job = tokio::select! {
        job = scheduler.wait_for_terminal(&job_id, JOB_POLL_INTERVAL) => job?,
        () = shutdown_signal() => {
            info!(%job_id, "Interrupted, cancelling job");
            scheduler.cancel(&job_id).await?;
            scheduler.wait_for_terminal(&job_id, JOB_POLL_INTERVAL).await?
        }
    };
    scheduler.shutdown().await;

    print_job_summary(&job)
}

async fn upload(
    config: &ApplicationConfig,
    file: &Path,
    target: &JobTarget,
    format: Option<FormatArg>,
    server: Option<String>,
) -> anyhow::Result<()> {
    let mut upload_config = config.upload.clone();
    if let Some(server) = server {
        upload_config.server_url = server;
    }
    let uploader = ChunkedUploader::new(&upload_config)?;
    let metadata = UploadMetadata {
        project_id: target.project.clone(),
        record_type: target.record_type,
        format: payload_format(file, format),
        source: target.source.clone(),
        keywords: target.keywords.clone(),
        generate_embeddings: target.embeddings,
    };

    let receipt = uploader.upload_file(file, &metadata).await?;
    print_json(&receipt)
}

fn print_job_summary(job: &IngestionJob) -> anyhow::Result<()> {
    print_json(job)?;
    if job.status == JobStatus::Failed {
        bail!(
            "Job {} failed: {}",
            job.job_id,
            job.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
