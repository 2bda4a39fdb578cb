//! `PostgreSQL` job and record stores
//!
//! Writes go through the write pool, status polls and lookups through the
//! read pool, so a polling UI never queues behind a loading batch.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult};
use crate::models::{
    BatchProgress, EmbeddingCandidate, IngestionJob, JobStatus, NewJob, NewRecord, Record,
    RecordCounts, RecordType, SkippedDetails,
};
use crate::pool_manager::PoolManager;
use crate::traits::{JobRepository, RecordRepository};

const JOB_COLUMNS: &str = r"
    job_id, project_id, record_type, status, total_records, saved_count, skipped_count,
    skipped_details, embedded_count, embedding_failed_count, error_message,
    generate_embeddings, correlation_id, created_at, updated_at
";

const RECORD_COLUMNS: &str = r"
    id, job_id, project_id, record_type, external_id, metadata, content, category,
    embedding, embedding_state, source, creator_id, creator_name, creator_email,
    created_at, updated_at
";

/// Clamp a `usize` limit into a SQL `BIGINT`
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_column<T>(value: &str, operation: &DatabaseOperation) -> DatabaseResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|message: String| DatabaseError::data_integrity(operation.clone(), message))
}

fn job_from_row(row: &PgRow, operation: &DatabaseOperation) -> DatabaseResult<IngestionJob> {
    let skipped_details: Json<SkippedDetails> = row.get("skipped_details");
    Ok(IngestionJob {
        job_id: row.get("job_id"),
        project_id: row.get("project_id"),
        record_type: parse_column(row.get::<&str, _>("record_type"), operation)?,
        status: parse_column(row.get::<&str, _>("status"), operation)?,
        total_records: row.get("total_records"),
        saved_count: row.get("saved_count"),
        skipped_count: row.get("skipped_count"),
        skipped_details: skipped_details.0,
        embedded_count: row.get("embedded_count"),
        embedding_failed_count: row.get("embedding_failed_count"),
        error_message: row.get("error_message"),
        generate_embeddings: row.get("generate_embeddings"),
        correlation_id: row.get("correlation_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn record_from_row(row: &PgRow, operation: &DatabaseOperation) -> DatabaseResult<Record> {
    let category = row
        .get::<Option<&str>, _>("category")
        .map(|c| parse_column(c, operation))
        .transpose()?;
    Ok(Record {
        id: row.get("id"),
        job_id: row.get("job_id"),
        project_id: row.get("project_id"),
        record_type: parse_column(row.get::<&str, _>("record_type"), operation)?,
        external_id: row.get("external_id"),
        metadata: row.get("metadata"),
        content: row.get("content"),
        category,
        embedding: row.get("embedding"),
        embedding_state: parse_column(row.get::<&str, _>("embedding_state"), operation)?,
        source: row.get("source"),
        creator_id: row.get("creator_id"),
        creator_name: row.get("creator_name"),
        creator_email: row.get("creator_email"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Postgres-backed implementation of both store traits
#[derive(Clone)]
pub struct DbRepository {
    pools: PoolManager,
}

impl DbRepository {
    /// Create new repository over the given pools
    pub const fn new(pools: PoolManager) -> Self {
        Self { pools }
    }

    /// Create from environment
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails (see `PoolManager::from_env`)
    pub async fn from_env() -> std::result::Result<Self, anyhow::Error> {
        let pools = PoolManager::from_env().await?;
        Ok(Self::new(pools))
    }

    /// Underlying pools
    pub const fn pools(&self) -> &PoolManager {
        &self.pools
    }

    async fn fetch_jobs(
        &self,
        sql: &str,
        project_id: &str,
        statuses: &[JobStatus],
        limit: i64,
    ) -> DatabaseResult<Vec<IngestionJob>> {
        let operation = DatabaseOperation::FindJobs {
            project_id: project_id.to_string(),
            status: statuses
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join("|"),
        };
        let status_strings: Vec<String> = statuses.iter().map(ToString::to_string).collect();

        let rows = sqlx::query(sql)
            .bind(project_id)
            .bind(&status_strings)
            .bind(limit)
            .fetch_all(self.pools.read_pool())
            .await
            .map_db_err(operation.clone(), None)?;

        rows.iter().map(|row| job_from_row(row, &operation)).collect()
    }
}

#[async_trait]
impl JobRepository for DbRepository {
    async fn create_job(&self, job: &NewJob) -> DatabaseResult<IngestionJob> {
        let operation = DatabaseOperation::CreateJob {
            project_id: job.project_id.clone(),
        };

        let sql = format!(
            r"
            INSERT INTO ingestion_jobs (
                job_id, project_id, record_type, status, generate_embeddings, correlation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {JOB_COLUMNS}
            "
        );

        let row = sqlx::query(&sql)
            .bind(job.job_id)
            .bind(&job.project_id)
            .bind(job.record_type.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(job.generate_embeddings)
            .bind(job.correlation_id)
            .fetch_one(self.pools.write_pool())
            .await
            .map_db_err(operation.clone(), Some(job.correlation_id.to_string()))?;

        job_from_row(&row, &operation)
    }

    async fn get_job(&self, job_id: &Uuid) -> DatabaseResult<Option<IngestionJob>> {
        let operation = DatabaseOperation::GetJob { job_id: *job_id };
        let sql = format!("SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE job_id = $1");

        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(self.pools.read_pool())
            .await
            .map_db_err(operation.clone(), None)?;

        row.map(|row| job_from_row(&row, &operation)).transpose()
    }

    async fn get_job_status(&self, job_id: &Uuid) -> DatabaseResult<Option<JobStatus>> {
        let operation = DatabaseOperation::GetJob { job_id: *job_id };

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM ingestion_jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(self.pools.read_pool())
                .await
                .map_db_err(operation.clone(), None)?;

        status.map(|s| parse_column(&s, &operation)).transpose()
    }

    async fn transition_job(
        &self,
        job_id: &Uuid,
        from: &[JobStatus],
        to: JobStatus,
        error: Option<&str>,
    ) -> DatabaseResult<bool> {
        let operation = DatabaseOperation::TransitionJob {
            job_id: *job_id,
            to: to.to_string(),
        };
        let from_strings: Vec<String> = from.iter().map(ToString::to_string).collect();

        let result = sqlx::query(
            r"
            UPDATE ingestion_jobs
            SET status = $2,
                error_message = COALESCE($3, error_message),
                updated_at = NOW()
            WHERE job_id = $1 AND status = ANY($4)
            ",
        )
        .bind(job_id)
        .bind(to.as_str())
        .bind(error)
        .bind(&from_strings)
        .execute(self.pools.write_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_total_records(&self, job_id: &Uuid, total: i64) -> DatabaseResult<()> {
        let operation = DatabaseOperation::UpdateJobProgress { job_id: *job_id };

        sqlx::query(
            "UPDATE ingestion_jobs SET total_records = $2, updated_at = NOW() WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(total)
        .execute(self.pools.write_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(())
    }

    async fn record_batch_progress(
        &self,
        job_id: &Uuid,
        progress: &BatchProgress,
    ) -> DatabaseResult<()> {
        let operation = DatabaseOperation::UpdateJobProgress { job_id: *job_id };

        // Counts are summed per reason so concurrent readers never see a reset map
        sqlx::query(
            r"
            UPDATE ingestion_jobs
            SET saved_count = saved_count + $2,
                skipped_count = skipped_count + $3,
                skipped_details = (
                    SELECT COALESCE(jsonb_object_agg(reason, total), '{}'::jsonb)
                    FROM (
                        SELECT merged.key AS reason, SUM(merged.value::BIGINT) AS total
                        FROM (
                            SELECT key, value FROM jsonb_each_text(ingestion_jobs.skipped_details)
                            UNION ALL
                            SELECT key, value FROM jsonb_each_text($4::jsonb)
                        ) AS merged
                        GROUP BY merged.key
                    ) AS sums
                ),
                updated_at = NOW()
            WHERE job_id = $1
            ",
        )
        .bind(job_id)
        .bind(progress.saved)
        .bind(progress.skipped)
        .bind(Json(&progress.skipped_details))
        .execute(self.pools.write_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(())
    }

    async fn record_vector_progress(
        &self,
        job_id: &Uuid,
        embedded: i64,
        failed: i64,
    ) -> DatabaseResult<()> {
        let operation = DatabaseOperation::UpdateJobProgress { job_id: *job_id };

        sqlx::query(
            r"
            UPDATE ingestion_jobs
            SET embedded_count = embedded_count + $2,
                embedding_failed_count = embedding_failed_count + $3,
                updated_at = NOW()
            WHERE job_id = $1
            ",
        )
        .bind(job_id)
        .bind(embedded)
        .bind(failed)
        .execute(self.pools.write_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(())
    }

    async fn find_oldest_pending(&self, project_id: &str) -> DatabaseResult<Option<IngestionJob>> {
        let sql = format!(
            r"
            SELECT {JOB_COLUMNS} FROM ingestion_jobs
            WHERE project_id = $1 AND status = ANY($2)
            ORDER BY created_at ASC, job_id ASC
            LIMIT $3
            "
        );
        let mut jobs = self
            .fetch_jobs(&sql, project_id, &[JobStatus::Pending], 1)
            .await?;
        Ok(jobs.pop())
    }

    async fn find_processing(&self, project_id: &str) -> DatabaseResult<Option<IngestionJob>> {
        let sql = format!(
            r"
            SELECT {JOB_COLUMNS} FROM ingestion_jobs
            WHERE project_id = $1 AND status = ANY($2)
            ORDER BY created_at ASC
            LIMIT $3
            "
        );
        let mut jobs = self
            .fetch_jobs(&sql, project_id, &[JobStatus::Processing], 1)
            .await?;
        Ok(jobs.pop())
    }

    async fn find_jobs_with_status(
        &self,
        project_id: &str,
        statuses: &[JobStatus],
    ) -> DatabaseResult<Vec<IngestionJob>> {
        let sql = format!(
            r"
            SELECT {JOB_COLUMNS} FROM ingestion_jobs
            WHERE project_id = $1 AND status = ANY($2)
            ORDER BY created_at ASC, job_id ASC
            LIMIT $3
            "
        );
        self.fetch_jobs(&sql, project_id, statuses, i64::MAX).await
    }

    async fn list_recent_jobs(
        &self,
        project_id: &str,
        limit: usize,
    ) -> DatabaseResult<Vec<IngestionJob>> {
        let operation = DatabaseOperation::ListJobs {
            project_id: Some(project_id.to_string()),
        };
        let sql = format!(
            r"
            SELECT {JOB_COLUMNS} FROM ingestion_jobs
            WHERE project_id = $1
            ORDER BY created_at DESC, job_id DESC
            LIMIT $2
            "
        );

        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(sql_limit(limit))
            .fetch_all(self.pools.read_pool())
            .await
            .map_db_err(operation.clone(), None)?;

        rows.iter().map(|row| job_from_row(row, &operation)).collect()
    }

    async fn list_active_projects(&self) -> DatabaseResult<Vec<String>> {
        let operation = DatabaseOperation::ListJobs { project_id: None };
        let active: Vec<String> = JobStatus::ACTIVE.iter().map(ToString::to_string).collect();

        sqlx::query_scalar(
            r"
            SELECT DISTINCT project_id FROM ingestion_jobs
            WHERE status = ANY($1)
            ORDER BY project_id
            ",
        )
        .bind(&active)
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)
    }

    async fn delete_job(&self, job_id: &Uuid) -> DatabaseResult<bool> {
        let operation = DatabaseOperation::DeleteJob { job_id: *job_id };

        let mut tx = self
            .pools
            .write_pool()
            .begin()
            .await
            .map_db_err(operation.clone(), None)?;

        let records = sqlx::query("DELETE FROM records WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_db_err(operation.clone(), None)?;

        let jobs = sqlx::query("DELETE FROM ingestion_jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_db_err(operation.clone(), None)?;

        tx.commit().await.map_db_err(operation, None)?;

        tracing::info!(
            job_id = %job_id,
            records_deleted = records.rows_affected(),
            "Deleted ingestion job"
        );
        Ok(jobs.rows_affected() > 0)
    }
}

#[async_trait]
impl RecordRepository for DbRepository {
    async fn create_record(&self, record: &NewRecord) -> DatabaseResult<Record> {
        let operation = DatabaseOperation::CreateRecord {
            project_id: record.project_id.clone(),
        };
        let sql = format!(
            r"
            INSERT INTO records (
                job_id, project_id, record_type, external_id, metadata, content, category,
                source, creator_id, creator_name, creator_email, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {RECORD_COLUMNS}
            "
        );

        let row = sqlx::query(&sql)
            .bind(record.job_id)
            .bind(&record.project_id)
            .bind(record.record_type.as_str())
            .bind(&record.external_id)
            .bind(&record.metadata)
            .bind(&record.content)
            .bind(record.category.map(|c| c.as_str()))
            .bind(&record.source)
            .bind(&record.creator_id)
            .bind(&record.creator_name)
            .bind(&record.creator_email)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(self.pools.write_pool())
            .await
            .map_db_err(operation.clone(), None)?;

        record_from_row(&row, &operation)
    }

    async fn external_id_exists(
        &self,
        project_id: &str,
        record_type: RecordType,
        external_id: &str,
    ) -> DatabaseResult<bool> {
        let operation = DatabaseOperation::LookupExternalIds {
            project_id: project_id.to_string(),
            count: 1,
        };

        sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM records
                WHERE project_id = $1 AND record_type = $2 AND external_id = $3
            )
            ",
        )
        .bind(project_id)
        .bind(record_type.as_str())
        .bind(external_id)
        .fetch_one(self.pools.read_pool())
        .await
        .map_db_err(operation, None)
    }

    async fn fetch_pending_embeddings(
        &self,
        project_id: &str,
        exclude: &[i64],
        limit: usize,
    ) -> DatabaseResult<Vec<EmbeddingCandidate>> {
        let operation = DatabaseOperation::FetchPendingEmbeddings {
            project_id: project_id.to_string(),
            limit,
        };

        let rows = sqlx::query(
            r"
            SELECT id, content FROM records
            WHERE project_id = $1
              AND embedding_state = 'PENDING'
              AND NOT (id = ANY($2))
            ORDER BY id ASC
            LIMIT $3
            ",
        )
        .bind(project_id)
        .bind(exclude)
        .bind(sql_limit(limit))
        .fetch_all(self.pools.read_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(rows
            .iter()
            .map(|row| EmbeddingCandidate {
                id: row.get("id"),
                content: row.get("content"),
            })
            .collect())
    }

    async fn store_embedding(&self, record_id: i64, embedding: &[f32]) -> DatabaseResult<()> {
        let operation = DatabaseOperation::UpdateEmbedding { record_id };

        sqlx::query(
            r"
            UPDATE records
            SET embedding = $2, embedding_state = 'DONE', updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(record_id)
        .bind(embedding)
        .execute(self.pools.write_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(())
    }

    async fn mark_embedding_failed(&self, record_id: i64) -> DatabaseResult<()> {
        let operation = DatabaseOperation::UpdateEmbedding { record_id };

        sqlx::query(
            r"
            UPDATE records
            SET embedding_state = 'PERMANENTLY_FAILED', updated_at = NOW()
            WHERE id = $1 AND embedding_state = 'PENDING'
            ",
        )
        .bind(record_id)
        .execute(self.pools.write_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(())
    }

    async fn get_record(&self, record_id: i64) -> DatabaseResult<Option<Record>> {
        let operation = DatabaseOperation::Query {
            description: format!("get_record(id={record_id})"),
        };
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = $1");

        let row = sqlx::query(&sql)
            .bind(record_id)
            .fetch_optional(self.pools.read_pool())
            .await
            .map_db_err(operation.clone(), None)?;

        row.map(|row| record_from_row(&row, &operation)).transpose()
    }

    async fn list_job_records(&self, job_id: &Uuid) -> DatabaseResult<Vec<Record>> {
        let operation = DatabaseOperation::Query {
            description: format!("list_job_records(job_id={job_id})"),
        };
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE job_id = $1 ORDER BY id");

        let rows = sqlx::query(&sql)
            .bind(job_id)
            .fetch_all(self.pools.read_pool())
            .await
            .map_db_err(operation.clone(), None)?;

        rows.iter()
            .map(|row| record_from_row(row, &operation))
            .collect()
    }

    async fn count_records(&self, project_id: &str) -> DatabaseResult<RecordCounts> {
        let operation = DatabaseOperation::CountRecords {
            project_id: project_id.to_string(),
        };

        let row = sqlx::query(
            r"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE embedding_state = 'DONE') AS embedded,
                COUNT(*) FILTER (WHERE embedding_state = 'PENDING') AS pending,
                COUNT(*) FILTER (WHERE embedding_state = 'PERMANENTLY_FAILED') AS failed
            FROM records
            WHERE project_id = $1
            ",
        )
        .bind(project_id)
        .fetch_one(self.pools.read_pool())
        .await
        .map_db_err(operation, None)?;

        Ok(RecordCounts {
            total: row.get("total"),
            embedded: row.get("embedded"),
            pending: row.get("pending"),
            permanently_failed: row.get("failed"),
        })
    }
}
