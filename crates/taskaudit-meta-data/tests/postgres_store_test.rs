//! Integration tests for the `PostgreSQL` job and record stores
//!
//! Skipped unless `TASKAUDIT_TEST_DATABASE_URL` points at a disposable database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use taskaudit_meta_data::{
    BatchProgress, DbRepository, JobRepository, JobStatus, NewJob, NewRecord, PoolManager,
    RecordRepository, RecordType, run_migrations,
};
use taskaudit_test_utils::{get_test_runtime, test_database_url, unique_name};
use uuid::Uuid;

async fn connect() -> Option<DbRepository> {
    let url = test_database_url()?;
    let pool = sqlx::PgPool::connect(&url)
        .await
        .expect("Failed to connect to test database");
    run_migrations(&pool).await.expect("Failed to migrate");
    Some(DbRepository::new(PoolManager::from_pool(pool)))
}

fn new_job(project: &str) -> NewJob {
    NewJob {
        job_id: Uuid::new_v4(),
        project_id: project.to_string(),
        record_type: RecordType::Feedback,
        generate_embeddings: true,
        correlation_id: Uuid::new_v4(),
    }
}

fn new_record(job_id: Uuid, project: &str, external_id: Option<&str>) -> NewRecord {
    let now = Utc::now();
    NewRecord {
        job_id: Some(job_id),
        project_id: project.to_string(),
        record_type: RecordType::Feedback,
        external_id: external_id.map(String::from),
        metadata: serde_json::json!({ "id": external_id, "feedback": "well done" }),
        content: "well done".to_string(),
        category: None,
        source: Some("integration".to_string()),
        creator_id: None,
        creator_name: None,
        creator_email: None,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn test_job_lifecycle_and_progress_merge() {
    get_test_runtime().block_on(async {
        let Some(repo) = connect().await else {
            eprintln!("TASKAUDIT_TEST_DATABASE_URL not set, skipping");
            return;
        };
        let project = unique_name("lifecycle");

        let job = repo.create_job(&new_job(&project)).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let head = repo.find_oldest_pending(&project).await.unwrap().unwrap();
        assert_eq!(head.job_id, job.job_id);

        assert!(
            repo.transition_job(&job.job_id, &[JobStatus::Pending], JobStatus::Processing, None)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .transition_job(&job.job_id, &[JobStatus::Pending], JobStatus::Processing, None)
                .await
                .unwrap()
        );
        assert!(repo.find_processing(&project).await.unwrap().is_some());

        let mut first = BatchProgress::default();
        first.saved = 2;
        first.skip("Duplicate ID");
        let mut second = BatchProgress::default();
        second.skip("Duplicate ID");
        second.skip("Keyword Mismatch");
        repo.record_batch_progress(&job.job_id, &first).await.unwrap();
        repo.record_batch_progress(&job.job_id, &second).await.unwrap();

        let job = repo.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(job.saved_count, 2);
        assert_eq!(job.skipped_count, 3);
        assert_eq!(job.skipped_details.get("Duplicate ID"), Some(&2));
        assert_eq!(job.skipped_details.get("Keyword Mismatch"), Some(&1));

        assert!(
            repo.transition_job(
                &job.job_id,
                &[JobStatus::Processing],
                JobStatus::Failed,
                Some("boom")
            )
            .await
            .unwrap()
        );
        let job = repo.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    });
}

#[test]
fn test_duplicate_lookup_and_embedding_scan() {
    get_test_runtime().block_on(async {
        let Some(repo) = connect().await else {
            eprintln!("TASKAUDIT_TEST_DATABASE_URL not set, skipping");
            return;
        };
        let project = unique_name("records");
        let job = repo.create_job(&new_job(&project)).await.unwrap();

        let a = repo
            .create_record(&new_record(job.job_id, &project, Some("a")))
            .await
            .unwrap();
        let b = repo
            .create_record(&new_record(job.job_id, &project, None))
            .await
            .unwrap();

        assert!(
            repo.external_id_exists(&project, RecordType::Feedback, "a")
                .await
                .unwrap()
        );
        assert!(
            !repo
                .external_id_exists(&project, RecordType::Task, "a")
                .await
                .unwrap()
        );

        repo.store_embedding(a.id, &[0.1, 0.2, 0.3]).await.unwrap();
        let pending = repo
            .fetch_pending_embeddings(&project, &[], 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        repo.mark_embedding_failed(b.id).await.unwrap();
        assert!(
            repo.fetch_pending_embeddings(&project, &[], 10)
                .await
                .unwrap()
                .is_empty()
        );

        let counts = repo.count_records(&project).await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.embedded, 1);
        assert_eq!(counts.permanently_failed, 1);

        let stored = repo.get_record(a.id).await.unwrap().unwrap();
        assert_eq!(stored.embedding, Some(vec![0.1, 0.2, 0.3]));

        assert!(repo.delete_job(&job.job_id).await.unwrap());
        assert_eq!(repo.count_records(&project).await.unwrap().total, 0);
    });
}
