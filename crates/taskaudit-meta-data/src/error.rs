//! Structured error handling for the job and record stores
//!
//! Every failure carries the operation it happened in and, when the caller
//! has one, the correlation id of the job admission that triggered it.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for database operations
pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;

/// Database operation type for error context
#[derive(Debug, Clone)]
pub enum DatabaseOperation {
    /// Job operations
    CreateJob {
        project_id: String,
    },
    GetJob {
        job_id: Uuid,
    },
    TransitionJob {
        job_id: Uuid,
        to: String,
    },
    UpdateJobProgress {
        job_id: Uuid,
    },
    FindJobs {
        project_id: String,
        status: String,
    },
    ListJobs {
        project_id: Option<String>,
    },
    DeleteJob {
        job_id: Uuid,
    },

    /// Record operations
    CreateRecord {
        project_id: String,
    },
    LookupExternalIds {
        project_id: String,
        count: usize,
    },
    FetchPendingEmbeddings {
        project_id: String,
        limit: usize,
    },
    UpdateEmbedding {
        record_id: i64,
    },
    CountRecords {
        project_id: String,
    },

    /// Generic operations
    Query {
        description: String,
    },
}

impl fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateJob { project_id } => write!(f, "create_job(project={project_id})"),
            Self::GetJob { job_id } => write!(f, "get_job(job_id={job_id})"),
            Self::TransitionJob { job_id, to } => {
                write!(f, "transition_job(job_id={job_id}, to={to})")
            }
            Self::UpdateJobProgress { job_id } => {
                write!(f, "update_job_progress(job_id={job_id})")
            }
            Self::FindJobs { project_id, status } => {
                write!(f, "find_jobs(project={project_id}, status={status})")
            }
            Self::ListJobs { project_id } => match project_id {
                Some(project_id) => write!(f, "list_jobs(project={project_id})"),
                None => write!(f, "list_jobs(all)"),
            },
            Self::DeleteJob { job_id } => write!(f, "delete_job(job_id={job_id})"),

            Self::CreateRecord { project_id } => write!(f, "create_record(project={project_id})"),
            Self::LookupExternalIds { project_id, count } => write!(
                f,
                "lookup_external_ids(project={project_id}, count={count})"
            ),
            Self::FetchPendingEmbeddings { project_id, limit } => write!(
                f,
                "fetch_pending_embeddings(project={project_id}, limit={limit})"
            ),
            Self::UpdateEmbedding { record_id } => {
                write!(f, "update_embedding(record_id={record_id})")
            }
            Self::CountRecords { project_id } => write!(f, "count_records(project={project_id})"),

            Self::Query { description } => write!(f, "query({description})"),
        }
    }
}

/// Database error with full operation context
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Query timeout
    #[error(
        "Query timeout for operation '{operation}' (correlation_id={correlation_id:?})"
    )]
    QueryTimeout {
        operation: Box<DatabaseOperation>,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Query execution error
    #[error(
        "Query failed for operation '{operation}': {message} (correlation_id={correlation_id:?})"
    )]
    QueryFailed {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Constraint violation
    #[error(
        "Database constraint violation in table '{table}': {constraint} (operation='{operation}', correlation_id={correlation_id:?})"
    )]
    ConstraintViolation {
        table: String,
        constraint: String,
        operation: Box<DatabaseOperation>,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Stored data could not be decoded into a domain value
    #[error(
        "Data integrity error: {message} (operation='{operation}', correlation_id={correlation_id:?})"
    )]
    DataIntegrityError {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
    },

    /// Migration error
    #[error("Database migration failed: {message}")]
    MigrationFailed {
        message: String,
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// Unexpected database state
    #[error(
        "Unexpected database state for operation '{operation}': {message} (correlation_id={correlation_id:?})"
    )]
    UnexpectedState {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
    },
}

impl DatabaseError {
    /// Create a new query failed error from `sqlx::Error`
    pub fn query_failed(
        operation: DatabaseOperation,
        source: sqlx::Error,
        correlation_id: Option<String>,
    ) -> Self {
        let message = source.to_string();

        if let Some(db_err) = source.as_database_error()
            && let Some(constraint) = db_err.constraint()
        {
            let table = db_err
                .table()
                .map(String::from)
                .or_else(|| Self::extract_table_from_constraint(constraint))
                .unwrap_or_else(|| "unknown".to_string());

            return Self::ConstraintViolation {
                table,
                constraint: constraint.to_string(),
                operation: Box::new(operation),
                correlation_id,
                source,
            };
        }

        if matches!(source, sqlx::Error::PoolTimedOut)
            || message.contains("timeout")
            || message.contains("timed out")
        {
            return Self::QueryTimeout {
                operation: Box::new(operation),
                correlation_id,
                source,
            };
        }

        Self::QueryFailed {
            operation: Box::new(operation),
            message,
            correlation_id,
            source,
        }
    }

    /// Stored value failed to decode
    pub fn data_integrity(operation: DatabaseOperation, message: impl Into<String>) -> Self {
        Self::DataIntegrityError {
            operation: Box::new(operation),
            message: message.into(),
            correlation_id: None,
        }
    }

    /// Extract table name from constraint name (assumes format: `table_constraint`)
    fn extract_table_from_constraint(constraint: &str) -> Option<String> {
        constraint.split('_').next().map(String::from)
    }
}

/// Extension trait for converting sqlx errors with context
#[allow(clippy::result_large_err)]
pub trait DatabaseErrorExt<T> {
    /// Convert to `DatabaseError` with operation context
    ///
    /// # Errors
    /// Returns `DatabaseError` with operation context and correlation ID
    fn map_db_err(
        self,
        operation: DatabaseOperation,
        correlation_id: Option<String>,
    ) -> DatabaseResult<T>;
}

impl<T> DatabaseErrorExt<T> for std::result::Result<T, sqlx::Error> {
    fn map_db_err(
        self,
        operation: DatabaseOperation,
        correlation_id: Option<String>,
    ) -> DatabaseResult<T> {
        self.map_err(|e| DatabaseError::query_failed(operation, e, correlation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_operation_display() {
        let op = DatabaseOperation::LookupExternalIds {
            project_id: "proj-1".to_string(),
            count: 42,
        };
        assert_eq!(
            op.to_string(),
            "lookup_external_ids(project=proj-1, count=42)"
        );
    }

    #[test]
    fn test_pool_timeout_maps_to_query_timeout() {
        let err = DatabaseError::query_failed(
            DatabaseOperation::GetJob {
                job_id: Uuid::nil(),
            },
            sqlx::Error::PoolTimedOut,
            None,
        );
        assert!(matches!(err, DatabaseError::QueryTimeout { .. }));
    }

    #[test]
    fn test_correlation_id_is_reported() {
        let result: DatabaseResult<()> = Err::<(), _>(sqlx::Error::RowNotFound).map_db_err(
            DatabaseOperation::CreateJob {
                project_id: "proj-1".to_string(),
            },
            Some("req-7".to_string()),
        );
        let message = result.map_err(|e| e.to_string()).err().unwrap_or_default();
        assert!(message.contains("create_job(project=proj-1)"));
        assert!(message.contains("req-7"));
    }
}
