//! Wire shapes shared by the uploader and the receiving side
//!
//! Routes, relative to the server URL:
//! - `POST /uploads` with a [`SingleUploadRequest`] for small payloads
//! - `PUT /uploads/{session}/chunks/{index}` with raw chunk bytes
//! - `POST /uploads/{session}/complete` with a [`CompleteRequest`]
//!
//! Both terminal calls answer with an [`UploadReceipt`].

use serde::{Deserialize, Serialize};
use taskaudit_meta_data::RecordType;
use uuid::Uuid;

/// Inline payload format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Csv,
    Json,
}

impl PayloadFormat {
    /// Guess from a file extension, defaulting to CSV
    pub fn from_extension(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Csv,
        }
    }
}

/// Ingestion options travelling with a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub project_id: String,
    pub record_type: RecordType,
    pub format: PayloadFormat,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub generate_embeddings: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleUploadRequest {
    pub metadata: UploadMetadata,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub metadata: UploadMetadata,
    pub total_chunks: u32,
}

/// Server acknowledgement carrying the created job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub job_id: Uuid,
}

pub const SINGLE_UPLOAD_PATH: &str = "/uploads";

pub fn chunk_path(session_id: &str, index: u32) -> String {
    format!("/uploads/{session_id}/chunks/{index}")
}

pub fn complete_path(session_id: &str) -> String {
    format!("/uploads/{session_id}/complete")
}
