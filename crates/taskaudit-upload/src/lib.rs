//! Chunked payload transfer
//!
//! The client splits large payloads into fixed-size chunks sent under one
//! session id and retries each chunk on transient failures. The assembler is
//! the receiving side: it collects chunks per session and hands back the
//! full text once the session completes.

pub mod assembler;
pub mod client;
pub mod error;
pub mod protocol;

pub use assembler::{AssembledUpload, UploadAssembler};
pub use client::ChunkedUploader;
pub use error::{UploadError, UploadResult};
pub use protocol::{CompleteRequest, PayloadFormat, SingleUploadRequest, UploadMetadata, UploadReceipt};
