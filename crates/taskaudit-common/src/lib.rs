//! Common utilities shared across Taskaudit crates
//!
//! Environment bootstrap, tracing setup and the correlation id used to tie
//! together log lines emitted by a single job admission.

pub mod init;
pub mod telemetry;

pub use init::initialize_environment;
pub use telemetry::{LogFormat, init_tracing};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID type for tracking operations across pipeline stages
///
/// Uses UUID v4 for guaranteed uniqueness across processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID value
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Uuid::try_parse(id).map_or_else(|_| Self(Uuid::new_v4()), Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_parses_valid_uuid() {
        let raw = "6f9619ff-8b86-4d11-b42d-00c04fc964ff";
        let id = CorrelationId::from(raw);
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn test_correlation_id_replaces_garbage_with_fresh_id() {
        let first = CorrelationId::from("not-a-uuid");
        let second = CorrelationId::from("not-a-uuid");
        assert_ne!(first, second);
    }

    #[test]
    fn test_correlation_id_serializes_as_plain_uuid() {
        let id = CorrelationId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{id}\""));
    }
}
