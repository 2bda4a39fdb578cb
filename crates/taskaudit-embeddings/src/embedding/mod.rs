#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod remote;
pub mod service;
pub mod traits;

pub use remote::RemoteEmbeddingProvider;
pub use service::DefaultEmbeddingService;
pub use traits::{EmbeddingProvider, EmbeddingService, EmbeddingStats};
