//! Error types for batching and uploading.

use thiserror::Error;

/// Errors raised while constructing the queue or the uploader.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Background tasks need a Tokio runtime to run on.
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] fieldtrace_config::ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Outcome of a single upload attempt that did not succeed.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Collector returned unexpected status: {0}")]
    Status(u16),

    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Uploader is closed")]
    Closed,
}
