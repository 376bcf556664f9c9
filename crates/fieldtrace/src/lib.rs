//! # fieldtrace
//!
//! Per-request field tracing for query engines: build a trace tree while a
//! request executes, batch finished traces into reports and upload them to
//! a collector with bounded retries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fieldtrace::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TracingConfig::from_env()?;
//! let pipeline = FieldTracing::start(&config, None)?;
//! let instrumentation = pipeline.instrumentation();
//!
//! let request = instrumentation.request_started(RequestStarted {
//!     query: "{ me { name } }".into(),
//!     ..Default::default()
//! });
//! instrumentation.request_completed(request);
//!
//! let summary = pipeline.shutdown().await;
//! println!("flushed {} traces", summary.traces_flushed);
//! # Ok(())
//! # }
//! ```

pub use fieldtrace_config as config;
pub use fieldtrace_core as model;
pub use fieldtrace_engine as engine;
pub use fieldtrace_monitor as monitor;

use fieldtrace_config::TracingConfig;
use fieldtrace_core::TraceSink;
use fieldtrace_engine::{
    BatchQueue, EngineError, HeaderCustomizer, HttpUploader, QueueStats, ShutdownSummary,
};
use fieldtrace_monitor::Instrumentation;
use std::sync::Arc;
use std::time::Duration;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::FieldTracing;
    pub use fieldtrace_config::{BatchConfig, ConfigError, TracingConfig, UploadConfig};
    pub use fieldtrace_core::{
        BoxError, Location, Node, Path, QueryKey, Report, ReportHeader, Segment, Trace,
        TraceSink,
    };
    pub use fieldtrace_engine::{
        BatchQueue, EngineError, HeaderCustomizer, HttpUploader, QueueStats, ShutdownSummary,
        Uploader,
    };
    pub use fieldtrace_monitor::{
        ErrorRaised, ExecutionListener, FieldResolved, Instrumentation, OperationParsed,
        RequestStarted, TraceBuilder, TraceCustomizer, VariablesSanitizer,
    };
}

/// A running batch queue wired to the HTTP uploader.
pub struct FieldTracing {
    queue: Arc<BatchQueue>,
    shutdown_timeout: Duration,
}

impl FieldTracing {
    /// Starts the uploader and the flush schedulers on the current Tokio
    /// runtime.
    pub fn start(
        config: &TracingConfig,
        header: Option<Arc<dyn HeaderCustomizer>>,
    ) -> Result<Self, EngineError> {
        let uploader = Arc::new(HttpUploader::new(&config.upload)?);
        let queue = BatchQueue::spawn(&config.batch, uploader, header)?;
        tracing::info!(endpoint = %config.upload.endpoint, "Field tracing started");
        Ok(Self {
            queue: Arc::new(queue),
            shutdown_timeout: config.batch.shutdown_timeout(),
        })
    }

    /// Sink that accepts finished traces.
    pub fn sink(&self) -> Arc<dyn TraceSink> {
        self.queue.clone()
    }

    /// Instrumentation submitting into this pipeline, with default
    /// sanitizing and no sampling.
    pub fn instrumentation(&self) -> Instrumentation {
        Instrumentation::new(self.sink())
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Flushes everything buffered and waits for uploads, bounded by the
    /// configured shutdown timeout.
    pub async fn shutdown(self) -> ShutdownSummary {
        self.queue.shutdown(self.shutdown_timeout).await
    }
}
