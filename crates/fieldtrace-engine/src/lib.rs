//! Batching and delivery of finished traces.
//!
//! [`BatchQueue`] is the [`fieldtrace_core::TraceSink`] handed to request
//! instrumentation. It flushes buffered traces as one
//! [`fieldtrace_core::Report`] per batching window and passes each report to
//! an [`Uploader`]; [`HttpUploader`] delivers them to the collector.

mod error;
mod queue;
mod uploader;

pub use error::{EngineError, UploadError};
pub use queue::{BatchQueue, HeaderCustomizer, QueueStats, ShutdownSummary};
pub use uploader::{HttpUploader, Uploader};
