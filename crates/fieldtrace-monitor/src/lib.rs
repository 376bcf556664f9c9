//! Per-request trace assembly for fieldtrace.
//!
//! [`TraceBuilder`] accumulates one request's field timings and errors and
//! folds them into a [`fieldtrace_core::Trace`]. [`Instrumentation`] drives
//! builders from the five engine lifecycle events of [`ExecutionListener`].

mod builder;
mod instrumentation;
mod sanitizer;

pub use builder::{TraceBuilder, TraceCustomizer};
pub use instrumentation::{
    ErrorRaised, ExecutionListener, FieldResolved, Instrumentation, OperationParsed,
    RequestStarted, RequestTrace,
};
pub use sanitizer::{VariablesSanitizer, FILTERED};

use std::any::Any;
use std::sync::Arc;

/// Opaque per-request handle supplied by the engine integration and passed
/// back to trace customizers.
pub type RequestContext = Arc<dyn Any + Send + Sync>;
