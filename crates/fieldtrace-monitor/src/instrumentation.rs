//! Engine-agnostic adapter surface.
//!
//! An engine integration translates its lifecycle callbacks into the five
//! events of [`ExecutionListener`]; [`Instrumentation`] turns them into
//! finalized traces and hands those to a [`TraceSink`].

use crate::builder::{TraceBuilder, TraceCustomizer};
use crate::sanitizer::VariablesSanitizer;
use crate::RequestContext;
use fieldtrace_core::{Location, Path, TraceSink};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// A request arrived.
#[derive(Default)]
pub struct RequestStarted {
    /// Raw query text, used as the signature until the operation parses.
    pub query: String,
    pub operation_name: Option<String>,
    /// Raw request variables; sanitized before they are recorded.
    pub variables: Option<Map<String, Value>>,
    pub context: Option<RequestContext>,
}

/// The query document parsed and an operation was selected.
#[derive(Debug, Clone, Default)]
pub struct OperationParsed {
    pub operation_name: Option<String>,
    pub signature: String,
}

/// A field resolver completed.
#[derive(Debug, Clone, Default)]
pub struct FieldResolved {
    pub path: Path,
    pub response_name: String,
    pub original_field_name: String,
    pub field_type: String,
    pub parent_type: String,
    pub start_offset_ns: u64,
    pub end_offset_ns: u64,
}

/// An error was raised while executing the request.
#[derive(Debug, Clone, Default)]
pub struct ErrorRaised {
    /// Path of the failing field; `None` for request-level errors.
    pub path: Option<Path>,
    pub message: String,
    pub detail: Value,
    pub locations: Vec<Location>,
}

/// The five lifecycle events an engine integration reports.
pub trait ExecutionListener: Send + Sync {
    /// Per-request state, owned by the engine integration.
    type Request: Send + Sync;

    fn request_started(&self, event: RequestStarted) -> Self::Request;
    fn operation_parsed(&self, request: &Self::Request, event: OperationParsed);
    fn field_resolved(&self, request: &Self::Request, event: FieldResolved);
    fn error_raised(&self, request: &Self::Request, event: ErrorRaised);
    fn request_completed(&self, request: Self::Request);
}

// ─────────────────────────────────────────────────────────────────────────────
// Instrumentation
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request state of [`Instrumentation`]. Requests excluded by the
/// sampling predicate carry no builder and record nothing.
pub struct RequestTrace {
    builder: Option<TraceBuilder>,
}

impl RequestTrace {
    pub fn is_sampled(&self) -> bool {
        self.builder.is_some()
    }

    /// Nanoseconds since the request started, for computing field offsets.
    pub fn offset_ns(&self) -> u64 {
        self.builder.as_ref().map_or(0, TraceBuilder::offset_ns)
    }

    pub fn builder(&self) -> Option<&TraceBuilder> {
        self.builder.as_ref()
    }
}

/// Builds a trace per request and submits it on completion.
pub struct Instrumentation {
    sink: Arc<dyn TraceSink>,
    sanitizer: VariablesSanitizer,
    customizer: Option<Arc<dyn TraceCustomizer>>,
    send_traces_if: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl Instrumentation {
    /// Creates an instrumentation that traces every request and filters
    /// all variable values.
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            sink,
            sanitizer: VariablesSanitizer::default(),
            customizer: None,
            send_traces_if: Arc::new(|| true),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: VariablesSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_customizer(mut self, customizer: Arc<dyn TraceCustomizer>) -> Self {
        self.customizer = Some(customizer);
        self
    }

    /// Sets the sampling predicate, evaluated once at each request start.
    pub fn send_traces_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.send_traces_if = Arc::new(predicate);
        self
    }

    fn stringify_variables(&self, variables: &Map<String, Value>) -> BTreeMap<String, String> {
        self.sanitizer
            .sanitize(variables)
            .into_iter()
            .filter_map(|(name, value)| match serde_json::to_string(&value) {
                Ok(json) => Some((name, json)),
                Err(e) => {
                    tracing::warn!(variable = %name, "Failed to serialize variable: {}", e);
                    None
                }
            })
            .collect()
    }
}

impl ExecutionListener for Instrumentation {
    type Request = RequestTrace;

    fn request_started(&self, event: RequestStarted) -> RequestTrace {
        if !(self.send_traces_if)() {
            return RequestTrace { builder: None };
        }

        let mut builder = TraceBuilder::start(event.query, event.operation_name.as_deref());
        if let Some(variables) = &event.variables {
            builder = builder.with_variables(self.stringify_variables(variables));
        }
        if let Some(context) = event.context {
            builder = builder.with_context(context);
        }
        if let Some(customizer) = &self.customizer {
            builder = builder.with_customizer(Arc::clone(customizer));
        }
        RequestTrace {
            builder: Some(builder),
        }
    }

    fn operation_parsed(&self, request: &RequestTrace, event: OperationParsed) {
        if let Some(builder) = &request.builder {
            builder.record_operation(event.operation_name.as_deref(), event.signature);
        }
    }

    fn field_resolved(&self, request: &RequestTrace, event: FieldResolved) {
        let Some(builder) = &request.builder else { return };
        builder.record_field_resolution(
            event.path,
            &event.response_name,
            &event.original_field_name,
            &event.field_type,
            &event.parent_type,
            event.start_offset_ns,
            event.end_offset_ns,
        );
    }

    fn error_raised(&self, request: &RequestTrace, event: ErrorRaised) {
        let Some(builder) = &request.builder else { return };
        builder.record_error(
            event.path.unwrap_or_default(),
            event.message,
            &event.detail,
            event.locations,
        );
    }

    fn request_completed(&self, request: RequestTrace) {
        if let Some(builder) = request.builder {
            self.sink.submit(builder.finish());
        }
    }
}
