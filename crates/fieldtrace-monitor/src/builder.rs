//! Per-request trace assembly.

use crate::RequestContext;
use dashmap::DashMap;
use fieldtrace_core::{
    tree, BoxError, Location, Node, NodeData, NodeError, Path, Segment, Trace,
};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};
use uuid::Uuid;

/// Callback that fills in adapter-owned metadata (client name, HTTP
/// details, ...) on a trace just before it is handed off.
pub trait TraceCustomizer: Send + Sync {
    fn customize(
        &self,
        trace: &mut Trace,
        context: Option<&RequestContext>,
    ) -> Result<(), BoxError>;
}

impl<F> TraceCustomizer for F
where
    F: Fn(&mut Trace, Option<&RequestContext>) -> Result<(), BoxError> + Send + Sync,
{
    fn customize(
        &self,
        trace: &mut Trace,
        context: Option<&RequestContext>,
    ) -> Result<(), BoxError> {
        self(trace, context)
    }
}

#[derive(Debug, Default)]
struct Operation {
    signature: String,
    name: String,
    parsed: bool,
}

/// Accumulates one request's telemetry.
///
/// Recording methods take `&self` and may be called concurrently from any
/// number of resolver tasks. [`TraceBuilder::finish`] consumes the builder,
/// so the tree fold runs exactly once and with exclusive access.
pub struct TraceBuilder {
    request_id: Uuid,
    start_time: SystemTime,
    started: Instant,
    operation: Mutex<Operation>,
    fields: DashMap<Path, NodeData>,
    errors: DashMap<Path, Vec<NodeError>>,
    variables: BTreeMap<String, String>,
    context: Option<RequestContext>,
    customizer: Option<Arc<dyn TraceCustomizer>>,
}

impl TraceBuilder {
    /// Starts a trace with a provisional signature, usually the raw query
    /// text, which is replaced once the operation has been parsed.
    pub fn start(signature: impl Into<String>, operation_name_hint: Option<&str>) -> Self {
        let request_id = Uuid::new_v4();
        let operation = Operation {
            signature: signature.into(),
            name: operation_name_hint.unwrap_or_default().to_string(),
            parsed: false,
        };
        tracing::debug!(%request_id, operation = %operation.name, "Started trace");

        Self {
            request_id,
            start_time: SystemTime::now(),
            started: Instant::now(),
            operation: Mutex::new(operation),
            fields: DashMap::new(),
            errors: DashMap::new(),
            variables: BTreeMap::new(),
            context: None,
            customizer: None,
        }
    }

    /// Attaches sanitized variables, each value already serialized as JSON.
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Attaches the adapter's opaque request context.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_customizer(mut self, customizer: Arc<dyn TraceCustomizer>) -> Self {
        self.customizer = Some(customizer);
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Nanoseconds elapsed since the request started.
    pub fn offset_ns(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Records the parsed operation name and canonical signature.
    pub fn record_operation(&self, name: Option<&str>, canonical_signature: impl Into<String>) {
        let Ok(mut guard) = self.operation.lock() else {
            tracing::warn!(request_id = %self.request_id, "Failed to acquire operation lock");
            return;
        };
        if let Some(name) = name {
            guard.name = name.to_string();
        }
        guard.signature = canonical_signature.into();
        guard.parsed = true;
    }

    /// Records timing and type data for one resolved field.
    ///
    /// `path` is the full response path of the field, ending with its own
    /// response name; `field_name` only fills in that last segment when
    /// `path` is empty. A later record for the same path replaces an
    /// earlier one.
    #[allow(clippy::too_many_arguments)]
    pub fn record_field_resolution(
        &self,
        path: Path,
        field_name: &str,
        original_field_name: &str,
        declared_type: &str,
        parent_type: &str,
        start_offset_ns: u64,
        end_offset_ns: u64,
    ) {
        debug_assert!(
            path.last()
                .and_then(Segment::field_name)
                .map_or(true, |last| last == field_name),
            "field path {} does not end with {}",
            path,
            field_name
        );
        // A bare field name without a path addresses a top-level field.
        let path = if path.is_root() {
            path.field(field_name)
        } else {
            path
        };
        self.fields.insert(
            path,
            NodeData {
                original_field_name: original_field_name.to_string(),
                field_type: declared_type.to_string(),
                parent_type: parent_type.to_string(),
                start_time_ns: start_offset_ns,
                end_time_ns: end_offset_ns.max(start_offset_ns),
            },
        );
    }

    /// Attaches an error to the node at `path`; the root path holds
    /// request-level errors such as parse or validation failures.
    pub fn record_error(
        &self,
        path: Path,
        message: impl Into<String>,
        detail: &serde_json::Value,
        locations: Vec<Location>,
    ) {
        let json = serde_json::to_string(detail).unwrap_or_default();
        self.errors.entry(path).or_default().push(NodeError {
            message: message.into(),
            json,
            locations,
        });
    }

    /// Finalizes the trace.
    pub fn finish(self) -> Trace {
        let elapsed = self.started.elapsed();
        let duration_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let operation = self
            .operation
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut root = Node::root();
        let field_count = self.fields.len();
        for (path, data) in self.fields {
            tree::merge(&mut root, &path, &data);
        }
        for (path, errors) in self.errors {
            tree::locate(&mut root, &path).errors.extend(errors);
        }
        root.sort_children();

        // Input that never parsed and failed at the root has no usable signature.
        let signature = if !operation.parsed && !root.errors.is_empty() {
            String::new()
        } else {
            operation.signature
        };

        let mut trace = Trace {
            signature,
            operation_name: operation.name,
            start_time: self.start_time,
            end_time: self.start_time + elapsed,
            duration_ns,
            root,
            variables: self.variables,
            client: Default::default(),
            http: None,
            cache_policy: None,
            query_plan: None,
        };

        if let Some(customizer) = &self.customizer {
            apply_customizer(
                customizer.as_ref(),
                &mut trace,
                self.context.as_ref(),
                self.request_id,
            );
        }

        tracing::debug!(
            request_id = %self.request_id,
            query_key = %trace.query_key(),
            fields = field_count,
            duration_ns,
            "Finished trace"
        );
        trace
    }
}

fn apply_customizer(
    customizer: &dyn TraceCustomizer,
    trace: &mut Trace,
    context: Option<&RequestContext>,
    request_id: Uuid,
) {
    match catch_unwind(AssertUnwindSafe(|| customizer.customize(trace, context))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(%request_id, "Trace customizer failed: {}", e),
        Err(panic) => tracing::warn!(
            %request_id,
            "Trace customizer panicked: {}",
            panic.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    fn record(builder: &TraceBuilder, elements: &[&str], parent: &str, start: u64) {
        let path = Path::parse(elements);
        let name = elements.last().copied().unwrap_or_default();
        builder.record_field_resolution(path, name, name, "Int!", parent, start, start + 5);
    }

    #[test]
    fn test_concurrent_list_fields_fold_into_one_tree() {
        let builder = TraceBuilder::start("query {users {id}}", None);

        thread::scope(|s| {
            s.spawn(|| record(&builder, &["users", "0", "id"], "User", 10));
            s.spawn(|| record(&builder, &["users", "1", "id"], "User", 12));
            s.spawn(|| record(&builder, &["users"], "Query", 1));
        });
        let trace = builder.finish();

        assert_eq!(trace.root.children.len(), 1);
        let users = &trace.root.children[0];
        assert_eq!(users.response_name(), Some("users"));
        assert_eq!(users.parent_type, "Query");
        let indexes: Vec<_> = users.children.iter().map(Node::index).collect();
        assert_eq!(indexes, vec![Some(0), Some(1)]);
        for item in &users.children {
            assert_eq!(item.children.len(), 1);
            assert_eq!(item.children[0].response_name(), Some("id"));
            assert_eq!(item.children[0].parent_type, "User");
        }
    }

    #[test]
    fn test_fold_is_order_independent() {
        let events = vec![
            (vec!["a"], 1),
            (vec!["a", "0", "b"], 2),
            (vec!["a", "1", "b"], 3),
            (vec!["c"], 4),
            (vec!["a", "0", "d"], 5),
        ];

        let build = |order: &[usize]| {
            let builder = TraceBuilder::start("q", None);
            for &i in order {
                let (elements, start) = &events[i];
                record(&builder, elements, "T", *start);
            }
            builder.record_error(Path::parse(["a", "1", "b"]), "nope", &json!({}), vec![]);
            builder.record_error(Path::root(), "top", &json!({}), vec![]);
            builder.finish().root
        };

        let forward = build(&[0, 1, 2, 3, 4]);
        assert_eq!(forward, build(&[4, 3, 2, 1, 0]));
        assert_eq!(forward, build(&[2, 0, 4, 1, 3]));
    }

    #[test]
    fn test_field_error_lands_on_field_node() {
        let builder = TraceBuilder::start("query {err}", None);
        record(&builder, &["err"], "Query", 3);
        builder.record_error(
            Path::parse(["err"]),
            "Exception while fetching data (/err) : failure",
            &json!({"message": "failure", "path": ["err"]}),
            vec![Location::new(1, 3)],
        );

        let trace = builder.finish();

        assert!(trace.root.errors.is_empty());
        let err = trace.root.child(&Segment::Field("err".into())).unwrap();
        assert_eq!(err.errors.len(), 1);
        assert!(err.errors[0].message.contains("failure"));
        assert_eq!(err.errors[0].locations, vec![Location::new(1, 3)]);
        assert!(err.errors[0].json.contains("\"path\""));
        assert_eq!(trace.signature, "query {err}");
    }

    #[test]
    fn test_error_before_any_field_creates_placeholders() {
        let builder = TraceBuilder::start("q", None);
        builder.record_error(Path::parse(["a", "2", "b"]), "early", &json!(null), vec![]);
        record(&builder, &["a"], "Query", 1);

        let trace = builder.finish();

        let a = &trace.root.children[0];
        assert_eq!(a.original_field_name, "a");
        let b = trace.root.descend(&Path::parse(["a", "2", "b"])).unwrap();
        assert_eq!(b.errors[0].message, "early");
        assert!(b.original_field_name.is_empty());
    }

    #[test]
    fn test_invalid_syntax_gives_empty_signature() {
        let builder = TraceBuilder::start("{ users", None);
        builder.record_error(
            Path::root(),
            "Invalid Syntax : offending token '<EOF>' at line 1 column 8",
            &json!({"extensions": {"classification": "InvalidSyntax"}}),
            vec![Location::new(1, 8)],
        );

        let trace = builder.finish();

        assert_eq!(trace.signature, "");
        assert_eq!(trace.operation_name, "");
        assert_eq!(trace.root.errors.len(), 1);
        assert!(trace.root.errors[0].message.contains("Invalid Syntax"));
        assert!(trace.root.children.is_empty());
    }

    #[test]
    fn test_record_operation_overrides_provisional_values() {
        let builder = TraceBuilder::start(
            "query EchoOp($msg: String!) { echo(str: $msg) }",
            Some("Hint"),
        );
        builder.record_operation(
            Some("EchoOp"),
            "query EchoOp($var1:String!) {echo(str:$var1)}",
        );
        let trace = builder.finish();
        assert_eq!(trace.operation_name, "EchoOp");
        assert_eq!(trace.signature, "query EchoOp($var1:String!) {echo(str:$var1)}");

        let unparsed = TraceBuilder::start("{ raw }", Some("Hint")).finish();
        assert_eq!(unparsed.signature, "{ raw }");
        assert_eq!(unparsed.operation_name, "Hint");
    }

    #[test]
    fn test_duration_and_timestamps() {
        let builder = TraceBuilder::start("q", None);
        thread::sleep(Duration::from_millis(2));
        let trace = builder.finish();

        assert!(trace.duration_ns > 0);
        assert!(trace.end_time > trace.start_time);
        let span = trace.end_time.duration_since(trace.start_time).unwrap();
        assert!(span >= Duration::from_millis(2));
    }

    #[test]
    fn test_top_level_field_without_path() {
        let builder = TraceBuilder::start("q", None);
        builder.record_field_resolution(Path::root(), "echo", "echo", "String!", "Query", 1, 2);
        let trace = builder.finish();
        assert_eq!(trace.root.children[0].response_name(), Some("echo"));
    }

    #[test]
    fn test_nested_field_path_ends_with_its_name() {
        let builder = TraceBuilder::start("q", None);
        let path = Path::root().field("users").index(0).field("id");
        builder.record_field_resolution(path.clone(), "id", "id", "ID!", "User", 1, 2);
        let trace = builder.finish();

        let id = trace.root.descend(&path).unwrap();
        assert_eq!(id.field_type, "ID!");
        assert_eq!(trace.root.children[0].field_type, "");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not end with")]
    fn test_parent_path_for_nested_field_is_rejected() {
        let builder = TraceBuilder::start("q", None);
        let parent = Path::root().field("users").index(0);
        builder.record_field_resolution(parent.field("name"), "id", "id", "ID!", "User", 1, 2);
    }

    #[test]
    fn test_customizer_failure_still_returns_trace() {
        let failing: Arc<dyn TraceCustomizer> =
            Arc::new(|trace: &mut Trace, _: Option<&RequestContext>| {
                trace.client.name = "partial".into();
                Err::<(), BoxError>("no client header".into())
            });
        let trace = TraceBuilder::start("q", None).with_customizer(failing).finish();
        assert_eq!(trace.signature, "q");

        let panicking: Arc<dyn TraceCustomizer> =
            Arc::new(|_: &mut Trace, _: Option<&RequestContext>| -> Result<(), BoxError> {
                panic!("customizer bug")
            });
        let trace = TraceBuilder::start("q", None).with_customizer(panicking).finish();
        assert_eq!(trace.signature, "q");
    }

    #[test]
    fn test_customizer_sees_context() {
        let customizer: Arc<dyn TraceCustomizer> =
            Arc::new(|trace: &mut Trace, context: Option<&RequestContext>| -> Result<(), BoxError> {
                let name = context
                    .and_then(|c| c.downcast_ref::<String>())
                    .ok_or("missing context")?;
                trace.client.name = format!("client {}", name);
                Ok(())
            });
        let context: RequestContext = Arc::new("web".to_string());

        let trace = TraceBuilder::start("q", None)
            .with_context(context)
            .with_customizer(customizer)
            .finish();

        assert_eq!(trace.client.name, "client web");
    }
}
