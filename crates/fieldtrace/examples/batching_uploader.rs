//! Traces a handful of simulated requests and uploads them to a local
//! stand-in collector that rejects its first delivery.
//!
//! Run with: cargo run --example batching_uploader

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use fieldtrace::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Default)]
struct StandIn {
    deliveries: AtomicUsize,
    bytes: AtomicUsize,
}

async fn ingest(State(stand_in): State<Arc<StandIn>>, body: Bytes) -> StatusCode {
    let n = stand_in.deliveries.fetch_add(1, Ordering::SeqCst);
    if n == 0 {
        info!("Collector: rejecting first delivery");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    stand_in.bytes.fetch_add(body.len(), Ordering::SeqCst);
    info!(bytes = body.len(), "Collector: report accepted");
    StatusCode::OK
}

async fn start_collector() -> Result<(String, Arc<StandIn>)> {
    let stand_in = Arc::new(StandIn::default());
    let app = Router::new()
        .route("/api/ingress/traces", post(ingest))
        .with_state(stand_in.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Collector stopped: {}", e);
        }
    });
    Ok((format!("http://{}/api/ingress/traces", addr), stand_in))
}

fn simulate(instrumentation: &Instrumentation, operation: &str, users: u32) {
    let request = instrumentation.request_started(RequestStarted {
        query: format!("query {} {{ users {{ id name }} }}", operation),
        operation_name: Some(operation.into()),
        variables: json!({"token": "secret", "limit": users}).as_object().cloned(),
        context: None,
    });
    instrumentation.operation_parsed(
        &request,
        OperationParsed {
            operation_name: Some(operation.into()),
            signature: format!("query {}{{users{{id name}}}}", operation),
        },
    );

    let start = request.offset_ns();
    for i in 0..users {
        for field in ["id", "name"] {
            let begin = request.offset_ns();
            instrumentation.field_resolved(
                &request,
                FieldResolved {
                    path: Path::root().field("users").index(i).field(field),
                    response_name: field.into(),
                    original_field_name: field.into(),
                    field_type: "String!".into(),
                    parent_type: "User".into(),
                    start_offset_ns: begin,
                    end_offset_ns: request.offset_ns(),
                },
            );
        }
    }
    instrumentation.field_resolved(
        &request,
        FieldResolved {
            path: Path::root().field("users"),
            response_name: "users".into(),
            original_field_name: "users".into(),
            field_type: "[User!]!".into(),
            parent_type: "Query".into(),
            start_offset_ns: start,
            end_offset_ns: request.offset_ns(),
        },
    );
    if users == 0 {
        instrumentation.error_raised(
            &request,
            ErrorRaised {
                path: Some(Path::root().field("users")),
                message: "no users".into(),
                detail: json!({"message": "no users"}),
                locations: vec![Location::new(1, 20)],
            },
        );
    }
    instrumentation.request_completed(request);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let (endpoint, stand_in) = start_collector().await?;
    let config = TracingConfig {
        batch: BatchConfig {
            batching_window_ms: 500,
            queue_capacity: 256,
            workers: 2,
            shutdown_timeout_ms: 5000,
        },
        upload: UploadConfig {
            endpoint,
            api_key: "service:demo:key".into(),
            max_retries: 2,
            retry_delay_ms: 200,
            connect_timeout_ms: 500,
            read_timeout_ms: 3000,
            pool_size: 4,
        },
    };
    config.validate()?;

    let header: Arc<dyn HeaderCustomizer> =
        Arc::new(|header: &mut ReportHeader| -> Result<(), BoxError> {
            header.hostname = "demo-host".into();
            header.agent_version = format!("fieldtrace {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        });
    let pipeline = FieldTracing::start(&config, Some(header))?;
    let instrumentation = pipeline
        .instrumentation()
        .with_sanitizer(VariablesSanitizer::map_values(|v| match v {
            serde_json::Value::Number(_) => v.clone(),
            _ => json!("[FILTERED]"),
        }));

    for round in 0..3u32 {
        simulate(&instrumentation, "ListUsers", round + 1);
        simulate(&instrumentation, "EmptyUsers", 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    let stats = pipeline.stats();
    info!(
        submitted = stats.submitted,
        dropped = stats.dropped,
        reports = stats.reports,
        "Queue stats before shutdown"
    );

    let summary = pipeline.shutdown().await;
    info!(
        traces_flushed = summary.traces_flushed,
        uploads_abandoned = summary.uploads_abandoned,
        deliveries = stand_in.deliveries.load(Ordering::SeqCst),
        accepted_bytes = stand_in.bytes.load(Ordering::SeqCst),
        "Done"
    );
    Ok(())
}
