//! Report delivery to the remote collector.
//!
//! Each report is compressed once and then sent with a bounded number of
//! attempts. Attempts for different reports run concurrently, limited by the
//! connection pool size; attempts for one report are strictly sequential.

use crate::error::{EngineError, UploadError};
use async_trait::async_trait;
use fieldtrace_config::{UploadConfig, API_KEY_HEADER};
use fieldtrace_core::Report;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, error, info};

/// Accepts reports for asynchronous delivery.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Hands `report` over for delivery and returns without waiting.
    fn upload(&self, report: Report);

    /// Waits up to `timeout` for uploads already handed over to finish,
    /// then cancels whatever is still running. Returns the number of reports
    /// dropped by that cancellation.
    async fn drain(&self, timeout: Duration) -> usize;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-flight tracking
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(Arc::clone(self))
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the in-flight count when the delivery task ends, including
/// when it unwinds.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP uploader
// ─────────────────────────────────────────────────────────────────────────────

/// Posts gzip-compressed protobuf reports to the collector endpoint.
#[derive(Clone)]
pub struct HttpUploader {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    retry_delay: Duration,
    pool: Semaphore,
    in_flight: Arc<InFlight>,
    delivered: AtomicUsize,
    abandoned: AtomicUsize,
    closed: watch::Sender<bool>,
    runtime: Handle,
}

impl HttpUploader {
    /// Builds an uploader bound to the current Tokio runtime.
    pub fn new(config: &UploadConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let runtime = Handle::try_current()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .pool_max_idle_per_host(config.pool_size)
            .build()
            .map_err(EngineError::Client)?;
        let (closed, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                endpoint: config.endpoint.clone(),
                api_key: config.api_key.clone(),
                max_retries: config.max_retries,
                retry_delay: config.retry_delay(),
                pool: Semaphore::new(config.pool_size),
                in_flight: Arc::new(InFlight::default()),
                delivered: AtomicUsize::new(0),
                abandoned: AtomicUsize::new(0),
                closed,
                runtime,
            }),
        })
    }

    /// Number of reports handed over and not yet delivered or dropped.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.count()
    }

    /// Number of reports the collector accepted.
    pub fn delivered(&self) -> usize {
        self.inner.delivered.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    fn upload(&self, report: Report) {
        if *self.inner.closed.borrow() {
            error!(
                traces = report.trace_count(),
                "Uploader is closed; report dropped"
            );
            return;
        }
        let guard = self.inner.in_flight.enter();
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            let _guard = guard;
            inner.deliver(report).await;
        });
    }

    async fn drain(&self, timeout: Duration) -> usize {
        let in_flight = &self.inner.in_flight;
        if tokio::time::timeout(timeout, in_flight.wait_idle()).await.is_ok() {
            self.inner.closed.send_replace(true);
            return 0;
        }

        let before = self.inner.abandoned.load(Ordering::Acquire);
        self.inner.closed.send_replace(true);
        // Closing cancels pending attempts and retry waits, so this is prompt.
        in_flight.wait_idle().await;
        let abandoned = self.inner.abandoned.load(Ordering::Acquire) - before;
        if abandoned > 0 {
            error!(
                abandoned,
                timeout_ms = timeout.as_millis() as u64,
                "Shutdown timeout elapsed with uploads in flight; their reports are lost"
            );
        }
        abandoned
    }
}

impl Inner {
    async fn deliver(&self, report: Report) {
        let traces = report.trace_count();
        let body = match compress(&report.encode()) {
            Ok(body) => body,
            Err(e) => {
                error!(traces, "Report dropped: {}", e);
                return;
            }
        };

        let mut closed = self.closed.subscribe();
        let mut attempt: u32 = 0;
        loop {
            if *closed.borrow() {
                self.abandon(traces, attempt, "before the next attempt");
                return;
            }
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => {
                    self.abandon(traces, attempt, "during an attempt");
                    return;
                }
                result = self.attempt(body.clone()) => result,
            };
            match result {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::AcqRel);
                    debug!(traces, attempt, "Report delivered");
                    return;
                }
                Err(e) if attempt > self.max_retries => {
                    error!(traces, attempts = attempt, "Report dropped after final attempt: {}", e);
                    return;
                }
                Err(e) => {
                    info!(
                        attempt,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "Report upload failed, retrying: {}",
                        e
                    );
                    tokio::select! {
                        biased;
                        _ = closed.wait_for(|closed| *closed) => {
                            self.abandon(traces, attempt, "while waiting to retry");
                            return;
                        }
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }

    fn abandon(&self, traces: usize, attempt: u32, stage: &str) {
        self.abandoned.fetch_add(1, Ordering::AcqRel);
        error!(traces, attempt, "Uploader closed {}; report dropped", stage);
    }

    /// One POST. Holds a pool slot for the duration of the request only.
    async fn attempt(&self, body: Vec<u8>) -> Result<(), UploadError> {
        let _permit = self.pool.acquire().await.map_err(|_| UploadError::Closed)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_ENCODING, "gzip")
            .body(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(UploadError::Status(status.as_u16())),
        }
    }
}

fn compress(payload: &[u8]) -> Result<Vec<u8>, UploadError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}
