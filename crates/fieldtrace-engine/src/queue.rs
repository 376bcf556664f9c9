//! Bounded trace buffer with periodic, report-sized flushes.

use crate::error::EngineError;
use crate::uploader::Uploader;
use fieldtrace_config::BatchConfig;
use fieldtrace_core::{BoxError, Report, ReportHeader, Trace, TraceSink};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Fills in the header of every outgoing report.
pub trait HeaderCustomizer: Send + Sync {
    fn customize(&self, header: &mut ReportHeader) -> Result<(), BoxError>;
}

impl<F> HeaderCustomizer for F
where
    F: Fn(&mut ReportHeader) -> Result<(), BoxError> + Send + Sync,
{
    fn customize(&self, header: &mut ReportHeader) -> Result<(), BoxError> {
        self(header)
    }
}

/// Snapshot of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Traces accepted into the buffer.
    pub submitted: u64,
    /// Traces rejected because the buffer was full or closed.
    pub dropped: u64,
    /// Traces handed to the uploader.
    pub flushed: u64,
    /// Reports handed to the uploader.
    pub reports: u64,
    /// Traces currently buffered.
    pub pending: usize,
}

/// Result of [`BatchQueue::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Traces flushed by the final drain.
    pub traces_flushed: usize,
    /// Reports still uploading when the shutdown timeout elapsed.
    pub uploads_abandoned: usize,
}

struct Buffer {
    traces: Vec<Trace>,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    reports: AtomicU64,
}

struct Shared {
    buffer: Mutex<Buffer>,
    capacity: usize,
    uploader: Arc<dyn Uploader>,
    header: Option<Arc<dyn HeaderCustomizer>>,
    counters: Counters,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drop_trace(&self, reason: &str) {
        let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(dropped, capacity = self.capacity, "Trace dropped: {}", reason);
    }

    /// Drains the buffer and uploads its contents as one report.
    fn flush(&self) -> usize {
        let traces = std::mem::take(&mut self.buffer().traces);
        if traces.is_empty() {
            return 0;
        }

        let count = traces.len();
        let report = Report::build(traces, self.header());
        debug!(
            traces = count,
            queries = report.traces_per_query.len(),
            "Flushing trace report"
        );
        self.counters.flushed.fetch_add(count as u64, Ordering::Relaxed);
        self.counters.reports.fetch_add(1, Ordering::Relaxed);
        self.uploader.upload(report);
        count
    }

    fn header(&self) -> ReportHeader {
        let mut header = ReportHeader::default();
        let Some(customizer) = &self.header else {
            return header;
        };
        match catch_unwind(AssertUnwindSafe(|| customizer.customize(&mut header))) {
            Ok(Ok(())) => header,
            Ok(Err(e)) => {
                warn!("Report header customizer failed: {}", e);
                ReportHeader::default()
            }
            Err(_) => {
                warn!("Report header customizer panicked");
                ReportHeader::default()
            }
        }
    }
}

/// Buffers finished traces and flushes them on a fixed window.
///
/// `submit` never blocks on I/O: a full buffer drops the trace. Flush workers
/// run on the Tokio runtime the queue was spawned on and stop when the queue
/// shuts down or is dropped.
pub struct BatchQueue {
    shared: Arc<Shared>,
    workers: usize,
    stop: watch::Sender<bool>,
    schedulers: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchQueue {
    /// Creates the queue and starts `config.workers` flush schedulers on the
    /// current Tokio runtime.
    ///
    /// The buffer grows on demand up to `config.queue_capacity`.
    pub fn spawn(
        config: &BatchConfig,
        uploader: Arc<dyn Uploader>,
        header: Option<Arc<dyn HeaderCustomizer>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let runtime = Handle::try_current()?;
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Buffer {
                traces: Vec::new(),
                closed: false,
            }),
            capacity: config.queue_capacity,
            uploader,
            header,
            counters: Counters::default(),
        });
        let workers = config.workers;
        let window = config.batching_window();
        let (stop, _) = watch::channel(false);

        let schedulers: Vec<_> = (0..workers)
            .map(|worker| {
                let shared = Arc::clone(&shared);
                let stop = stop.subscribe();
                runtime.spawn(schedule(worker, shared, window, stop))
            })
            .collect();

        info!(
            workers,
            capacity = config.queue_capacity,
            window_ms = config.batching_window_ms,
            "Trace queue started"
        );
        Ok(Self {
            shared,
            workers,
            stop,
            schedulers: Mutex::new(schedulers),
        })
    }

    /// Drains and uploads whatever is buffered right now.
    pub fn flush_now(&self) -> usize {
        self.shared.flush()
    }

    pub fn stats(&self) -> QueueStats {
        let counters = &self.shared.counters;
        QueueStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            flushed: counters.flushed.load(Ordering::Relaxed),
            reports: counters.reports.load(Ordering::Relaxed),
            pending: self.shared.buffer().traces.len(),
        }
    }

    /// Stops the schedulers, flushes every buffered trace and waits up to
    /// `timeout` for uploads to finish. Traces submitted afterwards are
    /// dropped.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownSummary {
        let deadline = Instant::now() + timeout;
        self.shared.buffer().closed = true;
        self.stop.send_replace(true);

        let schedulers = std::mem::take(
            &mut *self.schedulers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in schedulers {
            if let Err(e) = handle.await {
                warn!("Flush scheduler ended abnormally: {}", e);
            }
        }

        let traces_flushed: usize = (0..self.workers).map(|_| self.shared.flush()).sum();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let uploads_abandoned = self.shared.uploader.drain(remaining).await;

        info!(traces_flushed, uploads_abandoned, "Trace queue shut down");
        ShutdownSummary {
            traces_flushed,
            uploads_abandoned,
        }
    }
}

impl TraceSink for BatchQueue {
    fn submit(&self, trace: Trace) {
        let rejected = {
            let mut buffer = self.shared.buffer();
            if buffer.closed {
                Some("queue is shut down")
            } else if buffer.traces.len() >= self.shared.capacity {
                Some("queue is full")
            } else {
                buffer.traces.push(trace);
                None
            }
        };
        match rejected {
            Some(reason) => self.shared.drop_trace(reason),
            None => {
                self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        let pending = self.shared.buffer().traces.len();
        if pending > 0 {
            warn!(pending, "Trace queue dropped without shutdown; buffered traces are lost");
        }
    }
}

async fn schedule(
    worker: usize,
    shared: Arc<Shared>,
    window: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.flush();
            }
            // Also fires when the queue is dropped and the sender goes away.
            _ = stop.changed() => break,
        }
    }
    debug!(worker, "Flush scheduler stopped");
}
