//! Background span export.
//!
//! `end_span` hands completed spans to a bounded queue and returns
//! immediately. A dedicated drain task batches them and calls the exporter,
//! so request latency never depends on exporter health. A full queue drops
//! the span and counts it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::telemetry::export::{ExportError, SpanExporter};
use crate::telemetry::span::SpanData;

/// Batching parameters.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub queue_capacity: usize,
    pub max_batch_size: usize,
    pub interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2048,
            max_batch_size: 512,
            interval: Duration::from_secs(5),
        }
    }
}

/// Producer side of the export queue. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct SpanQueue {
    tx: mpsc::Sender<SpanData>,
}

impl SpanQueue {
    pub fn submit(&self, span: SpanData) {
        match self.tx.try_send(span) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => metrics::record_spans_dropped("queue_full", 1),
            Err(mpsc::error::TrySendError::Closed(_)) => metrics::record_spans_dropped("closed", 1),
        }
    }
}

/// Owner of the drain task.
pub struct SpanProcessor {
    queue: SpanQueue,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SpanProcessor {
    /// Spawn the drain task on the current runtime.
    pub fn spawn(exporter: Arc<dyn SpanExporter>, config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stop = CancellationToken::new();
        let task = tokio::spawn(drain(rx, exporter, config, stop.clone()));
        Self {
            queue: SpanQueue { tx },
            stop,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn queue(&self) -> SpanQueue {
        self.queue.clone()
    }

    /// Export whatever is still queued, then stop the drain task.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), ExportError> {
        self.stop.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => task.await.map_err(|e| ExportError::Task(e.to_string())),
            None => Ok(()),
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<SpanData>,
    exporter: Arc<dyn SpanExporter>,
    config: BatchConfig,
    stop: CancellationToken,
) {
    let max_batch = config.max_batch_size.max(1);
    let mut batch = Vec::with_capacity(max_batch);
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            received = rx.recv() => match received {
                Some(span) => {
                    batch.push(span);
                    if batch.len() >= max_batch {
                        flush(exporter.as_ref(), &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => flush(exporter.as_ref(), &mut batch).await,
        }
    }

    rx.close();
    while let Ok(span) = rx.try_recv() {
        batch.push(span);
        if batch.len() >= max_batch {
            flush(exporter.as_ref(), &mut batch).await;
        }
    }
    flush(exporter.as_ref(), &mut batch).await;

    if let Err(e) = exporter.shutdown().await {
        tracing::warn!(error = %e, "Span exporter shutdown failed");
    }
    tracing::debug!("Span processor stopped");
}

async fn flush(exporter: &dyn SpanExporter, batch: &mut Vec<SpanData>) {
    if batch.is_empty() {
        return;
    }
    let spans = std::mem::take(batch);
    let count = spans.len();
    match exporter.export(spans).await {
        Ok(()) => metrics::record_spans_exported(count),
        Err(e) => {
            tracing::warn!(error = %e, spans = count, "Span export failed, batch dropped");
            metrics::record_spans_dropped("export_failed", count);
        }
    }
}
