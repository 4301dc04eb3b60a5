//! Graceful shutdown coordination.
//!
//! State machine: `Running → Draining → Stopped`. While draining, new work
//! is refused and in-flight work gets a bounded grace period. Work still
//! running at the deadline is force-terminated through a cancellation token
//! every request context derives from. Resources are then closed by stage.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::ShutdownConfig;
use crate::observability::metrics;
use crate::telemetry::{ExportError, RequestContext, SpanProcessor};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownState::Running,
            1 => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }
}

/// How the drain phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Complete,
    Forced { remaining: usize },
}

/// Release order. Lower stages close first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Listeners and consumers: the sources of new work.
    Inbound,
    /// Clients for downstream calls.
    Outbound,
    /// Span export buffers.
    Telemetry,
}

#[derive(Debug, Error)]
pub enum CloseError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("span export failed: {0}")]
    Export(#[from] ExportError),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Failed(BoxError),
}

/// Something that must be released on shutdown.
#[async_trait]
pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    async fn close(&self) -> Result<(), CloseError>;

    /// Called when `close` overran the close timeout.
    fn abort(&self) {}
}

#[derive(Debug, Clone)]
pub struct CloseFailure {
    pub resource: String,
    pub stage: Stage,
    pub error: Arc<CloseError>,
}

/// What happened during shutdown. Every `shutdown` caller gets the same one.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub drain: DrainOutcome,
    pub close_failures: Vec<CloseFailure>,
}

impl ShutdownReport {
    /// A forced drain still exits successfully; only failed closes do not.
    pub fn exit_code(&self) -> i32 {
        if self.close_failures.is_empty() {
            0
        } else {
            1
        }
    }
}

struct Registered {
    stage: Stage,
    resource: Box<dyn Resource>,
}

struct Inner {
    state: AtomicU8,
    in_flight: AtomicUsize,
    idle: Notify,
    grace_period: Duration,
    close_timeout: Duration,
    stop: CancellationToken,
    draining: CancellationToken,
    force: CancellationToken,
    resources: Mutex<Vec<Registered>>,
    done: watch::Sender<Option<ShutdownReport>>,
}

/// Coordinates graceful shutdown across services. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration, close_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ShutdownState::Running as u8),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                grace_period,
                close_timeout,
                stop: CancellationToken::new(),
                draining: CancellationToken::new(),
                force: CancellationToken::new(),
                resources: Mutex::new(Vec::new()),
                done: watch::Sender::new(None),
            }),
        }
    }

    pub fn from_config(config: &ShutdownConfig) -> Self {
        Self::new(config.grace_period(), config.close_timeout())
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Admit one unit of inbound work. Returns `None` once draining began.
    pub fn track(&self) -> Option<InFlightGuard> {
        // Count first so a concurrent drain either sees this call or we see it.
        let count = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = InFlightGuard {
            inner: self.inner.clone(),
        };
        if !self.is_accepting() {
            drop(guard);
            return None;
        }
        metrics::set_in_flight(count);
        Some(guard)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Cancelled when draining begins. Servers stop accepting on it.
    pub fn draining(&self) -> CancellationToken {
        self.inner.draining.clone()
    }

    /// Cancelled when the grace period runs out.
    pub fn force_token(&self) -> CancellationToken {
        self.inner.force.clone()
    }

    /// Root context for inbound work; cancelled on forced termination.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::with_cancellation(&self.inner.force)
    }

    pub fn register(&self, stage: Stage, resource: impl Resource + 'static) {
        self.inner
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registered {
                stage,
                resource: Box::new(resource),
            });
    }

    /// Ask a running `run` to start shutting down.
    pub fn request_stop(&self) {
        self.inner.stop.cancel();
    }

    /// Wait for `signal` or [`request_stop`](Self::request_stop), then shut down.
    pub async fn run<F>(&self, signal: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = signal => {}
            _ = self.inner.stop.cancelled() => {}
        }
        self.shutdown().await
    }

    /// Drain, stop, then release resources. Only the first call does work;
    /// later callers wait for it and receive its report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let started = self.inner.state.compare_exchange(
            ShutdownState::Running as u8,
            ShutdownState::Draining as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if started.is_err() {
            tracing::warn!("Shutdown already in progress, waiting for it");
            return self.first_report().await;
        }

        self.inner.draining.cancel();
        tracing::info!(
            in_flight = self.in_flight(),
            grace_period = ?self.inner.grace_period,
            "Draining in-flight work"
        );

        let drain = self.wait_for_drain(self.inner.grace_period).await;
        if let DrainOutcome::Forced { remaining } = drain {
            tracing::warn!(remaining, "Grace period elapsed, forcing termination");
            metrics::record_forced_shutdown();
            self.inner.force.cancel();
        }

        self.inner
            .state
            .store(ShutdownState::Stopped as u8, Ordering::SeqCst);

        let close_failures = self.release().await;
        tracing::info!(?drain, failures = close_failures.len(), "Shutdown complete");

        let report = ShutdownReport {
            drain,
            close_failures,
        };
        self.inner.done.send_replace(Some(report.clone()));
        report
    }

    async fn first_report(&self) -> ShutdownReport {
        let mut done = self.inner.done.subscribe();
        let report = done
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|report| (*report).clone());
        // The sender lives as long as `inner`, so the wait cannot fail.
        report.unwrap_or(ShutdownReport {
            drain: DrainOutcome::Complete,
            close_failures: Vec::new(),
        })
    }

    async fn wait_for_drain(&self, timeout: Duration) -> DrainOutcome {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let count = self.in_flight();
            if count == 0 {
                return DrainOutcome::Complete;
            }

            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    let remaining = self.in_flight();
                    if remaining == 0 {
                        return DrainOutcome::Complete;
                    }
                    return DrainOutcome::Forced { remaining };
                }
            }
        }
    }

    async fn release(&self) -> Vec<CloseFailure> {
        let mut resources = std::mem::take(
            &mut *self
                .inner
                .resources
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        // Stable: registration order within a stage.
        resources.sort_by_key(|r| r.stage);

        let mut failures = Vec::new();
        for Registered { stage, resource } in resources {
            let name = resource.name().to_string();
            let result = match tokio::time::timeout(self.inner.close_timeout, resource.close()).await {
                Ok(result) => result,
                Err(_) => {
                    resource.abort();
                    Err(CloseError::TimedOut(self.inner.close_timeout))
                }
            };
            match result {
                Ok(()) => tracing::debug!(resource = %name, ?stage, "Closed"),
                Err(error) => {
                    tracing::error!(resource = %name, ?stage, %error, "Failed to close resource");
                    failures.push(CloseFailure {
                        resource: name,
                        stage,
                        error: Arc::new(error),
                    });
                }
            }
        }
        failures
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// RAII guard for in-flight work tracking.
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let left = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_in_flight(left);
        if left == 0 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InFlightGuard")
    }
}

/// A spawned server loop. Closing waits for it to return; overrunning the
/// close timeout aborts it.
pub struct ServerTask {
    name: String,
    handle: tokio::sync::Mutex<Option<JoinHandle<Result<(), BoxError>>>>,
    abort: AbortHandle,
}

impl ServerTask {
    pub fn new(name: impl Into<String>, handle: JoinHandle<Result<(), BoxError>>) -> Self {
        let abort = handle.abort_handle();
        Self {
            name: name.into(),
            handle: tokio::sync::Mutex::new(Some(handle)),
            abort,
        }
    }
}

#[async_trait]
impl Resource for ServerTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> Result<(), CloseError> {
        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => handle.await?.map_err(CloseError::Failed),
            None => Ok(()),
        }
    }

    fn abort(&self) {
        self.abort.abort();
    }
}

/// Releases a value by dropping it (connection pools, channels).
pub struct Release<T> {
    name: String,
    value: Mutex<Option<T>>,
}

impl<T> Release<T> {
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(Some(value)),
        }
    }
}

#[async_trait]
impl<T: Send> Resource for Release<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> Result<(), CloseError> {
        let value = self
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(value);
        Ok(())
    }
}

#[async_trait]
impl Resource for Arc<SpanProcessor> {
    fn name(&self) -> &str {
        "span exporter"
    }

    async fn close(&self) -> Result<(), CloseError> {
        self.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn coordinator() -> ShutdownCoordinator {
        ShutdownCoordinator::new(Duration::from_secs(5), Duration::from_secs(1))
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl Resource for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn close(&self) -> Result<(), CloseError> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                Err(CloseError::Failed("refused".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Stuck {
        aborted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Resource for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn close(&self) -> Result<(), CloseError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn abort(&self) {
            self.aborted.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn track_refused_once_draining() {
        let shutdown = coordinator();
        let guard = shutdown.track().unwrap();
        assert_eq!(shutdown.in_flight(), 1);

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.shutdown().await })
        };
        shutdown.draining().cancelled().await;

        assert_eq!(shutdown.state(), ShutdownState::Draining);
        assert!(shutdown.track().is_none());
        assert_eq!(shutdown.in_flight(), 1);

        drop(guard);
        let report = handle.await.unwrap();
        assert_eq!(report.drain, DrainOutcome::Complete);
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_work_finishing_within_grace_is_not_forced() {
        let shutdown = coordinator();
        for delay in [100u64, 500, 2000] {
            let guard = shutdown.track().unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                drop(guard);
            });
        }

        let report = shutdown.shutdown().await;

        assert_eq!(report.drain, DrainOutcome::Complete);
        assert!(!shutdown.force_token().is_cancelled());
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_work_is_forced_at_deadline() {
        let shutdown = coordinator();
        let ctx = shutdown.request_context();
        let _guard = shutdown.track().unwrap();

        let started = tokio::time::Instant::now();
        let report = shutdown.shutdown().await;

        assert_eq!(report.drain, DrainOutcome::Forced { remaining: 1 });
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(ctx.is_cancelled());
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn resources_close_by_stage_and_failures_are_collected() {
        let shutdown = coordinator();
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = |name, fail| Recorder {
            name,
            log: log.clone(),
            fail,
        };
        shutdown.register(Stage::Telemetry, recorder("exporter", false));
        shutdown.register(Stage::Outbound, recorder("rpc client", true));
        shutdown.register(Stage::Inbound, recorder("listener", false));
        shutdown.register(Stage::Outbound, recorder("publisher", false));

        let report = shutdown.shutdown().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["listener", "rpc client", "publisher", "exporter"]
        );
        assert_eq!(report.close_failures.len(), 1);
        assert_eq!(report.close_failures[0].resource, "rpc client");
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_close_times_out_and_aborts() {
        let shutdown = coordinator();
        let aborted = Arc::new(AtomicBool::new(false));
        shutdown.register(
            Stage::Inbound,
            Stuck {
                aborted: aborted.clone(),
            },
        );

        let report = shutdown.shutdown().await;

        assert!(aborted.load(Ordering::SeqCst));
        assert!(matches!(
            *report.close_failures[0].error,
            CloseError::TimedOut(_)
        ));
    }

    #[tokio::test]
    async fn server_task_reports_its_error() {
        let shutdown = coordinator();
        let handle = tokio::spawn(async { Err::<(), BoxError>("bind lost".into()) });
        shutdown.register(Stage::Inbound, ServerTask::new("http", handle));

        let report = shutdown.shutdown().await;

        assert_eq!(report.close_failures.len(), 1);
        assert_eq!(report.close_failures[0].error.to_string(), "bind lost");
    }

    #[tokio::test]
    async fn run_waits_for_stop_request() {
        let shutdown = coordinator();
        let runner = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.run(std::future::pending()).await })
        };
        tokio::task::yield_now().await;
        assert!(shutdown.is_accepting());

        shutdown.request_stop();
        let report = runner.await.unwrap();
        assert_eq!(report.drain, DrainOutcome::Complete);
    }

    #[tokio::test]
    async fn second_shutdown_repeats_the_first_report() {
        let shutdown = coordinator();
        let log = Arc::new(Mutex::new(Vec::new()));
        shutdown.register(
            Stage::Outbound,
            Recorder {
                name: "rpc client",
                log: log.clone(),
                fail: true,
            },
        );

        let first = shutdown.shutdown().await;
        let second = shutdown.shutdown().await;

        assert_eq!(*log.lock().unwrap(), vec!["rpc client"]);
        assert_eq!(second.drain, first.drain);
        assert_eq!(second.close_failures.len(), 1);
        assert_eq!(second.exit_code(), 1);
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_shutdown_waits_for_the_forced_drain() {
        let shutdown = coordinator();
        let _guard = shutdown.track().unwrap();

        let first = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.shutdown().await })
        };
        shutdown.draining().cancelled().await;

        let started = tokio::time::Instant::now();
        let second = shutdown.shutdown().await;

        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(second.drain, DrainOutcome::Forced { remaining: 1 });
        assert_eq!(first.await.unwrap().drain, DrainOutcome::Forced { remaining: 1 });
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
    }
}
