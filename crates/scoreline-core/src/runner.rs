//! Periodic task runner with start/stop controls.
//!
//! [`IntervalTaskRunner`] drives one async task on a fixed interval:
//!
//! - **Immediate first run**: the task executes as soon as the runner starts
//! - **At most one in flight**: the task future is awaited inside the loop,
//!   so a slow execution delays the next one; ticks that fall due meanwhile
//!   are skipped, never queued or overlapped
//! - **Cooperative stop**: [`stop`](IntervalTaskRunner::stop) signals a
//!   `watch` channel; an in-flight execution finishes and is simply not
//!   rescheduled
//! - **Failure isolation**: task errors go to the injected error handler and
//!   panics are caught; the loop keeps ticking either way
//!
//! Both the mapping sync and the reconciliation engine are driven by their
//! own runner, as is the mapping cache pruning.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::locks;

/// Boxed future produced by one task execution.
pub type TaskFuture = BoxFuture<'static, Result<(), SyncError>>;

type Task = Arc<dyn Fn() -> TaskFuture + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Handle of a started run loop.
struct ActiveRun {
    /// Cancellation token observed by the loop.
    shutdown: watch::Sender<bool>,
    /// The spawned loop.
    handle: JoinHandle<()>,
}

/// Runs an async task now and then every `interval` until stopped.
pub struct IntervalTaskRunner {
    name: Arc<str>,
    task: Task,
    error_handler: ErrorHandler,
    active: Mutex<Option<ActiveRun>>,
}

impl IntervalTaskRunner {
    /// Create a stopped runner for `task`.
    ///
    /// The default error handler logs the error at `error` level.
    pub fn new<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let handler_name = Arc::clone(&name);
        Self {
            name,
            task: Arc::new(move || task().boxed()),
            error_handler: Arc::new(move |err: &SyncError| {
                error!(task = %handler_name, error = %err, "Polling task failed");
            }),
            active: Mutex::new(None),
        }
    }

    /// Replace the error handler invoked when an execution returns an error.
    #[must_use]
    pub fn with_error_handler(mut self, handler: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// The task name used in log output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the loop on the current tokio runtime.
    ///
    /// Returns `false` without side effects if the runner is already
    /// running or `interval` is zero.
    pub fn start(&self, interval: Duration) -> bool {
        let mut active = locks::lock(&self.active);
        if active.as_ref().is_some_and(|run| !run.handle.is_finished()) {
            info!(task = %self.name, "Polling already started");
            return false;
        }
        if interval.is_zero() {
            warn!(task = %self.name, "Refusing to poll with a zero interval");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.name),
            Arc::clone(&self.task),
            Arc::clone(&self.error_handler),
            interval,
            shutdown_rx,
        ));
        *active = Some(ActiveRun { shutdown, handle });

        info!(
            task = %self.name,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Polling started"
        );
        true
    }

    /// Stop scheduling further executions.
    ///
    /// An execution already in flight runs to completion. Returns `false`
    /// if the runner was not started.
    pub fn stop(&self) -> bool {
        let Some(run) = locks::lock(&self.active).take() else {
            return false;
        };
        // The loop may already have exited; a closed channel is fine.
        let _ = run.shutdown.send(true);
        info!(task = %self.name, "Polling stopped");
        true
    }

    /// Whether the loop is currently scheduled.
    pub fn is_running(&self) -> bool {
        locks::lock(&self.active)
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }
}

impl Drop for IntervalTaskRunner {
    fn drop(&mut self) {
        if let Some(run) = locks::lock(&self.active).take() {
            let _ = run.shutdown.send(true);
        }
    }
}

/// The scheduling loop. Exits once the shutdown flag is raised or the
/// runner handle is dropped.
async fn run_loop(
    name: Arc<str>,
    task: Task,
    error_handler: ErrorHandler,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                execute(&name, &task, &error_handler).await;
            }
        }
    }

    debug!(task = %name, "Polling loop exited");
}

/// Run one execution, routing errors and panics away from the loop.
async fn execute(name: &str, task: &Task, error_handler: &ErrorHandler) {
    match AssertUnwindSafe(task()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(task = name, error = %err, "Error executing polling task");
            error_handler(&err);
        }
        Err(_) => {
            error!(task = name, "Polling task panicked");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::FeedError;

    fn counting_runner(count: &Arc<AtomicUsize>) -> IntervalTaskRunner {
        let count = Arc::clone(count);
        IntervalTaskRunner::new("test polling", move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn exhausted() -> SyncError {
        SyncError::BootstrapExhausted {
            attempts: 1,
            source: FeedError::EmptyPayload,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn executes_immediately_then_every_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(&count);

        assert!(runner.start(Duration::from_millis(1000)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert!(runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(&count);

        runner.start(Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(runner.stop());

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!runner.is_running());
        assert!(!runner.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_to_start_twice() {
        let count = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(&count);

        assert!(runner.start(Duration::from_millis(1000)));
        assert!(!runner.start(Duration::from_millis(1000)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(&count);

        runner.start(Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(runner.start(Duration::from_millis(1000)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_rejected() {
        let count = Arc::new(AtomicUsize::new(0));
        let runner = counting_runner(&count);
        assert!(!runner.start(Duration::ZERO));
        assert!(!runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_handler_and_loop_continues() {
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let runner = IntervalTaskRunner::new("failing", || async { Err(exhausted()) })
            .with_error_handler(move |err| {
                assert!(matches!(err, SyncError::BootstrapExhausted { .. }));
                seen.fetch_add(1, Ordering::SeqCst);
            });

        runner.start(Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(failures.load(Ordering::SeqCst), 2);
        assert!(runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn panics_do_not_stop_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&count);
        let runner = IntervalTaskRunner::new("panicking", move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                assert!(n != 0, "first execution blows up");
                Ok(())
            }
        });

        runner.start(Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_never_overlaps() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let (f, p, r) = (Arc::clone(&in_flight), Arc::clone(&peak), Arc::clone(&runs));
        let runner = IntervalTaskRunner::new("slow", move || {
            let (f, p, r) = (Arc::clone(&f), Arc::clone(&p), Arc::clone(&r));
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst).saturating_add(1);
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2500)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        runner.start(Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(6000)).await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_execution_lets_it_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        let runner = IntervalTaskRunner::new("in-flight", move || {
            let done = Arc::clone(&done);
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        runner.start(Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(100)).await;
        runner.stop();

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
