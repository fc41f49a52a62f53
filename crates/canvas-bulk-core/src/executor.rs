//! Windowed batch executor.
//!
//! Tasks are split into contiguous windows of `batch_size`. Every task in a
//! window runs concurrently and the window always settles completely before
//! the executor checks cancellation, pauses, and moves on. Window size is
//! the only backpressure against the remote API.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::{BoxFuture, join_all};

use crate::error::{BatchError, TaskError};
use crate::outcome::{BatchResult, classify};
use crate::progress::{ProgressEvent, ProgressSink};

type Operation<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, TaskError>> + Send>;

/// One unit of work: an id and a deferred operation.
///
/// The operation is not invoked until its window starts.
pub struct Task<I, T> {
    pub id: I,
    operation: Operation<T>,
}

impl<I, T> Task<I, T> {
    pub fn new<F, Fut>(id: I, operation: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Self {
            id,
            operation: Box::new(move || Box::pin(operation())),
        }
    }
}

impl<I: fmt::Debug, T> fmt::Debug for Task<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Per-invocation executor settings.
#[derive(Clone)]
pub struct BatchConfig {
    /// Tasks per window, at least 1
    pub batch_size: usize,
    /// Pause between windows (not after the last one)
    pub inter_batch_delay: Duration,
    is_cancelled: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl BatchConfig {
    /// Config with no delay that is never cancelled.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            inter_batch_delay: Duration::ZERO,
            is_cancelled: Arc::new(|| false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    /// Cancellation predicate, polled once per window boundary
    pub fn with_cancellation(mut self, is_cancelled: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.is_cancelled = Arc::new(is_cancelled);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        (self.is_cancelled)()
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.batch_size == 0 {
            return Err(BatchError::InvalidBatchSize(self.batch_size));
        }
        Ok(())
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("batch_size", &self.batch_size)
            .field("inter_batch_delay", &self.inter_batch_delay)
            .finish_non_exhaustive()
    }
}

/// Executor lifecycle. Window indexes are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    RunningWindow(usize),
    CancelledAfter(usize),
    Completed,
}

impl ExecutorState {
    /// Transition taken once window `window` of `windows` has settled.
    pub fn after_window(window: usize, windows: usize, cancelled: bool) -> Self {
        if cancelled {
            Self::CancelledAfter(window)
        } else if window < windows {
            Self::RunningWindow(window + 1)
        } else {
            Self::Completed
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CancelledAfter(_) | Self::Completed)
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::RunningWindow(k) => write!(f, "running window {k}"),
            Self::CancelledAfter(k) => write!(f, "cancelled after window {k}"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

/// Run `tasks` in windows and aggregate every settled outcome.
///
/// Fails only for a malformed config; task failures land in
/// [`BatchResult::failed`]. Cancellation is checked after each window, so a
/// started window always runs to completion.
pub async fn run_batches<I, T, P>(
    tasks: Vec<Task<I, T>>,
    config: &BatchConfig,
    progress: &P,
) -> Result<BatchResult<I, T>, BatchError>
where
    P: ProgressSink + ?Sized,
{
    config.validate()?;

    let total = tasks.len();
    if total == 0 {
        return Ok(BatchResult::default());
    }

    let windows = total.div_ceil(config.batch_size);
    let mut result = BatchResult {
        successful: Vec::with_capacity(total),
        ..BatchResult::default()
    };
    let processed = AtomicUsize::new(0);
    let mut pending = tasks.into_iter();
    let mut state = ExecutorState::Idle;
    log::debug!(
        "{total} tasks in {windows} windows of {} ({state})",
        config.batch_size
    );
    progress.report(ProgressEvent::Determinate { total });

    let mut window = 1;
    while !state.is_terminal() {
        state = ExecutorState::RunningWindow(window);
        log::debug!("{state}/{windows}");

        let (ids, operations): (Vec<I>, Vec<_>) = pending
            .by_ref()
            .take(config.batch_size)
            .map(|task| (task.id, (task.operation)()))
            .unzip();
        let size = ids.len();

        let label = format!("window {window}/{windows}");
        let settled = join_all(operations.into_iter().map(|operation| {
            let processed = &processed;
            let label = &label;
            async move {
                let res = operation.await;
                let n = processed.fetch_add(1, Ordering::Relaxed) + 1;
                progress.report(ProgressEvent::Advanced {
                    processed: n,
                    total,
                    label: label.clone(),
                });
                res
            }
        }))
        .await;

        let failed_before = result.failed.len();
        for (id, res) in ids.into_iter().zip(settled) {
            result.push(classify(id, res));
        }
        let window_failures = result.failed.len() - failed_before;
        if window_failures > 0 {
            log::info!("{label}: {window_failures}/{size} tasks failed");
        }
        progress.report(ProgressEvent::WindowSettled {
            window,
            windows,
            size,
        });

        state = ExecutorState::after_window(window, windows, config.is_cancelled());
        match state {
            ExecutorState::CancelledAfter(k) => {
                log::warn!(
                    "cancelled after window {k}/{windows}: {}/{total} tasks settled",
                    result.processed()
                );
                result.cancelled = true;
            }
            ExecutorState::RunningWindow(next) => {
                if !config.inter_batch_delay.is_zero() {
                    tokio::time::sleep(config.inter_batch_delay).await;
                }
                window = next;
            }
            ExecutorState::Completed | ExecutorState::Idle => {}
        }
    }

    log::debug!("{state}");
    progress.report(ProgressEvent::Done);
    Ok(result)
}
