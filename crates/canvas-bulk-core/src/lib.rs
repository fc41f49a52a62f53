//! canvas-bulk core - batch execution for bulk learning-platform API operations
//!
//! Provides a windowed concurrent task executor with inter-batch pacing,
//! cooperative per-session cancellation, outcome aggregation, and the
//! paginated-fetch walkers that feed it work.

pub mod cancel;
pub mod error;
pub mod executor;
pub mod http;
pub mod logging;
pub mod outcome;
pub mod pagination;
pub mod progress;
pub mod retry;

// Re-exports for convenience
pub use cancel::{CancelFlag, CancellationGuard, CancellationRegistry};
pub use error::{BatchError, PaginationError, Status, TaskError};
pub use executor::{BatchConfig, ExecutorState, Task, run_batches};
pub use http::{ApiClient, ApiResponse, ClientSettings, SHARED_RUNTIME, Transport};
pub use logging::{IndicatifLogger, init_logging};
pub use outcome::{BatchResult, Failure, Outcome, Success, classify};
pub use pagination::{CursorQuery, fetch_all_cursor, fetch_all_linked, next_link};
pub use progress::{
    LogProgress, NoProgress, ProgressContext, ProgressEvent, ProgressSink, SharedProgress,
};
pub use retry::{RetryPolicy, with_retry, with_retry_when};
