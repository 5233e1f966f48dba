//! A Tokio-based bounded-parallelism executor offering batched index fan-out,
//! a cancellation-aware variant with first-error capture, and a long-lived,
//! draining worker pool with cooperative cancellation.

mod batch;
mod cancel;
mod error;
mod pool;
mod queue;
mod task;

pub use batch::{run_batched, run_batched_cancellable};
pub use cancel::{CancelFlag, CancelView};
pub use error::{BoxError, SharedError, TaskError};
pub use pool::WorkerPool;
pub use task::PoolTask;
