use crate::error::BoxError;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// The type of future the worker pool executes. Fire-and-forget: the pool
/// retains only the first error, via its error slot.
pub type PoolTask = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'static>>;

/// Internal representation of a queued task.
pub(crate) struct QueuedTask {
  pub(crate) task_id: u64,
  pub(crate) future: PoolTask,
}

impl fmt::Debug for QueuedTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueuedTask")
      .field("task_id", &self.task_id)
      .finish_non_exhaustive()
  }
}
