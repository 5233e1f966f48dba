use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// The error type units of work fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The retained form of a captured error. Handed out by clone so the first
/// error stays readable for the lifetime of the run or pool.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure surfaced by `run_batched_cancellable` and `WorkerPool::first_error`.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
  /// A unit of work returned an error.
  #[error("unit of work failed: {0}")]
  Failed(SharedError),

  /// A unit of work panicked; the panic was contained by the executor.
  #[error("unit of work panicked")]
  Panicked,
}

/// First-error-wins capture cell.
///
/// Once occupied it never changes; later errors are logged and discarded.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot {
  inner: Mutex<Option<TaskError>>,
}

impl ErrorSlot {
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(None),
    }
  }

  /// Stores `err` if the slot is empty. Returns `true` if this call was the
  /// first writer.
  pub(crate) fn record(&self, err: TaskError) -> bool {
    let mut guard = self.inner.lock();
    if guard.is_none() {
      *guard = Some(err);
      true
    } else {
      debug!(discarded = %err, "Error slot already occupied, discarding later error.");
      false
    }
  }

  /// Clones the captured error out, if any. Repeatable.
  pub(crate) fn get(&self) -> Option<TaskError> {
    self.inner.lock().clone()
  }

  /// Moves the captured error out, leaving the slot empty.
  pub(crate) fn take(&self) -> Option<TaskError> {
    self.inner.lock().take()
  }
}
