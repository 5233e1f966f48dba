use crate::cancel::{CancelFlag, CancelView};
use crate::error::{BoxError, ErrorSlot, TaskError};

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, error, trace, warn};

/// Runs `make(index)` for every `index` in `1..=total`, at most `concurrency`
/// units at a time.
///
/// Work is launched in batches of `min(concurrency, remaining)`; a batch is
/// fully joined before the next one starts, so index order is ascending
/// across batch boundaries (and strictly ascending when `concurrency <= 1`,
/// which runs fully sequentially). Returns once every unit has completed.
///
/// This variant carries no failure containment. A panicking unit aborts the
/// run: the in-flight batch is joined and the panic is resumed on the caller.
/// Callers needing error capture should use [`run_batched_cancellable`].
pub async fn run_batched<F, Fut>(total: usize, concurrency: usize, make: F)
where
  F: Fn(usize) -> Fut,
  Fut: Future<Output = ()> + Send + 'static,
{
  if total == 0 {
    return;
  }

  if concurrency <= 1 {
    for index in 1..=total {
      make(index).await;
    }
    return;
  }

  let mut next = 1;
  while next <= total {
    let batch = concurrency.min(total - next + 1);
    trace!(next, batch, total, "Launching batch.");

    let mut handles = Vec::with_capacity(batch);
    for index in next..next + batch {
      handles.push(tokio::spawn(make(index)));
    }
    for join_result in join_all(handles).await {
      if let Err(join_error) = join_result {
        if join_error.is_panic() {
          std::panic::resume_unwind(join_error.into_panic());
        }
      }
    }
    next += batch;
  }
}

/// Cancellation-aware batched fan-out with first-error capture.
///
/// Identical batching shape to [`run_batched`], but each unit receives a
/// [`CancelView`] of the run's flag and may fail. The flag is checked before
/// each unit on the sequential path and before each batch on the concurrent
/// path; once set, no further work is scheduled. Units are expected to
/// early-return when they observe the view set. Cancellation is cooperative:
/// work that has already started is never interrupted.
///
/// The first unit to fail (error or panic) wins the capture; it also sets the
/// flag so scheduling stops. The in-flight batch still joins, and the captured
/// error is returned only after all launched work has completed. Later
/// failures are discarded.
///
/// When `flag` is supplied the run observes and mutates it in place: callers
/// can pre-cancel, inspect the flag afterwards, or share one flag across
/// several runs. Otherwise an internal flag is created.
pub async fn run_batched_cancellable<F, Fut>(
  total: usize,
  concurrency: usize,
  make: F,
  flag: Option<&CancelFlag>,
) -> Result<(), TaskError>
where
  F: Fn(usize, CancelView) -> Fut,
  Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
  let owned;
  let flag = match flag {
    Some(flag) => flag,
    None => {
      owned = CancelFlag::new();
      &owned
    }
  };

  if total == 0 {
    return Ok(());
  }

  let errors = Arc::new(ErrorSlot::new());

  if concurrency <= 1 {
    for index in 1..=total {
      if flag.is_cancelled() {
        debug!(index, "Cancellation observed, stopping sequential run.");
        break;
      }
      match AssertUnwindSafe(make(index, flag.view())).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
          warn!(index, error = %err, "Unit of work failed, cancelling run.");
          errors.record(TaskError::Failed(err.into()));
          flag.cancel();
          break;
        }
        Err(_panic_payload) => {
          error!(index, "Unit of work panicked, cancelling run.");
          errors.record(TaskError::Panicked);
          flag.cancel();
          break;
        }
      }
    }
  } else {
    let mut next = 1;
    while next <= total {
      if flag.is_cancelled() {
        debug!(next, "Cancellation observed, no further batches.");
        break;
      }
      let batch = concurrency.min(total - next + 1);
      trace!(next, batch, total, "Launching cancellable batch.");

      let mut handles = Vec::with_capacity(batch);
      for index in next..next + batch {
        let unit = make(index, flag.view());
        let errors = errors.clone();
        let flag = flag.clone();
        handles.push(tokio::spawn(async move {
          match AssertUnwindSafe(unit).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
              warn!(index, error = %err, "Unit of work failed, cancelling run.");
              errors.record(TaskError::Failed(err.into()));
              flag.cancel();
            }
            Err(_panic_payload) => {
              error!(index, "Unit of work panicked, cancelling run.");
              errors.record(TaskError::Panicked);
              flag.cancel();
            }
          }
        }));
      }
      // Panics are contained inside the spawned wrapper, so joining cannot
      // itself resume one; the batch is always fully drained.
      join_all(handles).await;
      next += batch;
    }
  }

  match errors.take() {
    Some(err) => Err(err),
    None => Ok(()),
  }
}
