use crate::cancel::{CancelFlag, CancelView};
use crate::error::{BoxError, ErrorSlot, TaskError};
use crate::queue::{QueueConsumer, QueueProducer, TaskQueue};
use crate::task::{PoolTask, QueuedTask};

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// A long-lived pool executing submitted tasks with at most `workers` running
/// concurrently, in FIFO dequeue order.
///
/// The pool owns a cooperative [`CancelFlag`] and a first-error slot: the
/// first task to fail (error or panic) is recorded and additionally sets the
/// flag, after which cancellation-aware tasks are expected to observe their
/// [`CancelView`] and become no-ops. Queued tasks are never discarded by
/// `cancel` and running tasks are never interrupted.
pub struct WorkerPool {
  pool_name: Arc<String>,
  producer: QueueProducer,
  pending: Arc<AtomicUsize>,
  active: Arc<AtomicUsize>,
  idle: Arc<Notify>,
  cancel_flag: CancelFlag,
  errors: Arc<ErrorSlot>,
  dispatch_join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
  /// Creates a pool running at most `workers` tasks concurrently (values of 0
  /// are treated as 1). The dispatch loop and all tasks are spawned on
  /// `tokio_handle`.
  pub fn new(workers: usize, tokio_handle: TokioHandle, pool_name: &str) -> Self {
    let (producer, consumer) = TaskQueue::new().split();
    let pool_name_arc = Arc::new(pool_name.to_string());
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let pending = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let idle = Arc::new(Notify::new());
    let cancel_flag = CancelFlag::new();
    let errors = Arc::new(ErrorSlot::new());

    let loop_pool_name = pool_name_arc.clone();
    let loop_pending = pending.clone();
    let loop_active = active.clone();
    let loop_idle = idle.clone();
    let loop_cancel_flag = cancel_flag.clone();
    let loop_errors = errors.clone();
    let tasks_tokio_handle = tokio_handle.clone();

    let dispatch_join_handle = tokio_handle.spawn(
      async move {
        Self::run_dispatch_loop(
          loop_pool_name,
          semaphore,
          consumer,
          tasks_tokio_handle,
          loop_active,
          loop_pending,
          loop_idle,
          loop_cancel_flag,
          loop_errors,
        )
        .await;
      }
      .instrument(info_span!("worker_pool_dispatch_loop", name = %pool_name)),
    );

    Self {
      pool_name: pool_name_arc,
      producer,
      pending,
      active,
      idle,
      cancel_flag,
      errors,
      dispatch_join_handle: Mutex::new(Some(dispatch_join_handle)),
    }
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Number of tasks currently held by a worker.
  pub fn active_task_count(&self) -> usize {
    self.active.load(AtomicOrdering::SeqCst)
  }

  /// Number of tasks waiting in the queue.
  pub fn queued_task_count(&self) -> usize {
    self.producer.len()
  }

  /// Enqueues a task. Never waits beyond the enqueue itself (the queue is
  /// unbounded). Once the pool has been stopped the task is discarded.
  pub async fn submit(&self, task: PoolTask) {
    if self.producer.is_closed() {
      warn!(pool_name = %self.pool_name, "Submit: pool is stopped, discarding task.");
      return;
    }

    let task_id = NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    debug!(pool_name = %self.pool_name, %task_id, "Submitting task to queue.");

    self.pending.fetch_add(1, AtomicOrdering::SeqCst);
    let accepted = self
      .producer
      .send(QueuedTask {
        task_id,
        future: task,
      })
      .await;
    if !accepted {
      // Lost the race with a concurrent stop; the task is discarded.
      warn!(pool_name = %self.pool_name, %task_id, "Submit: pool stopped during enqueue, task discarded.");
      finish_one(&self.pending, &self.idle);
    }
  }

  /// Like [`submit`](Self::submit), but hands the task a read-only view of
  /// the pool's cancellation flag so it can cooperatively no-op once the pool
  /// is cancelled.
  pub async fn submit_cancellable<F, Fut>(&self, make: F)
  where
    F: FnOnce(CancelView) -> Fut,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
  {
    let view = self.cancel_flag.view();
    self.submit(Box::pin(make(view))).await;
  }

  /// Blocks until the queue is empty and no worker holds a task. Returns
  /// immediately when there is no pending work; safe to call repeatedly and
  /// concurrently with ongoing submissions (a task submitted while waiting is
  /// simply included in the drain check).
  pub async fn wait_idle(&self) {
    loop {
      let notified = self.idle.notified();
      tokio::pin!(notified);
      // Register interest before the check so a completion between the check
      // and the await cannot be missed.
      notified.as_mut().enable();
      if self.pending.load(AtomicOrdering::SeqCst) == 0 {
        return;
      }
      notified.await;
    }
  }

  /// Sets the pool's cancellation flag. Idempotent. Queued tasks still run;
  /// cancellation-aware ones are expected to observe the flag and return
  /// early.
  pub fn cancel(&self) {
    info!(pool_name = %self.pool_name, "Pool cancellation requested.");
    self.cancel_flag.cancel();
  }

  /// Read-only view of the pool's cancellation flag.
  pub fn cancel_flag(&self) -> CancelView {
    self.cancel_flag.view()
  }

  /// The first error captured from any task, if one has failed. Repeatable.
  pub fn first_error(&self) -> Option<TaskError> {
    self.errors.get()
  }

  /// Stops the pool: closes the queue to new submissions, lets the dispatch
  /// loop drain every already-queued task, joins it, then waits for in-flight
  /// tasks to finish.
  pub async fn shutdown(&self) {
    if !self.producer.is_closed() {
      info!(pool_name = %self.pool_name, "Initiating pool shutdown, closing queue to new submissions.");
      self.producer.close();
    }

    let handle_to_await = self.dispatch_join_handle.lock().take();
    if let Some(handle) = handle_to_await {
      info!(pool_name = %self.pool_name, "Waiting for dispatch loop to drain the queue and join.");
      if let Err(join_error) = handle.await {
        error!(pool_name = %self.pool_name, "Error joining dispatch loop during shutdown: {:?}", join_error);
      }
    } else {
      trace!(pool_name = %self.pool_name, "Dispatch join handle already taken by a concurrent shutdown call.");
    }

    // The dispatch loop exiting means the queue is drained, but the last
    // dispatched tasks may still be running.
    self.wait_idle().await;
    info!(pool_name = %self.pool_name, "Pool shutdown complete.");
  }

  #[allow(clippy::too_many_arguments)]
  async fn run_dispatch_loop(
    pool_name: Arc<String>,
    semaphore: Arc<Semaphore>,
    consumer: QueueConsumer,
    tasks_tokio_handle: TokioHandle,
    active: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    cancel_flag: CancelFlag,
    errors: Arc<ErrorSlot>,
  ) {
    info!(name = %*pool_name, "Dispatch loop started.");

    loop {
      let permit = match semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
          error!(name = %*pool_name, "Semaphore closed. Dispatch loop exiting.");
          break;
        }
      };
      trace!(name = %*pool_name, "Acquired permit. Available: {}", semaphore.available_permits());

      let queued = match consumer.recv().await {
        Ok(task) => task,
        Err(_) => {
          info!(name = %*pool_name, "Task queue closed and drained. Releasing permit, dispatch loop stopping.");
          drop(permit);
          break;
        }
      };

      let task_id = queued.task_id;
      active.fetch_add(1, AtomicOrdering::SeqCst);
      debug!(name = %*pool_name, %task_id, "Dequeued task. Spawning with permit.");

      let task_pool_name = pool_name.clone();
      let task_active = active.clone();
      let task_pending = pending.clone();
      let task_idle = idle.clone();
      let task_cancel_flag = cancel_flag.clone();
      let task_errors = errors.clone();

      tasks_tokio_handle.spawn(
        async move {
          let _permit_guard = permit;

          match AssertUnwindSafe(queued.future).catch_unwind().await {
            Ok(Ok(())) => {
              trace!(pool_name = %*task_pool_name, %task_id, "Task executed successfully.");
            }
            Ok(Err(err)) => {
              warn!(pool_name = %*task_pool_name, %task_id, error = %err, "Task failed. Recording error and cancelling pool flag.");
              task_errors.record(TaskError::Failed(err.into()));
              task_cancel_flag.cancel();
            }
            Err(_panic_payload) => {
              error!(pool_name = %*task_pool_name, %task_id, "Task panicked during execution.");
              task_errors.record(TaskError::Panicked);
              task_cancel_flag.cancel();
            }
          }

          task_active.fetch_sub(1, AtomicOrdering::SeqCst);
          finish_one(&task_pending, &task_idle);
        }
        .instrument(info_span!("pool_task", pool_name = %*pool_name, %task_id)),
      );
    }

    info!(
      name = %*pool_name,
      "Dispatch loop stopped. Tasks still in flight: {}",
      active.load(AtomicOrdering::SeqCst)
    );
  }
}

/// Marks one pending task (queued or active) as done and wakes idle waiters
/// when the count reaches zero.
fn finish_one(pending: &AtomicUsize, idle: &Notify) {
  if pending.fetch_sub(1, AtomicOrdering::SeqCst) == 1 {
    idle.notify_waiters();
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    // Non-blocking: close the queue so the dispatch loop drains what is left
    // and stops on its own. An explicit `shutdown` call will already have
    // closed it.
    if !self.producer.is_closed() {
      info!(
        pool_name = %*self.pool_name,
        "WorkerPool dropped without explicit shutdown. Closing queue; dispatch loop will drain and stop."
      );
      self.producer.close();
    }
  }
}
