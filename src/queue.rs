use crate::task::QueuedTask;

use std::fmt;

use fibre::mpsc::{self, AsyncReceiver, AsyncSender, RecvError};
use tracing::warn;

/// An unbounded FIFO task queue, split into a clonable producer and a single
/// consumer half.
///
/// "Stop" for the pool is modeled as closing the producer side: the consumer
/// keeps draining whatever is already queued and only then observes
/// disconnection.
#[derive(Debug)]
pub(crate) struct TaskQueue {
  tx: AsyncSender<QueuedTask>,
  rx: AsyncReceiver<QueuedTask>,
}

impl TaskQueue {
  pub(crate) fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_async();
    Self { tx, rx }
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer, QueueConsumer) {
    (QueueProducer { tx: self.tx }, QueueConsumer { rx: self.rx })
  }
}

/// The producer handle for the `TaskQueue`. Clonable across submission sites.
#[derive(Clone)]
pub(crate) struct QueueProducer {
  tx: AsyncSender<QueuedTask>,
}

impl fmt::Debug for QueueProducer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("len", &self.len())
      .field("closed", &self.is_closed())
      .finish_non_exhaustive()
  }
}

impl QueueProducer {
  /// Enqueues a task. The queue is unbounded, so this never waits on
  /// capacity; it only fails once the queue has been closed. Returns whether
  /// the task was accepted.
  pub(crate) async fn send(&self, task: QueuedTask) -> bool {
    let accepted = self.tx.send(task).await.is_ok();
    if !accepted {
      warn!("Queue send failed, queue is closed.");
    }
    accepted
  }

  /// Closes the sending side of the queue. Queued tasks remain receivable.
  pub(crate) fn close(&self) {
    let _ = self.tx.close();
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  /// Number of tasks currently queued.
  pub(crate) fn len(&self) -> usize {
    self.tx.len()
  }
}

/// The consumer handle for the `TaskQueue`. Not clonable, enforcing the
/// single-consumer dispatch loop.
#[derive(Debug)]
pub(crate) struct QueueConsumer {
  rx: AsyncReceiver<QueuedTask>,
}

impl QueueConsumer {
  /// Receives the next task in FIFO order. Errors only once the queue is
  /// closed AND empty.
  pub(crate) async fn recv(&self) -> Result<QueuedTask, RecvError> {
    self.rx.recv().await
  }
}
