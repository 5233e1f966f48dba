use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;
use workbatch::WorkerPool;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Worker Pool Example (3 workers, 12 tasks, cancel midway) ---");

  let pool = WorkerPool::new(3, Handle::current(), "demo_pool");
  let completed = Arc::new(AtomicUsize::new(0));

  for i in 0..12 {
    let completed = completed.clone();
    pool
      .submit_cancellable(move |view| async move {
        if view.is_cancelled() {
          info!("Task {} observed cancellation, skipping.", i);
          return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        completed.fetch_add(1, Ordering::Relaxed);
        info!("Task {} finished.", i);
        Ok(())
      })
      .await;
  }

  tokio::time::sleep(Duration::from_millis(150)).await;
  info!("Requesting cooperative cancellation.");
  pool.cancel();

  pool.wait_idle().await;
  info!(
    "Pool drained. {} of 12 tasks completed before cancellation took effect; first error: {:?}",
    completed.load(Ordering::Relaxed),
    pool.first_error()
  );

  pool.shutdown().await;
  info!("Pool shut down.");
}
