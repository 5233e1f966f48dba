use std::time::Duration;
use tracing::info;
use workbatch::run_batched;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Batched Fan-Out Example (total: 10, concurrency: 3) ---");

  run_batched(10, 3, |index| async move {
    info!("Unit {} starting.", index);
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("Unit {} finished.", index);
  })
  .await;

  info!("All 10 units completed, each batch joined before the next started.");
}
