use std::time::Duration;
use tracing::info;
use workbatch::{run_batched_cancellable, BoxError, CancelFlag};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Cancellable Batched Example (unit 7 of 20 fails) ---");

  let flag = CancelFlag::new();
  let result = run_batched_cancellable(
    20,
    4,
    |index, view| async move {
      if view.is_cancelled() {
        info!("Unit {} observed cancellation, skipping.", index);
        return Ok(());
      }
      tokio::time::sleep(Duration::from_millis(50)).await;
      if index == 7 {
        return Err::<(), BoxError>(format!("unit {} hit a simulated failure", index).into());
      }
      info!("Unit {} finished.", index);
      Ok(())
    },
    Some(&flag),
  )
  .await;

  match result {
    Ok(()) => info!("Run completed cleanly."),
    Err(err) => info!("Run stopped with the first captured error: {}", err),
  }
  info!("Flag cancelled after the run: {}", flag.is_cancelled());
}
