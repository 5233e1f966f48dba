use workbatch::{run_batched, run_batched_cancellable, BoxError, CancelFlag, TaskError};

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Helper to initialize tracing for tests (Once ensures it runs only once).
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,workbatch=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_batched_counts_sequential_and_parallel() {
  setup_tracing_for_test();

  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  run_batched(17, 1, move |_| {
    let c = c.clone();
    async move {
      c.fetch_add(1, Ordering::Relaxed);
    }
  })
  .await;
  assert_eq!(count.load(Ordering::Relaxed), 17);

  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  run_batched(101, 4, move |_| {
    let c = c.clone();
    async move {
      c.fetch_add(1, Ordering::Relaxed);
    }
  })
  .await;
  assert_eq!(count.load(Ordering::Relaxed), 101);
}

#[tokio::test]
async fn run_batched_sequential_is_strictly_ascending() {
  setup_tracing_for_test();

  let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let s = seen.clone();
  run_batched(12, 1, move |index| {
    let s = s.clone();
    async move {
      s.lock().push(index);
    }
  })
  .await;

  let seen = seen.lock();
  assert_eq!(*seen, (1..=12).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_batched_joins_each_batch_before_the_next() {
  setup_tracing_for_test();

  let concurrency = 4;
  let completed = Arc::new(parking_lot::Mutex::new(HashSet::new()));
  let co = completed.clone();
  run_batched(20, concurrency, move |index| {
    let completed = co.clone();
    async move {
      // Everything more than one batch behind must already have finished,
      // because each batch is joined before the next starts.
      {
        let done = completed.lock();
        for earlier in 1..index.saturating_sub(concurrency - 1) {
          assert!(done.contains(&earlier), "index {} started before {} finished", index, earlier);
        }
      }
      tokio::task::yield_now().await;
      completed.lock().insert(index);
    }
  })
  .await;

  assert_eq!(completed.lock().len(), 20);
}

#[tokio::test]
async fn run_batched_total_zero_makes_no_calls() {
  setup_tracing_for_test();

  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  run_batched(0, 4, move |_| {
    let c = c.clone();
    async move {
      c.fetch_add(1, Ordering::Relaxed);
    }
  })
  .await;
  assert_eq!(count.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn run_batched_concurrency_zero_runs_sequentially() {
  setup_tracing_for_test();

  let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let s = seen.clone();
  run_batched(10, 0, move |index| {
    let s = s.clone();
    async move {
      s.lock().push(index);
    }
  })
  .await;
  assert_eq!(*seen.lock(), (1..=10).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn run_batched_over_parallelism_never_spawns_idle_workers() {
  setup_tracing_for_test();

  let count = Arc::new(AtomicUsize::new(0));
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let c = count.clone();
  let r = running.clone();
  let p = peak.clone();
  run_batched(5, 64, move |_| {
    let count = c.clone();
    let running = r.clone();
    let peak = p.clone();
    async move {
      let now = running.fetch_add(1, Ordering::SeqCst) + 1;
      peak.fetch_max(now, Ordering::SeqCst);
      tokio::task::yield_now().await;
      count.fetch_add(1, Ordering::SeqCst);
      running.fetch_sub(1, Ordering::SeqCst);
    }
  })
  .await;

  assert_eq!(count.load(Ordering::SeqCst), 5);
  assert!(peak.load(Ordering::SeqCst) <= 5, "no more than 5 units may run at once");
}

#[tokio::test]
async fn cancellable_sequential_cancel_midway_stops_scheduling() {
  setup_tracing_for_test();

  let flag = CancelFlag::new();
  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  let f = flag.clone();
  let result = run_batched_cancellable(
    20,
    1,
    move |index, _view| {
      let count = c.clone();
      let flag = f.clone();
      async move {
        count.fetch_add(1, Ordering::Relaxed);
        if index == 5 {
          flag.cancel();
        }
        Ok::<(), BoxError>(())
      }
    },
    Some(&flag),
  )
  .await;

  // External cancellation is not an error.
  assert!(result.is_ok());
  assert_eq!(count.load(Ordering::Relaxed), 5);
  assert!(flag.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellable_precancelled_flag_runs_nothing() {
  setup_tracing_for_test();

  let flag = CancelFlag::new();
  flag.cancel();

  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  let result = run_batched_cancellable(
    100,
    8,
    move |_, view| {
      let count = c.clone();
      async move {
        if view.is_cancelled() {
          return Ok(());
        }
        count.fetch_add(1, Ordering::Relaxed);
        Ok::<(), BoxError>(())
      }
    },
    Some(&flag),
  )
  .await;

  assert!(result.is_ok());
  assert_eq!(count.load(Ordering::Relaxed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellable_error_is_surfaced_and_bounds_overrun() {
  setup_tracing_for_test();

  let started = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let s = started.clone();
  let result = run_batched_cancellable(
    50,
    5,
    move |index, _view| {
      let started = s.clone();
      async move {
        started.lock().push(index);
        if index == 13 {
          return Err::<(), BoxError>("boom at 13".into());
        }
        Ok(())
      }
    },
    None,
  )
  .await;

  match result {
    Err(TaskError::Failed(err)) => assert!(err.to_string().contains("boom at 13")),
    other => panic!("expected Failed error, got {:?}", other),
  }

  // The failing index sits in the batch 11..=15; no later batch may start.
  let started = started.lock();
  let past_failure = started.iter().filter(|&&i| i > 13).count();
  assert!(past_failure <= 4, "at most concurrency-1 units may run past the failure");
  assert!(started.iter().all(|&i| i <= 15), "no batch after the failing one may start");
}

#[tokio::test]
async fn cancellable_sequential_error_stops_after_failure() {
  setup_tracing_for_test();

  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  let result = run_batched_cancellable(
    10,
    1,
    move |index, _view| {
      let count = c.clone();
      async move {
        count.fetch_add(1, Ordering::Relaxed);
        if index == 3 {
          return Err::<(), BoxError>("boom".into());
        }
        Ok(())
      }
    },
    None,
  )
  .await;

  assert!(matches!(result, Err(TaskError::Failed(_))));
  assert_eq!(count.load(Ordering::Relaxed), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellable_panic_is_contained_and_reported() {
  setup_tracing_for_test();

  let result = run_batched_cancellable(
    10,
    5,
    |index, _view| async move {
      if index == 2 {
        panic!("unit {} blew up", index);
      }
      Ok::<(), BoxError>(())
    },
    None,
  )
  .await;

  assert!(matches!(result, Err(TaskError::Panicked)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellable_external_flag_persists_across_runs() {
  setup_tracing_for_test();

  let flag = CancelFlag::new();
  let result = run_batched_cancellable(
    10,
    2,
    |index, _view| async move {
      if index == 1 {
        return Err::<(), BoxError>("first run fails".into());
      }
      Ok(())
    },
    Some(&flag),
  )
  .await;
  assert!(result.is_err());
  assert!(flag.is_cancelled(), "a unit failure must set the caller's flag");

  // The same flag pre-cancels a second run entirely.
  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  let result = run_batched_cancellable(
    10,
    2,
    move |_, _view| {
      let count = c.clone();
      async move {
        count.fetch_add(1, Ordering::Relaxed);
        Ok::<(), BoxError>(())
      }
    },
    Some(&flag),
  )
  .await;
  assert!(result.is_ok());
  assert_eq!(count.load(Ordering::Relaxed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cancellable_over_parallelism_calls_exactly_total_times() {
  setup_tracing_for_test();

  let count = Arc::new(AtomicUsize::new(0));
  let c = count.clone();
  let result = run_batched_cancellable(
    5,
    64,
    move |_, _view| {
      let count = c.clone();
      async move {
        count.fetch_add(1, Ordering::Relaxed);
        Ok::<(), BoxError>(())
      }
    },
    None,
  )
  .await;

  assert!(result.is_ok());
  assert_eq!(count.load(Ordering::Relaxed), 5);
}

#[tokio::test]
async fn cancellable_total_zero_is_a_noop() {
  setup_tracing_for_test();

  let result = run_batched_cancellable(0, 4, |_, _view| async move { Ok::<(), BoxError>(()) }, None).await;
  assert!(result.is_ok());
}
