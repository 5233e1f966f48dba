use tokio_util::sync::CancellationToken;

/// A shared cooperative-cancellation flag.
///
/// Starts unset. `cancel` is idempotent; the flag never resets. Executors and
/// the pool only ever observe it at scheduling points or hand a read-only
/// [`CancelView`] to the work itself, so cancellation is strictly cooperative:
/// work that is already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
  token: CancellationToken,
}

impl CancelFlag {
  pub fn new() -> Self {
    Self {
      token: CancellationToken::new(),
    }
  }

  /// Requests cancellation. Calling this more than once is a no-op.
  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// A read-only view of this flag, suitable for handing to units of work.
  pub fn view(&self) -> CancelView {
    CancelView {
      token: self.token.clone(),
    }
  }
}

/// Read-only observer of a [`CancelFlag`]. Cannot set the flag.
#[derive(Debug, Clone)]
pub struct CancelView {
  token: CancellationToken,
}

impl CancelView {
  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}
