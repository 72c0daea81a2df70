use std::fmt;

use futures_intrusive::sync::ManualResetEvent;

/// One-shot completion notification.
///
/// Fires at most once and can be awaited by any number of observers, before
/// or after it fires.
pub struct CompletionSignal {
  event: ManualResetEvent,
}

impl CompletionSignal {
  pub fn new() -> Self {
    Self {
      event: ManualResetEvent::new(false),
    }
  }

  pub(crate) fn fire(&self) {
    debug_assert!(!self.event.is_set(), "completion signal fired twice");
    self.event.set();
  }

  pub fn is_fired(&self) -> bool {
    self.event.is_set()
  }

  /// Resolves once the signal has fired.
  pub async fn wait(&self) {
    self.event.wait().await
  }
}

impl Default for CompletionSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for CompletionSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionSignal")
      .field("fired", &self.is_fired())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_wait_after_fire_returns_immediately() {
    let signal = CompletionSignal::new();
    assert!(!signal.is_fired());
    signal.fire();
    assert!(signal.is_fired());
    tokio::time::timeout(Duration::from_millis(50), signal.wait())
      .await
      .expect("fired signal should not block");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_all_waiters_wake() {
    let signal = Arc::new(CompletionSignal::new());
    let waiters: Vec<_> = (0..16)
      .map(|_| {
        let signal = signal.clone();
        tokio::spawn(async move { signal.wait().await })
      })
      .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    signal.fire();

    for waiter in waiters {
      tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter was not woken")
        .unwrap();
    }
  }
}
