use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a task, unique within the [`Queue`](crate::Queue) that issued it.
///
/// Ids are issued in submission order, so sorting results by id restores the
/// order in which their tasks were enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
  pub fn as_u64(self) -> u64 {
    self.0
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

impl From<TaskId> for u64 {
  fn from(id: TaskId) -> Self {
    id.0
  }
}

/// Per-queue id source. The first id issued is `1`.
#[derive(Debug, Default)]
pub(crate) struct IdGenerator {
  last: AtomicU64,
}

impl IdGenerator {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// A single `fetch_add` both reserves and orders the id, so concurrent
  /// callers never collide.
  pub(crate) fn next(&self) -> TaskId {
    TaskId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn test_ids_start_at_one_and_increase() {
    let ids = IdGenerator::new();
    assert_eq!(ids.next().as_u64(), 1);
    assert_eq!(ids.next().as_u64(), 2);
    assert!(ids.next() < ids.next());
  }

  #[test]
  fn test_generators_are_independent() {
    let a = IdGenerator::new();
    let b = IdGenerator::new();
    a.next();
    a.next();
    assert_eq!(b.next().as_u64(), 1);
  }

  #[test]
  fn test_concurrent_ids_are_unique_and_ordered_per_caller() {
    let ids = Arc::new(IdGenerator::new());
    let threads: Vec<_> = (0..8)
      .map(|_| {
        let ids = ids.clone();
        thread::spawn(move || (0..1_000).map(|_| ids.next()).collect::<Vec<_>>())
      })
      .collect();

    let mut seen = HashSet::new();
    for handle in threads {
      let issued = handle.join().unwrap();
      assert!(issued.windows(2).all(|w| w[0] < w[1]));
      for id in issued {
        assert!(seen.insert(id), "id {} issued twice", id);
      }
    }
    assert_eq!(seen.len(), 8_000);
    assert_eq!(ids.next().as_u64(), 8_001);
  }
}
