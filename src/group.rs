use crate::signal::CompletionSignal;
use crate::task::{Task, TaskResult};

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// Barrier state shared by a group's tasks.
///
/// `remaining` counts outstanding arrivals. Whoever takes it to zero fires
/// `done`; by then every result sender has been dropped.
struct GroupShared {
  remaining: AtomicUsize,
  done: CompletionSignal,
}

impl GroupShared {
  /// Reserves an arrival for a task about to be submitted.
  fn expect_one(&self) {
    self.remaining.fetch_add(1, Ordering::AcqRel);
  }

  /// Gives back one reserved arrival. Returns `true` for the caller that
  /// closed the group.
  fn arrive(&self) -> bool {
    let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0, "group barrier underflow");
    if previous != 1 {
      return false;
    }

    self.done.fire();
    debug!("Task group completed, results channel closed.");
    true
  }
}

/// The submitter's hold on a group while it is being filled.
///
/// Holds one arrival, so the group cannot close before the last task is
/// submitted. Dropping it gives that arrival back.
pub(crate) struct GroupFiller<R> {
  shared: Arc<GroupShared>,
  results_tx: Option<UnboundedSender<Arc<TaskResult<R>>>>,
}

impl<R> GroupFiller<R> {
  /// Reserves an arrival and hands out a sender for one task.
  pub(crate) fn enlist(&self) -> GroupMember<R> {
    self.shared.expect_one();
    GroupMember {
      shared: Arc::downgrade(&self.shared),
      results_tx: self.results_tx.clone(),
    }
  }
}

impl<R> Drop for GroupFiller<R> {
  fn drop(&mut self) {
    drop(self.results_tx.take());
    self.shared.arrive();
  }
}

/// One task's producer end of the group fan-in.
///
/// Owned by the task's job, not its handle. Dropping it without a result (a
/// rejected or abandoned job) still gives back the task's arrival.
pub(crate) struct GroupMember<R> {
  shared: Weak<GroupShared>,
  results_tx: Option<UnboundedSender<Arc<TaskResult<R>>>>,
}

impl<R> GroupMember<R> {
  /// Pushes the task's result onto the group channel, then arrives. Never
  /// blocks. Returns `true` if this arrival closed the group.
  pub(crate) fn finish(mut self, result: Arc<TaskResult<R>>) -> bool {
    if let Some(tx) = self.results_tx.as_ref() {
      if tx.send(result).is_err() {
        trace!("Group results receiver dropped, discarding result.");
      }
    }
    self.leave()
  }

  /// The sender goes first, so the channel is already closed when the last
  /// arrival fires `done`.
  fn leave(&mut self) -> bool {
    if self.results_tx.take().is_none() {
      return false;
    }
    self.shared.upgrade().is_some_and(|shared| shared.arrive())
  }
}

impl<R> Drop for GroupMember<R> {
  fn drop(&mut self) {
    self.leave();
  }
}

/// Receiving half of a group's result channel.
///
/// Results arrive in completion order, not submission order. Sort by
/// [`TaskResult::task_id`] to recover submission order.
pub struct GroupResults<R> {
  rx: UnboundedReceiver<Arc<TaskResult<R>>>,
}

impl<R> GroupResults<R> {
  /// Receives the next result, or `None` once the group has closed and all
  /// buffered results were taken.
  pub async fn recv(&mut self) -> Option<Arc<TaskResult<R>>> {
    self.rx.recv().await
  }
}

impl<R> Stream for GroupResults<R> {
  type Item = Arc<TaskResult<R>>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.rx.poll_recv(cx)
  }
}

impl<R> fmt::Debug for GroupResults<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GroupResults")
      .field("buffered", &self.rx.len())
      .field("closed", &self.rx.is_closed())
      .finish()
  }
}

/// A batch of tasks submitted together by
/// [`Queue::enqueue_group`](crate::Queue::enqueue_group).
pub struct Group<R, A> {
  pub(crate) tasks: Vec<Task<R, A>>,
  shared: Arc<GroupShared>,
  results: GroupResults<R>,
}

impl<R, A> Group<R, A> {
  /// Creates an empty group and the submitter's hold on it.
  pub(crate) fn new(capacity: usize) -> (Self, GroupFiller<R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(GroupShared {
      remaining: AtomicUsize::new(1),
      done: CompletionSignal::new(),
    });
    let filler = GroupFiller {
      shared: shared.clone(),
      results_tx: Some(tx),
    };
    let group = Self {
      tasks: Vec::with_capacity(capacity),
      shared,
      results: GroupResults { rx },
    };
    (group, filler)
  }

  /// Resolves once every submitted task has finished and the results channel
  /// is closed.
  pub async fn done(&self) {
    self.shared.done.wait().await
  }

  pub fn is_done(&self) -> bool {
    self.shared.done.is_fired()
  }

  pub fn results(&mut self) -> &mut GroupResults<R> {
    &mut self.results
  }

  /// Drains the results channel until the group closes.
  pub async fn collect_results(&mut self) -> Vec<Arc<TaskResult<R>>> {
    let mut collected = Vec::with_capacity(self.tasks.len());
    while let Some(result) = self.results.recv().await {
      collected.push(result);
    }
    collected
  }

  /// Tasks that were actually submitted, in argument order.
  pub fn tasks(&self) -> &[Task<R, A>] {
    &self.tasks
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }
}

impl<R, A> fmt::Debug for Group<R, A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Group")
      .field("tasks", &self.tasks.len())
      .field("remaining", &self.shared.remaining.load(Ordering::Acquire))
      .field("done", &self.is_done())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::id::IdGenerator;
  use std::thread;

  fn result(ids: &IdGenerator, value: u32) -> Arc<TaskResult<u32>> {
    Arc::new(TaskResult {
      task_id: ids.next(),
      outcome: Ok(value),
    })
  }

  #[tokio::test]
  async fn test_empty_group_closes_on_submitter_release() {
    let (mut group, filler) = Group::<u32, u32>::new(0);
    assert!(!group.is_done());
    drop(filler);
    assert!(group.is_done());
    assert!(group.collect_results().await.is_empty());
  }

  #[tokio::test]
  async fn test_submitter_slot_holds_group_open() {
    let ids = IdGenerator::new();
    let (mut group, filler) = Group::<u32, u32>::new(2);
    let first = filler.enlist();
    let second = filler.enlist();

    assert!(!first.finish(result(&ids, 1)), "task arrival must not close while submitter holds its slot");
    assert!(!group.is_done());
    assert!(!second.finish(result(&ids, 2)));
    assert!(!group.is_done());

    drop(filler);
    group.done().await;
    let values: Vec<u32> = group.collect_results().await.iter().map(|r| *r.value().unwrap()).collect();
    assert_eq!(values, vec![1, 2]);
  }

  #[tokio::test]
  async fn test_dropped_member_gives_back_its_arrival() {
    let ids = IdGenerator::new();
    let (mut group, filler) = Group::<u32, u32>::new(2);
    let rejected = filler.enlist();
    let last = filler.enlist();
    drop(filler);

    drop(rejected);
    assert!(!group.is_done());
    assert!(last.finish(result(&ids, 7)));
    assert!(group.is_done());

    let results = group.collect_results().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value(), Some(&7));
  }

  #[tokio::test]
  async fn test_member_outliving_its_group_is_harmless() {
    let ids = IdGenerator::new();
    let (group, filler) = Group::<u32, u32>::new(1);
    let member = filler.enlist();
    drop(filler);
    drop(group);
    assert!(!member.finish(result(&ids, 1)));
  }

  #[test]
  fn test_concurrent_arrivals_close_exactly_once() {
    for _ in 0..200 {
      let workers = 16;
      let (group, filler) = Group::<u32, u32>::new(workers);
      let ids = Arc::new(IdGenerator::new());
      let members: Vec<_> = (0..workers).map(|_| filler.enlist()).collect();
      drop(filler);

      let closers = Arc::new(AtomicUsize::new(0));
      let threads: Vec<_> = members
        .into_iter()
        .enumerate()
        .map(|(i, member)| {
          let closers = closers.clone();
          let ids = ids.clone();
          thread::spawn(move || {
            if member.finish(result(&ids, i as u32)) {
              closers.fetch_add(1, Ordering::SeqCst);
            }
          })
        })
        .collect();
      for t in threads {
        t.join().unwrap();
      }

      assert_eq!(closers.load(Ordering::SeqCst), 1);
      assert!(group.is_done());
      let mut results = group.results;
      let mut received = 0;
      while results.rx.try_recv().is_ok() {
        received += 1;
      }
      assert_eq!(received, workers);
      assert!(results.rx.is_closed());
    }
  }
}
