use crate::error::TaskError;
use crate::id::TaskId;
use crate::signal::CompletionSignal;

use std::fmt;
use std::sync::{Arc, OnceLock};

/// Outcome of one processed task.
///
/// `task_id` traces the result back to the task that produced it; a failed
/// or panicked processing call is carried in `outcome`, never raised.
#[derive(Debug)]
pub struct TaskResult<R> {
  pub task_id: TaskId,
  pub outcome: Result<R, TaskError>,
}

impl<R> TaskResult<R> {
  pub fn is_ok(&self) -> bool {
    self.outcome.is_ok()
  }

  /// The produced value, if processing succeeded.
  pub fn value(&self) -> Option<&R> {
    self.outcome.as_ref().ok()
  }

  pub fn error(&self) -> Option<&TaskError> {
    self.outcome.as_ref().err()
  }
}

/// State shared between a [`Task`] handle and the worker processing it.
pub(crate) struct TaskShared<R, A> {
  pub(crate) id: TaskId,
  pub(crate) arg: A,
  done: CompletionSignal,
  result: OnceLock<Arc<TaskResult<R>>>,
}

impl<R, A> TaskShared<R, A> {
  pub(crate) fn new(id: TaskId, arg: A) -> Self {
    Self {
      id,
      arg,
      done: CompletionSignal::new(),
      result: OnceLock::new(),
    }
  }

  /// Stores the result, then fires the completion signal. Called once, by the
  /// worker that processed this task.
  pub(crate) fn publish(&self, result: Arc<TaskResult<R>>) {
    if self.result.set(result).is_err() {
      debug_assert!(false, "task {} result published twice", self.id);
      return;
    }
    self.done.fire();
  }
}

/// Handle to a single submitted unit of work.
///
/// Cloning the handle is cheap; every clone observes the same completion.
pub struct Task<R, A> {
  pub(crate) shared: Arc<TaskShared<R, A>>,
}

impl<R, A> Task<R, A> {
  pub(crate) fn from_shared(shared: Arc<TaskShared<R, A>>) -> Self {
    Self { shared }
  }

  pub fn id(&self) -> TaskId {
    self.shared.id
  }

  pub fn arg(&self) -> &A {
    &self.shared.arg
  }

  /// Resolves once the task has been processed.
  pub async fn done(&self) {
    self.shared.done.wait().await
  }

  pub fn is_done(&self) -> bool {
    self.shared.done.is_fired()
  }

  /// Waits for the task's result. The result is in place by the time
  /// [`done`](Self::done) resolves.
  pub async fn result(&self) -> Arc<TaskResult<R>> {
    loop {
      if let Some(result) = self.shared.result.get() {
        return result.clone();
      }
      self.shared.done.wait().await;
    }
  }

  /// Returns the result without waiting, if it is already available.
  pub fn try_result(&self) -> Option<Arc<TaskResult<R>>> {
    self.shared.result.get().cloned()
  }
}

impl<R, A> Clone for Task<R, A> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<R, A: fmt::Debug> fmt::Debug for Task<R, A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("id", &self.shared.id)
      .field("arg", &self.shared.arg)
      .field("done", &self.is_done())
      .finish()
  }
}
