use crate::group::Group;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by a queue's processing function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a [`Pool`](crate::Pool) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Worker pool capacity must be at least 1")]
  InvalidCapacity,

  #[error("No Tokio runtime available to run pool workers")]
  NoRuntime,

  #[error("Worker pool is saturated and cannot accept more tasks")]
  Overloaded,

  #[error("Worker pool is closed, cannot accept new tasks")]
  Closed,

  #[error("Worker pool did not drain within {0:?}")]
  ShutdownTimeout(Duration),
}

/// Errors returned synchronously by [`Queue`](crate::Queue) and
/// [`SimpleQueue`](crate::SimpleQueue) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
  #[error("Queue has no processing function")]
  MissingProcessor,

  #[error("Failed to build worker pool: {0}")]
  Pool(#[source] PoolError),

  #[error("Failed to submit task: {0}")]
  Submit(#[source] PoolError),

  #[error("Unable to enqueue task group, task {index} enqueue failed: {source}")]
  GroupSubmit {
    index: usize,
    #[source]
    source: PoolError,
  },

  #[error("Queue did not stop within {0:?}")]
  ShutdownTimeout(Duration),
}

/// Failure of a single task, delivered as data inside its
/// [`TaskResult`](crate::TaskResult).
#[derive(Error, Debug)]
pub enum TaskError {
  #[error("Task processing failed: {0}")]
  Failed(#[source] BoxError),

  #[error("Task panicked during processing")]
  Panicked,
}

/// Returned by [`Queue::enqueue_group`](crate::Queue::enqueue_group) when a
/// submission fails partway.
///
/// The group holds the tasks submitted before the failing index and still
/// completes once they finish.
#[derive(Error)]
#[error("Unable to enqueue task group, task {index} enqueue failed: {source}")]
pub struct GroupEnqueueError<R: Send + Sync + 'static, A: Send + Sync + 'static> {
  pub(crate) index: usize,
  #[source]
  pub(crate) source: PoolError,
  pub(crate) group: Group<R, A>,
}

impl<R: Send + Sync + 'static, A: Send + Sync + 'static> GroupEnqueueError<R, A> {
  /// Index of the argument whose submission failed.
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn pool_error(&self) -> &PoolError {
    &self.source
  }

  pub fn group(&self) -> &Group<R, A> {
    &self.group
  }

  pub fn group_mut(&mut self) -> &mut Group<R, A> {
    &mut self.group
  }

  /// Takes the partially populated group out of the error.
  pub fn into_group(self) -> Group<R, A> {
    self.group
  }
}

impl<R: Send + Sync + 'static, A: Send + Sync + 'static> fmt::Debug for GroupEnqueueError<R, A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GroupEnqueueError")
      .field("index", &self.index)
      .field("source", &self.source)
      .field("submitted", &self.group.len())
      .finish()
  }
}

impl<R: Send + Sync + 'static, A: Send + Sync + 'static> From<GroupEnqueueError<R, A>> for QueueError {
  fn from(err: GroupEnqueueError<R, A>) -> Self {
    QueueError::GroupSubmit {
      index: err.index,
      source: err.source,
    }
  }
}
