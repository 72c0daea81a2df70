use crate::error::PoolError;

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle as TokioHandle;

/// A unit of work handed to a [`Pool`]. Queues build one per task.
pub type Job = BoxFuture<'static, ()>;

/// A bounded worker scheduler that queues consume.
///
/// Implementations own their workers; queues only submit jobs, introspect and
/// shut the pool down. [`WorkerPool`](crate::WorkerPool) is the default.
pub trait Pool: Send + Sync + 'static {
  /// Hands a job to a worker. May wait while the pool is saturated,
  /// according to the pool's own policy.
  fn submit(&self, job: Job) -> BoxFuture<'_, Result<(), PoolError>>;

  /// Maximum number of jobs running at once.
  fn capacity(&self) -> usize;

  /// Workers not currently running a job.
  fn available_workers(&self) -> usize;

  /// Submitters currently waiting for a worker.
  fn pending_count(&self) -> usize;

  fn resize(&self, capacity: usize);

  /// Stops accepting jobs without waiting for running ones.
  fn release(&self);

  /// Stops accepting jobs and waits up to `timeout` for running ones.
  fn release_timeout(&self, timeout: Duration) -> BoxFuture<'_, Result<(), PoolError>>;
}

/// Options passed through to [`WorkerPool`](crate::WorkerPool) construction.
#[derive(Clone)]
pub struct PoolOptions {
  pub(crate) name: String,
  pub(crate) nonblocking: bool,
  pub(crate) max_blocking_tasks: usize,
  pub(crate) runtime: Option<TokioHandle>,
}

impl PoolOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Name attached to the pool's log records.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// When set, a submission fails with [`PoolError::Overloaded`] instead of
  /// waiting for a free worker.
  pub fn nonblocking(mut self, nonblocking: bool) -> Self {
    self.nonblocking = nonblocking;
    self
  }

  /// Caps how many submitters may wait for a worker at once. `0` means no cap.
  pub fn max_blocking_tasks(mut self, max: usize) -> Self {
    self.max_blocking_tasks = max;
    self
  }

  /// Runtime to spawn jobs on. Defaults to the runtime current at construction.
  pub fn runtime(mut self, handle: TokioHandle) -> Self {
    self.runtime = Some(handle);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl Default for PoolOptions {
  fn default() -> Self {
    Self {
      name: "worker_pool".to_string(),
      nonblocking: false,
      max_blocking_tasks: 0,
      runtime: None,
    }
  }
}

impl fmt::Debug for PoolOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolOptions")
      .field("name", &self.name)
      .field("nonblocking", &self.nonblocking)
      .field("max_blocking_tasks", &self.max_blocking_tasks)
      .field("runtime_is_some", &self.runtime.is_some())
      .finish()
  }
}
