use crate::error::{BoxError, GroupEnqueueError, PoolError, QueueError, TaskError};
use crate::group::{Group, GroupMember};
use crate::id::{IdGenerator, TaskId};
use crate::pool::{Pool, PoolOptions};
use crate::task::{Task, TaskResult, TaskShared};
use crate::worker_pool::WorkerPool;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, debug_span, error, trace, warn, Instrument};

type Processor<R, A> = Arc<dyn Fn(TaskId, A) -> BoxFuture<'static, Result<R, BoxError>> + Send + Sync + 'static>;

/// Builds the pool a queue submits to, unless one was supplied.
pub(crate) fn resolve_pool(
  pool: Option<Arc<dyn Pool>>,
  workers: usize,
  options: PoolOptions,
) -> Result<Arc<dyn Pool>, QueueError> {
  match pool {
    Some(pool) => Ok(pool),
    None => {
      let pool = WorkerPool::new(workers, options).map_err(QueueError::Pool)?;
      Ok(Arc::new(pool))
    }
  }
}

/// Maps a pool's graceful-release outcome onto the queue error taxonomy.
pub(crate) async fn stop_pool_graceful(pool: &dyn Pool, timeout: Duration) -> Result<(), QueueError> {
  pool.release_timeout(timeout).await.map_err(|e| match e {
    PoolError::ShutdownTimeout(t) => QueueError::ShutdownTimeout(t),
    other => QueueError::Pool(other),
  })
}

/// Dispatches typed tasks to a worker pool and reports each result once.
///
/// The processing function receives the task's id and a clone of its argument.
/// It may run concurrently for different tasks. An `Err` it returns, or a panic
/// inside it, becomes the task's [`TaskError`] and never stops the queue.
///
/// Cloning a queue shares its pool, id sequence and processing function.
pub struct Queue<R, A> {
  pool: Arc<dyn Pool>,
  ids: Arc<IdGenerator>,
  processor: Processor<R, A>,
}

/// Configures and constructs a [`Queue`].
pub struct QueueBuilder<R, A> {
  workers: usize,
  options: PoolOptions,
  pool: Option<Arc<dyn Pool>>,
  processor: Option<Processor<R, A>>,
}

impl<R, A> QueueBuilder<R, A>
where
  R: Send + Sync + 'static,
  A: Clone + Send + Sync + 'static,
{
  fn new() -> Self {
    Self {
      workers: 1,
      options: PoolOptions::default(),
      pool: None,
      processor: None,
    }
  }

  /// Worker count of the default [`WorkerPool`]. Ignored when a pool is supplied.
  pub fn workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  pub fn options(mut self, options: PoolOptions) -> Self {
    self.options = options;
    self
  }

  /// Uses an existing pool instead of building a [`WorkerPool`].
  pub fn pool(mut self, pool: Arc<dyn Pool>) -> Self {
    self.pool = Some(pool);
    self
  }

  pub fn processor<F, Fut>(mut self, processor: F) -> Self
  where
    F: Fn(TaskId, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
  {
    self.processor = Some(Arc::new(move |id, arg| processor(id, arg).boxed()));
    self
  }

  pub fn build(self) -> Result<Queue<R, A>, QueueError> {
    let processor = self.processor.ok_or(QueueError::MissingProcessor)?;
    let pool = resolve_pool(self.pool, self.workers, self.options)?;
    Ok(Queue {
      pool,
      ids: Arc::new(IdGenerator::new()),
      processor,
    })
  }
}

impl<R, A> Queue<R, A>
where
  R: Send + Sync + 'static,
  A: Clone + Send + Sync + 'static,
{
  pub fn builder() -> QueueBuilder<R, A> {
    QueueBuilder::new()
  }

  /// Creates a queue over a new [`WorkerPool`] with `workers` workers.
  pub fn new<F, Fut>(workers: usize, processor: F) -> Result<Self, QueueError>
  where
    F: Fn(TaskId, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
  {
    Self::builder().workers(workers).processor(processor).build()
  }

  pub fn with_options<F, Fut>(workers: usize, processor: F, options: PoolOptions) -> Result<Self, QueueError>
  where
    F: Fn(TaskId, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
  {
    Self::builder()
      .workers(workers)
      .options(options)
      .processor(processor)
      .build()
  }

  /// Submits a single task.
  ///
  /// # Errors
  /// Returns `QueueError::Submit` if the pool rejects the task. The task's id
  /// is consumed either way.
  pub async fn enqueue(&self, arg: A) -> Result<Task<R, A>, QueueError> {
    self.enqueue_task(arg, None).await.map_err(QueueError::Submit)
  }

  /// Submits one task per argument, in order, as a single group.
  ///
  /// # Errors
  /// On the first rejected submission, returns a [`GroupEnqueueError`] holding
  /// the failing index and the group of tasks submitted before it. That group
  /// still completes once those tasks finish.
  pub async fn enqueue_group<I>(&self, args: I) -> Result<Group<R, A>, GroupEnqueueError<R, A>>
  where
    I: IntoIterator<Item = A>,
  {
    let args = args.into_iter();
    let (mut group, filler) = Group::new(args.size_hint().0);

    let mut failure = None;
    for (index, arg) in args.enumerate() {
      // A rejected job is dropped by the pool, and its member with it, which
      // gives the reserved arrival back.
      match self.enqueue_task(arg, Some(filler.enlist())).await {
        Ok(task) => group.tasks.push(task),
        Err(source) => {
          warn!(index, submitted = group.tasks.len(), error = %source, "Group submission failed partway.");
          failure = Some((index, source));
          break;
        }
      }
    }

    // Release the submitter's own arrival; closes here if every task has
    // already finished or none was submitted.
    drop(filler);
    debug!(group_size = group.tasks.len(), "Task group enqueued.");

    match failure {
      None => Ok(group),
      Some((index, source)) => Err(GroupEnqueueError { index, source, group }),
    }
  }

  async fn enqueue_task(
    &self,
    arg: A,
    member: Option<GroupMember<R>>,
  ) -> Result<Task<R, A>, PoolError> {
    let task_id = self.ids.next();
    let shared = Arc::new(TaskShared::new(task_id, arg));

    let job = Self::complete(self.processor.clone(), shared.clone(), member)
      .instrument(debug_span!("queue_task", %task_id))
      .boxed();

    trace!(%task_id, "Submitting task to pool.");
    match self.pool.submit(job).await {
      Ok(()) => Ok(Task::from_shared(shared)),
      Err(e) => {
        debug!(%task_id, error = %e, "Pool rejected task.");
        Err(e)
      }
    }
  }

  /// Runs on a pool worker, once per task.
  async fn complete(processor: Processor<R, A>, task: Arc<TaskShared<R, A>>, member: Option<GroupMember<R>>) {
    let task_id = task.id;
    let arg = task.arg.clone();

    let outcome = match AssertUnwindSafe(async move { processor(task_id, arg).await })
      .catch_unwind()
      .await
    {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(e)) => {
        debug!(%task_id, error = %e, "Task processing returned an error.");
        Err(TaskError::Failed(e))
      }
      Err(_) => {
        error!(%task_id, "Task panicked during processing.");
        Err(TaskError::Panicked)
      }
    };

    let result = Arc::new(TaskResult { task_id, outcome });
    task.publish(result.clone());
    trace!(%task_id, "Task result published.");

    if let Some(member) = member {
      if member.finish(result) {
        trace!(%task_id, "Task closed its group.");
      }
    }
  }

  /// Workers not currently running a task.
  pub fn free_workers(&self) -> usize {
    self.pool.available_workers()
  }

  pub fn workers(&self) -> usize {
    self.pool.capacity()
  }

  /// Submitters currently blocked waiting for a free worker.
  pub fn tasks_blocked(&self) -> usize {
    self.pool.pending_count()
  }

  /// Resizes the pool. Values below 1 are treated as 1.
  pub fn set_workers(&self, workers: usize) {
    self.pool.resize(workers.max(1));
  }

  /// Releases the pool immediately. Running tasks are not awaited.
  pub fn stop(&self) {
    self.pool.release();
  }

  /// Releases the pool, waiting up to `timeout` for running tasks.
  ///
  /// # Errors
  /// Returns `QueueError::ShutdownTimeout` if tasks are still running when
  /// `timeout` elapses. They are not cancelled.
  pub async fn stop_graceful(&self, timeout: Duration) -> Result<(), QueueError> {
    stop_pool_graceful(self.pool.as_ref(), timeout).await
  }
}

impl<R, A> Clone for Queue<R, A> {
  fn clone(&self) -> Self {
    Self {
      pool: self.pool.clone(),
      ids: self.ids.clone(),
      processor: self.processor.clone(),
    }
  }
}

impl<R, A> fmt::Debug for Queue<R, A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Queue")
      .field("workers", &self.pool.capacity())
      .field("free_workers", &self.pool.available_workers())
      .field("tasks_blocked", &self.pool.pending_count())
      .finish_non_exhaustive()
  }
}
