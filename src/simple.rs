use crate::error::QueueError;
use crate::pool::{Pool, PoolOptions};
use crate::queue::{resolve_pool, stop_pool_graceful};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{error, trace, warn};

type SimpleProcessor<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// Fire-and-forget sibling of [`Queue`](crate::Queue).
///
/// Values go straight to the pool with no ids, results or groups. The
/// processing function reports outcomes through its own channels.
pub struct SimpleQueue<T> {
  pool: Arc<dyn Pool>,
  processor: SimpleProcessor<T>,
}

pub struct SimpleQueueBuilder<T> {
  workers: usize,
  options: PoolOptions,
  pool: Option<Arc<dyn Pool>>,
  processor: Option<SimpleProcessor<T>>,
}

impl<T: Send + 'static> SimpleQueueBuilder<T> {
  fn new() -> Self {
    Self {
      workers: 1,
      options: PoolOptions::default(),
      pool: None,
      processor: None,
    }
  }

  pub fn workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  pub fn options(mut self, options: PoolOptions) -> Self {
    self.options = options;
    self
  }

  pub fn pool(mut self, pool: Arc<dyn Pool>) -> Self {
    self.pool = Some(pool);
    self
  }

  pub fn processor<F, Fut>(mut self, processor: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.processor = Some(Arc::new(move |value| processor(value).boxed()));
    self
  }

  pub fn build(self) -> Result<SimpleQueue<T>, QueueError> {
    let processor = self.processor.ok_or(QueueError::MissingProcessor)?;
    let pool = resolve_pool(self.pool, self.workers, self.options)?;
    Ok(SimpleQueue { pool, processor })
  }
}

impl<T: Send + 'static> SimpleQueue<T> {
  pub fn builder() -> SimpleQueueBuilder<T> {
    SimpleQueueBuilder::new()
  }

  pub fn new<F, Fut>(workers: usize, processor: F) -> Result<Self, QueueError>
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    Self::builder().workers(workers).processor(processor).build()
  }

  pub fn with_options<F, Fut>(workers: usize, processor: F, options: PoolOptions) -> Result<Self, QueueError>
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    Self::builder()
      .workers(workers)
      .options(options)
      .processor(processor)
      .build()
  }

  pub async fn enqueue(&self, value: T) -> Result<(), QueueError> {
    let processor = self.processor.clone();
    let job = async move {
      if AssertUnwindSafe(async move { processor(value).await })
        .catch_unwind()
        .await
        .is_err()
      {
        error!("Simple task panicked during processing.");
      }
    }
    .boxed();

    self.pool.submit(job).await.map_err(|e| {
      trace!(error = %e, "Pool rejected simple task.");
      QueueError::Submit(e)
    })
  }

  /// Submits values in order, stopping at the first rejection. Values already
  /// submitted keep running.
  pub async fn enqueue_group<I>(&self, values: I) -> Result<(), QueueError>
  where
    I: IntoIterator<Item = T>,
  {
    for (index, value) in values.into_iter().enumerate() {
      if let Err(e) = self.enqueue(value).await {
        let source = match e {
          QueueError::Submit(source) => source,
          other => return Err(other),
        };
        warn!(index, error = %source, "Simple group submission stopped.");
        return Err(QueueError::GroupSubmit { index, source });
      }
    }
    Ok(())
  }

  pub fn free_workers(&self) -> usize {
    self.pool.available_workers()
  }

  pub fn workers(&self) -> usize {
    self.pool.capacity()
  }

  pub fn tasks_blocked(&self) -> usize {
    self.pool.pending_count()
  }

  /// Resizes the pool. Values below 1 are treated as 1.
  pub fn set_workers(&self, workers: usize) {
    self.pool.resize(workers.max(1));
  }

  pub fn stop(&self) {
    self.pool.release();
  }

  pub async fn stop_graceful(&self, timeout: Duration) -> Result<(), QueueError> {
    stop_pool_graceful(self.pool.as_ref(), timeout).await
  }
}

impl<T> Clone for SimpleQueue<T> {
  fn clone(&self) -> Self {
    Self {
      pool: self.pool.clone(),
      processor: self.processor.clone(),
    }
  }
}

impl<T> fmt::Debug for SimpleQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SimpleQueue")
      .field("workers", &self.pool.capacity())
      .field("free_workers", &self.pool.available_workers())
      .finish_non_exhaustive()
  }
}
