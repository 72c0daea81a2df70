use crate::error::PoolError;
use crate::pool::{Job, Pool, PoolOptions};

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Default [`Pool`]: a bounded set of workers running jobs as Tokio tasks.
///
/// Each running job holds one semaphore permit, so at most `capacity` jobs run
/// at once. A submission that finds no free permit waits for one, unless the
/// pool is non-blocking or too many submitters are already waiting.
pub struct WorkerPool {
  pool_name: Arc<String>,
  tokio_handle: TokioHandle,
  semaphore: Arc<Semaphore>,
  capacity: AtomicUsize,
  running: Arc<AtomicUsize>,
  waiting: Arc<AtomicUsize>,
  retiring: Arc<AtomicUsize>,
  nonblocking: bool,
  max_blocking_tasks: usize,
  shutdown_token: CancellationToken,
  tracker: TaskTracker,
  resize_lock: Mutex<()>,
  // Read by submitters between the closed check and the spawn, written by
  // `close()`, so a drain never misses a job that was accepted.
  spawn_gate: RwLock<()>,
}

/// Holds a worker permit for the lifetime of a running job.
struct ActiveJob {
  running: Arc<AtomicUsize>,
  retiring: Arc<AtomicUsize>,
  permit: Option<OwnedSemaphorePermit>,
}

impl ActiveJob {
  fn start(permit: OwnedSemaphorePermit, running: Arc<AtomicUsize>, retiring: Arc<AtomicUsize>) -> Self {
    running.fetch_add(1, Ordering::AcqRel);
    Self {
      running,
      retiring,
      permit: Some(permit),
    }
  }
}

impl Drop for ActiveJob {
  fn drop(&mut self) {
    // Decremented before the permit goes back, so a freed worker is never
    // reported while still counted as running.
    self.running.fetch_sub(1, Ordering::AcqRel);
    let Some(permit) = self.permit.take() else {
      return;
    };
    // A pending shrink takes the permit out of circulation instead of letting
    // a waiting submitter have it.
    if take_one(&self.retiring) {
      permit.forget();
    }
  }
}

/// Decrements `counter` unless it is already zero.
fn take_one(counter: &AtomicUsize) -> bool {
  counter
    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
    .is_ok()
}

/// Counts a submitter blocked on a free worker.
struct WaitingGuard {
  waiting: Arc<AtomicUsize>,
  position: usize,
}

impl WaitingGuard {
  fn enter(waiting: Arc<AtomicUsize>) -> Self {
    let position = waiting.fetch_add(1, Ordering::AcqRel) + 1;
    Self { waiting, position }
  }
}

impl Drop for WaitingGuard {
  fn drop(&mut self) {
    self.waiting.fetch_sub(1, Ordering::AcqRel);
  }
}

impl WorkerPool {
  pub fn new(capacity: usize, options: PoolOptions) -> Result<Self, PoolError> {
    if capacity == 0 {
      return Err(PoolError::InvalidCapacity);
    }
    let tokio_handle = match options.runtime {
      Some(handle) => handle,
      None => TokioHandle::try_current().map_err(|_| PoolError::NoRuntime)?,
    };
    let capacity = capacity.min(Semaphore::MAX_PERMITS);

    info!(
      pool_name = %options.name,
      capacity,
      nonblocking = options.nonblocking,
      max_blocking_tasks = options.max_blocking_tasks,
      "Worker pool created."
    );

    Ok(Self {
      pool_name: Arc::new(options.name),
      tokio_handle,
      semaphore: Arc::new(Semaphore::new(capacity)),
      capacity: AtomicUsize::new(capacity),
      running: Arc::new(AtomicUsize::new(0)),
      waiting: Arc::new(AtomicUsize::new(0)),
      retiring: Arc::new(AtomicUsize::new(0)),
      nonblocking: options.nonblocking,
      max_blocking_tasks: options.max_blocking_tasks,
      shutdown_token: CancellationToken::new(),
      tracker: TaskTracker::new(),
      resize_lock: Mutex::new(()),
      spawn_gate: RwLock::new(()),
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Number of jobs currently executing.
  pub fn running_count(&self) -> usize {
    self.running.load(Ordering::Acquire)
  }

  pub fn is_closed(&self) -> bool {
    self.shutdown_token.is_cancelled()
  }

  /// Submits a job, waiting for a free worker if the pool's policy allows.
  pub async fn submit_job(&self, job: Job) -> Result<(), PoolError> {
    let permit = self.acquire_worker().await?;

    let _open = self.spawn_gate.read();
    if self.shutdown_token.is_cancelled() {
      debug!(pool_name = %self.pool_name, "Submit: Pool closed while acquiring a worker.");
      return Err(PoolError::Closed);
    }
    self.spawn_job(job, permit);
    Ok(())
  }

  async fn acquire_worker(&self) -> Result<OwnedSemaphorePermit, PoolError> {
    if self.shutdown_token.is_cancelled() {
      warn!(pool_name = %self.pool_name, "Submit: Attempted to submit job to a pool that is closed.");
      return Err(PoolError::Closed);
    }

    match self.semaphore.clone().try_acquire_owned() {
      Ok(permit) => return Ok(permit),
      Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
      Err(TryAcquireError::NoPermits) => {}
    }

    if self.nonblocking {
      debug!(pool_name = %self.pool_name, "Submit: No free worker and pool is non-blocking.");
      return Err(PoolError::Overloaded);
    }

    let waiting = WaitingGuard::enter(self.waiting.clone());
    if self.max_blocking_tasks > 0 && waiting.position > self.max_blocking_tasks {
      debug!(
        pool_name = %self.pool_name,
        waiting = waiting.position,
        max_blocking_tasks = self.max_blocking_tasks,
        "Submit: Too many blocked submitters."
      );
      return Err(PoolError::Overloaded);
    }

    trace!(pool_name = %self.pool_name, waiting = waiting.position, "Submit: Waiting for a free worker.");
    tokio::select! {
      biased;
      _ = self.shutdown_token.cancelled() => Err(PoolError::Closed),
      acquired = self.semaphore.clone().acquire_owned() => acquired.map_err(|_| PoolError::Closed),
    }
  }

  fn spawn_job(&self, job: Job, permit: OwnedSemaphorePermit) {
    let active = ActiveJob::start(permit, self.running.clone(), self.retiring.clone());
    let pool_name_for_job = self.pool_name.clone();
    let pool_name_for_span = self.pool_name.clone();

    self.tracker.spawn_on(
      async move {
        let _active = active;
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
          error!(pool_name = %*pool_name_for_job, "Job panicked during execution.");
        }
      }
      .instrument(info_span!("pool_job", pool_name = %*pool_name_for_span)),
      &self.tokio_handle,
    );
  }

  fn resize_workers(&self, capacity: usize) {
    let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
    if self.shutdown_token.is_cancelled() {
      trace!(pool_name = %self.pool_name, "Resize: Pool is closed, ignoring.");
      return;
    }

    let _resize = self.resize_lock.lock();
    let previous = self.capacity.swap(capacity, Ordering::AcqRel);
    if capacity > previous {
      let added = capacity - previous;
      // Permits still owed to an earlier shrink are kept instead of re-added.
      let owed = self
        .retiring
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n - n.min(added)))
        .unwrap_or(0);
      self.semaphore.add_permits(added - owed.min(added));
    } else if capacity < previous {
      // Registered before reclaiming free permits, so a job finishing in
      // between retires its permit rather than handing it to a waiter.
      self.retiring.fetch_add(previous - capacity, Ordering::AcqRel);
      while self.retiring.load(Ordering::Acquire) > 0 {
        let Ok(permit) = self.semaphore.try_acquire() else {
          break;
        };
        if take_one(&self.retiring) {
          permit.forget();
        }
      }
    }
    info!(
      pool_name = %self.pool_name,
      previous,
      capacity,
      retiring = self.retiring.load(Ordering::Acquire),
      "Worker pool resized."
    );
  }

  /// Closes the pool to new submissions and wakes blocked submitters.
  /// Returns `false` if it was already closed.
  fn close(&self) -> bool {
    let _closing = self.spawn_gate.write();
    if self.shutdown_token.is_cancelled() {
      trace!(pool_name = %self.pool_name, "Shutdown already in progress or completed.");
      return false;
    }
    self.shutdown_token.cancel();
    self.semaphore.close();
    self.tracker.close();
    true
  }

  /// Closes the pool and waits up to `timeout` for running jobs to finish.
  pub async fn drain(&self, timeout: Duration) -> Result<(), PoolError> {
    if self.close() {
      info!(
        pool_name = %self.pool_name,
        running = self.running_count(),
        "Graceful shutdown: Waiting for running jobs to complete."
      );
    }

    match tokio::time::timeout(timeout, self.tracker.wait()).await {
      Ok(()) => {
        info!(pool_name = %self.pool_name, "Worker pool drained.");
        Ok(())
      }
      Err(_) => {
        warn!(
          pool_name = %self.pool_name,
          running = self.running_count(),
          ?timeout,
          "Graceful shutdown timed out with jobs still running."
        );
        Err(PoolError::ShutdownTimeout(timeout))
      }
    }
  }
}

impl Pool for WorkerPool {
  fn submit(&self, job: Job) -> BoxFuture<'_, Result<(), PoolError>> {
    self.submit_job(job).boxed()
  }

  fn capacity(&self) -> usize {
    self.capacity.load(Ordering::Acquire)
  }

  fn available_workers(&self) -> usize {
    self.capacity().saturating_sub(self.running_count())
  }

  fn pending_count(&self) -> usize {
    self.waiting.load(Ordering::Acquire)
  }

  fn resize(&self, capacity: usize) {
    self.resize_workers(capacity);
  }

  fn release(&self) {
    if self.close() {
      info!(
        pool_name = %self.pool_name,
        running = self.running_count(),
        "Worker pool released; running jobs are not awaited."
      );
    }
  }

  fn release_timeout(&self, timeout: Duration) -> BoxFuture<'_, Result<(), PoolError>> {
    self.drain(timeout).boxed()
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    if self.close() {
      debug!(pool_name = %self.pool_name, "WorkerPool dropped. Closed to new submissions.");
    }
  }
}
