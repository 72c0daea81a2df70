//! A Tokio-based task queue that dispatches typed work to a bounded worker
//! pool, with one-shot per-task results and fan-out/fan-in task groups.

mod error;
mod group;
mod id;
mod pool;
mod queue;
mod signal;
mod simple;
mod task;
mod worker_pool;

pub use error::{BoxError, GroupEnqueueError, PoolError, QueueError, TaskError};
pub use group::{Group, GroupResults};
pub use id::TaskId;
pub use pool::{Job, Pool, PoolOptions};
pub use queue::{Queue, QueueBuilder};
pub use simple::{SimpleQueue, SimpleQueueBuilder};
pub use task::{Task, TaskResult};
pub use worker_pool::WorkerPool;
