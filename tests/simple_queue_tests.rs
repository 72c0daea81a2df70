use task_fanout::{PoolError, PoolOptions, QueueError, SimpleQueue};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,task_fanout=debug"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// Queue whose processor squares each value and reports it on a side channel.
fn squaring_queue(workers: usize, options: PoolOptions) -> (SimpleQueue<u32>, mpsc::UnboundedReceiver<u32>) {
  let (tx, rx) = mpsc::unbounded_channel();
  let queue = SimpleQueue::with_options(
    workers,
    move |value: u32| {
      let tx = tx.clone();
      async move {
        let _ = tx.send(value * value);
      }
    },
    options,
  )
  .unwrap();
  (queue, rx)
}

async fn receive(rx: &mut mpsc::UnboundedReceiver<u32>, count: usize) -> Vec<u32> {
  let mut received = Vec::with_capacity(count);
  for _ in 0..count {
    let value = timeout(Duration::from_secs(1), rx.recv())
      .await
      .expect("side channel await failed")
      .expect("side channel closed");
    received.push(value);
  }
  received.sort_unstable();
  received
}

#[tokio::test]
async fn test_simple_enqueue_runs_processor() {
  setup_tracing_for_test();
  let (queue, mut rx) = squaring_queue(1, PoolOptions::default());

  queue.enqueue(3).await.unwrap();
  assert_eq!(receive(&mut rx, 1).await, vec![9]);
}

#[tokio::test]
async fn test_simple_enqueue_group_submits_all_values() {
  setup_tracing_for_test();
  let (queue, mut rx) = squaring_queue(4, PoolOptions::default());

  queue.enqueue_group(vec![1, 2, 3, 4, 5]).await.unwrap();
  assert_eq!(receive(&mut rx, 5).await, vec![1, 4, 9, 16, 25]);
}

#[tokio::test]
async fn test_simple_group_stops_at_first_rejection_without_rollback() {
  setup_tracing_for_test();
  let gate = Arc::new(Semaphore::new(0));
  let (tx, mut rx) = mpsc::unbounded_channel();
  let queue = SimpleQueue::with_options(
    2,
    {
      let gate = gate.clone();
      move |value: u32| {
        let gate = gate.clone();
        let tx = tx.clone();
        async move {
          if let Ok(_permit) = gate.acquire().await {
            let _ = tx.send(value);
          }
        }
      }
    },
    PoolOptions::default().nonblocking(true),
  )
  .unwrap();

  let err = queue.enqueue_group(vec![10, 20, 30]).await.unwrap_err();
  assert_eq!(
    err,
    QueueError::GroupSubmit {
      index: 2,
      source: PoolError::Overloaded
    }
  );

  // The two values submitted before the failure still run.
  gate.add_permits(2);
  assert_eq!(receive(&mut rx, 2).await, vec![10, 20]);
}

#[tokio::test]
async fn test_simple_missing_processor_is_rejected() {
  let built = SimpleQueue::<u32>::builder().workers(2).build();
  assert!(matches!(built, Err(QueueError::MissingProcessor)));
}

#[tokio::test]
async fn test_simple_panicking_processor_does_not_stop_queue() {
  setup_tracing_for_test();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let queue = SimpleQueue::new(1, move |value: u32| {
    let tx = tx.clone();
    async move {
      if value == 0 {
        panic!("zero is not allowed");
      }
      let _ = tx.send(value);
    }
  })
  .unwrap();

  queue.enqueue(0).await.unwrap();
  queue.enqueue(7).await.unwrap();
  assert_eq!(receive(&mut rx, 1).await, vec![7]);
}

#[tokio::test]
async fn test_simple_introspection_and_shutdown() {
  setup_tracing_for_test();
  let (queue, mut rx) = squaring_queue(2, PoolOptions::default().with_name("simple_shutdown"));
  assert_eq!(queue.workers(), 2);
  assert_eq!(queue.free_workers(), 2);
  assert_eq!(queue.tasks_blocked(), 0);

  queue.set_workers(4);
  assert_eq!(queue.workers(), 4);
  queue.set_workers(0);
  assert_eq!(queue.workers(), 1);

  queue.enqueue(5).await.unwrap();
  assert_eq!(receive(&mut rx, 1).await, vec![25]);

  queue.stop_graceful(Duration::from_secs(1)).await.unwrap();
  assert_eq!(queue.enqueue(6).await, Err(QueueError::Submit(PoolError::Closed)));

  // Stopping twice is harmless.
  queue.stop();
}
