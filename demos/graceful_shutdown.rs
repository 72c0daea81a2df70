use task_fanout::{QueueError, SimpleQueue};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Graceful Shutdown Example ---");

  let (tx, mut rx) = mpsc::unbounded_channel();
  let queue = SimpleQueue::new(2, move |delay_ms: u64| {
    let tx = tx.clone();
    async move {
      tokio::time::sleep(Duration::from_millis(delay_ms)).await;
      let _ = tx.send(delay_ms);
    }
  })
  .expect("Queue construction failed");

  queue
    .enqueue_group(vec![100, 200, 1_500])
    .await
    .expect("Submission failed");

  match queue.stop_graceful(Duration::from_millis(500)).await {
    Ok(()) => info!("All jobs drained."),
    Err(QueueError::ShutdownTimeout(bound)) => info!("Jobs still running after {:?}; they keep running.", bound),
    Err(e) => tracing::error!("Unexpected shutdown error: {}", e),
  }

  while let Ok(Some(done)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
    info!("Job with delay {}ms reported completion.", done);
  }
  info!("--- Graceful Shutdown Example End ---");
}
