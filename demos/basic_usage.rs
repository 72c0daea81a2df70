use task_fanout::{BoxError, Queue, Task, TaskId};
use std::time::Duration;
use tracing::info;

async fn slow_double(id: TaskId, value: u64) -> Result<u64, BoxError> {
  let delay_ms = 100 + (value % 3) * 150;
  info!("Task {} doubling {}, will sleep for {}ms", id, value, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  Ok(value * 2)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let queue = Queue::new(2, slow_double).expect("Queue construction failed");

  let mut tasks: Vec<Task<u64, u64>> = Vec::new();
  for value in 1..=5 {
    match queue.enqueue(value).await {
      Ok(task) => {
        info!("Submitted value {} as task {}", value, task.id());
        tasks.push(task);
      }
      Err(e) => tracing::error!("Failed to submit value {}: {}", value, e),
    }
  }

  info!("All tasks submitted. Awaiting results...");

  for task in &tasks {
    let result = task.result().await;
    match &result.outcome {
      Ok(doubled) => info!("Result for task {}: {}", result.task_id, doubled),
      Err(e) => info!("Error for task {}: {}", result.task_id, e),
    }
  }

  queue
    .stop_graceful(Duration::from_secs(5))
    .await
    .expect("Queue shutdown failed");
  info!("--- Basic Usage Example End ---");
}
