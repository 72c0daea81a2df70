use task_fanout::{BoxError, PoolOptions, Queue, TaskId};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Group Fan-In Example ---");

  let queue = Queue::with_options(
    4,
    |id: TaskId, word: String| async move {
      tokio::time::sleep(Duration::from_millis(20 * word.len() as u64)).await;
      if word.is_empty() {
        return Err(BoxError::from(format!("task {} got an empty word", id)));
      }
      Ok(word.to_uppercase())
    },
    PoolOptions::default().with_name("fan_in_pool"),
  )
  .expect("Queue construction failed");

  let words = ["pool", "", "barrier", "signal", "group", "fan"];
  let mut group = match queue.enqueue_group(words.iter().map(|w| w.to_string())).await {
    Ok(group) => group,
    Err(e) => {
      tracing::warn!("Only {} tasks were submitted: {}", e.group().len(), e);
      e.into_group()
    }
  };

  // Results arrive in completion order.
  while let Some(result) = group.results().recv().await {
    match &result.outcome {
      Ok(word) => info!("Task {} finished: {}", result.task_id, word),
      Err(e) => info!("Task {} failed: {}", result.task_id, e),
    }
  }

  group.done().await;
  info!("Group of {} tasks completed.", group.len());
  queue.stop();
  info!("--- Group Fan-In Example End ---");
}
