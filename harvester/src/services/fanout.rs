use futures::stream::{FuturesUnordered, StreamExt};
use log::warn;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Outcome of one fanout item, tagged with the item it ran for.
pub struct ItemResult<I, T> {
    pub item: I,
    pub outcome: anyhow::Result<T>,
}

impl<I, T> ItemResult<I, T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Runs `worker` over `items` on spawned tasks, at most `max_parallel` at once.
///
/// A worker that errors or panics only fails its own item. Results come back
/// in completion order, one per item. `on_progress` receives
/// `(completed, total)` after each item.
pub async fn map<I, T, F, Fut>(
    items: Vec<I>,
    max_parallel: usize,
    worker: F,
    on_progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
) -> Vec<ItemResult<I, T>>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let total = items.len();
    let worker = Arc::new(worker);
    let permits = Arc::new(Semaphore::new(max_parallel.max(1)));

    let mut in_flight = FuturesUnordered::new();
    for item in items {
        let worker = worker.clone();
        let permits = permits.clone();
        let task_item = item.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await?;
            worker(task_item).await
        });
        in_flight.push(async move { (item, handle.await) });
    }

    let mut results = Vec::with_capacity(total);
    while let Some((item, joined)) = in_flight.next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(anyhow::anyhow!(
                "worker panicked: {}",
                panic_message(e.into_panic())
            )),
            Err(e) => Err(anyhow::anyhow!("worker was cancelled: {e}")),
        };
        if let Err(e) = &outcome {
            warn!("Fanout item {}/{total} failed: {e:#}", results.len() + 1);
        }
        results.push(ItemResult { item, outcome });
        if let Some(progress) = on_progress {
            progress(results.len(), total);
        }
    }
    results
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
