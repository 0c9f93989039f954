//! Parallel-per-item variant (`spec.md` §4.3): a fixed set of workers reading
//! from a bounded task channel of capacity `2 × workers`. Submission blocks
//! when the channel is full; the pool drains and joins cleanly when the
//! caller's cancellation token fires. Grounded on the ingestion-worker-pool
//! shape in `examples/other_examples`'s iota worker pool — a bounded mpsc
//! feeding a fixed set of tasks, with a single result-collection channel in
//! place of its watermark tracker (this pool has no sequence ordering to
//! preserve).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

const DEFAULT_WORKERS: usize = 4;

pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Runs `process` over every item in `items` using `self.workers`
    /// concurrent tasks. Results are returned in completion order, not input
    /// order. If `cancel` fires, workers stop pulling new items and already
    /// in-flight calls are left to finish.
    pub async fn run<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        process: F,
        cancel: CancellationToken,
    ) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let capacity = 2 * self.workers;
        let (tx, rx) = mpsc::channel::<T>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<R>();
        let process = Arc::new(process);

        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let process = process.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        item = async { rx.lock().await.recv().await } => item,
                    };
                    let Some(item) = item else { break };
                    let result = process(item).await;
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            if tx.send(item).await.is_err() {
                break;
            }
        }
        drop(tx);

        for h in handles {
            let _ = h.await;
        }

        let mut results = Vec::new();
        while let Some(r) = result_rx.recv().await {
            results.push(r);
        }
        results
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}
