//! Bounded worker pool
//!
//! This module handles:
//! - Spawning one task per index, never more than `max_concurrency` at once
//! - Streaming `(index, value)` pairs back over a channel
//! - Stopping dispatch when the cancellation token fires

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// A per-item task that panicked instead of producing a value
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("worker panicked: {message}")]
pub struct TaskPanic {
    pub message: String,
}

/// Counters reported by the dispatcher once every task has finished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Tasks spawned
    pub dispatched: usize,

    /// Tasks that panicked instead of producing a value
    pub panicked: usize,

    /// Indices never dispatched because of cancellation
    pub skipped: usize,
}

/// Running pool: a result stream plus the dispatcher task
pub struct PoolHandle<T> {
    /// Results in completion order, tagged with their index. A panicked task
    /// still reports its index, with a [`TaskPanic`] in place of the value.
    pub results: mpsc::Receiver<(usize, Result<T, TaskPanic>)>,

    /// Resolves after the last task finishes
    pub dispatcher: JoinHandle<PoolReport>,
}

/// Worker pool with a global concurrency cap
///
/// The pool only runs the per-item function and forwards its value. It never
/// touches shared run state; merging results is the receiver's job.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    /// Creates a pool allowing `max_concurrency` in-flight tasks (at least 1)
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    /// Starts processing `indices` with `f`
    ///
    /// # Arguments
    ///
    /// * `indices` - Item indices to dispatch, in dispatch order
    /// * `cancel` - Stops dispatching further indices once cancelled
    /// * `f` - Per-item function; its value is sent back with the index
    ///
    /// # Returns
    ///
    /// A [`PoolHandle`]. The result channel closes once every spawned task
    /// has finished.
    pub fn spawn<T, F, Fut>(
        &self,
        indices: Vec<usize>,
        cancel: CancellationToken,
        f: F,
    ) -> PoolHandle<T>
    where
        T: Send + 'static,
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.max_concurrency);
        let semaphore = Arc::clone(&self.semaphore);
        let f = Arc::new(f);

        let dispatcher = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            let mut in_flight: HashMap<Id, usize> = HashMap::new();
            let mut report = PoolReport::default();
            let total = indices.len();

            for index in indices {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let f = Arc::clone(&f);
                let task_tx = tx.clone();
                let handle = tasks.spawn(async move {
                    let value = f(index).await;
                    // Hold the slot until the result is handed over
                    let _ = task_tx.send((index, Ok(value))).await;
                    drop(permit);
                });
                in_flight.insert(handle.id(), index);
                report.dispatched += 1;

                while let Some(joined) = tasks.try_join_next_with_id() {
                    record_join(joined, &mut in_flight, &tx, &mut report).await;
                }
            }

            report.skipped = total - report.dispatched;

            while let Some(joined) = tasks.join_next_with_id().await {
                record_join(joined, &mut in_flight, &tx, &mut report).await;
            }
            drop(tx);

            tracing::debug!(
                dispatched = report.dispatched,
                skipped = report.skipped,
                panicked = report.panicked,
                "Worker pool drained"
            );

            report
        });

        PoolHandle {
            results: rx,
            dispatcher,
        }
    }
}

/// Books a finished task; a panic is forwarded as a result for its index
async fn record_join<T>(
    joined: Result<(Id, ()), JoinError>,
    in_flight: &mut HashMap<Id, usize>,
    tx: &mpsc::Sender<(usize, Result<T, TaskPanic>)>,
    report: &mut PoolReport,
) {
    let error = match joined {
        Ok((id, ())) => {
            in_flight.remove(&id);
            return;
        }
        Err(e) => e,
    };

    let Some(index) = in_flight.remove(&error.id()) else {
        return;
    };
    if !error.is_panic() {
        return;
    }

    report.panicked += 1;
    let message = panic_message(error);
    tracing::error!(index, "Worker task panicked: {}", message);
    let _ = tx.send((index, Err(TaskPanic { message }))).await;
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_indices_delivered() {
        let pool = WorkerPool::new(4);
        let mut handle = pool.spawn((0..25).collect(), CancellationToken::new(), |index| async move {
            index * 10
        });

        let mut seen = BTreeSet::new();
        while let Some((index, value)) = handle.results.recv().await {
            assert_eq!(value, Ok(index * 10));
            seen.insert(index);
        }

        assert_eq!(seen, (0..25).collect());
        let report = handle.dispatcher.await.unwrap();
        assert_eq!(report.dispatched, 25);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_cap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let pool = WorkerPool::new(3);
        let (flight, high) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let mut handle = pool.spawn((0..30).collect(), CancellationToken::new(), move |_| {
            let flight = Arc::clone(&flight);
            let high = Arc::clone(&high);
            async move {
                let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                high.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                flight.fetch_sub(1, Ordering::SeqCst);
            }
        });

        while handle.results.recv().await.is_some() {}
        handle.dispatcher.await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_siblings() {
        let pool = WorkerPool::new(2);
        let mut handle = pool.spawn((0..6).collect(), CancellationToken::new(), |index| async move {
            if index == 3 {
                panic!("item 3 exploded");
            }
            index
        });

        let mut values = BTreeSet::new();
        let mut panicked = Vec::new();
        while let Some((index, value)) = handle.results.recv().await {
            match value {
                Ok(value) => {
                    values.insert(value);
                }
                Err(panic) => panicked.push((index, panic.message)),
            }
        }

        assert_eq!(values, [0, 1, 2, 4, 5].into_iter().collect());
        assert_eq!(panicked, vec![(3, "item 3 exploded".to_string())]);
        let report = handle.dispatcher.await.unwrap();
        assert_eq!(report.panicked, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(1);
        let trigger = cancel.clone();

        let mut handle = pool.spawn((0..100).collect(), cancel, move |index| {
            let trigger = trigger.clone();
            async move {
                if index == 2 {
                    trigger.cancel();
                }
                index
            }
        });

        let mut received = 0;
        while handle.results.recv().await.is_some() {
            received += 1;
        }

        let report = handle.dispatcher.await.unwrap();
        assert!(received < 100);
        assert_eq!(report.dispatched + report.skipped, 100);
        assert!(report.skipped > 0);
    }
}
