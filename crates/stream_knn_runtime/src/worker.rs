//! Partition workers.
//!
//! Each worker drains one bounded queue and answers every batch on the
//! blocking thread pool, so a slow KNN search never stalls the async
//! executor. A batch that panics or runs past its time limit is reported as
//! failed and its results are lost; the worker moves on to the next batch.

use crate::error::PipelineError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream_knn_core::{KnnResult, LocalKnnEngine, PartitionId, RoutedPartitionBatch, SlideId};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Computes the results of one partition batch.
pub trait BatchProcessor: Send + Sync + 'static {
    fn process(&self, batch: &RoutedPartitionBatch) -> Vec<KnnResult>;
}

impl BatchProcessor for LocalKnnEngine {
    fn process(&self, batch: &RoutedPartitionBatch) -> Vec<KnnResult> {
        self.process_batch(batch)
    }
}

/// What happened to one dispatched batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub worker: usize,
    pub slide_id: SlideId,
    pub partition_id: PartitionId,
    /// Interior queries the batch carried
    pub queries: usize,
    pub elapsed: Duration,
    pub results: Result<Vec<KnnResult>, PipelineError>,
}

/// Per-worker counters returned when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub batches: u64,
    pub failures: u64,
}

pub struct PartitionWorker {
    id: usize,
    processor: Arc<dyn BatchProcessor>,
    batch_timeout: Option<Duration>,
}

impl PartitionWorker {
    pub fn new(id: usize, processor: Arc<dyn BatchProcessor>, batch_timeout: Option<Duration>) -> Self {
        Self {
            id,
            processor,
            batch_timeout,
        }
    }

    /// Processes batches until the queue closes, forwarding every outcome.
    pub async fn run(
        self,
        mut batches: mpsc::Receiver<RoutedPartitionBatch>,
        outcomes: mpsc::Sender<BatchOutcome>,
    ) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while let Some(batch) = batches.recv().await {
            let outcome = self.process(batch).await;
            stats.batches += 1;
            if outcome.results.is_err() {
                stats.failures += 1;
            }
            if outcomes.send(outcome).await.is_err() {
                warn!("⚠️ Worker {}: result collector is gone, stopping", self.id);
                break;
            }
        }
        debug!(
            "Worker {} stopped after {} batches ({} failed)",
            self.id, stats.batches, stats.failures
        );
        stats
    }

    /// Answers a single batch on the blocking pool.
    ///
    /// On timeout the blocking task is detached; it finishes in the
    /// background and its results are discarded.
    pub async fn process(&self, batch: RoutedPartitionBatch) -> BatchOutcome {
        let started = Instant::now();
        let slide_id = batch.slide_id;
        let partition_id = batch.partition_id;
        let queries = batch.query_count();

        let processor = Arc::clone(&self.processor);
        let task = tokio::task::spawn_blocking(move || processor.process(&batch));

        let joined = match self.batch_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {limit:?}")),
            },
            None => task.await.map_err(|e| e.to_string()),
        };

        let results = joined.map_err(|reason| {
            error!(
                "❌ Worker {}: partition {} slide {} failed ({}), {} queries lost",
                self.id, partition_id, slide_id, reason, queries
            );
            PipelineError::WorkerFailed(format!(
                "partition {partition_id} slide {slide_id}: {reason}"
            ))
        });

        BatchOutcome {
            worker: self.id,
            slide_id,
            partition_id,
            queries,
            elapsed: started.elapsed(),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_knn_core::Point;

    struct Flaky;

    impl BatchProcessor for Flaky {
        fn process(&self, batch: &RoutedPartitionBatch) -> Vec<KnnResult> {
            match batch.partition_id {
                1 => panic!("partition 1 always fails"),
                2 => {
                    std::thread::sleep(Duration::from_millis(300));
                    Vec::new()
                }
                _ => LocalKnnEngine::new(1, 4).unwrap().process_batch(batch),
            }
        }
    }

    fn batch(slide_id: SlideId, partition_id: PartitionId) -> RoutedPartitionBatch {
        let mut batch = RoutedPartitionBatch::new(slide_id, partition_id);
        batch.points = vec![
            Point::new("q", 0, [0.0, 0.0]).with_query(true),
            Point::new("n", 0, [1.0, 0.0]),
        ];
        batch
    }

    #[tokio::test]
    async fn test_engine_results_are_forwarded() {
        let worker = PartitionWorker::new(0, Arc::new(LocalKnnEngine::new(1, 4).unwrap()), None);
        let outcome = worker.process(batch(3, 0)).await;
        assert_eq!(outcome.slide_id, 3);
        assert_eq!(outcome.queries, 1);
        let results = outcome.results.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].neighbors[0].point_id, "n");
    }

    #[tokio::test]
    async fn test_panicking_batch_is_reported_and_worker_continues() {
        let (batch_tx, batch_rx) = mpsc::channel(4);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(4);
        let worker = PartitionWorker::new(7, Arc::new(Flaky), None);
        let handle = tokio::spawn(worker.run(batch_rx, outcome_tx));

        batch_tx.send(batch(0, 1)).await.unwrap();
        batch_tx.send(batch(0, 0)).await.unwrap();
        drop(batch_tx);

        let failed = outcome_rx.recv().await.unwrap();
        assert_eq!(failed.partition_id, 1);
        assert!(matches!(failed.results, Err(PipelineError::WorkerFailed(_))));

        let ok = outcome_rx.recv().await.unwrap();
        assert_eq!(ok.partition_id, 0);
        assert_eq!(ok.results.unwrap().len(), 1);

        let stats = handle.await.unwrap();
        assert_eq!(
            stats,
            WorkerStats {
                batches: 2,
                failures: 1
            }
        );
    }

    #[tokio::test]
    async fn test_slow_batch_times_out() {
        let worker = PartitionWorker::new(0, Arc::new(Flaky), Some(Duration::from_millis(20)));
        let outcome = worker.process(batch(9, 2)).await;
        match outcome.results {
            Err(PipelineError::WorkerFailed(reason)) => assert!(reason.contains("timed out")),
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(outcome.elapsed < Duration::from_millis(300));
    }
}
