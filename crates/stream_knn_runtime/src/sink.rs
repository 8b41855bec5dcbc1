//! Destinations for completed KNN results.

use crate::error::PipelineError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use stream_knn_core::KnnResult;
use tokio::sync::Mutex;

/// Receives the results of each answered partition batch.
///
/// Results arrive grouped per batch. Batches of different slides may
/// interleave; consumers that need slide order sort by `slide_id`.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn accept(&self, results: Vec<KnnResult>) -> Result<(), PipelineError>;

    /// Called once after the last batch.
    async fn flush(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Keeps every result in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Mutex<Vec<KnnResult>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the results received so far, ordered by slide and then
    /// query id.
    pub async fn results(&self) -> Vec<KnnResult> {
        let mut results = self.results.lock().await.clone();
        results.sort_by(|a, b| {
            a.slide_id
                .cmp(&b.slide_id)
                .then_with(|| a.query_point_id.cmp(&b.query_point_id))
        });
        results
    }

    pub async fn len(&self) -> usize {
        self.results.lock().await.len()
    }
}

#[async_trait]
impl ResultSink for CollectingSink {
    async fn accept(&self, results: Vec<KnnResult>) -> Result<(), PipelineError> {
        self.results.lock().await.extend(results);
        Ok(())
    }
}

/// Counts results without keeping them.
#[derive(Debug, Default)]
pub struct DiscardSink {
    accepted: AtomicU64,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResultSink for DiscardSink {
    async fn accept(&self, results: Vec<KnnResult>) -> Result<(), PipelineError> {
        self.accepted
            .fetch_add(results.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(slide_id: i64, query: &str) -> KnnResult {
        KnnResult {
            slide_id,
            query_point_id: query.to_string(),
            neighbors: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_collecting_sink_orders_snapshot() {
        let sink = CollectingSink::new();
        sink.accept(vec![result(2, "b"), result(1, "z")]).await.unwrap();
        sink.accept(vec![result(1, "a")]).await.unwrap();
        sink.flush().await.unwrap();

        let ids: Vec<_> = sink
            .results()
            .await
            .into_iter()
            .map(|r| (r.slide_id, r.query_point_id))
            .collect();
        assert_eq!(
            ids,
            vec![(1, "a".to_string()), (1, "z".to_string()), (2, "b".to_string())]
        );
        assert_eq!(sink.len().await, 3);
    }

    #[tokio::test]
    async fn test_discard_sink_counts() {
        let sink = DiscardSink::new();
        sink.accept(vec![result(0, "a"), result(0, "b")]).await.unwrap();
        sink.accept(Vec::new()).await.unwrap();
        assert_eq!(sink.accepted(), 2);
    }
}
