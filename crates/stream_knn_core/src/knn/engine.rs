use super::packed_rtree::PackedRTree;
use crate::error::KnnError;
use crate::types::{KnnResult, Neighbor, RoutedPartitionBatch};
use tracing::debug;

/// Exact KNN over the points of one routed partition batch.
///
/// The engine holds only its parameters. Each call to
/// [`LocalKnnEngine::process_batch`] bulk loads a fresh [`PackedRTree`] that
/// borrows the batch and is dropped before the call returns, so one engine can
/// be shared by any number of workers.
///
/// Results are exact with respect to the points routed to the partition. A
/// query's true global neighbors can lie beyond the boundary margin, in which
/// case the result is the best answer the partition can see.
#[derive(Debug, Clone)]
pub struct LocalKnnEngine {
    k: usize,
    branch_factor: usize,
}

impl LocalKnnEngine {
    pub fn new(k: usize, branch_factor: usize) -> Result<Self, KnnError> {
        if k < 1 {
            return Err(KnnError::config("k must be at least 1"));
        }
        if branch_factor < 2 {
            return Err(KnnError::config(format!(
                "branch factor must be at least 2, got {branch_factor}"
            )));
        }
        Ok(Self { k, branch_factor })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn branch_factor(&self) -> usize {
        self.branch_factor
    }

    /// Answers every interior query point in `batch`.
    ///
    /// Each result has `min(k, visible points - 1)` neighbors ordered by
    /// ascending distance, ties by ascending point id. The query point itself
    /// is never its own neighbor; replicas of it with the same identity are
    /// excluded as well.
    pub fn process_batch(&self, batch: &RoutedPartitionBatch) -> Vec<KnnResult> {
        let tree = PackedRTree::bulk_load(&batch.points, self.branch_factor);

        let results: Vec<KnnResult> = batch
            .points
            .iter()
            .filter(|q| q.is_local_query())
            .map(|query| {
                let neighbors = tree
                    .nearest(&query.coords, self.k + 1)
                    .into_iter()
                    .filter(|(index, _)| batch.points[*index] != *query)
                    .take(self.k)
                    .map(|(index, distance_sq)| Neighbor {
                        point_id: batch.points[index].id.clone(),
                        distance: distance_sq.sqrt(),
                    })
                    .collect();
                KnnResult {
                    slide_id: batch.slide_id,
                    query_point_id: query.id.clone(),
                    neighbors,
                }
            })
            .collect();

        debug!(
            "Partition {} slide {}: {} queries over {} points (tree height {})",
            batch.partition_id,
            batch.slide_id,
            results.len(),
            batch.len(),
            tree.height()
        );
        results
    }
}
