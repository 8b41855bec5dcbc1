//! # Result Evaluation
//!
//! Measures how far partitioned answers drift from an exact answer.
//!
//! Partitioned KNN only sees the points routed to a partition, so a query
//! whose true neighbors lie beyond the boundary margin gets an approximate
//! result. [`reference_knn`] answers a slide serially as one unpartitioned
//! batch, and [`Evaluation`] compares partitioned results with that reference
//! neighbor by neighbor:
//!
//! - precision = matched neighbors / returned neighbors
//! - recall = matched neighbors / reference neighbors
//!
//! Results are matched on `(slide_id, query_point_id)` and neighbors on point
//! id, counting repeated ids as a multiset.

use crate::knn::LocalKnnEngine;
use crate::types::{KnnResult, RoutedPartitionBatch, Slide, SlideId};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Serial KNN over a whole slide, ignoring partitioning.
///
/// Every query point of the slide receives a result computed against every
/// other point of the slide.
pub fn reference_knn(slide: &Slide, engine: &LocalKnnEngine) -> Vec<KnnResult> {
    let mut batch = RoutedPartitionBatch::new(slide.id, 0);
    batch.points = slide.points.iter().map(|p| p.routed_copy(false)).collect();
    let results = engine.process_batch(&batch);
    debug!(
        "Reference KNN for slide {}: {} queries over {} points",
        slide.id,
        results.len(),
        batch.len()
    );
    results
}

/// Compares `results` with `reference`, returning `(precision, recall)`.
pub fn precision_recall(results: &[KnnResult], reference: &[KnnResult]) -> (f64, f64) {
    let mut evaluation = Evaluation::new(reference);
    evaluation.observe(results);
    let effectiveness = evaluation.effectiveness();
    (effectiveness.precision(), effectiveness.recall())
}

/// Neighbor counts behind a precision and recall figure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Effectiveness {
    /// Neighbors in the reference results
    pub expected: u64,
    /// Neighbors in the evaluated results
    pub returned: u64,
    /// Returned neighbors also present in the reference
    pub matched: u64,
}

impl Effectiveness {
    /// 1.0 when nothing was returned.
    pub fn precision(&self) -> f64 {
        ratio(self.matched, self.returned)
    }

    /// 1.0 when the reference expects nothing.
    pub fn recall(&self) -> f64 {
        ratio(self.matched, self.expected)
    }

    pub fn merge(&mut self, other: &Effectiveness) {
        self.expected += other.expected;
        self.returned += other.returned;
        self.matched += other.matched;
    }
}

fn ratio(matched: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        matched as f64 / total as f64
    }
}

/// Incremental comparison against a fixed reference.
///
/// Partitioned results can be observed batch by batch as they arrive. Each
/// reference neighbor is matched at most once.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    unmatched: HashMap<(SlideId, String), HashMap<String, usize>>,
    effectiveness: Effectiveness,
}

impl Evaluation {
    pub fn new(reference: &[KnnResult]) -> Self {
        let mut evaluation = Self::default();
        for result in reference {
            let expected = evaluation
                .unmatched
                .entry((result.slide_id, result.query_point_id.clone()))
                .or_default();
            for neighbor in &result.neighbors {
                *expected.entry(neighbor.point_id.clone()).or_insert(0) += 1;
            }
            evaluation.effectiveness.expected += result.neighbors.len() as u64;
        }
        evaluation
    }

    pub fn observe(&mut self, results: &[KnnResult]) {
        for result in results {
            self.effectiveness.returned += result.neighbors.len() as u64;
            let Some(expected) = self
                .unmatched
                .get_mut(&(result.slide_id, result.query_point_id.clone()))
            else {
                continue;
            };
            for neighbor in &result.neighbors {
                if let Some(count) = expected.get_mut(&neighbor.point_id) {
                    if *count > 0 {
                        *count -= 1;
                        self.effectiveness.matched += 1;
                    }
                }
            }
        }
    }

    pub fn effectiveness(&self) -> Effectiveness {
        self.effectiveness
    }
}
