//! Fan-out of sealed slides into per-partition batches
use super::index::SpatialPartitionIndex;
use crate::types::{PartitionId, RoutedPartitionBatch, Slide};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes every point of a sealed slide to the partitions that can see it.
///
/// Interior copies keep the source query flag; boundary replicas are always
/// non-query. The router only ever consumes whole [`Slide`]s, so partial
/// slides never reach a partition.
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    index: Arc<SpatialPartitionIndex>,
}

impl PartitionRouter {
    pub fn new(index: Arc<SpatialPartitionIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<SpatialPartitionIndex> {
        &self.index
    }

    /// Splits `slide` into one batch per partition with at least one member.
    ///
    /// Points that no partition covers are dropped with a warning.
    pub fn route(&self, slide: &Slide) -> BTreeMap<PartitionId, RoutedPartitionBatch> {
        let mut batches: BTreeMap<PartitionId, RoutedPartitionBatch> = BTreeMap::new();
        let mut unrouted = 0usize;

        for point in &slide.points {
            let hits = self.index.lookup(&point.coords);
            if hits.is_empty() {
                unrouted += 1;
                debug!(
                    "Point {} at {:?} is outside every partition",
                    point.id, point.coords
                );
                continue;
            }

            for (partition_id, membership) in hits {
                batches
                    .entry(partition_id)
                    .or_insert_with(|| RoutedPartitionBatch::new(slide.id, partition_id))
                    .points
                    .push(point.routed_copy(!membership.is_interior()));
            }
        }

        if unrouted > 0 {
            warn!(
                "⚠️ Slide {}: dropped {} point(s) outside the partitioned area",
                slide.id, unrouted
            );
        }

        debug!(
            "Slide {} routed: {} points into {} partition batches",
            slide.id,
            slide.len(),
            batches.len()
        );
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rectangle;
    use crate::types::Point;

    fn router(height: u32, scale: f64) -> PartitionRouter {
        let area = Rectangle::from_bounds(&[[0.0, 2.0], [0.0, 2.0]]).unwrap();
        PartitionRouter::new(Arc::new(
            SpatialPartitionIndex::build(area, height, scale).unwrap(),
        ))
    }

    #[test]
    fn test_one_batch_per_occupied_partition() {
        let router = router(2, 0.0);
        let slide = Slide {
            id: 7,
            points: vec![
                Point::new("a", 7000, [0.5, 0.5]).with_query(true),
                Point::new("b", 7001, [0.6, 0.4]),
                Point::new("c", 7002, [1.5, 1.5]).with_query(true),
            ],
        };

        let batches = router.route(&slide);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[&0].len(), 2);
        assert_eq!(batches[&3].len(), 1);
        assert!(batches.values().all(|b| b.slide_id == 7));
        assert!(batches.values().all(|b| b.replica_count() == 0));
    }

    #[test]
    fn test_replicas_are_never_queries() {
        let router = router(2, 0.5);
        let slide = Slide {
            id: 1,
            points: vec![Point::new("edge", 1000, [0.95, 0.2]).with_query(true)],
        };

        let batches = router.route(&slide);
        assert_eq!(batches.len(), 2);

        let home = &batches[&0].points[0];
        assert!(home.is_query && !home.is_boundary);

        let replica = &batches[&1].points[0];
        assert!(!replica.is_query && replica.is_boundary);

        let total_queries: usize = batches.values().map(|b| b.query_count()).sum();
        assert_eq!(total_queries, 1);
    }

    #[test]
    fn test_points_outside_area_are_dropped() {
        let router = router(2, 0.0);
        let slide = Slide {
            id: 0,
            points: vec![Point::new("far", 0, [9.0, 9.0])],
        };
        assert!(router.route(&slide).is_empty());
    }
}
