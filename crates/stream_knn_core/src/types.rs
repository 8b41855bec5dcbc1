//! # Core Data Model
//!
//! Points, slides, routed partition batches and KNN results shared by every
//! stage of the pipeline.
//!
//! ## Identity
//!
//! A [`Point`] is identified by `(id, timestamp, coords)`. The `is_query` and
//! `is_boundary` flags are routing annotations and never take part in
//! equality or hashing, so a boundary replica compares equal to the interior
//! copy it was made from.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

/// Sequential identifier of a spatial partition.
pub type PartitionId = u32;

/// Event-time bucket index, `floor(timestamp / slide_interval_ms)`.
pub type SlideId = i64;

/// Coordinates of a point. Inline storage covers up to three dimensions.
pub type Coords = SmallVec<[f64; 3]>;

/// A timestamped spatial point travelling through the pipeline.
///
/// # Examples
///
/// ```rust
/// use stream_knn_core::Point;
///
/// let point = Point::new("p1", 1_500, [3.0, 4.0]).with_query(true);
/// assert_eq!(point.dimensions(), 2);
/// assert_eq!(point.distance(&[0.0, 0.0]), 5.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    /// Source-assigned identifier
    pub id: String,
    /// Event time in milliseconds
    pub timestamp: i64,
    /// Position in D-dimensional space
    pub coords: Coords,
    /// Whether a KNN result should be computed for this point
    pub is_query: bool,
    /// Set by the router on replicas placed outside their home partition
    pub is_boundary: bool,
}

impl Point {
    /// Creates a non-query, non-boundary point.
    pub fn new<C>(id: impl Into<String>, timestamp: i64, coords: C) -> Self
    where
        C: IntoIterator<Item = f64>,
    {
        Self {
            id: id.into(),
            timestamp,
            coords: coords.into_iter().collect(),
            is_query: false,
            is_boundary: false,
        }
    }

    /// Returns the point with its query flag replaced.
    pub fn with_query(mut self, is_query: bool) -> Self {
        self.is_query = is_query;
        self
    }

    pub fn dimensions(&self) -> usize {
        self.coords.len()
    }

    /// True for points that must receive a KNN result in their partition.
    pub fn is_local_query(&self) -> bool {
        self.is_query && !self.is_boundary
    }

    /// Squared Euclidean distance to `other`.
    pub fn distance_sq(&self, other: &[f64]) -> f64 {
        distance_sq(&self.coords, other)
    }

    pub fn distance(&self, other: &[f64]) -> f64 {
        self.distance_sq(other).sqrt()
    }

    /// Returns the identity key of this point.
    pub fn key(&self) -> PointKey {
        PointKey {
            id: self.id.clone(),
            timestamp: self.timestamp,
            coord_bits: self.coords.iter().map(|c| c.to_bits()).collect(),
        }
    }

    /// Makes a routed copy of this point. Replicas never carry the query flag.
    pub fn routed_copy(&self, is_boundary: bool) -> Self {
        let mut copy = self.clone();
        copy.is_boundary = is_boundary;
        if is_boundary {
            copy.is_query = false;
        }
        copy
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.id == other.id
            && self.coords.len() == other.coords.len()
            && self
                .coords
                .iter()
                .zip(other.coords.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

impl Eq for Point {}

impl Hash for Point {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.timestamp.hash(state);
        for c in &self.coords {
            c.to_bits().hash(state);
        }
    }
}

/// Owned identity of a [`Point`], usable as a set or map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointKey {
    pub id: String,
    pub timestamp: i64,
    coord_bits: SmallVec<[u64; 3]>,
}

/// Squared Euclidean distance between two coordinate slices of equal length.
pub fn distance_sq(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// One sealed tumbling-window batch of points.
///
/// Points are unique by identity and kept in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    pub id: SlideId,
    pub points: Vec<Point>,
}

impl Slide {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn query_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_query).count()
    }
}

/// The points of one slide visible to one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedPartitionBatch {
    pub slide_id: SlideId,
    pub partition_id: PartitionId,
    pub points: Vec<Point>,
}

impl RoutedPartitionBatch {
    pub fn new(slide_id: SlideId, partition_id: PartitionId) -> Self {
        Self {
            slide_id,
            partition_id,
            points: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of interior query points, i.e. the number of results this
    /// batch will produce.
    pub fn query_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_local_query()).count()
    }

    pub fn replica_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_boundary).count()
    }
}

/// A neighbor found for a query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub point_id: String,
    /// True Euclidean distance to the query point
    pub distance: f64,
}

/// The K nearest neighbors of one query point within one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnResult {
    pub slide_id: SlideId,
    pub query_point_id: String,
    /// Ordered by ascending distance, ties by ascending point id
    pub neighbors: Vec<Neighbor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_ignores_routing_flags() {
        let a = Point::new("a", 10, [1.0, 2.0]).with_query(true);
        let b = a.routed_copy(true);

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert!(!b.is_query);
        assert!(b.is_boundary);

        let set: HashSet<Point> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_identity_includes_timestamp_and_coords() {
        let a = Point::new("a", 10, [1.0, 2.0]);
        assert_ne!(a, Point::new("a", 11, [1.0, 2.0]));
        assert_ne!(a, Point::new("a", 10, [1.0, 2.5]));
        assert_ne!(a, Point::new("b", 10, [1.0, 2.0]));
    }

    #[test]
    fn test_interior_copy_keeps_query_flag() {
        let a = Point::new("a", 0, [0.0, 0.0]).with_query(true);
        let interior = a.routed_copy(false);
        assert!(interior.is_local_query());
    }

    #[test]
    fn test_batch_counts() {
        let mut batch = RoutedPartitionBatch::new(3, 1);
        batch.points.push(Point::new("q", 0, [0.0, 0.0]).with_query(true));
        batch
            .points
            .push(Point::new("r", 0, [1.0, 0.0]).with_query(true).routed_copy(true));
        batch.points.push(Point::new("p", 0, [2.0, 0.0]));

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.query_count(), 1);
        assert_eq!(batch.replica_count(), 1);
    }
}
