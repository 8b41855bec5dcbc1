//! R*-tree backed grid of spatial partitions.
//!
//! The global area is cut into `leaf_count` cells per axis, where
//! `leaf_count = 2^(height - 1)`. Every cell keeps its exact core rectangle
//! and an inflated rectangle grown by the boundary length; the inflated
//! rectangles go into an `rstar` tree so a lookup returns every partition
//! whose margin covers a point.

use crate::error::KnnError;
use crate::geometry::{pad, IndexPoint, Rectangle};
use crate::types::{Coords, PartitionId};
use rstar::{Envelope, PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Upper bound on the number of partitions a grid may contain.
pub const MAX_PARTITIONS: usize = 1 << 20;

/// A spatial cell with its core and boundary-inflated rectangles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub core_rect: Rectangle,
    pub inflated_rect: Rectangle,
}

/// How a point belongs to a partition returned by a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Membership {
    /// The point's home partition; query points keep their flag here.
    Interior,
    /// The point only falls in the partition's boundary margin.
    Boundary,
}

impl Membership {
    pub fn is_interior(self) -> bool {
        matches!(self, Membership::Interior)
    }
}

/// Entry stored inside the R-tree.
#[derive(Debug, Clone)]
struct PartitionEntry {
    id: PartitionId,
    envelope: AABB<IndexPoint>,
}

impl RTreeObject for PartitionEntry {
    type Envelope = AABB<IndexPoint>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for PartitionEntry {
    fn distance_2(&self, point: &IndexPoint) -> f64 {
        self.envelope.distance_2(point)
    }

    fn contains_point(&self, point: &IndexPoint) -> bool {
        self.envelope.contains_point(point)
    }
}

/// Static partition grid. Built once, read-only afterwards and therefore
/// safe to share behind an `Arc` across any number of routers and workers.
#[derive(Debug)]
pub struct SpatialPartitionIndex {
    area: Rectangle,
    height: u32,
    leaf_count: usize,
    cell_width: f64,
    boundary_length: f64,
    partitions: Vec<Partition>,
    tree: RTree<PartitionEntry>,
}

impl SpatialPartitionIndex {
    /// Builds the partition grid over `area`.
    ///
    /// # Arguments
    ///
    /// * `area` - Global bounding box the grid tiles exactly
    /// * `height` - Index height; `2^(height - 1)` cells per axis
    /// * `boundary_scale` - Margin as a fraction of the smallest cell width
    ///
    /// # Errors
    ///
    /// [`KnnError::Configuration`] when `height < 1`, `boundary_scale` is
    /// negative or not finite, or the grid would exceed [`MAX_PARTITIONS`].
    pub fn build(area: Rectangle, height: u32, boundary_scale: f64) -> Result<Self, KnnError> {
        if height < 1 {
            return Err(KnnError::config("index height must be at least 1"));
        }
        if !boundary_scale.is_finite() || boundary_scale < 0.0 {
            return Err(KnnError::config(format!(
                "boundary length scale must be a non-negative number, got {boundary_scale}"
            )));
        }

        let dims = area.dimensions();
        let leaf_count = 1usize
            .checked_shl(height - 1)
            .ok_or_else(|| KnnError::config(format!("index height {height} is too large")))?;
        let total = u32::try_from(dims)
            .ok()
            .and_then(|d| leaf_count.checked_pow(d))
            .filter(|n| *n <= MAX_PARTITIONS)
            .ok_or_else(|| {
                KnnError::config(format!(
                    "index height {height} in {dims}D exceeds {MAX_PARTITIONS} partitions"
                ))
            })?;

        let cell_width = area.min_side() / leaf_count as f64;
        let boundary_length = cell_width * boundary_scale;

        let mut partitions = Vec::with_capacity(total);
        for id in 0..total {
            let core_rect = cell_rect(&area, leaf_count, id);
            let inflated_rect = core_rect.expanded(boundary_length);
            partitions.push(Partition {
                id: id as PartitionId,
                core_rect,
                inflated_rect,
            });
        }

        let entries = partitions
            .iter()
            .map(|p| PartitionEntry {
                id: p.id,
                envelope: p.inflated_rect.to_aabb(),
            })
            .collect();
        let tree = RTree::bulk_load(entries);

        info!(
            "🗺️ Partition index built: {} partitions ({}^{}), cell width {:.4}, boundary length {:.4}",
            total, leaf_count, dims, cell_width, boundary_length
        );

        Ok(Self {
            area,
            height,
            leaf_count,
            cell_width,
            boundary_length,
            partitions,
            tree,
        })
    }

    /// Finds every partition whose inflated rectangle contains `coords`.
    ///
    /// Exactly one entry is [`Membership::Interior`] for points inside the
    /// global area. A point lying on a shared grid line is inside several
    /// core rectangles; the lowest partition id wins the interior role and
    /// the others receive boundary replicas. Points outside every inflated
    /// rectangle, or with the wrong dimensionality, yield an empty map.
    pub fn lookup(&self, coords: &[f64]) -> BTreeMap<PartitionId, Membership> {
        let mut hits = BTreeMap::new();
        if coords.len() != self.dimensions() {
            return hits;
        }

        for entry in self.tree.locate_all_at_point(&pad(coords)) {
            hits.insert(entry.id, Membership::Boundary);
        }

        // BTreeMap iteration is ascending, so the first core hit is the lowest id.
        let home = hits
            .keys()
            .copied()
            .find(|id| self.partitions[*id as usize].core_rect.contains(coords));
        if let Some(id) = home {
            hits.insert(id, Membership::Interior);
        }
        hits
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn area(&self) -> &Rectangle {
        &self.area
    }

    pub fn dimensions(&self) -> usize {
        self.area.dimensions()
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Cells per axis.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Width of a cell along the area's shortest side.
    pub fn cell_width(&self) -> f64 {
        self.cell_width
    }

    pub fn boundary_length(&self) -> f64 {
        self.boundary_length
    }
}

/// Core rectangle of cell `id` in row-major order (axis 0 varies fastest).
///
/// Shared edges are computed with the same expression on both sides so
/// neighboring cells meet without gaps; the last cell on an axis ends exactly
/// at the area's maximum.
fn cell_rect(area: &Rectangle, leaf_count: usize, id: usize) -> Rectangle {
    let mut remainder = id;
    let mut min = Coords::new();
    let mut max = Coords::new();
    for axis in 0..area.dimensions() {
        let cell = remainder % leaf_count;
        remainder /= leaf_count;

        let step = area.side(axis) / leaf_count as f64;
        let origin = area.min()[axis];
        min.push(origin + cell as f64 * step);
        max.push(if cell + 1 == leaf_count {
            area.max()[axis]
        } else {
            origin + (cell + 1) as f64 * step
        });
    }
    Rectangle::from_corners(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: f64) -> Rectangle {
        Rectangle::from_bounds(&[[0.0, side], [0.0, side]]).unwrap()
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(matches!(
            SpatialPartitionIndex::build(square(2.0), 0, 0.0),
            Err(KnnError::Configuration(_))
        ));
        assert!(matches!(
            SpatialPartitionIndex::build(square(2.0), 2, -0.1),
            Err(KnnError::Configuration(_))
        ));
        assert!(SpatialPartitionIndex::build(square(2.0), 40, 0.0).is_err());
    }

    #[test]
    fn test_height_one_is_a_single_partition() {
        let index = SpatialPartitionIndex::build(square(10.0), 1, 0.5).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.leaf_count(), 1);
        assert_eq!(index.boundary_length(), 5.0);

        let hits = index.lookup(&[3.0, 7.0]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[&0], Membership::Interior);
    }

    #[test]
    fn test_distinct_ids_with_positive_area() {
        let area = Rectangle::from_bounds(&[[0.0, 8.0], [0.0, 4.0], [-1.0, 1.0]]).unwrap();
        let index = SpatialPartitionIndex::build(area, 3, 0.1).unwrap();
        assert_eq!(index.len(), 4usize.pow(3));

        let mut ids: Vec<_> = index.partitions().iter().map(|p| p.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 64);
        assert!(index.partitions().iter().all(|p| p.core_rect.volume() > 0.0));
    }

    #[test]
    fn test_core_rectangles_tile_the_area() {
        let area = Rectangle::from_bounds(&[[-3.0, 5.0], [1.0, 4.0]]).unwrap();
        let index = SpatialPartitionIndex::build(area.clone(), 3, 0.25).unwrap();
        let parts = index.partitions();

        let total: f64 = parts.iter().map(|p| p.core_rect.volume()).sum();
        assert!((total - area.volume()).abs() < 1e-9);

        for (i, a) in parts.iter().enumerate() {
            for b in &parts[i + 1..] {
                assert_eq!(a.core_rect.intersection_volume(&b.core_rect), 0.0);
            }
        }
    }

    #[test]
    fn test_adjacent_inflated_rectangles_overlap_by_twice_the_margin() {
        let index = SpatialPartitionIndex::build(square(4.0), 2, 0.25).unwrap();
        let boundary = index.boundary_length();
        assert_eq!(boundary, 0.5);

        // Row-major: 0 and 1 share the x = 2 edge, 0 and 2 share the y = 2 edge.
        let p0 = index.partition(0).unwrap();
        let p1 = index.partition(1).unwrap();
        let p2 = index.partition(2).unwrap();
        assert_eq!(p0.inflated_rect.max()[0] - p1.inflated_rect.min()[0], 2.0 * boundary);
        assert_eq!(p0.inflated_rect.max()[1] - p2.inflated_rect.min()[1], 2.0 * boundary);
    }

    #[test]
    fn test_lookup_covers_every_sampled_point() {
        let index = SpatialPartitionIndex::build(square(2.0), 3, 0.0).unwrap();
        for i in 0..=40 {
            for j in 0..=40 {
                let coords = [i as f64 / 20.0, j as f64 / 20.0];
                let hits = index.lookup(&coords);
                assert!(!hits.is_empty(), "no partition for {coords:?}");
                let interior = hits.values().filter(|m| m.is_interior()).count();
                assert_eq!(interior, 1, "expected one home partition for {coords:?}");
            }
        }
    }

    #[test]
    fn test_grid_line_tie_breaks_to_lowest_id() {
        let index = SpatialPartitionIndex::build(square(2.0), 2, 0.0).unwrap();
        let hits = index.lookup(&[1.0, 1.0]);
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[&0], Membership::Interior);
        assert_eq!(hits[&1], Membership::Boundary);
        assert_eq!(hits[&2], Membership::Boundary);
        assert_eq!(hits[&3], Membership::Boundary);
    }

    #[test]
    fn test_boundary_margin_replicates_near_edges() {
        let index = SpatialPartitionIndex::build(square(2.0), 2, 0.5).unwrap();
        let hits = index.lookup(&[0.9, 0.2]);
        assert_eq!(hits[&0], Membership::Interior);
        assert_eq!(hits[&1], Membership::Boundary);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_lookup_outside_area() {
        let index = SpatialPartitionIndex::build(square(2.0), 2, 0.0).unwrap();
        assert!(index.lookup(&[5.0, 5.0]).is_empty());
        assert!(index.lookup(&[1.0]).is_empty());

        let margin = SpatialPartitionIndex::build(square(2.0), 2, 0.5).unwrap();
        let hits = margin.lookup(&[-0.2, 0.2]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[&0], Membership::Boundary);
    }
}
