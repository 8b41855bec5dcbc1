//! Axis-aligned rectangles in up to [`MAX_DIMENSIONS`] dimensions.

use crate::error::KnnError;
use crate::types::Coords;
use rstar::AABB;
use serde::{Deserialize, Serialize};

/// Highest dimensionality supported by the partition index.
pub const MAX_DIMENSIONS: usize = 3;

/// Point type of the R*-tree used for partition lookup. Lower-dimensional
/// data is embedded with zero padding.
pub type IndexPoint = [f64; MAX_DIMENSIONS];

/// Closed axis-aligned box `[min, max]` on every axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    min: Coords,
    max: Coords,
}

impl Rectangle {
    /// Builds a rectangle from `(min, max)` pairs, one per axis.
    ///
    /// Fails when there are no axes, more than [`MAX_DIMENSIONS`] axes, or
    /// an axis with non-finite bounds or `min >= max`.
    pub fn from_bounds(bounds: &[[f64; 2]]) -> Result<Self, KnnError> {
        if bounds.is_empty() || bounds.len() > MAX_DIMENSIONS {
            return Err(KnnError::config(format!(
                "area must have between 1 and {MAX_DIMENSIONS} axes, got {}",
                bounds.len()
            )));
        }
        for (axis, [lo, hi]) in bounds.iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(KnnError::config(format!(
                    "area axis {axis} must satisfy min < max, got [{lo}, {hi}]"
                )));
            }
        }
        Ok(Self {
            min: bounds.iter().map(|b| b[0]).collect(),
            max: bounds.iter().map(|b| b[1]).collect(),
        })
    }

    /// Degenerate rectangle covering a single position.
    pub fn from_point(coords: &[f64]) -> Self {
        Self {
            min: coords.iter().copied().collect(),
            max: coords.iter().copied().collect(),
        }
    }

    pub(crate) fn from_corners(min: Coords, max: Coords) -> Self {
        debug_assert_eq!(min.len(), max.len());
        Self { min, max }
    }

    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &[f64] {
        &self.min
    }

    pub fn max(&self) -> &[f64] {
        &self.max
    }

    /// Length of the rectangle along `axis`.
    pub fn side(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    pub fn min_side(&self) -> f64 {
        (0..self.dimensions())
            .map(|axis| self.side(axis))
            .fold(f64::INFINITY, f64::min)
    }

    /// Product of side lengths (area in 2D, volume in 3D).
    pub fn volume(&self) -> f64 {
        (0..self.dimensions()).map(|axis| self.side(axis)).product()
    }

    pub fn center(&self) -> Coords {
        self.min
            .iter()
            .zip(self.max.iter())
            .map(|(lo, hi)| (lo + hi) / 2.0)
            .collect()
    }

    /// Inclusive containment test. Returns false on a dimension mismatch.
    pub fn contains(&self, coords: &[f64]) -> bool {
        coords.len() == self.dimensions()
            && coords
                .iter()
                .zip(self.min.iter().zip(self.max.iter()))
                .all(|(c, (lo, hi))| *lo <= *c && *c <= *hi)
    }

    /// Returns this rectangle grown by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: self.min.iter().map(|v| v - margin).collect(),
            max: self.max.iter().map(|v| v + margin).collect(),
        }
    }

    /// Volume of the overlap with `other`, zero when they only touch.
    pub fn intersection_volume(&self, other: &Rectangle) -> f64 {
        (0..self.dimensions())
            .map(|axis| {
                let lo = self.min[axis].max(other.min[axis]);
                let hi = self.max[axis].min(other.max[axis]);
                (hi - lo).max(0.0)
            })
            .product()
    }

    /// Grows this rectangle to cover `other`.
    pub fn merge(&mut self, other: &Rectangle) {
        for axis in 0..self.dimensions() {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    /// Grows this rectangle to cover a position.
    pub fn merge_point(&mut self, coords: &[f64]) {
        for (axis, c) in coords.iter().enumerate().take(self.dimensions()) {
            self.min[axis] = self.min[axis].min(*c);
            self.max[axis] = self.max[axis].max(*c);
        }
    }

    /// Squared minimum distance from `coords` to any position inside the
    /// rectangle (zero when inside). Lower bound for every point it encloses.
    pub fn min_distance_sq(&self, coords: &[f64]) -> f64 {
        coords
            .iter()
            .zip(self.min.iter().zip(self.max.iter()))
            .map(|(c, (lo, hi))| {
                let d = if c < lo {
                    lo - c
                } else if c > hi {
                    c - hi
                } else {
                    0.0
                };
                d * d
            })
            .sum()
    }

    /// Envelope of this rectangle in the zero-padded index space.
    pub fn to_aabb(&self) -> AABB<IndexPoint> {
        AABB::from_corners(pad(&self.min), pad(&self.max))
    }
}

/// Embeds coordinates into [`IndexPoint`] space, padding missing axes with zero.
pub fn pad(coords: &[f64]) -> IndexPoint {
    let mut point = [0.0; MAX_DIMENSIONS];
    for (slot, c) in point.iter_mut().zip(coords.iter()) {
        *slot = *c;
    }
    point
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_degenerate_bounds() {
        assert!(Rectangle::from_bounds(&[]).is_err());
        assert!(Rectangle::from_bounds(&[[1.0, 1.0]]).is_err());
        assert!(Rectangle::from_bounds(&[[0.0, 1.0], [2.0, 1.0]]).is_err());
        assert!(Rectangle::from_bounds(&[[0.0, f64::NAN]]).is_err());
        assert!(Rectangle::from_bounds(&[[0.0, 1.0]; 4]).is_err());
    }

    #[test]
    fn test_containment_is_closed() {
        let rect = Rectangle::from_bounds(&[[0.0, 2.0], [0.0, 1.0]]).unwrap();
        assert!(rect.contains(&[0.0, 0.0]));
        assert!(rect.contains(&[2.0, 1.0]));
        assert!(!rect.contains(&[2.0001, 0.5]));
        assert!(!rect.contains(&[1.0]));
        assert_eq!(rect.min_side(), 1.0);
        assert_eq!(rect.volume(), 2.0);
    }

    #[test]
    fn test_min_distance_is_zero_inside_and_grows_outside() {
        let rect = Rectangle::from_bounds(&[[0.0, 1.0], [0.0, 1.0]]).unwrap();
        assert_eq!(rect.min_distance_sq(&[0.5, 0.5]), 0.0);
        assert_eq!(rect.min_distance_sq(&[3.0, 0.5]), 4.0);
        assert_eq!(rect.min_distance_sq(&[-1.0, 2.0]), 2.0);
    }

    #[test]
    fn test_expanded_and_intersection() {
        let a = Rectangle::from_bounds(&[[0.0, 1.0], [0.0, 1.0]]).unwrap();
        let b = Rectangle::from_bounds(&[[1.0, 2.0], [0.0, 1.0]]).unwrap();
        assert_eq!(a.intersection_volume(&b), 0.0);

        let grown_a = a.expanded(0.25);
        let grown_b = b.expanded(0.25);
        assert_eq!(grown_a.max()[0] - grown_b.min()[0], 0.5);
        assert!(grown_a.intersection_volume(&grown_b) > 0.0);
    }

    #[test]
    fn test_padding_fills_missing_axes() {
        assert_eq!(pad(&[1.0, 2.0]), [1.0, 2.0, 0.0]);
        assert_eq!(pad(&[4.0]), [4.0, 0.0, 0.0]);
    }
}
