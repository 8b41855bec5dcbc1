//! Spatial partitioning of the global area and slide routing.
//!
//! [`SpatialPartitionIndex`] is the static grid of partitions with boundary
//! margins; [`PartitionRouter`] uses it to fan a sealed slide out into
//! per-partition batches.

mod index;
mod router;

pub use index::{Membership, Partition, SpatialPartitionIndex, MAX_PARTITIONS};
pub use router::PartitionRouter;
