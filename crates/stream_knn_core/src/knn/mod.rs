//! Per-partition KNN search.
//!
//! [`LocalKnnEngine`] answers the queries of one routed batch against an
//! ephemeral [`PackedRTree`] built over that batch alone.

mod engine;
mod packed_rtree;

pub use engine::LocalKnnEngine;
pub use packed_rtree::PackedRTree;
