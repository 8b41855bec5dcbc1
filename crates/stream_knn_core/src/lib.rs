//! # Stream KNN Core
//!
//! Continuous k-nearest-neighbor search over a stream of timestamped spatial
//! points, split into independent spatial partitions so that each partition
//! can be answered on its own worker.
//!
//! ## Data Flow
//!
//! ```text
//! raw points ──► SlideWindowAssembler ──► Slide
//!                                           │
//!                 SpatialPartitionIndex ◄── PartitionRouter
//!                                           │
//!                          RoutedPartitionBatch (one per partition)
//!                                           │
//!                                    LocalKnnEngine ──► KnnResult
//! ```
//!
//! - [`SlideWindowAssembler`] groups points into tumbling event-time slides,
//!   drops duplicates and late points, and marks queries.
//! - [`SpatialPartitionIndex`] is a static grid of partitions over the
//!   configured area. Each partition's rectangle is inflated by a boundary
//!   margin so that points near an edge are visible to the neighbor too.
//! - [`PartitionRouter`] turns a sealed slide into per-partition batches.
//!   Copies placed outside a point's home partition are boundary replicas and
//!   never act as queries.
//! - [`LocalKnnEngine`] answers the queries of one batch against an ephemeral
//!   packed R-tree.
//! - [`ExpiringWindowBuffer`] keeps bounded per-slide bookkeeping and reports
//!   what falls out of the window.
//! - [`evaluation`] scores partitioned results against a serial reference
//!   answer for the whole slide.
//!
//! Everything in this crate is synchronous. Shared pieces (the partition index
//! and the engine) are read-only after construction and can be used from many
//! threads at once.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stream_knn_core::*;
//!
//! let area = Rectangle::from_bounds(&[[0.0, 2.0], [0.0, 2.0]]).unwrap();
//! let index = Arc::new(SpatialPartitionIndex::build(area, 2, 0.0).unwrap());
//! let router = PartitionRouter::new(index);
//! let engine = LocalKnnEngine::new(1, 8).unwrap();
//! let mut assembler = SlideWindowAssembler::new(1000, QueryQuota::All).unwrap();
//!
//! assembler.ingest(vec![
//!     Point::new("a", 10, [0.2, 0.2]),
//!     Point::new("b", 20, [0.4, 0.3]),
//! ]);
//! let slide = assembler.finish(true).unwrap();
//!
//! for batch in router.route(&slide).values() {
//!     for result in engine.process_batch(batch) {
//!         assert_eq!(result.neighbors.len(), 1);
//!     }
//! }
//! ```

pub mod codec;
pub mod error;
pub mod evaluation;
pub mod geometry;
pub mod knn;
pub mod partition;
pub mod slide;
pub mod types;
pub mod window;

pub use codec::{DelimitedPointCodec, DelimitedResultCodec, JsonResultCodec, RecordCodec};
pub use error::KnnError;
pub use evaluation::{precision_recall, reference_knn, Effectiveness, Evaluation};
pub use geometry::{Rectangle, MAX_DIMENSIONS};
pub use knn::{LocalKnnEngine, PackedRTree};
pub use partition::{Membership, Partition, PartitionRouter, SpatialPartitionIndex};
pub use slide::{AssemblerStats, QueryQuota, SlideWindowAssembler};
pub use types::{
    KnnResult, Neighbor, PartitionId, Point, PointKey, RoutedPartitionBatch, Slide, SlideId,
};
pub use window::{Expired, ExpiringWindowBuffer, Rejected};
