//! # Stream KNN Runtime
//!
//! Tokio runtime for continuous KNN. A [`Pipeline`] assembles incoming points
//! into tumbling slides, routes every slide through the partition index and
//! hands each partition batch to a pool of [`PartitionWorker`]s over bounded
//! queues. Results flow to a [`ResultSink`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stream_knn_core::Point;
//! use stream_knn_runtime::{CollectingSink, Pipeline, PipelineConfig, ShutdownState};
//!
//! # async fn demo() -> Result<(), stream_knn_runtime::PipelineError> {
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//! let (tx, rx) = tokio::sync::mpsc::channel(16);
//! tx.send(vec![Point::new("a", 10, [1.0, 2.0])]).await.ok();
//! drop(tx);
//!
//! let sink = Arc::new(CollectingSink::new());
//! let summary = pipeline.run(rx, sink.clone(), ShutdownState::new()).await?;
//! println!("{} results", summary.results);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod shutdown;
pub mod sink;
pub mod worker;

pub use config::{BackpressureMode, PipelineConfig};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineSummary};
pub use queue::BatchDispatcher;
pub use report::{SlideLedger, SlideReport};
pub use shutdown::ShutdownState;
pub use sink::{CollectingSink, DiscardSink, ResultSink};
pub use worker::{BatchOutcome, BatchProcessor, PartitionWorker, WorkerStats};
