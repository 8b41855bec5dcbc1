//! Error types for the pipeline runtime.
//!
//! Per-batch failures (a busy worker, a crashed or timed out batch) are
//! reported through these variants and logged, but only a closed channel,
//! a failing sink or a core error stops a run.

use stream_knn_core::{KnnError, PartitionId};

/// Enumeration of possible pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The worker queue for this partition is full and the router runs in
    /// reject mode
    #[error("Partition {partition_id} is busy")]
    Busy { partition_id: PartitionId },

    /// A batch panicked or exceeded its time limit
    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    /// A pipeline stage went away while others still depended on it
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The result sink refused a write
    #[error("Sink error: {0}")]
    Sink(String),

    #[error(transparent)]
    Core(#[from] KnnError),
}
