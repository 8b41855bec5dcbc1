//! Pipeline configuration types and defaults.
//!
//! [`PipelineConfig`] is the fully resolved set of parameters the runtime
//! needs. The application layer builds it from its TOML file and CLI flags
//! and validates it before the first point is read.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use stream_knn_core::{KnnError, QueryQuota, Rectangle};

/// What the router does when a worker queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    /// Wait until the worker has room, stalling the input.
    Block,
    /// Refuse the batch with a busy signal; its results are lost.
    Reject,
}

impl std::str::FromStr for BackpressureMode {
    type Err = KnnError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "block" => Ok(BackpressureMode::Block),
            "reject" => Ok(BackpressureMode::Reject),
            other => Err(KnnError::Configuration(format!(
                "backpressure must be 'block' or 'reject', got '{other}'"
            ))),
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Neighbors per query
    pub k: usize,

    /// Fan-out of the per-batch packed R-tree
    pub branch_factor: usize,

    /// Global bounding area, one `[min, max]` pair per axis
    pub area: Vec<[f64; 2]>,

    /// Partition index height; `2^(height - 1)` cells per axis
    pub index_height: u32,

    /// Boundary margin as a fraction of the cell width
    pub boundary_length_scale: f64,

    /// Tumbling slide length in event-time milliseconds
    pub slide_interval_ms: i64,

    /// -1 marks every point as a query, 0 none, N the first N per slide
    pub query_quota: i64,

    /// Keep per-record query flags instead of applying the quota
    pub source_query_flags: bool,

    /// Process (true) or drop (false) the open slide when interrupted
    pub flush_on_shutdown: bool,

    /// Number of slide reports kept before they are summarized
    pub history_slides: usize,

    /// Number of partition workers
    pub partition_workers: usize,

    /// Bounded queue length per worker
    pub queue_capacity: usize,

    pub backpressure: BackpressureMode,

    /// Per-batch processing limit in milliseconds (0 disables it)
    pub batch_timeout_ms: u64,

    /// Score every slide against a serial, unpartitioned reference answer
    #[serde(default)]
    pub evaluate: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            k: 5,
            branch_factor: 16,
            area: vec![[0.0, 100.0], [0.0, 100.0]],
            index_height: 3,
            boundary_length_scale: 0.2,
            slide_interval_ms: 1000,
            query_quota: -1,
            source_query_flags: false,
            flush_on_shutdown: true,
            history_slides: 8,
            partition_workers: num_cpus::get().max(1),
            queue_capacity: 64,
            backpressure: BackpressureMode::Block,
            batch_timeout_ms: 30_000,
            evaluate: false,
        }
    }
}

impl PipelineConfig {
    /// Checks every parameter, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), KnnError> {
        if self.k < 1 {
            return Err(KnnError::Configuration("k must be at least 1".into()));
        }
        if self.branch_factor < 2 {
            return Err(KnnError::Configuration(
                "branch_factor must be at least 2".into(),
            ));
        }
        if self.index_height < 1 {
            return Err(KnnError::Configuration(
                "index height must be at least 1".into(),
            ));
        }
        if !self.boundary_length_scale.is_finite() || self.boundary_length_scale < 0.0 {
            return Err(KnnError::Configuration(format!(
                "boundary_length_scale must be a non-negative number, got {}",
                self.boundary_length_scale
            )));
        }
        if self.slide_interval_ms <= 0 {
            return Err(KnnError::Configuration(
                "slide_interval_ms must be positive".into(),
            ));
        }
        if self.partition_workers < 1 {
            return Err(KnnError::Configuration(
                "partition_workers must be at least 1".into(),
            ));
        }
        if self.queue_capacity < 1 {
            return Err(KnnError::Configuration(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.history_slides < 1 {
            return Err(KnnError::Configuration(
                "history_slides must be at least 1".into(),
            ));
        }
        self.query_quota()?;
        self.area_rect()?;
        Ok(())
    }

    /// Global area as a rectangle.
    pub fn area_rect(&self) -> Result<Rectangle, KnnError> {
        Rectangle::from_bounds(&self.area)
    }

    pub fn dimensions(&self) -> usize {
        self.area.len()
    }

    pub fn query_quota(&self) -> Result<QueryQuota, KnnError> {
        QueryQuota::from_config(self.query_quota, self.source_query_flags)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        (self.batch_timeout_ms > 0).then(|| Duration::from_millis(self.batch_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.partition_workers >= 1);
        assert_eq!(config.dimensions(), 2);
        assert_eq!(config.batch_timeout(), Some(Duration::from_secs(30)));
    }

    fn assert_invalid(mutate: impl Fn(&mut PipelineConfig)) {
        let mut config = PipelineConfig::default();
        mutate(&mut config);
        assert!(
            matches!(config.validate(), Err(KnnError::Configuration(_))),
            "{config:?} should fail validation"
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert_invalid(|c| c.k = 0);
        assert_invalid(|c| c.branch_factor = 1);
        assert_invalid(|c| c.index_height = 0);
        assert_invalid(|c| c.boundary_length_scale = -0.5);
        assert_invalid(|c| c.boundary_length_scale = f64::INFINITY);
        assert_invalid(|c| c.slide_interval_ms = 0);
        assert_invalid(|c| c.query_quota = -3);
        assert_invalid(|c| c.partition_workers = 0);
        assert_invalid(|c| c.queue_capacity = 0);
        assert_invalid(|c| c.history_slides = 0);
        assert_invalid(|c| c.area = vec![]);
        assert_invalid(|c| c.area = vec![[1.0, 0.0]]);
        assert_invalid(|c| c.area = vec![[0.0, 1.0]; 4]);
    }

    #[test]
    fn test_backpressure_parsing() {
        assert_eq!("block".parse::<BackpressureMode>().unwrap(), BackpressureMode::Block);
        assert_eq!("REJECT".parse::<BackpressureMode>().unwrap(), BackpressureMode::Reject);
        assert!("drop".parse::<BackpressureMode>().is_err());
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let config = PipelineConfig {
            batch_timeout_ms: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.batch_timeout(), None);
    }
}
