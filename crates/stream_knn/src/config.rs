//! Configuration management for the stream KNN service.
//!
//! This module handles loading, validation, and conversion of the TOML
//! configuration file into the runtime's [`PipelineConfig`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stream_knn_runtime::{BackpressureMode, PipelineConfig};
use tracing::info;

fn default_k() -> usize { 5 }
fn default_branch_factor() -> usize { 16 }

fn default_height() -> u32 { 3 }
fn default_boundary_length_scale() -> f64 { 0.2 }
fn default_area() -> Vec<[f64; 2]> { vec![[0.0, 100.0], [0.0, 100.0]] }

fn default_slide_interval_ms() -> i64 { 1000 }
fn default_query_quota() -> i64 { -1 }
fn default_flush_on_shutdown() -> bool { true }
fn default_history_slides() -> usize { 8 }

fn default_partition_workers() -> usize { num_workers() }
fn default_queue_capacity() -> usize { 64 }
fn default_backpressure() -> BackpressureMode { BackpressureMode::Block }
fn default_batch_timeout_ms() -> u64 { 30_000 }

fn default_input_path() -> String { "points.tsv".to_string() }
fn default_delimiter() -> String { "\t".to_string() }
fn default_output_format() -> OutputFormat { OutputFormat::Text }

fn default_log_level() -> String { "info".to_string() }

fn num_workers() -> usize {
    PipelineConfig::default().partition_workers
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub knn: KnnSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub io: IoSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Neighbor search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnSettings {
    /// Neighbors reported per query point
    #[serde(default = "default_k")]
    pub k: usize,
    /// Fan-out of the per-batch packed R-tree
    #[serde(default = "default_branch_factor")]
    pub branch_factor: usize,
    /// Score partitioned results against a serial reference per slide
    #[serde(default)]
    pub evaluate: bool,
}

impl Default for KnnSettings {
    fn default() -> Self {
        Self {
            k: default_k(),
            branch_factor: default_branch_factor(),
            evaluate: false,
        }
    }
}

/// Spatial partition index parameters.
///
/// The configured area is split into `2^(height - 1)` cells per axis. Each
/// cell is inflated by `boundary_length_scale` times its width so that points
/// near an edge are also seen by the neighboring cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_boundary_length_scale")]
    pub boundary_length_scale: f64,
    /// One `[min, max]` pair per axis, 1 to 3 axes
    #[serde(default = "default_area")]
    pub area: Vec<[f64; 2]>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            height: default_height(),
            boundary_length_scale: default_boundary_length_scale(),
            area: default_area(),
        }
    }
}

/// Slide assembly parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_slide_interval_ms")]
    pub slide_interval_ms: i64,
    /// -1 marks every point as a query, 0 none, N the first N of each slide
    #[serde(default = "default_query_quota")]
    pub query_quota: i64,
    /// Keep the query column of each record instead of applying the quota
    #[serde(default)]
    pub source_query_flags: bool,
    /// Process (true) or drop (false) the open slide on interrupt
    #[serde(default = "default_flush_on_shutdown")]
    pub flush_on_shutdown: bool,
    /// Slide reports kept before they are summarized
    #[serde(default = "default_history_slides")]
    pub history_slides: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            slide_interval_ms: default_slide_interval_ms(),
            query_quota: default_query_quota(),
            source_query_flags: false,
            flush_on_shutdown: default_flush_on_shutdown(),
            history_slides: default_history_slides(),
        }
    }
}

/// Worker pool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_partition_workers")]
    pub partition_workers: usize,
    /// Bounded queue length per worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_backpressure")]
    pub backpressure: BackpressureMode,
    /// 0 disables the per-batch time limit
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            partition_workers: default_partition_workers(),
            queue_capacity: default_queue_capacity(),
            backpressure: default_backpressure(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

/// Format of the result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `slide \t query \t neighbor:distance ...`
    Text,
    /// One JSON object per line
    Json,
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoSettings {
    #[serde(default = "default_input_path")]
    pub input_path: String,
    /// Results go to stdout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Field separator of input records and text results
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,
    /// Compute results without writing them
    #[serde(default)]
    pub no_write: bool,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_path: None,
            delimiter: default_delimiter(),
            output_format: default_output_format(),
            no_write: false,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// the given path and the default configuration is returned.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Builds the runtime configuration.
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            k: self.knn.k,
            branch_factor: self.knn.branch_factor,
            area: self.index.area.clone(),
            index_height: self.index.height,
            boundary_length_scale: self.index.boundary_length_scale,
            slide_interval_ms: self.stream.slide_interval_ms,
            query_quota: self.stream.query_quota,
            source_query_flags: self.stream.source_query_flags,
            flush_on_shutdown: self.stream.flush_on_shutdown,
            history_slides: self.stream.history_slides,
            partition_workers: self.runtime.partition_workers,
            queue_capacity: self.runtime.queue_capacity,
            backpressure: self.runtime.backpressure,
            batch_timeout_ms: self.runtime.batch_timeout_ms,
            evaluate: self.knn.evaluate,
        }
    }

    pub fn input_path(&self) -> PathBuf {
        PathBuf::from(&self.io.input_path)
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.io.output_path.as_ref().map(PathBuf::from)
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing
    /// the first issue found.
    pub fn validate(&self) -> Result<(), String> {
        self.to_pipeline_config()
            .validate()
            .map_err(|e| e.to_string())?;

        if self.io.input_path.is_empty() {
            return Err("Input path cannot be empty".to_string());
        }
        if self.io.delimiter.is_empty() {
            return Err("Delimiter cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.knn.k, 5);
        assert_eq!(config.knn.branch_factor, 16);
        assert_eq!(config.index.height, 3);
        assert_eq!(config.index.boundary_length_scale, 0.2);
        assert_eq!(config.index.area, vec![[0.0, 100.0], [0.0, 100.0]]);
        assert_eq!(config.stream.slide_interval_ms, 1000);
        assert_eq!(config.stream.query_quota, -1);
        assert!(config.stream.flush_on_shutdown);
        assert!(config.runtime.partition_workers >= 1);
        assert_eq!(config.runtime.backpressure, BackpressureMode::Block);
        assert_eq!(config.io.delimiter, "\t");
        assert_eq!(config.io.output_format, OutputFormat::Text);
        assert!(config.io.output_path.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream_knn.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.knn.k, 5);
        assert!(path.exists());

        // The written file loads back to the same settings.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.index.area, config.index.area);
        assert_eq!(reloaded.runtime.queue_capacity, config.runtime.queue_capacity);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[knn]
k = 3
branch_factor = 8

[index]
height = 2
boundary_length_scale = 0.5
area = [[0.0, 2.0], [0.0, 2.0]]

[stream]
slide_interval_ms = 500
query_quota = 10
flush_on_shutdown = false

[runtime]
partition_workers = 2
backpressure = "reject"
batch_timeout_ms = 0

[io]
input_path = "in.csv"
output_path = "out.jsonl"
delimiter = ","
output_format = "json"

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.knn.k, 3);
        assert_eq!(config.index.height, 2);
        assert_eq!(config.stream.query_quota, 10);
        assert!(!config.stream.flush_on_shutdown);
        assert_eq!(config.stream.history_slides, 8);
        assert_eq!(config.runtime.backpressure, BackpressureMode::Reject);
        assert_eq!(config.runtime.queue_capacity, 64);
        assert_eq!(config.output_path(), Some(PathBuf::from("out.jsonl")));
        assert_eq!(config.io.output_format, OutputFormat::Json);
        assert!(config.logging.json_format);

        let pipeline = config.to_pipeline_config();
        assert_eq!(pipeline.k, 3);
        assert_eq!(pipeline.index_height, 2);
        assert_eq!(pipeline.slide_interval_ms, 500);
        assert_eq!(pipeline.partition_workers, 2);
        assert_eq!(pipeline.batch_timeout(), None);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: AppConfig = toml::from_str("[knn]\nk = 7\n").unwrap();
        assert_eq!(config.knn.k, 7);
        assert_eq!(config.knn.branch_factor, 16);
        assert_eq!(config.index.height, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.knn.k = 0;
        assert!(config.validate().unwrap_err().contains("k must be at least 1"));

        let mut config = AppConfig::default();
        config.index.height = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.index.boundary_length_scale = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.io.delimiter.clear();
        assert!(config.validate().unwrap_err().contains("Delimiter"));

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }

    #[test]
    fn test_unknown_backpressure_is_a_parse_error() {
        let result: Result<AppConfig, _> = toml::from_str("[runtime]\nbackpressure = \"drop\"\n");
        assert!(result.is_err());
    }
}
