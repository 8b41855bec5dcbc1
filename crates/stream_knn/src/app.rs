//! Main application logic and lifecycle management.
//!
//! The `Application` struct wires the file source, the KNN pipeline and the
//! result sink together and drives a run from startup to a drained shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    output::{result_codec, ResultFileSink},
    signals,
    source::PointFileSource,
};
use std::sync::Arc;
use stream_knn_core::DelimitedPointCodec;
use stream_knn_runtime::{DiscardSink, Pipeline, PipelineSummary, ResultSink, ShutdownState};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Batches buffered between the file source and the pipeline.
const INPUT_CHANNEL_CAPACITY: usize = 16;

pub struct Application {
    config: AppConfig,
    pipeline: Pipeline,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Build the partition index and the pipeline
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        args.apply_to(&mut config);

        let app = Self::from_config(config)?;
        display_banner();
        info!("📂 Config: {}", args.config_path.display());
        Ok(app)
    }

    /// Creates an application from an already merged configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        let pipeline = Pipeline::new(config.to_pipeline_config())?;
        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs until the input is exhausted or a termination signal arrives.
    pub async fn run(self) -> Result<PipelineSummary, Box<dyn std::error::Error>> {
        let shutdown = ShutdownState::new();
        signals::install(shutdown.clone());
        info!("🛑 Press Ctrl+C to stop reading input and drain");
        self.run_with_shutdown(shutdown).await
    }

    /// Runs with an externally controlled shutdown state.
    pub async fn run_with_shutdown(
        self,
        shutdown: ShutdownState,
    ) -> Result<PipelineSummary, Box<dyn std::error::Error>> {
        info!("🌟 Starting stream KNN");
        self.log_configuration_summary();

        let codec =
            DelimitedPointCodec::new(self.config.io.delimiter.as_str(), self.config.index.area.len())?;
        let source = PointFileSource::new(self.config.input_path(), codec);
        let sink = self.build_sink().await?;

        let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let source_handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { source.run(tx, shutdown).await })
        };

        let summary = self.pipeline.run(rx, sink, shutdown).await;

        match source_handle.await {
            Ok(Ok(stats)) => info!(
                "📥 Source: {} points read, {} records skipped",
                stats.points, stats.skipped
            ),
            Ok(Err(e)) => {
                error!("❌ Failed to read {}: {}", self.config.io.input_path, e);
                return Err(e.into());
            }
            Err(e) => warn!("Source task ended abnormally: {e}"),
        }

        let summary = summary?;
        log_final_statistics(&summary);
        info!("✅ Stream KNN shutdown complete");
        Ok(summary)
    }

    async fn build_sink(&self) -> Result<Arc<dyn ResultSink>, Box<dyn std::error::Error>> {
        if self.config.io.no_write {
            info!("🚫 no-write mode: results are computed but not written");
            return Ok(Arc::new(DiscardSink::new()));
        }
        let codec = result_codec(self.config.io.output_format, &self.config.io.delimiter);
        let sink = match self.config.output_path() {
            Some(path) => ResultFileSink::create(&path, codec).await?,
            None => ResultFileSink::stdout(codec),
        };
        Ok(Arc::new(sink))
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        let index = self.pipeline.index();
        info!("📋 Configuration Summary:");
        info!("  🎯 k = {}, branch factor {}", self.config.knn.k, self.config.knn.branch_factor);
        info!(
            "  🌍 Area: {:?} ({} partitions, boundary {:.3})",
            self.config.index.area,
            index.len(),
            index.boundary_length()
        );
        info!(
            "  ⏱️ Slide interval: {} ms, query quota {}",
            self.config.stream.slide_interval_ms, self.config.stream.query_quota
        );
        info!(
            "  👷 Workers: {} (queue {}, {:?} backpressure)",
            self.config.runtime.partition_workers,
            self.config.runtime.queue_capacity,
            self.config.runtime.backpressure
        );
        info!("  📥 Input: {}", self.config.io.input_path);
        info!(
            "  💾 Output: {}",
            self.config.io.output_path.as_deref().unwrap_or("stdout")
        );
        if self.config.knn.evaluate {
            info!("  🎯 Evaluating every slide against a serial reference");
        }
    }
}

/// Logs final statistics during shutdown.
fn log_final_statistics(summary: &PipelineSummary) {
    info!("📊 Final Statistics:");
    info!("  - Slides processed: {}", summary.slides);
    info!("  - Points accepted: {}", summary.points_accepted);
    info!("  - Duplicates / late points: {} / {}", summary.duplicates, summary.late_points);
    info!("  - Results: {}", summary.results);
    if summary.batches_rejected + summary.batches_failed > 0 {
        warn!(
            "  - Lost batches: {} rejected, {} failed",
            summary.batches_rejected, summary.batches_failed
        );
    }
    if summary.slides_dropped > 0 {
        warn!("  - Open slides dropped at shutdown: {}", summary.slides_dropped);
    }
    if let Some(effectiveness) = summary.effectiveness {
        info!(
            "  - Precision / recall vs serial reference: {:.4} / {:.4}",
            effectiveness.precision(),
            effectiveness.recall()
        );
    }
}
