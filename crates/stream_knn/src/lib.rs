//! # Stream KNN - Main Entry Point
//!
//! Continuous K-nearest-neighbor search over a stream of timestamped points.
//! This crate handles CLI parsing, configuration loading, logging, signal
//! handling, and the file source and sink around the runtime pipeline.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (writes stream_knn.toml if missing)
//! stream_knn --input points.tsv
//!
//! # Override specific settings
//! stream_knn -c prod.toml -k 10 --index-height 4 --boundary-scale 0.3 --output results.tsv
//!
//! # Benchmark without writing results
//! stream_knn --input points.tsv --no-write --json-logs
//! ```
//!
//! ## Input
//!
//! One point per line: `id, timestamp, coord_1 ... coord_D[, is_query]`,
//! separated by the configured delimiter. Malformed lines are skipped with a
//! warning.
//!
//! ## Signal Handling
//!
//! The first SIGINT/SIGTERM stops reading input; the open slide is flushed or
//! dropped per `stream.flush_on_shutdown` and in-flight batches drain before
//! exit. A second signal exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod output;
pub mod signals;
pub mod source;

pub use app::Application;
pub use cli::CliArgs;
pub use config::{
    AppConfig, IndexSettings, IoSettings, KnnSettings, LoggingSettings, OutputFormat,
    RuntimeSettings, StreamSettings,
};

/// Main entry point for the stream KNN binary.
///
/// # Exit Codes
///
/// * **0**: Input fully processed, or graceful shutdown completed
/// * **1**: Error during startup, configuration, or runtime
///
/// Called from `main` inside the tokio runtime.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default()
        .logging;
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
