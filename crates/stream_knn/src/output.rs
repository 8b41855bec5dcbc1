//! Result file sink.
//!
//! Writes each [`KnnResult`] as one line, encoded with the configured
//! [`RecordCodec`], to a file or to stdout.

use crate::config::OutputFormat;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use stream_knn_core::{DelimitedResultCodec, JsonResultCodec, KnnResult, RecordCodec};
use stream_knn_runtime::{PipelineError, ResultSink};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{info, warn};

type Writer = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Builds the result codec for an output format.
pub fn result_codec(format: OutputFormat, delimiter: &str) -> Box<dyn RecordCodec<KnnResult>> {
    match format {
        OutputFormat::Text => Box::new(DelimitedResultCodec::new(delimiter)),
        OutputFormat::Json => Box::new(JsonResultCodec),
    }
}

pub struct ResultFileSink {
    writer: Mutex<Writer>,
    codec: Box<dyn RecordCodec<KnnResult>>,
    written: AtomicU64,
    target: String,
}

impl ResultFileSink {
    /// Creates (or truncates) `path`.
    pub async fn create(
        path: &Path,
        codec: Box<dyn RecordCodec<KnnResult>>,
    ) -> std::io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::with_writer(
            Box::new(file),
            codec,
            path.display().to_string(),
        ))
    }

    pub fn stdout(codec: Box<dyn RecordCodec<KnnResult>>) -> Self {
        Self::with_writer(Box::new(tokio::io::stdout()), codec, "stdout".to_string())
    }

    fn with_writer(
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        codec: Box<dyn RecordCodec<KnnResult>>,
        target: String,
    ) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            codec,
            written: AtomicU64::new(0),
            target,
        }
    }

    /// Results written so far.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

fn sink_error(target: &str, e: std::io::Error) -> PipelineError {
    PipelineError::Sink(format!("{target}: {e}"))
}

#[async_trait]
impl ResultSink for ResultFileSink {
    async fn accept(&self, results: Vec<KnnResult>) -> Result<(), PipelineError> {
        let mut out = String::new();
        let mut count = 0u64;
        for result in &results {
            match self.codec.encode(result) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                    count += 1;
                }
                Err(e) => warn!(
                    "⚠️ Skipping result for query {} in slide {}: {}",
                    result.query_point_id, result.slide_id, e
                ),
            }
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(out.as_bytes())
            .await
            .map_err(|e| sink_error(&self.target, e))?;
        self.written.fetch_add(count, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> Result<(), PipelineError> {
        self.writer
            .lock()
            .await
            .flush()
            .await
            .map_err(|e| sink_error(&self.target, e))?;
        info!("💾 Wrote {} results to {}", self.written(), self.target);
        Ok(())
    }
}
