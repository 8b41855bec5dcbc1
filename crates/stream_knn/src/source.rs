//! Delimited point file source.
//!
//! Reads one point per line, decodes it with a [`DelimitedPointCodec`] and
//! forwards the points to the pipeline in batches. Blank lines and lines
//! starting with `#` are ignored; malformed records are logged and skipped.

use serde::Serialize;
use std::path::{Path, PathBuf};
use stream_knn_core::{DelimitedPointCodec, Point, RecordCodec};
use stream_knn_runtime::ShutdownState;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEFAULT_BATCH_SIZE: usize = 512;

/// Counters for one pass over the input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub lines: u64,
    pub points: u64,
    pub skipped: u64,
}

pub struct PointFileSource {
    path: PathBuf,
    codec: DelimitedPointCodec,
    batch_size: usize,
}

impl PointFileSource {
    pub fn new(path: impl AsRef<Path>, codec: DelimitedPointCodec) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            codec,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets how many points are sent to the pipeline at a time.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Streams the file into `points` until it ends, the receiver goes away
    /// or shutdown is initiated.
    pub async fn run(
        self,
        points: mpsc::Sender<Vec<Point>>,
        shutdown: ShutdownState,
    ) -> std::io::Result<SourceStats> {
        let file = File::open(&self.path).await?;
        let mut reader = BufReader::new(file);
        let mut raw = Vec::new();
        let mut stats = SourceStats::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        info!("📥 Reading points from {}", self.path.display());

        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw).await? == 0 {
                break;
            }
            stats.lines += 1;

            let line = match std::str::from_utf8(strip_line_ending(&raw)) {
                Ok(line) => line,
                Err(e) => {
                    stats.skipped += 1;
                    warn!("⚠️ Skipping line {}: invalid UTF-8 ({})", stats.lines, e);
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match self.codec.decode(line) {
                Ok(point) => {
                    stats.points += 1;
                    batch.push(point);
                }
                Err(e) => {
                    stats.skipped += 1;
                    warn!("⚠️ Skipping line {}: {}", stats.lines, e);
                    continue;
                }
            }

            if batch.len() >= self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                if points.send(full).await.is_err() || shutdown.is_shutdown_initiated() {
                    debug!("Pipeline stopped accepting points, closing source");
                    return Ok(stats);
                }
            }
        }

        if !batch.is_empty() && points.send(batch).await.is_err() {
            debug!("Pipeline stopped before the last batch");
        }

        info!(
            "📥 Input finished: {} points from {} lines, {} skipped",
            stats.points, stats.lines, stats.skipped
        );
        Ok(stats)
    }
}

fn strip_line_ending(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}
