//! # Pipeline
//!
//! Wires the stages of a continuous KNN run together:
//!
//! ```text
//! input ─► assembler ─► router ─► BatchDispatcher ═╦═► worker 0 ─┐
//!                                                  ╠═► worker 1 ─┼─► collector ─► ResultSink
//!                                                  ╚═► worker N ─┘
//! ```
//!
//! Assembly and routing run on the calling task, so a slide is always sealed
//! and fully routed before any of its batches is dispatched. Worker queues are
//! bounded; a slow worker either stalls the input or gets its batches refused,
//! depending on the configured backpressure mode.
//!
//! With `evaluate` set, each slide is also answered serially as a single
//! unpartitioned batch before dispatch, and the partitioned results are
//! scored against it.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::queue::BatchDispatcher;
use crate::report::{SlideLedger, SlideReport};
use crate::shutdown::ShutdownState;
use crate::sink::ResultSink;
use crate::worker::{BatchOutcome, BatchProcessor, PartitionWorker, WorkerStats};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use stream_knn_core::{
    reference_knn, Effectiveness, LocalKnnEngine, PartitionRouter, Point, Slide,
    SlideWindowAssembler, SpatialPartitionIndex,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub points_accepted: u64,
    pub duplicates: u64,
    pub late_points: u64,
    pub slides: u64,
    /// Open slides discarded because of an interrupt
    pub slides_dropped: u64,
    pub batches_dispatched: u64,
    /// Batches refused by a busy worker
    pub batches_rejected: u64,
    /// Batches taken off a queue by a worker, failed ones included
    pub batches_processed: u64,
    /// Batches that panicked or timed out
    pub batches_failed: u64,
    pub results: u64,
    /// Agreement with the serial reference over all slides, when evaluated
    pub effectiveness: Option<Effectiveness>,
    /// Whether the run stopped on a shutdown request instead of end of input
    pub interrupted: bool,
}

/// A configured continuous KNN pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    index: Arc<SpatialPartitionIndex>,
    processor: Arc<dyn BatchProcessor>,
}

impl Pipeline {
    /// Validates `config`, builds the partition index and the KNN engine.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let engine = LocalKnnEngine::new(config.k, config.branch_factor)?;
        Self::with_processor(config, Arc::new(engine))
    }

    /// Like [`Pipeline::new`] with a custom batch processor.
    pub fn with_processor(
        config: PipelineConfig,
        processor: Arc<dyn BatchProcessor>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let index = SpatialPartitionIndex::build(
            config.area_rect()?,
            config.index_height,
            config.boundary_length_scale,
        )?;
        Ok(Self {
            config,
            index: Arc::new(index),
            processor,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<SpatialPartitionIndex> {
        &self.index
    }

    /// Runs until `input` is exhausted or `shutdown` is initiated.
    ///
    /// At end of input the last slide is complete and is always processed.
    /// On a shutdown request the open slide is flushed or dropped according
    /// to `flush_on_shutdown`. Either way every dispatched batch is answered
    /// and the sink flushed before this returns.
    pub async fn run(
        &self,
        mut input: mpsc::Receiver<Vec<Point>>,
        sink: Arc<dyn ResultSink>,
        shutdown: ShutdownState,
    ) -> Result<PipelineSummary, PipelineError> {
        let reference = self.reference_engine()?;
        let mut assembler =
            SlideWindowAssembler::new(self.config.slide_interval_ms, self.config.query_quota()?)?;
        let ledger = Arc::new(Mutex::new(SlideLedger::new(self.config.history_slides)?));

        let (dispatcher, queues) = BatchDispatcher::new(
            self.config.partition_workers,
            self.config.queue_capacity,
            self.config.backpressure,
        );
        let (outcome_tx, outcome_rx) =
            mpsc::channel(self.config.partition_workers * self.config.queue_capacity);

        let workers: Vec<JoinHandle<WorkerStats>> = queues
            .into_iter()
            .enumerate()
            .map(|(id, queue)| {
                let worker = PartitionWorker::new(
                    id,
                    Arc::clone(&self.processor),
                    self.config.batch_timeout(),
                );
                tokio::spawn(worker.run(queue, outcome_tx.clone()))
            })
            .collect();
        drop(outcome_tx);

        let collector = tokio::spawn(collect(
            outcome_rx,
            sink,
            Arc::clone(&ledger),
            shutdown.clone(),
        ));

        info!(
            "🚀 Pipeline started: {} partitions, {} workers, k = {}, slide interval {} ms",
            self.index.len(),
            workers.len(),
            self.config.k,
            self.config.slide_interval_ms
        );

        let mut stage = RouteStage {
            router: PartitionRouter::new(Arc::clone(&self.index)),
            dispatcher,
            ledger: Arc::clone(&ledger),
            reference,
        };
        let routed = self
            .route_input(&mut input, &mut assembler, &mut stage, &shutdown)
            .await;

        // Closing the queues lets the workers drain and stop.
        let RouteStage { dispatcher, .. } = stage;
        let batches_dispatched = dispatcher.dispatched();
        let batches_rejected = dispatcher.rejected();
        drop(dispatcher);

        let mut worker_totals = WorkerStats::default();
        for (id, joined) in join_all(workers).await.into_iter().enumerate() {
            match joined {
                Ok(stats) => {
                    debug!(
                        "Worker {}: {} batches, {} failed",
                        id, stats.batches, stats.failures
                    );
                    worker_totals.batches += stats.batches;
                    worker_totals.failures += stats.failures;
                }
                Err(e) => error!("❌ Partition worker {} task failed: {}", id, e),
            }
        }
        let results = collector
            .await
            .map_err(|e| PipelineError::WorkerFailed(format!("result collector: {e}")))?;
        let effectiveness = {
            let mut ledger = ledger.lock().await;
            ledger.finish();
            ledger.effectiveness()
        };
        shutdown.complete_shutdown();

        let interrupted = routed?;
        let results = results?;
        let stats = assembler.stats();
        let summary = PipelineSummary {
            points_accepted: stats.points_accepted,
            duplicates: stats.duplicates,
            late_points: stats.late_points,
            slides: stats.slides_emitted,
            slides_dropped: stats.slides_dropped,
            batches_dispatched,
            batches_rejected,
            batches_processed: worker_totals.batches,
            batches_failed: worker_totals.failures,
            results,
            effectiveness,
            interrupted,
        };
        info!(
            "🏁 Pipeline finished: {} slides, {} points, {} results, {} batches lost",
            summary.slides,
            summary.points_accepted,
            summary.results,
            summary.batches_rejected + summary.batches_failed
        );
        if let Some(effectiveness) = summary.effectiveness {
            info!(
                "🎯 Overall precision {:.4}, recall {:.4} against the serial reference",
                effectiveness.precision(),
                effectiveness.recall()
            );
        }
        Ok(summary)
    }

    /// Engine for the serial reference answer, when evaluation is enabled.
    fn reference_engine(&self) -> Result<Option<LocalKnnEngine>, PipelineError> {
        if !self.config.evaluate {
            return Ok(None);
        }
        Ok(Some(LocalKnnEngine::new(
            self.config.k,
            self.config.branch_factor,
        )?))
    }

    /// Feeds input into the assembler and routes every sealed slide. Returns
    /// whether the run was interrupted.
    async fn route_input(
        &self,
        input: &mut mpsc::Receiver<Vec<Point>>,
        assembler: &mut SlideWindowAssembler,
        stage: &mut RouteStage,
        shutdown: &ShutdownState,
    ) -> Result<bool, PipelineError> {
        let mut interrupted = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.initiated() => {
                    interrupted = true;
                    None
                }
                next = input.recv() => next,
            };
            let Some(points) = next else { break };
            for slide in assembler.ingest(points) {
                stage.submit(slide).await?;
            }
        }

        let flush = !interrupted || self.config.flush_on_shutdown;
        if interrupted {
            info!(
                "⏹️ Input interrupted, {} open slide",
                if flush { "flushing" } else { "dropping" }
            );
        }
        if let Some(slide) = assembler.finish(flush) {
            stage.submit(slide).await?;
        }
        Ok(interrupted)
    }
}

struct RouteStage {
    router: PartitionRouter,
    dispatcher: BatchDispatcher,
    ledger: Arc<Mutex<SlideLedger>>,
    reference: Option<LocalKnnEngine>,
}

impl RouteStage {
    /// Routes a sealed slide and dispatches all of its batches.
    async fn submit(&mut self, slide: Slide) -> Result<(), PipelineError> {
        let started = Instant::now();
        let batches = self.router.route(&slide);
        let report = SlideReport {
            slide_id: slide.id,
            points: slide.len(),
            partitions: batches.len(),
            replicas: batches.values().map(|b| b.replica_count()).sum(),
            queries: batches.values().map(|b| b.query_count()).sum(),
            route_time: started.elapsed(),
            ..SlideReport::default()
        };
        match &self.reference {
            Some(engine) => {
                let reference = reference_knn(&slide, engine);
                self.ledger.lock().await.open_evaluated(report, &reference);
            }
            None => self.ledger.lock().await.open(report),
        }

        for batch in batches.into_values() {
            match self.dispatcher.dispatch(batch).await {
                Ok(()) => {}
                Err(PipelineError::Busy { partition_id }) => {
                    warn!(
                        "🚦 Partition {} is busy, slide {} batch rejected",
                        partition_id, slide.id
                    );
                    self.ledger.lock().await.record_lost(slide.id);
                }
                Err(e) => return Err(e),
            }
        }
        debug!("Slide {} dispatched", slide.id);
        Ok(())
    }
}

/// Writes worker results to the sink and folds outcomes into the ledger.
///
/// A sink failure stops the input but the collector keeps draining outcomes
/// so that no worker blocks; the first sink error is returned at the end.
/// Returns the number of results collected.
async fn collect(
    mut outcomes: mpsc::Receiver<BatchOutcome>,
    sink: Arc<dyn ResultSink>,
    ledger: Arc<Mutex<SlideLedger>>,
    shutdown: ShutdownState,
) -> Result<u64, PipelineError> {
    let mut collected = 0u64;
    let mut sink_error: Option<PipelineError> = None;

    while let Some(outcome) = outcomes.recv().await {
        match outcome.results {
            Ok(results) => {
                {
                    let mut ledger = ledger.lock().await;
                    ledger.record_batch(outcome.slide_id, results.len(), outcome.elapsed);
                    ledger.record_results(outcome.slide_id, &results);
                }
                collected += results.len() as u64;
                if sink_error.is_none() && !results.is_empty() {
                    if let Err(e) = sink.accept(results).await {
                        error!("❌ Result sink failed: {}", e);
                        sink_error = Some(e);
                        shutdown.initiate_shutdown();
                    }
                }
            }
            Err(_) => ledger.lock().await.record_lost(outcome.slide_id),
        }
    }

    if sink_error.is_none() {
        if let Err(e) = sink.flush().await {
            error!("❌ Result sink flush failed: {}", e);
            sink_error = Some(e);
        }
    }
    match sink_error {
        Some(e) => Err(e),
        None => Ok(collected),
    }
}
