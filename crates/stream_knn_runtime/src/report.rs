//! Per-slide bookkeeping.
//!
//! Every routed slide opens a [`SlideReport`]; worker outcomes for that slide
//! are folded into it as they arrive. Reports live in an
//! [`ExpiringWindowBuffer`] sized to `history_slides`, and a report is logged
//! as a slide summary when it falls out of the window or when the run ends.
//!
//! Slides opened with a reference answer also track precision and recall of
//! the partitioned results as they come in.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use stream_knn_core::{
    Effectiveness, Evaluation, ExpiringWindowBuffer, KnnError, KnnResult, SlideId,
};
use tracing::{debug, info};

/// Timing and volume counters for one slide.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlideReport {
    pub slide_id: SlideId,
    /// Points in the sealed slide
    pub points: usize,
    /// Partition batches produced by the router
    pub partitions: usize,
    /// Boundary replicas across all batches
    pub replicas: usize,
    /// Interior query points
    pub queries: usize,
    pub batches_done: usize,
    pub batches_lost: usize,
    pub results: usize,
    /// Time spent routing the slide
    pub route_time: Duration,
    /// Sum of per-batch KNN processing times
    pub knn_time: Duration,
    /// Agreement with the serial reference, when evaluated
    pub effectiveness: Option<Effectiveness>,
}

impl SlideReport {
    /// Routing cost normalised to 100 points, in milliseconds.
    pub fn route_ms_per_100_points(&self) -> f64 {
        per_hundred(self.route_time, self.points)
    }

    /// KNN cost normalised to 100 queries, in milliseconds.
    pub fn knn_ms_per_100_queries(&self) -> f64 {
        per_hundred(self.knn_time, self.queries)
    }

    /// True once every batch of the slide has been answered or lost.
    pub fn is_settled(&self) -> bool {
        self.batches_done + self.batches_lost >= self.partitions
    }
}

fn per_hundred(elapsed: Duration, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        elapsed.as_secs_f64() * 1000.0 * 100.0 / count as f64
    }
}

/// Bounded history of [`SlideReport`]s.
#[derive(Debug)]
pub struct SlideLedger {
    window: ExpiringWindowBuffer<SlideReport>,
    evaluations: HashMap<SlideId, Evaluation>,
    effectiveness: Option<Effectiveness>,
    summarized: u64,
}

impl SlideLedger {
    pub fn new(history_slides: usize) -> Result<Self, KnnError> {
        Ok(Self {
            window: ExpiringWindowBuffer::new(history_slides)?,
            evaluations: HashMap::new(),
            effectiveness: None,
            summarized: 0,
        })
    }

    /// Starts tracking a routed slide, summarizing whatever it pushes out.
    pub fn open(&mut self, report: SlideReport) {
        let slide_id = report.slide_id;
        match self.window.push(slide_id, report) {
            Ok(expired) => {
                for entry in expired {
                    self.summarize(&entry.value);
                }
            }
            Err(rejected) => debug!("Slide {} not tracked: {}", slide_id, rejected),
        }
    }

    /// Like [`SlideLedger::open`], also scoring the slide's results against
    /// `reference`.
    pub fn open_evaluated(&mut self, mut report: SlideReport, reference: &[KnnResult]) {
        let slide_id = report.slide_id;
        let evaluation = Evaluation::new(reference);
        report.effectiveness = Some(evaluation.effectiveness());
        self.open(report);
        if self.window.get_checked(slide_id).is_some() {
            self.evaluations.insert(slide_id, evaluation);
        }
    }

    /// Scores results of an evaluated slide. Other slides are ignored.
    pub fn record_results(&mut self, slide_id: SlideId, results: &[KnnResult]) {
        let Some(evaluation) = self.evaluations.get_mut(&slide_id) else {
            return;
        };
        evaluation.observe(results);
        if let Some(report) = self.window.get_checked_mut(slide_id) {
            report.effectiveness = Some(evaluation.effectiveness());
        }
    }

    /// Effectiveness over every evaluated slide summarized so far.
    pub fn effectiveness(&self) -> Option<Effectiveness> {
        self.effectiveness
    }

    pub fn record_batch(&mut self, slide_id: SlideId, results: usize, elapsed: Duration) {
        match self.window.get_checked_mut(slide_id) {
            Some(report) => {
                report.batches_done += 1;
                report.results += results;
                report.knn_time += elapsed;
            }
            None => debug!("Slide {} outcome arrived after its report expired", slide_id),
        }
    }

    pub fn record_lost(&mut self, slide_id: SlideId) {
        match self.window.get_checked_mut(slide_id) {
            Some(report) => report.batches_lost += 1,
            None => debug!("Slide {} loss recorded after its report expired", slide_id),
        }
    }

    pub fn get(&self, slide_id: SlideId) -> Option<&SlideReport> {
        self.window.get_checked(slide_id)
    }

    /// Reports still held, oldest first.
    pub fn open_reports(&self) -> impl Iterator<Item = &SlideReport> + '_ {
        self.window.iter().map(|(_, report)| report)
    }

    /// Number of reports logged so far.
    pub fn summarized(&self) -> u64 {
        self.summarized
    }

    /// Summarizes and returns every remaining report.
    pub fn finish(&mut self) -> Vec<SlideReport> {
        let remaining: Vec<SlideReport> = self.window.drain().into_iter().map(|e| e.value).collect();
        for report in &remaining {
            self.summarize(report);
        }
        remaining
    }

    fn summarize(&mut self, report: &SlideReport) {
        self.summarized += 1;
        self.evaluations.remove(&report.slide_id);
        if let Some(slide) = report.effectiveness {
            self.effectiveness.get_or_insert_with(Effectiveness::default).merge(&slide);
            info!(
                "🎯 Slide {}: precision {:.4}, recall {:.4}",
                report.slide_id,
                slide.precision(),
                slide.recall()
            );
        }
        info!(
            "📊 Slide {}: {} points, {} partitions, {} replicas, {}/{} results, {} lost batches, route {:.3} ms/100 points, knn {:.3} ms/100 queries",
            report.slide_id,
            report.points,
            report.partitions,
            report.replicas,
            report.results,
            report.queries,
            report.batches_lost,
            report.route_ms_per_100_points(),
            report.knn_ms_per_100_queries()
        );
        if !report.is_settled() {
            debug!(
                "Slide {} summarized with {} batch(es) still in flight",
                report.slide_id,
                report.partitions - report.batches_done - report.batches_lost
            );
        }
    }
}
