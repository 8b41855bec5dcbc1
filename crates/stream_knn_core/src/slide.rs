//! # Slide Assembly
//!
//! Groups incoming points into non-overlapping tumbling windows of
//! `slide_interval_ms` event-time milliseconds.
//!
//! ## Lifecycle
//!
//! 1. A point's slide id is `floor(timestamp / slide_interval_ms)`.
//! 2. A point for a newer slide seals the pending one, which is emitted once.
//! 3. Points for an already sealed slide are dropped and counted as late.
//! 4. At shutdown, [`SlideWindowAssembler::finish`] either flushes or drops the
//!    incomplete slide, an explicit decision made by the caller.
//!
//! Query marking happens once per sealed slide according to [`QueryQuota`].

use crate::error::KnnError;
use crate::types::{Point, PointKey, Slide, SlideId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Policy deciding which points of a sealed slide are queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryQuota {
    /// Every point is a query (configured as `-1`).
    All,
    /// No point is a query (configured as `0`).
    None,
    /// The first `n` points in arrival order are queries.
    First(usize),
    /// Keep the query flag carried by each input record.
    FromSource,
}

impl QueryQuota {
    /// Maps the configured quota value onto a policy.
    ///
    /// `source_flags` takes precedence and keeps per-record flags untouched.
    pub fn from_config(quota: i64, source_flags: bool) -> Result<Self, KnnError> {
        if source_flags {
            return Ok(QueryQuota::FromSource);
        }
        match quota {
            -1 => Ok(QueryQuota::All),
            0 => Ok(QueryQuota::None),
            n if n > 0 => Ok(QueryQuota::First(n as usize)),
            n => Err(KnnError::config(format!(
                "query quota must be -1, 0 or positive, got {n}"
            ))),
        }
    }

    /// Applies the policy to the points of one slide, in order.
    pub fn apply(&self, points: &mut [Point]) {
        match *self {
            QueryQuota::All => points.iter_mut().for_each(|p| p.is_query = true),
            QueryQuota::None => points.iter_mut().for_each(|p| p.is_query = false),
            QueryQuota::First(n) => {
                for (i, p) in points.iter_mut().enumerate() {
                    p.is_query = i < n;
                }
            }
            QueryQuota::FromSource => {}
        }
    }
}

/// Counters kept by the assembler since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerStats {
    /// Points accepted into a pending slide
    pub points_accepted: u64,
    /// Points identical to one already pending
    pub duplicates: u64,
    /// Points whose slide had already closed
    pub late_points: u64,
    pub slides_emitted: u64,
    /// Incomplete slides discarded at shutdown
    pub slides_dropped: u64,
}

/// Single-writer tumbling-window assembler.
#[derive(Debug)]
pub struct SlideWindowAssembler {
    slide_interval_ms: i64,
    quota: QueryQuota,
    current_slide: Option<SlideId>,
    pending: Vec<Point>,
    seen: HashSet<PointKey>,
    stats: AssemblerStats,
}

impl SlideWindowAssembler {
    pub fn new(slide_interval_ms: i64, quota: QueryQuota) -> Result<Self, KnnError> {
        if slide_interval_ms <= 0 {
            return Err(KnnError::config(format!(
                "slide interval must be positive, got {slide_interval_ms}"
            )));
        }
        Ok(Self {
            slide_interval_ms,
            quota,
            current_slide: None,
            pending: Vec::new(),
            seen: HashSet::new(),
            stats: AssemblerStats::default(),
        })
    }

    /// Slide bucket of an event time.
    pub fn slide_id_for(&self, timestamp: i64) -> SlideId {
        timestamp.div_euclid(self.slide_interval_ms)
    }

    /// Feeds a batch of points in arrival order, returning every slide the
    /// batch closed.
    pub fn ingest<I>(&mut self, batch: I) -> Vec<Slide>
    where
        I: IntoIterator<Item = Point>,
    {
        batch
            .into_iter()
            .filter_map(|point| self.ingest_point(point))
            .collect()
    }

    /// Feeds one point. Returns the sealed slide if this point closed one.
    pub fn ingest_point(&mut self, mut point: Point) -> Option<Slide> {
        point.is_boundary = false;
        let slide_id = self.slide_id_for(point.timestamp);

        let sealed = match self.current_slide {
            None => {
                self.current_slide = Some(slide_id);
                None
            }
            Some(current) if slide_id > current => {
                let sealed = self.seal(current);
                self.current_slide = Some(slide_id);
                sealed
            }
            Some(current) if slide_id < current => {
                self.stats.late_points += 1;
                warn!(
                    "⏰ Dropping late point {} (timestamp {}, slide {}) - slide {} is open",
                    point.id, point.timestamp, slide_id, current
                );
                return None;
            }
            Some(_) => None,
        };

        if self.seen.insert(point.key()) {
            self.pending.push(point);
            self.stats.points_accepted += 1;
        } else {
            self.stats.duplicates += 1;
        }
        sealed
    }

    /// Resolves the incomplete slide at shutdown: sealed and returned when
    /// `flush` is set, otherwise discarded and counted.
    pub fn finish(&mut self, flush: bool) -> Option<Slide> {
        let current = self.current_slide?;
        if flush {
            self.seal(current)
        } else {
            if !self.pending.is_empty() {
                warn!(
                    "🗑️ Dropping incomplete slide {} with {} point(s) at shutdown",
                    current,
                    self.pending.len()
                );
                self.stats.slides_dropped += 1;
            }
            self.pending.clear();
            self.seen.clear();
            None
        }
    }

    pub fn current_slide_id(&self) -> Option<SlideId> {
        self.current_slide
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &AssemblerStats {
        &self.stats
    }

    fn seal(&mut self, slide_id: SlideId) -> Option<Slide> {
        self.seen.clear();
        if self.pending.is_empty() {
            return None;
        }
        let mut points = std::mem::take(&mut self.pending);
        self.quota.apply(&mut points);
        self.stats.slides_emitted += 1;
        debug!("Sealed slide {} with {} points", slide_id, points.len());
        Some(Slide {
            id: slide_id,
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, ts: i64) -> Point {
        Point::new(id, ts, [ts as f64, 0.0])
    }

    #[test]
    fn test_quota_from_config() {
        assert_eq!(QueryQuota::from_config(-1, false).unwrap(), QueryQuota::All);
        assert_eq!(QueryQuota::from_config(0, false).unwrap(), QueryQuota::None);
        assert_eq!(QueryQuota::from_config(3, false).unwrap(), QueryQuota::First(3));
        assert_eq!(QueryQuota::from_config(3, true).unwrap(), QueryQuota::FromSource);
        assert!(QueryQuota::from_config(-2, false).is_err());
    }

    #[test]
    fn test_rejects_non_positive_interval() {
        assert!(SlideWindowAssembler::new(0, QueryQuota::All).is_err());
        assert!(SlideWindowAssembler::new(-5, QueryQuota::All).is_err());
    }

    #[test]
    fn test_slide_emitted_once_on_close() {
        let mut assembler = SlideWindowAssembler::new(100, QueryQuota::None).unwrap();

        let sealed = assembler.ingest(vec![point("a", 0), point("b", 50), point("c", 99)]);
        assert!(sealed.is_empty());
        assert_eq!(assembler.pending_len(), 3);

        let sealed = assembler.ingest(vec![point("d", 100)]);
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].id, 0);
        assert_eq!(sealed[0].len(), 3);
        assert_eq!(assembler.current_slide_id(), Some(1));
        assert_eq!(assembler.pending_len(), 1);
    }

    #[test]
    fn test_skipped_slides_are_not_emitted() {
        let mut assembler = SlideWindowAssembler::new(10, QueryQuota::None).unwrap();
        let sealed = assembler.ingest(vec![point("a", 5), point("b", 55), point("c", 71)]);
        let ids: Vec<_> = sealed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 5]);
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let mut assembler = SlideWindowAssembler::new(100, QueryQuota::None).unwrap();
        assembler.ingest(vec![point("a", 1), point("a", 1), point("a", 2)]);
        assert_eq!(assembler.pending_len(), 2);
        assert_eq!(assembler.stats().duplicates, 1);
    }

    #[test]
    fn test_late_points_are_dropped() {
        let mut assembler = SlideWindowAssembler::new(100, QueryQuota::None).unwrap();
        assembler.ingest(vec![point("a", 10), point("b", 250)]);
        let sealed = assembler.ingest(vec![point("late", 20)]);

        assert!(sealed.is_empty());
        assert_eq!(assembler.stats().late_points, 1);
        assert_eq!(assembler.pending_len(), 1);
    }

    #[test]
    fn test_quota_marks_first_points_in_arrival_order() {
        let mut assembler = SlideWindowAssembler::new(100, QueryQuota::First(2)).unwrap();
        assembler.ingest(vec![point("x", 3), point("y", 1), point("z", 2)]);
        let slide = assembler.finish(true).unwrap();

        let flags: Vec<_> = slide.points.iter().map(|p| (p.id.as_str(), p.is_query)).collect();
        assert_eq!(flags, vec![("x", true), ("y", true), ("z", false)]);
    }

    #[test]
    fn test_quota_overrides_source_flags_unless_configured() {
        let flagged = || vec![point("a", 0).with_query(true), point("b", 1)];

        let mut none = SlideWindowAssembler::new(10, QueryQuota::None).unwrap();
        none.ingest(flagged());
        assert_eq!(none.finish(true).unwrap().query_count(), 0);

        let mut all = SlideWindowAssembler::new(10, QueryQuota::All).unwrap();
        all.ingest(flagged());
        assert_eq!(all.finish(true).unwrap().query_count(), 2);

        let mut source = SlideWindowAssembler::new(10, QueryQuota::FromSource).unwrap();
        source.ingest(flagged());
        assert_eq!(source.finish(true).unwrap().query_count(), 1);
    }

    #[test]
    fn test_source_boundary_flag_is_cleared() {
        let mut assembler = SlideWindowAssembler::new(10, QueryQuota::FromSource).unwrap();
        let mut p = point("a", 0);
        p.is_boundary = true;
        assembler.ingest(vec![p]);
        let slide = assembler.finish(true).unwrap();
        assert!(!slide.points[0].is_boundary);
    }

    #[test]
    fn test_finish_drops_when_not_flushing() {
        let mut assembler = SlideWindowAssembler::new(10, QueryQuota::All).unwrap();
        assembler.ingest(vec![point("a", 0)]);
        assert!(assembler.finish(false).is_none());
        assert_eq!(assembler.stats().slides_dropped, 1);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_finish_on_empty_assembler() {
        let mut assembler = SlideWindowAssembler::new(10, QueryQuota::All).unwrap();
        assert!(assembler.finish(true).is_none());
    }

    #[test]
    fn test_negative_timestamps_floor() {
        let assembler = SlideWindowAssembler::new(100, QueryQuota::All).unwrap();
        assert_eq!(assembler.slide_id_for(-1), -1);
        assert_eq!(assembler.slide_id_for(-100), -1);
        assert_eq!(assembler.slide_id_for(199), 1);
    }
}
