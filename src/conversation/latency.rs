//! Per-turn latency measurement and reporting.
//!
//! Passive only: nothing here gates the conversation.

use serde::Serialize;
use std::time::Instant;

/// The four milestones captured for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyMarks {
    pub silence_detected: Option<Instant>,
    pub recognition_complete: Option<Instant>,
    pub generation_start: Option<Instant>,
    pub synthesis_start: Option<Instant>,
}

impl LatencyMarks {
    pub fn new(silence_detected: Instant) -> Self {
        Self {
            silence_detected: Some(silence_detected),
            ..Self::default()
        }
    }

    pub fn mark_recognition_complete(&mut self, at: Instant) {
        self.recognition_complete = Some(at);
    }

    pub fn mark_generation_start(&mut self, at: Instant) {
        self.generation_start = Some(at);
    }

    pub fn mark_synthesis_start(&mut self, at: Instant) {
        self.synthesis_start = Some(at);
    }

    /// Computes the immutable record, with `completed_at` as the end of the turn.
    pub fn finish(&self, completed_at: Instant) -> LatencyRecord {
        LatencyRecord {
            recognition_ms: delta_ms(self.silence_detected, self.recognition_complete),
            dispatch_ms: delta_ms(self.recognition_complete, self.generation_start),
            generation_ms: delta_ms(self.generation_start, self.synthesis_start),
            total_ms: delta_ms(self.silence_detected, Some(completed_at)),
            complete: self.silence_detected.is_some()
                && self.recognition_complete.is_some()
                && self.generation_start.is_some()
                && self.synthesis_start.is_some(),
        }
    }
}

/// Signed milliseconds from `from` to `to`. A missing end yields 0.
fn delta_ms(from: Option<Instant>, to: Option<Instant>) -> i64 {
    match (from, to) {
        (Some(from), Some(to)) if to >= from => to.duration_since(from).as_millis() as i64,
        (Some(from), Some(to)) => -(from.duration_since(to).as_millis() as i64),
        _ => 0,
    }
}

/// Stage and total latencies of one turn, in milliseconds.
///
/// Deltas may be zero or negative when a milestone was skipped or captured
/// out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyRecord {
    /// Silence detected → recognition complete.
    pub recognition_ms: i64,
    /// Recognition complete → reply generation start.
    pub dispatch_ms: i64,
    /// Reply generation start → synthesis start.
    pub generation_ms: i64,
    /// Silence detected → turn completion.
    pub total_ms: i64,
    complete: bool,
}

impl LatencyRecord {
    /// True when all four milestones were captured.
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Aggregated latency statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: usize,
    pub incomplete: usize,
    pub total_avg: f64,
    pub total_min: i64,
    pub total_max: i64,
    pub recognition_avg: f64,
    pub dispatch_avg: f64,
    pub generation_avg: f64,
}

/// Collects latency records across a call.
#[derive(Debug, Clone, Default)]
pub struct LatencyTracker {
    records: Vec<LatencyRecord>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: LatencyRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[LatencyRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Computes aggregated statistics.
    pub fn stats(&self) -> Option<LatencyStats> {
        let total_min = self.records.iter().map(|r| r.total_ms).min()?;
        let total_max = self.records.iter().map(|r| r.total_ms).max()?;

        Some(LatencyStats {
            count: self.records.len(),
            incomplete: self.records.iter().filter(|r| !r.is_complete()).count(),
            total_avg: self.avg(|r| r.total_ms),
            total_min,
            total_max,
            recognition_avg: self.avg(|r| r.recognition_ms),
            dispatch_avg: self.avg(|r| r.dispatch_ms),
            generation_avg: self.avg(|r| r.generation_ms),
        })
    }

    fn avg(&self, field: impl Fn(&LatencyRecord) -> i64) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let sum: i64 = self.records.iter().map(field).sum();
        sum as f64 / self.records.len() as f64
    }

    /// User-friendly summary of the call's responsiveness.
    pub fn format_summary(&self) -> Option<String> {
        let stats = self.stats()?;
        let mut out = String::new();
        out.push_str("=== Call Latency ===\n");
        out.push_str(&format!(
            "Measured {} turn{}",
            stats.count,
            if stats.count == 1 { "" } else { "s" }
        ));
        if stats.incomplete > 0 {
            out.push_str(&format!(" ({} incomplete)", stats.incomplete));
        }
        out.push('\n');
        out.push_str(&format!(
            "  Avg wait after speaking:  {}\n",
            format_ms(stats.total_avg)
        ));
        out.push_str(&format!(
            "    Recognition:            {}\n",
            format_ms(stats.recognition_avg)
        ));
        out.push_str(&format!(
            "    Dispatch:               {}\n",
            format_ms(stats.dispatch_avg)
        ));
        out.push_str(&format!(
            "    Reply generation:       {}\n",
            format_ms(stats.generation_avg)
        ));
        out.push_str(&format!(
            "  Fastest: {} | Slowest: {}\n",
            format_ms(stats.total_min as f64),
            format_ms(stats.total_max as f64)
        ));
        Some(out)
    }
}

/// Under 1s: "450ms", at or above 1s: "1.5s".
fn format_ms(ms: f64) -> String {
    if ms.abs() < 1000.0 {
        format!("{:.0}ms", ms)
    } else {
        format!("{:.1}s", ms / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn full_marks(t0: Instant) -> LatencyMarks {
        let mut marks = LatencyMarks::new(t0);
        marks.mark_recognition_complete(t0 + ms(120));
        marks.mark_generation_start(t0 + ms(125));
        marks.mark_synthesis_start(t0 + ms(900));
        marks
    }

    #[test]
    fn test_complete_record_deltas() {
        let t0 = Instant::now();
        let record = full_marks(t0).finish(t0 + ms(950));

        assert!(record.is_complete());
        assert_eq!(record.recognition_ms, 120);
        assert_eq!(record.dispatch_ms, 5);
        assert_eq!(record.generation_ms, 775);
        assert_eq!(record.total_ms, 950);
    }

    #[test]
    fn test_missing_marks_degrade_to_zero() {
        let t0 = Instant::now();
        let mut marks = LatencyMarks::new(t0);
        marks.mark_generation_start(t0 + ms(10));

        let record = marks.finish(t0 + ms(40));
        assert!(!record.is_complete());
        assert_eq!(record.recognition_ms, 0);
        assert_eq!(record.dispatch_ms, 0);
        assert_eq!(record.generation_ms, 0);
        assert_eq!(record.total_ms, 40);
    }

    #[test]
    fn test_out_of_order_marks_give_negative_delta() {
        let t0 = Instant::now() + ms(1000);
        let mut marks = LatencyMarks::new(t0);
        marks.mark_recognition_complete(t0 - ms(200));

        let record = marks.finish(t0);
        assert_eq!(record.recognition_ms, -200);
    }

    #[test]
    fn test_tracker_empty() {
        let tracker = LatencyTracker::new();
        assert!(tracker.stats().is_none());
        assert!(tracker.format_summary().is_none());
    }

    #[test]
    fn test_tracker_stats() {
        let t0 = Instant::now();
        let mut tracker = LatencyTracker::new();
        tracker.record(full_marks(t0).finish(t0 + ms(1000)));
        tracker.record(full_marks(t0).finish(t0 + ms(2000)));
        tracker.record(LatencyMarks::default().finish(t0));

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.total_min, 0);
        assert_eq!(stats.total_max, 2000);
        assert!((stats.total_avg - 1000.0).abs() < 1e-9);
        assert!((stats.recognition_avg - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_summary() {
        let t0 = Instant::now();
        let mut tracker = LatencyTracker::new();
        tracker.record(full_marks(t0).finish(t0 + ms(1500)));

        let summary = tracker.format_summary().unwrap();
        assert!(summary.contains("Measured 1 turn\n"));
        assert!(summary.contains("1.5s"));
        assert!(summary.contains("120ms"));
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(450.0), "450ms");
        assert_eq!(format_ms(1500.0), "1.5s");
        assert_eq!(format_ms(-20.0), "-20ms");
    }
}
