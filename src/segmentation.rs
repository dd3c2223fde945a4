//! Recording segmentation.
//!
//! Wearable recordings are irregularly sampled and interrupted (sensor off,
//! battery swaps, out of range). This module splits a series into maximal
//! runs of samples whose consecutive gaps stay below a threshold.
//!
//! Two flavours:
//! - [`assign_segments`] drops runs that are too short and labels the
//!   survivors 0, 1, 2... in temporal order.
//! - [`continuous_segments`] returns every run unfiltered. Resampling,
//!   filtering and orientation estimation run per run so that no computation
//!   ever bridges a discontinuity.
//!
//! Single pass over the timestamps, O(N).

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{seconds_to_us, SegmentId, TimeSeries, TimestampUs};

/// Configuration for segmentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Maximum gap in seconds between two samples of the same segment.
    /// Typical: 0.02 s (one sample period at 50 Hz).
    pub gap_threshold_s: f64,

    /// Segments spanning this many seconds or less are discarded.
    /// Typical: 1 s.
    pub min_duration_s: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            gap_threshold_s: 0.02,
            min_duration_s: 1.0,
        }
    }
}

/// Counts of what segmentation kept and dropped.
///
/// Discarding short segments is policy, not failure; callers use this to
/// audit how much data survived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationReport {
    /// Rows in the input series.
    pub input_rows: usize,
    /// Rows kept in retained segments.
    pub retained_rows: usize,
    /// Segments that passed the duration test.
    pub segments_retained: usize,
    /// Segments dropped for being too short.
    pub segments_discarded: usize,
}

impl SegmentationReport {
    /// Rows removed with the discarded segments.
    pub fn discarded_rows(&self) -> usize {
        self.input_rows - self.retained_rows
    }
}

/// A series with a segment label per retained row.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedSeries {
    /// Retained rows, in original order.
    pub series: TimeSeries,
    /// Segment label of each retained row.
    pub segments: Vec<SegmentId>,
    /// Retained vs discarded counts.
    pub report: SegmentationReport,
}

impl SegmentedSeries {
    /// Number of distinct segments.
    pub fn segment_count(&self) -> usize {
        self.report.segments_retained
    }

    /// Row range of each segment in `series`, in label order.
    pub fn segment_ranges(&self) -> Vec<Range<usize>> {
        label_ranges(&self.segments)
    }

    /// Split into one series per segment, in label order.
    pub fn split(&self) -> Vec<(SegmentId, TimeSeries)> {
        self.segment_ranges()
            .into_iter()
            .map(|range| (self.segments[range.start], self.series.slice(range)))
            .collect()
    }
}

/// Row ranges of maximal runs whose consecutive gaps are `<= threshold_us`.
///
/// A new run starts right after any gap strictly greater than the threshold.
/// The ranges are half-open and partition `0..timestamps.len()`.
pub fn segment_bounds(timestamps: &[TimestampUs], threshold_us: i64) -> Vec<Range<usize>> {
    if timestamps.is_empty() {
        return Vec::new();
    }

    let mut bounds = Vec::new();
    let mut start = 0;
    for (i, pair) in timestamps.windows(2).enumerate() {
        if pair[1] - pair[0] > threshold_us {
            bounds.push(start..i + 1);
            start = i + 1;
        }
    }
    bounds.push(start..timestamps.len());
    bounds
}

/// Label segments, dropping those whose span is `<= min_duration_s`.
///
/// Survivors are relabeled with consecutive integers from 0 in temporal
/// order. Dropped rows disappear from the output (no gap filling).
pub fn assign_segments(series: &TimeSeries, config: &SegmentationConfig) -> SegmentedSeries {
    let gap_us = seconds_to_us(config.gap_threshold_s);
    let min_span_us = seconds_to_us(config.min_duration_s);
    let timestamps = series.timestamps();

    let bounds = segment_bounds(timestamps, gap_us);
    let total = bounds.len();

    let kept: Vec<Range<usize>> = bounds
        .into_iter()
        .filter(|r| timestamps[r.end - 1] - timestamps[r.start] > min_span_us)
        .collect();

    let mut rows = Vec::with_capacity(series.len());
    let mut segments = Vec::with_capacity(series.len());
    for (label, range) in kept.iter().enumerate() {
        segments.extend(std::iter::repeat(label as SegmentId).take(range.len()));
        rows.extend(range.clone());
    }

    let report = SegmentationReport {
        input_rows: series.len(),
        retained_rows: rows.len(),
        segments_retained: kept.len(),
        segments_discarded: total - kept.len(),
    };
    debug!(
        input_rows = report.input_rows,
        retained_rows = report.retained_rows,
        segments_retained = report.segments_retained,
        segments_discarded = report.segments_discarded,
        "assigned segments"
    );

    SegmentedSeries {
        series: series.select_rows(&rows),
        segments,
        report,
    }
}

/// Split into maximal continuous runs (gap `<= tjump_s`), no filtering.
pub fn continuous_segments(series: &TimeSeries, tjump_s: f64) -> Vec<TimeSeries> {
    segment_bounds(series.timestamps(), seconds_to_us(tjump_s))
        .into_iter()
        .map(|range| series.slice(range))
        .collect()
}

/// Ranges of equal consecutive labels.
fn label_ranges(labels: &[SegmentId]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=labels.len() {
        if i == labels.len() || labels[i] != labels[start] {
            ranges.push(start..i);
            start = i;
        }
    }
    ranges
}
