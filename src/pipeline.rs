//! End-to-end orchestration of the GMAC analysis.
//!
//! This module bundles every stage parameter into one serializable
//! [`PipelineConfig`] and wires the stages together:
//!
//! 1. **Summarize**: segment each subject's raw recording into a [`Dataset`]
//! 2. **Features**: windowed statistics and use labels per segment
//! 3. **Counts**: vector-magnitude counts per subject recording
//! 4. **Autocorrelation**: rater-label persistence per limb
//!
//! All stages are pure functions of their inputs and the config; the only
//! nondeterminism is the tie-break passed to feature extraction.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::autocorr::{autocorr_summary, AutocorrSummary};
use crate::dataset::{format_timestamp, Dataset, LimbRecordings};
use crate::error::{GmacError, Result};
use crate::features::{features_for_all, FeatureConfig, FeatureTable, TieBreak};
use crate::magnitude::{compute_accl_magnitude, compute_vector_magnitude, MagnitudeConfig, VectorMagnitude};
use crate::orientation::OrientationConfig;
use crate::segmentation::{assign_segments, SegmentationConfig};
use crate::signal::FilterConfig;
use crate::types::{Limb, SubjectId, TimeSeries, ACCEL_CHANNELS};

/// Configuration for the complete analysis.
///
/// Every field has a default, so a JSON file only needs the values it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest gap (s) inside one segment (dT). Typical: 0.02.
    pub segment_gap_s: f64,

    /// Segments spanning this long (s) or less are dropped (dur_th). Typical: 1.
    pub min_segment_duration_s: f64,

    /// Gap (s) that splits continuous runs for resampling and filtering.
    pub continuity_jump_s: f64,

    /// Causal smoothing and filtering where both variants exist.
    pub causal: bool,

    /// Trailing feature window in samples (Nin).
    pub window_samples: usize,

    /// Rate (Hz) the IMU is resampled to for orientation. Typical: 30.
    pub orientation_fs: f64,

    /// Madgwick gradient step gain. Typical: 0.5.
    pub madgwick_beta: f64,

    /// Rate (Hz) after band-passing. Typical: 10.
    pub movement_fs: f64,

    /// Rate (Hz) of the count aggregation bins. Typical: 1.
    pub aggregation_fs: f64,

    /// Lags kept per segment in the autocorrelation summary (N).
    pub autocorr_cutoff: usize,

    /// Gaussian KDE bandwidth for the entropy feature.
    pub kde_bandwidth: f64,

    /// Absolute values below this are zeroed before counting (g).
    pub deadband_threshold: f64,

    /// Divisor turning g into count units.
    pub count_scale: f64,

    /// Smoothing window (s) of the accelerometer magnitude (nfilt).
    pub magnitude_smoothing: usize,

    /// Rater label columns.
    pub rater_columns: Vec<String>,

    /// Raw columns copied into the feature tables.
    pub raw_columns: Vec<String>,

    /// Trailing window (samples) of the smoothed `uluse_w` label; no such
    /// column when unset.
    pub label_window: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let features = FeatureConfig::default();
        let magnitude = MagnitudeConfig::default();
        let segmentation = SegmentationConfig::default();
        Self {
            segment_gap_s: segmentation.gap_threshold_s,
            min_segment_duration_s: segmentation.min_duration_s,
            continuity_jump_s: magnitude.continuity_jump_s,
            causal: true,
            window_samples: features.window_samples,
            orientation_fs: magnitude.orientation.frequency_hz,
            madgwick_beta: magnitude.orientation.beta,
            movement_fs: magnitude.movement_fs,
            aggregation_fs: 1.0 / magnitude.aggregation_period_s,
            autocorr_cutoff: 4000,
            kde_bandwidth: features.kde_bandwidth,
            deadband_threshold: magnitude.filters.deadband_threshold,
            count_scale: magnitude.count_scale,
            magnitude_smoothing: 5,
            rater_columns: features.rater_columns,
            raw_columns: features.raw_columns,
            label_window: features.label_window,
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Reject non-positive rates, durations and windows.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("segment_gap_s", self.segment_gap_s),
            ("continuity_jump_s", self.continuity_jump_s),
            ("orientation_fs", self.orientation_fs),
            ("madgwick_beta", self.madgwick_beta),
            ("movement_fs", self.movement_fs),
            ("aggregation_fs", self.aggregation_fs),
            ("kde_bandwidth", self.kde_bandwidth),
            ("count_scale", self.count_scale),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(GmacError::invalid(name, format!("{value} must be positive")));
            }
        }
        if !(self.min_segment_duration_s >= 0.0) {
            return Err(GmacError::invalid("min_segment_duration_s", "must not be negative"));
        }
        if !(self.deadband_threshold >= 0.0) {
            return Err(GmacError::invalid("deadband_threshold", "must not be negative"));
        }
        let windows = [
            ("window_samples", self.window_samples),
            ("autocorr_cutoff", self.autocorr_cutoff),
            ("magnitude_smoothing", self.magnitude_smoothing),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(GmacError::invalid(name, "must be at least 1"));
            }
        }
        self.features().validate()?;
        self.magnitude().validate()
    }

    pub fn segmentation(&self) -> SegmentationConfig {
        SegmentationConfig {
            gap_threshold_s: self.segment_gap_s,
            min_duration_s: self.min_segment_duration_s,
        }
    }

    pub fn features(&self) -> FeatureConfig {
        FeatureConfig {
            window_samples: self.window_samples,
            kde_bandwidth: self.kde_bandwidth,
            rater_columns: self.rater_columns.clone(),
            raw_columns: self.raw_columns.clone(),
            label_window: self.label_window,
        }
    }

    pub fn filters(&self) -> FilterConfig {
        FilterConfig {
            deadband_threshold: self.deadband_threshold,
            ..FilterConfig::default()
        }
    }

    pub fn magnitude(&self) -> MagnitudeConfig {
        MagnitudeConfig {
            orientation: OrientationConfig {
                beta: self.madgwick_beta,
                frequency_hz: self.orientation_fs,
            },
            filters: self.filters(),
            movement_fs: self.movement_fs,
            aggregation_period_s: 1.0 / self.aggregation_fs,
            count_scale: self.count_scale,
            continuity_jump_s: self.continuity_jump_s,
            ..MagnitudeConfig::default()
        }
    }
}

/// Segment every subject of every limb.
///
/// Subjects whose recording has no segment long enough contribute nothing
/// but their segmentation report.
pub fn summarize(raw: &BTreeMap<Limb, LimbRecordings>, config: &PipelineConfig) -> Result<Dataset> {
    config.validate()?;
    let segmentation = config.segmentation();
    let mut dataset = Dataset::new();

    for (&limb, recordings) in raw {
        for (&subject, series) in recordings {
            let segmented = assign_segments(series, &segmentation);
            debug!(
                %limb,
                subject,
                segments = segmented.segment_count(),
                dropped_rows = segmented.report.discarded_rows(),
                "segmented subject"
            );
            dataset.insert_subject(limb, subject, &segmented);
        }
    }

    info!(
        limbs = raw.len(),
        segments = dataset.len(),
        rows = dataset.total_rows(),
        "summarized dataset"
    );
    Ok(dataset)
}

/// Feature tables for every limb of a segmented dataset.
pub fn extract_features(
    dataset: &Dataset,
    config: &PipelineConfig,
    tie_break: &mut dyn TieBreak,
) -> Result<BTreeMap<Limb, FeatureTable>> {
    features_for_all(dataset, &config.features(), tie_break)
}

/// Autocorrelation summaries of the rater columns for every limb.
pub fn rater_autocorrelation(
    dataset: &Dataset,
    config: &PipelineConfig,
) -> Result<BTreeMap<Limb, AutocorrSummary>> {
    autocorr_summary(dataset, &config.rater_columns, config.autocorr_cutoff)
}

/// Vector-magnitude counts of every subject recording of one limb.
///
/// Runs on the unsegmented recording; continuity is handled inside the
/// counts derivation with `continuity_jump_s`.
pub fn limb_counts(
    recordings: &LimbRecordings,
    config: &PipelineConfig,
) -> Result<BTreeMap<SubjectId, VectorMagnitude>> {
    let magnitude = config.magnitude();
    recordings
        .iter()
        .map(|(&subject, series)| {
            let counts = compute_vector_magnitude(series, &magnitude)?;
            debug!(subject, bins = counts.len(), "computed counts");
            Ok((subject, counts))
        })
        .collect()
}

/// Smoothed accelerometer magnitude of every subject recording of one limb.
pub fn limb_accl_magnitude(
    recordings: &LimbRecordings,
    config: &PipelineConfig,
) -> Result<BTreeMap<SubjectId, TimeSeries>> {
    let filters = config.filters();
    recordings
        .iter()
        .map(|(&subject, series)| {
            let accl = series.select_channels(&ACCEL_CHANNELS)?;
            let mag = compute_accl_magnitude(&accl, config.magnitude_smoothing, config.causal, &filters)?;
            Ok((subject, mag))
        })
        .collect()
}

/// Write per-subject series as one CSV: `time`, `subject`, then the series
/// channels. All series must share a channel layout.
pub fn write_subject_series<W: Write>(
    series: &BTreeMap<SubjectId, TimeSeries>,
    writer: W,
) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let Some(first) = series.values().next() else {
        csv_writer.flush()?;
        return Ok(());
    };
    let names = first.channel_names().to_vec();

    let mut header = vec!["time".to_string(), "subject".to_string()];
    header.extend(names.iter().cloned());
    csv_writer.write_record(&header)?;

    for (subject, s) in series {
        if s.channel_names() != names.as_slice() {
            return Err(GmacError::ChannelMismatch(format!(
                "subject {subject} has channels {:?}, expected {:?}",
                s.channel_names(),
                names
            )));
        }
        for row in 0..s.len() {
            let mut record = vec![format_timestamp(s.timestamps()[row]), subject.to_string()];
            record.extend(s.columns().iter().map(|c| format_value(c[row])));
            csv_writer.write_record(&record)?;
        }
    }
    csv_writer.flush()?;
    Ok(())
}

/// Missing values are written as empty fields.
fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(starts: &[i64], n: usize) -> TimeSeries {
        let timestamps: Vec<i64> = starts
            .iter()
            .flat_map(|&s| (0..n as i64).map(move |i| s + i * 20_000))
            .collect();
        let len = timestamps.len();
        TimeSeries::from_channels(timestamps, vec![("ax", vec![0.0; len])]).unwrap()
    }

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.segment_gap_s, 0.02);
        assert_eq!(config.min_segment_duration_s, 1.0);
        assert_eq!(config.orientation_fs, 30.0);
        assert_eq!(config.autocorr_cutoff, 4000);
        assert_eq!(config.rater_columns, vec!["r1", "r2", "g1", "g2"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = PipelineConfig::from_json(r#"{"segment_gap_s": 0.05, "causal": false}"#).unwrap();
        assert_eq!(config.segment_gap_s, 0.05);
        assert!(!config.causal);
        assert_eq!(config.movement_fs, 10.0);

        assert!(PipelineConfig::from_json(r#"{"movement_fs": 0}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"window_samples": 0}"#).is_err());
        assert!(PipelineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_label_window_reaches_feature_config() {
        assert_eq!(PipelineConfig::default().features().label_window, None);
        let config = PipelineConfig::from_json(r#"{"label_window": 25}"#).unwrap();
        assert_eq!(config.features().label_window, Some(25));
        assert!(PipelineConfig::from_json(r#"{"label_window": 0}"#).is_err());
    }

    #[test]
    fn test_config_conversions() {
        let config = PipelineConfig {
            aggregation_fs: 0.5,
            deadband_threshold: 0.1,
            madgwick_beta: 0.1,
            ..PipelineConfig::default()
        };
        let magnitude = config.magnitude();
        assert_eq!(magnitude.aggregation_period_s, 2.0);
        assert_eq!(magnitude.filters.deadband_threshold, 0.1);
        assert_eq!(magnitude.orientation.beta, 0.1);
        assert_eq!(config.segmentation().gap_threshold_s, 0.02);
        assert_eq!(config.features().window_samples, config.window_samples);
    }

    #[test]
    fn test_summarize_segments_every_subject() {
        let mut left = LimbRecordings::new();
        // Two 2 s runs, 5 s apart
        left.insert(1, recording(&[0, 7_000_000], 101));
        // Too short to keep anything
        left.insert(2, recording(&[0], 10));
        let mut raw = BTreeMap::new();
        raw.insert(Limb::Left, left);

        let dataset = summarize(&raw, &PipelineConfig::default()).unwrap();
        assert_eq!(dataset.subjects(Limb::Left), vec![1]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.total_rows(), 202);
        let report = dataset.report(Limb::Left, 2).unwrap();
        assert_eq!(report.retained_rows, 0);
        assert_eq!(report.segments_discarded, 1);
    }

    #[test]
    fn test_write_subject_series() {
        let mut series = BTreeMap::new();
        series.insert(
            3,
            TimeSeries::from_channels(vec![0, 1_000_000], vec![("counts", vec![f64::NAN, 2.0])]).unwrap(),
        );
        let mut out = Vec::new();
        write_subject_series(&series, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,subject,counts");
        assert_eq!(lines[1], "1970-01-01 00:00:00.000000,3,");
        assert_eq!(lines[2], "1970-01-01 00:00:01.000000,3,2");

        series.insert(
            4,
            TimeSeries::from_channels(vec![0], vec![("a_mag", vec![1.0])]).unwrap(),
        );
        assert!(write_subject_series(&series, Vec::new()).is_err());
    }
}
