//! Windowed feature extraction and upper-limb-use labels.
//!
//! For every sample of a segment, statistics are computed over the trailing
//! `Nin` samples (fewer at the start of the segment):
//!
//! | Feature                 | Source            |
//! |-------------------------|-------------------|
//! | mean, var, min, max     | each of ax, ay, az|
//! | mean, var, min, max     | 3-axis norm       |
//! | KDE entropy             | 3-axis norm       |
//!
//! Variance is the sample variance (n - 1), defined as 0 for a single
//! sample. Missing values are skipped.
//!
//! The label of a sample is the majority vote of the rater columns. An exact
//! tie is broken by an injected [`TieBreak`], the only source of
//! nondeterminism in the pipeline.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;

use rand::rngs::ThreadRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::{format_timestamp, Dataset};
use crate::error::{GmacError, Result};
use crate::types::{
    norm3, Limb, SegmentId, SubjectId, TimeSeries, TimestampUs, ACCEL_CHANNELS,
};

/// Parameters for feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Trailing window length in samples (Nin). Values below 1 act as 1.
    pub window_samples: usize,

    /// Gaussian KDE bandwidth for the entropy feature. Typical: 0.2.
    pub kde_bandwidth: f64,

    /// Rater columns averaged into the use label.
    pub rater_columns: Vec<String>,

    /// Raw columns copied into the feature table.
    pub raw_columns: Vec<String>,

    /// Trailing window (samples) of the smoothed `uluse_w` label column.
    /// The column is omitted when unset.
    #[serde(default)]
    pub label_window: Option<usize>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_samples: 50,
            kde_bandwidth: 0.2,
            rater_columns: ["r1", "r2", "g1", "g2"].map(String::from).to_vec(),
            raw_columns: ACCEL_CHANNELS.map(String::from).to_vec(),
            label_window: None,
        }
    }
}

impl FeatureConfig {
    /// Reject a non-positive bandwidth, an empty rater list or an empty
    /// label window.
    pub fn validate(&self) -> Result<()> {
        if !(self.kde_bandwidth > 0.0) {
            return Err(GmacError::invalid(
                "kde_bandwidth",
                format!("{} must be positive", self.kde_bandwidth),
            ));
        }
        if self.rater_columns.is_empty() {
            return Err(GmacError::invalid("rater_columns", "at least one rater is required"));
        }
        if self.label_window == Some(0) {
            return Err(GmacError::invalid("label_window", "must be at least 1"));
        }
        Ok(())
    }
}

/// Resolves exact ties in the rater vote.
pub trait TieBreak {
    /// Label assigned to a tied sample.
    fn choose(&mut self) -> bool;
}

/// Fair coin flip from any random source.
#[derive(Debug, Clone)]
pub struct RandomTieBreak<R: Rng>(pub R);

impl RandomTieBreak<ThreadRng> {
    /// Coin flips from the thread-local generator.
    pub fn from_thread_rng() -> Self {
        Self(rand::thread_rng())
    }
}

impl<R: Rng> TieBreak for RandomTieBreak<R> {
    fn choose(&mut self) -> bool {
        self.0.gen::<f64>() > 0.5
    }
}

/// Always the same answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTieBreak(pub bool);

impl TieBreak for FixedTieBreak {
    fn choose(&mut self) -> bool {
        self.0
    }
}

/// Threshold a mean vote: above 0.5 is use, below is no use, exactly 0.5 is
/// decided by `tie_break`. A missing vote counts as no use.
fn vote(mean: f64, tie_break: &mut dyn TieBreak) -> f64 {
    if mean > 0.5 {
        1.0
    } else if mean == 0.5 {
        if tie_break.choose() {
            1.0
        } else {
            0.0
        }
    } else {
        0.0
    }
}

/// Per-sample use label (0 or 1) from the mean of the rater columns.
pub fn uluse_from_raters<S: AsRef<str>>(
    series: &TimeSeries,
    raters: &[S],
    tie_break: &mut dyn TieBreak,
) -> Result<Vec<f64>> {
    if raters.is_empty() {
        return Err(GmacError::invalid("rater_columns", "at least one rater is required"));
    }
    let columns = raters
        .iter()
        .map(|name| series.channel(name.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok((0..series.len())
        .map(|i| {
            let mean = columns.iter().map(|c| c[i]).sum::<f64>() / columns.len() as f64;
            vote(mean, tie_break)
        })
        .collect())
}

/// Smooth labels with a trailing mean over `nin` samples, then vote again.
///
/// Missing labels stay missing.
pub fn windowed_uluse(uluse: &[f64], nin: usize, tie_break: &mut dyn TieBreak) -> Vec<f64> {
    let mut window = RollingWindow::new(nin);
    uluse
        .iter()
        .map(|&label| {
            window.push(label);
            let mean = window.mean();
            if mean.is_nan() {
                f64::NAN
            } else {
                vote(mean, tie_break)
            }
        })
        .collect()
}

/// Trailing window with O(1) amortized mean, variance, min and max.
///
/// NaN values occupy a slot but are excluded from the statistics.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    buffer: VecDeque<f64>,
    count: usize,
    sum: f64,
    m2: f64,
    mins: VecDeque<(u64, f64)>,
    maxs: VecDeque<(u64, f64)>,
    next_index: u64,
}

impl RollingWindow {
    /// A window over the last `capacity` samples (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
            count: 0,
            sum: 0.0,
            m2: 0.0,
            mins: VecDeque::new(),
            maxs: VecDeque::new(),
            next_index: 0,
        }
    }

    /// Add a sample, evicting the oldest one once full.
    pub fn push(&mut self, x: f64) {
        if self.buffer.len() == self.capacity {
            if let Some(old) = self.buffer.pop_front() {
                self.remove_stat(old);
            }
            let oldest = self.next_index + 1 - self.capacity as u64;
            while self.mins.front().is_some_and(|&(i, _)| i < oldest) {
                self.mins.pop_front();
            }
            while self.maxs.front().is_some_and(|&(i, _)| i < oldest) {
                self.maxs.pop_front();
            }
        }

        self.buffer.push_back(x);
        if !x.is_nan() {
            self.add_stat(x);
            while self.mins.back().is_some_and(|&(_, v)| v >= x) {
                self.mins.pop_back();
            }
            self.mins.push_back((self.next_index, x));
            while self.maxs.back().is_some_and(|&(_, v)| v <= x) {
                self.maxs.pop_back();
            }
            self.maxs.push_back((self.next_index, x));
        }
        self.next_index += 1;
    }

    fn add_stat(&mut self, x: f64) {
        let old_mean = if self.count > 0 { self.sum / self.count as f64 } else { x };
        self.count += 1;
        self.sum += x;
        let new_mean = self.sum / self.count as f64;
        self.m2 += (x - old_mean) * (x - new_mean);
    }

    fn remove_stat(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        let old_mean = self.sum / self.count as f64;
        self.count -= 1;
        if self.count == 0 {
            self.sum = 0.0;
            self.m2 = 0.0;
            return;
        }
        self.sum -= x;
        let new_mean = self.sum / self.count as f64;
        self.m2 = (self.m2 - (x - old_mean) * (x - new_mean)).max(0.0);
    }

    /// Non-missing samples in the window.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Non-missing samples in the window, oldest first.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.buffer.iter().copied().filter(|v| !v.is_nan())
    }

    /// Mean, NaN for an empty window.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }

    /// Sample variance, 0 for fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Minimum, NaN for an empty window.
    pub fn min(&self) -> f64 {
        self.mins.front().map_or(f64::NAN, |&(_, v)| v)
    }

    /// Maximum, NaN for an empty window.
    pub fn max(&self) -> f64 {
        self.maxs.front().map_or(f64::NAN, |&(_, v)| v)
    }

    /// All four statistics.
    pub fn stats(&self) -> WindowStats {
        WindowStats {
            mean: self.mean(),
            var: self.variance(),
            min: self.min(),
            max: self.max(),
        }
    }
}

/// Shannon entropy of the Gaussian KDE density evaluated at the samples.
///
/// The density at each sample is normalized over the samples before taking
/// `-Σ p ln p`, so kernel constants cancel. One sample gives 0; no samples
/// give NaN.
pub fn kde_entropy(values: &[f64], bandwidth: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let inv_two_h2 = 1.0 / (2.0 * bandwidth * bandwidth);
    let density: Vec<f64> = values
        .iter()
        .map(|&xi| {
            values
                .iter()
                .map(|&xj| (-(xi - xj) * (xi - xj) * inv_two_h2).exp())
                .sum::<f64>()
        })
        .collect();
    let total: f64 = density.iter().sum();
    density
        .iter()
        .map(|&p| p / total)
        .filter(|&p| p > 0.0)
        .map(|p| -p * p.ln())
        .sum()
}

/// Mean, variance, minimum and maximum of one window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub mean: f64,
    pub var: f64,
    pub min: f64,
    pub max: f64,
}

/// Features of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowFeatures {
    /// Use label (0 or 1).
    pub uluse: f64,
    /// Per-axis statistics of ax, ay, az.
    pub axes: [WindowStats; 3],
    /// Statistics of the 3-axis norm.
    pub norm: WindowStats,
    /// KDE entropy of the 3-axis norm.
    pub entropy: f64,
}

/// Column names of [`WindowFeatures::values`], in order.
pub const FEATURE_COLUMNS: [&str; 18] = [
    "uluse", "mean_x", "mean_y", "mean_z", "var_x", "var_y", "var_z", "min_x", "min_y", "min_z",
    "max_x", "max_y", "max_z", "mean_2", "var_2", "min_2", "max_2", "ent_2",
];

/// Column of the smoothed use label.
pub const WINDOWED_LABEL_COLUMN: &str = "uluse_w";

impl WindowFeatures {
    /// Flat values in [`FEATURE_COLUMNS`] order.
    pub fn values(&self) -> [f64; 18] {
        let [x, y, z] = self.axes;
        [
            self.uluse,
            x.mean,
            y.mean,
            z.mean,
            x.var,
            y.var,
            z.var,
            x.min,
            y.min,
            z.min,
            x.max,
            y.max,
            z.max,
            self.norm.mean,
            self.norm.var,
            self.norm.min,
            self.norm.max,
            self.entropy,
        ]
    }
}

/// Features for every sample of one segment.
pub fn compute_all_features(
    series: &TimeSeries,
    config: &FeatureConfig,
    tie_break: &mut dyn TieBreak,
) -> Result<Vec<WindowFeatures>> {
    config.validate()?;
    let uluse = uluse_from_raters(series, &config.rater_columns, tie_break)?;
    let [ax, ay, az] = ACCEL_CHANNELS.map(|name| series.channel(name));
    let axes = [ax?, ay?, az?];

    let mut windows = [0, 1, 2].map(|_| RollingWindow::new(config.window_samples));
    let mut norm_window = RollingWindow::new(config.window_samples);
    let mut scratch = Vec::with_capacity(config.window_samples.max(1));

    Ok((0..series.len())
        .map(|i| {
            let sample = [axes[0][i], axes[1][i], axes[2][i]];
            for (window, &value) in windows.iter_mut().zip(&sample) {
                window.push(value);
            }
            norm_window.push(norm3(sample));

            scratch.clear();
            scratch.extend(norm_window.values());
            WindowFeatures {
                uluse: uluse[i],
                axes: [windows[0].stats(), windows[1].stats(), windows[2].stats()],
                norm: norm_window.stats(),
                entropy: kde_entropy(&scratch, config.kde_bandwidth),
            }
        })
        .collect())
}

/// One row of a feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub timestamp: TimestampUs,
    pub subject: SubjectId,
    pub segment: SegmentId,
    /// Values of the table's raw columns.
    pub raw: Vec<f64>,
    pub features: WindowFeatures,
    /// Smoothed use label, present when the table carries `uluse_w`.
    pub uluse_windowed: Option<f64>,
}

/// Feature rows of every segment of one limb.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    pub raw_columns: Vec<String>,
    /// Whether rows carry the smoothed `uluse_w` label.
    pub windowed_label: bool,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// An empty table with the given raw columns.
    pub fn new(raw_columns: Vec<String>, windowed_label: bool) -> Self {
        Self {
            raw_columns,
            windowed_label,
            rows: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Subject of every row, in row order.
    pub fn subjects(&self) -> Vec<SubjectId> {
        self.rows.iter().map(|r| r.subject).collect()
    }

    /// Use label of every row, in row order.
    pub fn uluse(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.features.uluse).collect()
    }

    /// Write as CSV: `time`, `subject`, `segment`, raw columns, features,
    /// then `uluse_w` when the table has it.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = vec!["time".to_string(), "subject".to_string(), "segment".to_string()];
        header.extend(self.raw_columns.iter().cloned());
        header.extend(FEATURE_COLUMNS.iter().map(|c| c.to_string()));
        if self.windowed_label {
            header.push(WINDOWED_LABEL_COLUMN.to_string());
        }
        csv_writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![
                format_timestamp(row.timestamp),
                row.subject.to_string(),
                row.segment.to_string(),
            ];
            record.extend(row.raw.iter().map(f64::to_string));
            record.extend(row.features.values().iter().map(f64::to_string));
            if self.windowed_label {
                record.push(row.uluse_windowed.unwrap_or(f64::NAN).to_string());
            }
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

/// Features for every segment of every limb, one table per limb.
pub fn features_for_all(
    dataset: &Dataset,
    config: &FeatureConfig,
    tie_break: &mut dyn TieBreak,
) -> Result<BTreeMap<Limb, FeatureTable>> {
    let total = dataset.len();
    let mut tables: BTreeMap<Limb, FeatureTable> = BTreeMap::new();

    for (i, (key, series)) in dataset.iter().enumerate() {
        debug!("[{:3} / {:3}] {}", i + 1, total, key);
        let features = compute_all_features(series, config, tie_break)?;
        let raw = series.select_channels(&config.raw_columns)?;
        let smoothed = config.label_window.map(|nin| {
            let labels: Vec<f64> = features.iter().map(|f| f.uluse).collect();
            windowed_uluse(&labels, nin, tie_break)
        });

        let table = tables.entry(key.limb).or_insert_with(|| {
            FeatureTable::new(config.raw_columns.clone(), config.label_window.is_some())
        });
        table.rows.extend(features.into_iter().enumerate().map(|(row, features)| FeatureRow {
            timestamp: series.timestamps()[row],
            subject: key.subject,
            segment: key.segment,
            raw: raw.columns().iter().map(|c| c[row]).collect(),
            features,
            uluse_windowed: smoothed.as_ref().map(|labels| labels[row]),
        }));
    }

    for (limb, table) in &tables {
        info!(%limb, rows = table.len(), "extracted features");
    }
    Ok(tables)
}
