//! Autocorrelation of label and signal columns.
//!
//! Used to study how long upper-limb use stays correlated with itself, which
//! informs the feature window length. Correlation is computed through the
//! FFT (zero padded to avoid circular wrap-around), O(n log n) per column.

use std::collections::BTreeMap;
use std::io::Write;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::error::Result;
use crate::types::{Limb, SegmentKey, TimeSeries};

/// FFT-based autocorrelation with plan reuse across calls.
pub struct Autocorrelator {
    planner: FftPlanner<f64>,
}

impl Autocorrelator {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Normalized autocorrelation for lags `0..x.len()`.
    ///
    /// The signal is de-meaned first; lag 0 is 1. A constant signal has no
    /// defined normalization and yields all zeros.
    pub fn compute(&mut self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        if n == 0 {
            return Vec::new();
        }
        let mean = x.iter().sum::<f64>() / n as f64;
        let variance = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
        if variance == 0.0 {
            return vec![0.0; n];
        }

        let size = (2 * n - 1).next_power_of_two();
        let mut buffer: Vec<Complex<f64>> = x
            .iter()
            .map(|&v| Complex::new(v - mean, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(size)
            .collect();

        self.planner.plan_fft_forward(size).process(&mut buffer);
        for c in buffer.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        self.planner.plan_fft_inverse(size).process(&mut buffer);

        let lag0 = buffer[0].re;
        buffer[..n].iter().map(|c| c.re / lag0).collect()
    }
}

impl Default for Autocorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized autocorrelation of `x` (see [`Autocorrelator::compute`]).
pub fn autocorr(x: &[f64]) -> Vec<f64> {
    Autocorrelator::new().compute(x)
}

/// One autocorrelation per requested column of a segment.
pub fn segment_autocorr<S: AsRef<str>>(series: &TimeSeries, columns: &[S]) -> Result<Vec<Vec<f64>>> {
    let mut correlator = Autocorrelator::new();
    columns
        .iter()
        .map(|name| Ok(correlator.compute(series.channel(name.as_ref())?)))
        .collect()
}

/// First `lags` autocorrelation lags of every long-enough segment of a limb.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AutocorrSummary {
    /// Number of lags kept per column.
    pub lags: usize,
    /// Column names that were correlated, in order.
    pub columns: Vec<String>,
    /// Segments whose lags are stacked, in dataset order.
    pub segments: Vec<SegmentKey>,
    /// One vector of `lags` values per (segment, column), segment-major.
    pub values: Vec<Vec<f64>>,
    /// Segments included.
    pub retained: usize,
    /// Segments shorter than `lags`, excluded.
    pub discarded: usize,
}

impl AutocorrSummary {
    /// Write as CSV: a `lag` column and one column per (segment, column)
    /// named `<subject>_<segment>_<column>`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = vec!["lag".to_string()];
        for key in &self.segments {
            header.extend(
                self.columns
                    .iter()
                    .map(|c| format!("{}_{}_{}", key.subject, key.segment, c)),
            );
        }
        csv_writer.write_record(&header)?;

        for lag in 0..self.lags {
            let mut record = vec![lag.to_string()];
            record.extend(self.values.iter().map(|v| v[lag].to_string()));
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

/// Stack the first `lags` lags of every segment with at least `lags` rows,
/// per limb. Shorter segments are counted as discarded.
pub fn autocorr_summary<S: AsRef<str>>(
    dataset: &Dataset,
    columns: &[S],
    lags: usize,
) -> Result<BTreeMap<Limb, AutocorrSummary>> {
    let names: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
    let mut correlator = Autocorrelator::new();
    let mut summaries: BTreeMap<Limb, AutocorrSummary> = BTreeMap::new();

    for (key, series) in dataset.iter() {
        let summary = summaries.entry(key.limb).or_insert_with(|| AutocorrSummary {
            lags,
            columns: names.clone(),
            ..AutocorrSummary::default()
        });
        if series.len() < lags {
            debug!(%key, rows = series.len(), lags, "segment too short for autocorrelation");
            summary.discarded += 1;
            continue;
        }
        for name in &names {
            let mut acf = correlator.compute(series.channel(name)?);
            acf.truncate(lags);
            summary.values.push(acf);
        }
        summary.segments.push(*key);
        summary.retained += 1;
    }

    for (limb, summary) in &summaries {
        info!(
            %limb,
            retained = summary.retained,
            discarded = summary.discarded,
            "autocorrelation summary"
        );
    }
    Ok(summaries)
}
