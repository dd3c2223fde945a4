//! Fixed-rate resampling of irregularly sampled series.
//!
//! Resampling never crosses a discontinuity: the input is first split into
//! continuous runs (see [`crate::segmentation::continuous_segments`]) and each
//! run is binned on its own.
//!
//! Bins are anchored to the epoch, so a 0.1 s bin always starts on a tenth of
//! a second regardless of where the recording begins.

use crate::error::{GmacError, Result};
use crate::segmentation::continuous_segments;
use crate::types::{TimeSeries, TimestampUs, MICROS_PER_SECOND};

/// Default continuity threshold for resampling (seconds).
pub const DEFAULT_TJUMP_S: f64 = 1.0;

/// Bin width for a target rate: `1 / new_fs` rounded to hundredths of a
/// second (30 Hz -> 0.03 s, 10 Hz -> 0.1 s).
pub fn bin_period_us(new_fs: f64) -> Result<i64> {
    if !new_fs.is_finite() || new_fs <= 0.0 {
        return Err(GmacError::invalid("new_fs", format!("{new_fs} must be positive")));
    }
    let hundredths = (100.0 / new_fs).round() as i64;
    if hundredths == 0 {
        return Err(GmacError::invalid(
            "new_fs",
            format!("{new_fs} Hz rounds to a zero-width bin"),
        ));
    }
    Ok(hundredths * (MICROS_PER_SECOND / 100))
}

/// Average into right-closed bins labeled by their right edge, per
/// continuous run.
///
/// A bin `(k·p - p, k·p]` is emitted for every `k` between the first and
/// last occupied bin of each run. Its value is the mean of the non-NaN
/// samples it contains, or NaN when it has none. When the gap between two
/// runs is shorter than a bin, the bin they share averages both sides.
pub fn resample(series: &TimeSeries, new_fs: f64, tjump_s: f64) -> Result<TimeSeries> {
    let period_us = bin_period_us(new_fs)?;
    Ok(bin_runs(series, period_us, tjump_s, BinRule::RightClosedMean))
}

/// Sum into left-closed bins of `period_s` seconds labeled by their left
/// edge, per continuous run. NaN samples are skipped and empty bins sum to 0.
/// A bin shared by two runs sums both.
pub fn aggregate_sum(series: &TimeSeries, period_s: f64, tjump_s: f64) -> Result<TimeSeries> {
    if !period_s.is_finite() || period_s <= 0.0 {
        return Err(GmacError::invalid("period_s", format!("{period_s} must be positive")));
    }
    let period_us = crate::types::seconds_to_us(period_s).max(1);
    Ok(bin_runs(series, period_us, tjump_s, BinRule::LeftClosedSum))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinRule {
    RightClosedMean,
    LeftClosedSum,
}

impl BinRule {
    /// Index of the bin holding `t`.
    fn bin_of(self, t: TimestampUs, period_us: i64) -> i64 {
        match self {
            BinRule::RightClosedMean => ceil_div(t, period_us),
            BinRule::LeftClosedSum => t.div_euclid(period_us),
        }
    }
}

fn ceil_div(t: i64, p: i64) -> i64 {
    let q = t.div_euclid(p);
    if t.rem_euclid(p) == 0 {
        q
    } else {
        q + 1
    }
}

/// Bin every continuous run of `series` onto one increasing label grid.
///
/// Bins between runs are never emitted. Runs are time ordered, so a run can
/// only share its first bin with the last bin of the previous run.
fn bin_runs(series: &TimeSeries, period_us: i64, tjump_s: f64, rule: BinRule) -> TimeSeries {
    let width = series.channel_names().len();
    let mut labels: Vec<i64> = Vec::new();
    let mut sums: Vec<Vec<f64>> = vec![Vec::new(); width];
    let mut counts: Vec<Vec<usize>> = vec![Vec::new(); width];

    for run in continuous_segments(series, tjump_s) {
        let timestamps = run.timestamps();
        let (Some(&first), Some(&last)) = (timestamps.first(), timestamps.last()) else {
            continue;
        };
        let first_bin = rule.bin_of(first, period_us);
        let shared = labels.last() == Some(&(first_bin * period_us));
        let offset = if shared { labels.len() - 1 } else { labels.len() };

        let start = if shared { first_bin + 1 } else { first_bin };
        for bin in start..=rule.bin_of(last, period_us) {
            labels.push(bin * period_us);
            for c in 0..width {
                sums[c].push(0.0);
                counts[c].push(0);
            }
        }

        for (c, column) in run.columns().iter().enumerate() {
            for (&t, &value) in timestamps.iter().zip(column) {
                if !value.is_nan() {
                    let idx = offset + (rule.bin_of(t, period_us) - first_bin) as usize;
                    sums[c][idx] += value;
                    counts[c][idx] += 1;
                }
            }
        }
    }

    let columns = sums
        .into_iter()
        .zip(counts)
        .map(|(sums, counts)| match rule {
            BinRule::RightClosedMean => sums
                .into_iter()
                .zip(counts)
                .map(|(s, n)| if n == 0 { f64::NAN } else { s / n as f64 })
                .collect(),
            BinRule::LeftClosedSum => sums,
        })
        .collect();

    TimeSeries::from_parts(labels, series.channel_names().to_vec(), columns)
}
