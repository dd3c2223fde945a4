//! Activity magnitude: vector-magnitude counts and accelerometer magnitude.
//!
//! Two derivations of "how much is the arm moving":
//!
//! - [`compute_vector_magnitude`] reproduces accelerometer activity counts
//!   from a six-channel IMU. Orientation is tracked with the Madgwick filter
//!   so gravity can be removed in the earth frame, the movement band is
//!   isolated, small values are suppressed and per-second sums are turned
//!   into integer counts.
//! - [`compute_accl_magnitude`] uses the accelerometer alone: a high-pass
//!   removes gravity, and the per-second norm is smoothed.
//!
//! Pipeline for counts:
//!
//! ```text
//! IMU ──▶ 30 Hz ──▶ Madgwick ──▶ band-pass ──▶ 10 Hz ──▶ deadband/scale
//!      ──▶ 1 s sums ──▶ |sum| (a_mag) ──▶ 5 s mean ──▶ round (counts)
//! ```
//!
//! The raw input is split once into continuous runs (gap <= tjump) and the
//! whole chain up to the 1 s sums runs on each run, so no filter state ever
//! crosses a recording gap.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GmacError, Result};
use crate::orientation::{linear_acceleration, OrientationConfig};
use crate::resample::{aggregate_sum, resample, DEFAULT_TJUMP_S};
use crate::segmentation::continuous_segments;
use crate::signal::{
    bandpass_movement, deadband, highpass_gravity, moving_average_edge_padded, nan_to_zero,
    savgol_smooth, FilterConfig,
};
use crate::types::{
    norm3, TimeSeries, TimestampUs, ACCEL_CHANNELS, IMU_CHANNELS, MICROS_PER_SECOND,
};

/// Name of the output channel of [`compute_accl_magnitude`].
pub const MAGNITUDE_CHANNEL: &str = "mag";

/// Parameters of the counts derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagnitudeConfig {
    /// Madgwick gain and the rate the IMU is resampled to (30 Hz).
    pub orientation: OrientationConfig,

    /// Band-pass and deadband parameters.
    pub filters: FilterConfig,

    /// Rate after band-passing (Hz). Typical: 10.
    pub movement_fs: f64,

    /// Aggregation bin (seconds). Typical: 1.
    pub aggregation_period_s: f64,

    /// Divisor turning g into count units. Typical: 0.01664.
    pub count_scale: f64,

    /// Trailing bins averaged into counts. Typical: 5.
    pub counts_window: usize,

    /// Gap (seconds) that splits continuous runs.
    pub continuity_jump_s: f64,
}

impl Default for MagnitudeConfig {
    fn default() -> Self {
        Self {
            orientation: OrientationConfig::default(),
            filters: FilterConfig::default(),
            movement_fs: 10.0,
            aggregation_period_s: 1.0,
            count_scale: 0.01664,
            counts_window: 5,
            continuity_jump_s: DEFAULT_TJUMP_S,
        }
    }
}

impl MagnitudeConfig {
    /// Reject non-positive rates, scales and windows.
    pub fn validate(&self) -> Result<()> {
        self.orientation.validate()?;
        let positive = [
            ("movement_fs", self.movement_fs),
            ("aggregation_period_s", self.aggregation_period_s),
            ("count_scale", self.count_scale),
            ("continuity_jump_s", self.continuity_jump_s),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(GmacError::invalid(name, format!("{value} must be positive")));
            }
        }
        if self.counts_window == 0 {
            return Err(GmacError::invalid("counts_window", "must be at least 1"));
        }
        Ok(())
    }
}

/// Output of [`compute_vector_magnitude`], one entry per aggregation bin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorMagnitude {
    /// Bin start times.
    pub timestamps: Vec<TimestampUs>,
    /// Norm of the per-axis bin sums.
    pub a_mag: Vec<f64>,
    /// Rounded trailing mean of `a_mag`; `None` until the window is full.
    pub counts: Vec<Option<f64>>,
}

impl VectorMagnitude {
    /// Number of bins.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when there are no bins.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// As a series with channels `a_mag` and `counts` (missing counts as NaN).
    pub fn to_series(&self) -> Result<TimeSeries> {
        TimeSeries::from_channels(
            self.timestamps.clone(),
            vec![
                ("a_mag", self.a_mag.clone()),
                ("counts", self.counts.iter().map(|c| c.unwrap_or(f64::NAN)).collect()),
            ],
        )
    }
}

/// Apply `f` to every channel.
fn map_channels<F>(series: &TimeSeries, f: F) -> Result<TimeSeries>
where
    F: Fn(&[f64]) -> Result<Vec<f64>>,
{
    let columns = series
        .columns()
        .iter()
        .map(|c| f(c))
        .collect::<Result<Vec<_>>>()?;
    TimeSeries::new(series.timestamps().to_vec(), series.channel_names().to_vec(), columns)
}

/// Concatenate per-run bin sums. A bin reached by two adjacent runs holds
/// the sum of both.
fn concat_sums(names: &[String], parts: Vec<TimeSeries>) -> Result<TimeSeries> {
    let mut timestamps: Vec<TimestampUs> = Vec::new();
    let mut columns = vec![Vec::new(); names.len()];
    for part in &parts {
        for (row, &t) in part.timestamps().iter().enumerate() {
            let shared = timestamps.last() == Some(&t);
            if !shared {
                timestamps.push(t);
            }
            for (column, source) in columns.iter_mut().zip(part.columns()) {
                match column.last_mut() {
                    Some(total) if shared => *total += source[row],
                    _ => column.push(source[row]),
                }
            }
        }
    }
    TimeSeries::new(timestamps, names.to_vec(), columns)
}

/// Per-bin sums of the scaled movement band of one continuous run.
///
/// Later stages must not split the run again: resampling snaps samples onto
/// bin edges, which changes gap lengths.
fn run_movement_sums(run: &TimeSeries, config: &MagnitudeConfig) -> Result<TimeSeries> {
    let whole = f64::INFINITY;
    let fs = config.orientation.frequency_hz;

    let imu = resample(run, fs, whole)?;
    let earth = linear_acceleration(&imu, &config.orientation, whole)?;
    let band = map_channels(&earth, |x| bandpass_movement(&nan_to_zero(x), fs, &config.filters))?;

    let movement = resample(&band, config.movement_fs, whole)?;
    let scaled = map_channels(&movement, |x| {
        Ok(deadband(x, config.filters.deadband_threshold)
            .into_iter()
            .map(|v| v / config.count_scale)
            .collect())
    })?;
    aggregate_sum(&scaled, config.aggregation_period_s, whole)
}

/// Trailing mean over `window` values, rounded half to even.
fn rolling_counts(a_mag: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..a_mag.len())
        .map(|i| {
            (i + 1 >= window).then(|| {
                let sum: f64 = a_mag[i + 1 - window..=i].iter().sum();
                (sum / window as f64).round_ties_even()
            })
        })
        .collect()
}

/// Activity counts from a six-channel IMU series (`ax..az` in g,
/// `gx..gz` in rad/s).
pub fn compute_vector_magnitude(imu: &TimeSeries, config: &MagnitudeConfig) -> Result<VectorMagnitude> {
    config.validate()?;
    let imu = imu.select_channels(&IMU_CHANNELS)?;

    let runs = continuous_segments(&imu, config.continuity_jump_s);
    let parts = runs
        .iter()
        .map(|run| run_movement_sums(run, config))
        .collect::<Result<Vec<_>>>()?;
    let names = ACCEL_CHANNELS.map(String::from).to_vec();
    let sums = concat_sums(&names, parts)?;

    let columns = sums.columns();
    let a_mag: Vec<f64> = (0..sums.len())
        .map(|i| norm3([columns[0][i], columns[1][i], columns[2][i]]))
        .collect();
    let counts = rolling_counts(&a_mag, config.counts_window);

    debug!(
        runs = runs.len(),
        input_rows = imu.len(),
        bins = a_mag.len(),
        "computed vector magnitude"
    );

    Ok(VectorMagnitude {
        timestamps: sums.timestamps().to_vec(),
        a_mag,
        counts,
    })
}

/// Smoothed per-second accelerometer magnitude from `ax..az` (g).
///
/// Each axis is high-passed (single causal pass, or zero-phase when `causal`
/// is false), small values are zeroed, and the per-sample norms are summed
/// per whole second. The per-second series is then smoothed over `nfilt`
/// seconds: causal mean with the first value repeated as history, or a
/// centred zero-order Savitzky-Golay window.
pub fn compute_accl_magnitude(
    accl: &TimeSeries,
    nfilt: usize,
    causal: bool,
    filters: &FilterConfig,
) -> Result<TimeSeries> {
    let columns = ACCEL_CHANNELS
        .iter()
        .map(|name| {
            let filtered = highpass_gravity(accl.channel(name)?, filters, causal)?;
            Ok(deadband(&filtered, filters.deadband_threshold))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut seconds: Vec<TimestampUs> = Vec::new();
    let mut per_second: Vec<f64> = Vec::new();
    for (i, &t) in accl.timestamps().iter().enumerate() {
        let second = t.div_euclid(MICROS_PER_SECOND) * MICROS_PER_SECOND;
        let mag = norm3([columns[0][i], columns[1][i], columns[2][i]]);
        match seconds.last() {
            Some(&last) if last == second => {
                if let Some(total) = per_second.last_mut() {
                    *total += mag;
                }
            }
            _ => {
                seconds.push(second);
                per_second.push(mag);
            }
        }
    }

    let smoothed = if causal {
        moving_average_edge_padded(&per_second, nfilt)?
    } else {
        savgol_smooth(&per_second, nfilt)?
    };
    TimeSeries::new(seconds, vec![MAGNITUDE_CHANNEL.to_string()], vec![smoothed])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    /// `secs` seconds of 50 Hz IMU data from per-sample closures.
    fn imu_50hz<A, G>(secs: usize, accel: A, gyro: G) -> TimeSeries
    where
        A: Fn(f64) -> [f64; 3],
        G: Fn(f64) -> [f64; 3],
    {
        let n = secs * 50;
        let start = 1_600_000_000 * MICROS_PER_SECOND;
        let timestamps: Vec<i64> = (0..n as i64).map(|i| start + i * 20_000).collect();
        let t: Vec<f64> = (0..n).map(|i| i as f64 / 50.0).collect();
        let a: Vec<[f64; 3]> = t.iter().map(|&t| accel(t)).collect();
        let g: Vec<[f64; 3]> = t.iter().map(|&t| gyro(t)).collect();
        let col = |v: &[[f64; 3]], k: usize| v.iter().map(|x| x[k]).collect::<Vec<_>>();
        TimeSeries::from_channels(
            timestamps,
            vec![
                ("ax", col(&a, 0)),
                ("ay", col(&a, 1)),
                ("az", col(&a, 2)),
                ("gx", col(&g, 0)),
                ("gy", col(&g, 1)),
                ("gz", col(&g, 2)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rolling_counts() {
        let counts = rolling_counts(&[1.0, 2.0, 3.0, 4.0, 5.0, 7.5], 5);
        assert_eq!(&counts[..4], &[None, None, None, None]);
        assert_eq!(counts[4], Some(3.0));
        // (2 + 3 + 4 + 5 + 7.5) / 5 = 4.3
        assert_eq!(counts[5], Some(4.0));
        // Halves round to even
        assert_eq!(rolling_counts(&[2.5], 1), vec![Some(2.0)]);
        assert_eq!(rolling_counts(&[3.5], 1), vec![Some(4.0)]);
    }

    #[test]
    fn test_zero_imu_gives_zero_counts_after_transient() {
        let imu = imu_50hz(120, |_| [0.0; 3], |_| [0.0; 3]);
        let vm = compute_vector_magnitude(&imu, &MagnitudeConfig::default()).unwrap();

        assert!(vm.len() >= 118 && vm.len() <= 121, "got {} bins", vm.len());
        assert_eq!(vm.counts.len(), vm.len());
        assert!(vm.counts[..4].iter().all(Option::is_none));
        for count in &vm.counts[vm.len() / 2..] {
            assert_eq!(*count, Some(0.0));
        }
        // Bins are one second apart
        for pair in vm.timestamps.windows(2) {
            assert_eq!(pair[1] - pair[0], MICROS_PER_SECOND);
        }
    }

    #[test]
    fn test_movement_produces_counts() {
        // Level sensor shaken along x at 0.7 Hz with 0.5 g amplitude
        let imu = imu_50hz(
            60,
            |t| [0.5 * (2.0 * PI * 0.7 * t).sin(), 0.0, 1.0],
            |_| [1e-4, 0.0, 0.0],
        );
        let vm = compute_vector_magnitude(&imu, &MagnitudeConfig::default()).unwrap();
        let late: Vec<f64> = vm.counts[30..].iter().flatten().copied().collect();
        assert!(!late.is_empty());
        assert!(late.iter().all(|&c| c > 0.0));
    }

    #[test]
    fn test_filters_restart_after_gap_just_over_threshold() {
        // 30 s of shaking, then 1.001 s of silence, then 30 s held still
        let shaking = imu_50hz(30, |t| [0.5 * (2.0 * PI * 0.7 * t).sin(), 0.0, 1.0], |_| [1e-4, 0.0, 0.0]);
        let still = imu_50hz(30, |_| [0.0, 0.0, 1.0], |_| [0.0; 3]);
        let shift = shaking.timestamps()[shaking.len() - 1] + 1_001_000 - still.timestamps()[0];
        let still = TimeSeries::new(
            still.timestamps().iter().map(|t| t + shift).collect(),
            still.channel_names().to_vec(),
            still.columns().to_vec(),
        )
        .unwrap();
        let second_start = still.timestamps()[0];
        let names = shaking.channel_names().to_vec();
        let imu = TimeSeries::concat(&names, vec![shaking, still]).unwrap();
        assert_eq!(continuous_segments(&imu, 1.0).len(), 2);

        let vm = compute_vector_magnitude(&imu, &MagnitudeConfig::default()).unwrap();
        let (before, after): (Vec<_>, Vec<_>) = vm
            .timestamps
            .iter()
            .zip(&vm.a_mag)
            .partition(|(&t, _)| t < second_start);
        assert!(before.iter().any(|(_, &a)| a > 0.0));
        assert!(after.len() >= 29);
        // A fresh orientation and band-pass state see only the still arm
        assert!(after.iter().all(|(_, &a)| a == 0.0));
        for pair in vm.timestamps.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_vector_magnitude_requires_gyro() {
        let accel_only = imu_50hz(10, |_| [0.0; 3], |_| [0.0; 3])
            .select_channels(&ACCEL_CHANNELS)
            .unwrap();
        assert!(matches!(
            compute_vector_magnitude(&accel_only, &MagnitudeConfig::default()),
            Err(GmacError::MissingChannel(_))
        ));
    }

    #[test]
    fn test_vector_magnitude_series_view() {
        let vm = VectorMagnitude {
            timestamps: vec![0, MICROS_PER_SECOND],
            a_mag: vec![1.0, 2.0],
            counts: vec![None, Some(2.0)],
        };
        let series = vm.to_series().unwrap();
        assert!(series.channel("counts").unwrap()[0].is_nan());
        assert_eq!(series.channel("a_mag").unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_invalid_magnitude_config() {
        let config = MagnitudeConfig {
            counts_window: 0,
            ..MagnitudeConfig::default()
        };
        assert!(config.validate().is_err());
        let config = MagnitudeConfig {
            count_scale: 0.0,
            ..MagnitudeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_accl_magnitude_gravity_only_is_zero() {
        let imu = imu_50hz(30, |_| [0.0, 0.0, 1.0], |_| [0.0; 3]);
        let mag = compute_accl_magnitude(&imu, 5, false, &FilterConfig::default()).unwrap();
        assert_eq!(mag.len(), 30);
        assert!(mag.channel(MAGNITUDE_CHANNEL).unwrap().iter().all(|v| v.abs() < 1e-9));
        for pair in mag.timestamps().windows(2) {
            assert_eq!(pair[1] - pair[0], MICROS_PER_SECOND);
        }
    }

    #[test]
    fn test_accl_magnitude_detects_movement() {
        let imu = imu_50hz(30, |t| [0.5 * (2.0 * PI * t).sin(), 0.0, 1.0], |_| [0.0; 3]);
        for causal in [true, false] {
            let mag = compute_accl_magnitude(&imu, 5, causal, &FilterConfig::default()).unwrap();
            let values = mag.channel(MAGNITUDE_CHANNEL).unwrap();
            assert_eq!(values.len(), 30);
            assert!(values[10..20].iter().all(|&v| v > 1.0));
        }
    }

    #[test]
    fn test_accl_magnitude_sums_duplicate_seconds() {
        // Three samples share each second; no smoothing
        let ts = vec![0, 300_000, 600_000, 1_000_000, 1_300_000, 1_600_000];
        let accl = TimeSeries::from_channels(
            ts,
            vec![
                ("ax", vec![0.0; 6]),
                ("ay", vec![0.0; 6]),
                ("az", vec![0.0; 6]),
            ],
        )
        .unwrap();
        let mag = compute_accl_magnitude(&accl, 1, true, &FilterConfig::default()).unwrap();
        assert_eq!(mag.timestamps(), &[0, 1_000_000]);
        assert_eq!(mag.channel(MAGNITUDE_CHANNEL).unwrap(), &[0.0, 0.0]);
    }
}
