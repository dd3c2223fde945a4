//! Forearm tilt from a single accelerometer axis.
//!
//! The axis reading (in g) is smoothed, clamped to [-1, 1] and mapped to an
//! elevation angle: `90 - acos(x)` degrees, so a horizontal axis reads 0°,
//! an axis pointing up reads 90° and one pointing down reads -90°.

use std::collections::BTreeMap;

use tracing::debug;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::signal::{moving_average_causal, savgol_smooth};
use crate::types::{Limb, SubjectId, TimeSeries};

/// Name of the output channel produced by [`tilt_for_all_subjects`].
pub const TILT_CHANNEL: &str = "tilt";

/// Tilt angle in degrees for every sample of `x`.
///
/// Smoothing is a causal moving average over `nwin` samples, or a centred
/// zero-order Savitzky-Golay window when `causal` is false.
pub fn compute_tilt(x: &[f64], nwin: usize, causal: bool) -> Result<Vec<f64>> {
    let smoothed = if causal {
        moving_average_causal(x, nwin)?
    } else {
        savgol_smooth(x, nwin)?
    };
    Ok(smoothed.into_iter().map(tilt_degrees).collect())
}

/// Elevation angle of an axis with reading `x` (g).
fn tilt_degrees(x: f64) -> f64 {
    90.0 - x.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Tilt of `channel` for every subject of `limb`.
///
/// Each segment is smoothed on its own; the per-segment results are then
/// concatenated in segment order into one series per subject.
pub fn tilt_for_all_subjects(
    dataset: &Dataset,
    limb: Limb,
    channel: &str,
    nwin: usize,
    causal: bool,
) -> Result<BTreeMap<SubjectId, TimeSeries>> {
    let names = vec![TILT_CHANNEL.to_string()];
    let mut out = BTreeMap::new();
    for subject in dataset.subjects(limb) {
        let parts = dataset
            .subject_segments(limb, subject)
            .map(|(_, series)| {
                let tilt = compute_tilt(series.channel(channel)?, nwin, causal)?;
                TimeSeries::new(series.timestamps().to_vec(), names.clone(), vec![tilt])
            })
            .collect::<Result<Vec<_>>>()?;
        let joined = TimeSeries::concat(&names, parts)?;
        debug!(%limb, subject, rows = joined.len(), "computed tilt");
        out.insert(subject, joined);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentKey;

    #[test]
    fn test_tilt_exact_values() {
        let tilt = compute_tilt(&[0.0, 1.0, -1.0, 0.5], 1, true).unwrap();
        assert!(tilt[0].abs() < 1e-12);
        assert!((tilt[1] - 90.0).abs() < 1e-12);
        assert!((tilt[2] + 90.0).abs() < 1e-12);
        assert!((tilt[3] - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_tilt_clamps_out_of_range_readings() {
        let tilt = compute_tilt(&[1.7, -3.0], 1, false).unwrap();
        assert!((tilt[0] - 90.0).abs() < 1e-12);
        assert!((tilt[1] + 90.0).abs() < 1e-12);
        assert!(tilt.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_tilt_causal_smoothing_starts_from_zero_history() {
        // First output averages one reading with one zero: 0.5 g -> 30 deg
        let tilt = compute_tilt(&[1.0, 1.0, 1.0], 2, true).unwrap();
        assert!((tilt[0] - 30.0).abs() < 1e-9);
        assert!((tilt[2] - 90.0).abs() < 1e-12);
    }

    #[test]
    fn test_tilt_for_all_subjects_concatenates_segments() {
        let mut dataset = Dataset::new();
        let seg = |start: i64, value: f64| {
            TimeSeries::from_channels(
                (0..5).map(|i| start + i * 20_000).collect(),
                vec![("ax", vec![value; 5])],
            )
            .unwrap()
        };
        dataset.insert(SegmentKey::new(Limb::Left, 4, 0), seg(0, 1.0));
        dataset.insert(SegmentKey::new(Limb::Left, 4, 1), seg(10_000_000, 0.0));
        dataset.insert(SegmentKey::new(Limb::Left, 9, 0), seg(0, -1.0));
        dataset.insert(SegmentKey::new(Limb::Right, 4, 0), seg(0, 0.5));

        let tilts = tilt_for_all_subjects(&dataset, Limb::Left, "ax", 1, true).unwrap();
        assert_eq!(tilts.keys().copied().collect::<Vec<_>>(), vec![4, 9]);

        let s4 = tilts[&4].channel(TILT_CHANNEL).unwrap();
        assert_eq!(s4.len(), 10);
        assert!((s4[0] - 90.0).abs() < 1e-12);
        assert!(s4[5].abs() < 1e-12);
        assert!((tilts[&9].channel(TILT_CHANNEL).unwrap()[0] + 90.0).abs() < 1e-12);

        assert!(tilt_for_all_subjects(&dataset, Limb::Left, "gz", 1, true).is_err());
    }
}
