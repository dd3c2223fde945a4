//! Filter bank: smoothing, Butterworth design and IIR filtering.
//!
//! This module provides the stateless filtering primitives of the pipeline:
//! - Causal moving averages (streaming safe, no look-ahead)
//! - Zero-order Savitzky-Golay smoothing (non-causal, offline analysis)
//! - Butterworth design as second-order sections
//! - Causal single-pass and zero-phase forward-backward IIR filtering
//! - Deadband noise suppression
//!
//! Every filter returns exactly one output per input sample. Edge effects of
//! the non-causal filters are the caller's responsibility.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{GmacError, Result};

/// Parameters of the fixed filters used by the magnitude pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// High-pass order for gravity / DC removal. Typical: 2.
    pub highpass_order: usize,

    /// High-pass corner as a fraction of the Nyquist frequency. Typical: 0.01.
    pub highpass_cutoff: f64,

    /// Band-pass order for the movement band. Typical: 4.
    pub bandpass_order: usize,

    /// Movement band in Hz. Typical: 0.25 to 2.5 Hz.
    pub bandpass_low_hz: f64,
    pub bandpass_high_hz: f64,

    /// Values with magnitude below this (g) are zeroed. Typical: 0.068.
    pub deadband_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            highpass_order: 2,
            highpass_cutoff: 0.01,
            bandpass_order: 4,
            bandpass_low_hz: 0.25,
            bandpass_high_hz: 2.5,
            deadband_threshold: 0.068,
        }
    }
}

/// Prefix sums that keep track of missing values.
///
/// A window containing any NaN sums to NaN, like a direct FIR evaluation.
struct PrefixSums {
    sums: Vec<f64>,
    nans: Vec<usize>,
}

impl PrefixSums {
    fn new(x: &[f64]) -> Self {
        let mut sums = Vec::with_capacity(x.len() + 1);
        let mut nans = Vec::with_capacity(x.len() + 1);
        sums.push(0.0);
        nans.push(0);
        for &v in x {
            let (s, n) = (sums[sums.len() - 1], nans[nans.len() - 1]);
            if v.is_nan() {
                sums.push(s);
                nans.push(n + 1);
            } else {
                sums.push(s + v);
                nans.push(n);
            }
        }
        Self { sums, nans }
    }

    /// Sum of `x[start..end]`, indices clipped to the signal.
    fn sum(&self, start: isize, end: isize) -> f64 {
        let len = self.sums.len() as isize - 1;
        let start = start.clamp(0, len) as usize;
        let end = end.clamp(0, len) as usize;
        if end <= start {
            return 0.0;
        }
        if self.nans[end] > self.nans[start] {
            f64::NAN
        } else {
            self.sums[end] - self.sums[start]
        }
    }
}

fn check_window(nwin: usize) -> Result<()> {
    if nwin == 0 {
        return Err(GmacError::invalid("nwin", "window length must be at least 1"));
    }
    Ok(())
}

/// Causal moving average: `y[i] = sum(x[i-nwin+1..=i]) / nwin`, with zero
/// history before the first sample.
pub fn moving_average_causal(x: &[f64], nwin: usize) -> Result<Vec<f64>> {
    check_window(nwin)?;
    let prefix = PrefixSums::new(x);
    let n = nwin as isize;
    Ok((0..x.len() as isize)
        .map(|i| prefix.sum(i - n + 1, i + 1) / nwin as f64)
        .collect())
}

/// Causal moving average whose history before the first sample repeats
/// `x[0]` instead of zeros.
pub fn moving_average_edge_padded(x: &[f64], nwin: usize) -> Result<Vec<f64>> {
    check_window(nwin)?;
    let Some(&first) = x.first() else {
        return Ok(Vec::new());
    };
    let prefix = PrefixSums::new(x);
    let n = nwin as isize;
    Ok((0..x.len() as isize)
        .map(|i| {
            let padded = (n - 1 - i).max(0) as f64;
            (prefix.sum(i - n + 1, i + 1) + padded * first) / nwin as f64
        })
        .collect())
}

/// Zero-order Savitzky-Golay smoothing with zero padding beyond the edges.
///
/// The window covers `(nwin - 1) / 2` samples before and `nwin / 2` samples
/// after each point.
pub fn savgol_smooth(x: &[f64], nwin: usize) -> Result<Vec<f64>> {
    check_window(nwin)?;
    let prefix = PrefixSums::new(x);
    let before = ((nwin - 1) / 2) as isize;
    let after = (nwin / 2) as isize;
    Ok((0..x.len() as isize)
        .map(|i| prefix.sum(i - before, i + after + 1) / nwin as f64)
        .collect())
}

/// Zero every value whose magnitude is below `threshold`. NaN is kept.
pub fn deadband(x: &[f64], threshold: f64) -> Vec<f64> {
    x.iter()
        .map(|&v| if v.abs() < threshold { 0.0 } else { v })
        .collect()
}

/// Replace NaN with zero.
pub fn nan_to_zero(x: &[f64]) -> Vec<f64> {
    x.iter().map(|&v| if v.is_nan() { 0.0 } else { v }).collect()
}

/// Butterworth pass band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Band {
    /// High-pass with the given corner.
    Highpass(f64),
    /// Band-pass between two corners.
    Bandpass(f64, f64),
}

/// A cascade of second-order sections `[b0, b1, b2, 1, a1, a2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sos {
    sections: Vec<[f64; 6]>,
}

impl Sos {
    /// Sections of the cascade.
    pub fn sections(&self) -> &[[f64; 6]] {
        &self.sections
    }

    /// Causal single pass from zero state (direct form II transposed).
    pub fn filter(&self, x: &[f64]) -> Vec<f64> {
        let mut state = vec![[0.0; 2]; self.sections.len()];
        self.run(x, &mut state)
    }

    /// Zero-phase forward-backward filtering.
    ///
    /// The signal is extended at both ends by odd reflection and each pass
    /// starts from the steady-state response to its first sample.
    pub fn filtfilt(&self, x: &[f64]) -> Result<Vec<f64>> {
        let padlen = self.padlen();
        if x.len() <= padlen {
            return Err(GmacError::SignalTooShort {
                len: x.len(),
                required: padlen,
            });
        }

        let zi = self.steady_state();
        let ext = odd_extension(x, padlen);

        let mut state = scaled_state(&zi, ext[0]);
        let mut y = self.run(&ext, &mut state);

        let last = y[y.len() - 1];
        y.reverse();
        let mut state = scaled_state(&zi, last);
        let mut y = self.run(&y, &mut state);
        y.reverse();

        Ok(y[padlen..y.len() - padlen].to_vec())
    }

    fn run(&self, x: &[f64], state: &mut [[f64; 2]]) -> Vec<f64> {
        let mut y = x.to_vec();
        for (s, z) in self.sections.iter().zip(state.iter_mut()) {
            for v in y.iter_mut() {
                let input = *v;
                let out = s[0] * input + z[0];
                z[0] = s[1] * input - s[4] * out + z[1];
                z[1] = s[2] * input - s[5] * out;
                *v = out;
            }
        }
        y
    }

    /// Edge extension length: three times the number of filter taps.
    fn padlen(&self) -> usize {
        let trailing_b = self.sections.iter().filter(|s| s[2] == 0.0).count();
        let trailing_a = self.sections.iter().filter(|s| s[5] == 0.0).count();
        3 * (2 * self.sections.len() + 1 - trailing_b.min(trailing_a))
    }

    /// Per-section state giving a unit step response with no transient.
    fn steady_state(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|s| {
                let (b0, b1, b2, a1, a2) = (s[0], s[1], s[2], s[4], s[5]);
                let rhs0 = b1 - a1 * b0;
                let rhs1 = b2 - a2 * b0;
                let z0 = (rhs0 + rhs1) / (1.0 + a1 + a2);
                let z1 = rhs1 - a2 * z0;
                let zi = [scale * z0, scale * z1];
                scale *= (b0 + b1 + b2) / (1.0 + a1 + a2);
                zi
            })
            .collect()
    }
}

fn scaled_state(zi: &[[f64; 2]], value: f64) -> Vec<[f64; 2]> {
    zi.iter().map(|z| [z[0] * value, z[1] * value]).collect()
}

/// Odd extension of `x` by `n` samples at each end.
fn odd_extension(x: &[f64], n: usize) -> Vec<f64> {
    let len = x.len();
    let (first, last) = (x[0], x[len - 1]);
    let mut ext = Vec::with_capacity(len + 2 * n);
    ext.extend((1..=n).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(x);
    ext.extend((0..n).map(|k| 2.0 * last - x[len - 2 - k]));
    ext
}

/// Design a digital Butterworth filter as second-order sections.
///
/// Corners are in Hz when `fs` is given, otherwise as a fraction of the
/// Nyquist frequency. Analog prototype, pre-warped frequency transform and
/// bilinear transform; conjugate poles are paired into sections and the
/// overall gain is folded into the first section.
pub fn butterworth(order: usize, band: Band, fs: Option<f64>) -> Result<Sos> {
    if order == 0 {
        return Err(GmacError::invalid("order", "filter order must be at least 1"));
    }
    let normalize = |f: f64| match fs {
        Some(fs) => 2.0 * f / fs,
        None => f,
    };
    let check = |wn: f64| {
        if wn > 0.0 && wn < 1.0 {
            Ok(wn)
        } else {
            Err(GmacError::invalid(
                "cutoff",
                format!("normalized corner {wn} must lie in (0, 1)"),
            ))
        }
    };
    // Pre-warped analog frequency for a bilinear transform at fs = 2
    let warp = |wn: f64| 4.0 * (PI * wn / 2.0).tan();

    let proto: Vec<Complex64> = (0..order)
        .map(|i| {
            let m = 2 * i as i64 - order as i64 + 1;
            -Complex64::from_polar(1.0, PI * m as f64 / (2 * order) as f64)
        })
        .collect();
    let one = Complex64::new(1.0, 0.0);

    let (zeros, poles, gain) = match band {
        Band::Highpass(f) => {
            let wo = warp(check(normalize(f))?);
            let poles: Vec<Complex64> = proto.iter().map(|&p| Complex64::new(wo, 0.0) / p).collect();
            let gain = (one / proto.iter().fold(one, |acc, &p| acc * -p)).re;
            (vec![Complex64::new(0.0, 0.0); order], poles, gain)
        }
        Band::Bandpass(lo, hi) => {
            let (wl, wh) = (check(normalize(lo))?, check(normalize(hi))?);
            if wl >= wh {
                return Err(GmacError::invalid(
                    "cutoff",
                    format!("band edges {lo} and {hi} are not increasing"),
                ));
            }
            let (wl, wh) = (warp(wl), warp(wh));
            let bw = wh - wl;
            let wo2 = wl * wh;
            let scaled: Vec<Complex64> = proto.iter().map(|&p| p * (bw / 2.0)).collect();
            let mut poles: Vec<Complex64> = scaled
                .iter()
                .map(|&p| p + (p * p - wo2).sqrt())
                .collect();
            poles.extend(scaled.iter().map(|&p| p - (p * p - wo2).sqrt()));
            (
                vec![Complex64::new(0.0, 0.0); order],
                poles,
                bw.powi(order as i32),
            )
        }
    };

    // Bilinear transform, fs = 2
    let fs2 = Complex64::new(4.0, 0.0);
    let mut zd: Vec<Complex64> = zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    let pd: Vec<Complex64> = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();
    zd.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(poles.len() - zeros.len()));
    let num = zeros.iter().fold(one, |acc, &z| acc * (fs2 - z));
    let den = poles.iter().fold(one, |acc, &p| acc * (fs2 - p));
    let gain = gain * (num / den).re;

    Ok(Sos {
        sections: pair_sections(&zd, &pd, gain),
    })
}

/// Group roots into second-order sections.
fn pair_sections(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> Vec<[f64; 6]> {
    const IMAG_TOL: f64 = 1e-10;

    let mut denominators: Vec<[f64; 3]> = poles
        .iter()
        .filter(|p| p.im > IMAG_TOL)
        .map(|p| [1.0, -2.0 * p.re, p.norm_sqr()])
        .collect();
    let mut real_poles: Vec<f64> = poles
        .iter()
        .filter(|p| p.im.abs() <= IMAG_TOL)
        .map(|p| p.re)
        .collect();
    real_poles.sort_by(f64::total_cmp);
    denominators.extend(real_poles.chunks(2).map(real_pair));

    // Butterworth zeros all lie on the real axis (z = 1 or z = -1)
    let mut real_zeros: Vec<f64> = zeros.iter().map(|z| z.re).collect();
    real_zeros.sort_by(f64::total_cmp);
    let mut numerators = Vec::with_capacity(denominators.len());
    let (mut lo, mut hi) = (0, real_zeros.len());
    while hi - lo >= 2 {
        numerators.push(real_pair(&[real_zeros[lo], real_zeros[hi - 1]]));
        lo += 1;
        hi -= 1;
    }
    if hi > lo {
        numerators.push(real_pair(&real_zeros[lo..hi]));
    }
    numerators.resize(denominators.len(), [1.0, 0.0, 0.0]);

    numerators
        .into_iter()
        .zip(denominators)
        .enumerate()
        .map(|(i, (b, a))| {
            let k = if i == 0 { gain } else { 1.0 };
            [k * b[0], k * b[1], k * b[2], a[0], a[1], a[2]]
        })
        .collect()
}

/// Monic polynomial with one or two real roots.
fn real_pair(roots: &[f64]) -> [f64; 3] {
    match roots {
        [r] => [1.0, -r, 0.0],
        [r1, r2] => [1.0, -(r1 + r2), r1 * r2],
        _ => [1.0, 0.0, 0.0],
    }
}

/// Second-order high-pass removing gravity and DC bias.
///
/// Causal mode runs a single pass; non-causal mode is zero-phase and needs
/// more samples than the edge padding.
pub fn highpass_gravity(x: &[f64], config: &FilterConfig, causal: bool) -> Result<Vec<f64>> {
    let sos = butterworth(
        config.highpass_order,
        Band::Highpass(config.highpass_cutoff),
        None,
    )?;
    if causal {
        Ok(sos.filter(x))
    } else {
        sos.filtfilt(x)
    }
}

/// Causal band-pass isolating the human movement band.
pub fn bandpass_movement(x: &[f64], fs: f64, config: &FilterConfig) -> Result<Vec<f64>> {
    let sos = butterworth(
        config.bandpass_order,
        Band::Bandpass(config.bandpass_low_hz, config.bandpass_high_hz),
        Some(fs),
    )?;
    Ok(sos.filter(x))
}
