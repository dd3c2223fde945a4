//! Orientation Estimation using the Madgwick IMU filter.
//!
//! This module estimates the attitude of a wrist-worn sensor by fusing
//! accelerometer and gyroscope data with the Madgwick gradient descent
//! filter, then rotates each acceleration sample into the earth frame and
//! removes gravity.
//!
//! The filter is a fold: every sample's orientation depends on the previous
//! one. The fold restarts at identity for every continuous segment, so no
//! orientation is ever carried across a recording gap.
//!
//! Reference: Madgwick, S. O. H. (2010). "An efficient orientation filter
//! for inertial and inertial/magnetic sensor arrays."

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GmacError, Result};
use crate::segmentation::continuous_segments;
use crate::types::{norm3, ImuSample, TimeSeries};

/// A simple quaternion representation for rotation.
///
/// Format: (w, x, y, z) where w is the scalar part.
/// Unit quaternions represent rotations in 3D space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    /// Scalar (real) part
    pub w: f64,
    /// Vector part (x, y, z)
    pub xyz: [f64; 3],
}

impl Quaternion {
    /// Create a quaternion from components.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, xyz: [x, y, z] }
    }

    /// Identity quaternion (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Euclidean norm of the four components.
    pub fn norm(&self) -> f64 {
        (self.w * self.w
            + self.xyz[0] * self.xyz[0]
            + self.xyz[1] * self.xyz[1]
            + self.xyz[2] * self.xyz[2])
            .sqrt()
    }

    /// Scale to unit length. A zero quaternion is left unchanged.
    pub fn normalize(&mut self) {
        let len = self.norm();
        if len > 0.0 {
            self.w /= len;
            self.xyz[0] /= len;
            self.xyz[1] /= len;
            self.xyz[2] /= len;
        }
    }

    /// Hamilton product: result = self * other.
    pub fn multiply(&self, other: &Quaternion) -> Quaternion {
        let [x1, y1, z1] = self.xyz;
        let [x2, y2, z2] = other.xyz;
        Quaternion::new(
            self.w * other.w - x1 * x2 - y1 * y2 - z1 * z2,
            self.w * x2 + x1 * other.w + y1 * z2 - z1 * y2,
            self.w * y2 - x1 * z2 + y1 * other.w + z1 * x2,
            self.w * z2 + x1 * y2 - y1 * x2 + z1 * other.w,
        )
    }

    /// Rotation matrix (3x3), rows of the sensor-to-earth rotation.
    pub fn to_rotation_matrix(&self) -> [[f64; 3]; 3] {
        let w = self.w;
        let [x, y, z] = self.xyz;

        [
            [
                1.0 - 2.0 * (y * y + z * z),
                2.0 * (x * y - w * z),
                2.0 * (x * z + w * y),
            ],
            [
                2.0 * (x * y + w * z),
                1.0 - 2.0 * (x * x + z * z),
                2.0 * (y * z - w * x),
            ],
            [
                2.0 * (x * z - w * y),
                2.0 * (y * z + w * x),
                1.0 - 2.0 * (x * x + y * y),
            ],
        ]
    }

    /// Rotate a vector from the sensor frame to the earth frame.
    pub fn rotate_vector(&self, v: [f64; 3]) -> [f64; 3] {
        let r = self.to_rotation_matrix();
        [
            r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
            r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
            r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
        ]
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Parameters for orientation estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrientationConfig {
    /// Madgwick filter gain (beta parameter).
    /// Higher values converge faster towards the accelerometer's gravity
    /// estimate at the cost of more noise. Default: 0.5.
    pub beta: f64,

    /// Sampling rate of the input in Hz. Default: 30.
    pub frequency_hz: f64,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            beta: 0.5,
            frequency_hz: 30.0,
        }
    }
}

impl OrientationConfig {
    /// Reject non-positive rates and gains.
    pub fn validate(&self) -> Result<()> {
        if !(self.frequency_hz > 0.0) {
            return Err(GmacError::invalid(
                "frequency_hz",
                format!("{} must be positive", self.frequency_hz),
            ));
        }
        if !(self.beta > 0.0) {
            return Err(GmacError::invalid(
                "beta",
                format!("{} must be positive", self.beta),
            ));
        }
        Ok(())
    }
}

/// Earth-frame gravity in g.
const GRAVITY: [f64; 3] = [0.0, 0.0, 1.0];

/// Madgwick IMU filter (accelerometer + gyroscope).
#[derive(Debug, Clone)]
pub struct MadgwickAHRS {
    /// Current attitude quaternion (w, x, y, z).
    quaternion: Quaternion,

    /// Configuration parameters.
    config: OrientationConfig,
}

impl MadgwickAHRS {
    /// Create a new filter starting at identity.
    pub fn new(config: OrientationConfig) -> Self {
        Self {
            quaternion: Quaternion::identity(),
            config,
        }
    }

    /// Create with default configuration.
    pub fn default_filter() -> Self {
        Self::new(OrientationConfig::default())
    }

    /// Advance the orientation by one sample.
    pub fn update(&mut self, sample: &ImuSample) -> Quaternion {
        self.quaternion = update_imu(
            self.quaternion,
            sample.gyro,
            sample.accel,
            self.config.beta,
            1.0 / self.config.frequency_hz,
        );
        self.quaternion
    }

    /// Get the current attitude quaternion.
    pub fn quaternion(&self) -> Quaternion {
        self.quaternion
    }

    /// Earth-frame acceleration of a sensor-frame reading, gravity removed.
    pub fn linear_acceleration(&self, accel: [f64; 3]) -> [f64; 3] {
        let earth = self.quaternion.rotate_vector(accel);
        [
            earth[0] - GRAVITY[0],
            earth[1] - GRAVITY[1],
            earth[2] - GRAVITY[2],
        ]
    }

}

impl Default for MadgwickAHRS {
    fn default() -> Self {
        Self::default_filter()
    }
}

/// One Madgwick IMU step from orientation `q`.
///
/// Without a positive, finite gyroscope norm the orientation is returned
/// unchanged. The accelerometer correction is skipped when its norm is not
/// positive (including missing readings).
pub fn update_imu(q: Quaternion, gyro: [f64; 3], accel: [f64; 3], beta: f64, dt: f64) -> Quaternion {
    let gyro_norm = norm3(gyro);
    if !(gyro_norm > 0.0 && gyro_norm.is_finite()) {
        return q;
    }

    // Rate of change of quaternion from gyroscope
    let omega = Quaternion::new(0.0, gyro[0], gyro[1], gyro[2]);
    let rate = q.multiply(&omega);
    let mut q_dot = [0.5 * rate.w, 0.5 * rate.xyz[0], 0.5 * rate.xyz[1], 0.5 * rate.xyz[2]];

    let accel_norm = norm3(accel);
    if accel_norm > 0.0 {
        let ax = accel[0] / accel_norm;
        let ay = accel[1] / accel_norm;
        let az = accel[2] / accel_norm;

        let mut unit = q;
        unit.normalize();
        let (q0, q1, q2, q3) = (unit.w, unit.xyz[0], unit.xyz[1], unit.xyz[2]);

        // Objective function
        let f1 = 2.0 * (q1 * q3 - q0 * q2) - ax;
        let f2 = 2.0 * (q0 * q1 + q2 * q3) - ay;
        let f3 = 2.0 * (0.5 - q1 * q1 - q2 * q2) - az;

        // Gradient J^T f
        let s0 = -2.0 * q2 * f1 + 2.0 * q1 * f2;
        let s1 = 2.0 * q3 * f1 + 2.0 * q0 * f2 - 4.0 * q1 * f3;
        let s2 = -2.0 * q0 * f1 + 2.0 * q3 * f2 - 4.0 * q2 * f3;
        let s3 = 2.0 * q1 * f1 + 2.0 * q2 * f2;

        let step_norm = (s0 * s0 + s1 * s1 + s2 * s2 + s3 * s3).sqrt();
        if step_norm > 0.0 {
            q_dot[0] -= beta * s0 / step_norm;
            q_dot[1] -= beta * s1 / step_norm;
            q_dot[2] -= beta * s2 / step_norm;
            q_dot[3] -= beta * s3 / step_norm;
        }
    }

    let mut next = Quaternion::new(
        q.w + q_dot[0] * dt,
        q.xyz[0] + q_dot[1] * dt,
        q.xyz[1] + q_dot[2] * dt,
        q.xyz[2] + q_dot[3] * dt,
    );
    next.normalize();
    next
}

/// Gravity-free earth-frame acceleration for a six-channel IMU series.
///
/// Reads `ax..az` (g) and `gx..gz` (rad/s) and returns a series with the
/// same timestamps and channels `ax`, `ay`, `az`. The filter restarts at
/// identity for each continuous run (gap > `tjump_s`). Rows with missing
/// accelerometer values come out as NaN.
pub fn linear_acceleration(
    series: &TimeSeries,
    config: &OrientationConfig,
    tjump_s: f64,
) -> Result<TimeSeries> {
    config.validate()?;
    let names: Vec<String> = ["ax", "ay", "az"].iter().map(|s| s.to_string()).collect();

    let runs = continuous_segments(series, tjump_s);
    let mut parts = Vec::with_capacity(runs.len());
    for run in &runs {
        let mut filter = MadgwickAHRS::new(config.clone());
        let mut columns = vec![Vec::with_capacity(run.len()); 3];
        for sample in run.imu_samples()? {
            filter.update(&sample);
            let linear = filter.linear_acceleration(sample.accel);
            for (column, value) in columns.iter_mut().zip(linear) {
                column.push(value);
            }
        }
        parts.push(TimeSeries::from_parts(
            run.timestamps().to_vec(),
            names.clone(),
            columns,
        ));
    }
    debug!(runs = runs.len(), rows = series.len(), "estimated linear acceleration");

    TimeSeries::concat(&names, parts)
}
