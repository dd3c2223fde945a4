//! Core data types for the GMAC sensing pipeline.
//!
//! This module defines the fundamental structures shared by every stage:
//! timestamped multi-channel series, subject and limb identities, and the
//! composite key that indexes per-segment data.
//!
//! Design principle: Types should make intent obvious. If a concept exists,
//! it gets a type. Never pass raw tuples or untyped collections across boundaries.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GmacError, Result};

/// Timestamp in microseconds since the Unix epoch.
pub type TimestampUs = i64;

/// Subject identifier as it appears in the `subject` column.
pub type SubjectId = u32;

/// Segment label assigned by the segmenter (0-based, temporal order).
pub type SegmentId = u32;

/// Microseconds in one second.
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Accelerometer channels (g).
pub const ACCEL_CHANNELS: [&str; 3] = ["ax", "ay", "az"];

/// Accelerometer followed by gyroscope (rad/s) channels.
pub const IMU_CHANNELS: [&str; 6] = ["ax", "ay", "az", "gx", "gy", "gz"];

/// Convert a duration in seconds to whole microseconds.
pub fn seconds_to_us(seconds: f64) -> i64 {
    (seconds * MICROS_PER_SECOND as f64).round() as i64
}

/// A single inertial measurement: three-axis accelerometer (g) and
/// three-axis gyroscope (rad/s).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Sample timestamp.
    pub timestamp_us: TimestampUs,

    /// Accelerometer reading [x, y, z] in g.
    pub accel: [f64; 3],

    /// Gyroscope reading [x, y, z] in rad/s.
    pub gyro: [f64; 3],
}

impl ImuSample {
    /// Creates a new IMU sample.
    pub fn new(timestamp_us: TimestampUs, accel: [f64; 3], gyro: [f64; 3]) -> Self {
        Self {
            timestamp_us,
            accel,
            gyro,
        }
    }
}

/// Euclidean norm of a 3-vector.
pub fn norm3(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// An ordered, timestamped sequence of samples with named channels.
///
/// Invariants (checked by [`TimeSeries::new`]):
/// - timestamps are strictly increasing
/// - every channel has exactly one value per timestamp
/// - channel names are unique
///
/// Missing values are stored as `NaN`. A series is never mutated in place by
/// the pipeline; every stage returns a new one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeries {
    timestamps: Vec<TimestampUs>,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl TimeSeries {
    /// Build a validated series from column-major data.
    pub fn new(
        timestamps: Vec<TimestampUs>,
        names: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(GmacError::ChannelMismatch(format!(
                "{} names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(GmacError::ChannelMismatch(format!(
                    "duplicate channel `{name}`"
                )));
            }
        }
        for (name, column) in names.iter().zip(&columns) {
            if column.len() != timestamps.len() {
                return Err(GmacError::LengthMismatch {
                    channel: name.clone(),
                    expected: timestamps.len(),
                    actual: column.len(),
                });
            }
        }
        if let Some(row) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(GmacError::NonMonotonicTimestamps { row: row + 1 });
        }

        Ok(Self {
            timestamps,
            names,
            columns,
        })
    }

    /// Convenience constructor from `(name, values)` pairs.
    pub fn from_channels(timestamps: Vec<TimestampUs>, channels: Vec<(&str, Vec<f64>)>) -> Result<Self> {
        let (names, columns): (Vec<String>, Vec<Vec<f64>>) = channels
            .into_iter()
            .map(|(name, values)| (name.to_string(), values))
            .unzip();
        Self::new(timestamps, names, columns)
    }

    /// An empty series carrying the given channel layout.
    pub fn empty(names: &[String]) -> Self {
        Self {
            timestamps: Vec::new(),
            names: names.to_vec(),
            columns: vec![Vec::new(); names.len()],
        }
    }

    /// Internal constructor for data whose invariants the caller guarantees.
    pub(crate) fn from_parts(
        timestamps: Vec<TimestampUs>,
        names: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> Self {
        debug_assert_eq!(names.len(), columns.len());
        debug_assert!(columns.iter().all(|c| c.len() == timestamps.len()));
        debug_assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        Self {
            timestamps,
            names,
            columns,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True when the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Sample timestamps.
    pub fn timestamps(&self) -> &[TimestampUs] {
        &self.timestamps
    }

    /// Channel names in column order.
    pub fn channel_names(&self) -> &[String] {
        &self.names
    }

    /// Whether a channel with this name exists.
    pub fn has_channel(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Values of a named channel.
    pub fn channel(&self, name: &str) -> Result<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
            .ok_or_else(|| GmacError::MissingChannel(name.to_string()))
    }

    /// All columns in channel order.
    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    /// Time from first to last sample (0 for fewer than two samples).
    pub fn span_us(&self) -> i64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    /// Contiguous row range as a new series.
    pub fn slice(&self, range: Range<usize>) -> TimeSeries {
        Self::from_parts(
            self.timestamps[range.clone()].to_vec(),
            self.names.clone(),
            self.columns.iter().map(|c| c[range.clone()].to_vec()).collect(),
        )
    }

    /// Rows at the given (increasing) indices as a new series.
    pub fn select_rows(&self, rows: &[usize]) -> TimeSeries {
        Self::from_parts(
            rows.iter().map(|&r| self.timestamps[r]).collect(),
            self.names.clone(),
            self.columns
                .iter()
                .map(|c| rows.iter().map(|&r| c[r]).collect())
                .collect(),
        )
    }

    /// Subset of channels, in the requested order.
    pub fn select_channels<S: AsRef<str>>(&self, names: &[S]) -> Result<TimeSeries> {
        let columns = names
            .iter()
            .map(|n| self.channel(n.as_ref()).map(|c| c.to_vec()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_parts(
            self.timestamps.clone(),
            names.iter().map(|n| n.as_ref().to_string()).collect(),
            columns,
        ))
    }

    /// Append a channel, returning the extended series.
    pub fn with_channel(mut self, name: &str, values: Vec<f64>) -> Result<TimeSeries> {
        if self.has_channel(name) {
            return Err(GmacError::ChannelMismatch(format!(
                "duplicate channel `{name}`"
            )));
        }
        if values.len() != self.len() {
            return Err(GmacError::LengthMismatch {
                channel: name.to_string(),
                expected: self.len(),
                actual: values.len(),
            });
        }
        self.names.push(name.to_string());
        self.columns.push(values);
        Ok(self)
    }

    /// Concatenate series sharing the channel layout `names`, in order.
    ///
    /// The result must remain strictly increasing in time.
    pub fn concat<I>(names: &[String], parts: I) -> Result<TimeSeries>
    where
        I: IntoIterator<Item = TimeSeries>,
    {
        let mut out = Self::empty(names);
        for part in parts {
            if part.names != out.names {
                return Err(GmacError::ChannelMismatch(format!(
                    "expected {:?}, found {:?}",
                    out.names, part.names
                )));
            }
            if let (Some(&last), Some(&first)) = (out.timestamps.last(), part.timestamps.first()) {
                if first <= last {
                    return Err(GmacError::NonMonotonicTimestamps {
                        row: out.timestamps.len(),
                    });
                }
            }
            out.timestamps.extend_from_slice(&part.timestamps);
            for (dst, src) in out.columns.iter_mut().zip(part.columns) {
                dst.extend(src);
            }
        }
        Ok(out)
    }

    /// Extract IMU samples from the six standard channels.
    pub fn imu_samples(&self) -> Result<Vec<ImuSample>> {
        let [ax, ay, az, gx, gy, gz] = IMU_CHANNELS.map(|name| self.channel(name));
        let (ax, ay, az, gx, gy, gz) = (ax?, ay?, az?, gx?, gy?, gz?);

        Ok((0..self.len())
            .map(|i| {
                ImuSample::new(
                    self.timestamps[i],
                    [ax[i], ay[i], az[i]],
                    [gx[i], gy[i], gz[i]],
                )
            })
            .collect())
    }
}

/// Category of a recorded subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    /// Healthy control, left and right limbs recorded.
    Control,
    /// Stroke patient, affected and unaffected limbs recorded.
    Patient,
}

impl SubjectType {
    /// The two limbs recorded for this subject category.
    pub fn limbs(&self) -> [Limb; 2] {
        match self {
            SubjectType::Control => [Limb::Left, Limb::Right],
            SubjectType::Patient => [Limb::Affected, Limb::Unaffected],
        }
    }

    /// Directory name used by the recording layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Control => "control",
            SubjectType::Patient => "patient",
        }
    }
}

impl FromStr for SubjectType {
    type Err = GmacError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control" => Ok(SubjectType::Control),
            "patient" => Ok(SubjectType::Patient),
            other => Err(GmacError::InvalidSubjectType(other.to_string())),
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded limb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Limb {
    /// Control subject, left arm.
    Left,
    /// Control subject, right arm.
    Right,
    /// Patient, affected arm.
    Affected,
    /// Patient, unaffected arm.
    Unaffected,
}

impl Limb {
    /// All limbs in dataset order.
    pub const ALL: [Limb; 4] = [Limb::Left, Limb::Right, Limb::Affected, Limb::Unaffected];

    /// File stem of this limb's recording.
    pub fn as_str(&self) -> &'static str {
        match self {
            Limb::Left => "left",
            Limb::Right => "right",
            Limb::Affected => "affected",
            Limb::Unaffected => "unaffected",
        }
    }

    /// Subject category that records this limb.
    pub fn subject_type(&self) -> SubjectType {
        match self {
            Limb::Left | Limb::Right => SubjectType::Control,
            Limb::Affected | Limb::Unaffected => SubjectType::Patient,
        }
    }
}

impl FromStr for Limb {
    type Err = GmacError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(Limb::Left),
            "right" => Ok(Limb::Right),
            "affected" | "aff" => Ok(Limb::Affected),
            "unaffected" | "unaff" => Ok(Limb::Unaffected),
            other => Err(GmacError::InvalidLimb(other.to_string())),
        }
    }
}

impl fmt::Display for Limb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity of one continuous recording segment.
///
/// Ordered lexicographically by (limb, subject, segment), which is the
/// iteration order of every batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentKey {
    /// Limb the segment was recorded on.
    pub limb: Limb,
    /// Subject identifier.
    pub subject: SubjectId,
    /// Segment label within the subject's recording.
    pub segment: SegmentId,
}

impl SegmentKey {
    /// Creates a new key.
    pub fn new(limb: Limb, subject: SubjectId, segment: SegmentId) -> Self {
        Self {
            limb,
            subject,
            segment,
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10} {:>3} {:>3}", self.limb, self.subject, self.segment)
    }
}
