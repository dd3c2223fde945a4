//! Recording ingestion and the segment-keyed dataset.
//!
//! Raw recordings live in one CSV file per limb:
//!
//! ```text
//! <base>/control/left.csv       <base>/patient/affected.csv
//! <base>/control/right.csv      <base>/patient/unaffected.csv
//! ```
//!
//! Each file has a `time` column (ISO-8601 date-time), a `subject` column
//! and any number of numeric channels. Rows are grouped by subject; within a
//! subject timestamps must be strictly increasing.
//!
//! After segmentation every continuous segment is stored under its
//! [`SegmentKey`] in a single ordered map, so batch stages iterate
//! (limb, subject, segment) in a stable order.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::{GmacError, Result};
use crate::segmentation::{SegmentationReport, SegmentedSeries};
use crate::types::{Limb, SegmentId, SegmentKey, SubjectId, SubjectType, TimeSeries, TimestampUs};

/// Name of the timestamp column.
pub const TIME_COLUMN: &str = "time";

/// Name of the subject column.
pub const SUBJECT_COLUMN: &str = "subject";

/// One limb's recordings, keyed by subject.
pub type LimbRecordings = BTreeMap<SubjectId, TimeSeries>;

/// Parse an ISO-8601 timestamp into microseconds since the epoch.
///
/// Accepts RFC 3339 with an offset, or a naive date-time (read as UTC) with
/// either a `T` or a space separator and optional fractional seconds.
pub fn parse_timestamp(text: &str) -> Result<TimestampUs> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_micros());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_micros())
        .ok_or_else(|| GmacError::TimestampParse(text.to_string()))
}

/// Format a timestamp as a naive UTC date-time with microseconds, in the
/// layout [`parse_timestamp`] reads back.
pub fn format_timestamp(t: TimestampUs) -> String {
    match DateTime::<Utc>::from_timestamp_micros(t) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        None => t.to_string(),
    }
}

fn parse_subject(text: &str) -> Result<SubjectId> {
    let text = text.trim();
    if let Ok(id) = text.parse::<SubjectId>() {
        return Ok(id);
    }
    // Integer subjects written as floats ("3.0")
    match text.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= SubjectId::MAX as f64 => Ok(v as SubjectId),
        _ => Err(GmacError::invalid(
            "subject",
            format!("`{text}` is not a subject identifier"),
        )),
    }
}

fn parse_value(text: &str, channel: &str) -> Result<f64> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(f64::NAN);
    }
    text.parse::<f64>().map_err(|_| {
        GmacError::invalid("value", format!("`{text}` in channel `{channel}` is not a number"))
    })
}

/// Read one limb's CSV recording, grouped by subject.
pub fn read_limb_csv<R: Read>(reader: R) -> Result<LimbRecordings> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| GmacError::MissingChannel(name.to_string()))
    };
    let time_idx = position(TIME_COLUMN)?;
    let subject_idx = position(SUBJECT_COLUMN)?;
    let channels: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != time_idx && i != subject_idx)
        .map(|(i, h)| (i, h.trim().to_string()))
        .collect();

    let mut grouped: BTreeMap<SubjectId, (Vec<TimestampUs>, Vec<Vec<f64>>)> = BTreeMap::new();
    for record in csv_reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let subject = parse_subject(field(subject_idx))?;
        let timestamp = parse_timestamp(field(time_idx))?;

        let (timestamps, columns) = grouped
            .entry(subject)
            .or_insert_with(|| (Vec::new(), vec![Vec::new(); channels.len()]));
        timestamps.push(timestamp);
        for ((idx, name), column) in channels.iter().zip(columns.iter_mut()) {
            column.push(parse_value(field(*idx), name)?);
        }
    }

    let names: Vec<String> = channels.into_iter().map(|(_, name)| name).collect();
    grouped
        .into_iter()
        .map(|(subject, (timestamps, columns))| {
            TimeSeries::new(timestamps, names.clone(), columns).map(|series| (subject, series))
        })
        .collect()
}

/// Read both limbs of a subject category from `base`.
pub fn read_data(subject_type: SubjectType, base: &Path) -> Result<Vec<(Limb, LimbRecordings)>> {
    subject_type
        .limbs()
        .into_iter()
        .map(|limb| -> Result<(Limb, LimbRecordings)> {
            let path = base
                .join(subject_type.as_str())
                .join(format!("{}.csv", limb.as_str()));
            let file = std::fs::File::open(&path)?;
            let recordings = read_limb_csv(file)?;
            debug!(
                path = %path.display(),
                subjects = recordings.len(),
                "read limb recording"
            );
            Ok((limb, recordings))
        })
        .collect()
}

/// Read all four limbs (controls and patients) from `base`.
pub fn read_all(base: &Path) -> Result<BTreeMap<Limb, LimbRecordings>> {
    let mut all = BTreeMap::new();
    for subject_type in [SubjectType::Control, SubjectType::Patient] {
        all.extend(read_data(subject_type, base)?);
    }
    Ok(all)
}

/// Segmented recordings of every limb and subject.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    segments: BTreeMap<SegmentKey, TimeSeries>,
    reports: BTreeMap<(Limb, SubjectId), SegmentationReport>,
}

impl Dataset {
    /// An empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one segment. Returns the series previously under `key`.
    pub fn insert(&mut self, key: SegmentKey, series: TimeSeries) -> Option<TimeSeries> {
        self.segments.insert(key, series)
    }

    /// Store every segment of a subject's segmented recording.
    pub fn insert_subject(&mut self, limb: Limb, subject: SubjectId, segmented: &SegmentedSeries) {
        for (segment, series) in segmented.split() {
            self.segments
                .insert(SegmentKey::new(limb, subject, segment), series);
        }
        self.reports.insert((limb, subject), segmented.report);
    }

    /// Look up a single segment.
    pub fn segment(&self, limb: Limb, subject: SubjectId, segment: SegmentId) -> Option<&TimeSeries> {
        self.segments.get(&SegmentKey::new(limb, subject, segment))
    }

    /// All segments in (limb, subject, segment) order.
    pub fn iter(&self) -> impl Iterator<Item = (&SegmentKey, &TimeSeries)> {
        self.segments.iter()
    }

    /// Keys in iteration order.
    pub fn keys(&self) -> impl Iterator<Item = &SegmentKey> {
        self.segments.keys()
    }

    /// Segments of one limb, ordered by subject then segment.
    pub fn limb(&self, limb: Limb) -> impl Iterator<Item = (&SegmentKey, &TimeSeries)> {
        self.segments.range(
            SegmentKey::new(limb, SubjectId::MIN, SegmentId::MIN)
                ..=SegmentKey::new(limb, SubjectId::MAX, SegmentId::MAX),
        )
    }

    /// Segments of one subject on one limb, in segment order.
    pub fn subject_segments(
        &self,
        limb: Limb,
        subject: SubjectId,
    ) -> impl Iterator<Item = (SegmentId, &TimeSeries)> {
        self.segments
            .range(
                SegmentKey::new(limb, subject, SegmentId::MIN)
                    ..=SegmentKey::new(limb, subject, SegmentId::MAX),
            )
            .map(|(key, series)| (key.segment, series))
    }

    /// Limbs present, in order.
    pub fn limbs(&self) -> Vec<Limb> {
        let mut limbs: Vec<Limb> = self.segments.keys().map(|k| k.limb).collect();
        limbs.dedup();
        limbs
    }

    /// Subjects present on a limb, ascending.
    pub fn subjects(&self, limb: Limb) -> Vec<SubjectId> {
        let mut subjects: Vec<SubjectId> = self.limb(limb).map(|(k, _)| k.subject).collect();
        subjects.dedup();
        subjects
    }

    /// Segmentation report of a subject's recording, if it was segmented here.
    pub fn report(&self, limb: Limb, subject: SubjectId) -> Option<&SegmentationReport> {
        self.reports.get(&(limb, subject))
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True when no segment is stored.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total rows over all segments.
    pub fn total_rows(&self) -> usize {
        self.segments.values().map(TimeSeries::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::{assign_segments, SegmentationConfig};

    const CSV: &str = "\
time,subject,ax,ay,r1
2021-03-01 10:00:00.00,2,0.1,0.2,1
2021-03-01 10:00:00.02,2,0.3,,0
2021-03-01 10:00:00.00,1,1.0,2.0,1
2021-03-01T10:00:00.04,2,0.5,0.6,1
";

    #[test]
    fn test_parse_timestamp_formats() {
        let base = parse_timestamp("2021-03-01 10:00:00").unwrap();
        assert_eq!(parse_timestamp("2021-03-01T10:00:00.02").unwrap(), base + 20_000);
        assert_eq!(parse_timestamp("2021-03-01T10:00:00Z").unwrap(), base);
        assert_eq!(parse_timestamp("2021-03-01T11:00:00+01:00").unwrap(), base);
        assert_eq!(format_timestamp(base + 20_000), "2021-03-01 10:00:00.020000");
        assert_eq!(parse_timestamp(&format_timestamp(base + 7)).unwrap(), base + 7);
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(GmacError::TimestampParse(_))
        ));
    }

    #[test]
    fn test_read_limb_csv_groups_by_subject() {
        let recordings = read_limb_csv(CSV.as_bytes()).unwrap();
        assert_eq!(recordings.keys().copied().collect::<Vec<_>>(), vec![1, 2]);

        let s2 = &recordings[&2];
        assert_eq!(s2.len(), 3);
        assert_eq!(s2.channel_names(), &["ax", "ay", "r1"]);
        assert_eq!(s2.channel("ax").unwrap(), &[0.1, 0.3, 0.5]);
        assert!(s2.channel("ay").unwrap()[1].is_nan());
        assert_eq!(s2.timestamps()[2] - s2.timestamps()[0], 40_000);
    }

    #[test]
    fn test_read_limb_csv_rejects_bad_input() {
        let missing_subject = "time,ax\n2021-03-01 10:00:00,1\n";
        assert!(matches!(
            read_limb_csv(missing_subject.as_bytes()),
            Err(GmacError::MissingChannel(_))
        ));

        let backwards = "time,subject,ax\n2021-03-01 10:00:01,1,0\n2021-03-01 10:00:00,1,0\n";
        assert!(matches!(
            read_limb_csv(backwards.as_bytes()),
            Err(GmacError::NonMonotonicTimestamps { .. })
        ));

        let bad_value = "time,subject,ax\n2021-03-01 10:00:00,1,abc\n";
        assert!(read_limb_csv(bad_value.as_bytes()).is_err());
    }

    #[test]
    fn test_read_data_missing_directory() {
        let base = std::env::temp_dir().join("gmac-sensing-no-such-dir");
        assert!(matches!(
            read_data(SubjectType::Control, &base),
            Err(GmacError::Io(_))
        ));
    }

    #[test]
    fn test_read_data_layout() {
        let base = std::env::temp_dir().join(format!("gmac-sensing-layout-{}", std::process::id()));
        let dir = base.join("patient");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("affected.csv"), CSV).unwrap();
        std::fs::write(dir.join("unaffected.csv"), CSV).unwrap();

        let limbs = read_data(SubjectType::Patient, &base).unwrap();
        assert_eq!(limbs.len(), 2);
        assert_eq!(limbs[0].0, Limb::Affected);
        assert_eq!(limbs[1].0, Limb::Unaffected);
        assert_eq!(limbs[1].1.len(), 2);

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_dataset_lookup_and_order() {
        let timestamps: Vec<i64> = (0..60).map(|i| i * 20_000).collect();
        let mut ts = timestamps.clone();
        ts.extend(timestamps.iter().map(|t| t + 5_000_000));
        let series = TimeSeries::from_channels(ts, vec![("ax", vec![0.0; 120])]).unwrap();
        let config = SegmentationConfig {
            gap_threshold_s: 0.02,
            min_duration_s: 0.5,
        };
        let segmented = assign_segments(&series, &config);

        let mut dataset = Dataset::new();
        dataset.insert_subject(Limb::Right, 7, &segmented);
        dataset.insert_subject(Limb::Left, 3, &segmented);

        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.total_rows(), 240);
        assert_eq!(dataset.limbs(), vec![Limb::Left, Limb::Right]);
        assert_eq!(dataset.subjects(Limb::Right), vec![7]);
        assert!(dataset.segment(Limb::Left, 3, 1).is_some());
        assert!(dataset.segment(Limb::Left, 7, 0).is_none());
        assert_eq!(dataset.report(Limb::Left, 3).unwrap().segments_retained, 2);

        let keys: Vec<SegmentKey> = dataset.keys().copied().collect();
        assert_eq!(keys[0], SegmentKey::new(Limb::Left, 3, 0));
        assert_eq!(keys[3], SegmentKey::new(Limb::Right, 7, 1));

        let segments: Vec<SegmentId> = dataset
            .subject_segments(Limb::Right, 7)
            .map(|(seg, _)| seg)
            .collect();
        assert_eq!(segments, vec![0, 1]);
    }
}
