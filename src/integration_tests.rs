//! End-to-end tests over synthetic recordings: reading, segmentation,
//! features, folds, autocorrelation and counts working together.

use std::collections::BTreeMap;
use std::fs;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::{format_timestamp, read_all, LimbRecordings};
use crate::features::{FixedTieBreak, RandomTieBreak, FEATURE_COLUMNS};
use crate::loso::{inner_loso_split, outer_loso_split};
use crate::pipeline::{
    extract_features, limb_counts, rater_autocorrelation, summarize, PipelineConfig,
};
use crate::tilt::{tilt_for_all_subjects, TILT_CHANNEL};
use crate::types::{Limb, TimeSeries};

const PERIOD_US: i64 = 20_000;

/// A 50 Hz recording made of runs `(start_us, samples)`, arm held level and
/// still, with raters split two against two.
fn recording(runs: &[(i64, usize)]) -> TimeSeries {
    let timestamps: Vec<i64> = runs
        .iter()
        .flat_map(|&(start, n)| (0..n as i64).map(move |i| start + i * PERIOD_US))
        .collect();
    let n = timestamps.len();
    TimeSeries::from_channels(
        timestamps,
        vec![
            ("ax", (0..n).map(|i| 0.01 * (i % 7) as f64).collect()),
            ("ay", vec![0.0; n]),
            ("az", vec![1.0; n]),
            ("gx", vec![0.0; n]),
            ("gy", vec![0.0; n]),
            ("gz", vec![0.0; n]),
            ("r1", vec![1.0; n]),
            ("r2", vec![1.0; n]),
            ("g1", vec![0.0; n]),
            ("g2", vec![0.0; n]),
        ],
    )
    .unwrap()
}

/// Three subjects on one limb:
/// - 1: one 3 s run (151 rows)
/// - 2: two 2 s runs 5 s apart (2 x 101 rows)
/// - 3: a 4 s run (201 rows) then a 0.5 s fragment (26 rows) that is dropped
fn three_subjects() -> BTreeMap<Limb, LimbRecordings> {
    let mut left = LimbRecordings::new();
    left.insert(1, recording(&[(0, 151)]));
    left.insert(2, recording(&[(0, 101), (7_000_000, 101)]));
    left.insert(3, recording(&[(0, 201), (7_000_000, 26)]));
    let mut raw = BTreeMap::new();
    raw.insert(Limb::Left, left);
    raw
}

#[test]
fn test_end_to_end_segmentation_and_features() {
    let raw = three_subjects();
    let input_rows: usize = raw[&Limb::Left].values().map(TimeSeries::len).sum();
    assert_eq!(input_rows, 580);

    let config = PipelineConfig::default();
    let dataset = summarize(&raw, &config).unwrap();

    let labels: Vec<u32> = dataset.subject_segments(Limb::Left, 2).map(|(s, _)| s).collect();
    assert_eq!(labels, vec![0, 1]);
    assert_eq!(dataset.subject_segments(Limb::Left, 3).count(), 1);
    assert_eq!(dataset.total_rows(), input_rows - 26);
    assert_eq!(dataset.report(Limb::Left, 3).unwrap().discarded_rows(), 26);

    let tables = extract_features(&dataset, &config, &mut FixedTieBreak(true)).unwrap();
    let table = &tables[&Limb::Left];
    assert_eq!(table.len(), dataset.total_rows());
    // Every vote is a 2-2 tie
    assert!(table.uluse().iter().all(|&u| u == 1.0));

    let subject2: Vec<u32> = table
        .rows
        .iter()
        .filter(|r| r.subject == 2)
        .map(|r| r.segment)
        .collect();
    assert_eq!(subject2.len(), 202);
    assert_eq!(subject2.iter().filter(|&&s| s == 1).count(), 101);

    // Windows restart at a segment boundary
    let first_of_second = table
        .rows
        .iter()
        .find(|r| r.subject == 2 && r.segment == 1)
        .unwrap();
    assert_eq!(first_of_second.features.axes[0].var, 0.0);
    assert_eq!(first_of_second.features.entropy, 0.0);

    let mut out = Vec::new();
    table.write_csv(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), table.len() + 1);
    let header = text.lines().next().unwrap();
    assert_eq!(header.split(',').count(), 3 + 3 + FEATURE_COLUMNS.len());
}

#[test]
fn test_windowed_label_column_in_extracted_features() {
    let config = PipelineConfig {
        label_window: Some(10),
        ..PipelineConfig::default()
    };
    let dataset = summarize(&three_subjects(), &config).unwrap();
    let tables = extract_features(&dataset, &config, &mut FixedTieBreak(true)).unwrap();
    let table = &tables[&Limb::Left];
    // Ties everywhere, so smoothing keeps every label at 1
    assert!(table.rows.iter().all(|r| r.uluse_windowed == Some(1.0)));

    let mut out = Vec::new();
    table.write_csv(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(header.split(',').count(), 3 + 3 + FEATURE_COLUMNS.len() + 1);
    assert!(header.ends_with(",uluse_w"));
}

#[test]
fn test_seeded_tie_break_is_reproducible() {
    let config = PipelineConfig::default();
    let dataset = summarize(&three_subjects(), &config).unwrap();

    let run = |seed: u64| {
        let mut tie_break = RandomTieBreak(ChaCha8Rng::seed_from_u64(seed));
        extract_features(&dataset, &config, &mut tie_break).unwrap()[&Limb::Left].uluse()
    };
    let a = run(11);
    assert_eq!(a, run(11));
    assert!(a.contains(&0.0) && a.contains(&1.0));
}

#[test]
fn test_loso_folds_over_feature_table() {
    let config = PipelineConfig::default();
    let dataset = summarize(&three_subjects(), &config).unwrap();
    let tables = extract_features(&dataset, &config, &mut FixedTieBreak(false)).unwrap();
    let subjects = tables[&Limb::Left].subjects();

    let folds = outer_loso_split(&subjects);
    assert_eq!(folds.len(), 3);
    let sizes: Vec<usize> = folds.iter().map(|f| f.validation.len()).collect();
    assert_eq!(sizes, vec![151, 202, 201]);

    let mut covered: Vec<usize> = folds.iter().flat_map(|f| f.validation.clone()).collect();
    covered.sort_unstable();
    assert_eq!(covered, (0..subjects.len()).collect::<Vec<_>>());

    let inner = inner_loso_split(&folds[0].train_subjects(&subjects));
    assert_eq!(inner.len(), 2);
    assert_eq!(inner[0].subject, 2);
    assert_eq!(inner[0].validation.len() + inner[0].train.len(), 403);
    assert_eq!(inner[0].validation, (0..202).collect::<Vec<_>>());
}

#[test]
fn test_rater_autocorrelation_cutoff() {
    let dataset = summarize(&three_subjects(), &PipelineConfig::default()).unwrap();

    let config = PipelineConfig {
        autocorr_cutoff: 150,
        ..PipelineConfig::default()
    };
    let summary = &rater_autocorrelation(&dataset, &config).unwrap()[&Limb::Left];
    // Both 101-row segments of subject 2 are too short
    assert_eq!((summary.retained, summary.discarded), (2, 2));
    assert_eq!(summary.values.len(), 2 * 4);
    // Constant rater labels correlate to zeros
    assert!(summary.values.iter().all(|v| v.iter().all(|&x| x == 0.0)));
}

#[test]
fn test_tilt_over_segmented_dataset() {
    let dataset = summarize(&three_subjects(), &PipelineConfig::default()).unwrap();
    let tilts = tilt_for_all_subjects(&dataset, Limb::Left, "az", 1, true).unwrap();
    assert_eq!(tilts.len(), 3);
    assert_eq!(tilts[&2].len(), 202);
    assert!(tilts[&3]
        .channel(TILT_CHANNEL)
        .unwrap()
        .iter()
        .all(|t| (t - 90.0).abs() < 1e-9));
}

#[test]
fn test_still_level_arm_gives_zero_counts() {
    // Two minutes at 50 Hz, no motion at all
    let n = 6000;
    let zeros = vec![0.0; n];
    let still = TimeSeries::from_channels(
        (0..n as i64).map(|i| i * PERIOD_US).collect(),
        vec![
            ("ax", zeros.clone()),
            ("ay", zeros.clone()),
            ("az", vec![1.0; n]),
            ("gx", zeros.clone()),
            ("gy", zeros.clone()),
            ("gz", zeros),
        ],
    )
    .unwrap();
    let mut left = LimbRecordings::new();
    left.insert(5, still);

    let counts = limb_counts(&left, &PipelineConfig::default()).unwrap();
    let vm = &counts[&5];
    assert!(vm.len() >= 119);
    assert!(vm.counts[..4].iter().all(Option::is_none));
    assert!(vm.counts[4..].iter().all(|c| *c == Some(0.0)));
}

#[test]
fn test_read_all_from_directory() {
    let base = std::env::temp_dir().join(format!("gmac-e2e-{}", std::process::id()));
    fs::create_dir_all(base.join("control")).unwrap();
    fs::create_dir_all(base.join("patient")).unwrap();

    let mut left = String::from("time,subject,ax,ay,az\n");
    for (subject, start) in [(1, 0i64), (2, 0)] {
        for i in 0..60 {
            left.push_str(&format!(
                "{},{subject},0.0,0.0,1.0\n",
                format_timestamp(1_600_000_000_000_000 + start + i * PERIOD_US)
            ));
        }
    }
    fs::write(base.join("control/left.csv"), left).unwrap();
    for file in ["control/right.csv", "patient/affected.csv", "patient/unaffected.csv"] {
        fs::write(base.join(file), "time,subject,ax,ay,az\n").unwrap();
    }

    let raw = read_all(&base).unwrap();
    assert_eq!(raw.len(), 4);
    assert_eq!(raw[&Limb::Left].len(), 2);
    assert!(raw[&Limb::Affected].is_empty());

    let dataset = summarize(&raw, &PipelineConfig::default()).unwrap();
    assert_eq!(dataset.limbs(), vec![Limb::Left]);
    assert_eq!(dataset.total_rows(), 120);

    fs::remove_dir_all(&base).unwrap();
}
