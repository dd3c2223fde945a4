//! GMAC Upper-Limb-Use Sensing Library
//!
//! Turns wrist-worn IMU recordings of stroke patients and healthy controls
//! into the quantities used to detect upper-limb use: segmented recordings,
//! forearm tilt, vector-magnitude activity counts, windowed features with
//! rater-vote labels, label autocorrelation and leave-one-subject-out folds.
//!
//! # Data flow
//!
//! ```text
//! raw CSV ──▶ dataset ──▶ segmentation ──▶ features ──▶ FeatureTable ──▶ loso
//!                │                      └─▶ autocorr
//!                └─▶ resample ─▶ orientation ─▶ signal ─▶ magnitude (counts)
//! ```
//!
//! Nothing ever bridges a recording gap: resampling, filtering and the
//! orientation recurrence all restart on every continuous run.
//!
//! # Example
//!
//! ```ignore
//! use gmac_sensing::{dataset, pipeline, features::FixedTieBreak};
//!
//! let config = pipeline::PipelineConfig::default();
//! let raw = dataset::read_all(std::path::Path::new("data"))?;
//! let segmented = pipeline::summarize(&raw, &config)?;
//! let tables = pipeline::extract_features(&segmented, &config, &mut FixedTieBreak(false))?;
//! ```

pub mod autocorr;
pub mod dataset;
pub mod error;
pub mod features;
pub mod loso;
pub mod magnitude;
pub mod orientation;
pub mod pipeline;
pub mod resample;
pub mod segmentation;
pub mod signal;
pub mod tilt;
pub mod types;

#[cfg(test)]
mod integration_tests;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use dataset::Dataset;
pub use error::{GmacError, Result};
pub use features::{FeatureTable, FixedTieBreak, RandomTieBreak, TieBreak};
pub use loso::{inner_loso_split, outer_loso_split, LosoFold};
pub use pipeline::PipelineConfig;
pub use types::{ImuSample, Limb, SegmentKey, SubjectType, TimeSeries};
