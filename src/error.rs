//! Error types for the GMAC sensing pipeline.
//!
//! Degenerate statistics (zero-variance windows, single-sample KDE) are not
//! errors: they have defined fallback values in the modules that compute them.
//! Only malformed input and invalid configuration end up here.

/// Common result type for pipeline operations.
pub type Result<T> = std::result::Result<T, GmacError>;

/// Unified error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GmacError {
    /// Subject category outside {control, patient}. Fatal, never retried.
    #[error("invalid subject type `{0}`: use `control` or `patient` instead")]
    InvalidSubjectType(String),

    /// Unknown limb name.
    #[error("invalid limb `{0}`")]
    InvalidLimb(String),

    /// A numeric parameter outside its valid range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A required channel is not present in the series.
    #[error("missing channel `{0}`")]
    MissingChannel(String),

    /// Channel length does not match the timestamp count.
    #[error("channel `{channel}` has {actual} samples, expected {expected}")]
    LengthMismatch {
        /// Channel name
        channel: String,
        /// Expected sample count
        expected: usize,
        /// Actual sample count
        actual: usize,
    },

    /// Timestamps are not strictly increasing.
    #[error("timestamps must be strictly increasing (row {row})")]
    NonMonotonicTimestamps {
        /// First offending row
        row: usize,
    },

    /// Series with different channel layouts were combined.
    #[error("channel layout mismatch: {0}")]
    ChannelMismatch(String),

    /// Signal shorter than the zero-phase filter padding.
    #[error("signal of length {len} is too short, must be longer than {required}")]
    SignalTooShort {
        /// Signal length
        len: usize,
        /// Minimum exclusive length
        required: usize,
    },

    /// Timestamp text could not be parsed.
    #[error("cannot parse timestamp `{0}`")]
    TimestampParse(String),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GmacError {
    /// Shorthand for [`GmacError::InvalidParameter`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        GmacError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
