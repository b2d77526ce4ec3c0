use chrono::NaiveDate;
use thiserror::Error;

/// Analysis settings that cannot produce a meaningful network.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("threshold must be a finite value in [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("min_overlap must be at least 2 observations, got {0}")]
    MinOverlapTooSmall(usize),
}

/// Why a daily return row was dropped before entering a month panel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowRejection {
    #[error("non-finite log return for {asset} on {day}")]
    NonFinite { asset: String, day: NaiveDate },

    #[error("duplicate observation for {asset} on {day}, keeping the first")]
    DuplicateObservation { asset: String, day: NaiveDate },
}

/// Why a pair of assets has no correlation row for a month.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairExclusion {
    #[error("only {overlap} shared observations, need {required}")]
    InsufficientData { overlap: usize, required: usize },

    #[error("zero variance over the shared observations")]
    DegenerateVariance,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid month {0:?}, expected YYYY-MM")]
pub struct MonthParseError(pub String);
