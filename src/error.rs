use std::fmt;

use thiserror::Error;

use crate::bootstrap::TrialFailure;

/// Unified error type for `rdstools` operations.
#[derive(Debug, Error)]
pub enum RdsError {
    /// Raised when provided columns have incompatible lengths.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required length, usually the table row count.
        expected: usize,
        /// The length that was actually supplied.
        found: usize,
    },

    /// Raised when a table is assembled with the same column name twice.
    #[error("column `{column}` appears more than once")]
    DuplicateColumn { column: String },

    /// Raised when a bound column does not exist in the raw table.
    #[error("column `{column}` is not present in the table")]
    MissingColumn { column: String },

    /// Raised when a bound column holds the wrong kind of cells.
    #[error("column `{column}` must be {expected}")]
    ColumnType {
        column: String,
        expected: &'static str,
    },

    /// Raised when the raw table already uses one of the derived column names.
    #[error("raw table already contains derived column `{column}`")]
    ColumnConflict { column: String },

    /// Raised when a row has no participant identifier.
    #[error("participant identifier missing in row {row}")]
    MissingParticipantId { row: usize },

    /// Raised when two rows share a participant identifier.
    #[error("participant `{id}` appears more than once")]
    DuplicateParticipant { id: String },

    /// Raised when one coupon is issued by more than one participant.
    #[error("coupon `{coupon}` is issued by both `{first_issuer}` and `{second_issuer}`")]
    AmbiguousCoupon {
        coupon: String,
        first_issuer: String,
        second_issuer: String,
    },

    /// Raised when a participant cannot be reached from any seed.
    #[error("participant `{id}` is not reachable from any seed: {reason}")]
    OrphanParticipant { id: String, reason: OrphanReason },

    /// Raised when a raw degree is negative.
    #[error("participant `{id}` reports invalid degree {degree}")]
    InvalidDegree { id: String, degree: f64 },

    /// Raised when an estimator or imputation policy has nothing to work with.
    #[error("insufficient data for {context}")]
    InsufficientData { context: String },

    /// Raised when too many bootstrap trials produced no estimate.
    #[error(
        "bootstrap unstable: {missing} of {trials} trials produced no estimate (threshold {threshold}){}",
        first_failure(.failures)
    )]
    UnstableResample {
        /// Number of trials recorded as missing.
        missing: usize,
        /// Total number of trials requested.
        trials: usize,
        /// Maximum tolerated missing fraction.
        threshold: f64,
        /// Every missing trial with its failure message, ascending by trial.
        failures: Vec<TrialFailure>,
    },

    /// Raised when an option value is outside its admissible range.
    #[error("invalid option `{option}`: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },

    /// Raised when the worker pool cannot be created.
    #[error("failed to build worker pool: {message}")]
    WorkerPool { message: String },

    /// Raised when a bootstrap trial panics inside a worker.
    #[error("bootstrap trial {trial} panicked: {message}")]
    WorkerPanicked { trial: usize, message: String },

    /// Raised when numerical routines produce unusable values.
    #[error("numerical failure during {context}")]
    NumericalError { context: &'static str },
}

impl RdsError {
    /// Helper to format a [`DimensionMismatch`](RdsError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper for bubbling up unknown column names.
    pub fn missing_column(column: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
        }
    }

    /// Helper for estimators and imputation policies without support.
    pub fn insufficient_data(context: impl Into<String>) -> Self {
        Self::InsufficientData {
            context: context.into(),
        }
    }

    /// Helper for rejecting out-of-range configuration.
    pub fn invalid_option(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            reason: reason.into(),
        }
    }
}

fn first_failure(failures: &[TrialFailure]) -> String {
    failures
        .first()
        .map(|failure| format!("; first failure at trial {}: {}", failure.trial, failure.message))
        .unwrap_or_default()
}

/// Why a participant could not be attached to a seed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrphanReason {
    /// The participant redeemed a coupon nobody issued.
    UnresolvedCoupon { coupon: String },
    /// An upstream recruiter redeemed a coupon nobody issued.
    UnresolvedAncestor { ancestor: String },
    /// The recruitment chain loops back onto itself.
    Cycle,
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedCoupon { coupon } => {
                write!(f, "redeemed coupon `{coupon}` was never issued")
            }
            Self::UnresolvedAncestor { ancestor } => {
                write!(f, "recruiter chain ends at `{ancestor}` whose coupon was never issued")
            }
            Self::Cycle => f.write_str("recruitment chain forms a cycle"),
        }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, RdsError>;
