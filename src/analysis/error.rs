//! Errors raised by the meta-analysis aggregator.

use crate::models::ParamsType;
use std::fmt;
use thiserror::Error;

/// Why a feature could not be combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegenerateReason {
    /// Every participant has an infinite standard error (total weight zero).
    NoInformation,
    /// Several zero-variance participants report different estimates.
    ConflictingExactEstimates,
    /// The weighted sums overflowed.
    NonFinite,
}

impl fmt::Display for DegenerateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegenerateReason::NoInformation => write!(f, "all weights are zero"),
            DegenerateReason::ConflictingExactEstimates => {
                write!(f, "zero-variance participants disagree")
            }
            DegenerateReason::NonFinite => write!(f, "combined estimate is not finite"),
        }
    }
}

/// Failure of an ingest or combine call.
///
/// Participant ordinals are 0-based positions in the current round.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error(
        "shape mismatch for participant {participant}: beta has {beta_len} entries, se has {se_len}, round expects {expected}"
    )]
    ShapeMismatch {
        participant: usize,
        expected: usize,
        beta_len: usize,
        se_len: usize,
    },

    #[error("participant {participant} is missing the \"{name}\" statistic")]
    MissingStatistic {
        participant: usize,
        name: &'static str,
    },

    #[error("participant {participant} has invalid {statistic} at feature {feature}: {value}")]
    InvalidStatistic {
        participant: usize,
        statistic: &'static str,
        feature: usize,
        value: f64,
    },

    #[error("participant {participant} sent params_type {found}, round uses {expected}")]
    ParamsTypeMismatch {
        participant: usize,
        expected: ParamsType,
        found: ParamsType,
    },

    #[error("no participant updates to combine")]
    EmptyAggregation,

    #[error("degenerate variance at feature {feature}: {reason}")]
    DegenerateVariance {
        feature: usize,
        reason: DegenerateReason,
    },
}
