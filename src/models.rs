//! Data models for the meta-analysis tool.
//!
//! This module contains the update objects exchanged with participants
//! and the structures used to describe a completed run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key of the effect-size vector inside `params`.
pub const BETA: &str = "beta";
/// Key of the standard-error vector inside `params`.
pub const SE: &str = "se";

/// Representation tag of an update's `params`.
///
/// The aggregator never interprets it, it only echoes the first tag
/// seen in a round back on the aggregated result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamsType {
    /// Full statistics (default)
    #[default]
    Full,
    /// Differences against a previous round
    Diff,
    /// Any other tag, kept verbatim
    Other(String),
}

impl fmt::Display for ParamsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsType::Full => write!(f, "FULL"),
            ParamsType::Diff => write!(f, "DIFF"),
            ParamsType::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ParamsType {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "FULL" => ParamsType::Full,
            "DIFF" => ParamsType::Diff,
            _ => ParamsType::Other(s.to_string()),
        }
    }
}

impl From<String> for ParamsType {
    fn from(s: String) -> Self {
        ParamsType::from(s.as_str())
    }
}

impl From<ParamsType> for String {
    fn from(p: ParamsType) -> Self {
        p.to_string()
    }
}

/// Summary statistics submitted by one participant for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    /// Named statistic vectors; `beta` and `se` are required.
    pub params: BTreeMap<String, Vec<f64>>,
    /// Representation tag, passed through unchanged.
    #[serde(default)]
    pub params_type: ParamsType,
}

impl ParticipantUpdate {
    /// Build an update from a beta/se pair.
    pub fn new(beta: Vec<f64>, se: Vec<f64>, params_type: ParamsType) -> Self {
        let mut params = BTreeMap::new();
        params.insert(BETA.to_string(), beta);
        params.insert(SE.to_string(), se);
        Self {
            params,
            params_type,
        }
    }
}

/// The combined update returned for a round.
///
/// Serializes with the same shape as [`ParticipantUpdate`] so it can be
/// handed straight back to participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Combined `beta` and `se`, one entry per feature.
    pub params: BTreeMap<String, Vec<f64>>,
    /// Tag echoed from the first participant of the round.
    pub params_type: ParamsType,
}

impl AggregatedResult {
    /// Build a result from combined beta/se vectors.
    pub fn new(beta: Vec<f64>, se: Vec<f64>, params_type: ParamsType) -> Self {
        let ParticipantUpdate {
            params,
            params_type,
        } = ParticipantUpdate::new(beta, se, params_type);
        Self {
            params,
            params_type,
        }
    }

    /// Combined effect estimates.
    pub fn beta(&self) -> &[f64] {
        self.params.get(BETA).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Combined standard errors.
    pub fn se(&self) -> &[f64] {
        self.params.get(SE).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of features (P).
    pub fn features(&self) -> usize {
        self.beta().len()
    }
}

/// A single feature singled out in a round summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureHit {
    /// Index of the feature (0-based, input order).
    pub feature: usize,
    /// Combined effect estimate.
    pub beta: f64,
    /// Combined standard error.
    pub se: f64,
    /// Wald statistic `beta / se`.
    pub z: f64,
}

/// Derived statistics of one aggregated round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Number of features combined.
    pub features: usize,
    /// Number of participants that contributed.
    pub participants: usize,
    /// Features whose |z| reached the significance threshold.
    pub significant: usize,
    /// Threshold used for `significant`.
    pub z_threshold: f64,
    /// Features resolved by a zero-variance participant.
    pub exact_features: usize,
    /// Median of (smallest participant se / combined se).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_precision_gain: Option<f64>,
    /// Features with the largest |z|.
    pub top_hits: Vec<FeatureHit>,
}

/// Everything produced for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Round name (directory name or "round").
    pub round: String,
    /// Participant files ingested, in ingestion order.
    pub participants: Vec<String>,
    /// Tag of the aggregated result.
    pub params_type: ParamsType,
    /// The aggregated update.
    pub result: AggregatedResult,
    /// Derived statistics.
    pub summary: RoundSummary,
    /// Wall time for loading and aggregating the round.
    pub duration_seconds: f64,
}

/// Metadata about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Input directory.
    pub input: String,
    /// Date and time of the run.
    pub run_date: DateTime<Utc>,
    /// Number of rounds aggregated.
    pub rounds: usize,
    /// Total participant updates ingested across rounds.
    pub participant_updates: usize,
    /// Whether params_type agreement was enforced.
    pub strict_params_type: bool,
    /// Duration of the run in seconds.
    pub duration_seconds: f64,
}

/// The complete run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Metadata about the run.
    pub metadata: ReportMetadata,
    /// One entry per aggregated round.
    pub rounds: Vec<RoundOutcome>,
}
