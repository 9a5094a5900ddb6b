//! Meta-analysis of participant summary statistics.
//!
//! The aggregator is the stateful core; `stats` derives read-only
//! summaries from its output.

pub mod aggregator;
pub mod error;
pub mod stats;

pub use aggregator::{MetaAnalysisAggregator, RoundState};
