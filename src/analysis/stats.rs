//! Round statistics.
//!
//! Read-only summaries computed from an aggregated result, used by the
//! report generators.

use crate::models::{AggregatedResult, FeatureHit, RoundSummary};
use std::cmp::Ordering;

/// Two-sided genome-wide significance (p ≈ 5e-8) on the z scale.
pub const GENOME_WIDE_Z: f64 = 5.45;

/// Wald statistic for every feature. Zero-variance features give ±inf
/// (or NaN for a zero estimate).
pub fn z_scores(result: &AggregatedResult) -> Vec<f64> {
    result
        .beta()
        .iter()
        .zip(result.se())
        .map(|(b, s)| b / s)
        .collect()
}

/// The `n` features with the largest |z|, strongest first.
pub fn top_hits(result: &AggregatedResult, n: usize) -> Vec<FeatureHit> {
    let mut hits: Vec<FeatureHit> = result
        .beta()
        .iter()
        .zip(result.se())
        .enumerate()
        .map(|(feature, (&beta, &se))| FeatureHit {
            feature,
            beta,
            se,
            z: beta / se,
        })
        .filter(|h| !h.z.is_nan())
        .collect();

    hits.sort_by(|a, b| {
        b.z.abs()
            .partial_cmp(&a.z.abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    hits.truncate(n);

    hits
}

/// Number of features with |z| at or above `threshold`.
pub fn count_significant(result: &AggregatedResult, threshold: f64) -> usize {
    z_scores(result)
        .iter()
        .filter(|z| z.abs() >= threshold)
        .count()
}

/// Fold one participant's standard errors into the running per-feature
/// minimum.
pub fn fold_smallest_se(smallest: &mut Vec<f64>, se: &[f64]) {
    if smallest.is_empty() {
        smallest.extend_from_slice(se);
        return;
    }
    for (current, &s) in smallest.iter_mut().zip(se) {
        *current = current.min(s);
    }
}

/// Median over features of (smallest participant se / combined se).
///
/// Features whose combined or smallest input se is zero or infinite are
/// skipped. Returns `None` when nothing remains.
pub fn median_precision_gain(result: &AggregatedResult, smallest_se: &[f64]) -> Option<f64> {
    let mut gains: Vec<f64> = result
        .se()
        .iter()
        .zip(smallest_se)
        .filter_map(|(&combined, &smallest)| {
            let gain = smallest / combined;
            (combined > 0.0 && gain.is_finite()).then_some(gain)
        })
        .collect();

    if gains.is_empty() {
        return None;
    }

    gains.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = gains.len() / 2;
    if gains.len() % 2 == 0 {
        Some((gains[mid - 1] + gains[mid]) / 2.0)
    } else {
        Some(gains[mid])
    }
}

/// Build the summary of one aggregated round.
pub fn summarize(
    result: &AggregatedResult,
    participants: usize,
    smallest_se: &[f64],
    top_n: usize,
    z_threshold: f64,
) -> RoundSummary {
    RoundSummary {
        features: result.features(),
        participants,
        significant: count_significant(result, z_threshold),
        z_threshold,
        exact_features: result.se().iter().filter(|&&s| s == 0.0).count(),
        median_precision_gain: median_precision_gain(result, smallest_se),
        top_hits: top_hits(result, top_n),
    }
}
