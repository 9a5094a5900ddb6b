//! Inverse-variance weighted meta-analysis across participants.
//!
//! The aggregator collects one `beta`/`se` pair per participant for the
//! current round and combines them feature by feature with the
//! fixed-effect estimator:
//!
//! ```text
//! w_k   = 1 / se_k^2
//! beta* = sum(w_k * beta_k) / sum(w_k)
//! se*   = sqrt(1 / sum(w_k))
//! ```
//!
//! Combination is independent of ingestion order up to floating-point
//! rounding. Results for different orderings are numerically equivalent
//! but not guaranteed to be bit-identical.

use super::error::{AggregationError, DegenerateReason};
use crate::models::{AggregatedResult, ParamsType, ParticipantUpdate, BETA, SE};
use tracing::{debug, warn};

/// Phase of the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    /// Nothing ingested since construction or the last reset.
    Empty,
    /// At least one participant ingested.
    Accumulating,
}

/// Statistics accumulated for the round in progress.
#[derive(Debug)]
struct Accumulation {
    /// Tag of the first participant of the round.
    params_type: ParamsType,
    /// Feature count fixed by the first participant.
    features: usize,
    betas: Vec<Vec<f64>>,
    ses: Vec<Vec<f64>>,
}

impl Accumulation {
    /// Combine a single feature column across participants.
    ///
    /// Weights are divided by the largest finite weight before summing, so
    /// standard errors near the bottom of the f64 range do not overflow
    /// `sum(w_k)`.
    fn combine_feature(&self, feature: usize) -> Result<(f64, f64), AggregationError> {
        let degenerate = |reason| AggregationError::DegenerateVariance { feature, reason };
        let column = || {
            self.betas
                .iter()
                .zip(&self.ses)
                .map(move |(betas, ses)| (betas[feature], ses[feature]))
        };

        // Participants with infinite weight (se of zero, or small enough to underflow).
        let mut exact: Option<f64> = None;
        let mut max_weight = 0.0_f64;
        let mut informative = 0usize;
        let mut last_informative = (0.0, 0.0);

        for (beta, se) in column() {
            let weight = 1.0 / (se * se);
            if weight.is_infinite() {
                exact = match exact {
                    None => Some(beta),
                    Some(prev) if prev == beta => Some(prev),
                    Some(_) => return Err(degenerate(DegenerateReason::ConflictingExactEstimates)),
                };
            } else if weight > 0.0 {
                max_weight = max_weight.max(weight);
                informative += 1;
                last_informative = (beta, se);
            }
        }

        // The combined variance is zero whatever the subnormal inputs were.
        if let Some(beta) = exact {
            return Ok((beta, 0.0));
        }

        match informative {
            0 => Err(degenerate(DegenerateReason::NoInformation)),
            // A lone informative participant passes through untouched.
            1 => Ok(last_informative),
            _ => {
                let mut scaled_sum = 0.0;
                let mut weighted_beta_sum = 0.0;
                for (beta, se) in column() {
                    let weight = 1.0 / (se * se);
                    if weight == 0.0 {
                        continue;
                    }
                    let scaled = weight / max_weight;
                    scaled_sum += scaled;
                    weighted_beta_sum += scaled * beta;
                }

                let beta = weighted_beta_sum / scaled_sum;
                let se = (1.0 / max_weight).sqrt() / scaled_sum.sqrt();
                if beta.is_finite() && se.is_finite() {
                    Ok((beta, se))
                } else {
                    Err(degenerate(DegenerateReason::NonFinite))
                }
            }
        }
    }
}

/// Fixed-effect meta-analysis accumulator for federated rounds.
///
/// Drive it with [`ingest`](Self::ingest) once per participant, then
/// [`combine`](Self::combine) once, then [`reset`](Self::reset) before the
/// next round. [`finish_round`](Self::finish_round) performs the last two
/// steps as one transition.
#[derive(Debug, Default)]
pub struct MetaAnalysisAggregator {
    strict_params_type: bool,
    round: Option<Accumulation>,
}

impl MetaAnalysisAggregator {
    /// Create an empty aggregator that trusts the first `params_type` seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject updates whose `params_type` differs from the round's first.
    pub fn with_strict_params_type(mut self, strict: bool) -> Self {
        self.strict_params_type = strict;
        self
    }

    /// Current phase of the round.
    pub fn state(&self) -> RoundState {
        match self.round {
            None => RoundState::Empty,
            Some(_) => RoundState::Accumulating,
        }
    }

    /// Number of participants ingested this round.
    pub fn participants(&self) -> usize {
        self.round.as_ref().map_or(0, |r| r.betas.len())
    }

    /// Feature count of the round, once known.
    pub fn features(&self) -> Option<usize> {
        self.round.as_ref().map(|r| r.features)
    }

    /// Tag recorded from the round's first participant.
    pub fn params_type(&self) -> Option<&ParamsType> {
        self.round.as_ref().map(|r| &r.params_type)
    }

    /// Record one participant's statistics.
    ///
    /// The update is validated before anything is stored; a rejected update
    /// leaves the round unchanged.
    pub fn ingest(&mut self, mut update: ParticipantUpdate) -> Result<(), AggregationError> {
        let participant = self.participants();

        let beta = update
            .params
            .remove(BETA)
            .ok_or(AggregationError::MissingStatistic {
                participant,
                name: BETA,
            })?;
        let se = update
            .params
            .remove(SE)
            .ok_or(AggregationError::MissingStatistic {
                participant,
                name: SE,
            })?;

        let expected = self.features().unwrap_or(beta.len());
        if beta.len() != expected || se.len() != expected {
            return Err(AggregationError::ShapeMismatch {
                participant,
                expected,
                beta_len: beta.len(),
                se_len: se.len(),
            });
        }

        validate_statistics(participant, &beta, &se)?;

        match &mut self.round {
            None => {
                debug!(
                    "Round started: {} features, params_type {}",
                    expected, update.params_type
                );
                self.round = Some(Accumulation {
                    params_type: update.params_type,
                    features: expected,
                    betas: vec![beta],
                    ses: vec![se],
                });
            }
            Some(round) => {
                if self.strict_params_type && update.params_type != round.params_type {
                    return Err(AggregationError::ParamsTypeMismatch {
                        participant,
                        expected: round.params_type.clone(),
                        found: update.params_type,
                    });
                }
                round.betas.push(beta);
                round.ses.push(se);
            }
        }

        debug!("Ingested participant {}", participant);
        Ok(())
    }

    /// Combine everything ingested this round. Does not modify state.
    pub fn combine(&self) -> Result<AggregatedResult, AggregationError> {
        let round = self
            .round
            .as_ref()
            .ok_or(AggregationError::EmptyAggregation)?;

        let mut beta = Vec::with_capacity(round.features);
        let mut se = Vec::with_capacity(round.features);
        let mut exact = 0usize;

        for feature in 0..round.features {
            let (b, s) = round.combine_feature(feature)?;
            if s == 0.0 {
                exact += 1;
            }
            beta.push(b);
            se.push(s);
        }

        if exact > 0 {
            warn!(
                "{} of {} features resolved by zero-variance participants",
                exact, round.features
            );
        }
        debug!(
            "Combined {} participants over {} features",
            round.betas.len(),
            round.features
        );

        Ok(AggregatedResult::new(beta, se, round.params_type.clone()))
    }

    /// Discard the round's statistics. Idempotent.
    pub fn reset(&mut self) {
        if self.round.take().is_some() {
            debug!("Aggregator reset");
        }
    }

    /// Combine and then reset. On error the round is kept intact.
    pub fn finish_round(&mut self) -> Result<AggregatedResult, AggregationError> {
        let result = self.combine()?;
        self.reset();
        Ok(result)
    }
}

/// Check that a beta/se pair holds usable numbers.
fn validate_statistics(participant: usize, beta: &[f64], se: &[f64]) -> Result<(), AggregationError> {
    if let Some((feature, &value)) = beta.iter().enumerate().find(|(_, b)| !b.is_finite()) {
        return Err(AggregationError::InvalidStatistic {
            participant,
            statistic: BETA,
            feature,
            value,
        });
    }

    // +inf is allowed: it carries zero weight.
    if let Some((feature, &value)) = se.iter().enumerate().find(|(_, s)| s.is_nan() || **s < 0.0) {
        return Err(AggregationError::InvalidStatistic {
            participant,
            statistic: SE,
            feature,
            value,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    fn update(beta: &[f64], se: &[f64]) -> ParticipantUpdate {
        ParticipantUpdate::new(beta.to_vec(), se.to_vec(), ParamsType::Full)
    }

    fn combine_all(updates: &[ParticipantUpdate]) -> AggregatedResult {
        let mut aggregator = MetaAnalysisAggregator::new();
        for u in updates {
            aggregator.ingest(u.clone()).unwrap();
        }
        aggregator.combine().unwrap()
    }

    #[test]
    fn test_two_participant_scenario() {
        let result = combine_all(&[update(&[2.0], &[1.0]), update(&[4.0], &[2.0])]);

        // wA = 1, wB = 0.25 -> (2 + 1) / 1.25
        assert!((result.beta()[0] - 2.4).abs() < TOLERANCE);
        assert!((result.se()[0] - 0.8f64.sqrt()).abs() < TOLERANCE);
        assert_eq!(result.params_type, ParamsType::Full);
    }

    #[test]
    fn test_single_participant_is_identity() {
        let beta = [0.123, -4.5, 1e-9, 17.25];
        let se = [0.3, 2.0, 1e-3, 0.7];
        let result = combine_all(&[update(&beta, &se)]);

        assert_eq!(result.beta(), &beta);
        assert_eq!(result.se(), &se);
    }

    #[test]
    fn test_order_independence() {
        let updates = [
            update(&[0.5, -1.0, 3.0], &[0.1, 0.5, 1.5]),
            update(&[0.7, -0.2, 2.0], &[0.2, 0.4, 0.9]),
            update(&[0.1, -0.8, 2.5], &[0.3, 0.25, 1.1]),
        ];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        let reference = combine_all(&updates);
        for order in orders {
            let permuted: Vec<_> = order.iter().map(|&i| updates[i].clone()).collect();
            let result = combine_all(&permuted);
            for i in 0..3 {
                assert!((result.beta()[i] - reference.beta()[i]).abs() < TOLERANCE);
                assert!((result.se()[i] - reference.se()[i]).abs() < TOLERANCE);
            }
        }
    }

    #[test]
    fn test_combined_se_not_above_smallest_input() {
        let updates = [
            update(&[1.0, 1.0], &[0.5, 2.0]),
            update(&[2.0, 1.5], &[1.0, 2.0]),
            update(&[0.5, 0.5], &[4.0, 3.0]),
        ];
        let result = combine_all(&updates);

        assert!(result.se()[0] < 0.5);
        assert!(result.se()[1] < 2.0);
    }

    #[test]
    fn test_zero_variance_participant_dominates() {
        let result = combine_all(&[update(&[1.5, 2.0], &[0.0, 1.0]), update(&[9.0, 4.0], &[2.0, 1.0])]);

        assert_eq!(result.beta()[0], 1.5);
        assert_eq!(result.se()[0], 0.0);
        // Equal weights: plain average
        assert!((result.beta()[1] - 3.0).abs() < TOLERANCE);
        assert!((result.se()[1] - 0.5f64.sqrt()).abs() < TOLERANCE);
    }

    #[test]
    fn test_agreeing_zero_variance_participants() {
        let result = combine_all(&[update(&[3.0], &[0.0]), update(&[3.0], &[0.0]), update(&[8.0], &[1.0])]);
        assert_eq!(result.beta()[0], 3.0);
        assert_eq!(result.se()[0], 0.0);
    }

    #[test]
    fn test_conflicting_zero_variance_participants() {
        let mut aggregator = MetaAnalysisAggregator::new();
        aggregator.ingest(update(&[1.0, 3.0], &[1.0, 0.0])).unwrap();
        aggregator.ingest(update(&[1.0, 4.0], &[1.0, 0.0])).unwrap();

        assert_eq!(
            aggregator.combine(),
            Err(AggregationError::DegenerateVariance {
                feature: 1,
                reason: DegenerateReason::ConflictingExactEstimates,
            })
        );
    }

    #[test]
    fn test_subnormal_se_reports_zero_variance() {
        let result = combine_all(&[update(&[0.25], &[1e-170]), update(&[0.25], &[1e-200]), update(&[5.0], &[1.0])]);

        assert_eq!(result.beta(), &[0.25]);
        assert_eq!(result.se(), &[0.0]);
    }

    #[test]
    fn test_weight_sum_near_overflow_stays_exact() {
        // 1 / (1e-154)^2 = 1e308, so two of them overflow an unscaled sum
        let result = combine_all(&[update(&[0.5], &[1e-154]), update(&[0.5], &[1e-154])]);

        assert_eq!(result.beta(), &[0.5]);
        let expected = 1e-154 / 2f64.sqrt();
        assert!((result.se()[0] - expected).abs() / expected < TOLERANCE);
    }

    #[test]
    fn test_large_weighted_beta_stays_finite() {
        // w * beta = 1e10 * 1e300 would overflow without scaling
        let result = combine_all(&[update(&[1e300], &[1e-5]), update(&[1e300], &[1e-5])]);

        assert!((result.beta()[0] / 1e300 - 1.0).abs() < TOLERANCE);
        assert!((result.se()[0] - 1e-5 / 2f64.sqrt()).abs() < 1e-5 * TOLERANCE);
    }

    #[test]
    fn test_overflowing_estimate_is_non_finite() {
        let mut aggregator = MetaAnalysisAggregator::new();
        aggregator.ingest(update(&[1.0, f64::MAX], &[1.0, 1.0])).unwrap();
        aggregator.ingest(update(&[1.0, f64::MAX], &[1.0, 1.0])).unwrap();

        assert_eq!(
            aggregator.combine(),
            Err(AggregationError::DegenerateVariance {
                feature: 1,
                reason: DegenerateReason::NonFinite,
            })
        );
        assert_eq!(aggregator.state(), RoundState::Accumulating);
    }

    #[test]
    fn test_all_infinite_se_is_an_error() {
        let mut aggregator = MetaAnalysisAggregator::new();
        aggregator.ingest(update(&[1.0, 2.0], &[1.0, f64::INFINITY])).unwrap();
        aggregator.ingest(update(&[1.0, 5.0], &[1.0, f64::INFINITY])).unwrap();

        assert_eq!(
            aggregator.combine(),
            Err(AggregationError::DegenerateVariance {
                feature: 1,
                reason: DegenerateReason::NoInformation,
            })
        );
    }

    #[test]
    fn test_infinite_se_participant_is_ignored() {
        let result = combine_all(&[update(&[2.0], &[0.5]), update(&[100.0], &[f64::INFINITY])]);
        assert_eq!(result.beta(), &[2.0]);
        assert_eq!(result.se(), &[0.5]);
    }

    #[test]
    fn test_empty_combine_is_an_error() {
        let mut aggregator = MetaAnalysisAggregator::new();
        assert_eq!(aggregator.combine(), Err(AggregationError::EmptyAggregation));

        aggregator.ingest(update(&[1.0], &[1.0])).unwrap();
        aggregator.reset();
        assert_eq!(aggregator.combine(), Err(AggregationError::EmptyAggregation));
    }

    #[test]
    fn test_reset_clears_previous_round() {
        let mut aggregator = MetaAnalysisAggregator::new();
        aggregator.ingest(update(&[100.0, 100.0], &[0.1, 0.1])).unwrap();
        aggregator.ingest(update(&[50.0, 50.0], &[0.1, 0.1])).unwrap();
        aggregator.reset();
        aggregator.reset();
        assert_eq!(aggregator.state(), RoundState::Empty);
        assert_eq!(aggregator.participants(), 0);

        // New round may change the feature count
        aggregator.ingest(update(&[1.0], &[2.0])).unwrap();
        let result = aggregator.combine().unwrap();
        assert_eq!(result.beta(), &[1.0]);
        assert_eq!(result.se(), &[2.0]);
    }

    #[test]
    fn test_state_transitions() {
        let mut aggregator = MetaAnalysisAggregator::new();
        assert_eq!(aggregator.state(), RoundState::Empty);

        aggregator.ingest(update(&[1.0], &[1.0])).unwrap();
        assert_eq!(aggregator.state(), RoundState::Accumulating);

        aggregator.combine().unwrap();
        assert_eq!(aggregator.state(), RoundState::Accumulating);
        assert_eq!(aggregator.participants(), 1);

        aggregator.finish_round().unwrap();
        assert_eq!(aggregator.state(), RoundState::Empty);
    }

    #[test]
    fn test_finish_round_keeps_state_on_error() {
        let mut aggregator = MetaAnalysisAggregator::new();
        aggregator.ingest(update(&[1.0], &[f64::INFINITY])).unwrap();

        assert!(aggregator.finish_round().is_err());
        assert_eq!(aggregator.state(), RoundState::Accumulating);
    }

    #[test]
    fn test_shape_mismatch_within_update() {
        let mut aggregator = MetaAnalysisAggregator::new();
        let err = aggregator.ingest(update(&[1.0, 2.0], &[1.0])).unwrap_err();

        assert_eq!(
            err,
            AggregationError::ShapeMismatch {
                participant: 0,
                expected: 2,
                beta_len: 2,
                se_len: 1,
            }
        );
        assert_eq!(aggregator.state(), RoundState::Empty);
    }

    #[test]
    fn test_shape_mismatch_across_updates() {
        let mut aggregator = MetaAnalysisAggregator::new();
        aggregator.ingest(update(&[1.0, 2.0], &[1.0, 1.0])).unwrap();
        let err = aggregator.ingest(update(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0])).unwrap_err();

        assert!(matches!(
            err,
            AggregationError::ShapeMismatch {
                participant: 1,
                expected: 2,
                beta_len: 3,
                se_len: 3,
            }
        ));
        assert_eq!(aggregator.participants(), 1);
    }

    #[test]
    fn test_missing_statistic() {
        let mut aggregator = MetaAnalysisAggregator::new();
        let mut u = update(&[1.0], &[1.0]);
        u.params.remove(SE);

        assert_eq!(
            aggregator.ingest(u),
            Err(AggregationError::MissingStatistic {
                participant: 0,
                name: SE,
            })
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut aggregator = MetaAnalysisAggregator::new();

        assert!(matches!(
            aggregator.ingest(update(&[1.0, f64::NAN], &[1.0, 1.0])),
            Err(AggregationError::InvalidStatistic { statistic: BETA, feature: 1, .. })
        ));
        assert!(matches!(
            aggregator.ingest(update(&[1.0, 2.0], &[-1.0, 1.0])),
            Err(AggregationError::InvalidStatistic { statistic: SE, feature: 0, .. })
        ));
        assert_eq!(aggregator.state(), RoundState::Empty);
    }

    #[test]
    fn test_first_params_type_wins_by_default() {
        let mut aggregator = MetaAnalysisAggregator::new();
        aggregator
            .ingest(ParticipantUpdate::new(vec![1.0], vec![1.0], ParamsType::Diff))
            .unwrap();
        aggregator
            .ingest(ParticipantUpdate::new(vec![1.0], vec![1.0], ParamsType::Full))
            .unwrap();

        assert_eq!(aggregator.combine().unwrap().params_type, ParamsType::Diff);
    }

    #[test]
    fn test_strict_params_type() {
        let mut aggregator = MetaAnalysisAggregator::new().with_strict_params_type(true);
        aggregator
            .ingest(ParticipantUpdate::new(vec![1.0], vec![1.0], ParamsType::Diff))
            .unwrap();
        let err = aggregator
            .ingest(ParticipantUpdate::new(vec![1.0], vec![1.0], ParamsType::Full))
            .unwrap_err();

        assert_eq!(
            err,
            AggregationError::ParamsTypeMismatch {
                participant: 1,
                expected: ParamsType::Diff,
                found: ParamsType::Full,
            }
        );
        assert_eq!(aggregator.participants(), 1);
    }

    #[test]
    fn test_extra_params_are_ignored() {
        let mut u = update(&[2.0], &[1.0]);
        u.params.insert("pval".to_string(), vec![0.05]);
        let result = combine_all(&[u]);
        assert_eq!(result.params.len(), 2);
    }
}
