//! Federated round driver.
//!
//! Delivers each round's participant updates to the aggregator, combines
//! them once, and resets before the next round.

pub mod loader;

use crate::analysis::{stats, MetaAnalysisAggregator, RoundState};
use crate::config::Config;
use crate::models::{RoundOutcome, SE};
use crate::scanner::RoundPlan;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Settings for running rounds.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Fewest participants a round may be combined with.
    pub min_participants: usize,
    /// Reject mixed params_type within a round.
    pub strict_params_type: bool,
    /// Participant files loaded concurrently.
    pub concurrency: usize,
    /// Strongest features kept in each summary.
    pub top_hits: usize,
    /// Significance threshold on |z|.
    pub z_threshold: f64,
    /// Show a progress bar while loading.
    pub show_progress: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RunnerConfig {
    fn from(config: &Config) -> Self {
        Self {
            min_participants: config.aggregation.min_participants,
            strict_params_type: config.aggregation.strict_params_type,
            concurrency: config.general.concurrency,
            top_hits: config.report.top_hits,
            z_threshold: config.report.z_threshold,
            show_progress: false,
        }
    }
}

/// Runs rounds against a single reusable aggregator.
pub struct RoundRunner {
    config: RunnerConfig,
    aggregator: MetaAnalysisAggregator,
}

impl RoundRunner {
    /// Create a runner with an empty aggregator.
    pub fn new(config: RunnerConfig) -> Self {
        let aggregator =
            MetaAnalysisAggregator::new().with_strict_params_type(config.strict_params_type);
        Self { config, aggregator }
    }

    /// Run every round in order, stopping at the first failure.
    pub async fn run(&mut self, plans: &[RoundPlan]) -> Result<Vec<RoundOutcome>> {
        let mut outcomes = Vec::with_capacity(plans.len());
        for plan in plans {
            outcomes.push(self.run_round(plan).await?);
        }
        Ok(outcomes)
    }

    /// Load, ingest and combine one round.
    pub async fn run_round(&mut self, plan: &RoundPlan) -> Result<RoundOutcome> {
        let start = Instant::now();

        if plan.participants.len() < self.config.min_participants {
            bail!(
                "Round {}: found {} participant files, at least {} required",
                plan.name,
                plan.participants.len(),
                self.config.min_participants
            );
        }

        // A previous round that failed part way leaves its updates behind.
        if self.aggregator.state() != RoundState::Empty {
            warn!(
                "Discarding {} updates left from an unfinished round",
                self.aggregator.participants()
            );
            self.aggregator.reset();
        }

        info!(
            "Round {}: loading {} participant updates",
            plan.name,
            plan.participants.len()
        );

        let progress = self.progress_bar(plan.participants.len() as u64);
        let updates = loader::load_all(&plan.participants, self.config.concurrency, &progress)
            .await
            .with_context(|| format!("Round {}: failed to load participant updates", plan.name))?;
        progress.finish_and_clear();

        let mut smallest_se = Vec::new();
        for (path, update) in plan.participants.iter().zip(updates) {
            if let Some(se) = update.params.get(SE) {
                stats::fold_smallest_se(&mut smallest_se, se);
            }
            self.aggregator.ingest(update).with_context(|| {
                format!("Round {}: rejected update from {}", plan.name, path.display())
            })?;
        }

        if let Some(params_type) = self.aggregator.params_type() {
            debug!("Round {}: params_type {}", plan.name, params_type);
        }

        let result = self
            .aggregator
            .finish_round()
            .with_context(|| format!("Round {}: aggregation failed", plan.name))?;

        let summary = stats::summarize(
            &result,
            plan.participants.len(),
            &smallest_se,
            self.config.top_hits,
            self.config.z_threshold,
        );

        info!(
            "Round {}: combined {} participants over {} features ({} significant)",
            plan.name, summary.participants, summary.features, summary.significant
        );

        Ok(RoundOutcome {
            round: plan.name.clone(),
            participants: plan
                .participants
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            params_type: result.params_type.clone(),
            result,
            summary,
            duration_seconds: start.elapsed().as_secs_f64(),
        })
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }

        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} participants",
        )
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

        ProgressBar::new(len).with_style(style)
    }
}
