//! Tree bootstrap for RDS statistics.
//!
//! Rows of an RDS sample are not independent: recruits inherit traits from their
//! recruiters. Each trial therefore resamples the recruitment forest top-down. Seeds
//! are drawn with replacement, then every drawn participant contributes as many
//! draws from its own recruits as it actually recruited, recursively. A statistic is
//! evaluated on each resample, and trials whose statistic fails are recorded as
//! missing instead of aborting the run.

use log::{info, warn};
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::{Distribution, WeightedAliasIndex};
use serde::{Deserialize, Serialize};

use crate::data_processing::{AnnotatedTable, Participant};
use crate::error::{RdsError, Result};
use crate::options::{BootstrapOptions, ResampleMethod};
use crate::seeding::trial_rng;
use crate::summary::{percentile, BootstrapSummary};

/// A resampled recruitment forest: rows of the annotated table, with multiplicity.
#[derive(Clone, Debug)]
pub struct Resample<'a> {
    table: &'a AnnotatedTable,
    rows: Vec<usize>,
    trial: usize,
}

impl<'a> Resample<'a> {
    /// The table the rows refer to.
    pub fn table(&self) -> &'a AnnotatedTable {
        self.table
    }

    /// Drawn rows in traversal order; a row appears once per draw.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Index of the trial that produced this resample.
    pub fn trial(&self) -> usize {
        self.trial
    }

    /// Number of draws.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when nothing was drawn.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drawn participants in traversal order.
    pub fn participants(&self) -> impl Iterator<Item = &'a Participant> + '_ {
        self.rows.iter().map(|&row| self.table.participant(row))
    }

    /// Inverse-degree weights of the drawn rows.
    pub fn weights(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.rows.iter().map(|&r| self.table.weight(r)))
    }

    /// Numeric values of `column` for the drawn rows.
    pub fn numeric(&self, column: &str) -> Result<Vec<Option<f64>>> {
        let values = self.table.numeric(column)?;
        Ok(self.rows.iter().map(|&row| values[row]).collect())
    }
}

/// Why a trial produced no estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub trial: usize,
    pub message: String,
}

/// Estimate or failure of a single trial.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TrialOutcome {
    pub(crate) trial: usize,
    pub(crate) estimate: std::result::Result<f64, String>,
}

/// Estimates in trial order, failures and summary of a bootstrap run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResult {
    /// One entry per trial; `None` for missing trials.
    pub estimates: Vec<Option<f64>>,
    /// Trials recorded as missing, ascending by trial.
    pub failures: Vec<TrialFailure>,
    pub summary: BootstrapSummary,
}

impl BootstrapResult {
    /// Valid estimates in ascending order.
    pub fn sorted_estimates(&self) -> Vec<f64> {
        let mut sorted: Vec<f64> = self.estimates.iter().flatten().copied().collect();
        sorted.sort_by(f64::total_cmp);
        sorted
    }

    /// Arbitrary percentile of the valid estimates, `q` in `[0, 1]`.
    pub fn percentile(&self, q: f64) -> f64 {
        percentile(&self.sorted_estimates(), q)
    }

    /// Equal-tailed percentile interval at `level` (for example `0.95`).
    pub fn confidence_interval(&self, level: f64) -> (f64, f64) {
        let sorted = self.sorted_estimates();
        let tail = (1.0 - level.clamp(0.0, 1.0)) / 2.0;
        (percentile(&sorted, tail), percentile(&sorted, 1.0 - tail))
    }
}

/// Single-threaded bootstrap engine over an annotated table.
#[derive(Debug)]
pub struct Bootstrap<'a> {
    table: &'a AnnotatedTable,
    options: BootstrapOptions,
    /// Per-node recruit samplers, present only for degree-weighted resampling.
    recruit_samplers: Vec<Option<WeightedAliasIndex<f64>>>,
}

impl<'a> Bootstrap<'a> {
    /// Prepares a bootstrap run after validating the options and the table.
    pub fn new(table: &'a AnnotatedTable, options: BootstrapOptions) -> Result<Self> {
        options.validate()?;
        if table.is_empty() {
            return Err(RdsError::insufficient_data("bootstrap: the table has no participants"));
        }

        let recruit_samplers: Vec<Option<WeightedAliasIndex<f64>>> = match options.method {
            ResampleMethod::Tree => Vec::new(),
            ResampleMethod::DegreeWeighted => (0..table.len())
                .map(|node| {
                    let recruits = table.forest().children(node);
                    if recruits.is_empty() {
                        return Ok(None);
                    }
                    let weights: Vec<f64> = recruits.iter().map(|&r| table.weight(r)).collect();
                    WeightedAliasIndex::new(weights)
                        .map(Some)
                        .map_err(|_| RdsError::NumericalError {
                            context: "recruit resampling weights",
                        })
                })
                .collect::<Result<_>>()?,
        };

        Ok(Self {
            table,
            options,
            recruit_samplers,
        })
    }

    /// Accessor for the annotated table.
    pub fn table(&self) -> &'a AnnotatedTable {
        self.table
    }

    /// Accessor for the run options.
    pub fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    /// Draws the resample of trial `trial`; the same trial always yields the same rows.
    pub fn draw(&self, trial: usize) -> Resample<'a> {
        let mut rng = trial_rng(self.options.seed, trial);
        Resample {
            table: self.table,
            rows: self.draw_rows(&mut rng),
            trial,
        }
    }

    fn draw_rows(&self, rng: &mut SmallRng) -> Vec<usize> {
        let forest = self.table.forest();
        let seeds = forest.seeds();
        let mut rows = Vec::with_capacity(forest.len());
        let mut pending: Vec<usize> = (0..seeds.len())
            .map(|_| seeds[rng.gen_range(0..seeds.len())])
            .collect();
        pending.reverse();

        while let Some(node) = pending.pop() {
            rows.push(node);
            let recruits = forest.children(node);
            if recruits.is_empty() {
                continue;
            }
            let start = pending.len();
            match self.recruit_samplers.get(node).and_then(Option::as_ref) {
                Some(sampler) => {
                    pending.extend((0..recruits.len()).map(|_| recruits[sampler.sample(rng)]))
                }
                None => pending.extend(
                    (0..recruits.len()).map(|_| recruits[rng.gen_range(0..recruits.len())]),
                ),
            }
            pending[start..].reverse();
        }
        rows
    }

    /// Draws trial `trial` and evaluates `statistic` on it.
    pub(crate) fn run_trial<F>(&self, trial: usize, statistic: &F) -> TrialOutcome
    where
        F: Fn(&Resample<'_>) -> Result<f64>,
    {
        let resample = self.draw(trial);
        let estimate = match statistic(&resample) {
            Ok(value) if value.is_finite() => Ok(value),
            Ok(value) => Err(format!("statistic returned non-finite value {value}")),
            Err(error) => Err(error.to_string()),
        };
        TrialOutcome { trial, estimate }
    }

    /// Runs every trial in order and summarizes the estimates.
    pub fn run<F>(&self, statistic: F) -> Result<BootstrapResult>
    where
        F: Fn(&Resample<'_>) -> Result<f64>,
    {
        info!(
            "running {} bootstrap trials over {} participants",
            self.options.trials,
            self.table.len()
        );
        let outcomes = (0..self.options.trials)
            .map(|trial| self.run_trial(trial, &statistic))
            .collect();
        aggregate(outcomes, &self.options)
    }
}

/// Combines trial outcomes (already in trial order) into a [`BootstrapResult`].
pub(crate) fn aggregate(
    outcomes: Vec<TrialOutcome>,
    options: &BootstrapOptions,
) -> Result<BootstrapResult> {
    let trials = outcomes.len();
    let mut estimates = Vec::with_capacity(trials);
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.estimate {
            Ok(value) => estimates.push(Some(value)),
            Err(message) => {
                estimates.push(None);
                failures.push(TrialFailure {
                    trial: outcome.trial,
                    message,
                });
            }
        }
    }

    let missing = failures.len();
    if missing == trials || missing as f64 > options.max_missing_fraction * trials as f64 {
        return Err(RdsError::UnstableResample {
            missing,
            trials,
            threshold: options.max_missing_fraction,
            failures,
        });
    }
    if missing > 0 {
        warn!("{missing} of {trials} bootstrap trials produced no estimate");
    }

    let mut sorted: Vec<f64> = estimates.iter().flatten().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let summary = BootstrapSummary::from_sorted(&sorted, trials);
    info!(
        "bootstrap finished: mean {:.6}, standard error {:?}",
        summary.mean,
        summary.std_error()
    );

    Ok(BootstrapResult {
        estimates,
        failures,
        summary,
    })
}
