//! RDS point estimators with bootstrap uncertainty.
//!
//! Means use the RDS-II (Volz-Heckathorn) estimator, which weights each respondent by
//! the inverse of their imputed degree. Standard errors come from the tree bootstrap
//! run serially or on a worker pool.

use std::collections::BTreeSet;

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::bootstrap::{Bootstrap, Resample};
use crate::data_processing::AnnotatedTable;
use crate::error::{RdsError, Result};
use crate::options::{BootstrapOptions, ParallelOptions};
use crate::parallel_bootstrap::ParallelBootstrap;
use crate::summary::BootstrapSummary;

/// Mean of `variable` over `rows` (with multiplicity), skipping missing values.
///
/// With `weighted` set, each row counts with its inverse-degree weight.
pub fn mean_over(
    table: &AnnotatedTable,
    rows: &[usize],
    variable: &str,
    weighted: bool,
) -> Result<f64> {
    let values = table.numeric(variable)?;
    let (observed, weights): (Vec<f64>, Vec<f64>) = rows
        .iter()
        .filter_map(|&row| {
            let weight = if weighted { table.weight(row) } else { 1.0 };
            values[row].map(|value| (value, weight))
        })
        .unzip();
    if observed.is_empty() {
        return Err(RdsError::insufficient_data(format!(
            "mean of `{variable}`: no observed values"
        )));
    }

    let observed = DVector::from_vec(observed);
    let weights = DVector::from_vec(weights);
    Ok(observed.dot(&weights) / weights.sum())
}

/// Statistic closure computing the mean of `variable` on each resample.
pub fn mean_statistic(
    variable: &str,
    weighted: bool,
) -> impl Fn(&Resample<'_>) -> Result<f64> + Sync + '_ {
    move |resample: &Resample<'_>| mean_over(resample.table(), resample.rows(), variable, weighted)
}

/// How [`rds_mean`] estimates the mean and its uncertainty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanOptions {
    /// Apply inverse-degree weights (RDS-II); plain sample mean otherwise.
    pub weighted: bool,
    /// Bootstrap settings; `None` skips the standard error.
    pub bootstrap: Option<BootstrapOptions>,
    /// Worker threads for the bootstrap; `None` runs it serially.
    pub workers: Option<usize>,
}

impl Default for MeanOptions {
    fn default() -> Self {
        Self {
            weighted: true,
            bootstrap: Some(BootstrapOptions::default()),
            workers: None,
        }
    }
}

impl MeanOptions {
    /// Toggle inverse-degree weighting.
    pub fn with_weighting(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    /// Override or disable the bootstrap.
    pub fn with_bootstrap(mut self, bootstrap: Option<BootstrapOptions>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Run the bootstrap on `workers` threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }
}

/// Point estimate of a mean with its bootstrap distribution summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeanEstimate {
    pub variable: String,
    /// Rows with an observed value.
    pub observations: usize,
    pub estimate: f64,
    pub weighted: bool,
    pub bootstrap: Option<BootstrapSummary>,
}

impl MeanEstimate {
    /// Bootstrap standard error, when a bootstrap was run.
    pub fn std_error(&self) -> Option<f64> {
        self.bootstrap.as_ref().and_then(BootstrapSummary::std_error)
    }
}

/// Estimates the population mean of a numeric variable.
pub fn rds_mean(
    table: &AnnotatedTable,
    variable: &str,
    options: &MeanOptions,
) -> Result<MeanEstimate> {
    let rows: Vec<usize> = (0..table.len()).collect();
    let estimate = mean_over(table, &rows, variable, options.weighted)?;
    let observations = table.numeric(variable)?.iter().flatten().count();

    let statistic = mean_statistic(variable, options.weighted);
    let bootstrap = match (&options.bootstrap, options.workers) {
        (None, _) => None,
        (Some(bootstrap), None) => Some(Bootstrap::new(table, bootstrap.clone())?.run(statistic)?),
        (Some(bootstrap), Some(workers)) => {
            let parallel = ParallelOptions::new(bootstrap.clone()).with_workers(workers);
            Some(ParallelBootstrap::new(table, parallel)?.run(statistic)?)
        }
    };
    debug!("mean of `{variable}` = {estimate} over {observations} observations");

    Ok(MeanEstimate {
        variable: variable.to_owned(),
        observations,
        estimate,
        weighted: options.weighted,
        bootstrap: bootstrap.map(|result| result.summary),
    })
}

/// Weighted contingency table of one or two categorical variables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossTab {
    /// Levels of the row variable, sorted.
    pub row_levels: Vec<String>,
    /// Levels of the column variable, sorted; a single `"total"` level for one-way tables.
    pub column_levels: Vec<String>,
    /// Unweighted cell counts.
    pub counts: DMatrix<f64>,
    /// Weighted cell totals.
    pub totals: DMatrix<f64>,
    /// Cell shares of the weighted grand total.
    pub proportions: DMatrix<f64>,
}

impl CrossTab {
    /// Weighted share of each row level (margins over columns).
    pub fn row_proportions(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.proportions.nrows(),
            self.proportions.row_iter().map(|row| row.sum()),
        )
    }

    /// Weighted share of `level` in the row variable.
    pub fn proportion_of(&self, level: &str) -> Option<f64> {
        let index = self.row_levels.iter().position(|l| l == level)?;
        Some(self.proportions.row(index).sum())
    }
}

/// Tabulates `row_variable`, optionally against `column_variable`.
///
/// Rows missing either variable are skipped. With `weighted` set, cells accumulate
/// inverse-degree weights instead of counts.
pub fn rds_table(
    table: &AnnotatedTable,
    row_variable: &str,
    column_variable: Option<&str>,
    weighted: bool,
) -> Result<CrossTab> {
    let row_values = table.text(row_variable)?;
    let column_values = match column_variable {
        Some(name) => table.text(name)?,
        None => vec![Some("total".to_owned()); table.len()],
    };

    let cells: Vec<(usize, &str, &str)> = row_values
        .iter()
        .zip(&column_values)
        .enumerate()
        .filter_map(|(row, (r, c))| Some((row, r.as_deref()?, c.as_deref()?)))
        .collect();
    if cells.is_empty() {
        return Err(RdsError::insufficient_data(format!(
            "table of `{row_variable}`: no complete observations"
        )));
    }

    let row_levels: Vec<String> = levels(cells.iter().map(|(_, r, _)| *r));
    let column_levels: Vec<String> = levels(cells.iter().map(|(_, _, c)| *c));
    let mut counts = DMatrix::<f64>::zeros(row_levels.len(), column_levels.len());
    let mut totals = DMatrix::<f64>::zeros(row_levels.len(), column_levels.len());
    for &(row, r, c) in &cells {
        let i = row_levels.iter().position(|level| level == r).unwrap_or_default();
        let j = column_levels.iter().position(|level| level == c).unwrap_or_default();
        counts[(i, j)] += 1.0;
        totals[(i, j)] += if weighted { table.weight(row) } else { 1.0 };
    }
    let proportions = &totals / totals.sum();

    Ok(CrossTab {
        row_levels,
        column_levels,
        counts,
        totals,
        proportions,
    })
}

/// Distinct values, in numeric order when every level is a number and lexical otherwise.
fn levels<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut levels: Vec<String> = values
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let numbers: Option<Vec<f64>> = levels.iter().map(|l| l.parse::<f64>().ok()).collect();
    if let Some(numbers) = numbers {
        let mut keyed: Vec<(f64, String)> = numbers.into_iter().zip(levels).collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        levels = keyed.into_iter().map(|(_, level)| level).collect();
    }
    levels
}
