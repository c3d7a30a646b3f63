//! Parallel execution of bootstrap trials on a dedicated worker pool.
//!
//! Trials are dispatched as indices; each worker derives the trial's generator from
//! the base seed and the index (see [`crate::seeding`]), so the estimates do not
//! depend on the number of workers or the order in which trials finish. Outcomes are
//! collected as `(trial, outcome)` pairs and sorted by trial before aggregation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use log::{debug, info};
use rayon::prelude::*;

use crate::bootstrap::{aggregate, Bootstrap, BootstrapResult, Resample, TrialOutcome};
use crate::data_processing::AnnotatedTable;
use crate::error::{RdsError, Result};
use crate::options::ParallelOptions;

/// Bootstrap engine that spreads trials over a fixed number of worker threads.
#[derive(Debug)]
pub struct ParallelBootstrap<'a> {
    engine: Bootstrap<'a>,
    workers: usize,
}

impl<'a> ParallelBootstrap<'a> {
    /// Prepares a parallel run after validating the options and the table.
    pub fn new(table: &'a AnnotatedTable, options: ParallelOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            engine: Bootstrap::new(table, options.bootstrap)?,
            workers: options.workers,
        })
    }

    /// The serial engine whose trials are distributed.
    pub fn engine(&self) -> &Bootstrap<'a> {
        &self.engine
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every trial on the pool and summarizes the estimates in trial order.
    ///
    /// A panicking trial aborts the whole run with [`RdsError::WorkerPanicked`]; no
    /// partial result is returned.
    pub fn run<F>(&self, statistic: F) -> Result<BootstrapResult>
    where
        F: Fn(&Resample<'_>) -> Result<f64> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|index| format!("rds-bootstrap-{index}"))
            .build()
            .map_err(|error| RdsError::WorkerPool {
                message: error.to_string(),
            })?;
        let trials = self.engine.options().trials;
        info!("running {trials} bootstrap trials on {} workers", self.workers);

        let mut outcomes: Vec<(usize, TrialOutcome)> = pool.install(|| {
            (0..trials)
                .into_par_iter()
                .map(|trial| {
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        self.engine.run_trial(trial, &statistic)
                    }))
                    .map(|outcome| (trial, outcome))
                    .map_err(|payload| RdsError::WorkerPanicked {
                        trial,
                        message: panic_message(payload.as_ref()),
                    })
                })
                .collect::<Result<Vec<_>>>()
        })?;
        debug!("collected {} trial outcomes", outcomes.len());

        outcomes.sort_unstable_by_key(|(trial, _)| *trial);
        let ordered = outcomes.into_iter().map(|(_, outcome)| outcome).collect();
        aggregate(ordered, self.engine.options())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
