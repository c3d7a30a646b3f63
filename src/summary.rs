//! Summary statistics of a bootstrap distribution.

use serde::{Deserialize, Serialize};

/// Diagnostics and moments of the valid bootstrap estimates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSummary {
    /// Number of trials requested.
    pub trials: usize,
    /// Trials that produced an estimate.
    pub valid: usize,
    /// Trials recorded as missing.
    pub missing: usize,
    /// Mean of the valid estimates.
    pub mean: f64,
    /// Sample variance (`n - 1` denominator); `None` with fewer than two estimates.
    pub variance: Option<f64>,
    /// 2.5th percentile.
    pub lower: f64,
    /// Median.
    pub median: f64,
    /// 97.5th percentile.
    pub upper: f64,
}

impl BootstrapSummary {
    /// Summarizes `sorted`, the ascending valid estimates of a run with `trials` trials.
    pub(crate) fn from_sorted(sorted: &[f64], trials: usize) -> Self {
        let valid = sorted.len();
        let mean = sorted.iter().sum::<f64>() / valid as f64;
        let variance = (valid > 1).then(|| {
            sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (valid - 1) as f64
        });
        Self {
            trials,
            valid,
            missing: trials - valid,
            mean,
            variance,
            lower: percentile(sorted, 0.025),
            median: percentile(sorted, 0.5),
            upper: percentile(sorted, 0.975),
        }
    }

    /// Bootstrap standard error.
    pub fn std_error(&self) -> Option<f64> {
        self.variance.map(f64::sqrt)
    }

    /// Share of trials recorded as missing.
    pub fn missing_fraction(&self) -> f64 {
        self.missing as f64 / self.trials as f64
    }
}

/// Linear-interpolation percentile of ascending `sorted` values, `q` in `[0, 1]`.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let below = position.floor() as usize;
            let above = position.ceil() as usize;
            let fraction = position - below as f64;
            sorted[below] + (sorted[above] - sorted[below]) * fraction
        }
    }
}
