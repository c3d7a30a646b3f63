//! Configuration structures for tree reconstruction and bootstrap resampling.

use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::RawTable;
use crate::error::{RdsError, Result};

/// Where issued coupons live in the raw table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssuedCoupons {
    /// One column per coupon slot (`Coupon1`, `Coupon2`, ...).
    Columns(Vec<String>),
    /// A single column holding a delimited list (`"C1;C2;C3"`).
    Delimited { column: String, delimiter: char },
}

impl IssuedCoupons {
    /// Names of the raw columns that carry issued coupons.
    pub fn column_names(&self) -> Vec<&str> {
        match self {
            Self::Columns(columns) => columns.iter().map(String::as_str).collect(),
            Self::Delimited { column, .. } => vec![column.as_str()],
        }
    }
}

/// Names of the latitude and longitude columns consumed by map renderers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: String,
    pub longitude: String,
}

/// Binds logical participant roles to the column names used by a particular survey.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBindings {
    /// Unique participant identifier.
    pub id: String,
    /// Coupon the participant redeemed to enter the study.
    pub redeemed_coupon: String,
    /// Coupons handed to the participant for recruiting peers.
    pub issued_coupons: IssuedCoupons,
    /// Self-reported network size.
    pub degree: String,
    /// Optional coordinate columns.
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

impl ColumnBindings {
    /// Binds the required roles; issued coupons are read from one column per slot.
    pub fn new<S: Into<String>>(
        id: impl Into<String>,
        redeemed_coupon: impl Into<String>,
        issued_coupons: impl IntoIterator<Item = S>,
        degree: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            redeemed_coupon: redeemed_coupon.into(),
            issued_coupons: IssuedCoupons::Columns(
                issued_coupons.into_iter().map(Into::into).collect(),
            ),
            degree: degree.into(),
            coordinates: None,
        }
    }

    /// Reads issued coupons from a single delimited column instead.
    pub fn with_delimited_coupons(mut self, column: impl Into<String>, delimiter: char) -> Self {
        self.issued_coupons = IssuedCoupons::Delimited {
            column: column.into(),
            delimiter,
        };
        self
    }

    /// Binds latitude and longitude columns.
    pub fn with_coordinates(
        mut self,
        latitude: impl Into<String>,
        longitude: impl Into<String>,
    ) -> Self {
        self.coordinates = Some(Coordinates {
            latitude: latitude.into(),
            longitude: longitude.into(),
        });
        self
    }

    /// Checks that every bound column exists with the expected cell type.
    pub fn validate(&self, table: &RawTable) -> Result<()> {
        table.require(&self.id)?;
        table.require(&self.redeemed_coupon)?;
        for column in self.issued_coupons.column_names() {
            table.require(column)?;
        }
        table.require_numeric(&self.degree)?;
        if let Some(coordinates) = &self.coordinates {
            table.require_numeric(&coordinates.latitude)?;
            table.require_numeric(&coordinates.longitude)?;
        }
        Ok(())
    }
}

/// Replacement rule for zero or missing degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegreeImputation {
    /// Mean of the observed non-zero degrees.
    Mean,
    /// Median of the observed non-zero degrees.
    Median,
    /// A literal substitute value.
    Fixed(f64),
}

impl DegreeImputation {
    fn validate(self, option: &'static str) -> Result<()> {
        match self {
            Self::Fixed(value) if !(value.is_finite() && value > 0.0) => Err(
                RdsError::invalid_option(option, format!("fixed degree must be positive, got {value}")),
            ),
            _ => Ok(()),
        }
    }
}

impl FromStr for DegreeImputation {
    type Err = RdsError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            other => other.parse::<f64>().map(Self::Fixed).map_err(|_| {
                RdsError::invalid_option(
                    "degree imputation",
                    format!("expected `mean`, `median` or a number, got `{value}`"),
                )
            }),
        }
    }
}

/// What to do with participants that no seed reaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Abort with [`RdsError::OrphanParticipant`].
    #[default]
    Fail,
    /// Drop orphans together with everyone they recruited.
    Exclude,
    /// Promote participants with unresolvable coupons to seeds; cycles still fail.
    TreatAsSeed,
}

/// Controls degree imputation and orphan handling in the tree builder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeOptions {
    /// Policy applied to participants reporting a degree of zero.
    pub zero_degree: DegreeImputation,
    /// Policy applied to participants with no degree at all.
    pub missing_degree: DegreeImputation,
    /// Handling of participants unreachable from every seed.
    pub orphans: OrphanPolicy,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            zero_degree: DegreeImputation::Mean,
            missing_degree: DegreeImputation::Mean,
            orphans: OrphanPolicy::Fail,
        }
    }
}

impl TreeOptions {
    /// Override the zero-degree policy.
    pub fn with_zero_degree(mut self, policy: DegreeImputation) -> Self {
        self.zero_degree = policy;
        self
    }

    /// Override the missing-degree policy.
    pub fn with_missing_degree(mut self, policy: DegreeImputation) -> Self {
        self.missing_degree = policy;
        self
    }

    /// Override the orphan policy.
    pub fn with_orphans(mut self, policy: OrphanPolicy) -> Self {
        self.orphans = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.zero_degree.validate("zero_degree")?;
        self.missing_degree.validate("missing_degree")
    }
}

/// How recruits are drawn below each resampled node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleMethod {
    /// Uniform draws with replacement among a node's recruits.
    #[default]
    Tree,
    /// Draws with replacement proportional to the recruits' inverse-degree weights.
    DegreeWeighted,
}

/// Configuration of a bootstrap run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    /// Number of resampling trials.
    pub trials: usize,
    /// Recruit drawing scheme.
    pub method: ResampleMethod,
    /// Largest tolerated share of trials without an estimate.
    pub max_missing_fraction: f64,
    /// Base seed from which every trial's generator is derived.
    pub seed: u64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            trials: 1_000,
            method: ResampleMethod::Tree,
            max_missing_fraction: 0.1,
            seed: 0,
        }
    }
}

impl BootstrapOptions {
    /// Set the number of trials.
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    /// Set the recruit drawing scheme.
    pub fn with_method(mut self, method: ResampleMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the tolerated share of missing trials.
    pub fn with_max_missing_fraction(mut self, fraction: f64) -> Self {
        self.max_missing_fraction = fraction;
        self
    }

    /// Set the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            return Err(RdsError::invalid_option("trials", "at least one trial is required"));
        }
        if !(0.0..=1.0).contains(&self.max_missing_fraction) {
            return Err(RdsError::invalid_option(
                "max_missing_fraction",
                format!("must lie in [0, 1], got {}", self.max_missing_fraction),
            ));
        }
        Ok(())
    }
}

/// Configuration of a parallel bootstrap run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelOptions {
    /// Per-trial settings shared with the serial engine.
    pub bootstrap: BootstrapOptions,
    /// Number of worker threads.
    pub workers: usize,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapOptions::default(),
            workers: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

impl ParallelOptions {
    /// Wrap serial options, keeping the default worker count.
    pub fn new(bootstrap: BootstrapOptions) -> Self {
        Self {
            bootstrap,
            ..Self::default()
        }
    }

    /// Set the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RdsError::invalid_option("workers", "at least one worker is required"));
        }
        self.bootstrap.validate()
    }
}
