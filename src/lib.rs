//! Respondent-Driven Sampling (RDS) analysis.
//!
//! RDS surveys grow from a handful of seeds: every participant receives coupons and
//! hands them to peers, who redeem them to join. This crate
//!
//! - reconstructs the recruitment forest from raw coupon records and annotates every
//!   participant with its seed, wave, recruiter and imputed degree (`data_processing`),
//! - resamples that forest with a tree bootstrap that preserves recruitment dependence
//!   (`bootstrap`),
//! - distributes bootstrap trials over a worker pool with per-trial seeding, so results
//!   do not depend on the number of workers (`parallel_bootstrap`), and
//! - provides RDS-II means and weighted tabulations on top (`estimation`).
//!
//! # Quick start
//!
//! ```no_run
//! use rdstools::data::RawTable;
//! use rdstools::estimation::{rds_mean, MeanOptions};
//! use rdstools::{BootstrapOptions, ColumnBindings, ParallelBootstrap, ParallelOptions, TreeBuilder};
//!
//! let raw = RawTable::builder()
//!     .text("ID", [Some("A"), Some("B"), Some("C")])
//!     .text("CouponR", [None, Some("a1"), Some("a2")])
//!     .text("Coupon1", [Some("a1"), None, None])
//!     .text("Coupon2", [Some("a2"), None, None])
//!     .numeric("Degree", [Some(4.0), Some(0.0), None])
//!     .numeric("Age", [Some(31.0), Some(25.0), Some(44.0)])
//!     .build()
//!     .expect("well-formed table");
//!
//! let bindings = ColumnBindings::new("ID", "CouponR", ["Coupon1", "Coupon2"], "Degree");
//! let table = TreeBuilder::new(bindings).build(&raw).expect("valid recruitment forest");
//! println!("seeds: {:?}, waves: {:?}", table.seed_ids(), table.waves());
//!
//! let options = ParallelOptions::new(BootstrapOptions::default().with_seed(42)).with_workers(4);
//! let result = ParallelBootstrap::new(&table, options)
//!     .expect("valid options")
//!     .run(|resample| Ok(resample.len() as f64))
//!     .expect("stable bootstrap");
//! println!("resample size: {:?}", result.summary);
//!
//! let age = rds_mean(&table, "Age", &MeanOptions::default()).expect("mean");
//! println!("RDS-II mean age {} (se {:?})", age.estimate, age.std_error());
//! ```
//!
//! Map rendering, graph layout and regression live outside this crate; they consume
//! [`AnnotatedTable`] through its discovery queries (`seed_ids`, `waves`, `rows_for`,
//! `recruitment_edges`, `coordinates`).

pub mod bootstrap;
pub mod data;
pub mod data_processing;
pub mod error;
pub mod estimation;
pub mod forest;
pub mod options;
pub mod parallel_bootstrap;
pub mod seeding;
pub mod simulate;
pub mod summary;

pub use bootstrap::{Bootstrap, BootstrapResult, Resample, TrialFailure};
pub use data_processing::{AnnotatedTable, Participant, TreeBuilder};
pub use error::{OrphanReason, RdsError, Result};
pub use options::{
    BootstrapOptions, ColumnBindings, DegreeImputation, OrphanPolicy, ParallelOptions,
    ResampleMethod, TreeOptions,
};
pub use parallel_bootstrap::ParallelBootstrap;
pub use summary::BootstrapSummary;
