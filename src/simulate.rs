//! Seeded synthetic RDS surveys for tests, examples and benchmarks.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};

use crate::data::RawTable;
use crate::data_processing::{AnnotatedTable, TreeBuilder};
use crate::error::{RdsError, Result};
use crate::options::ColumnBindings;

/// Generator of coupon-linked recruitment surveys.
///
/// Recruit counts follow a Poisson law capped by the number of coupons. Recruits keep
/// their recruiter's `Group` with probability `homophily`, and degrees are
/// `1 + Poisson(mean_degree)` with configurable shares of zero and missing reports.
#[derive(Clone, Debug)]
pub struct SurveySimulation {
    seeds: usize,
    max_wave: u32,
    coupons: usize,
    mean_recruits: f64,
    mean_degree: f64,
    homophily: f64,
    zero_degree_rate: f64,
    missing_degree_rate: f64,
    seed: u64,
}

impl SurveySimulation {
    /// A survey started from `seeds` seeds and stopped after wave `max_wave`.
    pub fn new(seeds: usize, max_wave: u32) -> Self {
        Self {
            seeds,
            max_wave,
            coupons: 3,
            mean_recruits: 1.8,
            mean_degree: 6.0,
            homophily: 0.8,
            zero_degree_rate: 0.05,
            missing_degree_rate: 0.05,
            seed: 0,
        }
    }

    /// Number of coupons handed to each participant.
    pub fn with_coupons(mut self, coupons: usize) -> Self {
        self.coupons = coupons;
        self
    }

    /// Mean of the uncapped recruit count.
    pub fn with_mean_recruits(mut self, mean: f64) -> Self {
        self.mean_recruits = mean;
        self
    }

    /// Shares of zero and missing degree reports.
    pub fn with_degree_noise(mut self, zero_rate: f64, missing_rate: f64) -> Self {
        self.zero_degree_rate = zero_rate;
        self.missing_degree_rate = missing_rate;
        self
    }

    /// Seed of the generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Column bindings matching [`raw_table`](Self::raw_table).
    pub fn bindings(&self) -> ColumnBindings {
        let issued: Vec<String> = (1..=self.coupons).map(|k| format!("Coupon{k}")).collect();
        ColumnBindings::new("ID", "CouponR", issued, "Degree")
            .with_coordinates("Latitude", "Longitude")
    }

    /// Generates the raw survey records.
    pub fn raw_table(&self) -> Result<RawTable> {
        if self.seeds == 0 {
            return Err(RdsError::invalid_option("seeds", "at least one seed is required"));
        }
        let recruits = Poisson::new(self.mean_recruits)
            .map_err(|e| RdsError::invalid_option("mean_recruits", e.to_string()))?;
        let degrees = Poisson::new(self.mean_degree)
            .map_err(|e| RdsError::invalid_option("mean_degree", e.to_string()))?;
        let ages = Normal::<f64>::new(35.0, 9.0)
            .map_err(|e| RdsError::invalid_option("age distribution", e.to_string()))?;
        let jitter = Normal::<f64>::new(0.0, 0.01)
            .map_err(|e| RdsError::invalid_option("coordinate jitter", e.to_string()))?;

        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut people: Vec<Person> = (0..self.seeds)
            .map(|_| Person {
                redeemed: None,
                wave: 0,
                group: if rng.gen_bool(0.5) { "A" } else { "B" },
                latitude: 42.28 + rng.gen_range(-0.2..0.2),
                longitude: -83.74 + rng.gen_range(-0.2..0.2),
            })
            .collect();

        let mut next = 0;
        while next < people.len() {
            let recruiter = people[next].clone();
            if recruiter.wave < self.max_wave {
                let count = (recruits.sample(&mut rng) as usize).min(self.coupons);
                for slot in 1..=count {
                    let group = if rng.gen_bool(self.homophily) {
                        recruiter.group
                    } else if recruiter.group == "A" {
                        "B"
                    } else {
                        "A"
                    };
                    people.push(Person {
                        redeemed: Some(coupon_code(next, slot)),
                        wave: recruiter.wave + 1,
                        group,
                        latitude: recruiter.latitude + jitter.sample(&mut rng),
                        longitude: recruiter.longitude + jitter.sample(&mut rng),
                    });
                }
            }
            next += 1;
        }

        let n = people.len();
        let degree_column: Vec<Option<f64>> = (0..n)
            .map(|_| {
                let draw: f64 = rng.gen();
                if draw < self.missing_degree_rate {
                    None
                } else if draw < self.missing_degree_rate + self.zero_degree_rate {
                    Some(0.0)
                } else {
                    Some(1.0 + degrees.sample(&mut rng))
                }
            })
            .collect();
        let age_column: Vec<Option<f64>> = (0..n)
            .map(|_| Some(ages.sample(&mut rng).max(18.0).round()))
            .collect();

        let mut builder = RawTable::builder()
            .text("ID", (0..n).map(|i| Some(participant_id(i))))
            .text("CouponR", people.iter().map(|p| p.redeemed.clone()));
        for slot in 1..=self.coupons {
            builder = builder.text(
                format!("Coupon{slot}"),
                (0..n).map(|i| Some(coupon_code(i, slot))),
            );
        }
        builder
            .numeric("Degree", degree_column)
            .numeric("Age", age_column)
            .text("Group", people.iter().map(|p| Some(p.group)))
            .numeric("Latitude", people.iter().map(|p| Some(p.latitude)))
            .numeric("Longitude", people.iter().map(|p| Some(p.longitude)))
            .build()
    }

    /// Generates the survey and reconstructs its recruitment forest.
    pub fn annotated(&self) -> Result<AnnotatedTable> {
        TreeBuilder::new(self.bindings()).build(&self.raw_table()?)
    }
}

#[derive(Clone, Debug)]
struct Person {
    redeemed: Option<String>,
    wave: u32,
    group: &'static str,
    latitude: f64,
    longitude: f64,
}

fn participant_id(index: usize) -> String {
    format!("P{:04}", index + 1)
}

fn coupon_code(issuer: usize, slot: usize) -> String {
    format!("{}-{slot}", participant_id(issuer))
}
