//! Reconstruction of the recruitment forest from raw coupon records.
//!
//! [`TreeBuilder`] turns a [`RawTable`] into an immutable [`AnnotatedTable`]: each
//! participant is linked to the unique issuer of the coupon they redeemed, placed in a
//! wave below its seed by breadth-first traversal, and given an imputed degree.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::data::{Column, RawTable};
use crate::error::{OrphanReason, RdsError, Result};
use crate::forest::{Link, RecruitmentForest, Unreachable};
use crate::options::{ColumnBindings, DegreeImputation, IssuedCoupons, OrphanPolicy, TreeOptions};

/// Seed identifier of each participant's chain.
pub const SEED_COLUMN: &str = "SEED";
/// Identifier of the recruiter, missing for seeds.
pub const RECRUITER_COLUMN: &str = "R_ID";
/// Number of coupon hops from the seed.
pub const WAVE_COLUMN: &str = "WAVE";
/// Degree after zero/missing imputation.
pub const DEGREE_IMPUTED_COLUMN: &str = "DEGREE_IMP";
/// Inverse imputed degree.
pub const WEIGHT_COLUMN: &str = "WEIGHT";

const DERIVED_COLUMNS: [&str; 5] = [
    SEED_COLUMN,
    RECRUITER_COLUMN,
    WAVE_COLUMN,
    DEGREE_IMPUTED_COLUMN,
    WEIGHT_COLUMN,
];

/// One participant of the annotated table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub redeemed_coupon: Option<String>,
    pub issued_coupons: Vec<String>,
    /// Degree as reported, `None` when missing.
    pub degree: Option<f64>,
    pub degree_imputed: f64,
    pub seed_id: String,
    pub parent_id: Option<String>,
    pub wave: u32,
}

impl Participant {
    /// Returns `true` for participants who entered without a recruiter.
    pub fn is_seed(&self) -> bool {
        self.parent_id.is_none()
    }

    /// RDS-II sampling weight `1 / degree`.
    pub fn weight(&self) -> f64 {
        1.0 / self.degree_imputed
    }
}

/// A participant dropped under [`OrphanPolicy::Exclude`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExcludedParticipant {
    pub id: String,
    pub reason: OrphanReason,
}

/// Participant counts per wave and per seed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecruitmentSummary {
    pub participants: usize,
    pub per_wave: BTreeMap<u32, usize>,
    pub per_seed: BTreeMap<String, usize>,
}

impl RecruitmentSummary {
    /// Deepest wave observed.
    pub fn max_wave(&self) -> Option<u32> {
        self.per_wave.keys().next_back().copied()
    }
}

/// Recruitment records annotated with seed, wave, recruiter and imputed degree.
///
/// Built once by [`TreeBuilder::build`] and never mutated afterwards; seed and wave
/// filters return row indices.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedTable {
    raw: RawTable,
    participants: Vec<Participant>,
    forest: RecruitmentForest,
    bindings: ColumnBindings,
    excluded: Vec<ExcludedParticipant>,
}

impl AnnotatedTable {
    /// Number of participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Returns `true` when no participant was retained.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participants in the order of the raw table.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Participant at `row`.
    pub fn participant(&self, row: usize) -> &Participant {
        &self.participants[row]
    }

    /// Row of the participant identified by `id`.
    pub fn row_of(&self, id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.id == id)
    }

    /// The recruitment forest; node indices are table rows.
    pub fn forest(&self) -> &RecruitmentForest {
        &self.forest
    }

    /// Retained raw rows, without derived columns.
    pub fn raw(&self) -> &RawTable {
        &self.raw
    }

    /// Column bindings the table was built with.
    pub fn bindings(&self) -> &ColumnBindings {
        &self.bindings
    }

    /// Participants dropped because no seed reaches them.
    pub fn excluded(&self) -> &[ExcludedParticipant] {
        &self.excluded
    }

    /// Inverse-degree weight of `row`.
    pub fn weight(&self, row: usize) -> f64 {
        self.participants[row].weight()
    }

    /// Inverse-degree weights of every row.
    pub fn weights(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.participants.iter().map(Participant::weight))
    }

    /// Imputed degrees of every row.
    pub fn imputed_degrees(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.participants.iter().map(|p| p.degree_imputed))
    }

    /// Distinct seed identifiers, sorted.
    pub fn seed_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.seed_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct waves present, ascending.
    pub fn waves(&self) -> Vec<u32> {
        self.participants
            .iter()
            .map(|p| p.wave)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rows belonging to any of `seed_ids` and lying in any of `waves`.
    pub fn rows_for<S: AsRef<str>>(&self, seed_ids: &[S], waves: &[u32]) -> Vec<usize> {
        self.participants
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                waves.contains(&p.wave) && seed_ids.iter().any(|s| s.as_ref() == p.seed_id)
            })
            .map(|(row, _)| row)
            .collect()
    }

    /// Recruiter to recruit identifier pairs, for graph renderers.
    pub fn recruitment_edges(&self) -> Vec<(&str, &str)> {
        self.participants
            .iter()
            .filter_map(|p| p.parent_id.as_deref().map(|parent| (parent, p.id.as_str())))
            .collect()
    }

    /// Latitude and longitude per row when coordinate columns are bound.
    pub fn coordinates(&self) -> Option<Vec<Option<(f64, f64)>>> {
        let coordinates = self.bindings.coordinates.as_ref()?;
        let latitude = self.raw.column(&coordinates.latitude)?;
        let longitude = self.raw.column(&coordinates.longitude)?;
        Some(
            (0..self.len())
                .map(|row| latitude.number(row).zip(longitude.number(row)))
                .collect(),
        )
    }

    /// Participant counts per wave and per seed.
    pub fn recruitment_summary(&self) -> RecruitmentSummary {
        let mut per_wave = BTreeMap::new();
        let mut per_seed = BTreeMap::new();
        for participant in &self.participants {
            *per_wave.entry(participant.wave).or_insert(0) += 1;
            *per_seed.entry(participant.seed_id.clone()).or_insert(0) += 1;
        }
        RecruitmentSummary {
            participants: self.len(),
            per_wave,
            per_seed,
        }
    }

    /// Looks up a raw or derived column and returns its numeric cells.
    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let participants = self.participants.iter();
        match name {
            WAVE_COLUMN => Ok(participants.map(|p| Some(f64::from(p.wave))).collect()),
            DEGREE_IMPUTED_COLUMN => Ok(participants.map(|p| Some(p.degree_imputed)).collect()),
            WEIGHT_COLUMN => Ok(participants.map(|p| Some(p.weight())).collect()),
            _ => {
                let column = self.raw.require_numeric(name)?;
                Ok((0..self.len()).map(|row| column.number(row)).collect())
            }
        }
    }

    /// Looks up a raw or derived column and returns its cells as text.
    pub fn text(&self, name: &str) -> Result<Vec<Option<String>>> {
        match name {
            SEED_COLUMN => Ok(self.participants.iter().map(|p| Some(p.seed_id.clone())).collect()),
            RECRUITER_COLUMN => Ok(self.participants.iter().map(|p| p.parent_id.clone()).collect()),
            WAVE_COLUMN | DEGREE_IMPUTED_COLUMN | WEIGHT_COLUMN => {
                let column = Column::Numeric(self.numeric(name)?);
                Ok((0..self.len()).map(|row| column.text(row)).collect())
            }
            _ => {
                let column = self.raw.require(name)?;
                Ok((0..self.len()).map(|row| column.text(row)).collect())
            }
        }
    }

    /// Flattens the table back to columns: retained raw columns followed by
    /// `SEED`, `R_ID`, `WAVE`, `DEGREE_IMP` and `WEIGHT`.
    pub fn to_frame(&self) -> RawTable {
        let mut frame = self.raw.clone();
        let participants = &self.participants;
        frame.push_column(
            SEED_COLUMN,
            Column::Text(participants.iter().map(|p| Some(p.seed_id.clone())).collect()),
        );
        frame.push_column(
            RECRUITER_COLUMN,
            Column::Text(participants.iter().map(|p| p.parent_id.clone()).collect()),
        );
        frame.push_column(
            WAVE_COLUMN,
            Column::Numeric(participants.iter().map(|p| Some(f64::from(p.wave))).collect()),
        );
        frame.push_column(
            DEGREE_IMPUTED_COLUMN,
            Column::Numeric(participants.iter().map(|p| Some(p.degree_imputed)).collect()),
        );
        frame.push_column(
            WEIGHT_COLUMN,
            Column::Numeric(participants.iter().map(|p| Some(p.weight())).collect()),
        );
        frame
    }
}

/// Builds [`AnnotatedTable`]s from raw recruitment records.
#[derive(Clone, Debug)]
pub struct TreeBuilder {
    bindings: ColumnBindings,
    options: TreeOptions,
}

/// Fields read from one raw row before linking.
struct RawRecord {
    id: String,
    redeemed: Option<String>,
    issued: Vec<String>,
    degree: Option<f64>,
}

impl TreeBuilder {
    /// Creates a builder with default imputation and orphan handling.
    pub fn new(bindings: ColumnBindings) -> Self {
        Self {
            bindings,
            options: TreeOptions::default(),
        }
    }

    /// Overrides imputation and orphan handling.
    pub fn with_options(mut self, options: TreeOptions) -> Self {
        self.options = options;
        self
    }

    /// Accessor for the configured options.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Reconstructs the recruitment forest and annotates every participant.
    pub fn build(&self, table: &RawTable) -> Result<AnnotatedTable> {
        self.options.validate()?;
        self.bindings.validate(table)?;
        if let Some(column) = DERIVED_COLUMNS.iter().find(|c| table.has_column(c)) {
            return Err(RdsError::ColumnConflict {
                column: (*column).to_owned(),
            });
        }

        let records = self.read_records(table)?;
        let issuers = issuer_map(&records)?;
        let links = self.resolve_links(&records, &issuers);

        let (rows, forest, excluded) = match RecruitmentForest::from_links(&links) {
            Ok(forest) => ((0..records.len()).collect::<Vec<_>>(), forest, Vec::new()),
            Err(Unreachable(orphans)) => {
                let (rows, retained, excluded) = self.handle_orphans(&records, &links, &orphans)?;
                // Retained rows all descend from a seed, so the second pass is complete.
                let forest = RecruitmentForest::from_links(&retained).map_err(|Unreachable(left)| {
                    RdsError::OrphanParticipant {
                        id: records[rows[left[0]]].id.clone(),
                        reason: OrphanReason::Cycle,
                    }
                })?;
                (rows, forest, excluded)
            }
        };

        let degrees: Vec<Option<f64>> = rows.iter().map(|&r| records[r].degree).collect();
        let imputed = impute_degrees(&degrees, &self.options)?;

        let participants: Vec<Participant> = rows
            .iter()
            .zip(imputed)
            .enumerate()
            .map(|(index, (&row, degree_imputed))| {
                let node = forest.node(index);
                let record = &records[row];
                Participant {
                    id: record.id.clone(),
                    redeemed_coupon: record.redeemed.clone(),
                    issued_coupons: record.issued.clone(),
                    degree: record.degree,
                    degree_imputed,
                    seed_id: records[rows[node.seed()]].id.clone(),
                    parent_id: node.parent().map(|parent| records[rows[parent]].id.clone()),
                    wave: node.wave(),
                }
            })
            .collect();

        info!(
            "built recruitment forest: {} participants, {} seeds, max wave {}",
            participants.len(),
            forest.seeds().len(),
            forest.max_wave().unwrap_or(0)
        );

        Ok(AnnotatedTable {
            raw: table.select_rows(&rows),
            participants,
            forest,
            bindings: self.bindings.clone(),
            excluded,
        })
    }

    fn read_records(&self, table: &RawTable) -> Result<Vec<RawRecord>> {
        let ids = table.require(&self.bindings.id)?;
        let redeemed = table.require(&self.bindings.redeemed_coupon)?;
        let degrees = table.require_numeric(&self.bindings.degree)?;
        let issued_columns = self
            .bindings
            .issued_coupons
            .column_names()
            .into_iter()
            .map(|name| table.require(name))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashMap::with_capacity(table.row_count());
        let mut records = Vec::with_capacity(table.row_count());
        for row in 0..table.row_count() {
            let id = ids.text(row).ok_or(RdsError::MissingParticipantId { row })?;
            if seen.insert(id.clone(), row).is_some() {
                return Err(RdsError::DuplicateParticipant { id });
            }

            let degree = degrees.number(row);
            if let Some(value) = degree.filter(|v| *v < 0.0 || v.is_infinite()) {
                return Err(RdsError::InvalidDegree { id, degree: value });
            }

            let mut issued: Vec<String> = Vec::new();
            let cells = issued_columns.iter().filter_map(|column| column.text(row));
            match &self.bindings.issued_coupons {
                IssuedCoupons::Columns(_) => issued.extend(cells),
                IssuedCoupons::Delimited { delimiter, .. } => {
                    for cell in cells {
                        issued.extend(
                            cell.split(*delimiter)
                                .map(str::trim)
                                .filter(|coupon| !coupon.is_empty())
                                .map(str::to_owned),
                        );
                    }
                }
            }
            let mut unique = BTreeSet::new();
            issued.retain(|coupon| unique.insert(coupon.clone()));

            records.push(RawRecord {
                id,
                redeemed: redeemed.text(row),
                issued,
                degree,
            });
        }
        Ok(records)
    }

    fn resolve_links(&self, records: &[RawRecord], issuers: &HashMap<&str, usize>) -> Vec<Link> {
        for (coupon, first, second) in repeated_redemptions(records) {
            warn!("coupon `{coupon}` redeemed by both `{first}` and `{second}`");
        }

        records
            .iter()
            .map(|record| match record.redeemed.as_deref() {
                None => Link::Root,
                Some(coupon) => match issuers.get(coupon) {
                    Some(&issuer) => Link::Recruiter(issuer),
                    None if self.options.orphans == OrphanPolicy::TreatAsSeed => Link::Root,
                    None => Link::Detached,
                },
            })
            .collect()
    }

    /// Applies the orphan policy, returning the retained rows and their remapped links.
    fn handle_orphans(
        &self,
        records: &[RawRecord],
        links: &[Link],
        orphans: &[usize],
    ) -> Result<(Vec<usize>, Vec<Link>, Vec<ExcludedParticipant>)> {
        let excluded: Vec<ExcludedParticipant> = orphans
            .iter()
            .map(|&row| ExcludedParticipant {
                id: records[row].id.clone(),
                reason: orphan_reason(records, links, row),
            })
            .collect();

        let cycle = excluded.iter().find(|e| e.reason == OrphanReason::Cycle);
        let fatal = match self.options.orphans {
            OrphanPolicy::Exclude => None,
            OrphanPolicy::Fail => excluded.first(),
            OrphanPolicy::TreatAsSeed => cycle,
        };
        if let Some(orphan) = fatal {
            return Err(RdsError::OrphanParticipant {
                id: orphan.id.clone(),
                reason: orphan.reason.clone(),
            });
        }

        warn!(
            "excluding {} participants unreachable from any seed",
            excluded.len()
        );
        for orphan in &excluded {
            debug!("excluded `{}`: {}", orphan.id, orphan.reason);
        }

        let mut new_index = vec![None; records.len()];
        let mut rows = Vec::with_capacity(records.len() - orphans.len());
        let mut is_orphan = vec![false; records.len()];
        for &row in orphans {
            is_orphan[row] = true;
        }
        for row in (0..records.len()).filter(|&r| !is_orphan[r]) {
            new_index[row] = Some(rows.len());
            rows.push(row);
        }

        let remapped = rows
            .iter()
            .map(|&row| match links[row] {
                Link::Recruiter(parent) => new_index[parent].map_or(Link::Detached, Link::Recruiter),
                other => other,
            })
            .collect();
        Ok((rows, remapped, excluded))
    }
}

/// Maps each issued coupon to the row of its unique issuer.
fn issuer_map(records: &[RawRecord]) -> Result<HashMap<&str, usize>> {
    let mut issuers: HashMap<&str, usize> = HashMap::new();
    for (row, record) in records.iter().enumerate() {
        for coupon in &record.issued {
            if let Some(&first) = issuers.get(coupon.as_str()) {
                return Err(RdsError::AmbiguousCoupon {
                    coupon: coupon.clone(),
                    first_issuer: records[first].id.clone(),
                    second_issuer: record.id.clone(),
                });
            }
            issuers.insert(coupon.as_str(), row);
        }
    }
    Ok(issuers)
}

/// Coupons redeemed more than once, as `(coupon, first redeemer, later redeemer)`.
fn repeated_redemptions(records: &[RawRecord]) -> Vec<(&str, &str, &str)> {
    let mut redeemers: HashMap<&str, &str> = HashMap::new();
    let mut repeated = Vec::new();
    for record in records {
        let Some(coupon) = record.redeemed.as_deref() else {
            continue;
        };
        match redeemers.get(coupon) {
            Some(&first) => repeated.push((coupon, first, record.id.as_str())),
            None => {
                redeemers.insert(coupon, &record.id);
            }
        }
    }
    repeated
}

/// Walks up the recruiter chain of an unreachable row to find why it is detached.
fn orphan_reason(records: &[RawRecord], links: &[Link], row: usize) -> OrphanReason {
    let mut visited = vec![false; links.len()];
    let mut current = row;
    loop {
        if visited[current] {
            return OrphanReason::Cycle;
        }
        visited[current] = true;
        match links[current] {
            Link::Recruiter(parent) => current = parent,
            Link::Detached if current == row => {
                return OrphanReason::UnresolvedCoupon {
                    coupon: records[row].redeemed.clone().unwrap_or_default(),
                }
            }
            Link::Detached => {
                return OrphanReason::UnresolvedAncestor {
                    ancestor: records[current].id.clone(),
                }
            }
            // A chain reaching a root would have been traversed.
            Link::Root => return OrphanReason::Cycle,
        }
    }
}

/// Fills zero and missing degrees according to the configured policies.
fn impute_degrees(degrees: &[Option<f64>], options: &TreeOptions) -> Result<Vec<f64>> {
    let mut support: Vec<f64> = degrees.iter().flatten().copied().filter(|d| *d > 0.0).collect();
    support.sort_by(f64::total_cmp);

    let fill = |policy: DegreeImputation, condition: &str| -> Result<f64> {
        match policy {
            DegreeImputation::Fixed(value) => Ok(value),
            _ if support.is_empty() => Err(RdsError::insufficient_data(format!(
                "imputing {condition} degrees: no positive degree observed"
            ))),
            DegreeImputation::Mean => Ok(support.iter().sum::<f64>() / support.len() as f64),
            DegreeImputation::Median => Ok(median(&support)),
        }
    };

    let zeros = degrees.iter().filter(|d| **d == Some(0.0)).count();
    let missing = degrees.iter().filter(|d| d.is_none()).count();
    let zero_fill = if zeros > 0 { fill(options.zero_degree, "zero")? } else { 0.0 };
    let missing_fill = if missing > 0 { fill(options.missing_degree, "missing")? } else { 0.0 };
    if zeros + missing > 0 {
        debug!("imputed {zeros} zero and {missing} missing degrees");
    }

    Ok(degrees
        .iter()
        .map(|degree| match degree {
            None => missing_fill,
            Some(d) if *d == 0.0 => zero_fill,
            Some(d) => *d,
        })
        .collect())
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn bindings() -> ColumnBindings {
        ColumnBindings::new("ID", "CouponR", ["Coupon1", "Coupon2"], "Degree")
    }

    /// A seeds two chains: A -> B -> D and A -> C; E is a second seed.
    fn survey() -> RawTable {
        RawTable::builder()
            .text("ID", [Some("A"), Some("B"), Some("C"), Some("D"), Some("E")])
            .text("CouponR", [None, Some("a1"), Some("a2"), Some("b1"), None])
            .text("Coupon1", [Some("a1"), Some("b1"), Some("c1"), None, Some("e1")])
            .text("Coupon2", [Some("a2"), Some("b2"), None, None, None])
            .numeric("Degree", [Some(4.0), Some(0.0), None, Some(2.0), Some(6.0)])
            .build()
            .unwrap()
    }

    #[test]
    fn builds_waves_seeds_and_recruiters() {
        let table = TreeBuilder::new(bindings()).build(&survey()).unwrap();
        let waves: Vec<u32> = table.participants().iter().map(|p| p.wave).collect();
        let seeds: Vec<&str> = table.participants().iter().map(|p| p.seed_id.as_str()).collect();
        let parents: Vec<Option<&str>> =
            table.participants().iter().map(|p| p.parent_id.as_deref()).collect();

        assert_eq!(waves, vec![0, 1, 1, 2, 0]);
        assert_eq!(seeds, vec!["A", "A", "A", "A", "E"]);
        assert_eq!(parents, vec![None, Some("A"), Some("A"), Some("B"), None]);
        assert_eq!(table.seed_ids(), vec!["A", "E"]);
        assert_eq!(table.waves(), vec![0, 1, 2]);
        assert_eq!(table.recruitment_edges(), vec![("A", "B"), ("A", "C"), ("B", "D")]);
    }

    #[test]
    fn imputes_zero_and_missing_degrees_with_mean() {
        let table = TreeBuilder::new(bindings()).build(&survey()).unwrap();
        let imputed = table.imputed_degrees();
        assert_relative_eq!(imputed[1], 4.0);
        assert_relative_eq!(imputed[2], 4.0);
        assert_relative_eq!(imputed[3], 2.0);
        assert_eq!(table.participant(1).degree, Some(0.0));
        assert_relative_eq!(table.weight(4), 1.0 / 6.0);
    }

    #[test]
    fn zero_and_missing_policies_are_independent() {
        let options = TreeOptions::default()
            .with_zero_degree(DegreeImputation::Fixed(1.0))
            .with_missing_degree(DegreeImputation::Median);
        let table = TreeBuilder::new(bindings())
            .with_options(options)
            .build(&survey())
            .unwrap();
        assert_relative_eq!(table.participant(1).degree_imputed, 1.0);
        assert_relative_eq!(table.participant(2).degree_imputed, 4.0);
    }

    #[test]
    fn mean_without_support_is_insufficient() {
        let raw = RawTable::builder()
            .text("ID", [Some("A"), Some("B")])
            .text("CouponR", [None::<&str>, None])
            .text("Coupon1", [None::<&str>, None])
            .text("Coupon2", [None::<&str>, None])
            .numeric("Degree", [Some(0.0), None])
            .build()
            .unwrap();
        let result = TreeBuilder::new(bindings()).build(&raw);
        assert!(matches!(result, Err(RdsError::InsufficientData { .. })));

        let options = TreeOptions::default()
            .with_zero_degree(DegreeImputation::Fixed(3.0))
            .with_missing_degree(DegreeImputation::Fixed(5.0));
        let table = TreeBuilder::new(bindings()).with_options(options).build(&raw).unwrap();
        assert_eq!(table.imputed_degrees().as_slice(), &[3.0, 5.0]);
    }

    #[test]
    fn ambiguous_coupon_names_both_issuers() {
        let raw = RawTable::builder()
            .text("ID", [Some("A"), Some("B")])
            .text("CouponR", [None::<&str>, None])
            .text("Coupon1", [Some("x"), Some("x")])
            .text("Coupon2", [None::<&str>, None])
            .numeric("Degree", [Some(1.0), Some(1.0)])
            .build()
            .unwrap();
        match TreeBuilder::new(bindings()).build(&raw) {
            Err(RdsError::AmbiguousCoupon {
                coupon,
                first_issuer,
                second_issuer,
            }) => {
                assert_eq!(coupon, "x");
                assert_eq!(first_issuer, "A");
                assert_eq!(second_issuer, "B");
            }
            other => panic!("expected ambiguous coupon, got {other:?}"),
        }
    }

    #[test]
    fn orphan_descendants_are_reported_and_excluded() {
        // C redeems an unknown coupon and recruits D.
        let raw = RawTable::builder()
            .text("ID", [Some("A"), Some("B"), Some("C"), Some("D")])
            .text("CouponR", [None, Some("a1"), Some("zz"), Some("c1")])
            .text("Coupon1", [Some("a1"), None, Some("c1"), None])
            .text("Coupon2", [None::<&str>, None, None, None])
            .numeric("Degree", [Some(1.0), Some(2.0), Some(3.0), Some(4.0)])
            .build()
            .unwrap();

        match TreeBuilder::new(bindings()).build(&raw) {
            Err(RdsError::OrphanParticipant { id, reason }) => {
                assert_eq!(id, "C");
                assert_eq!(reason, OrphanReason::UnresolvedCoupon { coupon: "zz".into() });
            }
            other => panic!("expected orphan, got {other:?}"),
        }

        let options = TreeOptions::default().with_orphans(OrphanPolicy::Exclude);
        let table = TreeBuilder::new(bindings()).with_options(options).build(&raw).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.excluded().len(), 2);
        assert_eq!(
            table.excluded()[1].reason,
            OrphanReason::UnresolvedAncestor { ancestor: "C".into() }
        );
        assert_eq!(table.raw().row_count(), 2);

        let options = TreeOptions::default().with_orphans(OrphanPolicy::TreatAsSeed);
        let table = TreeBuilder::new(bindings()).with_options(options).build(&raw).unwrap();
        assert_eq!(table.seed_ids(), vec!["A", "C"]);
        assert_eq!(table.participant(3).wave, 1);
        assert_eq!(table.participant(3).seed_id, "C");
    }

    #[test]
    fn cycles_fail_even_when_unresolved_coupons_become_seeds() {
        let raw = RawTable::builder()
            .text("ID", [Some("A"), Some("B"), Some("C")])
            .text("CouponR", [None, Some("c1"), Some("b1")])
            .text("Coupon1", [None, Some("b1"), Some("c1")])
            .text("Coupon2", [None::<&str>, None, None])
            .numeric("Degree", [Some(1.0), Some(1.0), Some(1.0)])
            .build()
            .unwrap();
        let options = TreeOptions::default().with_orphans(OrphanPolicy::TreatAsSeed);
        match TreeBuilder::new(bindings()).with_options(options).build(&raw) {
            Err(RdsError::OrphanParticipant { id, reason }) => {
                assert_eq!(id, "B");
                assert_eq!(reason, OrphanReason::Cycle);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    /// A is a seed; B and C recruit each other and B also recruits D.
    fn cyclic_survey() -> RawTable {
        RawTable::builder()
            .text("ID", [Some("A"), Some("B"), Some("C"), Some("D")])
            .text("CouponR", [None, Some("c1"), Some("b1"), Some("b2")])
            .text("Coupon1", [None, Some("b1"), Some("c1"), None])
            .text("Coupon2", [None, Some("b2"), None, None])
            .numeric("Degree", [Some(1.0), Some(2.0), Some(3.0), Some(4.0)])
            .build()
            .unwrap()
    }

    #[test]
    fn cycles_fail_by_default() {
        match TreeBuilder::new(bindings()).build(&cyclic_survey()) {
            Err(RdsError::OrphanParticipant { id, reason }) => {
                assert_eq!(id, "B");
                assert_eq!(reason, OrphanReason::Cycle);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn excluding_cycles_drops_members_and_descendants() {
        let options = TreeOptions::default().with_orphans(OrphanPolicy::Exclude);
        let table = TreeBuilder::new(bindings())
            .with_options(options)
            .build(&cyclic_survey())
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.seed_ids(), vec!["A"]);
        let excluded: Vec<&str> = table.excluded().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(excluded, vec!["B", "C", "D"]);
        assert!(table.excluded().iter().all(|e| e.reason == OrphanReason::Cycle));
    }

    #[test]
    fn redeeming_own_coupon_is_a_cycle() {
        let raw = RawTable::builder()
            .text("ID", [Some("A"), Some("B")])
            .text("CouponR", [None, Some("b1")])
            .text("Coupon1", [None, Some("b1")])
            .text("Coupon2", [None::<&str>, None])
            .numeric("Degree", [Some(1.0), Some(2.0)])
            .build()
            .unwrap();
        match TreeBuilder::new(bindings()).build(&raw) {
            Err(RdsError::OrphanParticipant { id, reason }) => {
                assert_eq!(id, "B");
                assert_eq!(reason, OrphanReason::Cycle);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn repeated_redemptions_are_detected() {
        let raw = RawTable::builder()
            .text("ID", [Some("A"), Some("B"), Some("C")])
            .text("CouponR", [None, Some("a1"), Some("a1")])
            .text("Coupon1", [Some("a1"), None, None])
            .text("Coupon2", [None::<&str>, None, None])
            .numeric("Degree", [Some(1.0), Some(2.0), Some(3.0)])
            .build()
            .unwrap();
        let builder = TreeBuilder::new(bindings());
        let records = builder.read_records(&raw).unwrap();
        assert_eq!(repeated_redemptions(&records), vec![("a1", "B", "C")]);

        let table = builder.build(&raw).unwrap();
        assert_eq!(table.recruitment_edges(), vec![("A", "B"), ("A", "C")]);
    }

    #[test]
    fn delimited_coupons_and_numeric_ids() {
        let raw = RawTable::builder()
            .numeric("ID", [Some(1.0), Some(2.0), Some(3.0)])
            .numeric("CouponR", [None, Some(11.0), Some(12.0)])
            .text("Issued", [Some("11; 12"), None, None])
            .numeric("Degree", [Some(3.0), Some(3.0), Some(3.0)])
            .build()
            .unwrap();
        let bindings = ColumnBindings::new("ID", "CouponR", Vec::<String>::new(), "Degree")
            .with_delimited_coupons("Issued", ';');
        let table = TreeBuilder::new(bindings).build(&raw).unwrap();
        assert_eq!(table.participant(0).issued_coupons, vec!["11", "12"]);
        assert_eq!(table.participant(2).parent_id.as_deref(), Some("1"));
        assert_eq!(table.recruitment_summary().per_wave.get(&1), Some(&2));
    }

    #[test]
    fn rejects_missing_columns_and_conflicting_names() {
        let raw = survey();
        let bad = ColumnBindings::new("ID", "CouponR", ["Coupon9"], "Degree");
        assert!(matches!(
            TreeBuilder::new(bad).build(&raw),
            Err(RdsError::MissingColumn { .. })
        ));

        let raw = RawTable::builder()
            .text("ID", [Some("A")])
            .text("CouponR", [None::<&str>])
            .text("Coupon1", [None::<&str>])
            .text("Coupon2", [None::<&str>])
            .numeric("Degree", [Some(1.0)])
            .numeric("WAVE", [Some(0.0)])
            .build()
            .unwrap();
        assert!(matches!(
            TreeBuilder::new(bindings()).build(&raw),
            Err(RdsError::ColumnConflict { .. })
        ));
    }

    #[test]
    fn frame_carries_derived_columns_and_coordinates() {
        let raw = RawTable::builder()
            .text("ID", [Some("A"), Some("B")])
            .text("CouponR", [None, Some("a1")])
            .text("Coupon1", [Some("a1"), None])
            .text("Coupon2", [None::<&str>, None])
            .numeric("Degree", [Some(2.0), Some(4.0)])
            .numeric("Latitude", [Some(42.3), None])
            .numeric("Longitude", [Some(-83.7), Some(-83.0)])
            .build()
            .unwrap();
        let table = TreeBuilder::new(bindings().with_coordinates("Latitude", "Longitude"))
            .build(&raw)
            .unwrap();

        let frame = table.to_frame();
        let names: Vec<&str> = frame.column_names().collect();
        assert_eq!(&names[7..], &DERIVED_COLUMNS);
        assert_eq!(frame.require(WAVE_COLUMN).unwrap().number(1), Some(1.0));
        assert_eq!(frame.require(SEED_COLUMN).unwrap().text(1).as_deref(), Some("A"));
        assert_eq!(table.coordinates().unwrap(), vec![Some((42.3, -83.7)), None]);
        assert_eq!(table.numeric(WEIGHT_COLUMN).unwrap(), vec![Some(0.5), Some(0.25)]);
        assert_eq!(
            table.text(DEGREE_IMPUTED_COLUMN).unwrap(),
            vec![Some("2".to_owned()), Some("4".to_owned())]
        );
        assert_eq!(
            table.text(WEIGHT_COLUMN).unwrap(),
            vec![Some("0.5".to_owned()), Some("0.25".to_owned())]
        );
        assert_eq!(table.text(WAVE_COLUMN).unwrap()[1].as_deref(), Some("1"));
    }
}
