use approx::assert_relative_eq;
use rdstools::data::RawTable;
use rdstools::data_processing::{SEED_COLUMN, WAVE_COLUMN};
use rdstools::estimation::mean_statistic;
use rdstools::simulate::SurveySimulation;
use rdstools::{
    Bootstrap, BootstrapOptions, ColumnBindings, OrphanPolicy, OrphanReason, ParallelBootstrap,
    ParallelOptions, RdsError, TreeBuilder, TreeOptions,
};

fn abc_table() -> RawTable {
    RawTable::builder()
        .text("ID", [Some("A"), Some("B"), Some("C")])
        .text("CouponR", [None, Some("C1"), Some("C9")])
        .text("Coupon1", [Some("C1"), None, None])
        .numeric("Degree", [Some(3.0), Some(2.0), Some(5.0)])
        .build()
        .unwrap()
}

fn abc_bindings() -> ColumnBindings {
    ColumnBindings::new("ID", "CouponR", ["Coupon1"], "Degree")
}

/// A redeems nothing and issues C1, B redeems C1, C redeems the unknown C9.
#[test]
fn unresolvable_coupon_fails_or_is_excluded() {
    match TreeBuilder::new(abc_bindings()).build(&abc_table()) {
        Err(RdsError::OrphanParticipant { id, reason }) => {
            assert_eq!(id, "C");
            assert_eq!(reason, OrphanReason::UnresolvedCoupon { coupon: "C9".into() });
        }
        other => panic!("expected orphan error, got {other:?}"),
    }

    let options = TreeOptions::default().with_orphans(OrphanPolicy::Exclude);
    let table = TreeBuilder::new(abc_bindings())
        .with_options(options)
        .build(&abc_table())
        .unwrap();
    assert_eq!(table.len(), 2);
    let a = table.participant(0);
    let b = table.participant(1);
    assert_eq!((a.id.as_str(), a.wave, a.seed_id.as_str()), ("A", 0, "A"));
    assert_eq!((b.id.as_str(), b.wave, b.seed_id.as_str()), ("B", 1, "A"));
    assert_eq!(table.excluded()[0].id, "C");
}

#[test]
fn zero_and_missing_degrees_take_the_observed_mean() {
    let raw = RawTable::builder()
        .text("ID", [Some("A"), Some("B"), Some("C")])
        .text("CouponR", [None::<&str>, None, None])
        .text("Coupon1", [None::<&str>, None, None])
        .numeric("Degree", [Some(2.0), Some(0.0), None])
        .build()
        .unwrap();
    let options = TreeOptions::default()
        .with_zero_degree("mean".parse().unwrap())
        .with_missing_degree("mean".parse().unwrap());
    let table = TreeBuilder::new(abc_bindings())
        .with_options(options)
        .build(&raw)
        .unwrap();
    assert_eq!(table.imputed_degrees().as_slice(), &[2.0, 2.0, 2.0]);
}

#[test]
fn waves_and_seeds_are_consistent() {
    for seed in 0..5 {
        let table = SurveySimulation::new(4, 5).with_seed(seed).annotated().unwrap();
        for participant in table.participants() {
            match participant.parent_id.as_deref() {
                None => {
                    assert_eq!(participant.seed_id, participant.id);
                    assert_eq!(participant.wave, 0);
                }
                Some(parent) => {
                    let recruiter = table.participant(table.row_of(parent).unwrap());
                    assert_eq!(participant.wave, recruiter.wave + 1);
                    assert_eq!(participant.seed_id, recruiter.seed_id);
                }
            }
        }

        let mut wave_zero: Vec<String> = table
            .participants()
            .iter()
            .filter(|p| p.wave == 0)
            .map(|p| p.id.clone())
            .collect();
        wave_zero.sort();
        assert_eq!(wave_zero, table.seed_ids());

        let seeds = table.seed_ids();
        assert_eq!(table.rows_for(&seeds, &[0]).len(), seeds.len());
        assert_eq!(table.rows_for(&seeds, &table.waves()).len(), table.len());
    }
}

#[test]
fn building_twice_is_identical() {
    let simulation = SurveySimulation::new(3, 4).with_seed(99);
    let raw = simulation.raw_table().unwrap();
    let builder = TreeBuilder::new(simulation.bindings());
    let first = builder.build(&raw).unwrap();
    let second = builder.build(&raw).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_frame(), second.to_frame());

    let frame = first.to_frame();
    assert!(frame.has_column(SEED_COLUMN));
    assert!(frame.has_column(WAVE_COLUMN));
    assert!(frame.has_column("Degree"));
}

#[test]
fn parallel_bootstrap_is_reproducible_across_worker_counts() {
    let table = SurveySimulation::new(8, 5).with_seed(3).annotated().unwrap();
    let bootstrap = BootstrapOptions::default().with_trials(200).with_seed(2024);
    let statistic = mean_statistic("Age", true);

    let run = |workers: usize| {
        let options = ParallelOptions::new(bootstrap.clone()).with_workers(workers);
        ParallelBootstrap::new(&table, options)
            .unwrap()
            .run(&statistic)
            .unwrap()
    };
    let first = run(4);
    let again = run(4);
    let single = run(1);
    assert_eq!(first.estimates, again.estimates);
    assert_eq!(first.summary, again.summary);
    assert_eq!(first.summary, single.summary);

    let serial = Bootstrap::new(&table, bootstrap).unwrap().run(&statistic).unwrap();
    assert_eq!(serial.estimates, first.estimates);
    assert_relative_eq!(
        serial.summary.std_error().unwrap(),
        first.summary.std_error().unwrap()
    );
}

#[test]
fn annotated_table_serializes_with_derived_columns() {
    let table = TreeBuilder::new(abc_bindings())
        .with_options(TreeOptions::default().with_orphans(OrphanPolicy::Exclude))
        .build(&abc_table())
        .unwrap();
    let json = serde_json::to_value(table.to_frame()).unwrap();
    let names = json["names"].as_array().unwrap();
    assert!(names.iter().any(|name| name == "SEED"));
    assert!(names.iter().any(|name| name == "DEGREE_IMP"));

    let summary = serde_json::to_value(table.recruitment_summary()).unwrap();
    assert_eq!(summary["participants"], 2);
}
