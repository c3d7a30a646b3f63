//! Criterion benchmarks for tree reconstruction and serial vs parallel bootstrap.

use criterion::{criterion_group, criterion_main, Criterion};

use rdstools::estimation::mean_statistic;
use rdstools::simulate::SurveySimulation;
use rdstools::{Bootstrap, BootstrapOptions, ParallelBootstrap, ParallelOptions, TreeBuilder};

fn simulation() -> SurveySimulation {
    SurveySimulation::new(20, 8).with_mean_recruits(1.5).with_seed(42)
}

fn bench_tree_builder(c: &mut Criterion) {
    let simulation = simulation();
    let raw = simulation.raw_table().unwrap();
    let builder = TreeBuilder::new(simulation.bindings());

    c.bench_function("tree_builder_simulated_survey", |b| {
        b.iter(|| builder.build(&raw).unwrap());
    });
}

fn bench_bootstrap(c: &mut Criterion) {
    let table = simulation().annotated().unwrap();
    let options = BootstrapOptions::default().with_trials(500).with_seed(7);
    let statistic = mean_statistic("Age", true);

    c.bench_function("bootstrap_serial_500_trials", |b| {
        let engine = Bootstrap::new(&table, options.clone()).unwrap();
        b.iter(|| engine.run(&statistic).unwrap());
    });

    for workers in [2, 4] {
        let parallel = ParallelOptions::new(options.clone()).with_workers(workers);
        c.bench_function(&format!("bootstrap_parallel_500_trials_{workers}_workers"), |b| {
            let engine = ParallelBootstrap::new(&table, parallel.clone()).unwrap();
            b.iter(|| engine.run(&statistic).unwrap());
        });
    }
}

criterion_group!(benches, bench_tree_builder, bench_bootstrap);
criterion_main!(benches);
