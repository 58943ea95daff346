use criterion::{criterion_group, criterion_main, Criterion};
use ixa_ensemble::{
    aggregate, ContactReductionProfile, Ensemble, EnsembleSimulator, Integrator, ParameterSet,
    QuantileLevels, State, Statistic, TimeGrid, Trajectory,
};

static SEED: u64 = 123;
static N_REPS: usize = 20;
static MAX_TIME: f64 = 400.0;

fn params() -> ParameterSet {
    ParameterSet {
        n: 2_400_000.0,
        ..ParameterSet::default()
    }
}

fn profile() -> ContactReductionProfile {
    ContactReductionProfile::StepWindow {
        start: 15.0,
        end: 120.0,
        value: 0.4,
    }
}

fn single_integration(initial: &State, grid: &TimeGrid) -> Trajectory {
    Integrator::default()
        .integrate_model(initial, grid, &params(), &profile())
        .expect("integration failed")
}

fn small_ensemble(initial: &State, grid: &TimeGrid) -> Ensemble {
    EnsembleSimulator::default()
        .run(&params(), &profile(), initial, grid, N_REPS, 0.5, SEED)
        .expect("ensemble failed")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let initial = State::seeded(&params(), 50.0).expect("invalid initial state");
    let grid = TimeGrid::from_range(0.0, MAX_TIME, 1.0).expect("invalid grid");

    c.bench_function("single integration", |bencher| {
        bencher.iter_with_large_drop(|| single_integration(&initial, &grid));
    });
    c.bench_function("ensemble of 20", |bencher| {
        bencher.iter_with_large_drop(|| small_ensemble(&initial, &grid));
    });

    let ensemble = small_ensemble(&initial, &grid);
    c.bench_function("aggregate symptomatic", |bencher| {
        bencher.iter(|| {
            aggregate(&ensemble, &Statistic::Symptomatic, QuantileLevels::default())
                .expect("aggregation failed")
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
