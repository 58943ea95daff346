use assert_approx_eq::assert_approx_eq;
use ixa_ensemble::model::{Compartment, ReducedState};
use ixa_ensemble::numeric::relative_eq;
use ixa_ensemble::{
    aggregate, CancellationToken, ContactReductionProfile, Ensemble, EnsembleSimulator,
    Integrator, ParameterSet, QuantileLevels, State, Statistic, TimeGrid,
};

fn base_params() -> ParameterSet {
    ParameterSet {
        n: 200_000.0,
        q: 0.05,
        ..ParameterSet::default()
    }
}

fn profiles() -> Vec<ContactReductionProfile> {
    vec![
        ContactReductionProfile::default(),
        ContactReductionProfile::StepWindow {
            start: 20.0,
            end: 70.0,
            value: 0.2,
        },
        ContactReductionProfile::Ramp {
            start: 10.0,
            end: 40.0,
            from: 1.0,
            to: 0.4,
            then: ixa_ensemble::profile::RampContinuation::StepBack { at: 90.0 },
        },
    ]
}

fn run(profile: &ContactReductionProfile, n_reps: usize, sd: f64, seed: u64) -> Ensemble {
    let params = base_params();
    let initial = State::seeded(&params, 30.0).unwrap();
    let grid = TimeGrid::from_range(0.0, 200.0, 1.0).unwrap();
    EnsembleSimulator::default()
        .run(&params, profile, &initial, &grid, n_reps, sd, seed)
        .unwrap()
}

#[test]
fn population_is_conserved() {
    for profile in profiles() {
        let ensemble = run(&profile, 5, 0.4, 17);
        for (_, trajectory) in ensemble.successes() {
            for state in trajectory.states() {
                assert!(
                    relative_eq(state.total(), 200_000.0, 1e-6),
                    "total {} under {profile:?}",
                    state.total()
                );
                assert!(state.0.iter().all(|v| v.is_finite()));
            }
        }
    }
}

#[test]
fn quantile_bands_are_ordered() {
    for profile in profiles() {
        let ensemble = run(&profile, 15, 0.5, 3);
        for statistic in Statistic::ALL {
            let series = aggregate(&ensemble, &statistic, QuantileLevels::default()).unwrap();
            for row in series.rows() {
                assert!(row.lower <= row.median, "{statistic:?} at {}", row.time);
                assert!(row.median <= row.upper, "{statistic:?} at {}", row.time);
            }
        }
    }
}

#[test]
fn ever_infected_median_never_decreases() {
    for profile in profiles() {
        let ensemble = run(&profile, 9, 0.4, 5);
        let series = aggregate(
            &ensemble,
            &Statistic::EverInfected,
            QuantileLevels::default(),
        )
        .unwrap();
        for window in series.rows().windows(2) {
            assert!(
                window[1].median >= window[0].median - 1e-6 * 200_000.0,
                "median fell from {} to {} at t={}",
                window[0].median,
                window[1].median,
                window[1].time
            );
        }
    }
}

#[test]
fn without_exchange_the_normal_group_follows_the_reduced_model() {
    let params = ParameterSet {
        r: 0.0,
        ur: 0.0,
        ..base_params()
    };
    let initial = State::seeded(&params, 30.0).unwrap();
    assert_eq!(initial.distancing_total(), 0.0);
    let grid = TimeGrid::from_range(0.0, 150.0, 1.0).unwrap();
    let integrator = Integrator::default();
    let full = integrator
        .integrate_model(
            &initial,
            &grid,
            &params,
            &ContactReductionProfile::StepWindow {
                start: 30.0,
                end: 60.0,
                value: 0.3,
            },
        )
        .unwrap();
    let reduced = integrator
        .integrate_reduced(&ReducedState::from_full(&initial), &grid, &params)
        .unwrap();
    for (state, baseline) in full.states().iter().zip(reduced.states()) {
        let projected = ReducedState::from_full(state);
        for (a, b) in projected.0.iter().zip(baseline.0) {
            assert_approx_eq!(*a, b, 1e-5 * params.n);
        }
        assert_eq!(state.distancing_total(), 0.0);
    }
}

#[test]
fn same_seed_same_bands() {
    let profile = &profiles()[1];
    let a = aggregate(
        &run(profile, 12, 0.5, 99),
        &Statistic::Symptomatic,
        QuantileLevels::default(),
    )
    .unwrap();
    let b = aggregate(
        &run(profile, 12, 0.5, 99),
        &Statistic::Symptomatic,
        QuantileLevels::default(),
    )
    .unwrap();
    assert_eq!(a, b);

    let c = aggregate(
        &run(profile, 12, 0.5, 100),
        &Statistic::Symptomatic,
        QuantileLevels::default(),
    )
    .unwrap();
    assert_ne!(a, c);
}

#[test]
fn zero_spread_collapses_the_ensemble() {
    let profile = &profiles()[2];
    let ensemble = run(profile, 7, 0.0, 1);
    assert!(ensemble.replicates().iter().all(|r| r.r0 == 2.5));
    let first = ensemble.replicates()[0].trajectory().unwrap();
    for replicate in ensemble.replicates() {
        assert_eq!(replicate.trajectory().unwrap(), first);
    }
    let series = aggregate(
        &ensemble,
        &Statistic::TotalInfectious,
        QuantileLevels::default(),
    )
    .unwrap();
    for row in series.rows() {
        assert_eq!(row.lower, row.median);
        assert_eq!(row.upper, row.median);
    }
}

#[test]
fn cancelled_run_keeps_completed_attempts() {
    let params = base_params();
    let initial = State::seeded(&params, 30.0).unwrap();
    let grid = TimeGrid::from_range(0.0, 50.0, 1.0).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let ensemble = EnsembleSimulator::default()
        .run_cancellable(
            &params,
            &ContactReductionProfile::default(),
            &initial,
            &grid,
            10,
            0.2,
            4,
            &token,
        )
        .unwrap();
    assert!(ensemble.is_cancelled());
    assert_eq!(ensemble.attempted(), 0);
    assert_eq!(ensemble.requested(), 10);
    assert!(aggregate(&ensemble, &Statistic::Recovered, QuantileLevels::default()).is_err());
}

#[test]
fn seeded_state_splits_infections() {
    let params = base_params();
    let state = State::seeded(&params, 100.0).unwrap();
    let fraction = params.distancing_fraction();
    assert_approx_eq!(state[Compartment::E1] + state[Compartment::E1d], 40.0, 1e-9);
    assert_approx_eq!(state[Compartment::E2] + state[Compartment::E2d], 10.0, 1e-9);
    assert_approx_eq!(state[Compartment::I] + state[Compartment::Id], 50.0, 1e-9);
    assert_approx_eq!(state.distancing_total(), fraction * 200_000.0, 1e-6);
}
