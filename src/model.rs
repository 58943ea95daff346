//! The compartmental model: state layout, the derivative of the twelve-compartment system with
//! a distancing sub-population, and the five-compartment baseline without one.
//!
//! Each sub-population moves through
//!
//! ```text
//!   S -> E1 -> E2 -> I -> R
//!                    |    ^
//!                    v    |
//!                    Q ---+
//! ```
//!
//! where `E2` is already infectious but presymptomatic. Every compartment of the normal group
//! exchanges mass with its distancing counterpart: out at rate `r`, back at rate `ur`.

use std::ops::{Index, IndexMut};

use serde_derive::{Deserialize, Serialize};

use crate::error::EpiError;
use crate::parameters::ParameterSet;
use crate::profile::ContactReductionProfile;

/// Number of compartments in the full model.
pub const STATE_LEN: usize = 12;
/// Number of compartments in the no-distancing baseline.
pub const REDUCED_LEN: usize = 5;
/// Compartments per sub-population.
const GROUP_LEN: usize = 6;

/// Names the components of a [`State`]. The distancing group follows the normal group in the
/// same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Compartment {
    S = 0,
    E1,
    E2,
    I,
    Q,
    R,
    Sd,
    E1d,
    E2d,
    Id,
    Qd,
    Rd,
}

impl Compartment {
    pub const ALL: [Compartment; STATE_LEN] = [
        Compartment::S,
        Compartment::E1,
        Compartment::E2,
        Compartment::I,
        Compartment::Q,
        Compartment::R,
        Compartment::Sd,
        Compartment::E1d,
        Compartment::E2d,
        Compartment::Id,
        Compartment::Qd,
        Compartment::Rd,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Compartment::S => "S",
            Compartment::E1 => "E1",
            Compartment::E2 => "E2",
            Compartment::I => "I",
            Compartment::Q => "Q",
            Compartment::R => "R",
            Compartment::Sd => "Sd",
            Compartment::E1d => "E1d",
            Compartment::E2d => "E2d",
            Compartment::Id => "Id",
            Compartment::Qd => "Qd",
            Compartment::Rd => "Rd",
        }
    }
}

/// The twelve-compartment state vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State(pub [f64; STATE_LEN]);

impl Index<Compartment> for State {
    type Output = f64;
    fn index(&self, index: Compartment) -> &f64 {
        &self.0[index as usize]
    }
}

impl IndexMut<Compartment> for State {
    fn index_mut(&mut self, index: Compartment) -> &mut f64 {
        &mut self.0[index as usize]
    }
}

impl State {
    /// Builds a state from a slice of exactly [`STATE_LEN`] values.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` on a length mismatch or a negative or non-finite
    /// component.
    pub fn from_slice(values: &[f64]) -> Result<Self, EpiError> {
        let array: [f64; STATE_LEN] = values.try_into().map_err(|_| {
            EpiError::invalid(format!(
                "state must have {STATE_LEN} components, got {}",
                values.len()
            ))
        })?;
        let state = State(array);
        state.validate()?;
        Ok(state)
    }

    /// Splits `i0` initial infections across `E1` (40%), `E2` (10%) and `I` (50%), and divides
    /// both susceptibles and infections between the groups by the long-run distancing fraction
    /// `r / (r + ur)`.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` if `i0` is negative or exceeds `N`, or the
    /// parameters are invalid.
    pub fn seeded(params: &ParameterSet, i0: f64) -> Result<Self, EpiError> {
        params.validate()?;
        if !(i0 >= 0.0 && i0 <= params.n) {
            return Err(EpiError::invalid(format!(
                "initial infections must lie in [0, N], got {i0}"
            )));
        }
        let distancing = params.distancing_fraction();
        let mut state = State::default();
        for (offset, weight) in [(0, 1.0 - distancing), (GROUP_LEN, distancing)] {
            state.0[offset] = weight * (params.n - i0);
            state.0[offset + 1] = weight * 0.4 * i0;
            state.0[offset + 2] = weight * 0.1 * i0;
            state.0[offset + 3] = weight * 0.5 * i0;
        }
        Ok(state)
    }

    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` if any component is negative or non-finite.
    pub fn validate(&self) -> Result<(), EpiError> {
        for (compartment, value) in Compartment::ALL.iter().zip(self.0) {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(EpiError::invalid(format!(
                    "initial {} must be finite and >= 0, got {value}",
                    compartment.name()
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Total population across all compartments. Conserved by the dynamics.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Population of the distancing sub-population.
    #[must_use]
    pub fn distancing_total(&self) -> f64 {
        self.0[GROUP_LEN..].iter().sum()
    }
}

/// The no-distancing baseline state: `S, E1, E2, I, Q`. Recovered is implied by conservation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReducedState(pub [f64; REDUCED_LEN]);

impl ReducedState {
    /// Projects the normal group of a full state onto the reduced layout.
    #[must_use]
    pub fn from_full(state: &State) -> Self {
        let mut reduced = [0.0; REDUCED_LEN];
        reduced.copy_from_slice(&state.0[..REDUCED_LEN]);
        ReducedState(reduced)
    }
}

fn check_rates(params: &ParameterSet) -> Result<(), EpiError> {
    for (name, value) in [
        ("N", params.n),
        ("D", params.d),
        ("k1", params.k1),
        ("k2", params.k2),
    ] {
        if !(value > 0.0) {
            return Err(EpiError::invalid(format!("{name} must be > 0, got {value}")));
        }
    }
    Ok(())
}

/// Writes the time derivative of `y` into `dy`. Both slices hold [`STATE_LEN`] values. This is
/// the allocation-free kernel used by the integrator.
///
/// # Errors
///
/// Returns `EpiError::InvalidParameter` if `N`, `D`, `k1` or `k2` is not positive, rather than
/// producing NaN.
pub fn derivative_into(
    t: f64,
    y: &[f64],
    params: &ParameterSet,
    profile: &ContactReductionProfile,
    dy: &mut [f64],
) -> Result<(), EpiError> {
    check_rates(params)?;
    debug_assert_eq!(y.len(), STATE_LEN);
    debug_assert_eq!(dy.len(), STATE_LEN);

    let f = profile.sample(t);
    let (normal, distancing) = y.split_at(GROUP_LEN);

    // Presymptomatic E2 transmits alongside I; the distancing group's contribution is
    // discounted by f, and its own exposure is discounted by f once more.
    let pressure = params.beta() * (normal[3] + normal[2] + f * (distancing[3] + distancing[2]))
        / params.n;
    let incidence = [pressure * normal[0], f * pressure * distancing[0]];
    let recovery = 1.0 / params.d;

    for (group, offset) in [0, GROUP_LEN].into_iter().enumerate() {
        let g = &y[offset..offset + GROUP_LEN];
        let inflow = incidence[group];
        dy[offset] = -inflow;
        dy[offset + 1] = inflow - params.k1 * g[1];
        dy[offset + 2] = params.k1 * g[1] - params.k2 * g[2];
        dy[offset + 3] = params.k2 * g[2] - (params.q + recovery) * g[3];
        dy[offset + 4] = params.q * g[3] - recovery * g[4];
        dy[offset + 5] = recovery * (g[3] + g[4]);
    }

    for k in 0..GROUP_LEN {
        let exchange = params.r * y[k] - params.ur * y[GROUP_LEN + k];
        dy[k] -= exchange;
        dy[GROUP_LEN + k] += exchange;
    }
    Ok(())
}

/// The time derivative of the full model at `(t, state)`.
///
/// # Errors
///
/// See [`derivative_into`].
pub fn derivative(
    t: f64,
    state: &State,
    params: &ParameterSet,
    profile: &ContactReductionProfile,
) -> Result<State, EpiError> {
    let mut delta = State::default();
    derivative_into(t, &state.0, params, profile, &mut delta.0)?;
    Ok(delta)
}

/// Writes the time derivative of the baseline model into `dy`. Both slices hold
/// [`REDUCED_LEN`] values. There is no contact reduction and no group exchange.
///
/// # Errors
///
/// Returns `EpiError::InvalidParameter` under the same conditions as [`derivative_into`].
pub fn reduced_derivative_into(
    _t: f64,
    y: &[f64],
    params: &ParameterSet,
    dy: &mut [f64],
) -> Result<(), EpiError> {
    check_rates(params)?;
    debug_assert_eq!(y.len(), REDUCED_LEN);
    let recovery = 1.0 / params.d;
    let incidence = params.beta() * (y[3] + y[2]) * y[0] / params.n;
    dy[0] = -incidence;
    dy[1] = incidence - params.k1 * y[1];
    dy[2] = params.k1 * y[1] - params.k2 * y[2];
    dy[3] = params.k2 * y[2] - (params.q + recovery) * y[3];
    dy[4] = params.q * y[3] - recovery * y[4];
    Ok(())
}

/// The time derivative of the baseline model at `(t, state)`.
///
/// # Errors
///
/// See [`reduced_derivative_into`].
pub fn reduced_derivative(
    t: f64,
    state: &ReducedState,
    params: &ParameterSet,
) -> Result<ReducedState, EpiError> {
    let mut delta = ReducedState::default();
    reduced_derivative_into(t, &state.0, params, &mut delta.0)?;
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use crate::profile::RampContinuation;

    fn sample_state() -> State {
        State([
            1000.0, 20.0, 5.0, 30.0, 4.0, 50.0, 800.0, 10.0, 3.0, 12.0, 2.0, 40.0,
        ])
    }

    #[test]
    fn derivative_conserves_population() {
        let params = ParameterSet {
            n: sample_state().total(),
            q: 0.3,
            ..ParameterSet::default()
        };
        let profiles = [
            ContactReductionProfile::Constant { value: 0.5 },
            ContactReductionProfile::StepWindow {
                start: 0.0,
                end: 10.0,
                value: 0.2,
            },
            ContactReductionProfile::Ramp {
                start: 0.0,
                end: 10.0,
                from: 1.0,
                to: 0.1,
                then: RampContinuation::Hold,
            },
        ];
        for profile in &profiles {
            for t in [0.0, 3.0, 50.0] {
                let delta = derivative(t, &sample_state(), &params, profile).unwrap();
                assert_almost_eq!(delta.total(), 0.0, 1e-9);
            }
        }
    }

    #[test]
    fn force_of_infection_matches_hand_computation() {
        let state = sample_state();
        let params = ParameterSet {
            n: 2000.0,
            r: 0.0,
            ur: 0.0,
            ..ParameterSet::default()
        };
        let profile = ContactReductionProfile::Constant { value: 0.5 };
        let delta = derivative(1.0, &state, &params, &profile).unwrap();

        let beta = 2.5 / 6.0;
        let pressure = beta * (30.0 + 5.0 + 0.5 * (12.0 + 3.0)) / 2000.0;
        assert_almost_eq!(delta[Compartment::S], -pressure * 1000.0, 1e-12);
        assert_almost_eq!(delta[Compartment::Sd], -0.5 * pressure * 800.0, 1e-12);
        assert_almost_eq!(
            delta[Compartment::E2],
            0.25 * 20.0 - 1.0 * 5.0,
            1e-12
        );
        assert_almost_eq!(delta[Compartment::R], (30.0 + 4.0) / 5.0, 1e-12);
    }

    #[test]
    fn exchange_is_symmetric() {
        let mut state = State::default();
        state[Compartment::R] = 100.0;
        state[Compartment::Rd] = 50.0;
        let params = ParameterSet {
            n: 150.0,
            r: 0.2,
            ur: 0.1,
            ..ParameterSet::default()
        };
        let delta = derivative(0.0, &state, &params, &ContactReductionProfile::default()).unwrap();
        assert_almost_eq!(delta[Compartment::R], -20.0 + 5.0, 1e-12);
        assert_almost_eq!(delta[Compartment::Rd], 20.0 - 5.0, 1e-12);
    }

    #[test]
    fn invalid_rates_fail_instead_of_nan() {
        let state = sample_state();
        let profile = ContactReductionProfile::default();
        for params in [
            ParameterSet {
                n: 0.0,
                ..ParameterSet::default()
            },
            ParameterSet {
                d: 0.0,
                ..ParameterSet::default()
            },
            ParameterSet {
                k1: -1.0,
                ..ParameterSet::default()
            },
            ParameterSet {
                k2: 0.0,
                ..ParameterSet::default()
            },
        ] {
            assert!(matches!(
                derivative(0.0, &state, &params, &profile),
                Err(EpiError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn negative_components_are_not_clamped() {
        let mut state = sample_state();
        state[Compartment::E1] = -1.0;
        let params = ParameterSet::default();
        let delta = derivative(0.0, &state, &params, &ContactReductionProfile::default()).unwrap();
        assert!(delta.0.iter().all(|v| v.is_finite()));

        let isolated = ParameterSet {
            r: 0.0,
            ur: 0.0,
            ..params
        };
        let delta = derivative(0.0, &state, &isolated, &ContactReductionProfile::default()).unwrap();
        assert_almost_eq!(delta[Compartment::E2], 0.25 * -1.0 - 5.0, 1e-12);
    }

    #[test]
    fn reduced_model_matches_full_model_without_distancing() {
        let mut state = sample_state();
        for k in GROUP_LEN..STATE_LEN {
            state.0[k] = 0.0;
        }
        let params = ParameterSet {
            n: state.total(),
            q: 0.2,
            r: 0.0,
            ur: 0.0,
            ..ParameterSet::default()
        };
        let profile = ContactReductionProfile::Constant { value: 0.3 };
        let full = derivative(4.0, &state, &params, &profile).unwrap();
        let reduced = reduced_derivative(4.0, &ReducedState::from_full(&state), &params).unwrap();
        for k in 0..REDUCED_LEN {
            assert_almost_eq!(full.0[k], reduced.0[k], 1e-12);
        }
        for k in GROUP_LEN..STATE_LEN {
            assert_almost_eq!(full.0[k], 0.0, 0.0);
        }
    }

    #[test]
    fn seeded_state_splits_infections() {
        let params = ParameterSet::default();
        let state = State::seeded(&params, 50.0).unwrap();
        let p = 1.0 / 1.8;
        assert_almost_eq!(state.total(), params.n, 1e-6);
        assert_almost_eq!(state[Compartment::E1], (1.0 - p) * 20.0, 1e-9);
        assert_almost_eq!(state[Compartment::E2d], p * 5.0, 1e-9);
        assert_almost_eq!(state[Compartment::Id], p * 25.0, 1e-9);
        assert_almost_eq!(state[Compartment::Q], 0.0, 0.0);
        assert_almost_eq!(state.distancing_total(), p * params.n, 1e-6);
    }

    #[test]
    fn seeded_state_rejects_too_many_infections() {
        let params = ParameterSet {
            n: 10.0,
            ..ParameterSet::default()
        };
        assert!(State::seeded(&params, 11.0).is_err());
        assert!(State::seeded(&params, -1.0).is_err());
    }

    #[test]
    fn from_slice_checks_length_and_sign() {
        assert!(State::from_slice(&[1.0; 11]).is_err());
        let mut values = [1.0; STATE_LEN];
        assert!(State::from_slice(&values).is_ok());
        values[4] = -0.5;
        match State::from_slice(&values) {
            Err(EpiError::InvalidParameter(msg)) => assert!(msg.contains("initial Q")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
