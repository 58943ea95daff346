//! Adaptive Dormand–Prince 5(4) integration onto a caller-supplied time grid.
//!
//! The solver steps adaptively between grid points and always lands exactly on each one, so
//! reported states are never interpolated. It uses no randomness and evaluates the derivative in
//! a fixed order, so identical inputs give bit-identical trajectories.

use log::trace;
use serde_derive::{Deserialize, Serialize};

use crate::error::EpiError;
use crate::model::{self, ReducedState, State, REDUCED_LEN, STATE_LEN};
use crate::numeric::all_finite;
use crate::parameters::ParameterSet;
use crate::profile::ContactReductionProfile;

// Dormand–Prince tableau.
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    // The last stage is the fifth-order solution itself (first same as last).
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];
// Difference between the fifth- and fourth-order weights.
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

const SAFETY: f64 = 0.9;

/// Upper bound on the intervals of a grid built by [`TimeGrid::from_range`].
pub const MAX_GRID_INTERVALS: usize = 10_000_000;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// A state vector the integrator can advance.
pub trait OdeState: Copy {
    const LEN: usize;
    fn as_values(&self) -> &[f64];
    /// Builds a state from exactly `LEN` values.
    fn from_values(values: &[f64]) -> Self;
}

impl OdeState for State {
    const LEN: usize = STATE_LEN;
    fn as_values(&self) -> &[f64] {
        &self.0
    }
    fn from_values(values: &[f64]) -> Self {
        let mut state = State::default();
        state.0.copy_from_slice(values);
        state
    }
}

impl OdeState for ReducedState {
    const LEN: usize = REDUCED_LEN;
    fn as_values(&self) -> &[f64] {
        &self.0
    }
    fn from_values(values: &[f64]) -> Self {
        let mut state = ReducedState::default();
        state.0.copy_from_slice(values);
        state
    }
}

/// Step-size control settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorOptions {
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// First trial step.
    pub initial_step: f64,
    /// A step rejected below this size fails the integration.
    pub min_step: f64,
    /// Attempted steps (accepted and rejected) allowed over the whole grid.
    pub max_steps: usize,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        IntegratorOptions {
            abs_tol: 1e-6,
            rel_tol: 1e-6,
            initial_step: 0.1,
            min_step: 1e-10,
            max_steps: 200_000,
        }
    }
}

impl IntegratorOptions {
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` for non-positive tolerances or step sizes, or a
    /// zero step budget.
    pub fn validate(&self) -> Result<(), EpiError> {
        for (name, value) in [
            ("abs_tol", self.abs_tol),
            ("rel_tol", self.rel_tol),
            ("initial_step", self.initial_step),
            ("min_step", self.min_step),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(EpiError::invalid(format!(
                    "integrator option {name} must be > 0, got {value}"
                )));
            }
        }
        if self.max_steps == 0 {
            return Err(EpiError::invalid("integrator option max_steps must be >= 1"));
        }
        Ok(())
    }
}

/// A strictly increasing sequence of at least two report times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    /// # Errors
    ///
    /// Returns `EpiError::TimeGridError` if there are fewer than two points, a point is not
    /// finite, or the points are not strictly increasing.
    pub fn new(times: Vec<f64>) -> Result<Self, EpiError> {
        if times.len() < 2 {
            return Err(EpiError::TimeGridError(format!(
                "a time grid needs at least 2 points, got {}",
                times.len()
            )));
        }
        if !all_finite(&times) {
            return Err(EpiError::TimeGridError(
                "time grid contains a non-finite value".to_string(),
            ));
        }
        if let Some(i) = times.windows(2).position(|w| w[0] >= w[1]) {
            return Err(EpiError::TimeGridError(format!(
                "time grid is not strictly increasing at index {}: {} then {}",
                i + 1,
                times[i],
                times[i + 1]
            )));
        }
        Ok(TimeGrid { times })
    }

    /// `start, start + step, ...` up to and including `end` when `end` falls on the grid.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::TimeGridError` if `step` is not positive, the range holds fewer
    /// than two points, or it holds more than `MAX_GRID_INTERVALS` intervals.
    pub fn from_range(start: f64, end: f64, step: f64) -> Result<Self, EpiError> {
        if !(step > 0.0 && step.is_finite()) {
            return Err(EpiError::TimeGridError(format!(
                "time grid step must be > 0, got {step}"
            )));
        }
        if !(end > start) {
            return Err(EpiError::TimeGridError(format!(
                "time grid end {end} must exceed start {start}"
            )));
        }
        // Tolerate representation error so that e.g. 0..1 by 0.1 includes 1.
        let count = ((end - start) / step + 1e-9).floor();
        #[allow(clippy::cast_precision_loss)]
        let limit = MAX_GRID_INTERVALS as f64;
        if !(count < limit) {
            return Err(EpiError::TimeGridError(format!(
                "time grid {start}..{end} by {step} exceeds {MAX_GRID_INTERVALS} intervals"
            )));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let intervals = count as usize;
        #[allow(clippy::cast_precision_loss)]
        let times = (0..=intervals).map(|i| start + i as f64 * step).collect();
        TimeGrid::new(times)
    }

    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    #[must_use]
    pub fn start(&self) -> f64 {
        self.times[0]
    }

    #[must_use]
    pub fn end(&self) -> f64 {
        self.times[self.times.len() - 1]
    }
}

impl TryFrom<Vec<f64>> for TimeGrid {
    type Error = EpiError;
    fn try_from(times: Vec<f64>) -> Result<Self, Self::Error> {
        TimeGrid::new(times)
    }
}

impl From<TimeGrid> for Vec<f64> {
    fn from(grid: TimeGrid) -> Self {
        grid.times
    }
}

/// Work done by one integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepStatistics {
    pub accepted: usize,
    pub rejected: usize,
    pub evaluations: usize,
}

/// States reported at each point of a time grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory<S = State> {
    times: Vec<f64>,
    states: Vec<S>,
    steps: StepStatistics,
}

impl<S: OdeState> Trajectory<S> {
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[must_use]
    pub fn states(&self) -> &[S] {
        &self.states
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &S)> {
        self.times.iter().copied().zip(self.states.iter())
    }

    #[must_use]
    pub fn steps(&self) -> StepStatistics {
        self.steps
    }
}

/// Integrates ODE systems with a fixed set of [`IntegratorOptions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Integrator {
    options: IntegratorOptions,
}

impl Integrator {
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` if the options are invalid.
    pub fn new(options: IntegratorOptions) -> Result<Self, EpiError> {
        options.validate()?;
        Ok(Integrator { options })
    }

    #[must_use]
    pub fn options(&self) -> &IntegratorOptions {
        &self.options
    }

    /// Integrates the full model from `initial` over `grid`.
    ///
    /// # Errors
    ///
    /// See [`Integrator::integrate`].
    pub fn integrate_model(
        &self,
        initial: &State,
        grid: &TimeGrid,
        params: &ParameterSet,
        profile: &ContactReductionProfile,
    ) -> Result<Trajectory, EpiError> {
        self.integrate(initial, grid, |t, y, dy| {
            model::derivative_into(t, y, params, profile, dy)
        })
    }

    /// Integrates the no-distancing baseline from `initial` over `grid`.
    ///
    /// # Errors
    ///
    /// See [`Integrator::integrate`].
    pub fn integrate_reduced(
        &self,
        initial: &ReducedState,
        grid: &TimeGrid,
        params: &ParameterSet,
    ) -> Result<Trajectory<ReducedState>, EpiError> {
        self.integrate(initial, grid, |t, y, dy| {
            model::reduced_derivative_into(t, y, params, dy)
        })
    }

    /// Integrates `derivative` from `initial` at `grid.start()`, reporting the state at every
    /// grid point. `derivative(t, y, dy)` must write `dy/dt` into `dy`.
    ///
    /// # Errors
    ///
    /// Errors from `derivative` are passed through. A trial step that produces non-finite
    /// values is rejected like any other. Returns `EpiError::IntegrationError` if the step
    /// size falls below `min_step` or `max_steps` is used up.
    pub fn integrate<S, F>(
        &self,
        initial: &S,
        grid: &TimeGrid,
        mut derivative: F,
    ) -> Result<Trajectory<S>, EpiError>
    where
        S: OdeState,
        F: FnMut(f64, &[f64], &mut [f64]) -> Result<(), EpiError>,
    {
        let options = &self.options;
        let n = S::LEN;
        let mut y = initial.as_values().to_vec();
        let mut y_new = vec![0.0; n];
        let mut k: [Vec<f64>; 7] = std::array::from_fn(|_| vec![0.0; n]);

        let mut t = grid.start();
        let mut h = options.initial_step;
        let mut steps = StepStatistics::default();
        let mut states = Vec::with_capacity(grid.len());
        states.push(*initial);

        derivative(t, &y, &mut k[0])?;
        steps.evaluations += 1;

        for &target in &grid.times()[1..] {
            while t < target {
                if steps.accepted + steps.rejected >= options.max_steps {
                    return Err(EpiError::IntegrationError {
                        time: t,
                        reason: format!("exceeded {} steps", options.max_steps),
                    });
                }

                let remaining = target - t;
                let lands = h >= remaining || remaining - h < options.min_step;
                let step = if lands { remaining } else { h };

                for stage in 1..7 {
                    for i in 0..n {
                        let mut acc = 0.0;
                        for (j, a) in A[stage].iter().enumerate().take(stage) {
                            acc += a * k[j][i];
                        }
                        y_new[i] = y[i] + step * acc;
                    }
                    derivative(t + C[stage] * step, &y_new, &mut k[stage])?;
                    steps.evaluations += 1;
                }

                // A non-finite trial counts as an infinitely bad step and is retried smaller.
                let finite = all_finite(&y_new) && all_finite(&k[6]);
                let norm = if finite {
                    let mut sum = 0.0;
                    for i in 0..n {
                        let mut err = 0.0;
                        for (stage, e) in E.iter().enumerate() {
                            err += e * k[stage][i];
                        }
                        let scale =
                            options.abs_tol + options.rel_tol * y[i].abs().max(y_new[i].abs());
                        let ratio = step * err / scale;
                        sum += ratio * ratio;
                    }
                    #[allow(clippy::cast_precision_loss)]
                    let mean = sum / n as f64;
                    mean.sqrt()
                } else {
                    f64::INFINITY
                };
                let factor = if norm == 0.0 {
                    MAX_FACTOR
                } else {
                    (SAFETY * norm.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
                };

                if norm <= 1.0 {
                    steps.accepted += 1;
                    t = if lands { target } else { t + step };
                    std::mem::swap(&mut y, &mut y_new);
                    k.swap(0, 6);
                    let proposed = step * factor;
                    // A step shortened to land on the grid says little about the usable size.
                    h = if lands && factor >= 1.0 {
                        h.max(proposed)
                    } else {
                        proposed
                    };
                } else {
                    steps.rejected += 1;
                    h = step * factor.min(1.0);
                    trace!("rejected step at t={t} (error norm {norm:.3e}), retrying with h={h:.3e}");
                    if h < options.min_step {
                        let cause = if finite { "" } else { " after non-finite states" };
                        return Err(EpiError::IntegrationError {
                            time: t,
                            reason: format!(
                                "step size {h:e} fell below the minimum {:e}{cause}",
                                options.min_step
                            ),
                        });
                    }
                }
            }
            states.push(S::from_values(&y));
        }

        trace!(
            "integrated {} grid points: {} accepted, {} rejected, {} evaluations",
            grid.len(),
            steps.accepted,
            steps.rejected,
            steps.evaluations
        );
        Ok(Trajectory {
            times: grid.times().to_vec(),
            states,
            steps,
        })
    }
}
