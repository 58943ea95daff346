//! The JSON description of one ensemble run.
//!
//! ```json
//! {
//!   "parameters": { "n": 2400000, "d": 5, "r0": 2.5, "k1": 0.25, "k2": 1,
//!                   "q": 0, "r": 1, "ur": 0.8 },
//!   "profile": { "kind": "step_window", "start": 15, "end": 120, "value": 0.4 },
//!   "time_grid": { "start": 0, "end": 400, "step": 1 },
//!   "initial_state": { "seeded": { "i0": 5 } },
//!   "n_reps": 100,
//!   "r0_sample_sd": 0.5,
//!   "seed": 8675309
//! }
//! ```
//!
//! Everything not shown above has a default.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::aggregate::{QuantileLevels, Statistic};
use crate::ensemble::{CancellationToken, Ensemble, EnsembleOptions, EnsembleSimulator};
use crate::error::EpiError;
use crate::imports::ImportOverlay;
use crate::integrator::{IntegratorOptions, TimeGrid};
use crate::model::State;
use crate::parameters::ParameterSet;
use crate::profile::ContactReductionProfile;

/// Report times, either as a regular range or listed explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeGridSpec {
    Range { start: f64, end: f64, step: f64 },
    Times { times: Vec<f64> },
}

impl TimeGridSpec {
    /// # Errors
    ///
    /// Returns `EpiError::TimeGridError` if the times are not a valid grid.
    pub fn build(&self) -> Result<TimeGrid, EpiError> {
        match self {
            TimeGridSpec::Range { start, end, step } => TimeGrid::from_range(*start, *end, *step),
            TimeGridSpec::Times { times } => TimeGrid::new(times.clone()),
        }
    }
}

/// How the state at the first grid time is obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialStateSpec {
    /// All twelve compartments, in `S, E1, E2, I, Q, R, Sd, E1d, E2d, Id, Qd, Rd` order.
    Explicit(Vec<f64>),
    /// `i0` infections in an otherwise susceptible population of `N`, split between the groups
    /// by their equilibrium sizes.
    Seeded { i0: f64 },
}

impl InitialStateSpec {
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` if the state is malformed.
    pub fn build(&self, params: &ParameterSet) -> Result<State, EpiError> {
        match self {
            InitialStateSpec::Explicit(values) => State::from_slice(values),
            InitialStateSpec::Seeded { i0 } => State::seeded(params, *i0),
        }
    }
}

fn default_statistics() -> Vec<Statistic> {
    Statistic::ALL.to_vec()
}

fn default_summary_statistic() -> Statistic {
    Statistic::Symptomatic
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub parameters: ParameterSet,
    #[serde(default)]
    pub profile: ContactReductionProfile,
    pub time_grid: TimeGridSpec,
    pub initial_state: InitialStateSpec,
    pub n_reps: usize,
    pub r0_sample_sd: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub integrator: IntegratorOptions,
    #[serde(default)]
    pub ensemble: EnsembleOptions,
    #[serde(default)]
    pub quantiles: QuantileLevels,
    /// Statistics aggregated into bands, one report each.
    #[serde(default = "default_statistics")]
    pub statistics: Vec<Statistic>,
    /// The statistic whose per-replicate peak goes into the summary report.
    #[serde(default = "default_summary_statistic")]
    pub summary_statistic: Statistic,
    /// Calendar date of time zero.
    #[serde(default)]
    pub epoch: Option<NaiveDate>,
    #[serde(default)]
    pub imports: Option<ImportOverlay>,
}

impl SimulationConfig {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::IoError` if the file cannot be read, `EpiError::JsonError` if it is
    /// not a valid configuration, and any error of [`SimulationConfig::validate`].
    pub fn from_json_file(path: &Path) -> Result<Self, EpiError> {
        debug!("loading configuration from {}", path.display());
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// # Errors
    ///
    /// See [`SimulationConfig::from_json_file`].
    pub fn from_json_str(data: &str) -> Result<Self, EpiError> {
        let config: SimulationConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that can be checked without integrating.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: `EpiError::InvalidParameter`,
    /// `EpiError::TimeGridError`, or `EpiError::ConfigError` for an empty statistics list.
    pub fn validate(&self) -> Result<(), EpiError> {
        self.parameters.validate()?;
        self.profile.validate()?;
        self.time_grid()?;
        self.initial_state()?.validate()?;
        if self.n_reps < 1 {
            return Err(EpiError::invalid("n_reps must be >= 1"));
        }
        if !(self.r0_sample_sd >= 0.0 && self.r0_sample_sd.is_finite()) {
            return Err(EpiError::invalid(format!(
                "r0_sample_sd must be >= 0, got {}",
                self.r0_sample_sd
            )));
        }
        self.integrator.validate()?;
        self.ensemble.validate()?;
        self.quantiles.validate()?;
        if self.statistics.is_empty() {
            return Err(EpiError::ConfigError(
                "at least one statistic must be reported".to_string(),
            ));
        }
        if let Some(imports) = &self.imports {
            imports.validate()?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `EpiError::TimeGridError` for an invalid grid.
    pub fn time_grid(&self) -> Result<TimeGrid, EpiError> {
        self.time_grid.build()
    }

    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` for a malformed initial state.
    pub fn initial_state(&self) -> Result<State, EpiError> {
        self.initial_state.build(&self.parameters)
    }

    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` for invalid integrator or ensemble options.
    pub fn simulator(&self) -> Result<EnsembleSimulator, EpiError> {
        EnsembleSimulator::new(self.integrator, self.ensemble)
    }

    /// Runs the configured ensemble.
    ///
    /// # Errors
    ///
    /// Any error of [`EnsembleSimulator::run_cancellable`].
    pub fn run(&self, cancel: &CancellationToken) -> Result<Ensemble, EpiError> {
        self.simulator()?.run_cancellable(
            &self.parameters,
            &self.profile,
            &self.initial_state()?,
            &self.time_grid()?,
            self.n_reps,
            self.r0_sample_sd,
            self.seed,
            cancel,
        )
    }
}
