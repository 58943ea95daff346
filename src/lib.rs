//! Ensemble simulation of an epidemic in a population split into a normal group and a
//! distancing group.
//!
//! Each group passes through the SEIQR stages: susceptible, two exposed stages, infectious,
//! self-quarantined and recovered. People move between the groups at constant rates, and
//! contact within the distancing group is scaled by a time-varying reduction factor `f(t)`.
//! The resulting twelve-compartment ODE system is deterministic. Uncertainty enters through the
//! basic reproduction number, which is resampled for every member of a Monte Carlo ensemble.
//!
//! A run is organized as a pipeline:
//! * [`model`] evaluates the right-hand side of the ODE system.
//! * [`profile`] supplies the contact-reduction factor `f(t)`.
//! * [`integrator`] steps a state across a grid of report times with an adaptive
//!   Dormand–Prince 5(4) scheme.
//! * [`ensemble`] samples `R0` per replicate and integrates the replicates in parallel.
//! * [`aggregate`] reduces an ensemble into quantile bands and per-replicate peaks.
//!
//! Around the engine, [`config`] reads a run from JSON, [`report`] writes CSV files,
//! [`runner`] drives both from the command line and [`log`] controls diagnostics.
//!
//! ```rust
//! use ixa_ensemble::{
//!     aggregate, ContactReductionProfile, EnsembleSimulator, ParameterSet, QuantileLevels,
//!     State, Statistic, TimeGrid,
//! };
//!
//! let params = ParameterSet { n: 10_000.0, ..ParameterSet::default() };
//! let profile = ContactReductionProfile::StepWindow { start: 20.0, end: 60.0, value: 0.5 };
//! let initial = State::seeded(&params, 10.0).unwrap();
//! let grid = TimeGrid::from_range(0.0, 100.0, 1.0).unwrap();
//!
//! let ensemble = EnsembleSimulator::default()
//!     .run(&params, &profile, &initial, &grid, 8, 0.3, 42)
//!     .unwrap();
//! let band = aggregate(&ensemble, &Statistic::Symptomatic, QuantileLevels::default()).unwrap();
//! assert_eq!(band.rows().len(), 101);
//! ```
pub mod aggregate;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod execution_stats;
pub mod imports;
pub mod integrator;
pub mod log;
pub mod macros;
pub mod model;
pub mod numeric;
pub mod parameters;
pub mod profile;
#[cfg(feature = "progress_bar")]
pub mod progress;
pub mod random;
pub mod report;
pub mod runner;

pub use aggregate::{aggregate, summarize, AggregatedSeries, QuantileLevels, Statistic};
pub use config::SimulationConfig;
pub use ensemble::{CancellationToken, Ensemble, EnsembleOptions, EnsembleSimulator};
pub use error::EpiError;
pub use integrator::{Integrator, IntegratorOptions, TimeGrid, Trajectory};
pub use model::{Compartment, ReducedState, State};
pub use parameters::ParameterSet;
pub use profile::ContactReductionProfile;

// Logging
pub use crate::log::{debug, error, info, trace, warn};
