//! Monte Carlo ensembles: one integration per sampled reproduction number.
//!
//! Replicates are independent. Each one seeds its own generator from the master seed and its
//! index (see [`crate::random`]), samples `R0' ~ Normal(R0, sd)`, and integrates the model with
//! `R0` replaced by `R0'`. Replicates run on a rayon pool; the results are joined in index order
//! before anything downstream sees them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};

use crate::error::EpiError;
use crate::integrator::{Integrator, IntegratorOptions, TimeGrid, Trajectory};
use crate::model::State;
use crate::numeric::relative_eq;
use crate::parameters::ParameterSet;
use crate::profile::ContactReductionProfile;
use crate::random::{replicate_rng, replicate_seed, sample_r0};

/// Settings for how an ensemble is run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleOptions {
    /// The run fails if more than this fraction of attempted replicates fail.
    pub max_failure_fraction: f64,
    /// Worker threads. `None` uses rayon's global pool.
    pub threads: Option<usize>,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        EnsembleOptions {
            max_failure_fraction: 0.5,
            threads: None,
        }
    }
}

impl EnsembleOptions {
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` if the failure fraction is outside `[0, 1]` or the
    /// thread count is zero.
    pub fn validate(&self) -> Result<(), EpiError> {
        if !(0.0..=1.0).contains(&self.max_failure_fraction) {
            return Err(EpiError::invalid(format!(
                "max_failure_fraction must lie in [0, 1], got {}",
                self.max_failure_fraction
            )));
        }
        if self.threads == Some(0) {
            return Err(EpiError::invalid("threads must be >= 1"));
        }
        Ok(())
    }
}

/// Stops an ensemble run from dispatching further replicates. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum ReplicateOutcome {
    Completed(Trajectory),
    Failed(EpiError),
}

/// One attempted member of an ensemble.
#[derive(Debug)]
pub struct Replicate {
    pub index: usize,
    pub seed: u64,
    /// The sampled reproduction number, kept whether or not the integration succeeded.
    pub r0: f64,
    pub outcome: ReplicateOutcome,
}

impl Replicate {
    #[must_use]
    pub fn trajectory(&self) -> Option<&Trajectory> {
        match &self.outcome {
            ReplicateOutcome::Completed(trajectory) => Some(trajectory),
            ReplicateOutcome::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&EpiError> {
        match &self.outcome {
            ReplicateOutcome::Completed(_) => None,
            ReplicateOutcome::Failed(error) => Some(error),
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure().is_some()
    }
}

/// The attempted replicates of one run, in index order, sharing one time grid.
#[derive(Debug)]
pub struct Ensemble {
    times: Vec<f64>,
    replicates: Vec<Replicate>,
    requested: usize,
    cancelled: bool,
}

impl Ensemble {
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[must_use]
    pub fn replicates(&self) -> &[Replicate] {
        &self.replicates
    }

    /// `(sampled R0, trajectory)` for every replicate that integrated.
    pub fn successes(&self) -> impl Iterator<Item = (f64, &Trajectory)> {
        self.replicates
            .iter()
            .filter_map(|replicate| replicate.trajectory().map(|t| (replicate.r0, t)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &Replicate> {
        self.replicates.iter().filter(|replicate| replicate.is_failed())
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.attempted() - self.failed_count()
    }

    /// Number of replicates dispatched. Smaller than [`Ensemble::requested`] only if the run
    /// was cancelled.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.replicates.len()
    }

    #[must_use]
    pub fn requested(&self) -> usize {
        self.requested
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Runs ensembles with a fixed integrator and failure policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsembleSimulator {
    integrator: Integrator,
    options: EnsembleOptions,
}

impl EnsembleSimulator {
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` if either set of options is invalid.
    pub fn new(
        integrator_options: IntegratorOptions,
        options: EnsembleOptions,
    ) -> Result<Self, EpiError> {
        options.validate()?;
        Ok(EnsembleSimulator {
            integrator: Integrator::new(integrator_options)?,
            options,
        })
    }

    #[must_use]
    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    /// Runs `n_reps` replicates to completion.
    ///
    /// # Errors
    ///
    /// See [`EnsembleSimulator::run_cancellable`].
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        base: &ParameterSet,
        profile: &ContactReductionProfile,
        initial: &State,
        grid: &TimeGrid,
        n_reps: usize,
        r0_sample_sd: f64,
        seed: u64,
    ) -> Result<Ensemble, EpiError> {
        self.run_cancellable(
            base,
            profile,
            initial,
            grid,
            n_reps,
            r0_sample_sd,
            seed,
            &CancellationToken::new(),
        )
    }

    /// Runs up to `n_reps` replicates, dispatching no new replicate once `cancel` is set.
    /// Replicates already running finish normally.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` before any integration if the inputs are invalid,
    /// and `EpiError::EnsembleFailure` if more than the configured fraction of attempted
    /// replicates failed. Individual failures are recorded in the returned [`Ensemble`].
    #[allow(clippy::too_many_arguments)]
    pub fn run_cancellable(
        &self,
        base: &ParameterSet,
        profile: &ContactReductionProfile,
        initial: &State,
        grid: &TimeGrid,
        n_reps: usize,
        r0_sample_sd: f64,
        seed: u64,
        cancel: &CancellationToken,
    ) -> Result<Ensemble, EpiError> {
        base.validate()?;
        profile.validate()?;
        initial.validate()?;
        if n_reps < 1 {
            return Err(EpiError::invalid("nReps must be >= 1"));
        }
        if !(r0_sample_sd >= 0.0 && r0_sample_sd.is_finite()) {
            return Err(EpiError::invalid(format!(
                "r0SampleSd must be >= 0, got {r0_sample_sd}"
            )));
        }
        if !relative_eq(initial.total(), base.n, 1e-6) {
            warn!(
                "initial state holds {} people but N is {}",
                initial.total(),
                base.n
            );
        }

        info!(
            "running {} replicates (R0 ~ Normal({}, {}), seed {})",
            n_reps, base.r0, r0_sample_sd, seed
        );

        let run_one = |index: usize| -> Option<Replicate> {
            if cancel.is_cancelled() {
                return None;
            }
            let replicate =
                self.run_replicate(base, profile, initial, grid, r0_sample_sd, seed, index);
            #[cfg(feature = "progress_bar")]
            crate::progress::increment_replicate_progress();
            Some(replicate)
        };

        let attempts: Vec<Option<Replicate>> = match self.options.threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| EpiError::ConfigError(format!("cannot start worker pool: {e}")))?
                .install(|| (0..n_reps).into_par_iter().map(run_one).collect()),
            None => (0..n_reps).into_par_iter().map(run_one).collect(),
        };

        let replicates: Vec<Replicate> = attempts.into_iter().flatten().collect();
        let ensemble = Ensemble {
            times: grid.times().to_vec(),
            cancelled: replicates.len() < n_reps,
            replicates,
            requested: n_reps,
        };

        let attempted = ensemble.attempted();
        let failed = ensemble.failed_count();
        if ensemble.is_cancelled() {
            info!("ensemble cancelled after {attempted} of {n_reps} replicates");
        }
        #[allow(clippy::cast_precision_loss)]
        let too_many_failures =
            failed as f64 > self.options.max_failure_fraction * attempted as f64;
        if attempted > 0 && too_many_failures {
            return Err(EpiError::EnsembleFailure { failed, attempted });
        }
        info!("ensemble finished: {} succeeded, {failed} failed", attempted - failed);
        Ok(ensemble)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_replicate(
        &self,
        base: &ParameterSet,
        profile: &ContactReductionProfile,
        initial: &State,
        grid: &TimeGrid,
        r0_sample_sd: f64,
        master_seed: u64,
        index: usize,
    ) -> Replicate {
        let seed = replicate_seed(master_seed, index);
        let mut rng = replicate_rng(master_seed, index);
        let (r0, result) = match sample_r0(&mut rng, base.r0, r0_sample_sd) {
            Err(e) => (f64::NAN, Err(e)),
            Ok(r0) if r0 <= 0.0 => (
                r0,
                Err(EpiError::invalid(format!("sampled R0 {r0} is not positive"))),
            ),
            Ok(r0) => {
                let params = base.with_r0(r0);
                (
                    r0,
                    self.integrator
                        .integrate_model(initial, grid, &params, profile),
                )
            }
        };

        let outcome = match result {
            Ok(trajectory) => {
                let steps = trajectory.steps();
                debug!(
                    "replicate {index} (R0 {r0:.4}) integrated in {} steps ({} rejected)",
                    steps.accepted, steps.rejected
                );
                ReplicateOutcome::Completed(trajectory)
            }
            Err(error) => {
                warn!("replicate {index} (R0 {r0:.4}) failed: {error}");
                ReplicateOutcome::Failed(error)
            }
        };
        Replicate {
            index,
            seed,
            r0,
            outcome,
        }
    }
}
