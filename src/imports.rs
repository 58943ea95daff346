//! Imported cases layered on top of an aggregated series after the fact.
//!
//! The overlay never feeds back into the ODE. Each row gets a Poisson count of the people
//! imported since the previous row, drawn from the overlay's own seeded stream, and the whole
//! band of the row is shifted by the same amount so band ordering is kept. Cumulative
//! statistics are shifted by the running total of the imports instead.

use rand_distr::{Distribution, Poisson};
use serde_derive::{Deserialize, Serialize};

use crate::aggregate::{AggregatedSeries, Statistic};
use crate::error::EpiError;
use crate::random::derived_rng;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImportOverlay {
    /// Mean imported cases per unit of time (a day).
    pub daily_rate: f64,
    pub seed: u64,
}

impl ImportOverlay {
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` if the rate is negative or not finite.
    pub fn validate(&self) -> Result<(), EpiError> {
        if self.daily_rate >= 0.0 && self.daily_rate.is_finite() {
            Ok(())
        } else {
            Err(EpiError::invalid(format!(
                "import daily_rate must be >= 0, got {}",
                self.daily_rate
            )))
        }
    }

    /// Imports arriving in the interval ending at each of `times`. The mean of a draw is
    /// `daily_rate` times the time elapsed since the previous entry, so the first entry is
    /// always zero.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` for an invalid rate.
    pub fn draws(&self, times: &[f64]) -> Result<Vec<f64>, EpiError> {
        self.validate()?;
        let mut rng = derived_rng(self.seed, "imports");
        let mut draws = Vec::with_capacity(times.len());
        let mut previous = times.first().copied();
        for &time in times {
            let mean = self.daily_rate * (time - previous.unwrap_or(time));
            previous = Some(time);
            if mean > 0.0 {
                let poisson = Poisson::new(mean)
                    .map_err(|e| EpiError::invalid(format!("import daily_rate: {e}")))?;
                draws.push(poisson.sample(&mut rng));
            } else {
                draws.push(0.0);
            }
        }
        Ok(draws)
    }

    /// The series of `statistic` with this overlay's imports added. Statistics that do not
    /// count infections come back unchanged.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` for an invalid rate.
    pub fn apply(
        &self,
        series: &AggregatedSeries,
        statistic: Statistic,
    ) -> Result<AggregatedSeries, EpiError> {
        if !statistic.counts_infections() {
            return Ok(series.clone());
        }
        let times: Vec<f64> = series.rows().iter().map(|row| row.time).collect();
        let mut offsets = self.draws(&times)?;
        if statistic.is_cumulative() {
            let mut total = 0.0;
            for offset in &mut offsets {
                total += *offset;
                *offset = total;
            }
        }
        Ok(series.shifted(&offsets))
    }
}
