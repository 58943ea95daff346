//! Epidemiological rate constants shared by every replicate of a run.

use serde_derive::{Deserialize, Serialize};

use crate::error::EpiError;

/// The immutable parameter record handed to the derivative. All rates are per day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Population size
    pub n: f64,
    /// Mean infectious and quarantine duration
    pub d: f64,
    /// Basic reproduction number
    pub r0: f64,
    /// Progression rate E1 -> E2
    pub k1: f64,
    /// Progression rate E2 -> I
    pub k2: f64,
    /// Self-quarantine rate from I
    #[serde(default)]
    pub q: f64,
    /// Rate of entering the distancing group
    #[serde(default)]
    pub r: f64,
    /// Rate of leaving the distancing group
    #[serde(default)]
    pub ur: f64,
}

impl ParameterSet {
    /// Checks the parameter ranges. Nothing is ever silently corrected.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` naming the first offending field.
    pub fn validate(&self) -> Result<(), EpiError> {
        let positive = [
            ("N", self.n),
            ("D", self.d),
            ("R0", self.r0),
            ("k1", self.k1),
            ("k2", self.k2),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(EpiError::invalid(format!("{name} must be > 0, got {value}")));
            }
        }
        let non_negative = [("q", self.q), ("r", self.r), ("ur", self.ur)];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(EpiError::invalid(format!("{name} must be >= 0, got {value}")));
            }
        }
        Ok(())
    }

    /// Effective transmission intensity `R0 / (D + 1/k2)`: both the presymptomatic stage and
    /// the symptomatic stage transmit at this rate.
    #[must_use]
    pub fn beta(&self) -> f64 {
        self.r0 / (self.d + 1.0 / self.k2)
    }

    /// Long-run fraction of the population in the distancing group, `r / (r + ur)`. Zero when
    /// nobody ever enters distancing.
    #[must_use]
    pub fn distancing_fraction(&self) -> f64 {
        let total = self.r + self.ur;
        if total > 0.0 {
            self.r / total
        } else {
            0.0
        }
    }

    /// A copy of these parameters with `R0` replaced.
    #[must_use]
    pub fn with_r0(&self, r0: f64) -> Self {
        Self { r0, ..*self }
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        ParameterSet {
            n: 2_400_000.0,
            d: 5.0,
            r0: 2.5,
            k1: 0.25,
            k2: 1.0,
            q: 0.0,
            r: 1.0,
            ur: 0.8,
        }
    }
}
