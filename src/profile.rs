//! Time-varying contact reduction applied to the distancing sub-population.
//!
//! A profile is a pure function of time. It holds no state, so an adaptive integrator may
//! sample it at any intermediate time and in any order.

use serde_derive::{Deserialize, Serialize};

use crate::error::EpiError;

/// What a [`ContactReductionProfile::Ramp`] does once the ramp has finished.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RampContinuation {
    /// Hold the final value indefinitely.
    #[default]
    Hold,
    /// Hold the final value until `at`, then lift the reduction entirely.
    StepBack { at: f64 },
}

/// The contact-reduction factor `f(t)`. `1.0` means no reduction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContactReductionProfile {
    Constant {
        value: f64,
    },
    /// `value` on the open interval `(start, end)`, `1.0` everywhere else.
    StepWindow {
        start: f64,
        end: f64,
        value: f64,
    },
    /// `from` before `start`, linear between `start` and `end`, then `then`.
    Ramp {
        start: f64,
        end: f64,
        from: f64,
        to: f64,
        #[serde(default)]
        then: RampContinuation,
    },
}

impl Default for ContactReductionProfile {
    fn default() -> Self {
        ContactReductionProfile::Constant { value: 1.0 }
    }
}

fn check_factor(name: &str, value: f64) -> Result<(), EpiError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(EpiError::invalid(format!(
            "contact reduction factor `{name}` must lie in (0, 1], got {value}"
        )))
    }
}

fn check_window(start: f64, end: f64) -> Result<(), EpiError> {
    if start.is_finite() && end.is_finite() && start < end {
        Ok(())
    } else {
        Err(EpiError::invalid(format!(
            "contact reduction window must satisfy start < end, got [{start}, {end})"
        )))
    }
}

impl ContactReductionProfile {
    /// Evaluates the factor at time `t`.
    #[must_use]
    pub fn sample(&self, t: f64) -> f64 {
        match *self {
            ContactReductionProfile::Constant { value } => value,
            ContactReductionProfile::StepWindow { start, end, value } => {
                if start < t && t < end {
                    value
                } else {
                    1.0
                }
            }
            ContactReductionProfile::Ramp {
                start,
                end,
                from,
                to,
                then,
            } => {
                if t < start {
                    from
                } else if t <= end {
                    from + (to - from) * (t - start) / (end - start)
                } else {
                    match then {
                        RampContinuation::Hold => to,
                        RampContinuation::StepBack { at } if t >= at => 1.0,
                        RampContinuation::StepBack { .. } => to,
                    }
                }
            }
        }
    }

    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` if any factor lies outside `(0, 1]` or a window is
    /// empty or inverted.
    pub fn validate(&self) -> Result<(), EpiError> {
        match *self {
            ContactReductionProfile::Constant { value } => check_factor("value", value),
            ContactReductionProfile::StepWindow { start, end, value } => {
                check_window(start, end)?;
                check_factor("value", value)
            }
            ContactReductionProfile::Ramp {
                start,
                end,
                from,
                to,
                then,
            } => {
                check_window(start, end)?;
                check_factor("from", from)?;
                check_factor("to", to)?;
                if let RampContinuation::StepBack { at } = then {
                    if !(at >= end) {
                        return Err(EpiError::invalid(format!(
                            "ramp step-back time {at} precedes the ramp end {end}"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}
