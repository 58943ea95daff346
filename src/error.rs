use std::fmt::{self, Debug, Display};
use std::io;

/// Provides `EpiError` and maps other errors to
/// convert to an `EpiError`
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum EpiError {
    /// A parameter, option, or configuration value is out of range. Raised before any
    /// integration starts.
    InvalidParameter(String),
    /// The time grid is not strictly increasing or has fewer than two points.
    TimeGridError(String),
    /// A single integration failed. `time` is the last time the solver reached.
    IntegrationError { time: f64, reason: String },
    /// Too many replicates of an ensemble failed.
    EnsembleFailure { failed: usize, attempted: usize },
    /// A statistic could not be evaluated, or there were no trajectories to reduce.
    AggregationError(String),
    ConfigError(String),
    IoError(io::Error),
    JsonError(serde_json::Error),
    CsvError(csv::Error),
}

impl EpiError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EpiError::InvalidParameter(message.into())
    }
}

impl From<io::Error> for EpiError {
    fn from(error: io::Error) -> Self {
        EpiError::IoError(error)
    }
}

impl From<serde_json::Error> for EpiError {
    fn from(error: serde_json::Error) -> Self {
        EpiError::JsonError(error)
    }
}

impl From<csv::Error> for EpiError {
    fn from(error: csv::Error) -> Self {
        EpiError::CsvError(error)
    }
}

impl std::error::Error for EpiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EpiError::IoError(e) => Some(e),
            EpiError::JsonError(e) => Some(e),
            EpiError::CsvError(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for EpiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EpiError::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            EpiError::TimeGridError(msg) => write!(f, "invalid time grid: {msg}"),
            EpiError::IntegrationError { time, reason } => {
                write!(f, "integration failed at t={time}: {reason}")
            }
            EpiError::EnsembleFailure { failed, attempted } => write!(
                f,
                "ensemble failed: {failed} of {attempted} replicates did not integrate"
            ),
            EpiError::AggregationError(msg) => write!(f, "aggregation failed: {msg}"),
            EpiError::ConfigError(msg) => write!(f, "configuration error: {msg}"),
            EpiError::IoError(e) => write!(f, "I/O error: {e}"),
            EpiError::JsonError(e) => write!(f, "JSON error: {e}"),
            EpiError::CsvError(e) => write!(f, "CSV error: {e}"),
        }
    }
}
