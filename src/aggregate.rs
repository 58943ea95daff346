//! Reductions of an [`Ensemble`] into quantile bands and per-replicate peak summaries.
//!
//! Both reductions only look at replicates that integrated successfully, and report how many
//! failed replicates they skipped. Neither depends on replicate order.

use chrono::{NaiveDate, TimeDelta};
use serde_derive::{Deserialize, Serialize};

use crate::ensemble::Ensemble;
use crate::error::EpiError;
use crate::model::{Compartment, State};
use crate::numeric::quantile_sorted;

/// A scalar derived from a [`State`].
pub trait StateStatistic: Sync {
    fn evaluate(&self, state: &State) -> f64;
}

impl<F> StateStatistic for F
where
    F: Fn(&State) -> f64 + Sync,
{
    fn evaluate(&self, state: &State) -> f64 {
        self(state)
    }
}

/// The standard statistics reported for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// `I + Id`
    Symptomatic,
    /// `E1 + E2 + I` over both groups
    TotalInfectious,
    /// `N - (S + Sd)`, with `N` the conserved total of the state
    EverInfected,
    /// `Q + Qd`
    Quarantined,
    /// `R + Rd`
    Recovered,
    /// Everyone in the distancing group
    Distancing,
    /// `S + Sd`
    Susceptible,
}

impl Statistic {
    pub const ALL: [Statistic; 7] = [
        Statistic::Symptomatic,
        Statistic::TotalInfectious,
        Statistic::EverInfected,
        Statistic::Quarantined,
        Statistic::Recovered,
        Statistic::Distancing,
        Statistic::Susceptible,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Statistic::Symptomatic => "symptomatic",
            Statistic::TotalInfectious => "total_infectious",
            Statistic::EverInfected => "ever_infected",
            Statistic::Quarantined => "quarantined",
            Statistic::Recovered => "recovered",
            Statistic::Distancing => "distancing",
            Statistic::Susceptible => "susceptible",
        }
    }

    /// Whether the statistic counts infected people, so that imported cases add to it.
    #[must_use]
    pub fn counts_infections(self) -> bool {
        matches!(
            self,
            Statistic::Symptomatic | Statistic::TotalInfectious | Statistic::EverInfected
        )
    }

    /// Whether the statistic accumulates over time and never decreases.
    #[must_use]
    pub fn is_cumulative(self) -> bool {
        matches!(self, Statistic::EverInfected)
    }
}

impl StateStatistic for Statistic {
    fn evaluate(&self, s: &State) -> f64 {
        use Compartment::*;
        match self {
            Statistic::Symptomatic => s[I] + s[Id],
            Statistic::TotalInfectious => s[E1] + s[E2] + s[I] + s[E1d] + s[E2d] + s[Id],
            Statistic::EverInfected => s.total() - (s[S] + s[Sd]),
            Statistic::Quarantined => s[Q] + s[Qd],
            Statistic::Recovered => s[R] + s[Rd],
            Statistic::Distancing => s.distancing_total(),
            Statistic::Susceptible => s[S] + s[Sd],
        }
    }
}

/// Probability levels of the reported band. The default is the 10th, 50th and 90th
/// percentiles, i.e. an 80% band around the median.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantileLevels {
    pub lower: f64,
    pub median: f64,
    pub upper: f64,
}

impl Default for QuantileLevels {
    fn default() -> Self {
        QuantileLevels {
            lower: 0.1,
            median: 0.5,
            upper: 0.9,
        }
    }
}

impl QuantileLevels {
    /// # Errors
    ///
    /// Returns `EpiError::InvalidParameter` unless `0 <= lower <= median <= upper <= 1`.
    pub fn validate(&self) -> Result<(), EpiError> {
        if 0.0 <= self.lower
            && self.lower <= self.median
            && self.median <= self.upper
            && self.upper <= 1.0
        {
            Ok(())
        } else {
            Err(EpiError::invalid(format!(
                "quantile levels must satisfy 0 <= lower <= median <= upper <= 1, got {self:?}"
            )))
        }
    }
}

/// One time point of an [`AggregatedSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesRow {
    pub time: f64,
    pub lower: f64,
    pub median: f64,
    pub upper: f64,
}

/// A [`SeriesRow`] joined with a calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatedRow {
    pub time: f64,
    pub date: NaiveDate,
    pub lower: f64,
    pub median: f64,
    pub upper: f64,
}

/// Quantile bands of one statistic at every grid time.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedSeries {
    levels: QuantileLevels,
    rows: Vec<SeriesRow>,
    included: usize,
    excluded: usize,
}

impl AggregatedSeries {
    #[must_use]
    pub fn rows(&self) -> &[SeriesRow] {
        &self.rows
    }

    #[must_use]
    pub fn levels(&self) -> QuantileLevels {
        self.levels
    }

    /// Replicates that contributed.
    #[must_use]
    pub fn included(&self) -> usize {
        self.included
    }

    /// Failed replicates that were skipped.
    #[must_use]
    pub fn excluded(&self) -> usize {
        self.excluded
    }

    /// The median row with the largest median, first one on ties.
    #[must_use]
    pub fn peak_median(&self) -> Option<&SeriesRow> {
        self.rows
            .iter()
            .reduce(|best, row| if row.median > best.median { row } else { best })
    }

    /// Adds `offsets[i]` to the lower, median and upper values of row `i`.
    pub(crate) fn shifted(&self, offsets: &[f64]) -> AggregatedSeries {
        let rows = self
            .rows
            .iter()
            .zip(offsets)
            .map(|(row, offset)| SeriesRow {
                time: row.time,
                lower: row.lower + offset,
                median: row.median + offset,
                upper: row.upper + offset,
            })
            .collect();
        AggregatedSeries { rows, ..*self }
    }

    /// Joins each row with `epoch` plus the whole number of days in its time.
    ///
    /// # Errors
    ///
    /// Returns `EpiError::AggregationError` if a date falls outside the representable range.
    pub fn with_dates(&self, epoch: NaiveDate) -> Result<Vec<DatedRow>, EpiError> {
        self.rows
            .iter()
            .map(|row| {
                #[allow(clippy::cast_possible_truncation)]
                let days = row.time.floor() as i64;
                let date = TimeDelta::try_days(days)
                    .and_then(|delta| epoch.checked_add_signed(delta))
                    .ok_or_else(|| {
                        EpiError::AggregationError(format!(
                            "time {} is out of the calendar range from {epoch}",
                            row.time
                        ))
                    })?;
                Ok(DatedRow {
                    time: row.time,
                    date,
                    lower: row.lower,
                    median: row.median,
                    upper: row.upper,
                })
            })
            .collect()
    }
}

/// Peak of one statistic in one replicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryInfo {
    pub replicate: usize,
    pub r0: f64,
    pub peak_time: f64,
    pub peak_size: f64,
}

/// Per-replicate peaks across an ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub rows: Vec<SummaryInfo>,
    pub excluded: usize,
}

fn no_survivors(ensemble: &Ensemble) -> EpiError {
    EpiError::AggregationError(format!(
        "no successful replicates to reduce ({} attempted, {} failed)",
        ensemble.attempted(),
        ensemble.failed_count()
    ))
}

fn evaluate_checked(
    statistic: &impl StateStatistic,
    state: &State,
    time: f64,
    replicate: usize,
) -> Result<f64, EpiError> {
    let value = statistic.evaluate(state);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EpiError::AggregationError(format!(
            "statistic is {value} at t={time} in replicate {replicate}"
        )))
    }
}

/// Computes `levels` quantiles of `statistic` across the successful replicates at every grid
/// time, using linear interpolation between order statistics.
///
/// # Errors
///
/// Returns `EpiError::AggregationError` if no replicate succeeded or the statistic is not
/// finite anywhere, and `EpiError::InvalidParameter` for invalid levels.
pub fn aggregate(
    ensemble: &Ensemble,
    statistic: &impl StateStatistic,
    levels: QuantileLevels,
) -> Result<AggregatedSeries, EpiError> {
    levels.validate()?;
    let survivors: Vec<_> = ensemble
        .replicates()
        .iter()
        .filter_map(|replicate| replicate.trajectory().map(|t| (replicate.index, t)))
        .collect();
    if survivors.is_empty() {
        return Err(no_survivors(ensemble));
    }

    let mut values = Vec::with_capacity(survivors.len());
    let mut rows = Vec::with_capacity(ensemble.times().len());
    for (i, &time) in ensemble.times().iter().enumerate() {
        values.clear();
        for (index, trajectory) in &survivors {
            values.push(evaluate_checked(
                statistic,
                &trajectory.states()[i],
                time,
                *index,
            )?);
        }
        values.sort_by(f64::total_cmp);
        rows.push(SeriesRow {
            time,
            lower: quantile_sorted(&values, levels.lower),
            median: quantile_sorted(&values, levels.median),
            upper: quantile_sorted(&values, levels.upper),
        });
    }

    Ok(AggregatedSeries {
        levels,
        rows,
        included: survivors.len(),
        excluded: ensemble.failed_count(),
    })
}

/// Finds, for every successful replicate, the time and size of the maximum of `statistic`
/// (the earliest time on ties), together with the replicate's sampled `R0`.
///
/// # Errors
///
/// Returns `EpiError::AggregationError` if no replicate succeeded or the statistic is not
/// finite anywhere.
pub fn summarize(
    ensemble: &Ensemble,
    statistic: &impl StateStatistic,
) -> Result<Summary, EpiError> {
    let mut rows = Vec::new();
    for replicate in ensemble.replicates() {
        let Some(trajectory) = replicate.trajectory() else {
            continue;
        };
        let mut peak: Option<(f64, f64)> = None;
        for (time, state) in trajectory.iter() {
            let value = evaluate_checked(statistic, state, time, replicate.index)?;
            if peak.is_none_or(|(_, best)| value > best) {
                peak = Some((time, value));
            }
        }
        if let Some((peak_time, peak_size)) = peak {
            rows.push(SummaryInfo {
                replicate: replicate.index,
                r0: replicate.r0,
                peak_time,
                peak_size,
            });
        }
    }
    if rows.is_empty() {
        return Err(no_survivors(ensemble));
    }
    Ok(Summary {
        rows,
        excluded: ensemble.failed_count(),
    })
}
