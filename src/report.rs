//! CSV reports of an ensemble run.
//!
//! Every report is a file `<prefix><name>.csv` in the output directory:
//!
//! * one per aggregated statistic, columns `time,date,lower,median,upper` (`date` is empty
//!   without a calendar epoch)
//! * `summary`, columns `replicate,r0,peak_time,peak_size`
//! * `failures`, columns `replicate,r0,reason`
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::Writer;
use log::{debug, info};
use serde::Serialize;

use crate::aggregate::{AggregatedSeries, Statistic, Summary};
use crate::ensemble::Ensemble;
use crate::error::EpiError;

/// Where reports go and whether existing files may be replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub overwrite: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            output_dir: PathBuf::from("."),
            file_prefix: String::new(),
            overwrite: false,
        }
    }
}

impl ReportOptions {
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}{}.csv", self.file_prefix, name))
    }
}

#[derive(Serialize)]
struct SeriesRecord {
    time: f64,
    date: Option<NaiveDate>,
    lower: f64,
    median: f64,
    upper: f64,
}

#[derive(Serialize)]
struct FailureRecord<'a> {
    replicate: usize,
    r0: f64,
    reason: &'a str,
}

// Creates all parent directories and the file. An existing file is an error unless
// `overwrite` is set.
fn create_report_file(path: &Path, overwrite: bool) -> Result<File, EpiError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let file = if overwrite {
        File::create(path)
    } else {
        File::create_new(path)
    };
    file.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            EpiError::ConfigError(format!(
                "report {} already exists (use overwrite to replace it)",
                path.display()
            ))
        } else {
            e.into()
        }
    })
}

fn write_records<T: Serialize>(
    options: &ReportOptions,
    name: &str,
    records: impl IntoIterator<Item = T>,
) -> Result<PathBuf, EpiError> {
    let path = options.path_for(name);
    let mut writer = Writer::from_writer(create_report_file(&path, options.overwrite)?);
    let mut rows = 0usize;
    for record in records {
        writer.serialize(record)?;
        rows += 1;
    }
    writer.flush()?;
    debug!("wrote {rows} rows to {}", path.display());
    Ok(path)
}

/// Writes the band of one statistic.
///
/// # Errors
///
/// Returns an error if the file exists and overwriting is off, cannot be written, or a date
/// falls outside the calendar.
pub fn write_series(
    options: &ReportOptions,
    statistic: Statistic,
    series: &AggregatedSeries,
    epoch: Option<NaiveDate>,
) -> Result<PathBuf, EpiError> {
    let records: Vec<SeriesRecord> = match epoch {
        Some(epoch) => series
            .with_dates(epoch)?
            .into_iter()
            .map(|row| SeriesRecord {
                time: row.time,
                date: Some(row.date),
                lower: row.lower,
                median: row.median,
                upper: row.upper,
            })
            .collect(),
        None => series
            .rows()
            .iter()
            .map(|row| SeriesRecord {
                time: row.time,
                date: None,
                lower: row.lower,
                median: row.median,
                upper: row.upper,
            })
            .collect(),
    };
    write_records(options, statistic.name(), records)
}

/// # Errors
///
/// Returns an error if the file exists and overwriting is off, or cannot be written.
pub fn write_summary(options: &ReportOptions, summary: &Summary) -> Result<PathBuf, EpiError> {
    write_records(options, "summary", &summary.rows)
}

/// Writes one row per failed replicate. The file is written, with only a header, even when
/// nothing failed.
///
/// # Errors
///
/// Returns an error if the file exists and overwriting is off, or cannot be written.
pub fn write_failures(options: &ReportOptions, ensemble: &Ensemble) -> Result<PathBuf, EpiError> {
    let reasons: Vec<(usize, f64, String)> = ensemble
        .failures()
        .filter_map(|replicate| {
            replicate
                .failure()
                .map(|error| (replicate.index, replicate.r0, error.to_string()))
        })
        .collect();
    if reasons.is_empty() {
        // `csv` only writes a header along with the first record.
        let path = options.path_for("failures");
        let mut writer = Writer::from_writer(create_report_file(&path, options.overwrite)?);
        writer.write_record(["replicate", "r0", "reason"])?;
        writer.flush()?;
        return Ok(path);
    }
    info!("{} failed replicates reported", reasons.len());
    write_records(
        options,
        "failures",
        reasons.iter().map(|(replicate, r0, reason)| FailureRecord {
            replicate: *replicate,
            r0: *r0,
            reason,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, summarize, QuantileLevels};
    use crate::ensemble::{EnsembleOptions, EnsembleSimulator};
    use crate::integrator::{IntegratorOptions, TimeGrid};
    use crate::model::State;
    use crate::parameters::ParameterSet;
    use crate::profile::ContactReductionProfile;
    use tempfile::tempdir;

    fn ensemble(max_steps: usize) -> Ensemble {
        let params = ParameterSet {
            n: 1_000.0,
            ..ParameterSet::default()
        };
        let simulator = EnsembleSimulator::new(
            IntegratorOptions {
                max_steps,
                ..IntegratorOptions::default()
            },
            EnsembleOptions {
                max_failure_fraction: 1.0,
                threads: None,
            },
        )
        .unwrap();
        simulator
            .run(
                &params,
                &ContactReductionProfile::default(),
                &State::seeded(&params, 5.0).unwrap(),
                &TimeGrid::from_range(0.0, 20.0, 1.0).unwrap(),
                3,
                0.1,
                5,
            )
            .unwrap()
    }

    #[test]
    fn series_report_has_expected_columns() {
        let temp_dir = tempdir().unwrap();
        let options = ReportOptions {
            output_dir: temp_dir.path().join("nested"),
            file_prefix: "run_".to_string(),
            overwrite: false,
        };
        let ensemble = ensemble(200_000);
        let series =
            aggregate(&ensemble, &Statistic::Recovered, QuantileLevels::default()).unwrap();
        let path = write_series(
            &options,
            Statistic::Recovered,
            &series,
            NaiveDate::from_ymd_opt(2020, 3, 1),
        )
        .unwrap();
        assert_eq!(path, temp_dir.path().join("nested").join("run_recovered.csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            ["time", "date", "lower", "median", "upper"]
        );
        let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 21);
        assert_eq!(&records[0][1], "2020-03-01");
        assert_eq!(&records[2][1], "2020-03-03");
    }

    #[test]
    fn undated_series_leaves_date_empty() {
        let temp_dir = tempdir().unwrap();
        let options = ReportOptions {
            output_dir: temp_dir.path().to_path_buf(),
            ..ReportOptions::default()
        };
        let ensemble = ensemble(200_000);
        let series =
            aggregate(&ensemble, &Statistic::Symptomatic, QuantileLevels::default()).unwrap();
        let path = write_series(&options, Statistic::Symptomatic, &series, None).unwrap();
        let mut reader = csv::Reader::from_path(path).unwrap();
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(&first[0], "0.0");
        assert_eq!(&first[1], "");
    }

    #[test]
    fn existing_file_needs_overwrite() {
        let temp_dir = tempdir().unwrap();
        let mut options = ReportOptions {
            output_dir: temp_dir.path().to_path_buf(),
            ..ReportOptions::default()
        };
        let ensemble = ensemble(200_000);
        let summary = summarize(&ensemble, &Statistic::Symptomatic).unwrap();
        write_summary(&options, &summary).unwrap();
        assert!(matches!(
            write_summary(&options, &summary),
            Err(EpiError::ConfigError(_))
        ));
        options.overwrite = true;
        let path = write_summary(&options, &summary).unwrap();

        let mut reader = csv::Reader::from_path(path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            ["replicate", "r0", "peak_time", "peak_size"]
        );
        assert_eq!(reader.records().count(), 3);
    }

    #[test]
    fn failures_report_lists_reasons() {
        let temp_dir = tempdir().unwrap();
        let options = ReportOptions {
            output_dir: temp_dir.path().to_path_buf(),
            ..ReportOptions::default()
        };
        let path = write_failures(&options, &ensemble(2)).unwrap();
        let mut reader = csv::Reader::from_path(path).unwrap();
        let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 3);
        assert!(records[0][2].contains("integration failed"));
    }

    #[test]
    fn empty_failures_report_has_header() {
        let temp_dir = tempdir().unwrap();
        let options = ReportOptions {
            output_dir: temp_dir.path().to_path_buf(),
            ..ReportOptions::default()
        };
        let path = write_failures(&options, &ensemble(200_000)).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.trim(), "replicate,r0,reason");
    }
}
