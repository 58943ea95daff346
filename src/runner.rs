use std::path::PathBuf;

use clap::{Args, Command, FromArgMatches as _};
use log::{info, LevelFilter};

use crate::aggregate::{aggregate, summarize, AggregatedSeries, Statistic, Summary};
use crate::config::SimulationConfig;
use crate::ensemble::{CancellationToken, Ensemble};
use crate::error::EpiError;
use crate::execution_stats::{
    log_execution_statistics, print_execution_statistics, ExecutionProfilingCollector,
};
use crate::log::set_log_level;
use crate::report::{write_failures, write_series, write_summary, ReportOptions};

/// Command line arguments of the ensemble runner
#[derive(Args, Debug, Clone)]
pub struct BaseArgs {
    /// Random seed. Overrides the seed in the config file
    #[arg(short, long)]
    pub random_seed: Option<u64>,

    /// Path of the JSON run configuration
    #[arg(short, long)]
    pub config: PathBuf,

    /// Directory for report output
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Prefix for report file names
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Replace existing report files
    #[arg(short, long)]
    pub force_overwrite: bool,

    /// Enable logging at this level (error, warn, info, debug, trace)
    #[arg(short, long)]
    pub log_level: Option<LevelFilter>,

    /// Show a progress bar counting finished replicates
    #[arg(long)]
    pub progress: bool,

    /// Do not print execution statistics
    #[arg(long)]
    pub no_stats: bool,
}

/// What a run produced, in memory as well as on disk.
#[derive(Debug)]
pub struct RunOutput {
    pub ensemble: Ensemble,
    pub series: Vec<(Statistic, AggregatedSeries)>,
    pub summary: Summary,
    pub reports: Vec<PathBuf>,
}

fn create_cli() -> Command {
    let cli = Command::new("epi-ensemble")
        .about("Runs a Monte Carlo ensemble of the SEIQR distancing model");
    BaseArgs::augment_args(cli)
}

/// Parses the process arguments and runs the configured ensemble.
///
/// # Errors
/// Returns an error if argument parsing or any step of the run fails
#[allow(clippy::missing_errors_doc)]
pub fn run_with_args() -> Result<RunOutput, Box<dyn std::error::Error>> {
    let matches = create_cli().get_matches();
    let args = BaseArgs::from_arg_matches(&matches)?;
    Ok(run(&args)?)
}

/// Runs an ensemble as described by `args`: loads the configuration, integrates every
/// replicate, aggregates the configured statistics and writes the reports.
///
/// # Errors
///
/// Returns the first error of any of those steps.
pub fn run(args: &BaseArgs) -> Result<RunOutput, EpiError> {
    if let Some(level) = args.log_level {
        set_log_level(level);
    }

    let mut config = SimulationConfig::from_json_file(&args.config)?;
    if let Some(seed) = args.random_seed {
        config.seed = seed;
    }
    let report_options = ReportOptions {
        output_dir: args.output_dir.clone(),
        file_prefix: args.prefix.clone(),
        overwrite: args.force_overwrite,
    };

    let mut collector = ExecutionProfilingCollector::new();
    #[cfg(feature = "progress_bar")]
    if args.progress {
        crate::progress::init_replicate_progress_bar(config.n_reps);
    }
    let ensemble = config.run(&CancellationToken::new())?;
    collector.poll_memory();

    let mut reports = Vec::new();
    let mut series = Vec::with_capacity(config.statistics.len());
    for &statistic in &config.statistics {
        let mut band = aggregate(&ensemble, &statistic, config.quantiles)?;
        if let Some(imports) = config.imports {
            band = imports.apply(&band, statistic)?;
        }
        reports.push(write_series(&report_options, statistic, &band, config.epoch)?);
        series.push((statistic, band));
    }
    let summary = summarize(&ensemble, &config.summary_statistic)?;
    reports.push(write_summary(&report_options, &summary)?);
    reports.push(write_failures(&report_options, &ensemble)?);
    info!(
        "wrote {} reports to {}",
        reports.len(),
        report_options.output_dir.display()
    );

    let stats = collector.compute_final_statistics(ensemble.attempted());
    log_execution_statistics(&stats);
    if !args.no_stats {
        print_execution_statistics(&stats);
    }

    Ok(RunOutput {
        ensemble,
        series,
        summary,
        reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(output_dir: PathBuf) -> BaseArgs {
        BaseArgs {
            random_seed: None,
            config: PathBuf::from("tests/data/small_run.json"),
            output_dir,
            prefix: String::new(),
            force_overwrite: false,
            log_level: None,
            progress: false,
            no_stats: true,
        }
    }

    #[test]
    fn cli_parses_all_flags() {
        let matches = create_cli()
            .try_get_matches_from([
                "epi-ensemble",
                "--config",
                "run.json",
                "-r",
                "42",
                "-o",
                "out",
                "--prefix",
                "a_",
                "-f",
                "--log-level",
                "debug",
                "--no-stats",
            ])
            .unwrap();
        let args = BaseArgs::from_arg_matches(&matches).unwrap();
        assert_eq!(args.random_seed, Some(42));
        assert_eq!(args.config, PathBuf::from("run.json"));
        assert_eq!(args.output_dir, PathBuf::from("out"));
        assert_eq!(args.prefix, "a_");
        assert!(args.force_overwrite);
        assert_eq!(args.log_level, Some(LevelFilter::Debug));
        assert!(args.no_stats);
        assert!(!args.progress);
    }

    #[test]
    fn config_is_required() {
        assert!(create_cli().try_get_matches_from(["epi-ensemble"]).is_err());
    }

    #[test]
    fn run_writes_all_reports() {
        let temp_dir = tempdir().unwrap();
        let output = run(&args(temp_dir.path().to_path_buf())).unwrap();
        // Seven statistics, summary and failures.
        assert_eq!(output.reports.len(), 9);
        for path in &output.reports {
            assert!(path.exists(), "{} missing", path.display());
        }
        assert_eq!(output.summary.rows.len(), output.ensemble.success_count());
    }

    #[test]
    fn imported_ever_infected_never_decreases() {
        let temp_dir = tempdir().unwrap();
        let output = run(&args(temp_dir.path().to_path_buf())).unwrap();
        let (_, band) = output
            .series
            .iter()
            .find(|(statistic, _)| *statistic == Statistic::EverInfected)
            .unwrap();
        for pair in band.rows().windows(2) {
            assert!(pair[1].median >= pair[0].median - 1e-3, "drop at t={}", pair[1].time);
        }
    }

    #[test]
    fn seed_override_changes_samples() {
        let temp_dir = tempdir().unwrap();
        let mut base = args(temp_dir.path().join("a"));
        let a = run(&base).unwrap();
        base.output_dir = temp_dir.path().join("b");
        base.random_seed = Some(99);
        let b = run(&base).unwrap();
        let ra: Vec<f64> = a.ensemble.replicates().iter().map(|r| r.r0).collect();
        let rb: Vec<f64> = b.ensemble.replicates().iter().map(|r| r.r0).collect();
        assert_ne!(ra, rb);
    }

    #[test]
    fn second_run_needs_force_overwrite() {
        let temp_dir = tempdir().unwrap();
        let mut args = args(temp_dir.path().to_path_buf());
        run(&args).unwrap();
        assert!(matches!(run(&args), Err(EpiError::ConfigError(_))));
        args.force_overwrite = true;
        assert!(run(&args).is_ok());
    }

    #[test]
    fn missing_config_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let mut args = args(temp_dir.path().to_path_buf());
        args.config = PathBuf::from("tests/data/no_such_config.json");
        assert!(matches!(run(&args), Err(EpiError::IoError(_))));
    }
}
