// Loss of precision is allowable in this module's use cases.
#![allow(clippy::cast_precision_loss)]

use std::time::{Duration, Instant};

use bytesize::ByteSize;
use humantime::format_duration;
use log::{debug, error, info};
use serde_derive::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resource use of one run. The per replicate figures are zero when no replicate was attempted.
#[derive(Debug, Serialize)]
pub struct ExecutionStatistics {
    pub max_memory_usage: u64,
    pub cpu_time: Duration,
    pub wall_time: Duration,

    pub replicates: usize,
    pub cpu_time_per_replicate: Duration,
    pub wall_time_per_replicate: Duration,
}

/// Measures the wall time, CPU time and peak memory of the current process from the moment it
/// is created.
pub struct ExecutionProfilingCollector {
    start_time: Instant,
    /// Accumulated CPU time of the process in CPU-milliseconds at creation.
    start_cpu_time: u64,
    /// Largest resident memory seen so far, as reported by `sysinfo`.
    max_memory_usage: u64,
    system: System,
    /// `None` on platforms where `sysinfo` cannot see the process.
    process_id: Option<Pid>,
}

impl Default for ExecutionProfilingCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionProfilingCollector {
    #[must_use]
    pub fn new() -> ExecutionProfilingCollector {
        let process_id = sysinfo::get_current_pid().ok();
        let mut collector = ExecutionProfilingCollector {
            start_time: Instant::now(),
            start_cpu_time: 0,
            max_memory_usage: 0,
            system: System::new(),
            process_id,
        };
        if let Some(pid) = process_id {
            debug!("Process ID: {pid}");
            collector.update_system_info(ProcessRefreshKind::nothing().with_cpu().with_memory());
            if let Some(process) = collector.system.process(pid) {
                collector.max_memory_usage = process.memory();
                collector.start_cpu_time = process.accumulated_cpu_time();
            }
        }
        collector
    }

    /// Polls memory use and keeps the maximum. Replicates run on the worker pool, so the
    /// runner calls this between phases rather than inside the integration loop.
    pub fn poll_memory(&mut self) {
        if let Some(pid) = self.process_id {
            self.update_system_info(ProcessRefreshKind::nothing().with_memory());
            if let Some(process) = self.system.process(pid) {
                self.max_memory_usage = self.max_memory_usage.max(process.memory());
            }
        }
    }

    fn update_system_info(&mut self, process_refresh_kind: ProcessRefreshKind) {
        if let Some(pid) = self.process_id {
            if self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                process_refresh_kind,
            ) < 1
            {
                error!("could not refresh process statistics");
            }
        }
    }

    pub fn compute_final_statistics(&mut self, replicates: usize) -> ExecutionStatistics {
        let mut cpu_time_millis = 0;
        if let Some(pid) = self.process_id {
            self.update_system_info(ProcessRefreshKind::nothing().with_cpu().with_memory());
            if let Some(process) = self.system.process(pid) {
                self.max_memory_usage = self.max_memory_usage.max(process.memory());
                cpu_time_millis = process
                    .accumulated_cpu_time()
                    .saturating_sub(self.start_cpu_time);
            }
        }

        let cpu_time = Duration::from_millis(cpu_time_millis);
        let wall_time = self.start_time.elapsed();
        let (cpu_time_per_replicate, wall_time_per_replicate) = if replicates > 0 {
            (
                Duration::from_secs_f64(cpu_time_millis as f64 / replicates as f64 / 1000.0),
                Duration::from_secs_f64(wall_time.as_secs_f64() / replicates as f64),
            )
        } else {
            (Duration::ZERO, Duration::ZERO)
        };

        ExecutionStatistics {
            max_memory_usage: self.max_memory_usage,
            cpu_time,
            wall_time,
            replicates,
            cpu_time_per_replicate,
            wall_time_per_replicate,
        }
    }
}

/// Prints execution statistics to the console.
pub fn print_execution_statistics(summary: &ExecutionStatistics) {
    println!("━━━━ Execution Summary ━━━━");
    if summary.max_memory_usage == 0 {
        println!("Memory and CPU statistics are not available on your platform.");
    } else {
        println!(
            "{:<25}{}",
            "Max memory usage:",
            ByteSize::b(summary.max_memory_usage)
        );
        println!("{:<25}{}", "CPU time:", format_duration(summary.cpu_time));
    }
    println!("{:<25}{}", "Wall time:", format_duration(summary.wall_time));

    if summary.replicates > 0 {
        println!("{:<25}{}", "Replicates:", summary.replicates);
        if summary.max_memory_usage > 0 {
            println!(
                "{:<25}{}",
                "CPU time per replicate:",
                format_duration(summary.cpu_time_per_replicate)
            );
        }
        println!(
            "{:<25}{}",
            "Wall time per replicate:",
            format_duration(summary.wall_time_per_replicate)
        );
    }
}

/// Logs execution statistics at `info`.
pub fn log_execution_statistics(stats: &ExecutionStatistics) {
    info!("Execution complete.");
    if stats.max_memory_usage == 0 {
        info!("Memory and CPU statistics are not available on your platform.");
    } else {
        info!("Max memory usage: {}", ByteSize::b(stats.max_memory_usage));
        info!("CPU time: {}", format_duration(stats.cpu_time));
    }
    info!("Wall time: {}", format_duration(stats.wall_time));
    if stats.replicates > 0 {
        info!(
            "Wall time per replicate: {}",
            format_duration(stats.wall_time_per_replicate)
        );
    }
}
