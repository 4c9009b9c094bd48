// Loss of precision is allowable in this module's use cases.
#![allow(clippy::cast_precision_loss)]

use std::time::{Duration, Instant};

use bytesize::ByteSize;
use humantime::format_duration;
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::log::{debug, error, info};

/// How frequently we update the max memory used value.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Resource use of a finished run. Per-agent and per-tick figures are zero when the population
/// or the tick count is zero.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatistics {
    pub max_memory_usage: u64,
    pub cpu_time: Duration,
    pub wall_time: Duration,

    pub population: usize,
    pub ticks: u64,
    pub memory_per_agent: u64,
    pub wall_time_per_tick: Duration,
}

pub(crate) struct ExecutionProfilingCollector {
    /// Simulation start time, used to compute elapsed wall time for the simulation execution
    start_time: Instant,
    /// We keep track of the last time we refreshed so that the tick loop can call
    /// `refresh` every tick.
    last_refresh: Instant,
    /// CPU-milliseconds the process had accumulated at simulation start
    start_cpu_time: u64,
    /// Largest resident memory of the process seen so far
    max_memory_usage: u64,
    system: System,
    /// Current process, `None` on unsupported platforms
    process_id: Option<Pid>,
}

impl ExecutionProfilingCollector {
    pub fn new() -> ExecutionProfilingCollector {
        let process_id = sysinfo::get_current_pid().ok();
        let now = Instant::now();

        let mut collector = ExecutionProfilingCollector {
            start_time: now,
            last_refresh: now,
            start_cpu_time: 0,
            max_memory_usage: 0,
            system: System::new(),
            process_id,
        };
        if let Some(process_id) = process_id {
            debug!("Process ID: {}", process_id);
            collector.update_system_info(ProcessRefreshKind::nothing().with_cpu().with_memory());
            if let Some(process) = collector.system.process(process_id) {
                collector.max_memory_usage = process.memory();
                collector.start_cpu_time = process.accumulated_cpu_time();
            }
        }

        collector
    }

    /// Polls memory use if at least `REFRESH_INTERVAL` has passed since the previous poll.
    #[inline]
    pub fn refresh(&mut self) {
        if self.last_refresh.elapsed() >= REFRESH_INTERVAL {
            self.poll_memory();
            self.last_refresh = Instant::now();
        }
    }

    fn poll_memory(&mut self) {
        self.update_system_info(ProcessRefreshKind::nothing().with_memory());
        if let Some(process) = self.process_id.and_then(|pid| self.system.process(pid)) {
            self.max_memory_usage = self.max_memory_usage.max(process.memory());
        }
    }

    #[inline]
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

    pub fn compute_final_statistics(
        &mut self,
        population: usize,
        ticks: u64,
    ) -> ExecutionStatistics {
        let mut cpu_time_millis = 0;

        self.update_system_info(ProcessRefreshKind::nothing().with_cpu().with_memory());
        if let Some(process) = self.process_id.and_then(|pid| self.system.process(pid)) {
            self.max_memory_usage = self.max_memory_usage.max(process.memory());
            cpu_time_millis = process
                .accumulated_cpu_time()
                .saturating_sub(self.start_cpu_time);
        }

        let cpu_time = Duration::from_millis(cpu_time_millis);
        let wall_time = self.start_time.elapsed();

        let memory_per_agent = if population > 0 {
            self.max_memory_usage / population as u64
        } else {
            0
        };
        let wall_time_per_tick = if ticks > 0 {
            Duration::from_secs_f64(wall_time.as_secs_f64() / ticks as f64)
        } else {
            Duration::ZERO
        };

        ExecutionStatistics {
            max_memory_usage: self.max_memory_usage,
            cpu_time,
            wall_time,
            population,
            ticks,
            memory_per_agent,
            wall_time_per_tick,
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
    println!("{:<25}{}", "Ticks:", summary.ticks);
    if summary.ticks > 0 {
        println!(
            "{:<25}{}",
            "Wall time per tick:",
            format_duration(summary.wall_time_per_tick)
        );
    }
    if summary.population > 0 && summary.max_memory_usage > 0 {
        println!(
            "{:<25}{}",
            "Memory per agent:",
            ByteSize::b(summary.memory_per_agent)
        );
    }
}

/// Logs execution statistics with the logging system.
pub fn log_execution_statistics(stats: &ExecutionStatistics) {
    info!("Execution complete.");
    if stats.max_memory_usage == 0 {
        info!("Memory and CPU statistics are not available on your platform.");
    } else {
        info!("Max memory usage: {}", ByteSize::b(stats.max_memory_usage));
        info!("CPU time: {}", format_duration(stats.cpu_time));
    }
    info!("Wall time: {}", format_duration(stats.wall_time));
    if stats.ticks > 0 {
        info!(
            "Wall time per tick: {} over {} ticks",
            format_duration(stats.wall_time_per_tick),
            stats.ticks
        );
    }
    if stats.population > 0 && stats.max_memory_usage > 0 {
        info!("Memory per agent: {}", ByteSize::b(stats.memory_per_agent));
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_refresh_respects_interval() {
        let mut collector = ExecutionProfilingCollector::new();
        let before = collector.max_memory_usage;

        // Call refresh immediately — it should not poll
        collector.refresh();
        assert_eq!(before, collector.max_memory_usage);

        thread::sleep(Duration::from_millis(1100));
        collector.refresh();
        assert!(collector.max_memory_usage >= before);
    }

    #[test]
    fn test_compute_final_statistics_structure() {
        let mut collector = ExecutionProfilingCollector::new();

        thread::sleep(Duration::from_millis(100));
        let stats = collector.compute_final_statistics(10, 4);

        assert!(stats.wall_time >= Duration::from_millis(100));
        assert!(stats.wall_time_per_tick >= Duration::from_millis(25));
        assert_eq!(stats.population, 10);
        assert_eq!(stats.ticks, 4);
    }

    #[test]
    fn test_zero_population_results() {
        let mut collector = ExecutionProfilingCollector::new();

        let stats = collector.compute_final_statistics(0, 0);

        assert_eq!(stats.population, 0);
        assert_eq!(stats.wall_time_per_tick, Duration::ZERO);
        assert_eq!(stats.memory_per_agent, 0);
    }
}
