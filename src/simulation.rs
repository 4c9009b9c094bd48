//! The simulation engine: sets a run up from its parameters and advances it tick by tick.
//!
//! Each tick runs the components in a fixed order, which also fixes the order in which random
//! numbers are drawn:
//!
//! 1. the lockdown is evaluated against the current and previous infected counts,
//! 2. agents move,
//! 3. the infection spreads,
//! 4. infected agents recover or die, and recovered agents leave isolation,
//! 5. the statistics series is extended.
//!
//! Reports and registered observers and callbacks run after that. In the `Last` phase the run
//! stops early once no infectious agent is left, if so configured.
//!
//! ```no_run
//! use ixa_contagion::{run_simulation, Parameters};
//!
//! let mut parameters = Parameters::default();
//! parameters.initial_infections = vec![0];
//! let (_context, summary) = run_simulation(parameters).unwrap();
//! println!("{summary}");
//! ```
use std::fmt::{self, Display};

use serde::Serialize;

use crate::context::{Context, ExecutionPhase};
use crate::define_data_plugin;
use crate::error::ContagionError;
use crate::execution_stats::{
    log_execution_statistics, ExecutionProfilingCollector, ExecutionStatistics,
};
use crate::infection::ContextInfectionExt;
use crate::log::{error, info, trace};
use crate::motion::ContextMotionExt;
use crate::parameters::{ContextParametersExt, Parameters};
use crate::population::{Agent, AgentId, ContextPopulationExt, HealthCounts};
use crate::progression::{mortality_strategy_from_parameters, ContextProgressionExt};
use crate::random::ContextRandomExt;
use crate::report::{ContextReportExt, StatisticsReport};
use crate::society::ContextSocietyExt;
use crate::tracker::{ContextStatisticsExt, StatisticsSeries};

type TickCallback = dyn FnMut(&mut Context);
type SnapshotObserver = dyn FnMut(u64, &[Agent], &StatisticsSeries);

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub dead: usize,
    pub recovered: usize,
    pub infected: usize,
    /// Infected plus immune-but-infectious agents.
    pub infectious: usize,
    pub unaffected: usize,
    pub stopped_early: bool,
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ticks executed:  {}", self.ticks)?;
        writeln!(f, "dead:            {}", self.dead)?;
        writeln!(f, "recovered:       {}", self.recovered)?;
        writeln!(f, "infected:        {}", self.infected)?;
        writeln!(f, "infectious:      {}", self.infectious)?;
        writeln!(f, "unaffected:      {}", self.unaffected)?;
        write!(f, "stopped early:   {}", self.stopped_early)
    }
}

#[derive(Default)]
struct SimulationData {
    initialized: bool,
    stopped_early: bool,
    failure: Option<ContagionError>,
    callbacks: Vec<Box<TickCallback>>,
    observers: Vec<Box<SnapshotObserver>>,
    collector: Option<ExecutionProfilingCollector>,
    execution_statistics: Option<ExecutionStatistics>,
}

define_data_plugin!(SimulationPlugin, SimulationData, SimulationData::default());

pub trait ContextSimulationExt {
    /// Builds the population, society and mortality model from the stored parameters, seeds
    /// the initial infections, opens the configured reports and registers the tick handlers.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or mortality curve, an unknown initial infection, or
    /// a report file that cannot be created.
    fn init_simulation(&mut self) -> Result<(), ContagionError>;

    /// Runs one tick of the model. Called by the tick handler `init_simulation` registers.
    fn step(&mut self) -> Result<HealthCounts, ContagionError>;

    /// Registers a callback invoked at the end of every tick, after the model step.
    fn add_tick_callback(&mut self, callback: impl FnMut(&mut Context) + 'static);

    /// Registers a read-only observer of the agent table and the statistics series, invoked
    /// at the end of every tick.
    fn add_snapshot_observer(
        &mut self,
        observer: impl FnMut(u64, &[Agent], &StatisticsSeries) + 'static,
    );

    fn run_summary(&self) -> RunSummary;

    /// Writes the final agent table if configured, logs the summary and execution statistics,
    /// and returns the summary. Fails with the error that aborted a tick, if any.
    fn finish_simulation(&mut self) -> Result<RunSummary, ContagionError>;

    /// Resource use of the run, available after `finish_simulation`.
    fn execution_statistics(&self) -> Option<&ExecutionStatistics>;
}

fn report_options_from_parameters(context: &mut Context, parameters: &Parameters) {
    let output = &parameters.output;
    context
        .report_options()
        .directory(output.directory.clone())
        .file_prefix(output.file_prefix.clone())
        .overwrite(output.overwrite);
}

fn run_observers(context: &mut Context) {
    let mut observers =
        std::mem::take(&mut context.get_data_container_mut(SimulationPlugin).observers);
    let tick = context.get_current_tick();
    for observer in &mut observers {
        observer(tick, context.get_agents(), context.get_statistics());
    }
    let data = context.get_data_container_mut(SimulationPlugin);
    let added = std::mem::replace(&mut data.observers, observers);
    data.observers.extend(added);
}

fn run_callbacks(context: &mut Context) {
    let mut callbacks =
        std::mem::take(&mut context.get_data_container_mut(SimulationPlugin).callbacks);
    for callback in &mut callbacks {
        callback(context);
    }
    let data = context.get_data_container_mut(SimulationPlugin);
    let added = std::mem::replace(&mut data.callbacks, callbacks);
    data.callbacks.extend(added);
}

fn stop_if_no_infections(context: &mut Context) {
    let min_ticks = context.get_parameters().min_ticks_before_early_stop;
    let tick = context.get_current_tick();
    if tick + 1 < min_ticks || context.last_infectious_count() > 0 {
        return;
    }
    info!("{tick}: no infectious agents left, stopping");
    context.get_data_container_mut(SimulationPlugin).stopped_early = true;
    context.shutdown();
    #[cfg(feature = "progress_bar")]
    crate::progress::finish_tick_progress();
}

impl ContextSimulationExt for Context {
    fn init_simulation(&mut self) -> Result<(), ContagionError> {
        if self.get_data_container_mut(SimulationPlugin).initialized {
            return Err(ContagionError::ContagionError(
                "simulation is already initialized".to_string(),
            ));
        }
        let parameters = self.get_parameters().clone();
        parameters.validate()?;
        trace!("initializing simulation with seed {}", parameters.seed);

        self.init_random(parameters.seed);
        let population = &parameters.population;
        let roam = parameters.roam_bounds();
        self.initialize_population(
            population.pop_size,
            roam.xbounds,
            roam.ybounds,
            population.speed,
            population.age.as_ref(),
        )?;
        self.initialize_destinations(1);
        self.init_society();
        self.set_mortality_strategy(mortality_strategy_from_parameters(&parameters)?);
        for &id in &parameters.initial_infections {
            self.seed_infection(AgentId(id))?;
        }

        let output = &parameters.output;
        if output.save_data || output.save_population {
            report_options_from_parameters(self, &parameters);
        }
        if output.save_data {
            self.add_report::<StatisticsReport>("statistics")?;
        }

        self.set_max_ticks(parameters.simulation_steps);
        self.add_tick_handler(|context| {
            if let Err(err) = context.step() {
                error!("tick {} failed: {err}", context.get_current_tick());
                context.get_data_container_mut(SimulationPlugin).failure = Some(err);
                context.shutdown();
            }
        });
        if parameters.end_if_no_infections {
            self.add_tick_handler_with_phase(stop_if_no_infections, ExecutionPhase::Last);
        }

        let data = self.get_data_container_mut(SimulationPlugin);
        data.initialized = true;
        data.collector = Some(ExecutionProfilingCollector::new());
        info!(
            "simulation initialized with {} agents and {} initial infections",
            population.pop_size,
            parameters.initial_infections.len()
        );
        Ok(())
    }

    fn step(&mut self) -> Result<HealthCounts, ContagionError> {
        let tick = self.get_current_tick();
        let counts = self.health_counts();
        let last_infectious = self.last_infectious_count();
        self.evaluate_lockdown(counts.infected, last_infectious, self.population_size());

        self.update_motion()?;
        self.infect()?;
        self.resolve_progression()?;
        self.release_recovered();
        let counts = self.record_statistics();

        info!(
            "{tick}: healthy: {}, infected: {}, immune: {}, in treatment: {}, dead: {}, of total: {}",
            counts.healthy,
            counts.infected,
            counts.immune,
            counts.in_treatment,
            counts.dead,
            counts.total()
        );

        let output = &self.get_parameters().output;
        let (save_data, save_population, frequency) = (
            output.save_data,
            output.save_population,
            output.save_population_frequency,
        );
        if save_data {
            self.send_report(StatisticsReport {
                tick,
                susceptible: counts.healthy,
                infectious: counts.infectious(),
                recovered: counts.immune,
                fatalities: counts.dead,
                in_treatment: counts.in_treatment,
            })?;
        }
        if save_population && tick % frequency == 0 {
            self.write_agent_table(&format!("population_{tick}"), self.get_agents())?;
        }

        if let Some(collector) = &mut self.get_data_container_mut(SimulationPlugin).collector {
            collector.refresh();
        }
        run_observers(self);
        run_callbacks(self);
        Ok(counts)
    }

    fn add_tick_callback(&mut self, callback: impl FnMut(&mut Context) + 'static) {
        self.get_data_container_mut(SimulationPlugin)
            .callbacks
            .push(Box::new(callback));
    }

    fn add_snapshot_observer(
        &mut self,
        observer: impl FnMut(u64, &[Agent], &StatisticsSeries) + 'static,
    ) {
        self.get_data_container_mut(SimulationPlugin)
            .observers
            .push(Box::new(observer));
    }

    fn run_summary(&self) -> RunSummary {
        let counts = self.health_counts();
        RunSummary {
            ticks: self.get_current_tick(),
            dead: counts.dead,
            recovered: counts.immune,
            infected: counts.infected,
            infectious: counts.infectious(),
            unaffected: counts.healthy,
            stopped_early: self
                .get_data_container(SimulationPlugin)
                .is_some_and(|data| data.stopped_early),
        }
    }

    fn finish_simulation(&mut self) -> Result<RunSummary, ContagionError> {
        if let Some(err) = self.get_data_container_mut(SimulationPlugin).failure.take() {
            return Err(err);
        }
        #[cfg(feature = "progress_bar")]
        crate::progress::finish_tick_progress();

        if self.get_parameters().output.save_data {
            self.write_agent_table("population", self.get_agents())?;
        }

        let summary = self.run_summary();
        info!("run finished after {} ticks", summary.ticks);
        for line in summary.to_string().lines() {
            info!("{line}");
        }

        let population = self.population_size();
        let data = self.get_data_container_mut(SimulationPlugin);
        if let Some(mut collector) = data.collector.take() {
            let statistics = collector.compute_final_statistics(population, summary.ticks);
            log_execution_statistics(&statistics);
            data.execution_statistics = Some(statistics);
        }
        Ok(summary)
    }

    fn execution_statistics(&self) -> Option<&ExecutionStatistics> {
        self.get_data_container(SimulationPlugin)
            .and_then(|data| data.execution_statistics.as_ref())
    }
}

/// Runs a complete simulation with `parameters` and returns the final context and summary.
///
/// # Errors
///
/// Fails on invalid parameters or when a tick fails, e.g. because a report cannot be written.
pub fn run_simulation(parameters: Parameters) -> Result<(Context, RunSummary), ContagionError> {
    let mut context = Context::new();
    context.set_parameters(parameters)?;
    context.init_simulation()?;
    context.execute();
    let summary = context.finish_simulation()?;
    Ok((context, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::HealthStatus;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::tempdir;

    fn small_run() -> Parameters {
        let mut parameters = Parameters::default();
        parameters.seed = 3;
        parameters.population.pop_size = 60;
        parameters.simulation_steps = 40;
        parameters.min_ticks_before_early_stop = 10;
        parameters.initial_infections = vec![0, 1, 2];
        parameters.virus.infection_range = 0.05;
        parameters.virus.infection_chance = 0.2;
        parameters.virus.recovery_duration = [5, 15];
        parameters.virus.mortality_chance = Some(0.1);
        parameters
    }

    #[test]
    fn initialization_seeds_infections() {
        let mut context = Context::new();
        context.set_parameters(small_run()).unwrap();
        context.init_simulation().unwrap();
        assert_eq!(context.population_size(), 60);
        let counts = context.health_counts();
        assert_eq!(counts.infected, 3);
        assert_eq!(context.get_max_ticks(), Some(40));
        assert!(context.init_simulation().is_err());
    }

    #[test]
    fn counts_stay_consistent_every_tick() {
        let mut context = Context::new();
        context.set_parameters(small_run()).unwrap();
        context.init_simulation().unwrap();
        let totals = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&totals);
        context.add_snapshot_observer(move |tick, agents, series| {
            assert_eq!(series.len() as u64, tick + 1);
            let dead_still = agents
                .iter()
                .filter(|agent| agent.status == HealthStatus::Dead)
                .all(|agent| agent.heading_x == 0.0 && agent.heading_y == 0.0);
            assert!(dead_still);
            let last = series.len() - 1;
            seen.borrow_mut().push(
                series.susceptible[last]
                    + series.infectious[last]
                    + series.recovered[last]
                    + series.fatalities[last],
            );
        });
        context.execute();
        let summary = context.finish_simulation().unwrap();
        assert!(!totals.borrow().is_empty());
        assert!(totals.borrow().iter().all(|&total| total == 60));
        assert_eq!(
            summary.dead + summary.recovered + summary.infectious + summary.unaffected,
            60
        );
        assert!(context.execution_statistics().is_some());
    }

    #[test]
    fn runs_are_deterministic() {
        let (first, first_summary) = run_simulation(small_run()).unwrap();
        let (second, second_summary) = run_simulation(small_run()).unwrap();
        assert_eq!(first_summary, second_summary);
        assert_eq!(first.get_agents(), second.get_agents());
        assert_eq!(first.get_statistics(), second.get_statistics());
    }

    #[test]
    fn stops_early_without_infections() {
        let mut parameters = small_run();
        parameters.initial_infections.clear();
        let (_, summary) = run_simulation(parameters).unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.ticks, 10);
        assert_eq!(summary.unaffected, 60);
    }

    #[test]
    fn runs_to_the_end_without_early_stop() {
        let mut parameters = small_run();
        parameters.initial_infections.clear();
        parameters.end_if_no_infections = false;
        let (_, summary) = run_simulation(parameters).unwrap();
        assert!(!summary.stopped_early);
        assert_eq!(summary.ticks, 40);
    }

    #[test]
    fn callbacks_run_after_the_step() {
        let mut context = Context::new();
        context.set_parameters(small_run()).unwrap();
        context.add_tick_callback(|context| {
            if context.get_current_tick() == 4 {
                context.seed_infection(AgentId(59)).ok();
            }
        });
        context.init_simulation().unwrap();
        let recorded = Rc::new(RefCell::new(0));
        let seen = Rc::clone(&recorded);
        context.add_tick_callback(move |context| {
            *seen.borrow_mut() = context.get_statistics().len();
        });
        context.execute();
        assert_eq!(*recorded.borrow() as u64, context.get_current_tick());
    }

    #[test]
    fn writes_reports() {
        let temp_dir = tempdir().unwrap();
        let mut parameters = small_run();
        parameters.simulation_steps = 12;
        parameters.end_if_no_infections = false;
        parameters.output.directory = temp_dir.path().to_path_buf();
        parameters.output.file_prefix = "run_".to_string();
        parameters.output.save_data = true;
        parameters.output.save_population = true;
        parameters.output.save_population_frequency = 5;
        run_simulation(parameters.clone()).unwrap();

        let mut reader =
            csv::Reader::from_path(temp_dir.path().join("run_statistics.csv")).unwrap();
        let rows: Vec<StatisticsReport> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].tick, 0);
        assert!(rows
            .iter()
            .all(|row| row.susceptible + row.infectious + row.recovered + row.fatalities == 60));
        for tick in [0, 5, 10] {
            assert!(temp_dir
                .path()
                .join(format!("run_population_{tick}.csv"))
                .exists());
        }
        assert!(!temp_dir.path().join("run_population_6.csv").exists());
        assert!(temp_dir.path().join("run_population.csv").exists());

        // A second run into the same files is refused unless overwriting.
        assert!(matches!(
            run_simulation(parameters.clone()),
            Err(ContagionError::ReportError(_))
        ));
        parameters.output.overwrite = true;
        assert!(run_simulation(parameters).is_ok());
    }

    #[test]
    fn stop_request_still_finishes_the_run() {
        let temp_dir = tempdir().unwrap();
        let mut parameters = small_run();
        parameters.end_if_no_infections = false;
        parameters.output.directory = temp_dir.path().to_path_buf();
        parameters.output.save_data = true;
        let mut context = Context::new();
        context.set_parameters(parameters).unwrap();
        context.init_simulation().unwrap();
        let stop = context.stop_handle();
        context.add_tick_callback(move |context| {
            if context.get_current_tick() == 4 {
                stop.request_stop();
            }
        });
        context.execute();

        let summary = context.finish_simulation().unwrap();
        assert_eq!(summary.ticks, 5);
        assert!(!summary.stopped_early);
        assert_eq!(
            summary.dead + summary.recovered + summary.infectious + summary.unaffected,
            60
        );
        let mut reader = csv::Reader::from_path(temp_dir.path().join("population.csv")).unwrap();
        assert_eq!(reader.records().count(), 60);
        let mut reader = csv::Reader::from_path(temp_dir.path().join("statistics.csv")).unwrap();
        assert_eq!(reader.records().count(), 5);
    }

    #[test]
    fn rejects_invalid_mortality_curve_at_setup() {
        let mut parameters = small_run();
        parameters.virus.mortality_chance = Some(0.0);
        parameters.population.age = Some(crate::parameters::AgeParameters::default());
        assert!(matches!(
            run_simulation(parameters),
            Err(ContagionError::InvalidMortalityCurve(_))
        ));
    }

    #[test]
    fn summary_display_lists_counts() {
        let summary = RunSummary {
            ticks: 7,
            dead: 1,
            recovered: 2,
            infected: 3,
            infectious: 3,
            unaffected: 4,
            stopped_early: true,
        };
        let text = summary.to_string();
        assert!(text.starts_with("ticks executed:  7"));
        assert!(text.contains("unaffected:      4"));
        assert!(text.ends_with("stopped early:   true"));
    }
}
