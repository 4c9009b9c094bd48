//! Diagnostic logging for a simulation run. This is separate from _reporting_: the statistics
//! and population CSV files written by `crate::report` are the model's output, while log
//! messages describe what the run is doing.
//!
//! The five logging macros `error!`, `warn!`, `info!`, `debug!` and `trace!` are re-exported
//! from the `log` crate. Every tick the simulation emits one `info!` line with the population
//! counts; per-agent detail (who got infected, who recovered) is emitted at `info!` in verbose
//! mode and at `trace!` otherwise.
//!
//! Logging is _disabled_ by default. The runner enables it from `--log-level <level>` or
//! `--log-level module=level,...`, and `-v` raises the level to `info`. It can also be driven
//! from code:
//!
//! ```rust
//! use ixa_contagion::log::{set_log_level, set_module_filter, LevelFilter};
//!
//! // Per-tick count lines, but no agent-level detail from the infection step.
//! set_log_level(LevelFilter::Info);
//! set_module_filter("ixa_contagion::infection", LevelFilter::Warn);
//! ```
#[cfg(feature = "logging")]
mod standard_logger;

#[cfg(not(feature = "logging"))]
mod null_logger;

#[cfg(all(feature = "logging", feature = "progress_bar"))]
mod progress_bar_encoder;

pub use log::{debug, error, info, trace, warn, LevelFilter};
use std::collections::hash_map::Entry;
use std::str::FromStr;

use crate::error::ContagionError;
use crate::population::AgentId;
use crate::HashMap;
#[cfg(feature = "logging")]
use log4rs::Handle;
use std::sync::LazyLock;
use std::sync::{Mutex, MutexGuard};

// Logging disabled
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Off;
// `sysinfo` reports refresh failures at debug level on some platforms.
const DEFAULT_MODULE_FILTERS: [(&str, LevelFilter); 1] = [("sysinfo", LevelFilter::Warn)];

/// A global instance of the logging configuration.
static LOG_CONFIGURATION: LazyLock<Mutex<LogConfiguration>> = LazyLock::new(Mutex::default);

/// Level filter applied to log messages whose target starts with `module`
/// (e.g. `"ixa_contagion::motion"`).
#[derive(Debug, PartialEq)]
struct ModuleLogConfiguration {
    module: String,
    level: LevelFilter,
}

impl From<(&str, LevelFilter)> for ModuleLogConfiguration {
    fn from((module, level): (&str, LevelFilter)) -> Self {
        Self {
            module: module.to_string(),
            level,
        }
    }
}

/// Holds logging configuration: the filter levels of modules and a handle to the global
/// logger.
///
/// Because loggers are globally installed, only one instance of this struct exists. The
/// public API are free functions which fetch the singleton and call the appropriate member
/// function.
#[derive(Debug)]
pub(in crate::log) struct LogConfiguration {
    /// The level filter for targets without an explicitly set filter. `LevelFilter::Off`
    /// disables logging.
    pub(in crate::log) global_log_level: LevelFilter,
    pub(in crate::log) module_configurations: HashMap<String, ModuleLogConfiguration>,

    #[cfg(feature = "logging")]
    root_handle: Option<Handle>,
}

impl Default for LogConfiguration {
    fn default() -> Self {
        let module_configurations = DEFAULT_MODULE_FILTERS
            .map(|(module, level)| (module.to_string(), (module, level).into()));
        let module_configurations = HashMap::from_iter(module_configurations);
        Self {
            global_log_level: DEFAULT_LOG_LEVEL,
            module_configurations,

            #[cfg(feature = "logging")]
            root_handle: None,
        }
    }
}

impl LogConfiguration {
    pub(in crate::log) fn set_log_level(&mut self, level: LevelFilter) {
        self.global_log_level = level;
        self.set_config();
    }

    /// Returns true if the configuration was mutated, false otherwise.
    fn insert_module_filter(&mut self, module: &str, level: LevelFilter) -> bool {
        match self.module_configurations.entry(module.to_string()) {
            Entry::Occupied(mut entry) => {
                let module_config = entry.get_mut();
                if module_config.level == level {
                    return false;
                }
                module_config.level = level;
            }
            Entry::Vacant(entry) => {
                entry.insert((module, level).into());
            }
        }
        true
    }

    pub(in crate::log) fn set_module_filters(&mut self, module_filters: &[(&str, LevelFilter)]) {
        let mut mutated = false;
        for (module, level) in module_filters {
            mutated |= self.insert_module_filter(module, *level);
        }
        if mutated {
            self.set_config();
        }
    }

    pub(in crate::log) fn remove_module_filter(&mut self, module: &str) {
        if self.module_configurations.remove(module).is_some() {
            self.set_config();
        }
    }
}

/// A parsed `--log-level` argument: an optional global level plus per-module levels.
#[derive(Debug, Default, PartialEq)]
pub struct LogSpec {
    pub global: Option<LevelFilter>,
    pub modules: Vec<(String, LevelFilter)>,
}

impl FromStr for LogSpec {
    type Err = ContagionError;

    /// Accepts `"info"`, `"ixa_contagion::motion=trace"` or a comma separated mix of both.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut spec = LogSpec::default();
        for part in s.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let parse_level = |level: &str| {
                LevelFilter::from_str(level).map_err(|_| {
                    ContagionError::InvalidConfiguration(format!("unknown log level '{level}'"))
                })
            };
            match part.split_once('=') {
                Some((module, level)) => {
                    spec.modules
                        .push((module.trim().to_string(), parse_level(level.trim())?));
                }
                None => spec.global = Some(parse_level(part)?),
            }
        }
        Ok(spec)
    }
}

impl LogSpec {
    /// Installs this specification in the global logger.
    pub fn apply(&self) {
        if let Some(level) = self.global {
            set_log_level(level);
        }
        let filters: Vec<(&str, LevelFilter)> = self
            .modules
            .iter()
            .map(|(module, level)| (module.as_str(), *level))
            .collect();
        set_module_filters(&filters);
    }
}

/// Logs the agents that went through `event` this tick under `target`: at `info` when
/// `verbose` is set, otherwise at `trace`.
pub(crate) fn log_agent_events(
    target: &str,
    verbose: bool,
    tick: u64,
    event: &str,
    agents: &[AgentId],
) {
    if agents.is_empty() {
        return;
    }
    let ids: Vec<usize> = agents.iter().map(|agent| agent.0).collect();
    if verbose {
        info!(target: target, "at tick {tick} these agents {event}: {ids:?}");
    } else {
        trace!(target: target, "at tick {tick} these agents {event}: {ids:?}");
    }
}

// The public API

/// Enables all log messages. Equivalent to `set_log_level(LevelFilter::Trace)`.
pub fn enable_logging() {
    set_log_level(LevelFilter::Trace);
}

/// Disables logging completely. Equivalent to `set_log_level(LevelFilter::Off)`.
pub fn disable_logging() {
    set_log_level(LevelFilter::Off);
}

/// Sets the global log level. A global filter level of `LevelFilter::Off` disables logging.
pub fn set_log_level(level: LevelFilter) {
    get_log_configuration().set_log_level(level);
}

/// Sets a level filter for the given module path.
pub fn set_module_filter(module_path: &str, level_filter: LevelFilter) {
    set_module_filters(&[(module_path, level_filter)]);
}

/// Removes a module-specific level filter; the global level filter then applies to the module.
pub fn remove_module_filter(module_path: &str) {
    get_log_configuration().remove_module_filter(module_path);
}

/// Sets the level filters for a set of modules in bulk.
pub fn set_module_filters(module_filters: &[(&str, LevelFilter)]) {
    get_log_configuration().set_module_filters(module_filters);
}

fn get_log_configuration() -> MutexGuard<'static, LogConfiguration> {
    LOG_CONFIGURATION.lock().expect("Mutex poisoned")
}
