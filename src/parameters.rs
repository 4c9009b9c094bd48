//! The configuration bundle of a run.
//!
//! `Parameters` is read from a JSON file (or built in code), validated once, and stored in the
//! `Context`. Every field has a default, so a configuration file only names what it changes:
//!
//! ```json
//! {
//!     "seed": 12,
//!     "population": { "pop_size": 1000 },
//!     "society": { "lockdown": { "percentage": 0.1, "compliance": 0.95 } }
//! }
//! ```
//!
//! Invalid values are rejected here with `ContagionError::InvalidConfiguration`, before the first
//! tick runs.
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::define_data_plugin;
use crate::error::ContagionError;
use crate::log::trace;

/// Spatial extent of the world the population moves in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldParameters {
    pub xbounds: [f64; 2],
    pub ybounds: [f64; 2],
}

impl Default for WorldParameters {
    fn default() -> Self {
        WorldParameters {
            xbounds: [0.02, 0.498],
            ybounds: [0.02, 0.498],
        }
    }
}

/// How mortality grows between `risk_age` and `critical_age`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCurve {
    Linear,
    Quadratic,
}

/// Age stratification of the population. Without it every agent has age 0 and mortality is flat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgeParameters {
    pub mean_age: f64,
    pub max_age: u32,
    pub risk_age: u32,
    pub critical_age: u32,
    pub critical_mortality_chance: f64,
    pub risk_increase: RiskCurve,
}

impl Default for AgeParameters {
    fn default() -> Self {
        AgeParameters {
            mean_age: 45.0,
            max_age: 105,
            risk_age: 55,
            critical_age: 75,
            critical_mortality_chance: 0.2,
            risk_increase: RiskCurve::Quadratic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PopulationParameters {
    pub pop_size: usize,
    /// Mean free-roam speed.
    pub speed: f64,
    /// Scales the wander box of arrived agents.
    pub wander_factor: f64,
    pub age: Option<AgeParameters>,
}

impl Default for PopulationParameters {
    fn default() -> Self {
        PopulationParameters {
            pop_size: 500,
            speed: 0.015,
            wander_factor: 1.0,
            age: None,
        }
    }
}

/// Constants of the motion model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionParameters {
    /// Per-tick chance a free-roaming agent draws a new heading.
    pub heading_update_chance: f64,
    /// Per-tick chance a free-roaming agent draws a new speed.
    pub speed_update_chance: f64,
    /// Speed of an agent on its way to a destination.
    pub travel_speed: f64,
    /// Mean speed of an agent wandering inside its destination box.
    pub idle_speed: f64,
    /// Agents are spawned this far inside the world bounds.
    pub spawn_margin: f64,
    /// Free-roaming agents are reflected this far inside the world bounds.
    pub boundary_margin: f64,
    pub min_speed: f64,
    pub max_speed: f64,
}

impl Default for MotionParameters {
    fn default() -> Self {
        MotionParameters {
            heading_update_chance: 0.02,
            speed_update_chance: 0.02,
            travel_speed: 0.02,
            idle_speed: 0.005,
            spawn_margin: 0.05,
            boundary_margin: 0.02,
            min_speed: 0.0001,
            max_speed: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VirusParameters {
    /// Half-width of the square around an agent inside which transmission can happen.
    pub infection_range: f64,
    pub infection_chance: f64,
    /// Ticks after infection between which agents leave the infected state.
    pub recovery_duration: [u64; 2],
    /// Base chance of death on leaving the infected state. `None` is a non-lethal virus.
    pub mortality_chance: Option<f64>,
}

impl Default for VirusParameters {
    fn default() -> Self {
        VirusParameters {
            infection_range: 0.01,
            infection_chance: 0.03,
            recovery_duration: [100, 200],
            mortality_chance: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockdownParameters {
    /// Fraction of the population infected at which the lockdown starts.
    pub percentage: f64,
    /// Chance that an individual agent complies with the lockdown.
    pub compliance: f64,
}

impl Default for LockdownParameters {
    fn default() -> Self {
        LockdownParameters {
            percentage: 0.1,
            compliance: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelfIsolationParameters {
    /// Chance that a newly infected, treated agent goes into isolation.
    pub proportion: f64,
    /// Isolation zone as `[xmin, ymin, xmax, ymax]`.
    pub bounds: [f64; 4],
    /// World of the free-roaming agents while isolation is in place, kept clear of the zone.
    pub roam_xbounds: [f64; 2],
    pub roam_ybounds: [f64; 2],
}

impl Default for SelfIsolationParameters {
    fn default() -> Self {
        SelfIsolationParameters {
            proportion: 0.6,
            bounds: [0.02, 0.02, 0.1, 0.98],
            roam_xbounds: [0.12, 0.498],
            roam_ybounds: [0.02, 0.498],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocietyParameters {
    /// Whether agents on their way to a destination transmit.
    pub traveling_infects: bool,
    pub lockdown: Option<LockdownParameters>,
    pub self_isolation: Option<SelfIsolationParameters>,
    pub healthcare_capacity: usize,
    /// Mortality multiplier for agents in treatment.
    pub treatment_factor: f64,
    /// Mortality multiplier for agents that found no treatment slot.
    pub no_treatment_factor: f64,
    pub treatment_dependent_risk: bool,
}

impl Default for SocietyParameters {
    fn default() -> Self {
        SocietyParameters {
            traveling_infects: false,
            lockdown: None,
            self_isolation: None,
            healthcare_capacity: 175,
            treatment_factor: 0.5,
            no_treatment_factor: 6.0,
            treatment_dependent_risk: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputParameters {
    pub directory: PathBuf,
    pub file_prefix: String,
    pub overwrite: bool,
    /// Write the statistics series every tick and the final population table.
    pub save_data: bool,
    /// Write the population table every `save_population_frequency` ticks.
    pub save_population: bool,
    pub save_population_frequency: u64,
}

impl Default for OutputParameters {
    fn default() -> Self {
        OutputParameters {
            directory: PathBuf::from("output"),
            file_prefix: String::new(),
            overwrite: false,
            save_data: false,
            save_population: false,
            save_population_frequency: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    pub seed: u64,
    pub simulation_steps: u64,
    /// Log the ids of agents changing state every tick at `info` instead of `trace`.
    pub verbose: bool,
    pub end_if_no_infections: bool,
    pub min_ticks_before_early_stop: u64,
    /// Agents infected before the first tick.
    pub initial_infections: Vec<usize>,
    pub world: WorldParameters,
    pub population: PopulationParameters,
    pub motion: MotionParameters,
    pub virus: VirusParameters,
    pub society: SocietyParameters,
    pub output: OutputParameters,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            seed: 0,
            simulation_steps: 10000,
            verbose: false,
            end_if_no_infections: true,
            min_ticks_before_early_stop: 500,
            initial_infections: Vec::new(),
            world: WorldParameters::default(),
            population: PopulationParameters::default(),
            motion: MotionParameters::default(),
            virus: VirusParameters::default(),
            society: SocietyParameters::default(),
            output: OutputParameters::default(),
        }
    }
}

fn invalid(msg: String) -> ContagionError {
    ContagionError::InvalidConfiguration(msg)
}

fn check_probability(name: &str, value: f64) -> Result<(), ContagionError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be in [0, 1], got {value}")))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), ContagionError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must not be negative, got {value}")))
    }
}

fn check_bounds(name: &str, bounds: [f64; 2], margin: f64) -> Result<(), ContagionError> {
    let [lo, hi] = bounds;
    if lo.is_nan() || hi.is_nan() || lo >= hi {
        return Err(invalid(format!("{name} are degenerate: [{lo}, {hi}]")));
    }
    if lo + margin >= hi - margin {
        return Err(invalid(format!(
            "{name} [{lo}, {hi}] leave no room inside a margin of {margin}"
        )));
    }
    Ok(())
}

impl Parameters {
    /// Bounds free-roaming agents spawn and move in: the world, or the roam bounds of the
    /// self-isolation setup when isolation is configured.
    #[must_use]
    pub fn roam_bounds(&self) -> WorldParameters {
        match &self.society.self_isolation {
            Some(isolation) => WorldParameters {
                xbounds: isolation.roam_xbounds,
                ybounds: isolation.roam_ybounds,
            },
            None => self.world,
        }
    }

    /// Checks every value for range and consistency.
    pub fn validate(&self) -> Result<(), ContagionError> {
        let population = &self.population;
        if population.pop_size == 0 {
            return Err(invalid("pop_size must be positive".to_string()));
        }
        for &id in &self.initial_infections {
            if id >= population.pop_size {
                return Err(invalid(format!(
                    "initial infection {id} is not an agent of a population of {}",
                    population.pop_size
                )));
            }
        }

        let motion = &self.motion;
        for (name, value) in [
            ("spawn_margin", motion.spawn_margin),
            ("boundary_margin", motion.boundary_margin),
        ] {
            check_non_negative(name, value)?;
        }
        let roam = self.roam_bounds();
        for margin in [motion.spawn_margin, motion.boundary_margin] {
            check_bounds("xbounds", self.world.xbounds, margin)?;
            check_bounds("ybounds", self.world.ybounds, margin)?;
            check_bounds("roam_xbounds", roam.xbounds, margin)?;
            check_bounds("roam_ybounds", roam.ybounds, margin)?;
        }

        for (name, value) in [
            ("speed", population.speed),
            ("wander_factor", population.wander_factor),
            ("travel_speed", motion.travel_speed),
            ("idle_speed", motion.idle_speed),
            ("min_speed", motion.min_speed),
            ("infection_range", self.virus.infection_range),
            ("treatment_factor", self.society.treatment_factor),
            ("no_treatment_factor", self.society.no_treatment_factor),
        ] {
            check_non_negative(name, value)?;
        }
        if motion.min_speed > motion.max_speed {
            return Err(invalid(format!(
                "min_speed {} exceeds max_speed {}",
                motion.min_speed, motion.max_speed
            )));
        }
        check_probability("heading_update_chance", motion.heading_update_chance)?;
        check_probability("speed_update_chance", motion.speed_update_chance)?;

        let virus = &self.virus;
        check_probability("infection_chance", virus.infection_chance)?;
        let [lower, upper] = virus.recovery_duration;
        if lower >= upper {
            return Err(invalid(format!(
                "recovery_duration [{lower}, {upper}] must have a lower bound below its upper bound"
            )));
        }
        if let Some(chance) = virus.mortality_chance {
            check_probability("mortality_chance", chance)?;
        }

        if let Some(age) = &population.age {
            if !(0.0..=f64::from(age.max_age)).contains(&age.mean_age) {
                return Err(invalid(format!(
                    "mean_age {} must be in [0, max_age {}]",
                    age.mean_age, age.max_age
                )));
            }
            if age.risk_age >= age.critical_age {
                return Err(invalid(format!(
                    "risk_age {} must be below critical_age {}",
                    age.risk_age, age.critical_age
                )));
            }
            check_probability("critical_mortality_chance", age.critical_mortality_chance)?;
        }

        if let Some(lockdown) = &self.society.lockdown {
            check_probability("lockdown percentage", lockdown.percentage)?;
            check_probability("lockdown compliance", lockdown.compliance)?;
        }
        if let Some(isolation) = &self.society.self_isolation {
            check_probability("self_isolation proportion", isolation.proportion)?;
            let [xmin, ymin, xmax, ymax] = isolation.bounds;
            if !(xmin < xmax && ymin < ymax) {
                return Err(invalid(format!(
                    "self_isolation bounds {:?} are degenerate",
                    isolation.bounds
                )));
            }
        }

        if self.output.save_population && self.output.save_population_frequency == 0 {
            return Err(invalid(
                "save_population_frequency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Reads parameters from a JSON file. The result is not validated.
    pub fn from_json_file(file_path: &Path) -> Result<Parameters, ContagionError> {
        trace!("reading parameters from {}", file_path.display());
        let file = File::open(file_path)?;
        let reader = BufReader::new(file);
        let parameters = serde_json::from_reader(reader)?;
        Ok(parameters)
    }
}

static DEFAULT_PARAMETERS: LazyLock<Parameters> = LazyLock::new(Parameters::default);

define_data_plugin!(ParametersPlugin, Option<Parameters>, None);

pub trait ContextParametersExt {
    /// Loads, validates and stores parameters from a JSON file.
    fn load_parameters_from_json(&mut self, file_path: &Path) -> Result<(), ContagionError>;

    /// Validates and stores `parameters`, replacing any set before.
    fn set_parameters(&mut self, parameters: Parameters) -> Result<(), ContagionError>;

    /// The parameters of the run, or the defaults if none were set.
    fn get_parameters(&self) -> &Parameters;
}

impl ContextParametersExt for Context {
    fn load_parameters_from_json(&mut self, file_path: &Path) -> Result<(), ContagionError> {
        let parameters = Parameters::from_json_file(file_path)?;
        self.set_parameters(parameters)
    }

    fn set_parameters(&mut self, parameters: Parameters) -> Result<(), ContagionError> {
        parameters.validate()?;
        *self.get_data_container_mut(ParametersPlugin) = Some(parameters);
        Ok(())
    }

    fn get_parameters(&self) -> &Parameters {
        self.get_data_container(ParametersPlugin)
            .and_then(Option::as_ref)
            .unwrap_or(&DEFAULT_PARAMETERS)
    }
}
