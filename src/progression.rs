//! The progression model: infected agents either recover or die.
//!
//! Every tick, an infected agent's recovery progress is how far its illness duration has come
//! through the virus's recovery window. Once progress reaches the agent's own recovery
//! threshold the agent leaves the infected state: a draw against its mortality chance decides
//! between death and immunity.
//!
//! The mortality chance comes from a [`MortalityStrategy`], flat for an unstratified
//! population and an age curve otherwise, and is then scaled by the healthcare factor of the
//! agent's treatment.
use std::fmt::Debug;

use crate::context::Context;
use crate::define_data_plugin;
use crate::error::ContagionError;
use crate::log::{debug, log_agent_events, trace};
use crate::parameters::{AgeParameters, ContextParametersExt, Parameters, RiskCurve};
use crate::population::{population_mut, Agent, AgentId, ContextPopulationExt, HealthStatus};
use crate::random::{ContextRandomExt, SimulationRng};
use crate::society::ContextSocietyExt;

/// Exponent of the power curve used for quadratic risk increase.
const RISK_CURVE_EXPONENT: i32 = 15;

/// Fraction of the recovery window an illness of `illness_duration` ticks has covered.
/// Never negative; exceeds `1` past the end of the window.
pub fn recovery_progress(illness_duration: u64, recovery_duration: [u64; 2]) -> f64 {
    let [lower, upper] = recovery_duration;
    #[allow(clippy::cast_precision_loss)]
    let progress = (illness_duration as f64 - lower as f64) / (upper as f64 - lower as f64);
    progress.max(0.0)
}

/// The mortality chance scaled by a treatment factor. The result is not clamped and can
/// exceed `1` with a large no-treatment factor; the final draw clamps it.
pub fn adjusted_mortality_chance(mortality_chance: f64, treatment_factor: f64) -> f64 {
    mortality_chance * treatment_factor
}

/// Maps an agent leaving the infected state to its chance of dying.
pub trait MortalityStrategy: Debug {
    fn mortality_chance(&self, agent: &Agent) -> f64;
}

/// The same chance for every agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatMortality {
    pub chance: f64,
}

impl MortalityStrategy for FlatMortality {
    fn mortality_chance(&self, _agent: &Agent) -> f64 {
        self.chance
    }
}

/// `b * (age + a)^15`, through `(risk_age, base)` and `(critical_age, critical)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PowerCurve {
    a: f64,
    b: f64,
}

impl PowerCurve {
    fn fit(base: f64, critical: f64, risk_age: f64, critical_age: f64) -> Option<Self> {
        #[allow(clippy::float_cmp)]
        if base == critical {
            return None;
        }
        let ratio = (base / critical).powf(1.0 / f64::from(RISK_CURVE_EXPONENT));
        let a = (ratio * critical_age - risk_age) / (1.0 - ratio);
        let b = base / (risk_age + a).powi(RISK_CURVE_EXPONENT);
        Some(PowerCurve { a, b })
    }

    fn at(&self, age: f64) -> f64 {
        self.b * (age + self.a).powi(RISK_CURVE_EXPONENT)
    }
}

/// Mortality rising with age: `base` up to `risk_age`, `critical` from `critical_age` on, and
/// a linear or power curve in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeStratifiedMortality {
    base: f64,
    critical: f64,
    risk_age: u32,
    critical_age: u32,
    curve: RiskCurve,
    power_curve: Option<PowerCurve>,
}

impl AgeStratifiedMortality {
    /// Fails with `InvalidMortalityCurve` if the ages are not increasing, or if a quadratic
    /// curve is asked for with a base or critical chance that is not positive.
    pub fn new(
        base: f64,
        risk_age: u32,
        critical_age: u32,
        critical: f64,
        curve: RiskCurve,
    ) -> Result<Self, ContagionError> {
        if risk_age >= critical_age {
            return Err(ContagionError::InvalidMortalityCurve(format!(
                "risk_age {risk_age} must be below critical_age {critical_age}"
            )));
        }
        let power_curve = match curve {
            RiskCurve::Linear => None,
            RiskCurve::Quadratic => {
                if base <= 0.0 || critical <= 0.0 {
                    return Err(ContagionError::InvalidMortalityCurve(format!(
                        "a quadratic risk curve needs positive chances, got base {base} and critical {critical}"
                    )));
                }
                PowerCurve::fit(
                    base,
                    critical,
                    f64::from(risk_age),
                    f64::from(critical_age),
                )
            }
        };
        Ok(AgeStratifiedMortality {
            base,
            critical,
            risk_age,
            critical_age,
            curve,
            power_curve,
        })
    }

    pub fn from_parameters(base: f64, age: &AgeParameters) -> Result<Self, ContagionError> {
        AgeStratifiedMortality::new(
            base,
            age.risk_age,
            age.critical_age,
            age.critical_mortality_chance,
            age.risk_increase,
        )
    }

    pub fn at_age(&self, age: u32) -> f64 {
        if age <= self.risk_age {
            return self.base;
        }
        if age >= self.critical_age {
            return self.critical;
        }
        let age = f64::from(age);
        match (self.curve, self.power_curve) {
            (RiskCurve::Quadratic, Some(power_curve)) => power_curve.at(age),
            (RiskCurve::Quadratic, None) => self.base,
            (RiskCurve::Linear, _) => {
                let (risk_age, critical_age) =
                    (f64::from(self.risk_age), f64::from(self.critical_age));
                self.base
                    + (self.critical - self.base) * (age - risk_age) / (critical_age - risk_age)
            }
        }
    }
}

impl MortalityStrategy for AgeStratifiedMortality {
    fn mortality_chance(&self, agent: &Agent) -> f64 {
        self.at_age(agent.age)
    }
}

/// Mortality chance of an agent of `age` on the given age-risk curve.
pub fn compute_mortality(
    age: u32,
    base: f64,
    risk_age: u32,
    critical_age: u32,
    critical: f64,
    curve: RiskCurve,
) -> Result<f64, ContagionError> {
    Ok(AgeStratifiedMortality::new(base, risk_age, critical_age, critical, curve)?.at_age(age))
}

/// Picks the strategy a configuration calls for: the age curve for a stratified population
/// with a lethal virus, a flat chance otherwise (`0` for a non-lethal virus).
pub fn mortality_strategy_from_parameters(
    parameters: &Parameters,
) -> Result<Box<dyn MortalityStrategy>, ContagionError> {
    let base = parameters.virus.mortality_chance;
    match (base, &parameters.population.age) {
        (Some(base), Some(age)) => Ok(Box::new(AgeStratifiedMortality::from_parameters(
            base, age,
        )?)),
        (base, _) => Ok(Box::new(FlatMortality {
            chance: base.unwrap_or(0.0),
        })),
    }
}

/// Agents that left the infected state during one progression step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressionOutcome {
    pub recovered: Vec<AgentId>,
    pub deceased: Vec<AgentId>,
}

#[derive(Debug, Default)]
struct ProgressionData {
    strategy: Option<Box<dyn MortalityStrategy>>,
}

define_data_plugin!(ProgressionPlugin, ProgressionData, ProgressionData::default());

pub trait ContextProgressionExt {
    /// Replaces the mortality strategy. Without one, the strategy is derived from the
    /// parameters on every step.
    fn set_mortality_strategy(&mut self, strategy: Box<dyn MortalityStrategy>);

    /// Moves every infected agent whose recovery progress has reached its threshold to
    /// `Dead` or `Immune`, clearing its treatment.
    fn resolve_progression(&mut self) -> Result<ProgressionOutcome, ContagionError>;

    /// Clears the destinations of immune agents, releasing them from isolation.
    fn release_recovered(&mut self);
}

impl ContextProgressionExt for Context {
    fn set_mortality_strategy(&mut self, strategy: Box<dyn MortalityStrategy>) {
        debug!("mortality strategy set to {strategy:?}");
        self.get_data_container_mut(ProgressionPlugin).strategy = Some(strategy);
    }

    fn resolve_progression(&mut self) -> Result<ProgressionOutcome, ContagionError> {
        let tick = self.get_current_tick();
        let parameters = self.get_parameters();
        let recovery_duration = parameters.virus.recovery_duration;
        let verbose = parameters.verbose;

        let fallback;
        let strategy: &dyn MortalityStrategy = match self
            .get_data_container(ProgressionPlugin)
            .and_then(|data| data.strategy.as_deref())
        {
            Some(strategy) => strategy,
            None => {
                fallback = mortality_strategy_from_parameters(parameters)?;
                fallback.as_ref()
            }
        };

        let mut outcome = ProgressionOutcome::default();
        for agent in self.get_agents() {
            if agent.status != HealthStatus::Infected {
                continue;
            }
            let illness_duration = tick.saturating_sub(agent.infected_since.unwrap_or(tick));
            if recovery_progress(illness_duration, recovery_duration) < agent.recovery_threshold {
                continue;
            }
            let chance = adjusted_mortality_chance(
                strategy.mortality_chance(agent),
                self.treatment_risk_factor(agent.in_treatment),
            );
            if self.sample_bool(SimulationRng, chance.clamp(0.0, 1.0)) {
                outcome.deceased.push(agent.id);
            } else {
                outcome.recovered.push(agent.id);
            }
        }
        trace!(
            "{} recovered and {} died at tick {tick}",
            outcome.recovered.len(),
            outcome.deceased.len()
        );

        let agents = population_mut(self).agents_mut();
        for (ids, status) in [
            (&outcome.deceased, HealthStatus::Dead),
            (&outcome.recovered, HealthStatus::Immune),
        ] {
            for id in ids {
                let agent = &mut agents[id.0];
                agent.status = status;
                agent.in_treatment = false;
                if status == HealthStatus::Dead {
                    agent.heading_x = 0.0;
                    agent.heading_y = 0.0;
                    agent.speed = 0.0;
                }
            }
        }

        let target = module_path!();
        log_agent_events(target, verbose, tick, "died", &outcome.deceased);
        log_agent_events(target, verbose, tick, "recovered", &outcome.recovered);
        Ok(outcome)
    }

    fn release_recovered(&mut self) {
        let released: Vec<AgentId> = self
            .get_agents()
            .iter()
            .filter(|agent| agent.status == HealthStatus::Immune && agent.active_destination != 0)
            .map(|agent| agent.id)
            .collect();
        if !released.is_empty() {
            self.reset_destinations(&released);
        }
    }
}
