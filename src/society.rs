//! Society-level interventions: lockdown, self-isolation and healthcare capacity.
//!
//! The intervention settings live in `Parameters::society`. This module keeps the state that
//! changes during a run (whether a lockdown is in force and who ignores it) and answers the
//! questions the motion, infection and progression steps ask about interventions.
use crate::context::Context;
use crate::define_data_plugin;
use crate::error::ContagionError;
use crate::log::{debug, info, trace};
use crate::parameters::ContextParametersExt;
use crate::population::{population_mut, AgentId, ContextPopulationExt, Zone};
use crate::random::{ContextRandomExt, SimulationRng};

/// Speed limit for every agent while a lockdown is in force.
pub const LOCKDOWN_MAX_SPEED: f64 = 0.00001;

/// Destination slot used for self-isolation.
pub const ISOLATION_SLOT: usize = 1;

#[derive(Debug, Default)]
struct SocietyState {
    /// Lockdown carried over into the next evaluation.
    lockdown_active: bool,
    /// Lockdown applied during the current tick.
    lockdown_in_force: bool,
    /// Agents that do not comply with a lockdown, by agent index.
    exempt: Vec<bool>,
}

define_data_plugin!(SocietyPlugin, SocietyState, SocietyState::default());

pub trait ContextSocietyExt {
    /// Resets the intervention state and, when a lockdown is configured, draws once for every
    /// agent whether it complies.
    fn init_society(&mut self);

    /// Decides whether a lockdown is in force for the current tick.
    ///
    /// The lockdown starts when `current_infected` or `last_infectious` (the count recorded the
    /// tick before) reaches the trigger fraction of `pop_size`. Once started it stays in force
    /// until `current_infected` falls to half the trigger fraction; the tick on which that is
    /// observed is still locked down.
    fn evaluate_lockdown(
        &mut self,
        current_infected: usize,
        last_infectious: usize,
        pop_size: usize,
    ) -> bool;

    /// Whether the most recent `evaluate_lockdown` put a lockdown in force.
    fn lockdown_in_force(&self) -> bool;

    /// Whether `agent` ignores lockdowns. `false` when no lockdown is configured.
    fn is_lockdown_exempt(&self, agent: AgentId) -> bool;

    /// While a lockdown is in force, clamps every speed to [`LOCKDOWN_MAX_SPEED`] and stops
    /// every complying agent.
    fn suppress_movement(&mut self);

    /// With the configured self-isolation odds, sends a newly infected agent to the isolation
    /// zone. Returns whether it was sent.
    fn maybe_route_to_isolation(&mut self, agent: AgentId) -> Result<bool, ContagionError>;

    /// Whether a healthcare slot is free with `in_treatment_count` agents already in
    /// treatment.
    fn treatment_slot_available(&self, in_treatment_count: usize) -> bool;

    /// Multiplier applied to the mortality chance of an agent depending on its treatment.
    fn treatment_risk_factor(&self, in_treatment: bool) -> f64;
}

impl ContextSocietyExt for Context {
    fn init_society(&mut self) {
        trace!("initializing society");
        let pop_size = self.population_size();
        let exempt = match self.get_parameters().society.lockdown {
            Some(lockdown) => (0..pop_size)
                .map(|_| self.sample_range(SimulationRng, 0.0..1.0) >= lockdown.compliance)
                .collect(),
            None => Vec::new(),
        };
        debug!(
            "{} of {pop_size} agents will not comply with a lockdown",
            exempt.iter().filter(|&&exempt| exempt).count()
        );
        *self.get_data_container_mut(SocietyPlugin) = SocietyState {
            exempt,
            ..SocietyState::default()
        };
    }

    fn evaluate_lockdown(
        &mut self,
        current_infected: usize,
        last_infectious: usize,
        pop_size: usize,
    ) -> bool {
        let Some(lockdown) = self.get_parameters().society.lockdown else {
            return false;
        };
        #[allow(clippy::cast_precision_loss)]
        let (current, last, trigger) = (
            current_infected as f64,
            last_infectious as f64,
            pop_size as f64 * lockdown.percentage,
        );
        let tick = self.get_current_tick();
        let state = self.get_data_container_mut(SocietyPlugin);
        let was_active = state.lockdown_active;

        state.lockdown_in_force = current >= trigger || last >= trigger || was_active;
        state.lockdown_active = state.lockdown_in_force && current > trigger / 2.0;

        if state.lockdown_active && !was_active {
            info!("{tick}: lockdown started with {current_infected} infected");
        } else if was_active && !state.lockdown_active {
            info!("{tick}: lockdown lifted with {current_infected} infected");
        }
        state.lockdown_in_force
    }

    fn lockdown_in_force(&self) -> bool {
        self.get_data_container(SocietyPlugin)
            .is_some_and(|state| state.lockdown_in_force)
    }

    fn is_lockdown_exempt(&self, agent: AgentId) -> bool {
        self.get_data_container(SocietyPlugin)
            .and_then(|state| state.exempt.get(agent.0).copied())
            .unwrap_or(false)
    }

    fn suppress_movement(&mut self) {
        if !self.lockdown_in_force() {
            return;
        }
        let exempt = std::mem::take(&mut self.get_data_container_mut(SocietyPlugin).exempt);
        for agent in population_mut(self).agents_mut() {
            agent.speed = agent.speed.min(LOCKDOWN_MAX_SPEED);
            if !exempt.get(agent.id.0).copied().unwrap_or(false) {
                agent.speed = 0.0;
            }
        }
        self.get_data_container_mut(SocietyPlugin).exempt = exempt;
    }

    fn maybe_route_to_isolation(&mut self, agent: AgentId) -> Result<bool, ContagionError> {
        let Some(isolation) = self.get_parameters().society.self_isolation else {
            return Ok(false);
        };
        if !self.sample_bool(SimulationRng, isolation.proportion) {
            return Ok(false);
        }
        self.go_to_location(agent, Zone::from_bounds(isolation.bounds), ISOLATION_SLOT)?;
        Ok(true)
    }

    fn treatment_slot_available(&self, in_treatment_count: usize) -> bool {
        in_treatment_count < self.get_parameters().society.healthcare_capacity
    }

    fn treatment_risk_factor(&self, in_treatment: bool) -> f64 {
        let society = &self.get_parameters().society;
        match (society.treatment_dependent_risk, in_treatment) {
            (false, _) => 1.0,
            (true, true) => society.treatment_factor,
            (true, false) => society.no_treatment_factor,
        }
    }
}
