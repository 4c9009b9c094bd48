//! The agent table and the destination table.
//!
//! The population is a fixed-size table of [`Agent`] rows indexed by [`AgentId`]. Agents are
//! created once by `initialize_population` and never added or removed afterwards; every other
//! module reads and rewrites rows in place.
//!
//! Each agent also owns a row of the destination table holding the center of every destination
//! slot. Slot `0` means "no destination": the agent roams freely inside the world bounds. An
//! agent with an active slot travels to the slot's center and, once it has arrived, wanders
//! inside a box of half-extents `(wander_x, wander_y)` around it.
mod query;

use std::fmt::{Debug, Display, Formatter};

use rand_distr::Normal;
use serde::{Deserialize, Serialize};

pub use query::{count_nearby_infectious, Nearby, NearbyMode, Zone};
pub(crate) use query::transmits;

use crate::context::Context;
use crate::define_data_plugin;
use crate::error::ContagionError;
use crate::log::{debug, trace};
use crate::parameters::{AgeParameters, ContextParametersExt};
use crate::random::{ContextRandomExt, SimulationRng};

/// Stable index of an agent in the population table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub usize);

impl Display for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Agent {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Infected,
    Immune,
    Dead,
    /// Recovered but still able to transmit. Only reachable with reinfection enabled.
    ImmuneInfectious,
}

impl HealthStatus {
    pub fn is_infectious(self) -> bool {
        matches!(self, HealthStatus::Infected | HealthStatus::ImmuneInfectious)
    }
}

/// One row of the agent table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Agent {
    pub id: AgentId,
    pub x: f64,
    pub y: f64,
    pub heading_x: f64,
    pub heading_y: f64,
    pub speed: f64,
    pub status: HealthStatus,
    pub age: u32,
    /// Tick of infection. `None` if the agent was never infected.
    pub infected_since: Option<u64>,
    /// Recovery progress at which the agent leaves the infected state.
    pub recovery_threshold: f64,
    pub in_treatment: bool,
    /// Destination slot the agent is heading to or wandering in, `0` for none.
    pub active_destination: usize,
    pub arrived: bool,
    pub wander_x: f64,
    pub wander_y: f64,
}

impl Agent {
    /// A healthy, motionless agent at the origin.
    pub fn new(id: AgentId) -> Self {
        Agent {
            id,
            x: 0.0,
            y: 0.0,
            heading_x: 0.0,
            heading_y: 0.0,
            speed: 0.0,
            status: HealthStatus::Healthy,
            age: 0,
            infected_since: None,
            recovery_threshold: 0.0,
            in_treatment: false,
            active_destination: 0,
            arrived: false,
            wander_x: 0.0,
            wander_y: 0.0,
        }
    }

    fn clear_destination(&mut self) {
        self.active_destination = 0;
        self.arrived = false;
    }
}

/// Destination centers, `slots` per agent, laid out row by row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationTable {
    slots: usize,
    centers: Vec<f64>,
}

impl DestinationTable {
    pub fn new(agents: usize, slots: usize) -> Self {
        DestinationTable {
            slots,
            centers: vec![0.0; agents * slots * 2],
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    fn offset(&self, agent: AgentId, slot: usize) -> Option<usize> {
        if slot == 0 || slot > self.slots {
            return None;
        }
        let offset = (agent.0 * self.slots + slot - 1) * 2;
        (offset + 1 < self.centers.len()).then_some(offset)
    }

    /// Center of `slot` for `agent`. `None` for slot `0` or an unknown slot.
    pub fn center(&self, agent: AgentId, slot: usize) -> Option<(f64, f64)> {
        self.offset(agent, slot)
            .map(|offset| (self.centers[offset], self.centers[offset + 1]))
    }

    fn set_center(&mut self, agent: AgentId, slot: usize, (x, y): (f64, f64)) -> bool {
        match self.offset(agent, slot) {
            Some(offset) => {
                self.centers[offset] = x;
                self.centers[offset + 1] = y;
                true
            }
            None => false,
        }
    }
}

/// Agents by health status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    pub healthy: usize,
    pub infected: usize,
    pub immune: usize,
    pub dead: usize,
    pub immune_infectious: usize,
    pub in_treatment: usize,
}

impl HealthCounts {
    pub fn infectious(&self) -> usize {
        self.infected + self.immune_infectious
    }

    pub fn total(&self) -> usize {
        self.healthy + self.infected + self.immune + self.dead + self.immune_infectious
    }
}

#[derive(Debug, Clone, Default)]
pub struct Population {
    agents: Vec<Agent>,
    destinations: DestinationTable,
}

impl Population {
    /// Builds a population from explicit rows, with one destination slot. Ids are reassigned
    /// to match row order.
    pub fn from_agents(mut agents: Vec<Agent>) -> Self {
        for (index, agent) in agents.iter_mut().enumerate() {
            agent.id = AgentId(index);
        }
        let destinations = DestinationTable::new(agents.len(), 1);
        Population {
            agents,
            destinations,
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub(crate) fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    pub fn destinations(&self) -> &DestinationTable {
        &self.destinations
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn health_counts(&self) -> HealthCounts {
        let mut counts = HealthCounts::default();
        for agent in &self.agents {
            match agent.status {
                HealthStatus::Healthy => counts.healthy += 1,
                HealthStatus::Infected => counts.infected += 1,
                HealthStatus::Immune => counts.immune += 1,
                HealthStatus::Dead => counts.dead += 1,
                HealthStatus::ImmuneInfectious => counts.immune_infectious += 1,
            }
            if agent.in_treatment {
                counts.in_treatment += 1;
            }
        }
        counts
    }

    fn agent_mut(&mut self, agent: AgentId) -> Result<&mut Agent, ContagionError> {
        let size = self.agents.len();
        self.agents.get_mut(agent.0).ok_or_else(|| {
            ContagionError::ContagionError(format!(
                "{agent:?} is not part of a population of {size}"
            ))
        })
    }

    /// Sends `agent` towards the center of `zone` through destination `slot`. The agent is
    /// not marked as arrived; the motion model does that once it gets there.
    pub fn go_to_location(
        &mut self,
        agent: AgentId,
        zone: &Zone,
        slot: usize,
    ) -> Result<(), ContagionError> {
        if !self.destinations.set_center(agent, slot, zone.center()) {
            return Err(ContagionError::InvalidConfiguration(format!(
                "destination slot {slot} does not exist for {agent:?}"
            )));
        }
        let (wander_x, wander_y) = zone.half_extents();
        let row = self.agent_mut(agent)?;
        row.wander_x = wander_x;
        row.wander_y = wander_y;
        row.active_destination = slot;
        Ok(())
    }

    /// Clears the destination of the listed agents, or of every agent if `agents` is empty.
    pub fn reset_destinations(&mut self, agents: &[AgentId]) {
        if agents.is_empty() {
            self.agents.iter_mut().for_each(Agent::clear_destination);
            return;
        }
        for agent in agents {
            if let Some(row) = self.agents.get_mut(agent.0) {
                row.clear_destination();
            }
        }
    }
}

define_data_plugin!(PopulationPlugin, Population, Population::default());

/// Mutable access to the population for the modules that advance it.
pub(crate) fn population_mut(context: &mut Context) -> &mut Population {
    context.get_data_container_mut(PopulationPlugin)
}

fn invalid(msg: String) -> ContagionError {
    ContagionError::InvalidConfiguration(msg)
}

fn normal(mean: f64, std_dev: f64) -> Result<Normal<f64>, ContagionError> {
    Normal::new(mean, std_dev)
        .map_err(|e| invalid(format!("normal distribution N({mean}, {std_dev}): {e}")))
}

pub trait ContextPopulationExt {
    /// Creates `pop_size` agents spread uniformly over the bounds shrunk by the spawn margin,
    /// with random headings, speeds around `mean_speed` and recovery thresholds. Ages are drawn
    /// from `age` if given and are `0` otherwise. Replaces any existing population and
    /// allocates a single destination slot.
    fn initialize_population(
        &mut self,
        pop_size: usize,
        xbounds: [f64; 2],
        ybounds: [f64; 2],
        mean_speed: f64,
        age: Option<&AgeParameters>,
    ) -> Result<(), ContagionError>;

    /// Reallocates the destination table with `total_destination_slots` slots per agent, all
    /// centers at the origin.
    fn initialize_destinations(&mut self, total_destination_slots: usize);

    /// Moves every agent into destination `slot` centered on `zone` and marks it arrived. With
    /// `teleport`, every agent is also placed uniformly inside `zone`.
    fn set_destination_bounds(
        &mut self,
        zone: Zone,
        slot: usize,
        teleport: bool,
    ) -> Result<(), ContagionError>;

    /// Sends one agent towards `zone` through destination `slot`.
    fn go_to_location(
        &mut self,
        agent: AgentId,
        zone: Zone,
        slot: usize,
    ) -> Result<(), ContagionError>;

    /// Clears the destination of the listed agents, or of every agent if `agents` is empty.
    fn reset_destinations(&mut self, agents: &[AgentId]);

    /// Marks a healthy agent infected at the current tick. Other agents are left unchanged.
    fn seed_infection(&mut self, agent: AgentId) -> Result<(), ContagionError>;

    fn get_population(&self) -> Option<&Population>;

    /// Read-only view of the agent table; empty before initialization.
    fn get_agents(&self) -> &[Agent];

    fn get_agent(&self, agent: AgentId) -> Option<&Agent>;

    fn population_size(&self) -> usize;

    fn health_counts(&self) -> HealthCounts;
}

impl ContextPopulationExt for Context {
    fn initialize_population(
        &mut self,
        pop_size: usize,
        xbounds: [f64; 2],
        ybounds: [f64; 2],
        mean_speed: f64,
        age: Option<&AgeParameters>,
    ) -> Result<(), ContagionError> {
        trace!("initializing population of {pop_size}");
        if pop_size == 0 {
            return Err(invalid("pop_size must be positive".to_string()));
        }
        let margin = self.get_parameters().motion.spawn_margin;
        let spawn_x = (xbounds[0] + margin, xbounds[1] - margin);
        let spawn_y = (ybounds[0] + margin, ybounds[1] - margin);
        for (name, (lo, hi)) in [("xbounds", spawn_x), ("ybounds", spawn_y)] {
            if lo.is_nan() || hi.is_nan() || lo >= hi {
                return Err(invalid(format!(
                    "{name} are degenerate once shrunk by a margin of {margin}"
                )));
            }
        }

        let heading = normal(0.0, 1.0 / 3.0)?;
        let speed = normal(mean_speed, mean_speed / 3.0)?;
        let recovery = normal(0.5, 0.5 / 3.0)?;
        let ages = age
            .map(|age| normal(age.mean_age, (f64::from(age.max_age) - age.mean_age) / 3.0))
            .transpose()?;

        let mut agents: Vec<Agent> = (0..pop_size).map(|id| Agent::new(AgentId(id))).collect();
        // One column at a time, so the draw order does not depend on the row layout.
        for agent in &mut agents {
            agent.x = self.sample_range(SimulationRng, spawn_x.0..spawn_x.1);
        }
        for agent in &mut agents {
            agent.y = self.sample_range(SimulationRng, spawn_y.0..spawn_y.1);
        }
        for agent in &mut agents {
            agent.heading_x = self.sample_distr(SimulationRng, heading);
        }
        for agent in &mut agents {
            agent.heading_y = self.sample_distr(SimulationRng, heading);
        }
        for agent in &mut agents {
            agent.speed = self.sample_distr(SimulationRng, speed);
        }
        for agent in &mut agents {
            agent.recovery_threshold = self.sample_distr(SimulationRng, recovery);
        }
        if let (Some(distribution), Some(age)) = (ages, age) {
            let max_age = f64::from(age.max_age);
            for agent in &mut agents {
                let sampled: f64 = self.sample_distr(SimulationRng, distribution);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let age = sampled.clamp(0.0, max_age) as u32;
                agent.age = age;
            }
        }

        debug!("created {pop_size} agents");
        *population_mut(self) = Population::from_agents(agents);
        Ok(())
    }

    fn initialize_destinations(&mut self, total_destination_slots: usize) {
        let population = population_mut(self);
        population.destinations = DestinationTable::new(population.len(), total_destination_slots);
        population.reset_destinations(&[]);
    }

    fn set_destination_bounds(
        &mut self,
        zone: Zone,
        slot: usize,
        teleport: bool,
    ) -> Result<(), ContagionError> {
        if zone.is_degenerate() {
            return Err(invalid(format!("destination zone {zone:?} is degenerate")));
        }
        let size = self.population_size();
        if slot == 0 || slot > self.get_population().map_or(0, |p| p.destinations.slots()) {
            return Err(invalid(format!("destination slot {slot} does not exist")));
        }

        let positions: Option<Vec<(f64, f64)>> = teleport.then(|| {
            let xs: Vec<f64> = (0..size)
                .map(|_| self.sample_range(SimulationRng, zone.xmin..zone.xmax))
                .collect();
            let ys: Vec<f64> = (0..size)
                .map(|_| self.sample_range(SimulationRng, zone.ymin..zone.ymax))
                .collect();
            xs.into_iter().zip(ys).collect()
        });

        let population = population_mut(self);
        for index in 0..size {
            population.go_to_location(AgentId(index), &zone, slot)?;
        }
        for (index, agent) in population.agents.iter_mut().enumerate() {
            if let Some(positions) = &positions {
                (agent.x, agent.y) = positions[index];
            }
            agent.arrived = true;
        }
        Ok(())
    }

    fn go_to_location(
        &mut self,
        agent: AgentId,
        zone: Zone,
        slot: usize,
    ) -> Result<(), ContagionError> {
        population_mut(self).go_to_location(agent, &zone, slot)
    }

    fn reset_destinations(&mut self, agents: &[AgentId]) {
        population_mut(self).reset_destinations(agents);
    }

    fn seed_infection(&mut self, agent: AgentId) -> Result<(), ContagionError> {
        let tick = self.get_current_tick();
        let row = population_mut(self).agent_mut(agent)?;
        if row.status == HealthStatus::Healthy {
            row.status = HealthStatus::Infected;
            row.infected_since = Some(tick);
            debug!("seeded infection in {agent:?} at tick {tick}");
        }
        Ok(())
    }

    fn get_population(&self) -> Option<&Population> {
        self.get_data_container(PopulationPlugin)
    }

    fn get_agents(&self) -> &[Agent] {
        self.get_population()
            .map(Population::agents)
            .unwrap_or_default()
    }

    fn get_agent(&self, agent: AgentId) -> Option<&Agent> {
        self.get_agents().get(agent.0)
    }

    fn population_size(&self) -> usize {
        self.get_agents().len()
    }

    fn health_counts(&self) -> HealthCounts {
        self.get_population()
            .map(Population::health_counts)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::RiskCurve;

    fn context_with_population(pop_size: usize) -> Context {
        let mut context = Context::new();
        context.init_random(42);
        context
            .initialize_population(pop_size, [0.0, 1.0], [0.0, 1.0], 0.015, None)
            .unwrap();
        context.initialize_destinations(1);
        context
    }

    #[test]
    fn initializes_agents_inside_spawn_area() {
        let context = context_with_population(200);
        assert_eq!(context.population_size(), 200);
        for (index, agent) in context.get_agents().iter().enumerate() {
            assert_eq!(agent.id, AgentId(index));
            assert!(agent.x >= 0.05 && agent.x < 0.95);
            assert!(agent.y >= 0.05 && agent.y < 0.95);
            assert_eq!(agent.status, HealthStatus::Healthy);
            assert_eq!(agent.age, 0);
            assert_eq!(agent.active_destination, 0);
            assert!(!agent.arrived);
        }
        assert_eq!(context.health_counts().healthy, 200);
    }

    #[test]
    fn rejects_bad_population() {
        let mut context = Context::new();
        context.init_random(42);
        assert!(matches!(
            context.initialize_population(0, [0.0, 1.0], [0.0, 1.0], 0.01, None),
            Err(ContagionError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            context.initialize_population(10, [1.0, 0.0], [0.0, 1.0], 0.01, None),
            Err(ContagionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn ages_are_clamped() {
        let mut context = Context::new();
        context.init_random(7);
        let age = AgeParameters {
            mean_age: 90.0,
            max_age: 95,
            risk_age: 55,
            critical_age: 75,
            critical_mortality_chance: 0.2,
            risk_increase: RiskCurve::Linear,
        };
        context
            .initialize_population(500, [0.0, 1.0], [0.0, 1.0], 0.01, Some(&age))
            .unwrap();
        assert!(context.get_agents().iter().all(|agent| agent.age <= 95));
        assert!(context.get_agents().iter().any(|agent| agent.age > 0));
    }

    #[test]
    fn set_destination_bounds_moves_everyone_in() {
        let mut context = context_with_population(50);
        let zone = Zone::new(0.1, 0.2, 0.3, 0.6);
        context.set_destination_bounds(zone, 1, true).unwrap();
        let population = context.get_population().unwrap();
        for agent in population.agents() {
            assert!(agent.x >= 0.1 && agent.x < 0.3);
            assert!(agent.y >= 0.2 && agent.y < 0.6);
            assert_eq!(agent.active_destination, 1);
            assert!(agent.arrived);
            assert!((agent.wander_x - 0.1).abs() < 1e-12);
            assert!((agent.wander_y - 0.2).abs() < 1e-12);
            let (cx, cy) = population.destinations().center(agent.id, 1).unwrap();
            assert!((cx - 0.2).abs() < 1e-12);
            assert!((cy - 0.4).abs() < 1e-12);
        }
    }

    #[test]
    fn set_destination_bounds_rejects_unknown_slot() {
        let mut context = context_with_population(5);
        let zone = Zone::new(0.1, 0.1, 0.2, 0.2);
        assert!(context.set_destination_bounds(zone, 0, false).is_err());
        assert!(context.set_destination_bounds(zone, 2, false).is_err());
    }

    #[test]
    fn go_to_location_does_not_arrive() {
        let mut context = context_with_population(5);
        context
            .go_to_location(AgentId(3), Zone::new(0.0, 0.0, 0.2, 0.2), 1)
            .unwrap();
        let agent = context.get_agent(AgentId(3)).unwrap();
        assert_eq!(agent.active_destination, 1);
        assert!(!agent.arrived);
        assert_eq!(context.get_agent(AgentId(2)).unwrap().active_destination, 0);
    }

    #[test]
    fn partial_reset_only_touches_listed_agents() {
        let mut context = context_with_population(4);
        context
            .set_destination_bounds(Zone::new(0.1, 0.1, 0.2, 0.2), 1, false)
            .unwrap();
        context.reset_destinations(&[AgentId(1), AgentId(3)]);
        let destinations: Vec<(usize, bool)> = context
            .get_agents()
            .iter()
            .map(|agent| (agent.active_destination, agent.arrived))
            .collect();
        assert_eq!(destinations, vec![(1, true), (0, false), (1, true), (0, false)]);

        context.reset_destinations(&[]);
        assert!(context
            .get_agents()
            .iter()
            .all(|agent| agent.active_destination == 0 && !agent.arrived));
    }

    #[test]
    fn seed_infection_marks_tick() {
        let mut context = context_with_population(3);
        context.seed_infection(AgentId(1)).unwrap();
        let agent = context.get_agent(AgentId(1)).unwrap();
        assert_eq!(agent.status, HealthStatus::Infected);
        assert_eq!(agent.infected_since, Some(0));
        assert_eq!(context.health_counts().infectious(), 1);
        assert!(context.seed_infection(AgentId(3)).is_err());
    }

    #[test]
    fn same_seed_same_population() {
        let a = context_with_population(30);
        let b = context_with_population(30);
        assert_eq!(a.get_agents(), b.get_agents());
    }
}
