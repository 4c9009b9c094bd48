//! The infection model: transmission between nearby agents.
//!
//! Decisions are made against the population as it stood when the step began. Which agents
//! are infectious is fixed up front, so an agent infected during this step cannot pass the
//! infection on before the next tick.
//!
//! Two equivalent scans are used. While fewer than half of the agents are infectious, each
//! infectious agent looks for healthy agents around it and infects each of them with
//! `infection_chance`. Once infectious agents are the majority, each healthy agent instead
//! counts the infectious agents around it and is infected with `infection_chance * count`.
use crate::context::Context;
use crate::error::ContagionError;
use crate::log::{log_agent_events, trace};
use crate::parameters::ContextParametersExt;
use crate::population::{
    count_nearby_infectious, population_mut, transmits, Agent, AgentId, ContextPopulationExt,
    HealthStatus, Zone,
};
use crate::random::{ContextRandomExt, SimulationRng};
use crate::society::ContextSocietyExt;

/// Which side of the population the infection step iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    FromInfectious,
    FromHealthy,
}

impl ScanStrategy {
    /// The cheaper scan for `infectious` infectious agents in a population of `pop_size`.
    pub fn choose(infectious: usize, pop_size: usize) -> Self {
        if infectious < pop_size / 2 {
            ScanStrategy::FromInfectious
        } else {
            ScanStrategy::FromHealthy
        }
    }
}

/// Chance that a healthy agent with `nearby_infectious` infectious neighbours is infected.
pub fn healthy_side_chance(infection_chance: f64, nearby_infectious: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let chance = infection_chance * nearby_infectious as f64;
    chance.min(1.0)
}

struct InfectionStep {
    tick: u64,
    in_treatment: usize,
    new_infections: Vec<AgentId>,
}

impl InfectionStep {
    /// Infects `agent`, admits it to treatment if a slot is free, and then possibly sends it
    /// into isolation.
    fn infect(&mut self, context: &mut Context, agent: AgentId) -> Result<(), ContagionError> {
        let treated = context.treatment_slot_available(self.in_treatment);
        let row = &mut population_mut(context).agents_mut()[agent.0];
        row.status = HealthStatus::Infected;
        row.infected_since = Some(self.tick);
        if treated {
            row.in_treatment = true;
            self.in_treatment += 1;
            context.maybe_route_to_isolation(agent)?;
        }
        self.new_infections.push(agent);
        Ok(())
    }
}

pub trait ContextInfectionExt {
    /// Runs one infection step and returns the newly infected agents in the order they were
    /// infected.
    fn infect(&mut self) -> Result<Vec<AgentId>, ContagionError>;
}

impl ContextInfectionExt for Context {
    fn infect(&mut self) -> Result<Vec<AgentId>, ContagionError> {
        let parameters = self.get_parameters();
        let verbose = parameters.verbose;
        let virus = parameters.virus;
        let traveling_infects = parameters.society.traveling_infects;

        let agents = self.get_agents();
        let infectious: Vec<Agent> = agents
            .iter()
            .filter(|agent| agent.status.is_infectious())
            .copied()
            .collect();
        let healthy: Vec<Agent> = agents
            .iter()
            .filter(|agent| agent.status == HealthStatus::Healthy)
            .copied()
            .collect();

        let mut step = InfectionStep {
            tick: self.get_current_tick(),
            in_treatment: self.health_counts().in_treatment,
            new_infections: Vec::new(),
        };

        let strategy = ScanStrategy::choose(infectious.len(), self.population_size());
        trace!(
            "infection step with {} infectious agents, scanning {strategy:?}",
            infectious.len()
        );
        match strategy {
            ScanStrategy::FromInfectious => {
                for patient in &infectious {
                    if !transmits(patient, traveling_infects) {
                        continue;
                    }
                    let zone = Zone::around(patient.x, patient.y, virus.infection_range);
                    let candidates = self
                        .get_population()
                        .map(|population| population.find_nearby_healthy(&zone))
                        .unwrap_or_default();
                    for candidate in candidates {
                        if self.sample_bool(SimulationRng, virus.infection_chance) {
                            step.infect(self, candidate)?;
                        }
                    }
                }
            }
            ScanStrategy::FromHealthy => {
                for person in &healthy {
                    let zone = Zone::around(person.x, person.y, virus.infection_range);
                    let nearby = count_nearby_infectious(&infectious, &zone, traveling_infects);
                    if nearby == 0 {
                        continue;
                    }
                    let chance = healthy_side_chance(virus.infection_chance, nearby);
                    if self.sample_bool(SimulationRng, chance) {
                        step.infect(self, person.id)?;
                    }
                }
            }
        }

        log_agent_events(
            module_path!(),
            verbose,
            step.tick,
            "got sick",
            &step.new_infections,
        );
        Ok(step.new_infections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{Parameters, SelfIsolationParameters};
    use crate::society::ISOLATION_SLOT;

    fn setup(parameters: Parameters, agents: Vec<Agent>) -> Context {
        let mut context = Context::new();
        context.init_random(parameters.seed);
        context.set_parameters(parameters).unwrap();
        *population_mut(&mut context) = crate::population::Population::from_agents(agents);
        context.init_society();
        context
    }

    fn agent(x: f64, y: f64, status: HealthStatus) -> Agent {
        Agent {
            x,
            y,
            status,
            ..Agent::new(AgentId(0))
        }
    }

    fn cluster(infected: usize, healthy: usize) -> Vec<Agent> {
        let mut agents = Vec::new();
        for i in 0..infected + healthy {
            #[allow(clippy::cast_precision_loss)]
            let offset = i as f64 * 0.001;
            let status = if i < infected {
                HealthStatus::Infected
            } else {
                HealthStatus::Healthy
            };
            agents.push(agent(0.5 + offset, 0.5, status));
        }
        agents
    }

    fn certain_infection() -> Parameters {
        let mut parameters = Parameters::default();
        parameters.virus.infection_chance = 1.0;
        parameters.virus.infection_range = 0.1;
        parameters
    }

    #[test]
    fn strategy_switches_at_half() {
        assert_eq!(ScanStrategy::choose(49, 100), ScanStrategy::FromInfectious);
        assert_eq!(ScanStrategy::choose(50, 100), ScanStrategy::FromHealthy);
        assert_eq!(ScanStrategy::choose(0, 1), ScanStrategy::FromHealthy);
    }

    #[test]
    fn healthy_side_chance_is_clamped() {
        assert!((healthy_side_chance(0.03, 2) - 0.06).abs() < 1e-12);
        assert_eq!(healthy_side_chance(0.6, 3), 1.0);
    }

    #[test]
    fn infectious_scan_infects_neighbours() {
        let mut context = setup(certain_infection(), cluster(1, 9));
        let infected = context.infect().unwrap();
        assert_eq!(infected.len(), 9);
        for agent in context.get_agents() {
            assert_eq!(agent.status, HealthStatus::Infected);
        }
        assert_eq!(
            context.get_agent(AgentId(4)).unwrap().infected_since,
            Some(0)
        );
    }

    #[test]
    fn healthy_scan_infects_neighbours() {
        let mut context = setup(certain_infection(), cluster(6, 4));
        let infected = context.infect().unwrap();
        assert_eq!(infected, vec![AgentId(6), AgentId(7), AgentId(8), AgentId(9)]);
    }

    #[test]
    fn distant_agents_are_safe() {
        let mut agents = cluster(1, 1);
        agents.push(agent(0.9, 0.9, HealthStatus::Healthy));
        let mut context = setup(certain_infection(), agents);
        assert_eq!(context.infect().unwrap(), vec![AgentId(1)]);
        assert_eq!(
            context.get_agent(AgentId(2)).unwrap().status,
            HealthStatus::Healthy
        );
    }

    #[test]
    fn zero_chance_never_infects() {
        let mut parameters = certain_infection();
        parameters.virus.infection_chance = 0.0;
        let mut context = setup(parameters, cluster(3, 7));
        assert!(context.infect().unwrap().is_empty());
    }

    #[test]
    fn new_infections_do_not_spread_within_the_step() {
        // 0 infects 1, but 1 must not go on to infect 2 in the same step.
        let agents = vec![
            agent(0.50, 0.5, HealthStatus::Infected),
            agent(0.55, 0.5, HealthStatus::Healthy),
            agent(0.60, 0.5, HealthStatus::Healthy),
            agent(0.9, 0.9, HealthStatus::Healthy),
        ];
        let mut parameters = certain_infection();
        parameters.virus.infection_range = 0.06;
        let mut context = setup(parameters, agents);
        assert_eq!(context.infect().unwrap(), vec![AgentId(1)]);
    }

    #[test]
    fn travelers_only_infect_when_allowed() {
        let mut agents = cluster(1, 3);
        agents[0].active_destination = 1;
        let mut context = setup(certain_infection(), agents.clone());
        assert!(context.infect().unwrap().is_empty());

        let mut parameters = certain_infection();
        parameters.society.traveling_infects = true;
        let mut context = setup(parameters, agents);
        assert_eq!(context.infect().unwrap().len(), 3);
    }

    #[test]
    fn treatment_respects_capacity() {
        let mut parameters = certain_infection();
        parameters.society.healthcare_capacity = 2;
        let mut context = setup(parameters, cluster(1, 9));
        context.infect().unwrap();
        assert_eq!(context.health_counts().in_treatment, 2);
        let treated: Vec<usize> = context
            .get_agents()
            .iter()
            .filter(|agent| agent.in_treatment)
            .map(|agent| agent.id.0)
            .collect();
        assert_eq!(treated, vec![1, 2]);
    }

    #[test]
    fn treated_agents_can_be_isolated() {
        let mut parameters = certain_infection();
        parameters.society.healthcare_capacity = 3;
        parameters.society.self_isolation = Some(SelfIsolationParameters {
            proportion: 1.0,
            bounds: [0.02, 0.02, 0.1, 0.98],
            ..SelfIsolationParameters::default()
        });
        let mut context = setup(parameters, cluster(1, 5));
        context.infect().unwrap();
        let isolated: Vec<usize> = context
            .get_agents()
            .iter()
            .filter(|agent| agent.active_destination == ISOLATION_SLOT)
            .map(|agent| agent.id.0)
            .collect();
        assert_eq!(isolated, vec![1, 2, 3]);
    }
}
