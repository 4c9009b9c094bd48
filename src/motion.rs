//! The motion model: moves every living agent one step per tick.
//!
//! Every agent goes through the same pipeline each tick:
//!
//! 1. An agent travelling to a destination heads straight for its center at the travel speed.
//! 2. It arrives once it is inside the destination's wander box, and draws a fresh heading and
//!    speed.
//! 3. An arrived agent that drifts out of its wander box is turned back inward and slowed to
//!    an idle speed.
//! 4. A free-roaming agent occasionally draws a new heading or speed, which makes it wander
//!    rather than move in straight lines. Agents complying with a lockdown skip this.
//! 5. A free-roaming agent at the boundary of its roaming area is turned back inward. With
//!    self-isolation configured, that area leaves out the isolation zone.
//!
//! Lockdown suppression is then applied, dead agents are stopped, and positions are integrated
//! along `heading * speed`.
use rand_distr::Normal;

use crate::context::Context;
use crate::error::ContagionError;
use crate::log::trace;
use crate::parameters::{ContextParametersExt, MotionParameters, WorldParameters};
use crate::population::{population_mut, Agent, ContextPopulationExt, HealthStatus};
use crate::random::{ContextRandomExt, SimulationRng};
use crate::society::ContextSocietyExt;

/// Inward headings after a boundary hit are kept within these magnitudes.
const REFLECTION_HEADING_RANGE: (f64, f64) = (0.05, 1.0);

struct MotionDistributions {
    heading: Normal<f64>,
    speed: Normal<f64>,
    inward: Normal<f64>,
    idle: Normal<f64>,
}

fn normal(mean: f64, std_dev: f64) -> Result<Normal<f64>, ContagionError> {
    Normal::new(mean, std_dev).map_err(|e| {
        ContagionError::InvalidConfiguration(format!(
            "normal distribution N({mean}, {std_dev}): {e}"
        ))
    })
}

/// Redraws heading components and speed, each with its own chance.
fn update_randoms(
    context: &Context,
    agent: &mut Agent,
    distributions: &MotionDistributions,
    motion: &MotionParameters,
    heading_chance: f64,
    speed_chance: f64,
) {
    if context.sample_bool(SimulationRng, heading_chance) {
        agent.heading_x = context.sample_distr(SimulationRng, distributions.heading);
    }
    if context.sample_bool(SimulationRng, heading_chance) {
        agent.heading_y = context.sample_distr(SimulationRng, distributions.heading);
    }
    if context.sample_bool(SimulationRng, speed_chance) {
        agent.speed = context.sample_distr(SimulationRng, distributions.speed);
    }
    agent.speed = agent.speed.clamp(motion.min_speed, motion.max_speed);
}

/// Magnitude of a heading component pointing back into an area.
fn inward_heading(context: &Context, distributions: &MotionDistributions) -> f64 {
    context.sample_distr(SimulationRng, distributions.inward)
}

fn reflect_at_bounds(
    context: &Context,
    agent: &mut Agent,
    distributions: &MotionDistributions,
    bounds: ([f64; 2], [f64; 2]),
) {
    let (lo, hi) = REFLECTION_HEADING_RANGE;
    let reflected = || inward_heading(context, distributions).clamp(lo, hi);
    let ([xlo, xhi], [ylo, yhi]) = bounds;

    if agent.x <= xlo && agent.heading_x < 0.0 {
        agent.heading_x = reflected();
    } else if agent.x >= xhi && agent.heading_x > 0.0 {
        agent.heading_x = -reflected();
    }
    if agent.y <= ylo && agent.heading_y < 0.0 {
        agent.heading_y = reflected();
    } else if agent.y >= yhi && agent.heading_y > 0.0 {
        agent.heading_y = -reflected();
    }
}

fn boundary_box(roam: &WorldParameters, margin: f64) -> ([f64; 2], [f64; 2]) {
    (
        [roam.xbounds[0] + margin, roam.xbounds[1] - margin],
        [roam.ybounds[0] + margin, roam.ybounds[1] - margin],
    )
}

pub trait ContextMotionExt {
    /// Advances headings, speeds and positions of the whole population by one tick.
    fn update_motion(&mut self) -> Result<(), ContagionError>;
}

impl ContextMotionExt for Context {
    fn update_motion(&mut self) -> Result<(), ContagionError> {
        trace!("updating motion");
        let parameters = self.get_parameters();
        let motion = parameters.motion;
        let roam = parameters.roam_bounds();
        let mean_speed = parameters.population.speed;
        let wander_factor = parameters.population.wander_factor;

        let distributions = MotionDistributions {
            heading: normal(0.0, 1.0 / 3.0)?,
            speed: normal(mean_speed, mean_speed / 3.0)?,
            inward: normal(0.5, 0.5 / 3.0)?,
            idle: normal(motion.idle_speed, motion.idle_speed / 3.0)?,
        };
        let bounds = boundary_box(&roam, motion.boundary_margin);
        let lockdown = self.lockdown_in_force();

        let Some(population) = self.get_population() else {
            return Ok(());
        };
        let destinations = population.destinations();
        let mut agents = population.agents().to_vec();

        for agent in agents.iter_mut().filter(|a| a.status != HealthStatus::Dead) {
            let destination = destinations.center(agent.id, agent.active_destination);

            if let Some((dest_x, dest_y)) = destination {
                if !agent.arrived {
                    agent.heading_x = dest_x - agent.x;
                    agent.heading_y = dest_y - agent.y;
                    agent.speed = motion.travel_speed;

                    if (agent.x - dest_x).abs() < agent.wander_x * wander_factor
                        && (agent.y - dest_y).abs() < agent.wander_y * wander_factor
                    {
                        agent.arrived = true;
                        update_randoms(self, agent, &distributions, &motion, 1.0, 1.0);
                    }
                }

                if agent.arrived {
                    let (reach_x, reach_y) =
                        (agent.wander_x * wander_factor, agent.wander_y * wander_factor);
                    if agent.x > dest_x + reach_x {
                        agent.heading_x = -inward_heading(self, &distributions);
                    } else if agent.x < dest_x - reach_x {
                        agent.heading_x = inward_heading(self, &distributions);
                    }
                    if agent.y > dest_y + reach_y {
                        agent.heading_y = -inward_heading(self, &distributions);
                    } else if agent.y < dest_y - reach_y {
                        agent.heading_y = inward_heading(self, &distributions);
                    }
                    agent.speed = self.sample_distr(SimulationRng, distributions.idle);
                }
                continue;
            }

            if !lockdown || self.is_lockdown_exempt(agent.id) {
                update_randoms(
                    self,
                    agent,
                    &distributions,
                    &motion,
                    motion.heading_update_chance,
                    motion.speed_update_chance,
                );
            }
            reflect_at_bounds(self, agent, &distributions, bounds);
        }

        population_mut(self).agents_mut().copy_from_slice(&agents);
        self.suppress_movement();

        for agent in population_mut(self).agents_mut() {
            if agent.status == HealthStatus::Dead {
                agent.heading_x = 0.0;
                agent.heading_y = 0.0;
                agent.speed = 0.0;
            }
            agent.x += agent.heading_x * agent.speed;
            agent.y += agent.heading_y * agent.speed;
        }
        Ok(())
    }
}
