//! A spatial agent-based model of infectious disease spread.
//!
//! A fixed population of agents moves through a bounded two-dimensional world. Infectious
//! agents pass the disease to healthy agents close to them, and infected agents recover or die
//! after an illness whose length and outcome are drawn per agent. Society-level interventions
//! modulate the spread: a lockdown that freezes movement while infections are high,
//! self-isolation of treated agents in a separate zone, and a limited healthcare capacity that
//! changes the odds of dying.
//!
//! The central object is the [`Context`]. It holds the tick counter, the data of every module
//! and the handlers run each tick. Modules extend it through traits:
//! * [`ContextParametersExt`] stores the validated configuration.
//! * [`ContextPopulationExt`] owns the agent and destination tables.
//! * [`ContextMotionExt`], [`ContextInfectionExt`] and [`ContextProgressionExt`] advance the
//!   model by one tick each.
//! * [`ContextSocietyExt`] decides when interventions apply.
//! * [`ContextStatisticsExt`] keeps the per-tick counts.
//! * [`ContextSimulationExt`] ties them together in a fixed tick order.
//!
//! [`run_simulation`] runs a whole simulation from a [`Parameters`] value, and the `runner`
//! module does the same from command line arguments.
pub mod context;
pub mod error;
pub mod execution_stats;
pub mod hashing;
pub mod infection;
pub mod log;
pub mod motion;
pub mod parameters;
pub mod population;
pub mod progression;
pub mod random;
pub mod report;
pub mod runner;
pub mod simulation;
pub mod society;
pub mod tracker;

#[cfg(feature = "progress_bar")]
pub mod progress;

pub use context::{Context, ExecutionPhase, StopHandle};
pub use error::ContagionError;
pub use hashing::HashMap;
pub use infection::ContextInfectionExt;
pub use motion::ContextMotionExt;
pub use parameters::{ContextParametersExt, Parameters};
pub use population::{Agent, AgentId, ContextPopulationExt, HealthStatus};
pub use progression::ContextProgressionExt;
pub use random::ContextRandomExt;
pub use simulation::{run_simulation, ContextSimulationExt, RunSummary};
pub use society::ContextSocietyExt;
pub use tracker::{ContextStatisticsExt, StatisticsSeries};

// Re-exports for the exported macros.
pub use csv;
pub use rand;
