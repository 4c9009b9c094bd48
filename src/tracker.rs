//! Cumulative per-tick health statistics of the population.
use std::sync::LazyLock;

use serde::Serialize;

use crate::context::Context;
use crate::define_data_plugin;
use crate::population::{ContextPopulationExt, HealthCounts};

/// One entry per recorded tick in each series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSeries {
    pub susceptible: Vec<usize>,
    pub infectious: Vec<usize>,
    pub recovered: Vec<usize>,
    pub fatalities: Vec<usize>,
    pub in_treatment: Vec<usize>,
    /// Counts recovered agents as susceptible again. Off unless immunity can wear off.
    #[serde(skip)]
    pub reinfect: bool,
}

impl StatisticsSeries {
    pub fn push(&mut self, counts: &HealthCounts) {
        let susceptible = if self.reinfect {
            counts.total() - counts.infectious() - counts.dead
        } else {
            counts.healthy
        };
        self.susceptible.push(susceptible);
        self.infectious.push(counts.infectious());
        self.recovered.push(counts.immune);
        self.fatalities.push(counts.dead);
        self.in_treatment.push(counts.in_treatment);
    }

    pub fn len(&self) -> usize {
        self.susceptible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.susceptible.is_empty()
    }

    /// Infectious count of the most recent entry, `0` before anything was recorded.
    pub fn last_infectious(&self) -> usize {
        self.infectious.last().copied().unwrap_or(0)
    }
}

static EMPTY_SERIES: LazyLock<StatisticsSeries> = LazyLock::new(StatisticsSeries::default);

define_data_plugin!(
    StatisticsPlugin,
    StatisticsSeries,
    StatisticsSeries::default()
);

pub trait ContextStatisticsExt {
    /// Appends the current population counts to the series and returns them.
    fn record_statistics(&mut self) -> HealthCounts;

    fn get_statistics(&self) -> &StatisticsSeries;

    /// Infectious count recorded on the previous tick.
    fn last_infectious_count(&self) -> usize;

    /// Sets whether recovered agents count as susceptible from the next record on.
    fn set_reinfection(&mut self, reinfect: bool);
}

impl ContextStatisticsExt for Context {
    fn record_statistics(&mut self) -> HealthCounts {
        let counts = self.health_counts();
        self.get_data_container_mut(StatisticsPlugin).push(&counts);
        counts
    }

    fn get_statistics(&self) -> &StatisticsSeries {
        self.get_data_container(StatisticsPlugin)
            .unwrap_or(&EMPTY_SERIES)
    }

    fn last_infectious_count(&self) -> usize {
        self.get_statistics().last_infectious()
    }

    fn set_reinfection(&mut self, reinfect: bool) {
        self.get_data_container_mut(StatisticsPlugin).reinfect = reinfect;
    }
}
