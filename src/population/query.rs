//! Spatial queries over the agent table.
//!
//! Both queries are full linear scans. At a few thousand agents a scan is cheaper than keeping
//! a spatial index up to date while every agent moves every tick.
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ContagionError;
use crate::population::{Agent, AgentId, HealthStatus, Population};

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Zone {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Zone {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// From `[xmin, ymin, xmax, ymax]`.
    pub fn from_bounds(bounds: [f64; 4]) -> Self {
        let [xmin, ymin, xmax, ymax] = bounds;
        Zone::new(xmin, ymin, xmax, ymax)
    }

    /// The square of half-width `half_width` centered on `(x, y)`.
    pub fn around(x: f64, y: f64, half_width: f64) -> Self {
        Zone::new(
            x - half_width,
            y - half_width,
            x + half_width,
            y + half_width,
        )
    }

    /// Whether `(x, y)` lies strictly inside the zone. Points on an edge are outside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.xmin < x && x < self.xmax && self.ymin < y && y < self.ymax
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.xmin + (self.xmax - self.xmin) / 2.0,
            self.ymin + (self.ymax - self.ymin) / 2.0,
        )
    }

    pub fn half_extents(&self) -> (f64, f64) {
        ((self.xmax - self.xmin) / 2.0, (self.ymax - self.ymin) / 2.0)
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.xmin < self.xmax && self.ymin < self.ymax)
    }
}

/// What a `find_nearby` query looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NearbyMode {
    /// Healthy agents in the zone.
    Healthy,
    /// Number of infectious agents of a snapshot in the zone.
    InfectedCount,
}

impl FromStr for NearbyMode {
    type Err = ContagionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(NearbyMode::Healthy),
            "infected" => Ok(NearbyMode::InfectedCount),
            _ => Err(ContagionError::InvalidQuery(format!(
                "unknown nearby mode '{s}', expected 'healthy' or 'infected'"
            ))),
        }
    }
}

/// Result of a `find_nearby` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nearby {
    Healthy(Vec<AgentId>),
    InfectedCount(usize),
}

/// Whether `agent` can pass the infection on. Agents on their way to a destination only count
/// when `traveling_infects` is set.
pub(crate) fn transmits(agent: &Agent, traveling_infects: bool) -> bool {
    agent.status.is_infectious() && (traveling_infects || agent.active_destination == 0)
}

/// Counts the agents of `snapshot` inside `zone` that can transmit.
pub fn count_nearby_infectious(snapshot: &[Agent], zone: &Zone, traveling_infects: bool) -> usize {
    snapshot
        .iter()
        .filter(|agent| transmits(agent, traveling_infects) && zone.contains(agent.x, agent.y))
        .count()
}

impl Population {
    /// Runs a spatial query of the given `mode` over `zone`.
    ///
    /// `InfectedCount` counts over `infectious_snapshot`, the infectious agents as they stood
    /// before the current infection step, and fails with `InvalidQuery` without one.
    pub fn find_nearby(
        &self,
        zone: &Zone,
        mode: NearbyMode,
        infectious_snapshot: Option<&[Agent]>,
        traveling_infects: bool,
    ) -> Result<Nearby, ContagionError> {
        match mode {
            NearbyMode::Healthy => Ok(Nearby::Healthy(self.find_nearby_healthy(zone))),
            NearbyMode::InfectedCount => {
                let snapshot = infectious_snapshot.ok_or_else(|| {
                    ContagionError::InvalidQuery(
                        "an infected count needs a snapshot of infectious agents".to_string(),
                    )
                })?;
                Ok(Nearby::InfectedCount(count_nearby_infectious(
                    snapshot,
                    zone,
                    traveling_infects,
                )))
            }
        }
    }

    /// Ids of the healthy agents strictly inside `zone`, in id order.
    pub fn find_nearby_healthy(&self, zone: &Zone) -> Vec<AgentId> {
        self.agents()
            .iter()
            .filter(|agent| agent.status == HealthStatus::Healthy && zone.contains(agent.x, agent.y))
            .map(|agent| agent.id)
            .collect()
    }
}
