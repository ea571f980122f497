use serde::{Deserialize, Serialize};

use crate::actions::{identified_by_id, OperatorId};
use crate::network::{GridState, ZoneId};

/// Critical network element monitored under a given state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowCnec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_element: String,
    #[serde(default)]
    pub operator: Option<OperatorId>,
    /// Lower flow bound in MW
    #[serde(default)]
    pub lower_bound: Option<f64>,
    /// Upper flow bound in MW
    #[serde(default)]
    pub upper_bound: Option<f64>,
    #[serde(default = "default_true")]
    pub optimized: bool,
    #[serde(default)]
    pub monitored: bool,
}

fn default_true() -> bool {
    true
}

identified_by_id!(FlowCnec);

impl FlowCnec {
    pub fn new(id: impl Into<String>, network_element: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            network_element: network_element.into(),
            operator: None,
            lower_bound: None,
            upper_bound: None,
            optimized: true,
            monitored: false,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<OperatorId>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_lower_bound(mut self, bound: f64) -> Self {
        self.lower_bound = Some(bound);
        self
    }

    pub fn with_upper_bound(mut self, bound: f64) -> Self {
        self.upper_bound = Some(bound);
        self
    }

    /// Monitored-only element: checked but not optimized
    pub fn monitored_only(mut self) -> Self {
        self.optimized = false;
        self.monitored = true;
        self
    }

    /// Distance to the closest bound, negative when the flow violates it
    pub fn margin(&self, flow: f64) -> f64 {
        let upper = self.upper_bound.map_or(f64::INFINITY, |bound| bound - flow);
        let lower = self.lower_bound.map_or(f64::INFINITY, |bound| flow - bound);
        upper.min(lower)
    }

    /// True when the upper bound is closer than the lower one
    pub fn is_upper_side_limiting(&self, flow: f64) -> bool {
        let upper = self.upper_bound.map_or(f64::INFINITY, |bound| bound - flow);
        let lower = self.lower_bound.map_or(f64::INFINITY, |bound| flow - bound);
        upper <= lower
    }

    pub fn location<'a>(&self, grid: &'a GridState) -> Option<&'a ZoneId> {
        grid.zone_of(&self.network_element)
    }
}
