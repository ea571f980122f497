use serde::{Deserialize, Serialize};
use std::sync::Arc;

use gt_search::ObjectiveFunction;
use gt_types::{ComputationStatus, FlowCnec, FlowResult, ObjectiveFunctionResult};

pub const MNEC_VIOLATION: &str = "mnec-violation";
pub const SENSITIVITY_FAILURE: &str = "sensitivity-failure";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinMarginConfig {
    /// Cost per MW of violation on a monitored-only element
    pub mnec_violation_cost: f64,
    /// Flat cost added when the load flow reports a failure
    pub sensitivity_failure_cost: f64,
}

impl Default for MinMarginConfig {
    fn default() -> Self {
        Self {
            mnec_violation_cost: 10.0,
            sensitivity_failure_cost: 1e4,
        }
    }
}

/// Maximizes the smallest margin of the optimized elements.
///
/// The functional cost is the opposite of the minimum margin, so a secure
/// network has a negative cost. Monitored-only elements only contribute
/// through the `mnec-violation` virtual cost.
#[derive(Debug, Clone)]
pub struct MinMarginObjective {
    optimized: Vec<Arc<FlowCnec>>,
    monitored: Vec<Arc<FlowCnec>>,
    config: MinMarginConfig,
}

impl MinMarginObjective {
    pub fn new(cnecs: &[Arc<FlowCnec>], config: MinMarginConfig) -> Self {
        let (optimized, monitored): (Vec<_>, Vec<_>) = cnecs.iter().cloned().partition(|cnec| cnec.optimized);
        Self {
            optimized,
            monitored,
            config,
        }
    }
}

impl ObjectiveFunction for MinMarginObjective {
    fn evaluate(&self, flows: &FlowResult, status: ComputationStatus) -> ObjectiveFunctionResult {
        let mut margins: Vec<(f64, Arc<FlowCnec>)> = self
            .optimized
            .iter()
            .filter_map(|cnec| {
                let margin = flows.margin(cnec).ok()?;
                margin.is_finite().then(|| (margin, cnec.clone()))
            })
            .collect();
        margins.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let functional_cost = margins.first().map_or(0.0, |(margin, _)| -margin);
        let mut result = ObjectiveFunctionResult::new(functional_cost)
            .with_most_limiting_elements(margins.into_iter().map(|(_, cnec)| cnec).collect());

        if !self.monitored.is_empty() {
            let mut violations: Vec<(f64, Arc<FlowCnec>)> = self
                .monitored
                .iter()
                .filter_map(|cnec| {
                    let margin = flows.margin(cnec).ok()?;
                    (margin < 0.0).then(|| (-margin, cnec.clone()))
                })
                .collect();
            violations.sort_by(|a, b| b.0.total_cmp(&a.0));
            let cost = self.config.mnec_violation_cost
                * violations.iter().map(|(violation, _)| violation).sum::<f64>();
            result = result.with_virtual_cost(
                MNEC_VIOLATION,
                cost,
                violations.into_iter().map(|(_, cnec)| cnec).collect(),
            );
        }

        if status == ComputationStatus::Failure {
            result = result.with_virtual_cost(
                SENSITIVITY_FAILURE,
                self.config.sensitivity_failure_cost,
                Vec::new(),
            );
        }
        result
    }
}
