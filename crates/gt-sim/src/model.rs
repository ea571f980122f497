use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use gt_search::SensitivityEngine;
use gt_types::{ComputationStatus, FlowResult, GridState, RaoError, RaoResult, SensitivityResult};

/// Linearized grid: flows are a base value plus the impact of each applied
/// network action plus sensitivity times setpoint shift for each range action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearModelConfig {
    /// cnec id -> flow in the base situation
    pub base_flows: BTreeMap<String, f64>,
    /// cnec id -> commercial flow, independent of remedial actions
    pub commercial_flows: BTreeMap<String, f64>,
    /// cnec id -> sum of absolute zonal PTDFs
    pub ptdf_zonal_sums: BTreeMap<String, f64>,
    /// network action id -> cnec id -> flow change when applied
    pub network_action_impacts: BTreeMap<String, BTreeMap<String, f64>>,
    /// cnec id -> range action id -> MW per setpoint unit
    pub sensitivities: BTreeMap<String, BTreeMap<String, f64>>,
    /// range action id -> setpoint at which `base_flows` hold
    pub reference_setpoints: BTreeMap<String, f64>,
    /// Network actions whose application makes the load flow diverge
    pub diverging_actions: BTreeSet<String>,
    /// Network actions whose application makes the load flow partially fail
    pub partially_failing_actions: BTreeSet<String>,
}

/// Counters of the computations run on a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    pub computations: usize,
    pub failures: usize,
}

#[derive(Debug)]
pub struct LinearSensitivityModel {
    config: LinearModelConfig,
    stats: Mutex<ModelStats>,
}

impl LinearSensitivityModel {
    pub fn new(config: LinearModelConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(ModelStats::default()),
        }
    }

    pub fn config(&self) -> &LinearModelConfig {
        &self.config
    }

    pub fn stats(&self) -> ModelStats {
        *self.stats.lock()
    }

    fn flow_on(&self, cnec_id: &str, base_flow: f64, grid: &GridState) -> f64 {
        let topology: f64 = grid
            .applied_network_actions
            .iter()
            .filter_map(|action| self.config.network_action_impacts.get(action))
            .filter_map(|impacts| impacts.get(cnec_id))
            .sum();
        let range_actions: f64 = self
            .config
            .sensitivities
            .get(cnec_id)
            .map(|per_action| {
                per_action
                    .iter()
                    .map(|(range_action, sensitivity)| {
                        let reference = self
                            .config
                            .reference_setpoints
                            .get(range_action)
                            .copied()
                            .unwrap_or(0.0);
                        let setpoint = grid.setpoint(range_action).unwrap_or(reference);
                        sensitivity * (setpoint - reference)
                    })
                    .sum()
            })
            .unwrap_or(0.0);
        base_flow + topology + range_actions
    }
}

impl SensitivityEngine for LinearSensitivityModel {
    fn compute(&self, grid: &GridState) -> RaoResult<SensitivityResult> {
        self.stats.lock().computations += 1;

        if let Some(action) = grid
            .applied_network_actions
            .iter()
            .find(|action| self.config.diverging_actions.contains(*action))
        {
            self.stats.lock().failures += 1;
            warn!(variant = %grid.variant_id, "Load flow diverged with {} applied", action);
            return Err(RaoError::Sensitivity {
                message: format!("load flow diverged on {} with {}", grid.variant_id, action),
            });
        }

        let status = if grid
            .applied_network_actions
            .iter()
            .any(|action| self.config.partially_failing_actions.contains(action))
        {
            ComputationStatus::PartialFailure
        } else {
            ComputationStatus::Default
        };

        let mut flows = FlowResult::default();
        for (cnec_id, base_flow) in &self.config.base_flows {
            flows
                .flows
                .insert(cnec_id.clone(), self.flow_on(cnec_id, *base_flow, grid));
            if let Some(commercial) = self.config.commercial_flows.get(cnec_id) {
                flows.commercial_flows.insert(cnec_id.clone(), *commercial);
            }
            if let Some(ptdf) = self.config.ptdf_zonal_sums.get(cnec_id) {
                flows.ptdf_zonal_sums.insert(cnec_id.clone(), *ptdf);
            }
        }
        debug!(
            variant = %grid.variant_id,
            "Computed flows on {} elements with {} network actions applied",
            flows.flows.len(),
            grid.applied_network_actions.len()
        );

        let mut result = SensitivityResult::new(status, flows);
        result.sensitivities = self.config.sensitivities.clone();
        Ok(result)
    }
}
