use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::actions::RangeAction;
use crate::cnec::FlowCnec;
use crate::errors::{RaoError, RaoResult};

/// Outcome of a sensitivity (load-flow) computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationStatus {
    #[default]
    Default,
    PartialFailure,
    Failure,
}

/// Flows on the critical elements, in MW
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    #[serde(default)]
    pub flows: BTreeMap<String, f64>,
    #[serde(default)]
    pub commercial_flows: BTreeMap<String, f64>,
    #[serde(default)]
    pub ptdf_zonal_sums: BTreeMap<String, f64>,
}

impl FlowResult {
    fn lookup(map: &BTreeMap<String, f64>, kind: &str, cnec: &FlowCnec) -> RaoResult<f64> {
        map.get(&cnec.id)
            .copied()
            .ok_or_else(|| RaoError::unknown(kind, cnec.id.clone()))
    }

    pub fn flow(&self, cnec: &FlowCnec) -> RaoResult<f64> {
        Self::lookup(&self.flows, "flow for cnec", cnec)
    }

    pub fn margin(&self, cnec: &FlowCnec) -> RaoResult<f64> {
        self.flow(cnec).map(|flow| cnec.margin(flow))
    }

    pub fn commercial_flow(&self, cnec: &FlowCnec) -> RaoResult<f64> {
        Self::lookup(&self.commercial_flows, "commercial flow for cnec", cnec)
    }

    pub fn ptdf_zonal_sum(&self, cnec: &FlowCnec) -> RaoResult<f64> {
        Self::lookup(&self.ptdf_zonal_sums, "ptdf zonal sum for cnec", cnec)
    }
}

/// Flows plus the sensitivity of each critical element to each range action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensitivityResult {
    pub status: ComputationStatus,
    pub flows: FlowResult,
    /// cnec id -> range action id -> MW per setpoint unit
    pub sensitivities: BTreeMap<String, BTreeMap<String, f64>>,
}

impl SensitivityResult {
    pub fn new(status: ComputationStatus, flows: FlowResult) -> Self {
        Self {
            status,
            flows,
            sensitivities: BTreeMap::new(),
        }
    }

    pub fn with_sensitivity(mut self, cnec_id: &str, range_action_id: &str, value: f64) -> Self {
        self.sensitivities
            .entry(cnec_id.to_string())
            .or_default()
            .insert(range_action_id.to_string(), value);
        self
    }

    /// Missing pairs have no influence
    pub fn sensitivity_value(&self, cnec: &FlowCnec, range_action: &RangeAction) -> f64 {
        self.sensitivities
            .get(&cnec.id)
            .and_then(|per_action| per_action.get(&range_action.id))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Cost of a grid situation as computed by the objective function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveFunctionResult {
    pub functional_cost: f64,
    pub virtual_costs: BTreeMap<String, f64>,
    /// Sorted from most to least limiting
    pub most_limiting_elements: Vec<Arc<FlowCnec>>,
    /// Per virtual cost name, sorted from costliest
    pub costly_elements: BTreeMap<String, Vec<Arc<FlowCnec>>>,
}

impl ObjectiveFunctionResult {
    pub fn new(functional_cost: f64) -> Self {
        Self {
            functional_cost,
            ..Default::default()
        }
    }

    pub fn with_virtual_cost(mut self, name: &str, cost: f64, elements: Vec<Arc<FlowCnec>>) -> Self {
        self.virtual_costs.insert(name.to_string(), cost);
        self.costly_elements.insert(name.to_string(), elements);
        self
    }

    pub fn with_most_limiting_elements(mut self, elements: Vec<Arc<FlowCnec>>) -> Self {
        self.most_limiting_elements = elements;
        self
    }

    pub fn cost(&self) -> f64 {
        self.functional_cost + self.virtual_cost()
    }

    pub fn virtual_cost(&self) -> f64 {
        self.virtual_costs.values().sum()
    }

    pub fn virtual_cost_named(&self, name: &str) -> f64 {
        self.virtual_costs.get(name).copied().unwrap_or(0.0)
    }

    pub fn virtual_cost_names(&self) -> impl Iterator<Item = &str> {
        self.virtual_costs.keys().map(String::as_str)
    }

    pub fn most_limiting_elements(&self, count: usize) -> Vec<Arc<FlowCnec>> {
        self.most_limiting_elements.iter().take(count).cloned().collect()
    }

    pub fn costly_elements(&self, name: &str, count: usize) -> Vec<Arc<FlowCnec>> {
        self.costly_elements
            .get(name)
            .map(|elements| elements.iter().take(count).cloned().collect())
            .unwrap_or_default()
    }
}

/// Termination status reported by the linear optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearOptimizationStatus {
    Optimal,
    MaxIterationsReached,
    /// The optimizer could not improve and returned its starting point
    Fallback,
}

/// Output of the iterative linear optimization of one leaf
#[derive(Debug, Clone)]
pub struct LinearOptimizationResult {
    pub status: LinearOptimizationStatus,
    pub sensitivity: SensitivityResult,
    pub objective: ObjectiveFunctionResult,
    /// range action id -> optimized setpoint
    pub setpoints: BTreeMap<String, f64>,
    pub iterations: usize,
}

impl LinearOptimizationResult {
    pub fn cost(&self) -> f64 {
        self.objective.cost()
    }
}
