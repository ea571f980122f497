use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use gt_search::{LinearOptimizationInput, LinearOptimizer};
use gt_types::{
    FlowResult, LinearOptimizationResult, LinearOptimizationStatus, RangeAction, SensitivityResult,
};

/// Number of steps covering the range of an action without taps
const CONTINUOUS_STEPS: f64 = 20.0;
const COST_IMPROVEMENT_EPSILON: f64 = 1e-9;

/// Coordinate descent on range action setpoints.
///
/// Each iteration moves every range action by one step in the direction the
/// linearized flows predict to be cheaper. The chosen setpoints are checked
/// with a real sensitivity computation; if that fails or costs more than the
/// starting point the optimizer falls back to the starting point.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySetpointOptimizer;

impl GreedySetpointOptimizer {
    pub fn new() -> Self {
        Self
    }

    fn step(range_action: &RangeAction) -> f64 {
        range_action.setpoint_per_tap.unwrap_or_else(|| {
            (range_action.max_setpoint - range_action.min_setpoint) / CONTINUOUS_STEPS
        })
    }

    /// Flows predicted from the starting point with the sensitivities
    fn predicted_flows(
        start: &SensitivityResult,
        initial: &BTreeMap<String, f64>,
        setpoints: &BTreeMap<String, f64>,
    ) -> FlowResult {
        let mut flows = start.flows.clone();
        for (cnec_id, flow) in flows.flows.iter_mut() {
            let Some(per_action) = start.sensitivities.get(cnec_id) else {
                continue;
            };
            for (range_action_id, setpoint) in setpoints {
                let sensitivity = per_action.get(range_action_id).copied().unwrap_or(0.0);
                let reference = initial.get(range_action_id).copied().unwrap_or(*setpoint);
                *flow += sensitivity * (setpoint - reference);
            }
        }
        flows
    }

    fn fallback(
        input: &mut LinearOptimizationInput<'_>,
        initial: &BTreeMap<String, f64>,
        iterations: usize,
    ) -> LinearOptimizationResult {
        for range_action in input.range_actions {
            if let Some(setpoint) = initial.get(&range_action.id) {
                input.grid.set_setpoint(range_action, *setpoint);
            }
        }
        LinearOptimizationResult {
            status: LinearOptimizationStatus::Fallback,
            sensitivity: input.pre_optim_sensitivity.clone(),
            objective: input.pre_optim_objective.clone(),
            setpoints: initial.clone(),
            iterations,
        }
    }
}

impl LinearOptimizer for GreedySetpointOptimizer {
    fn optimize(&self, mut input: LinearOptimizationInput<'_>) -> LinearOptimizationResult {
        let all_range_actions = input.range_actions;
        let range_actions: Vec<&Arc<RangeAction>> = all_range_actions.iter().collect();
        let initial: BTreeMap<String, f64> = range_actions
            .iter()
            .map(|range_action| {
                let setpoint = input
                    .initial_setpoints
                    .get(&range_action.id)
                    .or_else(|| input.pre_perimeter_setpoints.get(&range_action.id))
                    .copied()
                    .or_else(|| input.grid.setpoint(&range_action.id))
                    .unwrap_or(0.0);
                (range_action.id.clone(), setpoint)
            })
            .collect();

        let status = input.pre_optim_sensitivity.status;
        let start_cost = input.pre_optim_objective.cost();
        let mut setpoints = initial.clone();
        let mut best_cost = start_cost;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < input.parameters.max_number_of_iterations {
            iterations += 1;
            let mut improved = false;
            for range_action in &range_actions {
                let current = setpoints.get(&range_action.id).copied().unwrap_or(0.0);
                let step = Self::step(range_action);
                for direction in [1.0, -1.0] {
                    let candidate = range_action.clamp_setpoint(current + direction * step);
                    if (candidate - current).abs() < input.parameters.setpoint_tolerance {
                        continue;
                    }
                    let mut trial = setpoints.clone();
                    trial.insert(range_action.id.clone(), candidate);
                    let flows = Self::predicted_flows(input.pre_optim_sensitivity, &initial, &trial);
                    let cost = input.objective_function.evaluate(&flows, status).cost();
                    if cost < best_cost - COST_IMPROVEMENT_EPSILON {
                        best_cost = cost;
                        setpoints = trial;
                        improved = true;
                        break;
                    }
                }
            }
            if !improved {
                converged = true;
                break;
            }
        }

        for range_action in &range_actions {
            if let Some(setpoint) = setpoints.get(&range_action.id) {
                input.grid.set_setpoint(range_action, *setpoint);
            }
        }
        let sensitivity = match input.sensitivity_engine.compute(input.grid) {
            Ok(sensitivity) => sensitivity,
            Err(e) => {
                warn!("Sensitivity computation failed on optimized setpoints: {}", e);
                return Self::fallback(&mut input, &initial, iterations);
            }
        };
        let objective = input
            .objective_function
            .evaluate(&sensitivity.flows, sensitivity.status);
        if objective.cost() > start_cost {
            debug!(
                "Optimized setpoints cost {:.2} instead of {:.2}, keeping the starting point",
                objective.cost(),
                start_cost
            );
            return Self::fallback(&mut input, &initial, iterations);
        }

        LinearOptimizationResult {
            status: if converged {
                LinearOptimizationStatus::Optimal
            } else {
                LinearOptimizationStatus::MaxIterationsReached
            },
            sensitivity,
            objective,
            setpoints,
            iterations,
        }
    }
}
