//! Collaborators the search tree delegates to.
//!
//! Implementations are shared between the worker threads of a depth, so
//! every trait requires `Send + Sync` and takes `&self`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gt_types::{
    ComputationStatus, FlowResult, GridState, LinearOptimizationResult, ObjectiveFunctionResult,
    OptimizerParameters, RangeAction, RaoResult, SensitivityResult, State,
};

/// Computes flows and sensitivities on a grid snapshot.
pub trait SensitivityEngine: Send + Sync {
    fn compute(&self, grid: &GridState) -> RaoResult<SensitivityResult>;
}

/// Turns flows into a cost, lower is better.
pub trait ObjectiveFunction: Send + Sync {
    fn evaluate(&self, flows: &FlowResult, status: ComputationStatus) -> ObjectiveFunctionResult;
}

/// Everything the linear optimizer needs to optimize one leaf.
pub struct LinearOptimizationInput<'a> {
    pub state: &'a State,
    /// Grid with the leaf's network actions and starting setpoints applied
    pub grid: &'a mut GridState,
    pub range_actions: &'a BTreeSet<Arc<RangeAction>>,
    pub pre_perimeter_setpoints: &'a BTreeMap<String, f64>,
    pub initial_setpoints: &'a BTreeMap<String, f64>,
    pub pre_optim_sensitivity: &'a SensitivityResult,
    pub pre_optim_objective: &'a ObjectiveFunctionResult,
    pub objective_function: &'a dyn ObjectiveFunction,
    pub sensitivity_engine: &'a dyn SensitivityEngine,
    pub parameters: &'a OptimizerParameters,
}

/// Optimizes range action setpoints around a leaf.
///
/// Never fails: when no improvement can be computed the optimizer reports a
/// `Fallback` status with the starting point.
pub trait LinearOptimizer: Send + Sync {
    fn optimize(&self, input: LinearOptimizationInput<'_>) -> LinearOptimizationResult;
}
