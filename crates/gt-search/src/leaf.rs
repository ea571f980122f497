//! One node of the search tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use gt_types::{
    ActionCombination, ComputationStatus, FlowCnec, FlowResult, GridState, LinearOptimizationResult,
    NetworkAction, ObjectiveFunctionResult, OperatorId, OptimizerParameters, RangeAction, RaoError,
    RaoResult, SensitivityResult, State, TreeParameters,
};

use crate::range_action_filter::RangeActionFilter;
use crate::traits::{LinearOptimizationInput, LinearOptimizer, ObjectiveFunction, SensitivityEngine};

/// Setpoint difference above which a range action counts as used
pub const RANGE_ACTION_USED_TOLERANCE: f64 = 1e-6;

/// Index of a leaf in the search tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId(pub usize);

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a leaf. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafStatus {
    Created,
    Evaluated,
    Optimized,
    Error,
}

/// What a call to [`Leaf::evaluate`] did
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Evaluated,
    AlreadyEvaluated,
    Failed { reason: String },
}

/// Why [`Leaf::optimize`] left a leaf untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotEvaluated,
    EvaluationFailed,
}

/// What a call to [`Leaf::optimize`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationOutcome {
    Optimized,
    /// No range action survived filtering, the evaluation results stand.
    NothingToOptimize,
    Skipped(SkipReason),
}

/// Shared, read-only inputs of a leaf optimization.
#[derive(Clone, Copy)]
pub struct OptimizationContext<'a> {
    pub state: &'a State,
    pub range_actions: &'a BTreeSet<Arc<RangeAction>>,
    pub cnecs: &'a [Arc<FlowCnec>],
    pub pre_perimeter_setpoints: &'a BTreeMap<String, f64>,
    pub tree_parameters: &'a TreeParameters,
    pub optimizer_parameters: &'a OptimizerParameters,
    pub objective_function: &'a dyn ObjectiveFunction,
    pub sensitivity_engine: &'a dyn SensitivityEngine,
    pub linear_optimizer: &'a dyn LinearOptimizer,
}

/// A set of activated network actions with its evaluation and
/// optimization results.
///
/// Result getters read the linear optimization result once the leaf is
/// optimized, the evaluation result before that, and fail while no
/// evaluation succeeded.
#[derive(Debug, Clone)]
pub struct Leaf {
    id: LeafId,
    parent: Option<LeafId>,
    combination: Option<ActionCombination>,
    network_actions: BTreeSet<Arc<NetworkAction>>,
    /// Setpoints the leaf starts from, inherited from its parent
    initial_setpoints: BTreeMap<String, f64>,
    /// Range actions handed to the optimizer by this leaf or its ancestors
    tried_range_actions: BTreeSet<String>,
    status: LeafStatus,
    pre_optim_sensitivity: Option<SensitivityResult>,
    pre_optim_objective: Option<ObjectiveFunctionResult>,
    post_optim: Option<LinearOptimizationResult>,
    optimized_range_actions: BTreeSet<Arc<RangeAction>>,
    optimization_data_present: bool,
    sensitivities_released: bool,
}

impl Leaf {
    pub fn root(id: LeafId, initial_setpoints: BTreeMap<String, f64>) -> Self {
        Self {
            id,
            parent: None,
            combination: None,
            network_actions: BTreeSet::new(),
            initial_setpoints,
            tried_range_actions: BTreeSet::new(),
            status: LeafStatus::Created,
            pre_optim_sensitivity: None,
            pre_optim_objective: None,
            post_optim: None,
            optimized_range_actions: BTreeSet::new(),
            optimization_data_present: true,
            sensitivities_released: false,
        }
    }

    /// Child of `parent` activating `combination` on top of the parent's actions.
    ///
    /// The child starts from the parent's optimized setpoints when available.
    pub fn child(id: LeafId, parent: &Leaf, combination: ActionCombination) -> Self {
        let mut network_actions = parent.network_actions.clone();
        network_actions.extend(combination.members().iter().cloned());
        let initial_setpoints = parent
            .optimized_setpoints()
            .unwrap_or_else(|_| parent.initial_setpoints.clone());
        let mut tried_range_actions = parent.tried_range_actions.clone();
        tried_range_actions.extend(
            parent
                .optimized_range_actions
                .iter()
                .map(|range_action| range_action.id.clone()),
        );
        Self {
            id,
            parent: Some(parent.id),
            combination: Some(combination),
            network_actions,
            initial_setpoints,
            tried_range_actions,
            status: LeafStatus::Created,
            pre_optim_sensitivity: None,
            pre_optim_objective: None,
            post_optim: None,
            optimized_range_actions: BTreeSet::new(),
            optimization_data_present: true,
            sensitivities_released: false,
        }
    }

    pub fn id(&self) -> LeafId {
        self.id
    }

    pub fn parent(&self) -> Option<LeafId> {
        self.parent
    }

    pub fn combination(&self) -> Option<&ActionCombination> {
        self.combination.as_ref()
    }

    pub fn status(&self) -> LeafStatus {
        self.status
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none() && self.combination.is_none()
    }

    pub fn is_activated(&self, network_action: &NetworkAction) -> bool {
        self.network_actions.contains(network_action)
    }

    pub fn activated_network_actions(&self) -> &BTreeSet<Arc<NetworkAction>> {
        &self.network_actions
    }

    pub fn is_finalized(&self) -> bool {
        !self.optimization_data_present
    }

    pub fn tried_range_actions(&self) -> &BTreeSet<String> {
        &self.tried_range_actions
    }

    pub fn identifier(&self) -> String {
        if self.is_root() {
            "Root leaf".to_string()
        } else {
            let names: Vec<&str> = self
                .network_actions
                .iter()
                .map(|action| action.name.as_str())
                .collect();
            format!("network action(s): {}", names.join(", "))
        }
    }

    fn no_results(&self) -> RaoError {
        RaoError::NoResultsAvailable {
            leaf: self.identifier(),
        }
    }

    /// Applies the leaf's network actions and starting setpoints.
    fn prepare_grid(&self, grid: &mut GridState) {
        for action in &self.network_actions {
            grid.apply_network_action(action);
        }
        grid.setpoints.extend(
            self.initial_setpoints
                .iter()
                .map(|(id, setpoint)| (id.clone(), *setpoint)),
        );
    }

    /// Runs the sensitivity computation once and stores the leaf cost.
    pub fn evaluate(
        &mut self,
        grid: &mut GridState,
        objective_function: &dyn ObjectiveFunction,
        sensitivity_engine: &dyn SensitivityEngine,
    ) -> EvaluationOutcome {
        match self.status {
            LeafStatus::Evaluated | LeafStatus::Optimized => {
                debug!(leaf = %self.id, "Leaf has already been evaluated");
                return EvaluationOutcome::AlreadyEvaluated;
            }
            LeafStatus::Error => {
                return EvaluationOutcome::Failed {
                    reason: "a previous evaluation failed".to_string(),
                };
            }
            LeafStatus::Created => {}
        }

        debug!(leaf = %self.id, "Evaluating {}", self.identifier());
        self.prepare_grid(grid);
        let sensitivity = match sensitivity_engine.compute(grid) {
            Ok(result) if result.status == ComputationStatus::Failure => {
                Err("sensitivity analysis failed".to_string())
            }
            Ok(result) => Ok(result),
            Err(e) => Err(e.to_string()),
        };
        match sensitivity {
            Ok(result) => {
                let objective = objective_function.evaluate(&result.flows, result.status);
                self.pre_optim_sensitivity = Some(result);
                self.pre_optim_objective = Some(objective);
                self.status = LeafStatus::Evaluated;
                EvaluationOutcome::Evaluated
            }
            Err(reason) => {
                warn!(leaf = %self.id, "Failed to evaluate {}: {}", self.identifier(), reason);
                self.status = LeafStatus::Error;
                EvaluationOutcome::Failed { reason }
            }
        }
    }

    /// Optimizes the filtered range actions around the evaluated leaf.
    ///
    /// Fails only once the leaf has been finalized. A leaf without a
    /// successful evaluation is skipped.
    pub fn optimize(
        &mut self,
        grid: &mut GridState,
        context: &OptimizationContext<'_>,
    ) -> RaoResult<OptimizationOutcome> {
        if !self.optimization_data_present {
            return Err(RaoError::LeafFinalized {
                leaf: self.identifier(),
            });
        }
        match self.status {
            LeafStatus::Created => {
                warn!(
                    leaf = %self.id,
                    "Impossible to optimize {} because evaluation has not been performed",
                    self.identifier()
                );
                return Ok(OptimizationOutcome::Skipped(SkipReason::NotEvaluated));
            }
            LeafStatus::Error => {
                warn!(
                    leaf = %self.id,
                    "Impossible to optimize {} because evaluation failed",
                    self.identifier()
                );
                return Ok(OptimizationOutcome::Skipped(SkipReason::EvaluationFailed));
            }
            LeafStatus::Evaluated | LeafStatus::Optimized => {}
        }

        // A second optimization starts over from the evaluation results.
        self.post_optim = None;
        self.optimized_range_actions.clear();

        let range_actions = RangeActionFilter::new(
            self,
            context.range_actions,
            context.state,
            context.tree_parameters,
            context.pre_perimeter_setpoints,
            context.cnecs,
            grid,
        )?
        .range_actions_to_optimize();

        if range_actions.is_empty() {
            info!(leaf = %self.id, "No range actions to optimize");
            self.status = LeafStatus::Optimized;
            return Ok(OptimizationOutcome::NothingToOptimize);
        }

        debug!(leaf = %self.id, "Optimizing {} range actions", range_actions.len());
        self.prepare_grid(grid);
        let (pre_optim_sensitivity, pre_optim_objective) = match (
            &self.pre_optim_sensitivity,
            &self.pre_optim_objective,
        ) {
            (Some(sensitivity), Some(objective)) => (sensitivity, objective),
            _ => return Err(self.no_results()),
        };
        let result = context.linear_optimizer.optimize(LinearOptimizationInput {
            state: context.state,
            grid,
            range_actions: &range_actions,
            pre_perimeter_setpoints: context.pre_perimeter_setpoints,
            initial_setpoints: &self.initial_setpoints,
            pre_optim_sensitivity,
            pre_optim_objective,
            objective_function: context.objective_function,
            sensitivity_engine: context.sensitivity_engine,
            parameters: context.optimizer_parameters,
        });
        debug!(
            leaf = %self.id,
            status = ?result.status,
            iterations = result.iterations,
            "Linear optimization finished with cost {:.2}",
            result.cost()
        );

        self.tried_range_actions
            .extend(range_actions.iter().map(|range_action| range_action.id.clone()));
        self.optimized_range_actions = range_actions;
        self.post_optim = Some(result);
        self.status = LeafStatus::Optimized;
        Ok(OptimizationOutcome::Optimized)
    }

    /// Forbids further optimization and drops data only needed for it.
    pub fn finalize_optimization(&mut self) {
        if self.post_optim.is_some() {
            self.pre_optim_sensitivity = None;
        }
        self.optimization_data_present = false;
    }

    /// Drops the sensitivity coefficients of a leaf that will not be
    /// expanded again. Costs and flows stay readable.
    pub fn release_sensitivities(&mut self) {
        self.finalize_optimization();
        if let Some(sensitivity) = self.pre_optim_sensitivity.as_mut() {
            sensitivity.sensitivities.clear();
        }
        if let Some(result) = self.post_optim.as_mut() {
            result.sensitivity.sensitivities.clear();
        }
        self.sensitivities_released = true;
    }

    pub fn are_sensitivities_released(&self) -> bool {
        self.sensitivities_released
    }

    fn objective(&self) -> RaoResult<&ObjectiveFunctionResult> {
        match (&self.post_optim, self.status) {
            (Some(result), _) => Ok(&result.objective),
            (None, LeafStatus::Evaluated | LeafStatus::Optimized) => {
                self.pre_optim_objective.as_ref().ok_or_else(|| self.no_results())
            }
            _ => Err(self.no_results()),
        }
    }

    fn sensitivity(&self) -> RaoResult<&SensitivityResult> {
        match (&self.post_optim, self.status) {
            (Some(result), _) => Ok(&result.sensitivity),
            (None, LeafStatus::Evaluated | LeafStatus::Optimized) => {
                self.pre_optim_sensitivity.as_ref().ok_or_else(|| self.no_results())
            }
            _ => Err(self.no_results()),
        }
    }

    pub fn cost(&self) -> RaoResult<f64> {
        Ok(self.objective()?.cost())
    }

    pub fn functional_cost(&self) -> RaoResult<f64> {
        Ok(self.objective()?.functional_cost)
    }

    pub fn virtual_cost(&self) -> RaoResult<f64> {
        Ok(self.objective()?.virtual_cost())
    }

    pub fn virtual_cost_named(&self, name: &str) -> RaoResult<f64> {
        Ok(self.objective()?.virtual_cost_named(name))
    }

    pub fn virtual_cost_names(&self) -> RaoResult<Vec<String>> {
        Ok(self.objective()?.virtual_cost_names().map(str::to_string).collect())
    }

    pub fn most_limiting_elements(&self, count: usize) -> RaoResult<Vec<Arc<FlowCnec>>> {
        Ok(self.objective()?.most_limiting_elements(count))
    }

    pub fn costly_elements(&self, name: &str, count: usize) -> RaoResult<Vec<Arc<FlowCnec>>> {
        Ok(self.objective()?.costly_elements(name, count))
    }

    pub fn flows(&self) -> RaoResult<&FlowResult> {
        Ok(&self.sensitivity()?.flows)
    }

    pub fn flow(&self, cnec: &FlowCnec) -> RaoResult<f64> {
        self.flows()?.flow(cnec)
    }

    pub fn margin(&self, cnec: &FlowCnec) -> RaoResult<f64> {
        self.flows()?.margin(cnec)
    }

    pub fn commercial_flow(&self, cnec: &FlowCnec) -> RaoResult<f64> {
        self.flows()?.commercial_flow(cnec)
    }

    pub fn ptdf_zonal_sum(&self, cnec: &FlowCnec) -> RaoResult<f64> {
        self.flows()?.ptdf_zonal_sum(cnec)
    }

    pub fn ptdf_zonal_sums(&self) -> RaoResult<&BTreeMap<String, f64>> {
        Ok(&self.flows()?.ptdf_zonal_sums)
    }

    pub fn sensitivity_value(&self, cnec: &FlowCnec, range_action: &RangeAction) -> RaoResult<f64> {
        let sensitivity = self.sensitivity()?;
        if self.sensitivities_released {
            return Err(RaoError::SensitivitiesReleased {
                leaf: self.identifier(),
            });
        }
        Ok(sensitivity.sensitivity_value(cnec, range_action))
    }

    pub fn sensitivity_status(&self) -> RaoResult<ComputationStatus> {
        Ok(self.sensitivity()?.status)
    }

    /// Ids of the range actions with a known setpoint on this leaf
    pub fn range_actions(&self) -> RaoResult<BTreeSet<String>> {
        Ok(self.optimized_setpoints()?.into_keys().collect())
    }

    /// Range actions handed to the optimizer by the last optimization
    pub fn optimized_range_actions(&self) -> &BTreeSet<Arc<RangeAction>> {
        &self.optimized_range_actions
    }

    pub fn optimized_setpoints(&self) -> RaoResult<BTreeMap<String, f64>> {
        if !matches!(self.status, LeafStatus::Evaluated | LeafStatus::Optimized) {
            return Err(self.no_results());
        }
        let mut setpoints = self.initial_setpoints.clone();
        if let Some(result) = &self.post_optim {
            setpoints.extend(result.setpoints.iter().map(|(id, value)| (id.clone(), *value)));
        }
        Ok(setpoints)
    }

    pub fn optimized_setpoint(&self, range_action: &RangeAction) -> RaoResult<f64> {
        if !matches!(self.status, LeafStatus::Evaluated | LeafStatus::Optimized) {
            return Err(self.no_results());
        }
        self.post_optim
            .as_ref()
            .and_then(|result| result.setpoints.get(&range_action.id))
            .or_else(|| self.initial_setpoints.get(&range_action.id))
            .copied()
            .ok_or_else(|| RaoError::unknown("range action", range_action.id.clone()))
    }

    /// Tap of a tap-based range action, `None` for other kinds
    pub fn optimized_tap(&self, range_action: &RangeAction) -> RaoResult<Option<i32>> {
        let setpoint = self.optimized_setpoint(range_action)?;
        Ok(range_action.setpoint_to_tap(setpoint))
    }

    pub fn optimized_taps(
        &self,
        range_actions: &BTreeSet<Arc<RangeAction>>,
    ) -> RaoResult<BTreeMap<String, i32>> {
        let mut taps = BTreeMap::new();
        for range_action in range_actions {
            if let Some(tap) = self.optimized_tap(range_action)? {
                taps.insert(range_action.id.clone(), tap);
            }
        }
        Ok(taps)
    }

    pub fn is_range_action_used(
        &self,
        range_action: &RangeAction,
        pre_perimeter_setpoints: &BTreeMap<String, f64>,
    ) -> RaoResult<bool> {
        let Some(reference) = pre_perimeter_setpoints.get(&range_action.id) else {
            return Ok(false);
        };
        match self.optimized_setpoint(range_action) {
            Ok(setpoint) => Ok((setpoint - reference).abs() >= RANGE_ACTION_USED_TOLERANCE),
            Err(RaoError::UnknownElement { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Range actions whose setpoint diverges from the pre-perimeter one
    pub fn activated_range_actions(
        &self,
        range_actions: &BTreeSet<Arc<RangeAction>>,
        pre_perimeter_setpoints: &BTreeMap<String, f64>,
    ) -> RaoResult<Vec<Arc<RangeAction>>> {
        let mut activated = Vec::new();
        for range_action in range_actions {
            if self.is_range_action_used(range_action, pre_perimeter_setpoints)? {
                activated.push(range_action.clone());
            }
        }
        Ok(activated)
    }

    pub fn activated_network_actions_per_operator(&self) -> BTreeMap<OperatorId, usize> {
        let mut counts = BTreeMap::new();
        for operator in self
            .network_actions
            .iter()
            .filter_map(|action| action.operator.as_ref())
        {
            *counts.entry(operator.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())?;
        match self.objective() {
            Ok(objective) => write!(
                f,
                ", cost: {:.2} (functional: {:.2}, virtual: {:.2})",
                objective.cost(),
                objective.functional_cost,
                objective.virtual_cost()
            ),
            Err(_) => write!(f, ", status: {:?}", self.status),
        }
    }
}

/// Owns every leaf of a search. Parents are referenced by [`LeafId`].
#[derive(Debug, Default)]
pub struct LeafArena {
    leaves: Vec<Leaf>,
}

impl LeafArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_root(&mut self, initial_setpoints: BTreeMap<String, f64>) -> LeafId {
        let id = LeafId(self.leaves.len());
        self.leaves.push(Leaf::root(id, initial_setpoints));
        id
    }

    /// Creates one child of `parent` per combination and returns the id of the first.
    pub fn push_children(
        &mut self,
        parent: LeafId,
        combinations: impl IntoIterator<Item = ActionCombination>,
    ) -> LeafId {
        let first = LeafId(self.leaves.len());
        let children: Vec<Leaf> = combinations
            .into_iter()
            .enumerate()
            .map(|(offset, combination)| {
                Leaf::child(LeafId(first.0 + offset), &self.leaves[parent.0], combination)
            })
            .collect();
        self.leaves.extend(children);
        first
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn get(&self, id: LeafId) -> &Leaf {
        &self.leaves[id.0]
    }

    pub fn get_mut(&mut self, id: LeafId) -> &mut Leaf {
        &mut self.leaves[id.0]
    }

    /// Leaves created from `first` onwards
    pub fn leaves_from_mut(&mut self, first: LeafId) -> &mut [Leaf] {
        &mut self.leaves[first.0..]
    }

    /// Ids from `leaf` up to the root
    pub fn ancestry(&self, leaf: LeafId) -> Vec<LeafId> {
        let mut path = vec![leaf];
        let mut current = self.get(leaf).parent();
        while let Some(parent) = current {
            path.push(parent);
            current = self.get(parent).parent();
        }
        path
    }

    pub fn into_leaf(mut self, id: LeafId) -> Leaf {
        self.leaves.swap_remove(id.0)
    }
}
