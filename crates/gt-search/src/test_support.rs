//! Scripted collaborators shared by the unit tests of this crate.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gt_types::{
    ComputationStatus, FlowCnec, FlowResult, GridState, LinearOptimizationResult,
    LinearOptimizationStatus, NetworkAction, ObjectiveFunctionResult, OptimizerParameters,
    RangeAction, RangeActionKind, RaoError, RaoResult, SensitivityResult, State, TreeParameters,
};

use crate::leaf::{Leaf, LeafId, OptimizationContext};
use crate::traits::{LinearOptimizationInput, LinearOptimizer, ObjectiveFunction, SensitivityEngine};

pub(crate) fn network_action(id: &str, operator: &str) -> Arc<NetworkAction> {
    Arc::new(NetworkAction::new(
        id,
        Some(operator),
        vec![format!("{id}-element")],
    ))
}

/// PST with half-unit taps over [-10, 10]
pub(crate) fn pst(id: &str, operator: &str) -> Arc<RangeAction> {
    Arc::new(
        RangeAction::new(id, Some(operator), RangeActionKind::Pst, -10.0, 10.0)
            .with_setpoint_per_tap(0.5),
    )
}

/// Reports a flow on one CNEC chosen by the set of applied network actions.
pub(crate) struct ScriptedEngine {
    cnec_id: String,
    base_flow: f64,
    flows: Mutex<BTreeMap<BTreeSet<String>, f64>>,
    failing: Mutex<BTreeSet<String>>,
    failure_status: Mutex<bool>,
    sensitivities: Mutex<BTreeMap<String, f64>>,
    calls: Mutex<usize>,
}

impl ScriptedEngine {
    pub(crate) fn new(cnec_id: &str, base_flow: f64) -> Self {
        Self {
            cnec_id: cnec_id.to_string(),
            base_flow,
            flows: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(BTreeSet::new()),
            failure_status: Mutex::new(false),
            sensitivities: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(0),
        }
    }

    /// Flow reported when exactly `actions` are applied
    pub(crate) fn with_flow(&self, actions: &[&str], flow: f64) {
        let key = actions.iter().map(|id| id.to_string()).collect();
        self.flows.lock().insert(key, flow);
    }

    /// Any grid with one of `actions` applied makes the computation fail
    pub(crate) fn fail_on(&self, actions: &[&str]) {
        self.failing
            .lock()
            .extend(actions.iter().map(|id| id.to_string()));
    }

    pub(crate) fn report_failure_status(&self) {
        *self.failure_status.lock() = true;
    }

    pub(crate) fn with_sensitivity(&self, range_action_id: &str, value: f64) {
        self.sensitivities
            .lock()
            .insert(range_action_id.to_string(), value);
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl SensitivityEngine for ScriptedEngine {
    fn compute(&self, grid: &GridState) -> RaoResult<SensitivityResult> {
        *self.calls.lock() += 1;
        if grid
            .applied_network_actions
            .iter()
            .any(|id| self.failing.lock().contains(id))
        {
            return Err(RaoError::Sensitivity {
                message: format!("diverged on {}", grid.variant_id),
            });
        }
        let flow = self
            .flows
            .lock()
            .get(&grid.applied_network_actions)
            .copied()
            .unwrap_or(self.base_flow);
        let status = if *self.failure_status.lock() {
            ComputationStatus::Failure
        } else {
            ComputationStatus::Default
        };
        let mut flows = FlowResult::default();
        flows.flows.insert(self.cnec_id.clone(), flow);
        flows.commercial_flows.insert(self.cnec_id.clone(), flow / 2.0);
        flows.ptdf_zonal_sums.insert(self.cnec_id.clone(), 0.25);
        let mut result = SensitivityResult::new(status, flows);
        for (range_action_id, value) in self.sensitivities.lock().iter() {
            result = result.with_sensitivity(&self.cnec_id, range_action_id, *value);
        }
        Ok(result)
    }
}

/// Cost is the flow on one CNEC.
pub(crate) struct FlowObjective {
    pub(crate) cnec: Arc<FlowCnec>,
    pub(crate) virtual_cost: Mutex<f64>,
}

impl FlowObjective {
    pub(crate) fn new(cnec: Arc<FlowCnec>) -> Self {
        Self {
            cnec,
            virtual_cost: Mutex::new(0.0),
        }
    }
}

impl ObjectiveFunction for FlowObjective {
    fn evaluate(&self, flows: &FlowResult, _status: ComputationStatus) -> ObjectiveFunctionResult {
        let functional_cost = flows.flow(&self.cnec).unwrap_or(0.0);
        let mut result = ObjectiveFunctionResult::new(functional_cost)
            .with_most_limiting_elements(vec![self.cnec.clone()]);
        let virtual_cost = *self.virtual_cost.lock();
        if virtual_cost > 0.0 {
            result = result.with_virtual_cost("overload", virtual_cost, vec![self.cnec.clone()]);
        }
        result
    }
}

/// Moves every range action to a fixed setpoint and lowers the cost by `gain`.
pub(crate) struct ScriptedOptimizer {
    gain: f64,
    target_setpoint: f64,
    last_status: Mutex<Option<LinearOptimizationStatus>>,
}

impl ScriptedOptimizer {
    pub(crate) fn new(gain: f64, target_setpoint: f64) -> Self {
        Self {
            gain,
            target_setpoint,
            last_status: Mutex::new(None),
        }
    }

    pub(crate) fn last_status(&self) -> Option<LinearOptimizationStatus> {
        *self.last_status.lock()
    }
}

impl LinearOptimizer for ScriptedOptimizer {
    fn optimize(&self, input: LinearOptimizationInput<'_>) -> LinearOptimizationResult {
        let mut setpoints = BTreeMap::new();
        for range_action in input.range_actions {
            input.grid.set_setpoint(range_action, self.target_setpoint);
            setpoints.insert(range_action.id.clone(), range_action.clamp_setpoint(self.target_setpoint));
        }
        let mut objective = input.pre_optim_objective.clone();
        objective.functional_cost -= self.gain;
        let status = LinearOptimizationStatus::Optimal;
        *self.last_status.lock() = Some(status);
        LinearOptimizationResult {
            status,
            sensitivity: input.pre_optim_sensitivity.clone(),
            objective,
            setpoints,
            iterations: 1,
        }
    }
}

/// One CNEC `cnec-fr` (5 MW flow, 100 MW limit) and one PST `pst-fr`.
pub(crate) struct Fixture {
    pub(crate) state: State,
    pub(crate) cnec: Arc<FlowCnec>,
    pub(crate) cnecs: Vec<Arc<FlowCnec>>,
    pub(crate) pst: Arc<RangeAction>,
    pub(crate) range_actions: BTreeSet<Arc<RangeAction>>,
    pub(crate) pre_perimeter_setpoints: BTreeMap<String, f64>,
    pub(crate) tree_parameters: TreeParameters,
    pub(crate) optimizer_parameters: OptimizerParameters,
    pub(crate) base_grid: GridState,
    pub(crate) engine: ScriptedEngine,
    pub(crate) objective: FlowObjective,
    pub(crate) optimizer: ScriptedOptimizer,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let cnec = Arc::new(
            FlowCnec::new("cnec-fr", "line-fr")
                .with_operator("fr")
                .with_upper_bound(100.0)
                .with_lower_bound(-100.0),
        );
        let pst = pst("pst-fr", "fr");
        let base_grid = GridState::new("base")
            .with_element("line-fr", "FR")
            .with_element("line-be", "BE")
            .with_border("FR", "BE")
            .with_setpoint("pst-fr", 0.0);
        Self {
            state: State::preventive(),
            cnecs: vec![cnec.clone()],
            objective: FlowObjective::new(cnec.clone()),
            engine: ScriptedEngine::new(&cnec.id, 5.0),
            cnec,
            range_actions: BTreeSet::from([pst.clone()]),
            pre_perimeter_setpoints: BTreeMap::from([(pst.id.clone(), 0.0)]),
            pst,
            tree_parameters: TreeParameters::default(),
            optimizer_parameters: OptimizerParameters::default(),
            base_grid,
            optimizer: ScriptedOptimizer::new(0.0, 1.0),
        }
    }

    pub(crate) fn with_optimizer_gain(mut self, gain: f64) -> Self {
        self.optimizer = ScriptedOptimizer::new(gain, 1.0);
        self
    }

    pub(crate) fn root(&self) -> Leaf {
        Leaf::root(LeafId(0), self.pre_perimeter_setpoints.clone())
    }

    pub(crate) fn grid(&self) -> GridState {
        self.base_grid.clone()
    }

    pub(crate) fn context(&self) -> OptimizationContext<'_> {
        OptimizationContext {
            state: &self.state,
            range_actions: &self.range_actions,
            cnecs: &self.cnecs,
            pre_perimeter_setpoints: &self.pre_perimeter_setpoints,
            tree_parameters: &self.tree_parameters,
            optimizer_parameters: &self.optimizer_parameters,
            objective_function: &self.objective,
            sensitivity_engine: &self.engine,
            linear_optimizer: &self.optimizer,
        }
    }
}
