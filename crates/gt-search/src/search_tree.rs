//! Depth-by-depth exploration of network action combinations.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gt_types::{
    internal_error, ActionCombination, FlowCnec, GridState, NetworkAction, RangeAction, RaoError,
    RaoResult, RemedialAction, SearchTreeParameters, State, StopCriterion,
};

use crate::bloomer::SearchTreeBloomer;
use crate::leaf::{EvaluationOutcome, Leaf, LeafArena, LeafId, OptimizationContext};
use crate::pool::GridStatePool;
use crate::traits::{LinearOptimizer, ObjectiveFunction, SensitivityEngine};

const EPSILON: f64 = 1e-6;
const LOGGED_ELEMENTS_DURING_TREE: usize = 2;
const LOGGED_ELEMENTS_END_TREE: usize = 5;

/// Perimeter and collaborators of one search.
pub struct SearchTreeInput {
    pub state: State,
    pub base_grid: GridState,
    pub network_actions: BTreeSet<Arc<NetworkAction>>,
    pub range_actions: BTreeSet<Arc<RangeAction>>,
    pub cnecs: Vec<Arc<FlowCnec>>,
    pub pre_perimeter_setpoints: BTreeMap<String, f64>,
    /// Combinations found efficient by an earlier optimization step
    pub detected_combinations: Vec<ActionCombination>,
    pub sensitivity_engine: Arc<dyn SensitivityEngine>,
    pub objective_function: Arc<dyn ObjectiveFunction>,
    pub linear_optimizer: Arc<dyn LinearOptimizer>,
}

/// Why the search stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StopCriterionReached,
    MaxDepthReached,
    NoImprovement,
    NoMoreCombinations,
    NoNetworkActions,
    TimeBudgetExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::StopCriterionReached => "stop criterion reached",
            StopReason::MaxDepthReached => "maximum search depth reached",
            StopReason::NoImprovement => "no better leaf found",
            StopReason::NoMoreCombinations => "no more combinations to try",
            StopReason::NoNetworkActions => "no network action available",
            StopReason::TimeBudgetExhausted => "time budget exhausted",
        };
        write!(f, "{text}")
    }
}

/// Best leaf of a search and how it was found.
#[derive(Debug, Clone)]
pub struct SearchTreeResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub best_leaf: Leaf,
    /// Cost of the root leaf once optimized
    pub root_cost: f64,
    pub depths_explored: usize,
    pub leaves_evaluated: usize,
    pub stop_reason: StopReason,
}

/// Serializable digest of a [`SearchTreeResult`]
#[derive(Debug, Clone, Serialize)]
pub struct SearchTreeSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub best_leaf: String,
    pub cost: f64,
    pub functional_cost: f64,
    pub virtual_costs: BTreeMap<String, f64>,
    pub root_cost: f64,
    pub depths_explored: usize,
    pub leaves_evaluated: usize,
    pub stop_reason: StopReason,
    pub network_actions: Vec<String>,
    pub setpoints: BTreeMap<String, f64>,
}

impl SearchTreeResult {
    pub fn cost(&self) -> RaoResult<f64> {
        self.best_leaf.cost()
    }

    pub fn functional_cost(&self) -> RaoResult<f64> {
        self.best_leaf.functional_cost()
    }

    pub fn virtual_cost(&self) -> RaoResult<f64> {
        self.best_leaf.virtual_cost()
    }

    pub fn activated_network_actions(&self) -> &BTreeSet<Arc<NetworkAction>> {
        self.best_leaf.activated_network_actions()
    }

    pub fn optimized_setpoints(&self) -> RaoResult<BTreeMap<String, f64>> {
        self.best_leaf.optimized_setpoints()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn summary(&self) -> RaoResult<SearchTreeSummary> {
        let mut virtual_costs = BTreeMap::new();
        for name in self.best_leaf.virtual_cost_names()? {
            let cost = self.best_leaf.virtual_cost_named(&name)?;
            virtual_costs.insert(name, cost);
        }
        Ok(SearchTreeSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            best_leaf: self.best_leaf.identifier(),
            cost: self.cost()?,
            functional_cost: self.functional_cost()?,
            virtual_costs,
            root_cost: self.root_cost,
            depths_explored: self.depths_explored,
            leaves_evaluated: self.leaves_evaluated,
            stop_reason: self.stop_reason,
            network_actions: self
                .activated_network_actions()
                .iter()
                .map(|action| action.id.clone())
                .collect(),
            setpoints: self.optimized_setpoints()?,
        })
    }

    pub fn to_json(&self) -> RaoResult<String> {
        Ok(serde_json::to_string_pretty(&self.summary()?)?)
    }
}

/// Decides whether a leaf is good enough to end the search.
#[derive(Debug, Clone, Copy)]
struct StopCheck<'a> {
    criterion: &'a StopCriterion,
    /// No optimized CNEC: only virtual costs matter
    purely_virtual: bool,
}

impl StopCheck<'_> {
    fn reached(&self, leaf: &Leaf) -> bool {
        let (Ok(cost), Ok(virtual_cost)) = (leaf.cost(), leaf.virtual_cost()) else {
            return false;
        };
        if virtual_cost > EPSILON {
            return false;
        }
        if self.purely_virtual && virtual_cost < EPSILON {
            debug!("Perimeter is purely virtual and virtual cost is zero");
            return true;
        }
        SearchTree::cost_satisfies_stop_criterion(cost, self.criterion)
    }
}

pub struct SearchTree {
    input: SearchTreeInput,
    parameters: SearchTreeParameters,
    bloomer: SearchTreeBloomer,
    arena: LeafArena,
    grid_pool: GridStatePool,
    thread_pool: ThreadPool,
    leaves_in_parallel: usize,
    purely_virtual: bool,
}

impl SearchTree {
    pub fn new(input: SearchTreeInput, parameters: SearchTreeParameters) -> RaoResult<Self> {
        parameters.validate()?;
        let tree = &parameters.tree;

        let mut predefined = Vec::new();
        for action_ids in &tree.predefined_combinations {
            let members: Option<Vec<Arc<NetworkAction>>> = action_ids
                .iter()
                .map(|id| {
                    input
                        .network_actions
                        .iter()
                        .find(|action| &action.id == id)
                        .cloned()
                })
                .collect();
            match members {
                Some(members) => predefined.push(ActionCombination::new(members)?),
                None => warn!(
                    "Predefined combination [{}] references unknown network actions and is ignored",
                    action_ids.join(", ")
                ),
            }
        }
        predefined.extend(
            input
                .detected_combinations
                .iter()
                .cloned()
                .map(ActionCombination::detected_during_rao),
        );

        let bloomer = SearchTreeBloomer::new(
            &input.base_grid,
            tree,
            predefined,
            input.range_actions.clone(),
            input.pre_perimeter_setpoints.clone(),
        );
        let leaves_in_parallel = tree
            .leaves_in_parallel
            .min(input.network_actions.len())
            .max(1);
        let grid_pool = GridStatePool::new(&input.base_grid, leaves_in_parallel)?;
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(leaves_in_parallel)
            .thread_name(|index| format!("search-tree-{index}"))
            .build()
            .map_err(|e| internal_error!("cannot start search tree workers: {}", e))?;
        let purely_virtual = input.cnecs.iter().all(|cnec| !cnec.optimized);

        Ok(Self {
            input,
            parameters,
            bloomer,
            arena: LeafArena::new(),
            grid_pool,
            thread_pool,
            leaves_in_parallel,
            purely_virtual,
        })
    }

    pub fn cost_satisfies_stop_criterion(cost: f64, criterion: &StopCriterion) -> bool {
        match criterion {
            StopCriterion::MinObjective => false,
            StopCriterion::AtTargetObjectiveValue { target } => cost < *target,
        }
    }

    fn stop_check(&self) -> StopCheck<'_> {
        StopCheck {
            criterion: &self.parameters.tree.stop_criterion,
            purely_virtual: self.purely_virtual,
        }
    }

    /// Runs the search and returns its best leaf.
    ///
    /// Fails when the root leaf cannot be evaluated. Failures of other
    /// leaves only exclude them from the search.
    pub fn run(mut self) -> RaoResult<SearchTreeResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            run_id = %run_id,
            state = %self.input.state,
            "Starting search tree with {} network actions and {} range actions, {} leaves in parallel",
            self.input.network_actions.len(),
            self.input.range_actions.len(),
            self.leaves_in_parallel
        );

        let root = self.arena.push_root(self.input.pre_perimeter_setpoints.clone());
        {
            let mut grid = self.grid_pool.acquire()?;
            let outcome = self.arena.get_mut(root).evaluate(
                &mut grid,
                self.input.objective_function.as_ref(),
                self.input.sensitivity_engine.as_ref(),
            );
            if let EvaluationOutcome::Failed { reason } = outcome {
                error!(run_id = %run_id, "Root leaf could not be evaluated: {}", reason);
                return Err(RaoError::RootLeafEvaluation { message: reason });
            }
        }
        info!("{}", self.arena.get(root));
        self.log_most_limiting_elements(root, LOGGED_ELEMENTS_DURING_TREE);

        let mut search = SearchState {
            run_id,
            started_at,
            root_cost: self.arena.get(root).cost()?,
            optimal: root,
            depth: 0,
            leaves_evaluated: 1,
        };

        if self.stop_check().reached(self.arena.get(root)) {
            info!("Stop criterion reached on the root leaf, skipping optimization");
            return self.finish(search, StopReason::StopCriterionReached);
        }

        {
            let mut grid = self.grid_pool.acquire()?;
            let context = optimization_context(&self.input, &self.parameters);
            self.arena.get_mut(root).optimize(&mut grid, &context)?;
        }
        search.root_cost = self.arena.get(root).cost()?;
        info!("Optimized {}", self.arena.get(root));
        self.log_most_limiting_elements(root, LOGGED_ELEMENTS_DURING_TREE);

        if self.stop_check().reached(self.arena.get(root)) {
            return self.finish(search, StopReason::StopCriterionReached);
        }
        if self.input.network_actions.is_empty() {
            info!("No network action available");
            return self.finish(search, StopReason::NoNetworkActions);
        }

        let mut last_depth_duration = clock.elapsed();
        let stop_reason = loop {
            if search.depth >= self.parameters.tree.maximum_search_depth {
                break StopReason::MaxDepthReached;
            }
            // budgets beyond Duration::MAX are unlimited
            let budget = self
                .parameters
                .tree
                .max_search_duration_seconds
                .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());
            if let Some(budget) = budget {
                if clock.elapsed() + last_depth_duration > budget {
                    info!(
                        "Not enough time left for another depth ({:.3}s spent, budget {:.3}s)",
                        clock.elapsed().as_secs_f64(),
                        budget.as_secs_f64()
                    );
                    break StopReason::TimeBudgetExhausted;
                }
            }

            let depth_start = Instant::now();
            let previous_optimal = search.optimal;
            let combinations = {
                let parent = self.arena.get(previous_optimal);
                let available = self.available_network_actions(parent)?;
                self.bloomer.bloom(parent, &available)?
            };
            if combinations.is_empty() {
                info!("No more network action available");
                break StopReason::NoMoreCombinations;
            }

            search.depth += 1;
            info!(
                depth = search.depth,
                "Search depth {} [start]: {} leaves to evaluate",
                search.depth,
                combinations.len()
            );
            let first = self.arena.push_children(previous_optimal, combinations);
            search.leaves_evaluated += self.arena.len() - first.0;
            self.evaluate_children(first)?;
            search.optimal = self.select_optimal(previous_optimal, first);
            self.finalize_depth(first, previous_optimal, search.optimal);

            info!(depth = search.depth, "Search depth {} [end]", search.depth);
            info!("Optimal leaf: {}", self.arena.get(search.optimal));
            self.log_most_limiting_elements(search.optimal, LOGGED_ELEMENTS_DURING_TREE);
            last_depth_duration = depth_start.elapsed();

            if search.optimal == previous_optimal {
                info!("No better result found in search depth {}, exiting search tree", search.depth);
                break StopReason::NoImprovement;
            }
            if self.stop_check().reached(self.arena.get(search.optimal)) {
                info!("Stop criterion reached in search depth {}", search.depth);
                break StopReason::StopCriterionReached;
            }
        };

        self.finish(search, stop_reason)
    }

    /// Network actions of the perimeter usable on top of `leaf`
    fn available_network_actions(&self, leaf: &Leaf) -> RaoResult<BTreeSet<Arc<NetworkAction>>> {
        let flows = leaf.flows()?;
        Ok(self
            .input
            .network_actions
            .iter()
            .filter(|action| {
                action.is_available(&self.input.state, &self.input.cnecs, &self.input.base_grid, flows)
            })
            .cloned()
            .collect())
    }

    /// Evaluates and optimizes the leaves created from `first`, at most
    /// `leaves_in_parallel` at a time.
    fn evaluate_children(&mut self, first: LeafId) -> RaoResult<()> {
        let context = optimization_context(&self.input, &self.parameters);
        let stop_check = StopCheck {
            criterion: &self.parameters.tree.stop_criterion,
            purely_virtual: self.purely_virtual,
        };
        let grid_pool = &self.grid_pool;
        let children = self.arena.leaves_from_mut(first);
        self.thread_pool.install(|| {
            children
                .par_iter_mut()
                .map(|leaf| evaluate_and_optimize(leaf, grid_pool, &context, &stop_check))
                .collect::<RaoResult<Vec<()>>>()
        })?;
        Ok(())
    }

    /// Keeps the incumbent unless a child improves on it by the minimum
    /// impact thresholds. Among improving children the cheapest wins, then
    /// the one with fewer network actions, then the first evaluated.
    fn select_optimal(&self, incumbent: LeafId, first: LeafId) -> LeafId {
        let Ok(incumbent_cost) = self.arena.get(incumbent).cost() else {
            return incumbent;
        };
        let stop_check = self.stop_check();
        let mut best: Option<(f64, usize, LeafId)> = None;
        for index in first.0..self.arena.len() {
            let leaf = self.arena.get(LeafId(index));
            let Ok(cost) = leaf.cost() else {
                continue;
            };
            if !self.improved_enough(incumbent_cost, cost, stop_check.reached(leaf)) {
                debug!("{} does not improve enough on the previous depth", leaf.identifier());
                continue;
            }
            let candidate = (cost, leaf.activated_network_actions().len(), leaf.id());
            let better = match &best {
                None => true,
                Some((best_cost, best_size, _)) => {
                    cost.total_cmp(best_cost)
                        .then_with(|| candidate.1.cmp(best_size))
                        .is_lt()
                }
            };
            if better {
                best = Some(candidate);
            }
        }
        best.map_or(incumbent, |(_, _, id)| id)
    }

    /// A strictly cheaper leaf reaching the stop criterion always counts.
    /// Otherwise the gain must exceed both impact thresholds.
    fn improved_enough(&self, previous_cost: f64, new_cost: f64, reaches_stop_criterion: bool) -> bool {
        let thresholds = &self.parameters.network_action_thresholds;
        let absolute = thresholds.absolute_minimum_impact_threshold.max(0.0);
        let relative = thresholds.relative_minimum_impact_threshold.max(0.0);
        if previous_cost > new_cost && reaches_stop_criterion {
            return true;
        }
        previous_cost - absolute > new_cost
            && (1.0 - previous_cost.signum() * relative) * previous_cost > new_cost
    }

    /// Releases the optimization data of every leaf of the depth except the
    /// new optimal one. Leaves that lost keep only their costs and flows.
    fn finalize_depth(&mut self, first: LeafId, previous_optimal: LeafId, optimal: LeafId) {
        for leaf in self.arena.leaves_from_mut(first) {
            if leaf.id() != optimal {
                leaf.release_sensitivities();
            }
        }
        if optimal != previous_optimal {
            self.arena.get_mut(previous_optimal).release_sensitivities();
        }
    }

    fn log_most_limiting_elements(&self, leaf: LeafId, count: usize) {
        let leaf = self.arena.get(leaf);
        let Ok(elements) = leaf.most_limiting_elements(count) else {
            return;
        };
        for (rank, cnec) in elements.iter().enumerate() {
            match leaf.margin(cnec) {
                Ok(margin) => debug!("Limiting element #{}: {} margin = {:.2} MW", rank + 1, cnec.id, margin),
                Err(_) => debug!("Limiting element #{}: {}", rank + 1, cnec.id),
            }
        }
    }

    fn finish(mut self, search: SearchState, stop_reason: StopReason) -> RaoResult<SearchTreeResult> {
        self.arena.get_mut(search.optimal).finalize_optimization();
        info!(
            run_id = %search.run_id,
            depths = search.depth,
            leaves = search.leaves_evaluated,
            "Search tree finished ({}): {}",
            stop_reason,
            self.arena.get(search.optimal)
        );
        self.log_most_limiting_elements(search.optimal, LOGGED_ELEMENTS_END_TREE);
        if search.optimal != LeafId(0) {
            let path: Vec<String> = self
                .arena
                .ancestry(search.optimal)
                .iter()
                .map(|id| id.to_string())
                .collect();
            debug!("Optimal leaf path: {}", path.join(" <- "));
        }
        Ok(SearchTreeResult {
            run_id: search.run_id,
            started_at: search.started_at,
            finished_at: Utc::now(),
            best_leaf: self.arena.into_leaf(search.optimal),
            root_cost: search.root_cost,
            depths_explored: search.depth,
            leaves_evaluated: search.leaves_evaluated,
            stop_reason,
        })
    }
}

struct SearchState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    root_cost: f64,
    optimal: LeafId,
    depth: usize,
    leaves_evaluated: usize,
}

fn optimization_context<'a>(
    input: &'a SearchTreeInput,
    parameters: &'a SearchTreeParameters,
) -> OptimizationContext<'a> {
    OptimizationContext {
        state: &input.state,
        range_actions: &input.range_actions,
        cnecs: &input.cnecs,
        pre_perimeter_setpoints: &input.pre_perimeter_setpoints,
        tree_parameters: &parameters.tree,
        optimizer_parameters: &parameters.optimizer,
        objective_function: input.objective_function.as_ref(),
        sensitivity_engine: input.sensitivity_engine.as_ref(),
        linear_optimizer: input.linear_optimizer.as_ref(),
    }
}

/// Work unit of one leaf on an exclusive grid variant. A leaf reaching the
/// stop criterion right after evaluation is not optimized.
fn evaluate_and_optimize(
    leaf: &mut Leaf,
    grid_pool: &GridStatePool,
    context: &OptimizationContext<'_>,
    stop_check: &StopCheck<'_>,
) -> RaoResult<()> {
    let mut grid = grid_pool.acquire()?;
    let outcome = leaf.evaluate(
        &mut grid,
        context.objective_function,
        context.sensitivity_engine,
    );
    if let EvaluationOutcome::Failed { .. } = outcome {
        return Ok(());
    }
    if stop_check.reached(leaf) {
        debug!("{} reaches the stop criterion, skipping optimization", leaf.identifier());
        return Ok(());
    }
    leaf.optimize(&mut grid, context)?;
    debug!("Optimized {}", leaf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::LeafStatus;
    use crate::test_support::*;
    use gt_types::{InstantKind, TreeParameters, UsageMethod, UsageRule};

    struct TreeFixture {
        engine: Arc<ScriptedEngine>,
        optimizer: Arc<ScriptedOptimizer>,
        objective: Arc<FlowObjective>,
        fixture: Fixture,
        network_actions: BTreeSet<Arc<NetworkAction>>,
    }

    impl TreeFixture {
        /// Root flow of `root_cost` MW and the given network actions
        fn new(root_cost: f64, actions: &[(&str, &str)]) -> Self {
            let fixture = Fixture::new();
            Self {
                engine: Arc::new(ScriptedEngine::new(&fixture.cnec.id, root_cost)),
                optimizer: Arc::new(ScriptedOptimizer::new(0.0, 1.0)),
                objective: Arc::new(FlowObjective::new(fixture.cnec.clone())),
                network_actions: actions
                    .iter()
                    .map(|(id, operator)| network_action(id, operator))
                    .collect(),
                fixture,
            }
        }

        fn with_optimizer_gain(mut self, gain: f64) -> Self {
            self.optimizer = Arc::new(ScriptedOptimizer::new(gain, 1.0));
            self
        }

        fn input(&self) -> SearchTreeInput {
            SearchTreeInput {
                state: self.fixture.state.clone(),
                base_grid: self.fixture.grid(),
                network_actions: self.network_actions.clone(),
                range_actions: self.fixture.range_actions.clone(),
                cnecs: self.fixture.cnecs.clone(),
                pre_perimeter_setpoints: self.fixture.pre_perimeter_setpoints.clone(),
                detected_combinations: Vec::new(),
                sensitivity_engine: self.engine.clone(),
                objective_function: self.objective.clone(),
                linear_optimizer: self.optimizer.clone(),
            }
        }

        fn run(&self, tree: TreeParameters) -> RaoResult<SearchTreeResult> {
            self.run_with(SearchTreeParameters::new(tree))
        }

        fn run_with(&self, parameters: SearchTreeParameters) -> RaoResult<SearchTreeResult> {
            let result = SearchTree::new(self.input(), parameters)?.run()?;
            assert!(result.cost()? <= result.root_cost);
            assert!(result.best_leaf.is_finalized());
            Ok(result)
        }
    }

    fn depth(depth: usize) -> TreeParameters {
        TreeParameters::default().with_maximum_search_depth(depth)
    }

    fn action_ids(result: &SearchTreeResult) -> Vec<&str> {
        result
            .activated_network_actions()
            .iter()
            .map(|action| action.id.as_str())
            .collect()
    }

    #[test]
    fn test_better_child_becomes_optimal() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr")]);
        setup.engine.with_flow(&["open-fr-1"], 3.0);

        let result = setup.run(depth(1)).unwrap();
        assert_eq!(result.cost().unwrap(), 3.0);
        assert_eq!(result.root_cost, 5.0);
        assert_eq!(action_ids(&result), vec!["open-fr-1"]);
        assert_eq!(result.stop_reason, StopReason::MaxDepthReached);
        assert_eq!(result.depths_explored, 1);
        assert_eq!(result.leaves_evaluated, 2);
        assert!(!result.best_leaf.are_sensitivities_released());
    }

    #[test]
    fn test_failed_child_keeps_root() {
        let setup = TreeFixture::new(4.0, &[("open-fr-1", "fr")]);
        setup.engine.fail_on(&["open-fr-1"]);

        let result = setup.run(depth(1)).unwrap();
        assert!(result.best_leaf.is_root());
        assert_eq!(result.cost().unwrap(), 4.0);
        assert_eq!(result.stop_reason, StopReason::NoImprovement);
    }

    #[test]
    fn test_root_failure_aborts_search() {
        let setup = TreeFixture::new(4.0, &[("open-fr-1", "fr")]);
        setup.engine.report_failure_status();
        assert!(matches!(
            setup.run(depth(1)),
            Err(RaoError::RootLeafEvaluation { .. })
        ));
    }

    #[test]
    fn test_root_reaching_target_is_not_optimized() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr")]);
        let tree = depth(2).with_stop_criterion(StopCriterion::AtTargetObjectiveValue { target: 10.0 });

        let result = setup.run(tree).unwrap();
        assert_eq!(result.stop_reason, StopReason::StopCriterionReached);
        assert_eq!(result.best_leaf.status(), LeafStatus::Evaluated);
        assert_eq!(setup.optimizer.last_status(), None);
        assert_eq!(setup.engine.calls(), 1);
    }

    #[test]
    fn test_no_network_actions() {
        let setup = TreeFixture::new(5.0, &[]).with_optimizer_gain(1.0);
        let result = setup.run(depth(3)).unwrap();
        assert!(result.best_leaf.is_root());
        assert_eq!(result.cost().unwrap(), 4.0);
        assert_eq!(result.root_cost, 4.0);
        assert_eq!(result.stop_reason, StopReason::NoNetworkActions);
        assert_eq!(result.best_leaf.status(), LeafStatus::Optimized);
    }

    #[test]
    fn test_search_goes_deeper_while_improving() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr"), ("open-fr-2", "fr")]);
        setup.engine.with_flow(&["open-fr-1"], 3.0);
        setup.engine.with_flow(&["open-fr-2"], 4.0);
        setup.engine.with_flow(&["open-fr-1", "open-fr-2"], 1.0);

        let result = setup.run(depth(3)).unwrap();
        assert_eq!(action_ids(&result), vec!["open-fr-1", "open-fr-2"]);
        assert_eq!(result.cost().unwrap(), 1.0);
        assert_eq!(result.depths_explored, 2);
        assert_eq!(result.leaves_evaluated, 4);
        assert_eq!(result.stop_reason, StopReason::NoMoreCombinations);
    }

    #[test]
    fn test_stops_once_target_is_reached() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr"), ("open-fr-2", "fr")]);
        setup.engine.with_flow(&["open-fr-1"], 3.0);
        setup.engine.with_flow(&["open-fr-1", "open-fr-2"], 1.0);
        let tree = depth(3).with_stop_criterion(StopCriterion::AtTargetObjectiveValue { target: 3.5 });

        let result = setup.run(tree).unwrap();
        assert_eq!(action_ids(&result), vec!["open-fr-1"]);
        assert_eq!(result.stop_reason, StopReason::StopCriterionReached);
        assert_eq!(result.depths_explored, 1);
    }

    #[test]
    fn test_minimum_impact_thresholds() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr")]);
        setup.engine.with_flow(&["open-fr-1"], 3.0);

        let absolute = SearchTreeParameters::new(depth(1)).with_thresholds(2.5, 0.0);
        let result = setup.run_with(absolute).unwrap();
        assert!(result.best_leaf.is_root());
        assert_eq!(result.stop_reason, StopReason::NoImprovement);

        let relative = SearchTreeParameters::new(depth(1)).with_thresholds(0.0, 0.5);
        assert!(setup.run_with(relative).unwrap().best_leaf.is_root());

        let loose = SearchTreeParameters::new(depth(1)).with_thresholds(1.0, 0.2);
        assert_eq!(action_ids(&setup.run_with(loose).unwrap()), vec!["open-fr-1"]);
    }

    #[test]
    fn test_ties_prefer_fewer_actions() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr"), ("open-fr-2", "fr")]);
        setup.engine.with_flow(&["open-fr-1"], 3.0);
        setup.engine.with_flow(&["open-fr-2"], 3.0);
        setup.engine.with_flow(&["open-fr-1", "open-fr-2"], 3.0);
        let tree = depth(1).with_predefined_combination(&["open-fr-1", "open-fr-2"]);

        let result = setup.run(tree).unwrap();
        assert_eq!(action_ids(&result), vec!["open-fr-1"]);
        assert_eq!(result.leaves_evaluated, 4);
    }

    #[test]
    fn test_parallel_depth_matches_sequential() {
        let actions = [
            ("open-fr-1", "fr"),
            ("open-fr-2", "fr"),
            ("open-be-1", "be"),
            ("open-nl-1", "nl"),
        ];
        let run = |parallel: usize| {
            let setup = TreeFixture::new(5.0, &actions);
            setup.engine.with_flow(&["open-fr-1"], 4.0);
            setup.engine.with_flow(&["open-fr-2"], 3.0);
            setup.engine.with_flow(&["open-be-1"], 2.0);
            setup.engine.fail_on(&["open-nl-1"]);
            let result = setup.run(depth(1).with_leaves_in_parallel(parallel)).unwrap();
            assert_eq!(setup.engine.calls(), 5);
            result
        };
        let sequential = run(1);
        let parallel = run(3);
        assert_eq!(action_ids(&sequential), vec!["open-be-1"]);
        assert_eq!(action_ids(&parallel), action_ids(&sequential));
        assert_eq!(parallel.cost().unwrap(), 2.0);
    }

    #[test]
    fn test_unavailable_network_actions_are_not_tried() {
        let mut setup = TreeFixture::new(5.0, &[]);
        setup.network_actions.insert(Arc::new(
            NetworkAction::new("open-fr-1", Some("fr"), vec![]).with_usage_rules(vec![
                UsageRule::OnConstraint {
                    instant: InstantKind::Preventive,
                    cnec_id: "cnec-fr".to_string(),
                    usage_method: UsageMethod::ToBeEvaluated,
                },
            ]),
        ));
        let result = setup.run(depth(2)).unwrap();
        assert_eq!(result.stop_reason, StopReason::NoMoreCombinations);
        assert_eq!(result.leaves_evaluated, 1);
    }

    #[test]
    fn test_time_budget() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr")]);
        setup.engine.with_flow(&["open-fr-1"], 3.0);
        let result = setup
            .run(depth(3).with_max_search_duration_seconds(1e-9))
            .unwrap();
        assert!(result.best_leaf.is_root());
        assert_eq!(result.stop_reason, StopReason::TimeBudgetExhausted);
        assert_eq!(result.depths_explored, 0);
    }

    #[test]
    fn test_huge_time_budget_is_unlimited() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr")]);
        setup.engine.with_flow(&["open-fr-1"], 3.0);
        let parameters = depth(3).with_max_search_duration_seconds(1e20);
        assert!(parameters.validate().is_ok());
        let result = setup.run(parameters).unwrap();
        assert_eq!(action_ids(&result), vec!["open-fr-1"]);
        assert_eq!(result.stop_reason, StopReason::NoMoreCombinations);
    }

    #[test]
    fn test_summary_serializes() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr")]).with_optimizer_gain(0.5);
        setup.engine.with_flow(&["open-fr-1"], 3.0);
        let result = setup.run(depth(1)).unwrap();
        assert!(result.duration() >= chrono::Duration::zero());

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["stop_reason"], "max_depth_reached");
        assert_eq!(json["cost"], 2.5);
        assert_eq!(json["root_cost"], 4.5);
        assert_eq!(json["network_actions"][0], "open-fr-1");
        assert_eq!(json["setpoints"]["pst-fr"], 1.0);
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let setup = TreeFixture::new(5.0, &[("open-fr-1", "fr")]);
        let tree = depth(1).with_leaves_in_parallel(0);
        assert!(matches!(
            SearchTree::new(setup.input(), SearchTreeParameters::new(tree)),
            Err(RaoError::Config(_))
        ));
    }

    #[test]
    fn test_stop_criterion_values() {
        assert!(!SearchTree::cost_satisfies_stop_criterion(-100.0, &StopCriterion::MinObjective));
        let target = StopCriterion::AtTargetObjectiveValue { target: 0.0 };
        assert!(SearchTree::cost_satisfies_stop_criterion(-0.5, &target));
        assert!(!SearchTree::cost_satisfies_stop_criterion(0.0, &target));
    }
}
