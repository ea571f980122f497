//! Narrows the range actions handed to the linear optimizer so that the
//! usage limits hold once the leaf is optimized.
//!
//! Range actions already used by the leaf are never dropped: when they alone
//! exceed a limit, the violation is tolerated rather than undone.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use gt_types::{
    FlowCnec, GridState, OperatorId, RangeAction, RaoResult, RemedialAction, State, TreeParameters,
};

use crate::leaf::Leaf;

pub struct RangeActionFilter<'a> {
    leaf: &'a Leaf,
    tree_parameters: &'a TreeParameters,
    range_actions_to_optimize: BTreeSet<Arc<RangeAction>>,
    used: BTreeSet<String>,
    available: BTreeSet<String>,
    least_priority: BTreeSet<String>,
    /// Absolute sensitivity on the leaf's most limiting element
    sensitivities: BTreeMap<String, f64>,
}

impl<'a> RangeActionFilter<'a> {
    pub fn new(
        leaf: &'a Leaf,
        available_range_actions: &BTreeSet<Arc<RangeAction>>,
        state: &State,
        tree_parameters: &'a TreeParameters,
        pre_perimeter_setpoints: &BTreeMap<String, f64>,
        cnecs: &[Arc<FlowCnec>],
        grid: &GridState,
    ) -> RaoResult<Self> {
        let flows = leaf.flows()?;
        let most_limiting = leaf.most_limiting_elements(1)?.into_iter().next();

        let mut used = BTreeSet::new();
        let mut available = BTreeSet::new();
        let mut least_priority = BTreeSet::new();
        let mut sensitivities = BTreeMap::new();
        for range_action in available_range_actions {
            let is_used = leaf.is_range_action_used(range_action, pre_perimeter_setpoints)?;
            if is_used {
                used.insert(range_action.id.clone());
            }
            if range_action.is_available(state, cnecs, grid, flows) {
                available.insert(range_action.id.clone());
            }
            // Tried by a previous optimization and left untouched
            if tree_parameters.deprioritize_ignored_range_actions
                && leaf.tried_range_actions().contains(&range_action.id)
                && !is_used
            {
                least_priority.insert(range_action.id.clone());
            }
            let sensitivity = match &most_limiting {
                Some(cnec) => leaf.sensitivity_value(cnec, range_action)?.abs(),
                None => 0.0,
            };
            sensitivities.insert(range_action.id.clone(), sensitivity);
        }

        Ok(Self {
            leaf,
            tree_parameters,
            range_actions_to_optimize: available_range_actions.clone(),
            used,
            available,
            least_priority,
            sensitivities,
        })
    }

    pub fn range_actions(&self) -> &BTreeSet<Arc<RangeAction>> {
        &self.range_actions_to_optimize
    }

    /// Applies every pass in order and returns what is left.
    pub fn range_actions_to_optimize(mut self) -> BTreeSet<Arc<RangeAction>> {
        self.filter_unavailable_range_actions();
        self.filter_pst_per_tso();
        self.filter_tsos();
        self.filter_max_ras();
        self.range_actions_to_optimize
    }

    pub fn is_range_action_used(&self, range_action: &RangeAction) -> bool {
        self.used.contains(&range_action.id)
    }

    fn sensitivity(&self, range_action: &RangeAction) -> f64 {
        self.sensitivities
            .get(&range_action.id)
            .copied()
            .unwrap_or(0.0)
    }

    fn by_sensitivity(&self, a: &RangeAction, b: &RangeAction) -> Ordering {
        self.sensitivity(b)
            .total_cmp(&self.sensitivity(a))
            .then_with(|| a.id.cmp(&b.id))
    }

    fn by_priority_then_sensitivity(&self, a: &RangeAction, b: &RangeAction) -> Ordering {
        let a_deprioritized = self.least_priority.contains(&a.id);
        let b_deprioritized = self.least_priority.contains(&b.id);
        a_deprioritized
            .cmp(&b_deprioritized)
            .then_with(|| self.by_sensitivity(a, b))
    }

    pub fn filter_unavailable_range_actions(&mut self) {
        let before = self.range_actions_to_optimize.len();
        let used = &self.used;
        let available = &self.available;
        self.range_actions_to_optimize
            .retain(|range_action| used.contains(&range_action.id) || available.contains(&range_action.id));
        let removed = before - self.range_actions_to_optimize.len();
        if removed > 0 {
            info!("{} range actions are not available and have been filtered out", removed);
        }
    }

    /// PST limit per operator, reduced by the operator's other activated actions.
    fn max_pst_per_tso(&self) -> BTreeMap<OperatorId, usize> {
        let limits = &self.tree_parameters.usage_limits;
        let mut max_pst_per_tso = limits.max_pst_per_tso.clone();
        for (operator, ra_limit) in &limits.max_ra_per_tso {
            let network_actions = self
                .leaf
                .activated_network_actions()
                .iter()
                .filter(|action| action.operator.as_ref() == Some(operator))
                .count();
            let used_non_pst = self
                .range_actions_to_optimize
                .iter()
                .filter(|range_action| {
                    range_action.operator.as_ref() == Some(operator)
                        && !range_action.is_pst()
                        && self.is_range_action_used(range_action)
                })
                .count();
            let pst_limit = ra_limit.saturating_sub(network_actions + used_non_pst);
            let entry = max_pst_per_tso.entry(operator.clone()).or_insert(usize::MAX);
            *entry = (*entry).min(pst_limit);
        }
        max_pst_per_tso
    }

    pub fn filter_pst_per_tso(&mut self) {
        for (operator, max_pst) in self.max_pst_per_tso() {
            let psts: BTreeSet<Arc<RangeAction>> = self
                .range_actions_to_optimize
                .iter()
                .filter(|range_action| {
                    range_action.is_pst() && range_action.operator.as_ref() == Some(&operator)
                })
                .cloned()
                .collect();
            if psts.len() <= max_pst {
                continue;
            }
            let to_remove = self.compute_range_actions_to_exclude(&psts, max_pst);
            if !to_remove.is_empty() {
                info!(
                    "{} range actions have been filtered out in order to respect the maximum allowed number of pst for tso {}",
                    to_remove.len(),
                    operator
                );
                self.remove_all(&to_remove);
            }
        }
    }

    pub fn filter_tsos(&mut self) {
        let Some(max_tso) = self.tree_parameters.usage_limits.max_tso else {
            return;
        };
        let mut activated: BTreeSet<OperatorId> = self
            .leaf
            .activated_network_actions()
            .iter()
            .filter_map(|action| action.operator.clone())
            .collect();
        activated.extend(
            self.range_actions_to_optimize
                .iter()
                .filter(|range_action| self.is_range_action_used(range_action))
                .filter_map(|range_action| range_action.operator.clone()),
        );

        let tsos_to_keep = self.select_tsos_to_keep(activated, max_tso);
        let to_remove: BTreeSet<Arc<RangeAction>> = self
            .range_actions_to_optimize
            .iter()
            .filter(|range_action| {
                range_action
                    .operator
                    .as_ref()
                    .is_some_and(|operator| !tsos_to_keep.contains(operator))
            })
            .cloned()
            .collect();
        if !to_remove.is_empty() {
            info!(
                "{} range actions have been filtered out in order to respect the maximum allowed number of tsos",
                to_remove.len()
            );
            self.remove_all(&to_remove);
        }
    }

    /// Ranks operators by their best range action. Aligned range actions
    /// bring all their operators at once or none.
    fn select_tsos_to_keep(
        &mut self,
        activated: BTreeSet<OperatorId>,
        max_tso: usize,
    ) -> BTreeSet<OperatorId> {
        let mut sorted: Vec<Arc<RangeAction>> =
            self.range_actions_to_optimize.iter().cloned().collect();
        sorted.sort_by(|a, b| self.by_sensitivity(a, b));

        let mut tsos_to_keep = activated;
        let mut explored_groups = BTreeSet::new();
        for range_action in &sorted {
            match &range_action.group_id {
                Some(group_id) => {
                    if !explored_groups.insert(group_id.clone()) {
                        continue;
                    }
                    let aligned: BTreeSet<Arc<RangeAction>> = sorted
                        .iter()
                        .filter(|other| other.group_id.as_ref() == Some(group_id))
                        .cloned()
                        .collect();
                    let mut with_group = tsos_to_keep.clone();
                    with_group.extend(aligned.iter().filter_map(|other| other.operator.clone()));
                    if with_group.len() > max_tso {
                        info!(
                            "{} range actions have been filtered out in order to respect the maximum allowed number of tsos on aligned PSTs",
                            aligned.len()
                        );
                        self.remove_all(&aligned);
                    } else {
                        tsos_to_keep = with_group;
                    }
                }
                None => {
                    if let Some(operator) = &range_action.operator {
                        if tsos_to_keep.len() < max_tso {
                            tsos_to_keep.insert(operator.clone());
                        }
                    }
                }
            }
        }
        tsos_to_keep
    }

    pub fn filter_max_ras(&mut self) {
        let Some(max_ra) = self.tree_parameters.usage_limits.max_ra else {
            return;
        };
        let keep = max_ra.saturating_sub(self.leaf.activated_network_actions().len());
        let candidates = self.range_actions_to_optimize.clone();
        let to_remove = self.compute_range_actions_to_exclude(&candidates, keep);
        if !to_remove.is_empty() {
            info!(
                "{} range actions have been filtered out in order to respect the maximum allowed number of remedial actions",
                to_remove.len()
            );
            self.remove_all(&to_remove);
        }
    }

    /// Keeps every used range action, then the best `keep` minus used ones
    /// by priority and sensitivity. Returns the rest.
    fn compute_range_actions_to_exclude(
        &self,
        range_actions: &BTreeSet<Arc<RangeAction>>,
        keep: usize,
    ) -> BTreeSet<Arc<RangeAction>> {
        let mut to_exclude: BTreeSet<Arc<RangeAction>> = range_actions
            .iter()
            .filter(|range_action| !self.is_range_action_used(range_action))
            .cloned()
            .collect();
        let used = range_actions.len() - to_exclude.len();
        let mut left_to_keep = keep.saturating_sub(used);
        if left_to_keep == 0 {
            return to_exclude;
        }
        if left_to_keep >= to_exclude.len() {
            return BTreeSet::new();
        }

        let mut sorted: Vec<Arc<RangeAction>> = to_exclude.iter().cloned().collect();
        sorted.sort_by(|a, b| self.by_priority_then_sensitivity(a, b));
        let mut explored_groups = BTreeSet::new();
        for range_action in &sorted {
            if left_to_keep == 0 {
                break;
            }
            match &range_action.group_id {
                Some(group_id) => {
                    if !explored_groups.insert(group_id.clone()) {
                        continue;
                    }
                    let aligned: Vec<&Arc<RangeAction>> = sorted
                        .iter()
                        .filter(|other| other.group_id.as_ref() == Some(group_id))
                        .collect();
                    if aligned.len() <= left_to_keep {
                        for other in &aligned {
                            to_exclude.remove(*other);
                        }
                        left_to_keep -= aligned.len();
                    }
                }
                None => {
                    to_exclude.remove(range_action);
                    left_to_keep -= 1;
                }
            }
        }
        to_exclude
    }

    fn remove_all(&mut self, to_remove: &BTreeSet<Arc<RangeAction>>) {
        self.range_actions_to_optimize
            .retain(|range_action| !to_remove.contains(range_action));
    }
}
