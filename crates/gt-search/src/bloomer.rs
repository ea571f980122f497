//! Generation of the network action combinations tried below a leaf.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use gt_types::{
    ActionCombination, GridState, NetworkAction, OperatorId, RaUsageLimits, RangeAction, RaoResult,
    RemedialAction, TreeParameters, ZoneId,
};

use crate::leaf::Leaf;
use crate::zone_graph::ZoneGraph;

/// Proposes the children of a leaf: predefined combinations and single
/// network actions that respect the usage limits.
pub struct SearchTreeBloomer {
    grid: GridState,
    zone_graph: ZoneGraph,
    usage_limits: RaUsageLimits,
    filter_far_elements: bool,
    max_number_of_boundaries: usize,
    predefined_combinations: Vec<ActionCombination>,
    range_actions: BTreeSet<Arc<RangeAction>>,
    pre_perimeter_setpoints: BTreeMap<String, f64>,
}

impl SearchTreeBloomer {
    pub fn new(
        grid: &GridState,
        tree_parameters: &TreeParameters,
        predefined_combinations: Vec<ActionCombination>,
        range_actions: BTreeSet<Arc<RangeAction>>,
        pre_perimeter_setpoints: BTreeMap<String, f64>,
    ) -> Self {
        let mut unique: Vec<ActionCombination> = Vec::with_capacity(predefined_combinations.len());
        for combination in predefined_combinations {
            if !unique.contains(&combination) {
                unique.push(combination);
            }
        }
        Self {
            grid: grid.clone(),
            zone_graph: ZoneGraph::new(grid),
            usage_limits: tree_parameters.usage_limits.clone(),
            filter_far_elements: tree_parameters.skip_actions_far_from_most_limiting_element,
            max_number_of_boundaries: tree_parameters.max_number_of_boundaries_for_skipping_actions,
            predefined_combinations: unique,
            range_actions,
            pre_perimeter_setpoints,
        }
    }

    pub fn predefined_combinations(&self) -> &[ActionCombination] {
        &self.predefined_combinations
    }

    pub fn has_predefined_combination(&self, combination: &ActionCombination) -> bool {
        self.predefined_combinations.contains(combination)
    }

    /// Combinations worth evaluating below `leaf`, in evaluation order.
    ///
    /// Predefined combinations are proposed when all their members are
    /// available. Every available action not already proposed alone is
    /// added as a single-action combination.
    pub fn bloom(
        &self,
        leaf: &Leaf,
        network_actions: &BTreeSet<Arc<NetworkAction>>,
    ) -> RaoResult<Vec<ActionCombination>> {
        let mut combinations: Vec<ActionCombination> = self
            .predefined_combinations
            .iter()
            .filter(|combination| {
                combination
                    .members()
                    .iter()
                    .all(|action| network_actions.contains(action))
            })
            .cloned()
            .collect();
        let singles: BTreeSet<Arc<NetworkAction>> = combinations
            .iter()
            .filter(|combination| combination.len() == 1)
            .flat_map(|combination| combination.members().iter().cloned())
            .collect();
        combinations.extend(
            network_actions
                .iter()
                .filter(|action| !singles.contains(*action))
                .map(|action| ActionCombination::single(action.clone())),
        );

        let combinations = self.remove_already_activated_combinations(combinations, leaf);
        let combinations = self.remove_already_tested_combinations(combinations, leaf);
        let combinations = self.remove_combinations_exceeding_max_total(combinations, leaf);
        let combinations = self.remove_combinations_exceeding_per_owner_quota(combinations, leaf)?;
        let combinations = self.remove_combinations_exceeding_max_owners(combinations, leaf)?;
        let combinations = self.remove_combinations_far_from_most_limiting_elements(combinations, leaf)?;
        let mut combinations =
            self.remove_combinations_exceeding_max_elementary_actions_per_owner(combinations, leaf);

        self.sort_combinations(&mut combinations);
        Ok(combinations)
    }

    /// Detected combinations first, then predefined ones, then larger
    /// combinations, then by id.
    pub fn sort_combinations(&self, combinations: &mut [ActionCombination]) {
        combinations.sort_by(|a, b| {
            b.is_detected_during_rao()
                .cmp(&a.is_detected_during_rao())
                .then_with(|| {
                    self.has_predefined_combination(b)
                        .cmp(&self.has_predefined_combination(a))
                })
                .then_with(|| b.len().cmp(&a.len()))
                .then_with(|| a.concatenated_id().cmp(b.concatenated_id()))
        });
    }

    fn log_removed(before: usize, after: usize, reason: &str) {
        if before > after {
            info!(
                "{} network action combinations have been filtered out because {}",
                before - after,
                reason
            );
        }
    }

    pub fn remove_already_activated_combinations(
        &self,
        combinations: Vec<ActionCombination>,
        leaf: &Leaf,
    ) -> Vec<ActionCombination> {
        combinations
            .into_iter()
            .filter(|combination| {
                combination
                    .members()
                    .iter()
                    .all(|action| !leaf.is_activated(action))
            })
            .collect()
    }

    /// Drops single actions completing a predefined combination whose other
    /// members are all active: that combination was already tried as a whole.
    pub fn remove_already_tested_combinations(
        &self,
        combinations: Vec<ActionCombination>,
        leaf: &Leaf,
    ) -> Vec<ActionCombination> {
        let mut already_tested: BTreeSet<Arc<NetworkAction>> = BTreeSet::new();
        for predefined in &self.predefined_combinations {
            if predefined.is_detected_during_rao() {
                continue;
            }
            let mut not_activated = predefined
                .members()
                .iter()
                .filter(|action| !leaf.is_activated(action));
            if let (Some(last), None) = (not_activated.next(), not_activated.next()) {
                already_tested.insert(last.clone());
            }
        }
        combinations
            .into_iter()
            .filter(|combination| {
                combination.len() != 1
                    || !combination
                        .members()
                        .iter()
                        .any(|action| already_tested.contains(action))
            })
            .collect()
    }

    pub fn remove_combinations_exceeding_max_total(
        &self,
        combinations: Vec<ActionCombination>,
        leaf: &Leaf,
    ) -> Vec<ActionCombination> {
        let Some(max_ra) = self.usage_limits.max_ra else {
            return combinations;
        };
        let before = combinations.len();
        let activated = leaf.activated_network_actions().len();
        let kept: Vec<ActionCombination> = combinations
            .into_iter()
            .filter(|combination| combination.len() + activated <= max_ra)
            .collect();
        Self::log_removed(before, kept.len(), "the max number of usable RAs has been reached");
        kept
    }

    fn used_range_actions_per_operator(&self, leaf: &Leaf) -> RaoResult<BTreeMap<OperatorId, usize>> {
        let mut counts = BTreeMap::new();
        for range_action in leaf.activated_range_actions(&self.range_actions, &self.pre_perimeter_setpoints)? {
            if let Some(operator) = &range_action.operator {
                *counts.entry(operator.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// An owner may not exceed its network action quota, nor its remedial
    /// action quota once its used range actions are counted.
    pub fn remove_combinations_exceeding_per_owner_quota(
        &self,
        combinations: Vec<ActionCombination>,
        leaf: &Leaf,
    ) -> RaoResult<Vec<ActionCombination>> {
        if self.usage_limits.max_topo_per_tso.is_empty() && self.usage_limits.max_ra_per_tso.is_empty() {
            return Ok(combinations);
        }
        let before = combinations.len();
        let activated = leaf.activated_network_actions_per_operator();
        let used_range_actions = self.used_range_actions_per_operator(leaf)?;
        let kept: Vec<ActionCombination> = combinations
            .into_iter()
            .filter(|combination| {
                combination
                    .actions_per_operator()
                    .iter()
                    .all(|(operator, count)| {
                        let network_actions = activated.get(operator).copied().unwrap_or(0) + count;
                        let within_topo = self
                            .usage_limits
                            .max_network_actions_for(operator)
                            .map_or(true, |limit| network_actions <= limit);
                        let within_ra = self
                            .usage_limits
                            .max_ra_per_tso
                            .get(operator)
                            .map_or(true, |limit| {
                                network_actions + used_range_actions.get(operator).copied().unwrap_or(0)
                                    <= *limit
                            });
                        within_topo && within_ra
                    })
            })
            .collect();
        Self::log_removed(
            before,
            kept.len(),
            "the maximum number of network actions for their TSO has been reached",
        );
        Ok(kept)
    }

    /// Owners with an activated network action or a used range action
    pub fn activated_owners(&self, leaf: &Leaf) -> RaoResult<BTreeSet<OperatorId>> {
        let mut owners: BTreeSet<OperatorId> = leaf
            .activated_network_actions()
            .iter()
            .filter_map(|action| action.operator.clone())
            .collect();
        owners.extend(
            leaf.activated_range_actions(&self.range_actions, &self.pre_perimeter_setpoints)?
                .iter()
                .filter_map(|range_action| range_action.operator.clone()),
        );
        Ok(owners)
    }

    pub fn remove_combinations_exceeding_max_owners(
        &self,
        combinations: Vec<ActionCombination>,
        leaf: &Leaf,
    ) -> RaoResult<Vec<ActionCombination>> {
        let Some(max_tso) = self.usage_limits.max_tso else {
            return Ok(combinations);
        };
        let before = combinations.len();
        let activated = self.activated_owners(leaf)?;
        let kept: Vec<ActionCombination> = combinations
            .into_iter()
            .filter(|combination| {
                let mut owners = combination.operators();
                owners.extend(activated.iter().cloned());
                owners.len() <= max_tso
            })
            .collect();
        Self::log_removed(before, kept.len(), "the max number of usable TSOs has been reached");
        Ok(kept)
    }

    /// Zones of the most limiting element and of every element with a virtual cost
    pub fn most_limiting_elements_location(&self, leaf: &Leaf) -> RaoResult<BTreeSet<Option<ZoneId>>> {
        let mut elements = leaf.most_limiting_elements(1)?;
        for name in leaf.virtual_cost_names()? {
            elements.extend(leaf.costly_elements(&name, usize::MAX)?);
        }
        Ok(elements
            .iter()
            .map(|cnec| cnec.location(&self.grid).cloned())
            .collect())
    }

    /// Unknown locations on either side count as close.
    pub fn is_network_action_close_to_locations(
        &self,
        network_action: &NetworkAction,
        locations: &BTreeSet<Option<ZoneId>>,
    ) -> bool {
        if locations.is_empty() || locations.contains(&None) {
            return true;
        }
        let action_locations = network_action.location(&self.grid);
        if action_locations.is_empty() || action_locations.contains(&None) {
            return true;
        }
        locations.iter().flatten().any(|location| {
            action_locations.iter().flatten().any(|zone| {
                self.zone_graph
                    .are_neighbors(location, zone, self.max_number_of_boundaries)
            })
        })
    }

    pub fn remove_combinations_far_from_most_limiting_elements(
        &self,
        combinations: Vec<ActionCombination>,
        leaf: &Leaf,
    ) -> RaoResult<Vec<ActionCombination>> {
        if !self.filter_far_elements {
            return Ok(combinations);
        }
        let before = combinations.len();
        let locations = self.most_limiting_elements_location(leaf)?;
        let kept: Vec<ActionCombination> = combinations
            .into_iter()
            .filter(|combination| {
                combination
                    .members()
                    .iter()
                    .any(|action| self.is_network_action_close_to_locations(action, &locations))
            })
            .collect();
        Self::log_removed(
            before,
            kept.len(),
            "they are too far from the most limiting element",
        );
        Ok(kept)
    }

    pub fn remove_combinations_exceeding_max_elementary_actions_per_owner(
        &self,
        combinations: Vec<ActionCombination>,
        leaf: &Leaf,
    ) -> Vec<ActionCombination> {
        let quotas = &self.usage_limits.max_elementary_actions_per_tso;
        if quotas.is_empty() {
            return combinations;
        }
        let mut activated: BTreeMap<OperatorId, usize> = BTreeMap::new();
        for action in leaf.activated_network_actions() {
            if let Some(operator) = &action.operator {
                *activated.entry(operator.clone()).or_insert(0) += action.elementary_actions;
            }
        }
        let before = combinations.len();
        let kept: Vec<ActionCombination> = combinations
            .into_iter()
            .filter(|combination| {
                combination
                    .elementary_actions_per_operator()
                    .iter()
                    .all(|(operator, count)| match quotas.get(operator) {
                        Some(quota) => {
                            *count <= quota.saturating_sub(activated.get(operator).copied().unwrap_or(0))
                        }
                        None => true,
                    })
            })
            .collect();
        Self::log_removed(
            before,
            kept.len(),
            "the maximum number of elementary actions for their TSO has been reached",
        );
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::LeafId;
    use crate::test_support::*;

    fn fr_actions() -> BTreeSet<Arc<NetworkAction>> {
        ["open-fr-1", "open-fr-2", "open-fr-3"]
            .into_iter()
            .map(|id| network_action(id, "fr"))
            .collect()
    }

    fn combination(actions: &BTreeSet<Arc<NetworkAction>>, ids: &[&str]) -> ActionCombination {
        ActionCombination::new(
            actions
                .iter()
                .filter(|action| ids.contains(&action.id.as_str()))
                .cloned(),
        )
        .unwrap()
    }

    fn bloomer(
        fixture: &Fixture,
        parameters: &TreeParameters,
        predefined: Vec<ActionCombination>,
    ) -> SearchTreeBloomer {
        SearchTreeBloomer::new(
            &fixture.base_grid,
            parameters,
            predefined,
            fixture.range_actions.clone(),
            fixture.pre_perimeter_setpoints.clone(),
        )
    }

    fn evaluated_root(fixture: &Fixture) -> Leaf {
        let mut root = fixture.root();
        let mut grid = fixture.grid();
        root.evaluate(&mut grid, &fixture.objective, &fixture.engine);
        root
    }

    fn evaluated_child(fixture: &Fixture, parent: &Leaf, combination: ActionCombination) -> Leaf {
        let mut child = Leaf::child(LeafId(1), parent, combination);
        let mut grid = fixture.grid();
        child.evaluate(&mut grid, &fixture.objective, &fixture.engine);
        child
    }

    fn ids(combinations: &[ActionCombination]) -> Vec<&str> {
        combinations
            .iter()
            .map(|combination| combination.concatenated_id())
            .collect()
    }

    #[test]
    fn test_empty_catalog_blooms_nothing() {
        let fixture = Fixture::new();
        let bloomer = bloomer(&fixture, &TreeParameters::default(), vec![]);
        let root = evaluated_root(&fixture);
        assert!(bloomer.bloom(&root, &BTreeSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_bloom_orders_predefined_then_singletons() {
        let fixture = Fixture::new();
        let actions = fr_actions();
        let predefined = vec![
            combination(&actions, &["open-fr-1", "open-fr-2"]),
            combination(&actions, &["open-fr-1", "open-fr-2"]),
        ];
        let bloomer = bloomer(&fixture, &TreeParameters::default(), predefined);
        assert_eq!(bloomer.predefined_combinations().len(), 1);

        let root = evaluated_root(&fixture);
        let combinations = bloomer.bloom(&root, &actions).unwrap();
        assert_eq!(
            ids(&combinations),
            vec!["open-fr-1 + open-fr-2", "open-fr-1", "open-fr-2", "open-fr-3"]
        );
    }

    #[test]
    fn test_predefined_with_unavailable_member_is_ignored() {
        let fixture = Fixture::new();
        let actions = fr_actions();
        let mut predefined_members = actions.clone();
        predefined_members.insert(network_action("open-be-1", "be"));
        let predefined = vec![combination(&predefined_members, &["open-fr-1", "open-be-1"])];
        let bloomer = bloomer(&fixture, &TreeParameters::default(), predefined);
        let root = evaluated_root(&fixture);
        let combinations = bloomer.bloom(&root, &actions).unwrap();
        assert_eq!(ids(&combinations), vec!["open-fr-1", "open-fr-2", "open-fr-3"]);
    }

    #[test]
    fn test_bloom_never_overlaps_active_set() {
        let fixture = Fixture::new();
        let actions = fr_actions();
        let predefined = vec![
            combination(&actions, &["open-fr-1", "open-fr-2"]),
            combination(&actions, &["open-fr-2", "open-fr-3"]),
        ];
        let completing = bloomer(&fixture, &TreeParameters::default(), predefined);
        let root = evaluated_root(&fixture);
        let child = evaluated_child(&fixture, &root, combination(&actions, &["open-fr-2"]));

        let combinations = completing.bloom(&child, &actions).unwrap();
        for combination in &combinations {
            assert!(combination
                .members()
                .iter()
                .all(|action| !child.is_activated(action)));
        }
        // open-fr-1 and open-fr-3 each complete a predefined pair.
        assert!(combinations.is_empty());

        let predefined = vec![
            combination(&actions, &["open-fr-1", "open-fr-2"]),
            combination(&actions, &["open-fr-1", "open-fr-3"]),
        ];
        let disjoint = bloomer(&fixture, &TreeParameters::default(), predefined);
        let combinations = disjoint.bloom(&child, &actions).unwrap();
        assert_eq!(ids(&combinations), vec!["open-fr-1 + open-fr-3", "open-fr-3"]);
        for combination in &combinations {
            assert!(combination
                .members()
                .iter()
                .all(|action| !child.is_activated(action)));
        }
    }

    #[test]
    fn test_detected_combination_keeps_its_singletons() {
        let fixture = Fixture::new();
        let actions = fr_actions();
        let predefined = vec![combination(&actions, &["open-fr-1", "open-fr-2"]).detected_during_rao()];
        let bloomer = bloomer(&fixture, &TreeParameters::default(), predefined);
        let root = evaluated_root(&fixture);
        let child = evaluated_child(&fixture, &root, combination(&actions, &["open-fr-2"]));
        let combinations = bloomer.bloom(&child, &actions).unwrap();
        assert_eq!(ids(&combinations), vec!["open-fr-1", "open-fr-3"]);
    }

    #[test]
    fn test_topo_quota_of_one_keeps_singletons() {
        let fixture = Fixture::new();
        let actions = fr_actions();
        let predefined = vec![
            combination(&actions, &["open-fr-1", "open-fr-2"]),
            combination(&actions, &["open-fr-1", "open-fr-2", "open-fr-3"]),
        ];
        let parameters = TreeParameters::default()
            .with_usage_limits(RaUsageLimits::default().with_max_topo_per_tso("fr", 1));
        let bloomer = bloomer(&fixture, &parameters, predefined);
        let root = evaluated_root(&fixture);
        let combinations = bloomer.bloom(&root, &actions).unwrap();
        assert_eq!(ids(&combinations), vec!["open-fr-1", "open-fr-2", "open-fr-3"]);
    }

    #[test]
    fn test_max_total_counts_activated_actions() {
        let fixture = Fixture::new();
        let actions = fr_actions();
        let predefined = vec![combination(&actions, &["open-fr-2", "open-fr-3"])];
        let parameters =
            TreeParameters::default().with_usage_limits(RaUsageLimits::default().with_max_ra(2));
        let bloomer = bloomer(&fixture, &parameters, predefined);
        let root = evaluated_root(&fixture);
        let child = evaluated_child(&fixture, &root, combination(&actions, &["open-fr-1"]));

        let combinations = bloomer.bloom(&child, &actions).unwrap();
        for combination in &combinations {
            assert!(combination.len() + child.activated_network_actions().len() <= 2);
        }
        assert_eq!(ids(&combinations), vec!["open-fr-2", "open-fr-3"]);
    }

    #[test]
    fn test_ra_quota_counts_used_range_actions() {
        let fixture = Fixture::new().with_optimizer_gain(1.0);
        let actions: BTreeSet<_> = [network_action("open-fr-1", "fr"), network_action("open-be-1", "be")]
            .into_iter()
            .collect();
        let parameters = TreeParameters::default()
            .with_usage_limits(RaUsageLimits::default().with_max_ra_per_tso("fr", 1));
        let bloomer = bloomer(&fixture, &parameters, vec![]);

        let mut root = evaluated_root(&fixture);
        assert_eq!(bloomer.bloom(&root, &actions).unwrap().len(), 2);

        let mut grid = fixture.grid();
        root.optimize(&mut grid, &fixture.context()).unwrap();
        // pst-fr moved, so fr has no quota left.
        assert_eq!(bloomer.activated_owners(&root).unwrap(), BTreeSet::from(["fr".to_string()]));
        assert_eq!(ids(&bloomer.bloom(&root, &actions).unwrap()), vec!["open-be-1"]);
    }

    #[test]
    fn test_max_owners() {
        let fixture = Fixture::new();
        let actions: BTreeSet<_> = [
            network_action("open-fr-1", "fr"),
            network_action("open-be-1", "be"),
            network_action("open-nl-1", "nl"),
        ]
        .into_iter()
        .collect();
        let parameters =
            TreeParameters::default().with_usage_limits(RaUsageLimits::default().with_max_tso(1));
        let bloomer = bloomer(&fixture, &parameters, vec![]);
        let root = evaluated_root(&fixture);
        let child = evaluated_child(
            &fixture,
            &root,
            ActionCombination::single(network_action("open-be-2", "be")),
        );
        assert_eq!(ids(&bloomer.bloom(&child, &actions).unwrap()), vec!["open-be-1"]);
    }

    #[test]
    fn test_far_actions_are_skipped() {
        let fixture = Fixture::new();
        let grid = fixture
            .base_grid
            .clone()
            .with_element("open-de-1-element", "DE")
            .with_element("open-be-1-element", "BE")
            .with_element("DE-line", "DE")
            .with_border("BE", "NL")
            .with_border("NL", "DE");
        let actions: BTreeSet<_> = [
            network_action("open-be-1", "be"),
            network_action("open-de-1", "de"),
            network_action("open-xx-1", "xx"),
        ]
        .into_iter()
        .collect();
        let parameters = TreeParameters::default().with_skip_far_actions(1);
        let bloomer = SearchTreeBloomer::new(
            &grid,
            &parameters,
            vec![],
            fixture.range_actions.clone(),
            fixture.pre_perimeter_setpoints.clone(),
        );
        let root = evaluated_root(&fixture);
        // The limiting element is in FR: BE is one border away, DE three.
        assert_eq!(
            bloomer.most_limiting_elements_location(&root).unwrap(),
            BTreeSet::from([Some("FR".to_string())])
        );
        // open-xx-1 touches an element without a known zone.
        assert_eq!(
            ids(&bloomer.bloom(&root, &actions).unwrap()),
            vec!["open-be-1", "open-xx-1"]
        );

        let unlocated = BTreeSet::from([None]);
        let far = NetworkAction::new("open-de-1", Some("de"), vec!["DE-line".to_string()]);
        assert!(bloomer.is_network_action_close_to_locations(&far, &unlocated));
    }

    #[test]
    fn test_elementary_action_quota() {
        let fixture = Fixture::new();
        let actions: BTreeSet<_> = [
            Arc::new(NetworkAction::new("open-fr-1", Some("fr"), vec![]).with_elementary_actions(2)),
            Arc::new(NetworkAction::new("open-fr-2", Some("fr"), vec![]).with_elementary_actions(1)),
        ]
        .into_iter()
        .collect();
        let parameters = TreeParameters::default().with_usage_limits(
            RaUsageLimits::default().with_max_elementary_actions_per_tso("fr", 2),
        );
        let bloomer = bloomer(&fixture, &parameters, vec![]);
        let root = evaluated_root(&fixture);
        assert_eq!(
            ids(&bloomer.bloom(&root, &actions).unwrap()),
            vec!["open-fr-1", "open-fr-2"]
        );

        let open_fr_2 = actions.iter().find(|action| action.id == "open-fr-2").unwrap().clone();
        let child = evaluated_child(&fixture, &root, ActionCombination::single(open_fr_2));
        assert!(bloomer.bloom(&child, &actions).unwrap().is_empty());
    }
}
