use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::actions::{NetworkAction, OperatorId};
use crate::errors::{RaoError, RaoResult};

/// Network actions tested together as a single candidate.
///
/// The member set is fixed at construction. The concatenated id lists the
/// member ids in sorted order, so equal sets always share the same id.
#[derive(Debug, Clone)]
pub struct ActionCombination {
    actions: BTreeSet<Arc<NetworkAction>>,
    concatenated_id: String,
    detected_during_rao: bool,
}

impl ActionCombination {
    pub fn new(actions: impl IntoIterator<Item = Arc<NetworkAction>>) -> RaoResult<Self> {
        let actions: BTreeSet<_> = actions.into_iter().collect();
        if actions.is_empty() {
            return Err(RaoError::EmptyCombination);
        }
        let concatenated_id = actions
            .iter()
            .map(|action| action.id.as_str())
            .collect::<Vec<_>>()
            .join(" + ");
        Ok(Self {
            actions,
            concatenated_id,
            detected_during_rao: false,
        })
    }

    pub fn single(action: Arc<NetworkAction>) -> Self {
        Self {
            concatenated_id: action.id.clone(),
            actions: BTreeSet::from([action]),
            detected_during_rao: false,
        }
    }

    /// Marks a combination found by an earlier optimization step
    pub fn detected_during_rao(mut self) -> Self {
        self.detected_during_rao = true;
        self
    }

    pub fn is_detected_during_rao(&self) -> bool {
        self.detected_during_rao
    }

    pub fn members(&self) -> &BTreeSet<Arc<NetworkAction>> {
        &self.actions
    }

    pub fn contains(&self, action: &NetworkAction) -> bool {
        self.actions.contains(action)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Always false, construction refuses empty sets
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn operators(&self) -> BTreeSet<OperatorId> {
        self.actions
            .iter()
            .filter_map(|action| action.operator.clone())
            .collect()
    }

    pub fn concatenated_id(&self) -> &str {
        &self.concatenated_id
    }

    pub fn elementary_actions_per_operator(&self) -> BTreeMap<OperatorId, usize> {
        let mut counts = BTreeMap::new();
        for action in &self.actions {
            if let Some(operator) = &action.operator {
                *counts.entry(operator.clone()).or_insert(0) += action.elementary_actions;
            }
        }
        counts
    }

    pub fn actions_per_operator(&self) -> BTreeMap<OperatorId, usize> {
        let mut counts = BTreeMap::new();
        for operator in self.actions.iter().filter_map(|action| action.operator.as_ref()) {
            *counts.entry(operator.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl PartialEq for ActionCombination {
    fn eq(&self, other: &Self) -> bool {
        self.actions == other.actions
    }
}

impl Eq for ActionCombination {}

impl fmt::Display for ActionCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.concatenated_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: &str, operator: &str) -> Arc<NetworkAction> {
        Arc::new(NetworkAction::new(id, Some(operator), vec![]))
    }

    #[test]
    fn test_concatenated_id_is_order_independent() {
        let first = ActionCombination::new(vec![action("b", "fr"), action("a", "be")]).unwrap();
        let second = ActionCombination::new(vec![action("a", "be"), action("b", "fr")]).unwrap();
        assert_eq!(first.concatenated_id(), "a + b");
        assert_eq!(first.concatenated_id(), second.concatenated_id());
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_combination_is_rejected() {
        let result = ActionCombination::new(Vec::new());
        assert!(matches!(result, Err(RaoError::EmptyCombination)));
    }

    #[test]
    fn test_operators_and_counts() {
        let unowned = Arc::new(NetworkAction::new("c", None, vec![]));
        let heavy = Arc::new(NetworkAction::new("d", Some("fr"), vec![]).with_elementary_actions(3));
        let combination =
            ActionCombination::new(vec![action("a", "fr"), action("b", "be"), unowned, heavy]).unwrap();

        let operators: Vec<_> = combination.operators().into_iter().collect();
        assert_eq!(operators, vec!["be", "fr"]);
        assert_eq!(combination.actions_per_operator()["fr"], 2);
        assert_eq!(combination.elementary_actions_per_operator()["fr"], 4);
        assert_eq!(combination.len(), 4);
    }

    #[test]
    fn test_single() {
        let combination = ActionCombination::single(action("a", "fr")).detected_during_rao();
        assert_eq!(combination.concatenated_id(), "a");
        assert!(combination.is_detected_during_rao());
        assert!(combination.contains(&NetworkAction::new("a", None, vec![])));
    }
}
