//! Search tree configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::actions::OperatorId;
use crate::errors::RaoResult;
use crate::config_error;

/// When the search may stop before exhausting its depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopCriterion {
    /// Keep searching while some leaf improves the cost.
    #[default]
    MinObjective,
    /// Stop as soon as the cost falls below the target.
    AtTargetObjectiveValue { target: f64 },
}

/// Limits on the number of remedial actions used in the perimeter.
///
/// `None` means unlimited. Per-operator maps only constrain the listed operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaUsageLimits {
    /// Maximum number of remedial actions of any kind.
    pub max_ra: Option<usize>,
    /// Maximum number of distinct operators activating remedial actions.
    pub max_tso: Option<usize>,
    /// Maximum number of network actions per operator.
    pub max_topo_per_tso: BTreeMap<OperatorId, usize>,
    /// Maximum number of PST range actions per operator.
    pub max_pst_per_tso: BTreeMap<OperatorId, usize>,
    /// Maximum number of remedial actions of any kind per operator.
    pub max_ra_per_tso: BTreeMap<OperatorId, usize>,
    /// Maximum number of elementary actions per operator.
    pub max_elementary_actions_per_tso: BTreeMap<OperatorId, usize>,
}

impl RaUsageLimits {
    pub fn with_max_ra(mut self, max_ra: usize) -> Self {
        self.max_ra = Some(max_ra);
        self
    }

    pub fn with_max_tso(mut self, max_tso: usize) -> Self {
        self.max_tso = Some(max_tso);
        self
    }

    pub fn with_max_topo_per_tso(mut self, operator: &str, limit: usize) -> Self {
        self.max_topo_per_tso.insert(operator.to_string(), limit);
        self
    }

    pub fn with_max_pst_per_tso(mut self, operator: &str, limit: usize) -> Self {
        self.max_pst_per_tso.insert(operator.to_string(), limit);
        self
    }

    pub fn with_max_ra_per_tso(mut self, operator: &str, limit: usize) -> Self {
        self.max_ra_per_tso.insert(operator.to_string(), limit);
        self
    }

    pub fn with_max_elementary_actions_per_tso(mut self, operator: &str, limit: usize) -> Self {
        self.max_elementary_actions_per_tso
            .insert(operator.to_string(), limit);
        self
    }

    /// Network action quota of an operator: the tighter of its topo and ra limits
    pub fn max_network_actions_for(&self, operator: &str) -> Option<usize> {
        match (
            self.max_topo_per_tso.get(operator),
            self.max_ra_per_tso.get(operator),
        ) {
            (Some(topo), Some(ra)) => Some(*topo.min(ra)),
            (Some(limit), None) | (None, Some(limit)) => Some(*limit),
            (None, None) => None,
        }
    }
}

/// Resolved search tree parameters, read-only during a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParameters {
    pub stop_criterion: StopCriterion,
    /// Number of depths explored after the root.
    pub maximum_search_depth: usize,
    /// Number of leaves evaluated concurrently within a depth.
    pub leaves_in_parallel: usize,
    pub usage_limits: RaUsageLimits,
    /// Drop network actions located too far from the most limiting elements.
    pub skip_actions_far_from_most_limiting_element: bool,
    /// Number of borders an action may be away from a limiting element.
    pub max_number_of_boundaries_for_skipping_actions: usize,
    /// Groups of network action ids tested together.
    pub predefined_combinations: Vec<Vec<String>>,
    /// Give lower priority to range actions a leaf tried but left untouched.
    pub deprioritize_ignored_range_actions: bool,
    /// Wall-clock budget of the whole search, unlimited when absent.
    pub max_search_duration_seconds: Option<f64>,
}

impl Default for TreeParameters {
    fn default() -> Self {
        Self {
            stop_criterion: StopCriterion::MinObjective,
            maximum_search_depth: 3,
            leaves_in_parallel: 1,
            usage_limits: RaUsageLimits::default(),
            skip_actions_far_from_most_limiting_element: false,
            max_number_of_boundaries_for_skipping_actions: 2,
            predefined_combinations: Vec::new(),
            deprioritize_ignored_range_actions: false,
            max_search_duration_seconds: None,
        }
    }
}

impl TreeParameters {
    pub fn from_json_str(json: &str) -> RaoResult<Self> {
        let parameters: Self = serde_json::from_str(json)?;
        parameters.validate()?;
        Ok(parameters)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> RaoResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_stop_criterion(mut self, stop_criterion: StopCriterion) -> Self {
        self.stop_criterion = stop_criterion;
        self
    }

    pub fn with_maximum_search_depth(mut self, depth: usize) -> Self {
        self.maximum_search_depth = depth;
        self
    }

    pub fn with_leaves_in_parallel(mut self, leaves: usize) -> Self {
        self.leaves_in_parallel = leaves;
        self
    }

    pub fn with_usage_limits(mut self, usage_limits: RaUsageLimits) -> Self {
        self.usage_limits = usage_limits;
        self
    }

    pub fn with_skip_far_actions(mut self, max_boundaries: usize) -> Self {
        self.skip_actions_far_from_most_limiting_element = true;
        self.max_number_of_boundaries_for_skipping_actions = max_boundaries;
        self
    }

    pub fn with_predefined_combination(mut self, action_ids: &[&str]) -> Self {
        self.predefined_combinations
            .push(action_ids.iter().map(|id| id.to_string()).collect());
        self
    }

    pub fn with_deprioritize_ignored_range_actions(mut self, enabled: bool) -> Self {
        self.deprioritize_ignored_range_actions = enabled;
        self
    }

    pub fn with_max_search_duration_seconds(mut self, seconds: f64) -> Self {
        self.max_search_duration_seconds = Some(seconds);
        self
    }

    pub fn validate(&self) -> RaoResult<()> {
        if self.leaves_in_parallel == 0 {
            return Err(config_error!("leaves_in_parallel must be at least 1"));
        }
        if let StopCriterion::AtTargetObjectiveValue { target } = self.stop_criterion {
            if !target.is_finite() {
                return Err(config_error!("target objective value must be finite, got {}", target));
            }
        }
        if let Some(seconds) = self.max_search_duration_seconds {
            if !(seconds.is_finite() && seconds > 0.0) {
                return Err(config_error!(
                    "max_search_duration_seconds must be positive, got {}",
                    seconds
                ));
            }
        }
        if let Some(group) = self.predefined_combinations.iter().find(|group| group.is_empty()) {
            return Err(config_error!("predefined combination {:?} has no action", group));
        }
        Ok(())
    }
}

/// Problem descriptor handed to the linear optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParameters {
    pub max_number_of_iterations: usize,
    /// Setpoint changes below this value are not applied.
    pub setpoint_tolerance: f64,
}

impl Default for OptimizerParameters {
    fn default() -> Self {
        Self {
            max_number_of_iterations: 10,
            setpoint_tolerance: 1e-3,
        }
    }
}

/// Minimum improvement a network action must bring to be kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkActionThresholds {
    /// Absolute cost decrease required.
    pub absolute_minimum_impact_threshold: f64,
    /// Cost decrease required, as a fraction of the previous cost.
    pub relative_minimum_impact_threshold: f64,
}

/// Everything a search tree run is configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchTreeParameters {
    pub tree: TreeParameters,
    pub optimizer: OptimizerParameters,
    pub network_action_thresholds: NetworkActionThresholds,
}

impl SearchTreeParameters {
    pub fn new(tree: TreeParameters) -> Self {
        Self {
            tree,
            ..Default::default()
        }
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerParameters) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_thresholds(mut self, absolute: f64, relative: f64) -> Self {
        self.network_action_thresholds = NetworkActionThresholds {
            absolute_minimum_impact_threshold: absolute,
            relative_minimum_impact_threshold: relative,
        };
        self
    }

    pub fn validate(&self) -> RaoResult<()> {
        self.tree.validate()?;
        if self.optimizer.max_number_of_iterations == 0 {
            return Err(config_error!("max_number_of_iterations must be at least 1"));
        }
        if self.optimizer.setpoint_tolerance.is_nan() || self.optimizer.setpoint_tolerance < 0.0 {
            return Err(config_error!(
                "setpoint_tolerance must be non-negative, got {}",
                self.optimizer.setpoint_tolerance
            ));
        }
        let thresholds = &self.network_action_thresholds;
        let absolute = thresholds.absolute_minimum_impact_threshold;
        if absolute.is_nan() || absolute < 0.0 {
            return Err(config_error!(
                "absolute_minimum_impact_threshold must be non-negative, got {}",
                thresholds.absolute_minimum_impact_threshold
            ));
        }
        if !(0.0..=1.0).contains(&thresholds.relative_minimum_impact_threshold) {
            return Err(config_error!(
                "relative_minimum_impact_threshold must lie in [0, 1], got {}",
                thresholds.relative_minimum_impact_threshold
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> RaoResult<Self> {
        let parameters: Self = serde_json::from_str(json)?;
        parameters.validate()?;
        Ok(parameters)
    }
}
