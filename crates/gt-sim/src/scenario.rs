use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use gt_search::SearchTreeInput;
use gt_types::{
    validation_error, ActionCombination, FlowCnec, GridState, NetworkAction,
    RangeAction, RaoError, RaoResult, SearchTreeParameters, State, UsageRule, ZoneId,
};

use crate::model::{LinearModelConfig, LinearSensitivityModel};
use crate::objective::{MinMarginConfig, MinMarginObjective};
use crate::optimizer::GreedySetpointOptimizer;

/// A complete perimeter described in JSON: grid, actions, monitored elements,
/// linear model coefficients and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "State::preventive")]
    pub state: State,
    /// network element -> zone
    #[serde(default)]
    pub element_zones: BTreeMap<String, ZoneId>,
    #[serde(default)]
    pub borders: Vec<(ZoneId, ZoneId)>,
    pub cnecs: Vec<FlowCnec>,
    #[serde(default)]
    pub network_actions: Vec<NetworkAction>,
    #[serde(default)]
    pub range_actions: Vec<RangeAction>,
    #[serde(default)]
    pub pre_perimeter_setpoints: BTreeMap<String, f64>,
    /// Groups of network action ids found efficient by an earlier step
    #[serde(default)]
    pub detected_combinations: Vec<Vec<String>>,
    #[serde(default)]
    pub model: LinearModelConfig,
    #[serde(default)]
    pub objective: MinMarginConfig,
    #[serde(default)]
    pub parameters: SearchTreeParameters,
}

/// Everything needed to run the search on a scenario.
pub struct ScenarioRun {
    pub input: SearchTreeInput,
    pub parameters: SearchTreeParameters,
    pub model: Arc<LinearSensitivityModel>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> RaoResult<Self> {
        let scenario: Self = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> RaoResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> RaoResult<()> {
        self.parameters.validate()?;
        if self.cnecs.is_empty() {
            return Err(validation_error!("scenario {} has no cnec", self.name));
        }
        check_unique("cnec", self.cnecs.iter().map(|cnec| cnec.id.as_str()))?;
        check_unique(
            "network action",
            self.network_actions.iter().map(|action| action.id.as_str()),
        )?;
        check_unique(
            "range action",
            self.range_actions.iter().map(|action| action.id.as_str()),
        )?;
        for range_action in &self.range_actions {
            if range_action.min_setpoint.is_nan()
                || range_action.max_setpoint.is_nan()
                || range_action.min_setpoint > range_action.max_setpoint
            {
                return Err(validation_error!(
                    "range action {} has an empty range [{}, {}]",
                    range_action.id,
                    range_action.min_setpoint,
                    range_action.max_setpoint
                ));
            }
        }
        for cnec in &self.cnecs {
            if !self.model.base_flows.contains_key(&cnec.id) {
                return Err(validation_error!("no base flow for cnec {}", cnec.id));
            }
        }
        for action_id in self.model.network_action_impacts.keys() {
            if !self.network_actions.iter().any(|action| &action.id == action_id) {
                warn!("Model has impacts for unknown network action {}", action_id);
            }
        }
        Ok(())
    }

    /// Builds the search input with the reference collaborators.
    pub fn build(self) -> RaoResult<ScenarioRun> {
        let mut base_grid = GridState::new(self.name.clone());
        base_grid.element_zones = self.element_zones;
        base_grid.borders = self.borders;

        let network_actions: BTreeSet<Arc<NetworkAction>> = self
            .network_actions
            .into_iter()
            .map(|mut action| {
                if action.name.is_empty() {
                    action.name = action.id.clone();
                }
                if action.usage_rules.is_empty() {
                    action.usage_rules = vec![UsageRule::available_on(self.state.instant)];
                }
                Arc::new(action)
            })
            .collect();

        let mut pre_perimeter_setpoints = self.pre_perimeter_setpoints;
        let mut model = self.model;
        let mut range_actions = BTreeSet::new();
        for mut range_action in self.range_actions {
            if range_action.name.is_empty() {
                range_action.name = range_action.id.clone();
            }
            if range_action.usage_rules.is_empty() {
                range_action.usage_rules = vec![UsageRule::available_on(self.state.instant)];
            }
            let setpoint = *pre_perimeter_setpoints
                .entry(range_action.id.clone())
                .or_insert_with(|| range_action.clamp_setpoint(0.0));
            model
                .reference_setpoints
                .entry(range_action.id.clone())
                .or_insert(setpoint);
            base_grid.set_setpoint(&range_action, setpoint);
            range_actions.insert(Arc::new(range_action));
        }

        let mut detected_combinations = Vec::with_capacity(self.detected_combinations.len());
        for action_ids in &self.detected_combinations {
            let members = action_ids
                .iter()
                .map(|id| {
                    network_actions
                        .iter()
                        .find(|action| &action.id == id)
                        .cloned()
                        .ok_or_else(|| RaoError::unknown("network action", id.clone()))
                })
                .collect::<RaoResult<Vec<_>>>()?;
            detected_combinations.push(ActionCombination::new(members)?);
        }

        let cnecs: Vec<Arc<FlowCnec>> = self.cnecs.into_iter().map(Arc::new).collect();
        let model = Arc::new(LinearSensitivityModel::new(model));
        info!(
            scenario = %self.name,
            "Loaded {} cnecs, {} network actions and {} range actions",
            cnecs.len(),
            network_actions.len(),
            range_actions.len()
        );

        Ok(ScenarioRun {
            input: SearchTreeInput {
                state: self.state,
                base_grid,
                network_actions,
                range_actions,
                objective_function: Arc::new(MinMarginObjective::new(&cnecs, self.objective)),
                cnecs,
                pre_perimeter_setpoints,
                detected_combinations,
                sensitivity_engine: model.clone(),
                linear_optimizer: Arc::new(GreedySetpointOptimizer::new()),
            },
            parameters: self.parameters,
            model,
        })
    }
}

fn check_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> RaoResult<()> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(validation_error!("duplicate {} id {}", kind, id));
        }
    }
    Ok(())
}
