use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cnec::FlowCnec;
use crate::network::{GridState, InstantKind, State, ZoneId};
use crate::results::FlowResult;

/// Operator (TSO) owning a remedial action
pub type OperatorId = String;

/// How a remedial action may be used in a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMethod {
    Available,
    Forced,
    ToBeEvaluated,
    Undefined,
}

impl UsageMethod {
    fn strength(self) -> u8 {
        match self {
            UsageMethod::Forced => 3,
            UsageMethod::ToBeEvaluated => 2,
            UsageMethod::Available => 1,
            UsageMethod::Undefined => 0,
        }
    }

    /// Keeps the most restrictive of two methods
    pub fn strongest(self, other: UsageMethod) -> UsageMethod {
        if other.strength() > self.strength() {
            other
        } else {
            self
        }
    }
}

/// Condition under which a remedial action may be used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UsageRule {
    OnInstant {
        instant: InstantKind,
        usage_method: UsageMethod,
    },
    OnContingencyState {
        state: State,
        usage_method: UsageMethod,
    },
    OnConstraint {
        instant: InstantKind,
        cnec_id: String,
        usage_method: UsageMethod,
    },
    OnFlowConstraintInCountry {
        instant: InstantKind,
        country: ZoneId,
        usage_method: UsageMethod,
    },
}

impl UsageRule {
    pub fn available_on(instant: InstantKind) -> Self {
        UsageRule::OnInstant {
            instant,
            usage_method: UsageMethod::Available,
        }
    }

    /// Method this rule grants in `state`, `Undefined` if the rule does not apply to it.
    pub fn usage_method(&self, state: &State) -> UsageMethod {
        let (applies, method) = match self {
            UsageRule::OnInstant {
                instant,
                usage_method,
            } => (*instant == state.instant, *usage_method),
            UsageRule::OnContingencyState {
                state: rule_state,
                usage_method,
            } => (rule_state == state, *usage_method),
            UsageRule::OnConstraint {
                instant,
                usage_method,
                ..
            } => (*instant == state.instant, *usage_method),
            UsageRule::OnFlowConstraintInCountry {
                instant,
                usage_method,
                ..
            } => (*instant == state.instant, *usage_method),
        };
        if applies {
            method
        } else {
            UsageMethod::Undefined
        }
    }

    /// Whether the margin condition attached to the rule holds for the given flows.
    ///
    /// A constraint is active when its margin is negative or zero. Rules
    /// without a margin condition never trigger.
    pub fn is_triggered(&self, cnecs: &[Arc<FlowCnec>], grid: &GridState, flows: &FlowResult) -> bool {
        match self {
            UsageRule::OnInstant { .. } | UsageRule::OnContingencyState { .. } => false,
            UsageRule::OnConstraint { cnec_id, .. } => cnecs
                .iter()
                .filter(|cnec| &cnec.id == cnec_id)
                .any(|cnec| is_constrained(cnec, flows)),
            UsageRule::OnFlowConstraintInCountry { country, .. } => cnecs
                .iter()
                .filter(|cnec| cnec.location(grid) == Some(country))
                .any(|cnec| is_constrained(cnec, flows)),
        }
    }
}

fn is_constrained(cnec: &FlowCnec, flows: &FlowResult) -> bool {
    flows
        .margin(cnec)
        .map(|margin| margin <= 0.0)
        .unwrap_or(false)
}

/// Common accessors of network and range actions
pub trait RemedialAction {
    fn id(&self) -> &str;
    fn operator(&self) -> Option<&str>;
    fn network_elements(&self) -> &[String];
    fn usage_rules(&self) -> &[UsageRule];

    /// Zones of the touched network elements, `None` for unlocated elements
    fn location(&self, grid: &GridState) -> BTreeSet<Option<ZoneId>> {
        self.network_elements()
            .iter()
            .map(|element| grid.zone_of(element).cloned())
            .collect()
    }

    fn usage_method(&self, state: &State) -> UsageMethod {
        self.usage_rules()
            .iter()
            .map(|rule| rule.usage_method(state))
            .fold(UsageMethod::Undefined, UsageMethod::strongest)
    }

    fn is_available(
        &self,
        state: &State,
        cnecs: &[Arc<FlowCnec>],
        grid: &GridState,
        flows: &FlowResult,
    ) -> bool {
        match self.usage_method(state) {
            UsageMethod::Available | UsageMethod::Forced => true,
            UsageMethod::ToBeEvaluated => self.usage_rules().iter().any(|rule| {
                rule.usage_method(state) == UsageMethod::ToBeEvaluated
                    && rule.is_triggered(cnecs, grid, flows)
            }),
            UsageMethod::Undefined => false,
        }
    }
}

macro_rules! identified_by_id {
    ($ty:ty) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $ty {}

        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.id.cmp(&other.id)
            }
        }

        impl std::hash::Hash for $ty {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                std::hash::Hash::hash(&self.id, state);
            }
        }
    };
}

pub(crate) use identified_by_id;

/// Discrete (topological) remedial action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAction {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub operator: Option<OperatorId>,
    #[serde(default)]
    pub network_elements: Vec<String>,
    #[serde(default = "default_elementary_actions")]
    pub elementary_actions: usize,
    #[serde(default)]
    pub usage_rules: Vec<UsageRule>,
}

fn default_elementary_actions() -> usize {
    1
}

identified_by_id!(NetworkAction);

impl NetworkAction {
    pub fn new(id: impl Into<String>, operator: Option<&str>, network_elements: Vec<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            operator: operator.map(str::to_string),
            network_elements,
            elementary_actions: 1,
            usage_rules: vec![UsageRule::available_on(InstantKind::Preventive)],
        }
    }

    pub fn with_elementary_actions(mut self, count: usize) -> Self {
        self.elementary_actions = count;
        self
    }

    pub fn with_usage_rules(mut self, usage_rules: Vec<UsageRule>) -> Self {
        self.usage_rules = usage_rules;
        self
    }
}

impl RemedialAction for NetworkAction {
    fn id(&self) -> &str {
        &self.id
    }

    fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    fn network_elements(&self) -> &[String] {
        &self.network_elements
    }

    fn usage_rules(&self) -> &[UsageRule] {
        &self.usage_rules
    }
}

/// Kind of continuous remedial action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeActionKind {
    Pst,
    Hvdc,
    Injection,
    CounterTrade,
}

/// Continuous remedial action with an admissible setpoint range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeAction {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub operator: Option<OperatorId>,
    pub kind: RangeActionKind,
    #[serde(default)]
    pub network_elements: Vec<String>,
    pub min_setpoint: f64,
    pub max_setpoint: f64,
    /// Setpoint change of one tap, for tap-based actions
    #[serde(default)]
    pub setpoint_per_tap: Option<f64>,
    /// Actions sharing a group id move together
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub usage_rules: Vec<UsageRule>,
}

identified_by_id!(RangeAction);

impl RangeAction {
    pub fn new(
        id: impl Into<String>,
        operator: Option<&str>,
        kind: RangeActionKind,
        min_setpoint: f64,
        max_setpoint: f64,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            operator: operator.map(str::to_string),
            kind,
            network_elements: Vec::new(),
            min_setpoint,
            max_setpoint,
            setpoint_per_tap: None,
            group_id: None,
            usage_rules: vec![UsageRule::available_on(InstantKind::Preventive)],
        }
    }

    pub fn with_network_elements(mut self, network_elements: Vec<String>) -> Self {
        self.network_elements = network_elements;
        self
    }

    pub fn with_setpoint_per_tap(mut self, setpoint_per_tap: f64) -> Self {
        self.setpoint_per_tap = Some(setpoint_per_tap);
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_usage_rules(mut self, usage_rules: Vec<UsageRule>) -> Self {
        self.usage_rules = usage_rules;
        self
    }

    pub fn is_pst(&self) -> bool {
        self.kind == RangeActionKind::Pst
    }

    pub fn clamp_setpoint(&self, setpoint: f64) -> f64 {
        setpoint.clamp(self.min_setpoint, self.max_setpoint)
    }

    pub fn setpoint_to_tap(&self, setpoint: f64) -> Option<i32> {
        self.setpoint_per_tap
            .filter(|step| step.abs() > f64::EPSILON)
            .map(|step| (setpoint / step).round() as i32)
    }
}

impl RemedialAction for RangeAction {
    fn id(&self) -> &str {
        &self.id
    }

    fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    fn network_elements(&self) -> &[String] {
        &self.network_elements
    }

    fn usage_rules(&self) -> &[UsageRule] {
        &self.usage_rules
    }
}
