use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::actions::{NetworkAction, RangeAction};

/// Zone (bidding zone or country) identifier
pub type ZoneId = String;

/// Instant at which a state is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstantKind {
    Preventive,
    Outage,
    Auto,
    Curative,
}

impl fmt::Display for InstantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstantKind::Preventive => "preventive",
            InstantKind::Outage => "outage",
            InstantKind::Auto => "auto",
            InstantKind::Curative => "curative",
        };
        write!(f, "{name}")
    }
}

/// A state of the perimeter: an instant, optionally after a contingency
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct State {
    pub instant: InstantKind,
    #[serde(default)]
    pub contingency: Option<String>,
}

impl State {
    pub fn preventive() -> Self {
        Self {
            instant: InstantKind::Preventive,
            contingency: None,
        }
    }

    pub fn after_contingency(instant: InstantKind, contingency: impl Into<String>) -> Self {
        Self {
            instant,
            contingency: Some(contingency.into()),
        }
    }

    pub fn is_preventive(&self) -> bool {
        self.instant == InstantKind::Preventive
    }

    pub fn id(&self) -> String {
        match &self.contingency {
            Some(contingency) => format!("{contingency} - {}", self.instant),
            None => self.instant.to_string(),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Snapshot of the grid a leaf is evaluated on.
///
/// Only carries what the search needs: where each network element sits,
/// which zones share a border, which network actions are applied and the
/// current setpoint of every range action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GridState {
    pub variant_id: String,
    #[serde(default)]
    pub element_zones: BTreeMap<String, ZoneId>,
    #[serde(default)]
    pub borders: Vec<(ZoneId, ZoneId)>,
    #[serde(default)]
    pub applied_network_actions: BTreeSet<String>,
    #[serde(default)]
    pub setpoints: BTreeMap<String, f64>,
}

impl GridState {
    pub fn new(variant_id: impl Into<String>) -> Self {
        Self {
            variant_id: variant_id.into(),
            ..Default::default()
        }
    }

    pub fn with_element(mut self, element: impl Into<String>, zone: impl Into<ZoneId>) -> Self {
        self.element_zones.insert(element.into(), zone.into());
        self
    }

    pub fn with_border(mut self, zone_a: impl Into<ZoneId>, zone_b: impl Into<ZoneId>) -> Self {
        self.borders.push((zone_a.into(), zone_b.into()));
        self
    }

    pub fn with_setpoint(mut self, range_action_id: impl Into<String>, setpoint: f64) -> Self {
        self.setpoints.insert(range_action_id.into(), setpoint);
        self
    }

    pub fn zone_of(&self, element: &str) -> Option<&ZoneId> {
        self.element_zones.get(element)
    }

    pub fn zones(&self) -> BTreeSet<&ZoneId> {
        self.element_zones
            .values()
            .chain(self.borders.iter().flat_map(|(a, b)| [a, b]))
            .collect()
    }

    /// Returns false when the action was already applied
    pub fn apply_network_action(&mut self, action: &NetworkAction) -> bool {
        self.applied_network_actions.insert(action.id.clone())
    }

    pub fn is_applied(&self, action: &NetworkAction) -> bool {
        self.applied_network_actions.contains(&action.id)
    }

    pub fn set_setpoint(&mut self, range_action: &RangeAction, setpoint: f64) {
        self.setpoints
            .insert(range_action.id.clone(), range_action.clamp_setpoint(setpoint));
    }

    pub fn setpoint(&self, range_action_id: &str) -> Option<f64> {
        self.setpoints.get(range_action_id).copied()
    }

    /// Restores the content of `base` while keeping this variant's name.
    pub fn reset_to(&mut self, base: &GridState) {
        self.element_zones.clone_from(&base.element_zones);
        self.borders.clone_from(&base.borders);
        self.applied_network_actions
            .clone_from(&base.applied_network_actions);
        self.setpoints.clone_from(&base.setpoints);
    }

    pub fn variant(&self, variant_id: impl Into<String>) -> GridState {
        GridState {
            variant_id: variant_id.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::RangeActionKind;

    #[test]
    fn test_state_id() {
        assert_eq!(State::preventive().id(), "preventive");
        let state = State::after_contingency(InstantKind::Curative, "co-1");
        assert_eq!(state.id(), "co-1 - curative");
        assert!(!state.is_preventive());
    }

    #[test]
    fn test_reset_keeps_variant_name() {
        let base = GridState::new("base")
            .with_element("line-1", "FR")
            .with_border("FR", "BE")
            .with_setpoint("pst-1", 0.0);
        let mut variant = base.variant("variant-0");

        let action = NetworkAction::new("open-line-1", Some("fr"), vec!["line-1".into()]);
        let pst = RangeAction::new("pst-1", Some("fr"), RangeActionKind::Pst, -10.0, 10.0);
        assert!(variant.apply_network_action(&action));
        assert!(!variant.apply_network_action(&action));
        variant.set_setpoint(&pst, 25.0);
        assert_eq!(variant.setpoint("pst-1"), Some(10.0));

        variant.reset_to(&base);
        assert_eq!(variant.variant_id, "variant-0");
        assert!(!variant.is_applied(&action));
        assert_eq!(variant.setpoint("pst-1"), Some(0.0));
    }

    #[test]
    fn test_zones() {
        let grid = GridState::new("base")
            .with_element("line-1", "FR")
            .with_border("BE", "NL");
        let zones: Vec<_> = grid.zones().into_iter().cloned().collect();
        assert_eq!(zones, vec!["BE", "FR", "NL"]);
        assert_eq!(grid.zone_of("line-1").map(String::as_str), Some("FR"));
        assert!(grid.zone_of("line-2").is_none());
    }
}
