//! # gt-sim
//!
//! Reference collaborators for the GridTree search tree.
//!
//! Provides a linearized sensitivity model, a min-margin objective function,
//! a greedy setpoint optimizer and a JSON scenario format tying them to a
//! complete search input.

mod model;
mod objective;
mod optimizer;
mod scenario;

pub use model::{LinearModelConfig, LinearSensitivityModel, ModelStats};
pub use objective::{MinMarginConfig, MinMarginObjective, MNEC_VIOLATION, SENSITIVITY_FAILURE};
pub use optimizer::GreedySetpointOptimizer;
pub use scenario::{Scenario, ScenarioRun};

/// Scenario shipped with the crate, used by the demo and the tests
pub const FR_BE_CONGESTION: &str = include_str!("../scenarios/fr-be-congestion.json");
