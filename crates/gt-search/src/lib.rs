//! # gt-search
//!
//! Search-tree exploration of remedial action combinations for GridTree.
//!
//! Starting from a root leaf holding the pre-perimeter situation, each depth
//! blooms the network action combinations worth trying on top of the best leaf
//! so far, evaluates and optimizes them on a bounded pool of grid variants,
//! and keeps the cheapest one when it improves enough.

mod bloomer;
mod leaf;
mod pool;
mod range_action_filter;
mod search_tree;
mod traits;
mod zone_graph;

#[cfg(test)]
mod test_support;

pub use bloomer::SearchTreeBloomer;
pub use leaf::{
    EvaluationOutcome, Leaf, LeafArena, LeafId, LeafStatus, OptimizationContext,
    OptimizationOutcome, SkipReason, RANGE_ACTION_USED_TOLERANCE,
};
pub use pool::{GridStatePool, PooledGrid};
pub use range_action_filter::RangeActionFilter;
pub use search_tree::{SearchTree, SearchTreeInput, SearchTreeResult, SearchTreeSummary, StopReason};
pub use traits::{LinearOptimizationInput, LinearOptimizer, ObjectiveFunction, SensitivityEngine};
pub use zone_graph::ZoneGraph;
