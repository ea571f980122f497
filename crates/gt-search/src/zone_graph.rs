//! Border distance between the zones of a grid.

use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::BTreeMap;

use gt_types::{GridState, ZoneId};

/// Adjacency of the zones of a grid, one edge per border.
#[derive(Debug, Clone)]
pub struct ZoneGraph {
    graph: UnGraph<ZoneId, ()>,
    nodes: BTreeMap<ZoneId, NodeIndex>,
}

impl ZoneGraph {
    pub fn new(grid: &GridState) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut nodes = BTreeMap::new();
        for zone in grid.zones() {
            nodes.insert(zone.clone(), graph.add_node(zone.clone()));
        }
        for (zone_a, zone_b) in &grid.borders {
            if let (Some(&a), Some(&b)) = (nodes.get(zone_a), nodes.get(zone_b)) {
                if a != b && graph.find_edge(a, b).is_none() {
                    graph.add_edge(a, b, ());
                }
            }
        }
        Self { graph, nodes }
    }

    pub fn zone_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of borders crossed on the shortest path between two zones
    pub fn boundaries_between(&self, zone_a: &str, zone_b: &str) -> Option<usize> {
        let start = *self.nodes.get(zone_a)?;
        let goal = *self.nodes.get(zone_b)?;
        let distances = dijkstra(&self.graph, start, Some(goal), |_| 1usize);
        distances.get(&goal).copied()
    }

    /// Whether at most `max_boundaries` borders separate the two zones.
    pub fn are_neighbors(&self, zone_a: &str, zone_b: &str, max_boundaries: usize) -> bool {
        self.boundaries_between(zone_a, zone_b)
            .is_some_and(|boundaries| boundaries <= max_boundaries)
    }
}
