//! Graph-based long-distance pathing.
//!
//! A [`PlatformGraph`] is a static, read-only set of [`Waypoint`]s joined by
//! weighted edges, loaded once from JSON and shared behind an `Arc`.
//! [`PathPlanner::plan`] snaps the start and goal to their nearest nodes and
//! runs A* with a closed set and an iteration cap.  The heuristic is the
//! straight-line distance scaled by the smallest weight/length ratio found
//! in the graph, so a graph with "cheap" edges (weight below length) keeps
//! the heuristic admissible and the returned path optimal.
//!
//! Unreachable goals are not errors: the planner returns
//! [`Plan::NoPath`] together with the explored node closest to the goal so
//! the caller can still make best-effort progress.
//!
//! # Example
//!
//! ```rust
//! use glide_runtime::path_planner::{PathPlanner, Plan, PlannerConfig, PlatformGraph};
//! use glide_types::Point;
//!
//! let graph = PlatformGraph::from_json(r#"{
//!     "nodes": [
//!         {"id": 0, "x": 0.0,  "y": 100.0},
//!         {"id": 1, "x": 50.0, "y": 100.0},
//!         {"id": 2, "x": 50.0, "y": 70.0}
//!     ],
//!     "edges": [
//!         {"from": 0, "to": 1},
//!         {"from": 1, "to": 2}
//!     ]
//! }"#).unwrap();
//!
//! let planner = PathPlanner::new(graph.into(), PlannerConfig::default());
//! match planner.plan(Point::new(2.0, 100.0), Point::new(50.0, 70.0)) {
//!     Plan::Found(path) => assert_eq!(path.iter().map(|w| w.id).collect::<Vec<_>>(), [0, 1, 2]),
//!     Plan::NoPath { reason, .. } => panic!("{reason}"),
//! }
//! ```

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use glide_types::{MoveError, Point};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Graph
// ─────────────────────────────────────────────────────────────────────────────

/// A graph node: a standing position on some platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    /// Known-good position for vertical traversal (e.g. under a rope).
    #[serde(default)]
    pub anchor: bool,
}

impl Waypoint {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

fn default_bidirectional() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
    /// Traversal cost; the straight-line length when omitted.
    #[serde(default)]
    pub weight: Option<f32>,
    #[serde(default = "default_bidirectional")]
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphFile {
    nodes: Vec<Waypoint>,
    #[serde(default)]
    edges: Vec<Edge>,
}

/// Immutable platform graph with a prebuilt adjacency list.
#[derive(Debug, Clone, Default)]
pub struct PlatformGraph {
    nodes: Vec<Waypoint>,
    edges: Vec<Edge>,
    /// `adjacency[i]` = `(neighbour index, cost)`.
    adjacency: Vec<Vec<(usize, f32)>>,
    /// Smallest `cost / length` over all edges, at most 1.
    heuristic_scale: f32,
}

impl PlatformGraph {
    /// Build a graph, validating every edge.
    ///
    /// # Errors
    ///
    /// [`MoveError::PlanningFailure`] for duplicate node ids, edges naming
    /// unknown nodes, or negative / non-finite weights.
    pub fn new(nodes: Vec<Waypoint>, edges: Vec<Edge>) -> Result<Self, MoveError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id, i).is_some() {
                return Err(MoveError::PlanningFailure(format!("duplicate node id {}", node.id)));
            }
        }

        let mut adjacency = vec![Vec::new(); nodes.len()];
        let mut heuristic_scale: f32 = 1.0;
        for edge in &edges {
            let lookup = |id: u32| {
                index
                    .get(&id)
                    .copied()
                    .ok_or_else(|| MoveError::PlanningFailure(format!("edge references unknown node {id}")))
            };
            let (a, b) = (lookup(edge.from)?, lookup(edge.to)?);
            let length = nodes[a].point().distance(&nodes[b].point());
            let cost = edge.weight.unwrap_or(length);
            if !cost.is_finite() || cost < 0.0 {
                return Err(MoveError::PlanningFailure(format!(
                    "edge {}->{} has invalid weight {cost}",
                    edge.from, edge.to
                )));
            }
            if length > f32::EPSILON {
                heuristic_scale = heuristic_scale.min(cost / length);
            }
            adjacency[a].push((b, cost));
            if edge.bidirectional {
                adjacency[b].push((a, cost));
            }
        }

        Ok(Self {
            nodes,
            edges,
            adjacency,
            heuristic_scale,
        })
    }

    /// Parse the JSON graph format (`{"nodes": [...], "edges": [...]}`).
    pub fn from_json(json: &str) -> Result<Self, MoveError> {
        let file: GraphFile =
            serde_json::from_str(json).map_err(|e| MoveError::PlanningFailure(format!("invalid graph: {e}")))?;
        Self::new(file.nodes, file.edges)
    }

    pub fn to_json(&self) -> Result<String, MoveError> {
        let file = GraphFile {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        };
        serde_json::to_string_pretty(&file).map_err(|e| MoveError::PlanningFailure(e.to_string()))
    }

    pub fn nodes(&self) -> &[Waypoint] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn anchors(&self) -> impl Iterator<Item = &Waypoint> {
        self.nodes.iter().filter(|n| n.anchor)
    }

    fn nearest_index(&self, to: Point) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.point().distance(&to).total_cmp(&b.1.point().distance(&to)))
            .map(|(i, _)| i)
    }

    /// Node closest to `to` by straight-line distance.
    pub fn nearest(&self, to: Point) -> Option<&Waypoint> {
        self.nearest_index(to).map(|i| &self.nodes[i])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Planner
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Node expansions before the search gives up.
    pub max_iterations: usize,
    /// Longest acceptable path, in nodes.
    pub max_path_nodes: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            max_path_nodes: 64,
        }
    }
}

/// Result of a planning request.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Waypoints from the node nearest the start to the node nearest the goal.
    Found(Vec<Waypoint>),
    NoPath {
        /// Explored node closest to the goal, if anything was explored.
        nearest_reachable: Option<Waypoint>,
        reason: String,
    },
}

/// Min-heap entry ordered by `f = g + h`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenEntry {
    f: f32,
    g: f32,
    node: usize,
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap; ties broken toward deeper nodes.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| self.g.total_cmp(&other.g))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct PathPlanner {
    graph: Arc<PlatformGraph>,
    config: PlannerConfig,
}

impl PathPlanner {
    pub fn new(graph: Arc<PlatformGraph>, config: PlannerConfig) -> Self {
        Self { graph, config }
    }

    pub fn graph(&self) -> &Arc<PlatformGraph> {
        &self.graph
    }

    pub fn plan(&self, start: Point, goal: Point) -> Plan {
        let graph = &*self.graph;
        let (Some(s), Some(g)) = (graph.nearest_index(start), graph.nearest_index(goal)) else {
            return Plan::NoPath {
                nearest_reachable: None,
                reason: "platform graph is empty".to_string(),
            };
        };

        let goal_point = graph.nodes[g].point();
        let distance = |i: usize| graph.nodes[i].point().distance(&goal_point);
        let h = |i: usize| distance(i) * graph.heuristic_scale;

        let n = graph.nodes.len();
        let mut g_score = vec![f32::INFINITY; n];
        let mut came_from: Vec<Option<usize>> = vec![None; n];
        let mut closed = vec![false; n];
        let mut open = BinaryHeap::new();
        let mut best = s;

        g_score[s] = 0.0;
        open.push(OpenEntry { f: h(s), g: 0.0, node: s });

        let mut iterations = 0;
        let found = loop {
            let Some(OpenEntry { g: cost, node, .. }) = open.pop() else {
                break false;
            };
            if closed[node] {
                continue;
            }
            closed[node] = true;
            if distance(node) < distance(best) {
                best = node;
            }
            if node == g {
                break true;
            }
            iterations += 1;
            if iterations > self.config.max_iterations {
                warn!(iterations, "path search hit its iteration cap");
                return Plan::NoPath {
                    nearest_reachable: Some(graph.nodes[best].clone()),
                    reason: format!("search exceeded {} iterations", self.config.max_iterations),
                };
            }
            for &(next, weight) in &graph.adjacency[node] {
                if closed[next] {
                    continue;
                }
                let tentative = cost + weight;
                if tentative < g_score[next] {
                    g_score[next] = tentative;
                    came_from[next] = Some(node);
                    open.push(OpenEntry {
                        f: tentative + h(next),
                        g: tentative,
                        node: next,
                    });
                }
            }
        };

        if !found {
            let nearest = &graph.nodes[best];
            debug!(goal = %goal, nearest = %nearest.point(), "goal unreachable");
            return Plan::NoPath {
                nearest_reachable: Some(nearest.clone()),
                reason: format!("node {} is not reachable from node {}", graph.nodes[g].id, graph.nodes[s].id),
            };
        }

        let mut path = vec![g];
        let mut cursor = g;
        while let Some(prev) = came_from[cursor] {
            path.push(prev);
            cursor = prev;
        }
        path.reverse();

        if path.len() > self.config.max_path_nodes {
            return Plan::NoPath {
                nearest_reachable: Some(graph.nodes[path[self.config.max_path_nodes.saturating_sub(1)]].clone()),
                reason: format!(
                    "path needs {} nodes, limit is {}",
                    path.len(),
                    self.config.max_path_nodes
                ),
            };
        }

        debug!(nodes = path.len(), cost = g_score[g], "path planned");
        Plan::Found(path.into_iter().map(|i| graph.nodes[i].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(id: u32, x: f32, y: f32) -> Waypoint {
        Waypoint { id, x, y, anchor: false }
    }

    fn edge(from: u32, to: u32, weight: Option<f32>) -> Edge {
        Edge {
            from,
            to,
            weight,
            bidirectional: true,
        }
    }

    fn ids(plan: &Plan) -> Vec<u32> {
        match plan {
            Plan::Found(path) => path.iter().map(|w| w.id).collect(),
            Plan::NoPath { reason, .. } => panic!("no path: {reason}"),
        }
    }

    fn planner(nodes: Vec<Waypoint>, edges: Vec<Edge>) -> PathPlanner {
        PathPlanner::new(Arc::new(PlatformGraph::new(nodes, edges).unwrap()), PlannerConfig::default())
    }

    #[test]
    fn cheap_multi_hop_beats_expensive_direct_edge() {
        // 0 ── 1 ── 2 ── 3 ── 4 along a line, plus a pricey shortcut 0 ── 4.
        let nodes = (0..5).map(|i| wp(i, i as f32 * 10.0, 0.0)).collect();
        let edges = vec![
            edge(0, 1, Some(1.0)),
            edge(1, 2, Some(1.0)),
            edge(2, 3, Some(1.0)),
            edge(3, 4, Some(1.0)),
            edge(0, 4, Some(100.0)),
        ];
        let plan = planner(nodes, edges).plan(Point::new(0.0, 0.0), Point::new(40.0, 0.0));
        assert_eq!(ids(&plan), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn direct_edge_wins_when_cheaper() {
        let nodes = (0..5).map(|i| wp(i, i as f32 * 10.0, 0.0)).collect();
        let edges = vec![
            edge(0, 1, None),
            edge(1, 2, None),
            edge(2, 3, None),
            edge(3, 4, None),
            edge(0, 4, Some(5.0)),
        ];
        let plan = planner(nodes, edges).plan(Point::new(0.0, 0.0), Point::new(40.0, 0.0));
        assert_eq!(ids(&plan), vec![0, 4]);
    }

    #[test]
    fn endpoints_snap_to_nearest_nodes() {
        let nodes = vec![wp(10, 0.0, 100.0), wp(11, 50.0, 100.0), wp(12, 100.0, 100.0)];
        let edges = vec![edge(10, 11, None), edge(11, 12, None)];
        let plan = planner(nodes, edges).plan(Point::new(3.0, 98.0), Point::new(96.0, 101.0));
        assert_eq!(ids(&plan), vec![10, 11, 12]);
    }

    #[test]
    fn one_way_edges_are_respected() {
        let nodes = vec![wp(0, 0.0, 0.0), wp(1, 10.0, 0.0)];
        let edges = vec![Edge {
            from: 0,
            to: 1,
            weight: None,
            bidirectional: false,
        }];
        let p = planner(nodes, edges);
        assert_eq!(ids(&p.plan(Point::new(0.0, 0.0), Point::new(10.0, 0.0))), vec![0, 1]);
        assert!(matches!(p.plan(Point::new(10.0, 0.0), Point::new(0.0, 0.0)), Plan::NoPath { .. }));
    }

    #[test]
    fn unreachable_goal_reports_nearest_explored_node() {
        let nodes = vec![wp(0, 0.0, 0.0), wp(1, 30.0, 0.0), wp(2, 100.0, 0.0)];
        let edges = vec![edge(0, 1, None)];
        match planner(nodes, edges).plan(Point::new(0.0, 0.0), Point::new(100.0, 0.0)) {
            Plan::NoPath { nearest_reachable, .. } => assert_eq!(nearest_reachable.map(|w| w.id), Some(1)),
            other => panic!("expected NoPath, got {other:?}"),
        }
    }

    #[test]
    fn empty_graph_has_no_path() {
        let p = planner(Vec::new(), Vec::new());
        assert!(matches!(
            p.plan(Point::new(0.0, 0.0), Point::new(1.0, 1.0)),
            Plan::NoPath { nearest_reachable: None, .. }
        ));
    }

    #[test]
    fn overlong_paths_are_rejected() {
        let nodes = (0..10).map(|i| wp(i, i as f32, 0.0)).collect();
        let edges = (0..9).map(|i| edge(i, i + 1, None)).collect();
        let graph = Arc::new(PlatformGraph::new(nodes, edges).unwrap());
        let p = PathPlanner::new(
            graph,
            PlannerConfig {
                max_path_nodes: 4,
                ..PlannerConfig::default()
            },
        );
        assert!(matches!(p.plan(Point::new(0.0, 0.0), Point::new(9.0, 0.0)), Plan::NoPath { .. }));
    }

    #[test]
    fn iteration_cap_stops_search() {
        let nodes = (0..10).map(|i| wp(i, i as f32, 0.0)).collect();
        let edges = (0..9).map(|i| edge(i, i + 1, None)).collect();
        let p = PathPlanner::new(
            Arc::new(PlatformGraph::new(nodes, edges).unwrap()),
            PlannerConfig {
                max_iterations: 3,
                ..PlannerConfig::default()
            },
        );
        match p.plan(Point::new(0.0, 0.0), Point::new(9.0, 0.0)) {
            Plan::NoPath { reason, .. } => assert!(reason.contains("iterations")),
            other => panic!("expected NoPath, got {other:?}"),
        }
    }

    #[test]
    fn invalid_graphs_are_rejected() {
        assert!(PlatformGraph::new(vec![wp(0, 0.0, 0.0), wp(0, 1.0, 0.0)], Vec::new()).is_err());
        assert!(PlatformGraph::new(vec![wp(0, 0.0, 0.0)], vec![edge(0, 7, None)]).is_err());
        assert!(
            PlatformGraph::new(vec![wp(0, 0.0, 0.0), wp(1, 1.0, 0.0)], vec![edge(0, 1, Some(-1.0))]).is_err()
        );
        assert!(PlatformGraph::from_json("{not json").is_err());
    }

    #[test]
    fn json_round_trip_keeps_anchors() {
        let json = r#"{"nodes": [{"id": 1, "x": 1.0, "y": 2.0, "anchor": true}, {"id": 2, "x": 5.0, "y": 2.0}],
                       "edges": [{"from": 1, "to": 2, "weight": 3.5}]}"#;
        let graph = PlatformGraph::from_json(json).unwrap();
        assert_eq!(graph.anchors().count(), 1);
        let again = PlatformGraph::from_json(&graph.to_json().unwrap()).unwrap();
        assert_eq!(again.nodes(), graph.nodes());
        assert_eq!(again.nearest(Point::new(4.0, 2.0)).map(|w| w.id), Some(2));
    }
}
