//! Route search over the road graph
//!
//! Dijkstra, ALT and plain A* share one priority-search skeleton and differ
//! only in the heuristic added to the accumulated cost. Every search returns
//! the route together with the nodes it settled, in settle order.

use log::warn;
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::error::{SimError, SimResult};
use super::landmarks::LandmarkHeuristic;
use super::road_network::{Edge, RoadGraph};
use super::settings::{PathFinderAlgorithm, PathFinderMode};
use super::simulator::TravelTimes;
use super::types::{EdgeId, NodeId};

/// Weight of the normalized length in the FASTEST_ON_AVERAGE cost
pub const AVERAGE_LENGTH_WEIGHT: f64 = 0.7;

/// Weight of the historical occupancy in the FASTEST_ON_AVERAGE cost
pub const AVERAGE_OCCUPANCY_WEIGHT: f64 = 0.3;

/// Edge cost evaluation for one cost model.
///
/// Live travel times are read through `times` on every call and never cached.
pub struct CostModel<'a> {
    mode: PathFinderMode,
    times: &'a dyn TravelTimes,
}

impl<'a> CostModel<'a> {
    pub fn new(mode: PathFinderMode, times: &'a dyn TravelTimes) -> Self {
        Self { mode, times }
    }

    pub fn mode(&self) -> PathFinderMode {
        self.mode
    }

    pub fn edge_cost(&self, edge: &Edge) -> f64 {
        let lane_bonus = 1.0 / edge.lanes as f64;
        match self.mode {
            PathFinderMode::Shortest => edge.length + lane_bonus,
            PathFinderMode::Fastest => {
                let fastest_lane = edge
                    .lane_ids()
                    .map(|lane| self.times.lane_travel_time(lane))
                    .fold(f64::INFINITY, f64::min);
                fastest_lane + lane_bonus
            }
            PathFinderMode::FastestOnAverage => {
                AVERAGE_LENGTH_WEIGHT * edge.normalized_length
                    + AVERAGE_OCCUPANCY_WEIGHT * edge.occupancy
            }
        }
    }

    /// Factor turning a lower bound on length into a lower bound on this
    /// model's cost
    pub fn length_scale(&self, graph: &RoadGraph) -> f64 {
        match self.mode {
            PathFinderMode::Shortest => 1.0,
            PathFinderMode::Fastest => {
                if graph.max_speed() > 0.0 {
                    1.0 / graph.max_speed()
                } else {
                    0.0
                }
            }
            PathFinderMode::FastestOnAverage => {
                if graph.max_length() > 0.0 {
                    AVERAGE_LENGTH_WEIGHT / graph.max_length()
                } else {
                    0.0
                }
            }
        }
    }
}

/// An ordered list of edges from a start node to a destination node
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub edges: Vec<EdgeId>,
    /// Total cost under the cost model it was searched with
    pub cost: f64,
}

impl Route {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn length(&self, graph: &RoadGraph) -> SimResult<f64> {
        self.edges
            .iter()
            .map(|id| graph.edge(*id).map(|edge| edge.length))
            .sum()
    }

    /// Travel time at the speed limits
    pub fn free_flow_time(&self, graph: &RoadGraph) -> SimResult<f64> {
        self.edges
            .iter()
            .map(|id| graph.edge(*id).map(|edge| edge.length / edge.speed))
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub route: Route,
    /// Settled nodes in the order they left the frontier
    pub visited: Vec<NodeId>,
}

/// Endpoints and restrictions of one search
#[derive(Debug, Clone, Copy)]
pub struct RouteQuery<'q> {
    pub from: NodeId,
    pub to: NodeId,
    /// Only edges permitting this vehicle class are traversed
    pub class: Option<&'q str>,
}

impl<'q> RouteQuery<'q> {
    pub fn new(from: NodeId, to: NodeId, class: Option<&'q str>) -> Self {
        Self { from, to, class }
    }
}

enum Heuristic<'h> {
    Zero,
    Landmarks(&'h LandmarkHeuristic),
    StraightLine,
}

pub fn dijkstra(
    graph: &RoadGraph,
    query: RouteQuery<'_>,
    cost: &CostModel<'_>,
) -> SimResult<SearchOutcome> {
    search(graph, query, cost, Heuristic::Zero, PathFinderAlgorithm::Dijkstra)
}

/// A* guided by the landmark triangle-inequality bound
pub fn alt(
    graph: &RoadGraph,
    landmarks: &LandmarkHeuristic,
    query: RouteQuery<'_>,
    cost: &CostModel<'_>,
) -> SimResult<SearchOutcome> {
    search(
        graph,
        query,
        cost,
        Heuristic::Landmarks(landmarks),
        PathFinderAlgorithm::Alt,
    )
}

/// A* guided by straight-line distance
pub fn astar(
    graph: &RoadGraph,
    query: RouteQuery<'_>,
    cost: &CostModel<'_>,
) -> SimResult<SearchOutcome> {
    search(
        graph,
        query,
        cost,
        Heuristic::StraightLine,
        PathFinderAlgorithm::AStar,
    )
}

fn search(
    graph: &RoadGraph,
    query: RouteQuery<'_>,
    cost: &CostModel<'_>,
    heuristic: Heuristic<'_>,
    algorithm: PathFinderAlgorithm,
) -> SimResult<SearchOutcome> {
    let target = graph.node(query.to)?.position;
    graph.node(query.from)?;

    let scale = cost.length_scale(graph);
    let ratio = graph.geometric_ratio();
    let estimate = |node: NodeId| -> f64 {
        match &heuristic {
            Heuristic::Zero => 0.0,
            Heuristic::Landmarks(landmarks) => landmarks.estimate(node, query.to) * scale,
            Heuristic::StraightLine => graph
                .node(node)
                .map(|n| n.position.distance(&target) * ratio * scale)
                .unwrap_or(0.0),
        }
    };

    let mut best: HashMap<NodeId, f64> = HashMap::new();
    let mut came_from: HashMap<NodeId, EdgeId> = HashMap::new();
    let mut settled: HashSet<NodeId> = HashSet::new();
    let mut visited = Vec::new();
    let mut frontier = BinaryHeap::new();

    best.insert(query.from, 0.0);
    frontier.push(Reverse((
        OrderedFloat(estimate(query.from)),
        OrderedFloat(0.0),
        query.from,
    )));

    while let Some(Reverse((_, OrderedFloat(cost_so_far), node))) = frontier.pop() {
        // Stale entry superseded by a cheaper push
        if best.get(&node).is_some_and(|b| cost_so_far > *b) {
            continue;
        }
        if settled.insert(node) {
            visited.push(node);
        }

        if node == query.to {
            break;
        }

        for edge in graph.outgoing(node, query.class)? {
            let next_cost = cost_so_far + cost.edge_cost(edge);
            let improved = best.get(&edge.to).map_or(true, |b| next_cost < *b);
            if improved {
                best.insert(edge.to, next_cost);
                came_from.insert(edge.to, edge.id);
                frontier.push(Reverse((
                    OrderedFloat(next_cost + estimate(edge.to)),
                    OrderedFloat(next_cost),
                    edge.to,
                )));
            }
        }
    }

    let Some(total) = best.get(&query.to).copied() else {
        return Err(SimError::NoPath {
            from: query.from,
            to: query.to,
        });
    };

    let edges = reconstruct(graph, &came_from, query.from, query.to)?;
    check_endpoints(graph, &edges, query, algorithm)?;

    Ok(SearchOutcome {
        route: Route { edges, cost: total },
        visited,
    })
}

fn reconstruct(
    graph: &RoadGraph,
    came_from: &HashMap<NodeId, EdgeId>,
    from: NodeId,
    to: NodeId,
) -> SimResult<Vec<EdgeId>> {
    let mut edges = Vec::new();
    let mut current = to;
    while current != from {
        let Some(edge_id) = came_from.get(&current) else {
            break;
        };
        edges.push(*edge_id);
        current = graph.edge(*edge_id)?.from;
    }
    edges.reverse();
    Ok(edges)
}

/// The first edge must leave the start node and the last must reach the
/// destination
fn check_endpoints(
    graph: &RoadGraph,
    edges: &[EdgeId],
    query: RouteQuery<'_>,
    algorithm: PathFinderAlgorithm,
) -> SimResult<()> {
    let connects = match (edges.first(), edges.last()) {
        (Some(first), Some(last)) => {
            graph.edge(*first)?.from == query.from && graph.edge(*last)?.to == query.to
        }
        _ => query.from == query.to,
    };

    if connects {
        Ok(())
    } else {
        warn!("{} found wrong path from {} to {}", algorithm, query.from, query.to);
        Err(SimError::PathMismatch {
            algorithm: algorithm.name().to_string(),
            from: query.from,
            to: query.to,
        })
    }
}
