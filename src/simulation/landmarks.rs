//! Landmark preprocessing for the ALT heuristic
//!
//! Landmarks are picked from the outer layers of the network: a few rounds of
//! convex hulls give a boundary-biased candidate pool, then farthest-point
//! seeding spreads the chosen set. Each landmark stores exact length-only
//! distances to and from every node of the whole network, ignoring vehicle
//! classes. Roads are one-way, so both directions are needed for a bound.

use log::{debug, info};
use ordered_float::OrderedFloat;
use rand::Rng;
use std::collections::HashMap;
use std::time::Instant;

use super::error::{SimError, SimResult};
use super::road_network::RoadGraph;
use super::types::{NodeId, Position};

/// Number of convex hull layers peeled off for the candidate pool
pub const HULL_ROUNDS: usize = 6;

pub const DEFAULT_LANDMARK_COUNT: usize = 3;

/// A heuristic anchor and its distance tables
#[derive(Debug, Clone)]
pub struct Landmark {
    pub node: NodeId,
    outbound: HashMap<NodeId, f64>,
    inbound: HashMap<NodeId, f64>,
}

impl Landmark {
    fn compute(graph: &RoadGraph, node: NodeId) -> Self {
        Self {
            node,
            outbound: graph.lengths_from(node),
            inbound: graph.lengths_to(node),
        }
    }

    /// Length of the shortest path from the landmark to `node`
    pub fn from_landmark(&self, node: NodeId) -> Option<f64> {
        self.outbound.get(&node).copied()
    }

    /// Length of the shortest path from `node` to the landmark
    pub fn to_landmark(&self, node: NodeId) -> Option<f64> {
        self.inbound.get(&node).copied()
    }

    /// Nodes reachable from the landmark
    pub fn reachable_count(&self) -> usize {
        self.outbound.len()
    }

    /// Triangle inequality bound on `d(from, to)` through this landmark
    fn bound(&self, from: NodeId, to: NodeId) -> f64 {
        let ahead = self
            .from_landmark(to)
            .zip(self.from_landmark(from))
            .map(|(to_distance, from_distance)| to_distance - from_distance);
        let behind = self
            .to_landmark(from)
            .zip(self.to_landmark(to))
            .map(|(from_distance, to_distance)| from_distance - to_distance);
        ahead.into_iter().chain(behind).fold(0.0, f64::max)
    }
}

/// Immutable set of landmarks shared by every ALT search of a run
#[derive(Debug, Clone, Default)]
pub struct LandmarkHeuristic {
    landmarks: Vec<Landmark>,
}

impl LandmarkHeuristic {
    /// Selects up to `count` landmarks and computes their distance tables
    pub fn precompute<R: Rng + ?Sized>(graph: &RoadGraph, count: usize, rng: &mut R) -> Self {
        let start = Instant::now();
        let candidates = select_candidates(graph);
        debug!(
            "Found {} landmark candidates on convex hull layers in {:.2} ms",
            candidates.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        let chosen = farthest_point_seeding(graph, &candidates, count, rng);
        let landmarks: Vec<Landmark> = chosen
            .iter()
            .map(|node| Landmark::compute(graph, *node))
            .collect();

        info!(
            "Landmark selection finished in {:.2} ms: {:?}",
            start.elapsed().as_secs_f64() * 1000.0,
            chosen
        );

        Self { landmarks }
    }

    /// Uses the given nodes as landmarks
    pub fn from_nodes(graph: &RoadGraph, nodes: &[NodeId]) -> SimResult<Self> {
        let mut landmarks = Vec::with_capacity(nodes.len());
        for node in nodes {
            graph.node(*node)?;
            landmarks.push(Landmark::compute(graph, *node));
        }
        if landmarks.is_empty() {
            return Err(SimError::Config("at least one landmark is required".to_string()));
        }
        Ok(Self { landmarks })
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Lower bound on the length of any path from `from` to `to`: the
    /// largest of `d(L, to) - d(L, from)` and `d(from, L) - d(to, L)` over
    /// all landmarks. On two-way networks this is `|d(L, to) - d(L, from)|`.
    pub fn estimate(&self, from: NodeId, to: NodeId) -> f64 {
        self.landmarks
            .iter()
            .map(|landmark| landmark.bound(from, to))
            .fold(0.0, f64::max)
    }
}

/// Nodes on the outermost convex hull layers that are not dead ends
pub fn select_candidates(graph: &RoadGraph) -> Vec<NodeId> {
    let mut points: Vec<(Position, NodeId)> = graph
        .nodes()
        .map(|node| (node.position, node.id))
        .collect();
    points.sort_by_key(|(position, id)| (OrderedFloat(position.x), OrderedFloat(position.y), *id));
    points.dedup_by(|a, b| a.0 == b.0);

    let mut layers = Vec::new();
    for _ in 0..HULL_ROUNDS {
        if points.is_empty() {
            break;
        }
        let hull = convex_hull(&points);
        let mut on_hull = vec![false; points.len()];
        for index in &hull {
            on_hull[*index] = true;
            layers.push(points[*index].1);
        }
        let mut position = 0;
        points.retain(|_| {
            let keep = !on_hull[position];
            position += 1;
            keep
        });
    }

    layers
        .into_iter()
        .filter(|node| graph.out_degree(*node) > 1)
        .collect()
}

/// Andrew's monotone chain over points sorted by (x, y).
/// Returns indices into `points`, counter-clockwise, without collinear points.
fn convex_hull(points: &[(Position, NodeId)]) -> Vec<usize> {
    if points.len() <= 1 {
        return (0..points.len()).collect();
    }

    let turns_left = |hull: &[usize], next: usize| {
        let o = &points[hull[hull.len() - 2]].0;
        let a = &points[hull[hull.len() - 1]].0;
        o.cross(a, &points[next].0) > 0.0
    };

    let mut lower: Vec<usize> = Vec::new();
    for index in 0..points.len() {
        while lower.len() >= 2 && !turns_left(&lower, index) {
            lower.pop();
        }
        lower.push(index);
    }

    let mut upper: Vec<usize> = Vec::new();
    for index in (0..points.len()).rev() {
        while upper.len() >= 2 && !turns_left(&upper, index) {
            upper.pop();
        }
        upper.push(index);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Incremental farthest-point selection: a random first pick, then always
/// the candidate farthest from everything chosen so far
fn farthest_point_seeding<R: Rng + ?Sized>(
    graph: &RoadGraph,
    candidates: &[NodeId],
    count: usize,
    rng: &mut R,
) -> Vec<NodeId> {
    let mut remaining: Vec<(NodeId, Position)> = candidates
        .iter()
        .filter_map(|id| graph.node(*id).ok().map(|node| (node.id, node.position)))
        .collect();
    if remaining.is_empty() || count == 0 {
        return Vec::new();
    }

    let first = remaining.remove(rng.random_range(0..remaining.len()));
    let mut chosen = vec![first];

    while chosen.len() < count && !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_distance = f64::NEG_INFINITY;
        for (index, (_, position)) in remaining.iter().enumerate() {
            let nearest = chosen
                .iter()
                .map(|(_, picked)| position.distance(picked))
                .fold(f64::INFINITY, f64::min);
            if nearest > best_distance {
                best_distance = nearest;
                best_index = index;
            }
        }
        chosen.push(remaining.remove(best_index));
    }

    chosen.into_iter().map(|(id, _)| id).collect()
}
