//! Road network graph for route search
//!
//! Loaded once from a [`NetworkDescription`] and read-only afterwards. Live
//! travel times are never stored here; cost models ask the simulator for them
//! on every evaluation.

use petgraph::algo::dijkstra;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeRef, Reversed};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::{SimError, SimResult};
use super::signal::{ControlledLink, Phase};
use super::types::{EdgeId, LaneId, NodeId, Position, SignalId};

fn default_lanes() -> usize {
    1
}

fn default_speed() -> f64 {
    13.89
}

/// Serialized form of a road network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDescription {
    pub nodes: Vec<NodeDescription>,
    pub edges: Vec<EdgeDescription>,
    #[serde(default)]
    pub signals: Vec<SignalDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    /// Straight-line distance between the endpoints when omitted
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Speed limit in units per step
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Permitted vehicle classes; empty permits every class
    #[serde(default)]
    pub allow: Vec<String>,
    /// Opposite-direction edge; paired automatically when omitted
    #[serde(default)]
    pub reverse: Option<EdgeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDescription {
    pub id: SignalId,
    pub node: NodeId,
    /// One link per indicator character, in phase-string order
    pub links: Vec<ControlledLink>,
    pub phases: Vec<Phase>,
}

/// A junction
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub position: Position,
    pub outgoing: Vec<EdgeId>,
}

/// A directed road segment
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub length: f64,
    pub lanes: usize,
    pub speed: f64,
    pub allowed: Vec<String>,
    /// Signal controlling the downstream end of this edge
    pub signal: Option<SignalId>,
    pub reverse: Option<EdgeId>,
    /// Length divided by the longest edge length
    pub normalized_length: f64,
    /// Historical occupancy in [0, 1]
    pub occupancy: f64,
}

impl Edge {
    pub fn allows(&self, class: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|allowed| allowed == class)
    }

    pub fn lane_ids(&self) -> impl Iterator<Item = LaneId> + '_ {
        (0..self.lanes).map(move |index| LaneId::new(self.id, index))
    }
}

/// Directed road graph
#[derive(Debug, Default)]
pub struct RoadGraph {
    /// The underlying petgraph directed graph
    graph: DiGraph<NodeId, EdgeId>,

    /// Maps node IDs to their indices in the graph
    node_index: HashMap<NodeId, NodeIndex>,

    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeId, Edge>,

    max_length: f64,
    max_speed: f64,

    /// Smallest ratio of edge length to endpoint distance, capped at 1
    geometric_ratio: f64,
}

impl RoadGraph {
    /// Builds the graph, attaching signals to the edges they control and
    /// historical occupancy to every edge listed in `occupancy`
    pub fn from_description(
        description: &NetworkDescription,
        occupancy: &HashMap<EdgeId, f64>,
    ) -> SimResult<Self> {
        let mut road_graph = RoadGraph::default();

        for node in &description.nodes {
            road_graph.add_node(node.id, Position::new(node.x, node.y))?;
        }
        for edge in &description.edges {
            road_graph.add_edge(edge)?;
        }

        for signal in &description.signals {
            road_graph.node(signal.node)?;
            for link in &signal.links {
                let edge = road_graph
                    .edges
                    .get_mut(&link.from.edge)
                    .ok_or_else(|| SimError::not_found("edge", link.from.edge))?;
                if edge.to != signal.node {
                    return Err(SimError::Config(format!(
                        "{} controls {} which does not end at {}",
                        signal.id, edge.id, signal.node
                    )));
                }
                edge.signal = Some(signal.id);
            }
        }

        road_graph.pair_reverse_edges();
        road_graph.finish(occupancy);
        Ok(road_graph)
    }

    fn add_node(&mut self, id: NodeId, position: Position) -> SimResult<()> {
        if self.node_index.contains_key(&id) {
            return Err(SimError::Config(format!("duplicate node {}", id)));
        }

        let index = self.graph.add_node(id);
        self.node_index.insert(id, index);
        self.nodes.insert(
            id,
            Node {
                id,
                position,
                outgoing: Vec::new(),
            },
        );
        Ok(())
    }

    fn add_edge(&mut self, description: &EdgeDescription) -> SimResult<()> {
        if self.edges.contains_key(&description.id) {
            return Err(SimError::Config(format!("duplicate edge {}", description.id)));
        }
        if description.lanes == 0 {
            return Err(SimError::Config(format!("{} has no lanes", description.id)));
        }

        let from_position = self.node(description.from)?.position;
        let to_position = self.node(description.to)?.position;
        let length = description
            .length
            .unwrap_or_else(|| from_position.distance(&to_position));

        let from_index = self.node_index[&description.from];
        let to_index = self.node_index[&description.to];
        self.graph.add_edge(from_index, to_index, description.id);

        if let Some(node) = self.nodes.get_mut(&description.from) {
            node.outgoing.push(description.id);
        }

        self.edges.insert(
            description.id,
            Edge {
                id: description.id,
                from: description.from,
                to: description.to,
                length,
                lanes: description.lanes,
                speed: description.speed,
                allowed: description.allow.clone(),
                signal: None,
                reverse: description.reverse,
                normalized_length: 0.0,
                occupancy: 0.0,
            },
        );
        Ok(())
    }

    fn pair_reverse_edges(&mut self) {
        let endpoints: HashMap<(NodeId, NodeId), EdgeId> = self
            .edges
            .values()
            .map(|edge| ((edge.from, edge.to), edge.id))
            .collect();

        for edge in self.edges.values_mut() {
            if edge.reverse.is_none() {
                edge.reverse = endpoints.get(&(edge.to, edge.from)).copied();
            }
        }
    }

    fn finish(&mut self, occupancy: &HashMap<EdgeId, f64>) {
        self.max_length = self
            .edges
            .values()
            .map(|edge| edge.length)
            .fold(0.0, f64::max);
        self.max_speed = self
            .edges
            .values()
            .map(|edge| edge.speed)
            .fold(0.0, f64::max);

        let mut ratio: f64 = 1.0;
        for edge in self.edges.values() {
            let straight = self.nodes[&edge.from]
                .position
                .distance(&self.nodes[&edge.to].position);
            if straight > 0.0 {
                ratio = ratio.min(edge.length / straight);
            }
        }
        self.geometric_ratio = ratio.max(0.0);

        let max_length = self.max_length;
        for edge in self.edges.values_mut() {
            edge.normalized_length = if max_length > 0.0 {
                edge.length / max_length
            } else {
                0.0
            };
            edge.occupancy = occupancy.get(&edge.id).copied().unwrap_or(0.0);
        }
    }

    pub fn node(&self, id: NodeId) -> SimResult<&Node> {
        self.nodes.get(&id).ok_or_else(|| SimError::not_found("node", id))
    }

    pub fn edge(&self, id: EdgeId) -> SimResult<&Edge> {
        self.edges.get(&id).ok_or_else(|| SimError::not_found("edge", id))
    }

    /// Outgoing edges of `node`, restricted to edges permitting `class` when given
    pub fn outgoing<'a>(
        &'a self,
        node: NodeId,
        class: Option<&'a str>,
    ) -> SimResult<impl Iterator<Item = &'a Edge> + 'a> {
        let index = self
            .node_index
            .get(&node)
            .ok_or_else(|| SimError::not_found("node", node))?;

        Ok(self
            .graph
            .edges(*index)
            .filter_map(move |edge_ref| self.edges.get(edge_ref.weight()))
            .filter(move |edge| class.map_or(true, |class| edge.allows(class))))
    }

    /// Number of outgoing edges regardless of vehicle class
    pub fn out_degree(&self, node: NodeId) -> usize {
        self.node_index
            .get(&node)
            .map(|index| self.graph.edges(*index).count())
            .unwrap_or(0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The same lane index on the opposite-direction edge
    pub fn opposite_lane(&self, lane: LaneId) -> Option<LaneId> {
        let reverse = self.edges.get(&lane.edge)?.reverse?;
        Some(LaneId::new(reverse, lane.index))
    }

    pub fn straight_line(&self, a: NodeId, b: NodeId) -> SimResult<f64> {
        Ok(self.node(a)?.position.distance(&self.node(b)?.position))
    }

    pub fn max_length(&self) -> f64 {
        self.max_length
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Factor that keeps straight-line distances below edge lengths even when
    /// declared lengths are shorter than the geometry
    pub fn geometric_ratio(&self) -> f64 {
        self.geometric_ratio
    }

    pub fn total_length(&self) -> f64 {
        self.edges.values().map(|edge| edge.length).sum()
    }

    /// Shortest path lengths from `source` to every node it reaches,
    /// ignoring vehicle classes. Empty for an unknown node.
    pub fn lengths_from(&self, source: NodeId) -> HashMap<NodeId, f64> {
        let Some(start) = self.node_index.get(&source) else {
            return HashMap::new();
        };
        let lengths = dijkstra(&self.graph, *start, None, |edge| {
            self.edge_length(*edge.weight())
        });
        self.by_node_id(lengths)
    }

    /// Shortest path lengths from every node that reaches `target` to it
    pub fn lengths_to(&self, target: NodeId) -> HashMap<NodeId, f64> {
        let Some(end) = self.node_index.get(&target) else {
            return HashMap::new();
        };
        let lengths = dijkstra(Reversed(&self.graph), *end, None, |edge| {
            self.edge_length(*edge.weight())
        });
        self.by_node_id(lengths)
    }

    fn edge_length(&self, id: EdgeId) -> f64 {
        self.edges.get(&id).map_or(f64::INFINITY, |edge| edge.length)
    }

    fn by_node_id(&self, lengths: impl IntoIterator<Item = (NodeIndex, f64)>) -> HashMap<NodeId, f64> {
        lengths
            .into_iter()
            .filter(|(_, length)| length.is_finite())
            .map(|(index, length)| (self.graph[index], length))
            .collect()
    }
}
