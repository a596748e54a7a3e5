//! Networks and fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use intervention_sim::simulation::{
    ControlledLink, EdgeDescription, EdgeId, Fleet, LaneId, NetworkDescription, NodeDescription,
    NodeId, Phase, RoadGraph, SignalDescription, SignalId, Step, VehicleId,
};

pub const A: NodeId = NodeId(0);
pub const B: NodeId = NodeId(1);
pub const C: NodeId = NodeId(2);
pub const D: NodeId = NodeId(3);

/// Signal in the middle of the crossing network
pub const CROSSING: SignalId = SignalId(0);

pub fn node(id: usize, x: f64, y: f64) -> NodeDescription {
    NodeDescription {
        id: NodeId(id),
        x,
        y,
    }
}

pub fn edge(id: usize, from: NodeId, to: NodeId, length: Option<f64>, lanes: usize) -> EdgeDescription {
    EdgeDescription {
        id: EdgeId(id),
        from,
        to,
        length,
        lanes,
        speed: 13.89,
        allow: Vec::new(),
        reverse: None,
    }
}

pub fn graph(network: &NetworkDescription) -> Arc<RoadGraph> {
    Arc::new(RoadGraph::from_description(network, &HashMap::new()).expect("valid network"))
}

/// A -> B -> C -> D, single-lane edges of length 10
pub fn line_network() -> NetworkDescription {
    NetworkDescription {
        nodes: vec![node(0, 0.0, 0.0), node(1, 10.0, 0.0), node(2, 20.0, 0.0), node(3, 30.0, 0.0)],
        edges: vec![
            edge(0, A, B, Some(10.0), 1),
            edge(1, B, C, Some(10.0), 1),
            edge(2, C, D, Some(10.0), 1),
        ],
        signals: Vec::new(),
    }
}

/// Line network plus a long two-lane bypass A -> D of length 35
pub fn bypass_network() -> NetworkDescription {
    let mut network = line_network();
    network.edges.push(edge(3, A, D, Some(35.0), 2));
    network
}

/// Landmark, target and source of the one-way fan network
pub const FAN_LANDMARK: NodeId = NodeId(0);
pub const FAN_TARGET: NodeId = NodeId(1);
pub const FAN_SOURCE: NodeId = NodeId(2);

/// One-way roads fanning out of a landmark. The target is close to the
/// landmark and the source far from it, yet the source reaches the target
/// in 2 units over node 3 (4 over node 4).
pub fn one_way_fan() -> NetworkDescription {
    NetworkDescription {
        nodes: vec![
            node(0, 0.0, 0.0),
            node(1, 1.0, 0.0),
            node(2, 0.0, 1.0),
            node(3, 1.0, 1.0),
            node(4, 0.5, 0.5),
        ],
        edges: vec![
            edge(0, FAN_LANDMARK, FAN_TARGET, Some(1.0), 1),
            edge(1, FAN_LANDMARK, FAN_SOURCE, Some(50.0), 1),
            edge(2, FAN_SOURCE, NodeId(3), Some(1.0), 1),
            edge(3, NodeId(3), FAN_TARGET, Some(1.0), 1),
            edge(4, FAN_LANDMARK, NodeId(4), Some(1.0), 1),
            edge(5, FAN_SOURCE, NodeId(4), Some(3.0), 1),
            edge(6, NodeId(4), FAN_TARGET, Some(3.0), 1),
        ],
        signals: Vec::new(),
    }
}

/// One signalised junction (node 0) with four 300-unit arms.
///
/// Incoming edges are 0 (from north), 2 (from east), 4 (from south) and
/// 6 (from west); each one's reverse has the next odd id. Links only cover
/// the straight movements, so link `i` starts on edge `2 * i`.
pub fn crossing_network() -> NetworkDescription {
    let center = NodeId(0);
    let arms = [(1, 0.0, 300.0), (2, 300.0, 0.0), (3, 0.0, -300.0), (4, -300.0, 0.0)];

    let mut nodes = vec![node(0, 0.0, 0.0)];
    let mut edges = Vec::new();
    for (arm, (id, x, y)) in arms.iter().enumerate() {
        nodes.push(node(*id, *x, *y));
        edges.push(edge(arm * 2, NodeId(*id), center, None, 1));
        edges.push(edge(arm * 2 + 1, center, NodeId(*id), None, 1));
    }

    // North -> south, east -> west, south -> north, west -> east
    let straight = [(0, 5), (2, 7), (4, 1), (6, 3)];
    let links = straight
        .iter()
        .map(|(from, to)| ControlledLink {
            from: LaneId::new(EdgeId(*from), 0),
            to: LaneId::new(EdgeId(*to), 0),
        })
        .collect();

    NetworkDescription {
        nodes,
        edges,
        signals: vec![SignalDescription {
            id: CROSSING,
            node: center,
            links,
            phases: vec![
                Phase::new("GrGr", 30.0),
                Phase::new("yryr", 3.0),
                Phase::new("rGrG", 30.0),
                Phase::new("ryry", 3.0),
            ],
        }],
    }
}

/// Fleet with fixed distances that records every notification
#[derive(Debug, Default)]
pub struct RecordingFleet {
    pub distances: HashMap<(VehicleId, SignalId), f64>,
    pub accepted: Vec<(VehicleId, SignalId)>,
    pub rejected: Vec<(VehicleId, SignalId)>,
    pub checkpoints: Vec<(VehicleId, String)>,
}

impl RecordingFleet {
    pub fn with_distance(mut self, vehicle: VehicleId, signal: SignalId, distance: f64) -> Self {
        self.distances.insert((vehicle, signal), distance);
        self
    }
}

impl Fleet for RecordingFleet {
    fn distance_to_signal(&self, vehicle: VehicleId, signal: SignalId) -> Option<f64> {
        self.distances.get(&(vehicle, signal)).copied()
    }

    fn preemption_accepted(&mut self, vehicle: VehicleId, signal: SignalId, _step: Step) {
        self.accepted.push((vehicle, signal));
    }

    fn preemption_rejected(&mut self, vehicle: VehicleId, signal: SignalId, _step: Step) {
        self.rejected.push((vehicle, signal));
    }

    fn add_checkpoint(&mut self, vehicle: VehicleId, message: &str, _step: Step) {
        self.checkpoints.push((vehicle, message.to_string()));
    }
}
