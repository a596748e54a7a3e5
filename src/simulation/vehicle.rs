//! Intervention vehicles
//!
//! A vehicle owns its route and tracks how far along it it is. The signals
//! still ahead are kept by route position so a signal met twice on one route
//! is claimed and released twice.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::conflicts::Approach;
use super::error::SimResult;
use super::road_network::{Edge, RoadGraph};
use super::search::Route;
use super::settings::{PathFinderAlgorithm, PathFinderMode, PreemptionMode, ResetMode};
use super::signal::ControlledLink;
use super::stats::VehicleStats;
use super::types::{EdgeId, LaneId, NodeId, SignalId, Step, VehicleId, EMERGENCY_CLASS};

fn default_class() -> String {
    EMERGENCY_CLASS.to_string()
}

/// Everything needed to create a vehicle, as read from a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub route_name: String,
    pub start: NodeId,
    pub destination: NodeId,
    #[serde(default)]
    pub start_delay: Step,
    pub preemption_mode: PreemptionMode,
    pub reset_mode: ResetMode,
    pub path_finder_mode: PathFinderMode,
    pub path_finder_algorithm: PathFinderAlgorithm,
    /// Distance at which immediate preemption starts
    pub preemption_range: f64,
    #[serde(default)]
    pub is_one_way: bool,
    #[serde(default = "default_class")]
    pub class: String,
}

/// Where the simulator last reported the vehicle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedPosition {
    pub edge: EdgeId,
    /// Distance driven along `edge`
    pub lane_position: f64,
}

#[derive(Debug, Clone)]
pub struct InterventionVehicle {
    pub id: VehicleId,
    pub route_name: String,
    pub start: NodeId,
    pub destination: NodeId,
    pub start_delay: Step,
    pub class: String,
    pub preemption_mode: PreemptionMode,
    pub reset_mode: ResetMode,
    pub path_finder_mode: PathFinderMode,
    pub path_finder_algorithm: PathFinderAlgorithm,
    pub preemption_range: f64,
    pub is_one_way: bool,
    pub is_active: bool,
    pub is_finished: bool,
    pub stats: VehicleStats,
    route: Vec<EdgeId>,
    current_edge_index: usize,
    pending_signals: BTreeMap<usize, SignalId>,
    preempted: HashSet<SignalId>,
    position: Option<CachedPosition>,
}

impl InterventionVehicle {
    pub fn new(id: VehicleId, profile: VehicleProfile) -> Self {
        Self {
            id,
            route_name: profile.route_name,
            start: profile.start,
            destination: profile.destination,
            start_delay: profile.start_delay,
            class: profile.class,
            preemption_mode: profile.preemption_mode,
            reset_mode: profile.reset_mode,
            path_finder_mode: profile.path_finder_mode,
            path_finder_algorithm: profile.path_finder_algorithm,
            preemption_range: profile.preemption_range,
            is_one_way: profile.is_one_way,
            is_active: false,
            is_finished: false,
            stats: VehicleStats::new(),
            route: Vec::new(),
            current_edge_index: 0,
            pending_signals: BTreeMap::new(),
            preempted: HashSet::new(),
            position: None,
        }
    }

    /// Installs a freshly planned route, replacing the previous one
    pub fn set_route(&mut self, route: Route, graph: &RoadGraph, step: Step) -> SimResult<()> {
        let mut pending = BTreeMap::new();
        let mut length = 0.0;
        let mut free_flow_time = 0.0;
        for (index, edge_id) in route.edges.iter().enumerate() {
            let edge = graph.edge(*edge_id)?;
            // The vehicle leaves the network at the end of its last edge
            if let Some(signal) = edge.signal.filter(|_| index + 1 < route.edges.len()) {
                pending.insert(index, signal);
            }
            length += edge.length;
            free_flow_time += edge.length / edge.speed;
        }

        self.stats
            .signals_on_route
            .extend(pending.values().copied());
        let summary = format!(
            "Set route of {} edges, {} tls and total length of {:.1} meters.",
            route.edges.len(),
            pending.len(),
            length
        );
        self.stats.add_checkpoint(summary.clone(), step);
        info!("Route: {}; {}", self.route_name, summary);
        if free_flow_time > 0.0 {
            debug!(
                "Route {}; time: {:.1}s, length: {:.1}m, average speed: {:.1}km/h",
                self.route_name,
                free_flow_time,
                length,
                length / free_flow_time * 3.6
            );
        }

        self.route = route.edges;
        self.current_edge_index = 0;
        self.pending_signals = pending;
        self.position = None;
        Ok(())
    }

    pub fn route(&self) -> &[EdgeId] {
        &self.route
    }

    pub fn current_edge_index(&self) -> usize {
        self.current_edge_index
    }

    pub fn remaining_edges(&self) -> &[EdgeId] {
        self.route.get(self.current_edge_index..).unwrap_or(&[])
    }

    /// Signals not yet passed, by the route position of their approach edge
    pub fn pending_signals(&self) -> &BTreeMap<usize, SignalId> {
        &self.pending_signals
    }

    pub fn position(&self) -> Option<CachedPosition> {
        self.position
    }

    pub fn sync_position(&mut self, position: Option<CachedPosition>) {
        self.position = position;
    }

    /// Swaps start and destination for the return trip
    pub fn switch_destination(&mut self) {
        std::mem::swap(&mut self.start, &mut self.destination);
        self.preempted.clear();
    }

    pub fn is_preemption_set(&self, signal: SignalId) -> bool {
        self.preempted.contains(&signal)
    }

    pub fn preemption_accepted(&mut self, signal: SignalId, step: Step) {
        self.preempted.insert(signal);
        self.stats
            .add_checkpoint(format!("Accepted TL {} preemption.", signal), step);
    }

    pub fn preemption_rejected(&mut self, signal: SignalId, step: Step) {
        self.preempted.remove(&signal);
        self.stats
            .add_checkpoint(format!("Rejected TL {} preemption.", signal), step);
    }

    /// Moves the route pointer to `edge` and returns the signals passed since
    /// the last call, in route order.
    ///
    /// An edge that is not on the rest of the route (an internal junction
    /// edge, for example) leaves the pointer where it is.
    pub fn advance_to(&mut self, edge: EdgeId) -> Vec<SignalId> {
        let Some(offset) = self.remaining_edges().iter().position(|id| *id == edge) else {
            debug!("{}: current edge {} is not in remaining edges", self.id, edge);
            return Vec::new();
        };
        self.current_edge_index += offset;

        let still_ahead = self.pending_signals.split_off(&self.current_edge_index);
        let passed = std::mem::replace(&mut self.pending_signals, still_ahead);
        passed.into_values().collect()
    }

    /// Route position of the approach edge of the next occurrence of `signal`
    fn signal_position(&self, signal: SignalId) -> Option<usize> {
        self.pending_signals
            .iter()
            .find(|(_, pending)| **pending == signal)
            .map(|(position, _)| *position)
    }

    /// Remaining route distance to the stop line of `signal`
    pub fn distance_to_signal(&self, signal: SignalId, graph: &RoadGraph) -> Option<f64> {
        self.along_route_to(signal, graph, |edge| edge.length, |remaining, _| remaining)
    }

    /// Estimated time to reach `signal`, assuming the vehicle beats each
    /// speed limit by `speed_factor`
    pub fn eta_to_signal(&self, signal: SignalId, graph: &RoadGraph, speed_factor: f64) -> Option<f64> {
        self.along_route_to(
            signal,
            graph,
            |edge| edge.length / (speed_factor * edge.speed),
            |remaining, edge| remaining / (speed_factor * edge.speed),
        )
    }

    /// Sums `full` over the edges up to the signal, using `partial` on the
    /// remaining length of the edge the vehicle is on. Returns `None` when
    /// the signal is not ahead or the sum is not positive.
    fn along_route_to(
        &self,
        signal: SignalId,
        graph: &RoadGraph,
        full: impl Fn(&Edge) -> f64,
        partial: impl Fn(f64, &Edge) -> f64,
    ) -> Option<f64> {
        let target = self.signal_position(signal)?;
        let mut total = 0.0;
        for index in self.current_edge_index..=target {
            let edge = graph.edge(*self.route.get(index)?).ok()?;
            match self.position {
                Some(position) if index == self.current_edge_index && position.edge == edge.id => {
                    let remaining = (edge.length - position.lane_position).max(0.0);
                    total += partial(remaining, edge);
                }
                _ => total += full(edge),
            }
        }
        (total > 0.0).then_some(total)
    }

    /// Lanes used at `signal`: the controlled lanes of the first remaining
    /// route edge the signal controls, and the lane taken out of the junction.
    ///
    /// `controlled_lanes` and `links` are the signal's, in link order.
    pub fn approach(&self, controlled_lanes: &[LaneId], links: &[ControlledLink]) -> Option<Approach> {
        for (offset, edge) in self.remaining_edges().iter().enumerate() {
            let mut in_lanes: Vec<LaneId> = Vec::new();
            for lane in controlled_lanes.iter().filter(|lane| lane.edge == *edge) {
                if !in_lanes.contains(lane) {
                    in_lanes.push(*lane);
                }
            }
            let Some(first_lane) = in_lanes.first().copied() else {
                continue;
            };

            let route_index = self.current_edge_index + offset;
            let out_lane = match self.route.get(route_index + 1) {
                Some(next) => links.iter().find(|link| link.to.edge == *next),
                None => links.iter().find(|link| link.from == first_lane),
            }
            .map(|link| link.to)?;

            return Some(Approach {
                route_index,
                in_lanes,
                out_lane,
            });
        }
        None
    }
}
