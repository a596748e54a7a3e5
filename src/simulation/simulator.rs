//! Interface to the engine that moves vehicles and drives signals
//!
//! The routing and arbitration core only talks to the traffic simulation
//! through these traits, so it can run against [`super::MicroSim`] or any
//! external engine bridge.

use super::error::SimResult;
use super::road_network::RoadGraph;
use super::signal::{ControlledLink, SignalProgram};
use super::types::{EdgeId, LaneId, SignalId, Step, VehicleId};

/// Live lane travel times.
///
/// Implementations must never report less than `length / speed limit`, so
/// free-flow time stays a lower bound for route search heuristics.
pub trait TravelTimes {
    fn lane_travel_time(&self, lane: LaneId) -> f64;
}

/// Travel times from the graph's speed limits alone
pub struct FreeFlow<'a> {
    graph: &'a RoadGraph,
}

impl<'a> FreeFlow<'a> {
    pub fn new(graph: &'a RoadGraph) -> Self {
        Self { graph }
    }
}

impl TravelTimes for FreeFlow<'_> {
    fn lane_travel_time(&self, lane: LaneId) -> f64 {
        self.graph
            .edge(lane.edge)
            .map(|edge| edge.length / edge.speed.max(f64::EPSILON))
            .unwrap_or(f64::INFINITY)
    }
}

/// A signal on a vehicle's route that it has not passed yet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpcomingSignal {
    pub signal: SignalId,
    /// Index of the link the vehicle will use, into the phase string
    pub link_index: usize,
    /// Distance from the vehicle to the stop line
    pub distance: f64,
}

pub trait TrafficSimulator: TravelTimes {
    fn current_step(&self) -> Step;

    /// Advances the simulation by one step
    fn advance(&mut self) -> SimResult<()>;

    /// Vehicles in the network plus those still waiting to be inserted
    fn min_expected_vehicles(&self) -> usize;

    /// Vehicles inserted during the last step
    fn departed_vehicles(&self) -> &[VehicleId];

    /// Vehicles that reached the end of their route during the last step
    fn arrived_vehicles(&self) -> &[VehicleId];

    fn vehicle_count(&self) -> usize;

    fn add_vehicle(&mut self, id: VehicleId, route: &[EdgeId], speed_factor: f64) -> SimResult<()>;

    fn remove_vehicle(&mut self, id: VehicleId) -> SimResult<()>;

    fn vehicle_edge(&self, id: VehicleId) -> Option<EdgeId>;

    fn vehicle_lane(&self, id: VehicleId) -> Option<LaneId>;

    /// Distance driven along the current edge
    fn vehicle_lane_position(&self, id: VehicleId) -> Option<f64>;

    fn vehicle_speed(&self, id: VehicleId) -> Option<f64>;

    /// Signals ahead on the vehicle's route, nearest first
    fn next_signals(&self, id: VehicleId) -> Vec<UpcomingSignal>;

    fn lane_halting_count(&self, lane: LaneId) -> usize;

    fn signal_ids(&self) -> Vec<SignalId>;

    /// Incoming lane of every link, in phase-string order
    fn controlled_lanes(&self, signal: SignalId) -> SimResult<Vec<LaneId>>;

    fn controlled_links(&self, signal: SignalId) -> SimResult<Vec<ControlledLink>>;

    fn signal_phase_index(&self, signal: SignalId) -> SimResult<usize>;

    /// Indicator string currently shown
    fn signal_state(&self, signal: SignalId) -> SimResult<String>;

    /// The program currently active on the signal
    fn signal_program(&self, signal: SignalId) -> SimResult<SignalProgram>;

    /// Installs `program` under its program id and makes it active from phase 0
    fn install_program(&mut self, signal: SignalId, program: &SignalProgram) -> SimResult<()>;

    /// Shows `state` for `duration` steps, then holds it until told otherwise
    fn set_signal_state(&mut self, signal: SignalId, state: &str, duration: f64) -> SimResult<()>;

    fn set_signal_phase(&mut self, signal: SignalId, index: usize) -> SimResult<()>;
}
