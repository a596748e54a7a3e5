//! Intervention vehicle routing and signal preemption
//!
//! Route search over a directed road graph, per-vehicle preemption planning
//! and the arbitration engine that serialises every signal change. The core
//! talks to traffic through [`TrafficSimulator`]; [`MicroSim`] is the
//! built-in implementation.

mod arbitration;
mod conflicts;
mod context;
mod demo;
mod error;
mod landmarks;
mod micro_sim;
mod planner;
mod registry;
mod request;
mod road_network;
mod runner;
mod scenario;
mod search;
mod settings;
mod signal;
mod simulator;
mod stats;
mod types;
mod vehicle;

pub use arbitration::{ArbitrationEngine, ArbitrationEvent, ArbitrationStats, Fleet};
pub use conflicts::{conflict_free_phase, full_priority_phase, Approach, RotatedLaneIndex};
pub use context::RunContext;
pub use demo::{demo_network, demo_scenario, DEMO_INCIDENT, DEMO_SPACING, DEMO_STATION};
pub use error::{SimError, SimResult};
pub use landmarks::{select_candidates, Landmark, LandmarkHeuristic, DEFAULT_LANDMARK_COUNT};
pub use micro_sim::{MicroSim, BACKGROUND_ID_BASE, HALTING_SPEED};
pub use planner::{plan_phase_rewrite, PreemptionPlanner};
pub use registry::VehicleRegistry;
pub use request::{PhaseSnapshot, PreemptionRequest, RequestPayload, ResetRequest};
pub use road_network::{
    Edge, EdgeDescription, NetworkDescription, Node, NodeDescription, RoadGraph, SignalDescription,
};
pub use runner::{
    build_run, run_parallel, run_scenario, write_report, RunSettings, RunSummary, SimulationRunner,
    INTERVENTION_SPEED_FACTOR, RETURN_TRIP_DELAY,
};
pub use scenario::{
    BackgroundTrip, GeneralSettings, MapSettings, RouteSettings, Scenario, VehicleEntry, VehicleMode,
    VehicleSettings,
};
pub use search::{
    alt, astar, dijkstra, CostModel, Route, RouteQuery, SearchOutcome, AVERAGE_LENGTH_WEIGHT,
    AVERAGE_OCCUPANCY_WEIGHT,
};
pub use settings::{PathFinderAlgorithm, PathFinderMode, PlannerConfig, PreemptionMode, ResetMode};
pub use signal::{
    is_green, ControlledLink, Phase, PhaseOverride, ProgramArena, SignalProgram, DEFAULT_PROGRAM_ID,
};
pub use simulator::{FreeFlow, TrafficSimulator, TravelTimes, UpcomingSignal};
pub use stats::{Checkpoint, RouteReportRow, VehicleStats, VisitedIntersection};
pub use types::{
    EdgeId, LaneId, NodeId, Position, SignalId, Step, VehicleId, EMERGENCY_CLASS,
    SAFE_FOLLOWING_MULTIPLIER, VEHICLE_LENGTH,
};
pub use vehicle::{CachedPosition, InterventionVehicle, VehicleProfile};
