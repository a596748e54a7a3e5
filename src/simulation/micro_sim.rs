//! Deterministic in-memory traffic simulator
//!
//! Vehicles drive their route at the edge speed limit times their speed
//! factor, follow the vehicle ahead on their lane with a safe gap and stop at
//! red lights. Signals cycle through their active program one step at a time.

use log::{debug, trace};
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use super::error::{SimError, SimResult};
use super::road_network::{RoadGraph, SignalDescription};
use super::signal::{is_green, ControlledLink, SignalProgram, DEFAULT_PROGRAM_ID};
use super::simulator::{TrafficSimulator, TravelTimes, UpcomingSignal};
use super::types::{
    EdgeId, LaneId, NodeId, SignalId, Step, VehicleId, SAFE_FOLLOWING_MULTIPLIER, VEHICLE_LENGTH,
};

/// Vehicles slower than this count as halting
pub const HALTING_SPEED: f64 = 0.1;

/// Ids handed out to background traffic start here
pub const BACKGROUND_ID_BASE: usize = 1 << 20;

const SAFE_GAP: f64 = VEHICLE_LENGTH * SAFE_FOLLOWING_MULTIPLIER;

/// What happened to a vehicle during one step
#[derive(Debug, Clone, Copy, PartialEq)]
enum MoveOutcome {
    Continue,
    Arrived,
}

#[derive(Debug, Clone)]
struct SimVehicle {
    id: VehicleId,
    route: Vec<EdgeId>,
    route_index: usize,
    lane: LaneId,
    /// Distance driven along the current edge
    position: f64,
    speed: f64,
    speed_factor: f64,
}

#[derive(Debug, Clone)]
struct PendingVehicle {
    id: VehicleId,
    route: Vec<EdgeId>,
    speed_factor: f64,
}

#[derive(Debug, Clone)]
struct SimSignal {
    node: NodeId,
    links: Vec<ControlledLink>,
    programs: HashMap<String, SignalProgram>,
    active: String,
    phase_index: usize,
    phase_elapsed: f64,
    /// State shown in place of the program until a program or phase is set
    held_state: Option<String>,
}

impl SimSignal {
    fn program(&self) -> SimResult<&SignalProgram> {
        self.programs
            .get(&self.active)
            .ok_or_else(|| SimError::not_found("signal program", &self.active))
    }

    fn state(&self) -> SimResult<String> {
        if let Some(state) = &self.held_state {
            return Ok(state.clone());
        }
        let program = self.program()?;
        program
            .phases
            .get(self.phase_index)
            .map(|phase| phase.state.clone())
            .ok_or_else(|| SimError::not_found("phase", self.phase_index))
    }

    fn tick(&mut self) {
        if self.held_state.is_some() {
            return;
        }
        let Some(program) = self.programs.get(&self.active) else {
            return;
        };
        let count = program.phases.len();
        if count == 0 {
            return;
        }

        self.phase_elapsed += 1.0;
        // Zero-length phases are skipped, bounded by one full cycle
        for _ in 0..count {
            let duration = program.phases[self.phase_index].duration;
            if self.phase_elapsed < duration {
                break;
            }
            self.phase_elapsed -= duration.max(0.0);
            self.phase_index = (self.phase_index + 1) % count;
        }
    }
}

/// The built-in simulator used by the binary and the tests
pub struct MicroSim {
    graph: Arc<RoadGraph>,
    step: Step,
    vehicles: HashMap<VehicleId, SimVehicle>,
    lanes: BTreeMap<LaneId, BTreeMap<OrderedFloat<f64>, VehicleId>>,
    signals: BTreeMap<SignalId, SimSignal>,
    pending: VecDeque<PendingVehicle>,
    scheduled: BTreeMap<Step, Vec<PendingVehicle>>,
    departed: Vec<VehicleId>,
    arrived: Vec<VehicleId>,
    next_background_id: usize,
}

impl MicroSim {
    /// Builds the simulator over `graph`, installing each signal's phases as
    /// its default program
    pub fn new(graph: Arc<RoadGraph>, signals: &[SignalDescription]) -> SimResult<Self> {
        let mut sim_signals = BTreeMap::new();
        for description in signals {
            for phase in &description.phases {
                if phase.state.chars().count() != description.links.len() {
                    return Err(SimError::Config(format!(
                        "{} has {} links but phase state '{}'",
                        description.id,
                        description.links.len(),
                        phase.state
                    )));
                }
            }
            let program = SignalProgram::new(DEFAULT_PROGRAM_ID, description.phases.clone());
            sim_signals.insert(
                description.id,
                SimSignal {
                    node: description.node,
                    links: description.links.clone(),
                    programs: HashMap::from([(DEFAULT_PROGRAM_ID.to_string(), program)]),
                    active: DEFAULT_PROGRAM_ID.to_string(),
                    phase_index: 0,
                    phase_elapsed: 0.0,
                    held_state: None,
                },
            );
        }

        Ok(Self {
            graph,
            step: 0,
            vehicles: HashMap::new(),
            lanes: BTreeMap::new(),
            signals: sim_signals,
            pending: VecDeque::new(),
            scheduled: BTreeMap::new(),
            departed: Vec::new(),
            arrived: Vec::new(),
            next_background_id: BACKGROUND_ID_BASE,
        })
    }

    pub fn graph(&self) -> &Arc<RoadGraph> {
        &self.graph
    }

    /// Schedules a background vehicle to depart at `depart` along `route`
    pub fn schedule_trip(&mut self, depart: Step, route: Vec<EdgeId>) -> SimResult<VehicleId> {
        self.check_route(&route)?;
        let id = VehicleId(self.next_background_id);
        self.next_background_id += 1;
        self.scheduled.entry(depart).or_default().push(PendingVehicle {
            id,
            route,
            speed_factor: 1.0,
        });
        Ok(id)
    }

    /// Node a signal controls
    pub fn signal_node(&self, signal: SignalId) -> SimResult<NodeId> {
        Ok(self.signal(signal)?.node)
    }

    fn signal(&self, signal: SignalId) -> SimResult<&SimSignal> {
        self.signals
            .get(&signal)
            .ok_or_else(|| SimError::not_found("signal", signal))
    }

    fn signal_mut(&mut self, signal: SignalId) -> SimResult<&mut SimSignal> {
        self.signals
            .get_mut(&signal)
            .ok_or_else(|| SimError::not_found("signal", signal))
    }

    fn check_route(&self, route: &[EdgeId]) -> SimResult<()> {
        let Some(first) = route.first() else {
            return Err(SimError::Config("empty route".to_string()));
        };
        let mut previous = self.graph.edge(*first)?;
        for id in &route[1..] {
            let edge = self.graph.edge(*id)?;
            if previous.to != edge.from {
                return Err(SimError::Config(format!(
                    "route is not connected between {} and {}",
                    previous.id, edge.id
                )));
            }
            previous = edge;
        }
        Ok(())
    }

    /// Signal link used to go from `lane` onto `next`
    fn link_for(&self, lane: LaneId, next: EdgeId) -> Option<(SignalId, usize)> {
        let signal = self.graph.edge(lane.edge).ok()?.signal?;
        let links = &self.signals.get(&signal)?.links;
        links
            .iter()
            .position(|link| link.from == lane && link.to.edge == next)
            .or_else(|| {
                links
                    .iter()
                    .position(|link| link.from.edge == lane.edge && link.to.edge == next)
            })
            .map(|index| (signal, index))
    }

    /// Lane of `route[index]` that has a link towards the following edge,
    /// falling back to the right-most lane
    fn choose_lane(&self, route: &[EdgeId], index: usize) -> LaneId {
        let edge = route[index];
        let right_most = LaneId::new(edge, 0);
        let Some(next) = route.get(index + 1) else {
            return right_most;
        };
        self.graph
            .edge(edge)
            .ok()
            .and_then(|edge| edge.signal)
            .and_then(|signal| self.signals.get(&signal))
            .and_then(|signal| {
                signal
                    .links
                    .iter()
                    .find(|link| link.from.edge == edge && link.to.edge == *next)
                    .map(|link| link.from)
            })
            .unwrap_or(right_most)
    }

    /// Position of the rear-most vehicle on `lane`
    fn rear_on_lane(&self, lane: LaneId) -> Option<f64> {
        self.lanes
            .get(&lane)
            .and_then(|vehicles| vehicles.keys().next())
            .map(|position| position.into_inner())
    }

    fn vehicle_ahead(&self, lane: LaneId, position: f64) -> Option<f64> {
        self.lanes
            .get(&lane)?
            .range((Bound::Excluded(OrderedFloat(position)), Bound::Unbounded))
            .next()
            .map(|(position, _)| position.into_inner())
    }

    fn place(&mut self, id: VehicleId, lane: LaneId, position: f64) {
        self.lanes
            .entry(lane)
            .or_default()
            .insert(OrderedFloat(position), id);
    }

    fn unplace(&mut self, id: VehicleId, lane: LaneId, position: f64) {
        if let Some(vehicles) = self.lanes.get_mut(&lane) {
            if vehicles.get(&OrderedFloat(position)) == Some(&id) {
                vehicles.remove(&OrderedFloat(position));
            }
        }
    }

    /// Moves one vehicle by one step
    fn update_vehicle(&mut self, mut vehicle: SimVehicle) -> SimResult<MoveOutcome> {
        let edge = self.graph.edge(vehicle.lane.edge)?.clone();
        let previous_lane = vehicle.lane;
        let previous_position = vehicle.position;

        let mut distance_delta = edge.speed * vehicle.speed_factor;
        if let Some(ahead) = self.vehicle_ahead(vehicle.lane, vehicle.position) {
            let room = ahead - vehicle.position - SAFE_GAP;
            distance_delta = distance_delta.min(room.max(0.0));
        }

        let mut target = vehicle.position + distance_delta;
        if target >= edge.length {
            let Some(next) = vehicle.route.get(vehicle.route_index + 1).copied() else {
                self.unplace(vehicle.id, previous_lane, previous_position);
                return Ok(MoveOutcome::Arrived);
            };

            let green = match self.link_for(vehicle.lane, next) {
                Some((signal, link_index)) => self
                    .signal(signal)?
                    .state()?
                    .chars()
                    .nth(link_index)
                    .map(is_green)
                    .unwrap_or(true),
                None => true,
            };

            let next_lane = self.choose_lane(&vehicle.route, vehicle.route_index + 1);
            let room_ahead = self.rear_on_lane(next_lane);
            let can_enter = room_ahead.map_or(true, |rear| rear > SAFE_GAP);

            if green && can_enter {
                let overflow = target - edge.length;
                let limit = room_ahead.map_or(overflow, |rear| rear - SAFE_GAP);
                vehicle.route_index += 1;
                vehicle.lane = next_lane;
                vehicle.position = overflow.min(limit).max(0.0);
                vehicle.speed = distance_delta;
                trace!("{} entered {}", vehicle.id, next_lane);
            } else {
                target = edge.length;
                vehicle.speed = target - vehicle.position;
                vehicle.position = target;
            }
        } else {
            vehicle.speed = distance_delta;
            vehicle.position = target;
        }

        self.unplace(vehicle.id, previous_lane, previous_position);
        self.place(vehicle.id, vehicle.lane, vehicle.position);
        self.vehicles.insert(vehicle.id, vehicle);
        Ok(MoveOutcome::Continue)
    }

    /// Moves every vehicle, front of each lane first so followers see where
    /// their leader ended up
    fn update_vehicles(&mut self) -> SimResult<()> {
        let order: Vec<VehicleId> = self
            .lanes
            .values()
            .flat_map(|vehicles| vehicles.values().rev().copied())
            .collect();

        for id in order {
            let Some(vehicle) = self.vehicles.remove(&id) else {
                continue;
            };
            if self.update_vehicle(vehicle)? == MoveOutcome::Arrived {
                self.arrived.push(id);
            }
        }
        Ok(())
    }

    /// Inserts waiting vehicles whose first lane has room at its start
    fn insert_pending(&mut self) {
        if let Some(due) = self.scheduled.remove(&self.step) {
            self.pending.extend(due);
        }
        let due_earlier: Vec<Step> = self.scheduled.range(..self.step).map(|(step, _)| *step).collect();
        for step in due_earlier {
            if let Some(due) = self.scheduled.remove(&step) {
                self.pending.extend(due);
            }
        }

        let mut blocked = VecDeque::new();
        while let Some(pending) = self.pending.pop_front() {
            let lane = self.choose_lane(&pending.route, 0);
            if self.rear_on_lane(lane).map_or(false, |rear| rear <= SAFE_GAP) {
                blocked.push_back(pending);
                continue;
            }
            self.place(pending.id, lane, 0.0);
            self.vehicles.insert(
                pending.id,
                SimVehicle {
                    id: pending.id,
                    route: pending.route,
                    route_index: 0,
                    lane,
                    position: 0.0,
                    speed: 0.0,
                    speed_factor: pending.speed_factor,
                },
            );
            self.departed.push(pending.id);
        }
        self.pending = blocked;
    }
}

impl TravelTimes for MicroSim {
    /// Length over the mean speed on the lane, never below free flow
    fn lane_travel_time(&self, lane: LaneId) -> f64 {
        let Ok(edge) = self.graph.edge(lane.edge) else {
            return f64::INFINITY;
        };
        let free_flow = edge.length / edge.speed.max(f64::EPSILON);

        let speeds: Vec<f64> = self
            .lanes
            .get(&lane)
            .into_iter()
            .flat_map(|vehicles| vehicles.values())
            .filter_map(|id| self.vehicles.get(id))
            .map(|vehicle| vehicle.speed)
            .collect();
        if speeds.is_empty() {
            return free_flow;
        }

        let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
        (edge.length / mean.max(HALTING_SPEED)).max(free_flow)
    }
}

impl TrafficSimulator for MicroSim {
    fn current_step(&self) -> Step {
        self.step
    }

    fn advance(&mut self) -> SimResult<()> {
        self.step += 1;
        self.departed.clear();
        self.arrived.clear();

        for signal in self.signals.values_mut() {
            signal.tick();
        }
        self.update_vehicles()?;
        self.insert_pending();

        debug!(
            "step {}: {} vehicles, {} departed, {} arrived",
            self.step,
            self.vehicles.len(),
            self.departed.len(),
            self.arrived.len()
        );
        Ok(())
    }

    fn min_expected_vehicles(&self) -> usize {
        self.vehicles.len()
            + self.pending.len()
            + self.scheduled.values().map(Vec::len).sum::<usize>()
    }

    fn departed_vehicles(&self) -> &[VehicleId] {
        &self.departed
    }

    fn arrived_vehicles(&self) -> &[VehicleId] {
        &self.arrived
    }

    fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    fn add_vehicle(&mut self, id: VehicleId, route: &[EdgeId], speed_factor: f64) -> SimResult<()> {
        self.check_route(route)?;
        if self.vehicles.contains_key(&id) || self.pending.iter().any(|pending| pending.id == id) {
            return Err(SimError::Config(format!("duplicate vehicle {}", id)));
        }
        self.pending.push_back(PendingVehicle {
            id,
            route: route.to_vec(),
            speed_factor,
        });
        Ok(())
    }

    fn remove_vehicle(&mut self, id: VehicleId) -> SimResult<()> {
        if let Some(vehicle) = self.vehicles.remove(&id) {
            self.unplace(id, vehicle.lane, vehicle.position);
            return Ok(());
        }
        let before = self.pending.len();
        self.pending.retain(|pending| pending.id != id);
        if self.pending.len() == before {
            return Err(SimError::not_found("vehicle", id));
        }
        Ok(())
    }

    fn vehicle_edge(&self, id: VehicleId) -> Option<EdgeId> {
        self.vehicles.get(&id).map(|vehicle| vehicle.lane.edge)
    }

    fn vehicle_lane(&self, id: VehicleId) -> Option<LaneId> {
        self.vehicles.get(&id).map(|vehicle| vehicle.lane)
    }

    fn vehicle_lane_position(&self, id: VehicleId) -> Option<f64> {
        self.vehicles.get(&id).map(|vehicle| vehicle.position)
    }

    fn vehicle_speed(&self, id: VehicleId) -> Option<f64> {
        self.vehicles.get(&id).map(|vehicle| vehicle.speed)
    }

    fn next_signals(&self, id: VehicleId) -> Vec<UpcomingSignal> {
        let Some(vehicle) = self.vehicles.get(&id) else {
            return Vec::new();
        };

        let mut upcoming = Vec::new();
        let mut distance = 0.0;
        for index in vehicle.route_index..vehicle.route.len() {
            let Ok(edge) = self.graph.edge(vehicle.route[index]) else {
                break;
            };
            distance += if index == vehicle.route_index {
                (edge.length - vehicle.position).max(0.0)
            } else {
                edge.length
            };

            let Some(next) = vehicle.route.get(index + 1) else {
                break;
            };
            let lane = if index == vehicle.route_index {
                vehicle.lane
            } else {
                self.choose_lane(&vehicle.route, index)
            };
            if let Some((signal, link_index)) = self.link_for(lane, *next) {
                upcoming.push(UpcomingSignal {
                    signal,
                    link_index,
                    distance,
                });
            }
        }
        upcoming
    }

    fn lane_halting_count(&self, lane: LaneId) -> usize {
        self.lanes
            .get(&lane)
            .into_iter()
            .flat_map(|vehicles| vehicles.values())
            .filter_map(|id| self.vehicles.get(id))
            .filter(|vehicle| vehicle.speed < HALTING_SPEED)
            .count()
    }

    fn signal_ids(&self) -> Vec<SignalId> {
        self.signals.keys().copied().collect()
    }

    fn controlled_lanes(&self, signal: SignalId) -> SimResult<Vec<LaneId>> {
        Ok(self.signal(signal)?.links.iter().map(|link| link.from).collect())
    }

    fn controlled_links(&self, signal: SignalId) -> SimResult<Vec<ControlledLink>> {
        Ok(self.signal(signal)?.links.clone())
    }

    fn signal_phase_index(&self, signal: SignalId) -> SimResult<usize> {
        Ok(self.signal(signal)?.phase_index)
    }

    fn signal_state(&self, signal: SignalId) -> SimResult<String> {
        self.signal(signal)?.state()
    }

    fn signal_program(&self, signal: SignalId) -> SimResult<SignalProgram> {
        Ok(self.signal(signal)?.program()?.clone())
    }

    fn install_program(&mut self, signal: SignalId, program: &SignalProgram) -> SimResult<()> {
        let sim_signal = self.signal_mut(signal)?;
        if program.phases.is_empty() {
            return Err(SimError::Config(format!(
                "program {} for {} has no phases",
                program.program_id, signal
            )));
        }
        sim_signal
            .programs
            .insert(program.program_id.clone(), program.clone());
        sim_signal.active = program.program_id.clone();
        sim_signal.phase_index = 0;
        sim_signal.phase_elapsed = 0.0;
        sim_signal.held_state = None;
        Ok(())
    }

    fn set_signal_state(&mut self, signal: SignalId, state: &str, _duration: f64) -> SimResult<()> {
        let sim_signal = self.signal_mut(signal)?;
        if state.chars().count() != sim_signal.links.len() {
            return Err(SimError::Config(format!(
                "state '{}' does not match the {} links of {}",
                state,
                sim_signal.links.len(),
                signal
            )));
        }
        sim_signal.held_state = Some(state.to_string());
        Ok(())
    }

    fn set_signal_phase(&mut self, signal: SignalId, index: usize) -> SimResult<()> {
        let sim_signal = self.signal_mut(signal)?;
        let count = sim_signal.program()?.phases.len();
        if index >= count {
            return Err(SimError::not_found("phase", index));
        }
        sim_signal.phase_index = index;
        sim_signal.phase_elapsed = 0.0;
        sim_signal.held_state = None;
        Ok(())
    }
}
