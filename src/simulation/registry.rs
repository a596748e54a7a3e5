//! Intervention vehicle registry
//!
//! Owns every intervention vehicle of a run. The arbitration engine only
//! sees vehicles through the [`Fleet`] implementation here.

use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::arbitration::Fleet;
use super::error::{SimError, SimResult};
use super::road_network::RoadGraph;
use super::simulator::TrafficSimulator;
use super::types::{SignalId, Step, VehicleId};
use super::vehicle::{CachedPosition, InterventionVehicle, VehicleProfile};

pub struct VehicleRegistry {
    graph: Arc<RoadGraph>,
    vehicles: BTreeMap<VehicleId, InterventionVehicle>,
    next_id: usize,
}

impl VehicleRegistry {
    pub fn new(graph: Arc<RoadGraph>) -> Self {
        Self {
            graph,
            vehicles: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Registers one vehicle under the next free id
    pub fn add(&mut self, profile: VehicleProfile) -> VehicleId {
        let id = VehicleId(self.next_id);
        self.next_id += 1;
        self.vehicles.insert(id, InterventionVehicle::new(id, profile));
        id
    }

    /// Registers `repeat` copies of `profile`, each starting `period` steps
    /// after the previous one. Copies after the first get a numbered route name.
    pub fn add_repeated(&mut self, profile: VehicleProfile, repeat: usize, period: Step) -> Vec<VehicleId> {
        (0..repeat.max(1))
            .map(|copy| {
                let mut profile = profile.clone();
                profile.start_delay += period * copy as Step;
                if copy > 0 {
                    profile.route_name = format!("{}_{}", profile.route_name, copy);
                }
                self.add(profile)
            })
            .collect()
    }

    pub fn get(&self, id: VehicleId) -> SimResult<&InterventionVehicle> {
        self.vehicles
            .get(&id)
            .ok_or_else(|| SimError::not_found("vehicle", id))
    }

    pub fn get_mut(&mut self, id: VehicleId) -> SimResult<&mut InterventionVehicle> {
        self.vehicles
            .get_mut(&id)
            .ok_or_else(|| SimError::not_found("vehicle", id))
    }

    pub fn contains(&self, id: VehicleId) -> bool {
        self.vehicles.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterventionVehicle> {
        self.vehicles.values()
    }

    pub fn ids(&self) -> Vec<VehicleId> {
        self.vehicles.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn active_ids(&self) -> Vec<VehicleId> {
        self.vehicles
            .values()
            .filter(|vehicle| vehicle.is_active)
            .map(|vehicle| vehicle.id)
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.vehicles.values().filter(|vehicle| vehicle.is_finished).count()
    }

    pub fn all_finished(&self) -> bool {
        self.vehicles.values().all(|vehicle| vehicle.is_finished)
    }

    /// Caches every active vehicle's simulator position
    pub fn sync_positions(&mut self, sim: &dyn TrafficSimulator) {
        for vehicle in self.vehicles.values_mut().filter(|vehicle| vehicle.is_active) {
            let position = sim.vehicle_edge(vehicle.id).and_then(|edge| {
                sim.vehicle_lane_position(vehicle.id)
                    .map(|lane_position| CachedPosition { edge, lane_position })
            });
            vehicle.sync_position(position);
        }
    }

    /// Records the speed of every active vehicle on the network
    pub fn record_speeds(&mut self, sim: &dyn TrafficSimulator) {
        for vehicle in self.vehicles.values_mut().filter(|vehicle| vehicle.is_active) {
            let Some(edge) = sim.vehicle_edge(vehicle.id) else {
                debug!("{} is not on the network yet", vehicle.id);
                continue;
            };
            let allowed = self.graph.edge(edge).map(|edge| edge.speed).unwrap_or(0.0);
            vehicle
                .stats
                .record_speed(sim.vehicle_speed(vehicle.id).unwrap_or(0.0), allowed);
        }
    }
}

impl Fleet for VehicleRegistry {
    fn distance_to_signal(&self, vehicle: VehicleId, signal: SignalId) -> Option<f64> {
        self.vehicles
            .get(&vehicle)
            .filter(|vehicle| vehicle.is_active)
            .and_then(|vehicle| vehicle.distance_to_signal(signal, &self.graph))
    }

    fn preemption_accepted(&mut self, vehicle: VehicleId, signal: SignalId, step: Step) {
        if let Some(vehicle) = self.vehicles.get_mut(&vehicle) {
            vehicle.preemption_accepted(signal, step);
        }
    }

    fn preemption_rejected(&mut self, vehicle: VehicleId, signal: SignalId, step: Step) {
        if let Some(vehicle) = self.vehicles.get_mut(&vehicle) {
            vehicle.preemption_rejected(signal, step);
        }
    }

    fn add_checkpoint(&mut self, vehicle: VehicleId, message: &str, step: Step) {
        if let Some(vehicle) = self.vehicles.get_mut(&vehicle) {
            vehicle.stats.add_checkpoint(message, step);
        }
    }
}
