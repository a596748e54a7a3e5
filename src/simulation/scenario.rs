//! Scenario files
//!
//! A scenario is a JSON document describing the network, the intervention
//! routes and vehicles, planner policy and optional background traffic.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::landmarks::DEFAULT_LANDMARK_COUNT;
use super::road_network::{NetworkDescription, RoadGraph};
use super::settings::{PathFinderAlgorithm, PathFinderMode, PlannerConfig, PreemptionMode, ResetMode};
use super::types::{EdgeId, NodeId, Step, EMERGENCY_CLASS};
use super::vehicle::VehicleProfile;

fn default_max_steps() -> Step {
    3600
}

fn default_min_steps() -> Step {
    300
}

fn default_landmarks() -> usize {
    DEFAULT_LANDMARK_COUNT
}

fn default_class() -> String {
    EMERGENCY_CLASS.to_string()
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Hard upper bound on the number of steps
    #[serde(default = "default_max_steps")]
    pub max_steps: Step,
    /// The run continues at least this long even when every vehicle finished
    #[serde(default = "default_min_steps")]
    pub min_steps: Step,
    #[serde(default)]
    pub seed: u64,
    /// Background vehicles departing while the network holds more than this
    /// are removed again
    #[serde(default)]
    pub max_num_vehicles: Option<usize>,
    /// Route report written at the end of each run
    #[serde(default)]
    pub report: Option<PathBuf>,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            min_steps: default_min_steps(),
            seed: 0,
            max_num_vehicles: None,
            report: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSettings {
    /// Network file, relative to the scenario file
    #[serde(default)]
    pub network_file: Option<PathBuf>,
    #[serde(default)]
    pub network: Option<NetworkDescription>,
    #[serde(default = "default_landmarks")]
    pub landmarks: usize,
    /// Historical occupancy per edge, in [0, 1]
    #[serde(default)]
    pub occupancy: HashMap<EdgeId, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSettings {
    pub id: String,
    pub start_node: NodeId,
    pub destination_node: NodeId,
    pub preemption_range: f64,
    #[serde(default)]
    pub is_one_way: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleSettings {
    pub route: String,
    #[serde(default)]
    pub start_delay: Step,
    pub preemption_mode: PreemptionMode,
    pub reset_mode: ResetMode,
    pub path_finder_mode: PathFinderMode,
    pub path_finder_algorithm: PathFinderAlgorithm,
    #[serde(default)]
    pub repeat: Option<usize>,
    #[serde(default)]
    pub repeat_period: Step,
    #[serde(default = "default_class")]
    pub class: String,
}

/// Preemption and reset modes applied to every vehicle of one parallel run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VehicleMode {
    pub id: usize,
    pub preemption_mode: PreemptionMode,
    pub reset_mode: ResetMode,
}

/// Background vehicles driving the shortest path between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTrip {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub depart: Step,
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default)]
    pub period: Step,
}

/// A vehicle to register, possibly several times
#[derive(Debug, Clone)]
pub struct VehicleEntry {
    pub profile: VehicleProfile,
    pub repeat: usize,
    pub repeat_period: Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub general: GeneralSettings,
    pub map: MapSettings,
    #[serde(default)]
    pub planner: PlannerConfig,
    pub routes: Vec<RouteSettings>,
    pub vehicles: Vec<VehicleSettings>,
    #[serde(default)]
    pub vehicle_modes: Vec<VehicleMode>,
    #[serde(default)]
    pub background_trips: Vec<BackgroundTrip>,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let mut scenario: Scenario = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))?;
        scenario.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        for vehicle in &self.vehicles {
            if self.route(&vehicle.route).is_none() {
                bail!("Vehicle refers to unknown route '{}'", vehicle.route);
            }
        }
        if self.map.network.is_none() && self.map.network_file.is_none() {
            bail!("Scenario map needs either 'network' or 'network_file'");
        }
        Ok(())
    }

    pub fn route(&self, id: &str) -> Option<&RouteSettings> {
        self.routes.iter().find(|route| route.id == id)
    }

    pub fn vehicle_mode(&self, id: usize) -> Result<VehicleMode> {
        self.vehicle_modes
            .iter()
            .find(|mode| mode.id == id)
            .copied()
            .with_context(|| format!("Vehicle mode {} is not defined", id))
    }

    /// The inline network, or the network file read from disk
    pub fn network(&self) -> Result<NetworkDescription> {
        if let Some(network) = &self.map.network {
            return Ok(network.clone());
        }
        let Some(file) = &self.map.network_file else {
            bail!("Scenario map needs either 'network' or 'network_file'");
        };
        let path = self.base_dir.join(file);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read network {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse network {}", path.display()))
    }

    pub fn road_graph(&self) -> Result<RoadGraph> {
        let network = self.network()?;
        RoadGraph::from_description(&network, &self.map.occupancy).context("Failed to build road graph")
    }

    /// Vehicles to register, with modes taken from `mode` when given
    pub fn vehicle_entries(&self, mode: Option<VehicleMode>) -> Result<Vec<VehicleEntry>> {
        self.vehicles
            .iter()
            .map(|vehicle| {
                let route = self
                    .route(&vehicle.route)
                    .with_context(|| format!("Unknown route '{}'", vehicle.route))?;
                Ok(VehicleEntry {
                    profile: VehicleProfile {
                        route_name: route.id.clone(),
                        start: route.start_node,
                        destination: route.destination_node,
                        start_delay: vehicle.start_delay,
                        preemption_mode: mode.map_or(vehicle.preemption_mode, |mode| mode.preemption_mode),
                        reset_mode: mode.map_or(vehicle.reset_mode, |mode| mode.reset_mode),
                        path_finder_mode: vehicle.path_finder_mode,
                        path_finder_algorithm: vehicle.path_finder_algorithm,
                        preemption_range: route.preemption_range,
                        is_one_way: route.is_one_way,
                        class: vehicle.class.clone(),
                    },
                    repeat: vehicle.repeat.unwrap_or(1),
                    repeat_period: vehicle.repeat_period,
                })
            })
            .collect()
    }
}
