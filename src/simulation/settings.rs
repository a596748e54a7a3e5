//! Vehicle modes and planner policy constants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::SimError;
use super::types::Step;

/// How a vehicle claims the signals ahead of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PreemptionMode {
    None,
    Immediate,
    ImmediateWithMinimalBlockage,
    Mediate,
    MediateFromStart,
}

impl PreemptionMode {
    /// Modes that override the live phase string directly
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            PreemptionMode::Immediate | PreemptionMode::ImmediateWithMinimalBlockage
        )
    }

    /// Modes that install a rescaled program
    pub fn is_mediated(self) -> bool {
        matches!(
            self,
            PreemptionMode::Mediate | PreemptionMode::MediateFromStart
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PreemptionMode::None => "NONE",
            PreemptionMode::Immediate => "IMMEDIATE",
            PreemptionMode::ImmediateWithMinimalBlockage => "IMMEDIATE_WITH_MINIMAL_BLOCKAGE",
            PreemptionMode::Mediate => "MEDIATE",
            PreemptionMode::MediateFromStart => "MEDIATE_FROM_START",
        }
    }
}

impl FromStr for PreemptionMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(PreemptionMode::None),
            "IMMEDIATE" => Ok(PreemptionMode::Immediate),
            "IMMEDIATE_WITH_MINIMAL_BLOCKAGE" => Ok(PreemptionMode::ImmediateWithMinimalBlockage),
            "MEDIATE" => Ok(PreemptionMode::Mediate),
            "MEDIATE_FROM_START" => Ok(PreemptionMode::MediateFromStart),
            _ => Err(SimError::invalid_mode("preemption mode", s)),
        }
    }
}

/// How a signal is restored once the owning vehicle has passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResetMode {
    /// Default program, resumed at the remembered phase
    Standard,
    /// Default program, resumed at the phase draining the longest queues
    MaxOutflow,
}

impl ResetMode {
    pub fn name(self) -> &'static str {
        match self {
            ResetMode::Standard => "STANDARD",
            ResetMode::MaxOutflow => "MAX_OUTFLOW",
        }
    }
}

impl FromStr for ResetMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STANDARD" => Ok(ResetMode::Standard),
            "MAX_OUTFLOW" | "MAX_OUT_FLOW" => Ok(ResetMode::MaxOutflow),
            _ => Err(SimError::invalid_mode("reset mode", s)),
        }
    }
}

/// Edge cost model used by route search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PathFinderMode {
    Shortest,
    Fastest,
    FastestOnAverage,
}

impl PathFinderMode {
    pub fn name(self) -> &'static str {
        match self {
            PathFinderMode::Shortest => "SHORTEST",
            PathFinderMode::Fastest => "FASTEST",
            PathFinderMode::FastestOnAverage => "FASTEST_ON_AVERAGE",
        }
    }
}

impl FromStr for PathFinderMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHORTEST" => Ok(PathFinderMode::Shortest),
            "FASTEST" => Ok(PathFinderMode::Fastest),
            "FASTEST_ON_AVERAGE" => Ok(PathFinderMode::FastestOnAverage),
            _ => Err(SimError::invalid_mode("path finder mode", s)),
        }
    }
}

/// Which search strategy computes a vehicle's route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PathFinderAlgorithm {
    /// Runs every strategy, installs the Dijkstra route
    Validator,
    Dijkstra,
    Alt,
    AStar,
}

impl PathFinderAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            PathFinderAlgorithm::Validator => "VALIDATOR",
            PathFinderAlgorithm::Dijkstra => "DIJKSTRA",
            PathFinderAlgorithm::Alt => "ALT",
            PathFinderAlgorithm::AStar => "A_STAR",
        }
    }
}

impl FromStr for PathFinderAlgorithm {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VALIDATOR" => Ok(PathFinderAlgorithm::Validator),
            "DIJKSTRA" => Ok(PathFinderAlgorithm::Dijkstra),
            "ALT" => Ok(PathFinderAlgorithm::Alt),
            "A_STAR" | "ASTAR" => Ok(PathFinderAlgorithm::AStar),
            _ => Err(SimError::invalid_mode("path finder algorithm", s)),
        }
    }
}

macro_rules! display_by_name {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        })*
    };
}

display_by_name!(PreemptionMode, ResetMode, PathFinderMode, PathFinderAlgorithm);

// Scenario files spell modes by name; unknown names surface as `InvalidMode`
macro_rules! serde_by_name {
    ($($ty:ty),*) => {
        $(impl TryFrom<String> for $ty {
            type Error = SimError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> String {
                value.name().to_string()
            }
        })*
    };
}

serde_by_name!(PreemptionMode, ResetMode, PathFinderMode, PathFinderAlgorithm);

/// Policy thresholds for preemption planning.
///
/// Distances are in network units, durations in steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Upcoming signals within this span of the nearest one are claimed together
    pub immediate_group_span: f64,
    pub immediate_phase_duration: f64,
    /// Mediated planning looks no further ahead than this
    pub mediate_range: f64,
    /// Below this distance mediation falls back to an immediate request
    pub mediate_immediate_cutoff: f64,
    /// Owned signals closer than this are checked against the expected phase
    pub recheck_distance: f64,
    /// MEDIATE_FROM_START only claims signals farther than this on insertion
    pub initial_mediate_min_distance: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub green_min_duration: f64,
    pub green_max_duration: f64,
    pub other_min_duration: f64,
    pub other_max_duration: f64,
    pub target_phase_duration: f64,
    /// ETA below which an already active target phase is just extended
    pub on_target_eta: f64,
    pub on_target_margin: f64,
    /// Intervention vehicles are assumed to beat the speed limit by this factor
    pub eta_speed_factor: f64,
    /// Steps between passing a signal and restoring it
    pub reset_delay: Step,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            immediate_group_span: 30.0,
            immediate_phase_duration: 30.0,
            mediate_range: 1500.0,
            mediate_immediate_cutoff: 300.0,
            recheck_distance: 100.0,
            initial_mediate_min_distance: 250.0,
            min_scale: 0.3,
            max_scale: 2.0,
            green_min_duration: 5.0,
            green_max_duration: 40.0,
            other_min_duration: 3.0,
            other_max_duration: 5.0,
            target_phase_duration: 60.0,
            on_target_eta: 30.0,
            on_target_margin: 15.0,
            eta_speed_factor: 1.1,
            reset_delay: 3,
        }
    }
}
