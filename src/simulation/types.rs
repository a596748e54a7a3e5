//! Core types for the intervention simulation
//!
//! Identifiers are thin newtypes so a node id can never be passed where an
//! edge id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulation time, counted in whole steps
pub type Step = u64;

macro_rules! sim_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

sim_id!(
    /// A junction in the road graph
    NodeId,
    "n"
);
sim_id!(
    /// A directed road segment
    EdgeId,
    "e"
);
sim_id!(
    /// A traffic light controlling one junction
    SignalId,
    "tl"
);
sim_id!(
    /// A vehicle known to the simulator
    VehicleId,
    "veh"
);

/// A single lane of an edge, numbered from the right-most lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LaneId {
    pub edge: EdgeId,
    pub index: usize,
}

impl LaneId {
    pub fn new(edge: EdgeId, index: usize) -> Self {
        Self { edge, index }
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.edge, self.index)
    }
}

/// A 2D position in network coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Z-component of the cross product of `a - self` and `b - self`.
    /// Positive for a counter-clockwise turn, zero when collinear.
    pub fn cross(&self, a: &Position, b: &Position) -> f64 {
        (a.x - self.x) * (b.y - self.y) - (a.y - self.y) * (b.x - self.x)
    }
}

/// Vehicle class the intervention fleet routes with
pub const EMERGENCY_CLASS: &str = "emergency";

/// Length of a vehicle in network units
pub const VEHICLE_LENGTH: f64 = 5.0;

/// Safe following distance multiplier for VEHICLE_LENGTH
pub const SAFE_FOLLOWING_MULTIPLIER: f64 = 1.5;
