//! Error kinds surfaced by the routing and arbitration core
//!
//! Graph and mode errors are hard failures raised before vehicles enter the
//! network. Arbitration errors are logged by the caller and the run continues.

use thiserror::Error;

use super::types::{NodeId, SignalId, VehicleId};

#[derive(Debug, Error)]
pub enum SimError {
    /// Lookup miss in the road graph or the simulator
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Unrecognised cost model, algorithm, preemption or reset mode
    #[error("invalid {kind} value: {value}")]
    InvalidMode { kind: &'static str, value: String },

    /// Reset requested by a vehicle that does not own the signal
    #[error("vehicle {vehicle} is not authorized to reset {signal}")]
    Authorization { vehicle: VehicleId, signal: SignalId },

    /// Mediated phase rewrite outside the permitted scale bounds
    #[error("cannot mediate {signal} for {vehicle}: {reason}")]
    InfeasibleRewrite {
        vehicle: VehicleId,
        signal: SignalId,
        reason: String,
    },

    /// Anything that went wrong while one vehicle planned its preemption
    #[error("preemption planning failed for {vehicle}: {message}")]
    Planning { vehicle: VehicleId, message: String },

    #[error("no path from {from} to {to}")]
    NoPath { from: NodeId, to: NodeId },

    /// Reconstructed path does not connect the requested endpoints
    #[error("{algorithm} found a wrong path from {from} to {to}")]
    PathMismatch {
        algorithm: String,
        from: NodeId,
        to: NodeId,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SimError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        SimError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_mode(kind: &'static str, value: impl ToString) -> Self {
        SimError::InvalidMode {
            kind,
            value: value.to_string(),
        }
    }

    pub fn planning(vehicle: VehicleId, message: impl ToString) -> Self {
        SimError::Planning {
            vehicle,
            message: message.to_string(),
        }
    }
}

pub type SimResult<T> = std::result::Result<T, SimError>;
