//! Requests exchanged between vehicles and the arbitration engine

use std::cmp::Ordering;

use super::settings::{PreemptionMode, ResetMode};
use super::signal::SignalProgram;
use super::types::{SignalId, Step, VehicleId};

/// What a winning request does to the signal
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    /// Show this indicator string for a fixed duration
    Phase { state: String, duration: f64 },
    /// Install this rewritten program under a fresh variant id
    Program(SignalProgram),
}

/// A vehicle's claim on one signal
#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionRequest {
    pub step: Step,
    pub vehicle: VehicleId,
    pub signal: SignalId,
    /// Distance to the signal when the request was made
    pub distance: f64,
    pub mode: PreemptionMode,
    pub log: String,
    pub payload: RequestPayload,
}

impl PreemptionRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn immediate(
        step: Step,
        vehicle: VehicleId,
        signal: SignalId,
        distance: f64,
        mode: PreemptionMode,
        log: impl Into<String>,
        state: impl Into<String>,
        duration: f64,
    ) -> Self {
        Self {
            step,
            vehicle,
            signal,
            distance,
            mode,
            log: log.into(),
            payload: RequestPayload::Phase {
                state: state.into(),
                duration,
            },
        }
    }

    pub fn mediated(
        step: Step,
        vehicle: VehicleId,
        signal: SignalId,
        distance: f64,
        mode: PreemptionMode,
        log: impl Into<String>,
        program: SignalProgram,
    ) -> Self {
        Self {
            step,
            vehicle,
            signal,
            distance,
            mode,
            log: log.into(),
            payload: RequestPayload::Program(program),
        }
    }
}

/// Restores a signal once its owner has passed it
#[derive(Debug, Clone)]
pub struct ResetRequest {
    /// First step at which the reset may run
    pub step: Step,
    /// Arrival order among requests for the same step
    pub sequence: u64,
    pub mode: ResetMode,
    pub signal: SignalId,
    pub vehicle: VehicleId,
    /// Phase index the signal showed before it was preempted
    pub previous_phase: usize,
}

impl PartialEq for ResetRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ResetRequest {}

impl PartialOrd for ResetRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResetRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.step
            .cmp(&other.step)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Signal state remembered when a vehicle first takes a signal over
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSnapshot {
    pub mode: PreemptionMode,
    pub phase: usize,
}
