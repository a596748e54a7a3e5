//! Per-vehicle statistics and the route report
//!
//! Everything here is plain data collected during a run. Exporting it is up
//! to the caller; report rows serialize to JSON.

use serde::{Deserialize, Serialize};

use super::types::{SignalId, Step, VehicleId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    pub step: Step,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisitedIntersection {
    pub signal: SignalId,
    pub step: Step,
}

#[derive(Debug, Clone, Default)]
pub struct VehicleStats {
    pub checkpoints: Vec<Checkpoint>,
    pub visited_intersections: Vec<VisitedIntersection>,
    /// Insertion and arrival steps, alternating, one pair per trip
    pub start_finish_steps: Vec<Step>,
    pub signals_on_route: Vec<SignalId>,
    pub speeds: Vec<f64>,
    pub allowed_speeds: Vec<f64>,
    /// Steps spent halted
    pub waiting_steps: usize,
}

impl VehicleStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_checkpoint(&mut self, description: impl Into<String>, step: Step) {
        self.checkpoints.push(Checkpoint {
            step,
            description: description.into(),
        });
    }

    pub fn add_visited_intersection(&mut self, signal: SignalId, step: Step) {
        self.visited_intersections
            .push(VisitedIntersection { signal, step });
    }

    pub fn add_start_finish_checkpoint(&mut self, step: Step) {
        self.start_finish_steps.push(step);
    }

    /// Pads the speed samples for steps spent off the network
    pub fn add_wait_gap(&mut self, steps: usize) {
        self.speeds.extend(std::iter::repeat(0.0).take(steps));
        self.allowed_speeds.extend(std::iter::repeat(0.0).take(steps));
    }

    pub fn record_speed(&mut self, speed: f64, allowed: f64) {
        let speed = speed.max(0.0);
        if speed < 0.1 {
            self.waiting_steps += 1;
        }
        self.speeds.push(speed);
        self.allowed_speeds.push(allowed);
    }

    /// Completed trips as `(start, finish)` step pairs
    pub fn trips(&self) -> Vec<(Step, Step)> {
        self.start_finish_steps
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    }

    pub fn average_speed(&self) -> f64 {
        if self.speeds.is_empty() {
            0.0
        } else {
            self.speeds.iter().sum::<f64>() / self.speeds.len() as f64
        }
    }
}

/// One completed trip of one vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteReportRow {
    pub vehicle: VehicleId,
    pub route: String,
    pub preemption_mode: String,
    pub reset_mode: String,
    /// 0 for the outbound trip, 1 for the return trip
    pub trip: usize,
    pub start_step: Step,
    pub finish_step: Step,
    pub duration: Step,
    pub visited_intersections: usize,
    pub waiting_steps: usize,
    pub average_speed: f64,
}
