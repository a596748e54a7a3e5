//! Signal arbitration
//!
//! The engine is the only code that changes signal state on behalf of
//! vehicles. It queues preemption and reset requests, decides who owns each
//! signal, applies winners to the simulator and restores signals afterwards.
//! A signal has at most one owner at any time.

use log::{debug, warn};
use serde::Serialize;
use sorted_vec::SortedVec;
use std::collections::{HashMap, VecDeque};

use super::error::{SimError, SimResult};
use super::request::{PhaseSnapshot, PreemptionRequest, RequestPayload, ResetRequest};
use super::settings::ResetMode;
use super::signal::{is_green, ProgramArena, SignalProgram};
use super::simulator::TrafficSimulator;
use super::types::{SignalId, Step, VehicleId};

/// The engine's view of the vehicles it arbitrates between
pub trait Fleet {
    /// Remaining route distance from the vehicle to the signal's stop line
    fn distance_to_signal(&self, vehicle: VehicleId, signal: SignalId) -> Option<f64>;

    fn preemption_accepted(&mut self, vehicle: VehicleId, signal: SignalId, step: Step);

    fn preemption_rejected(&mut self, vehicle: VehicleId, signal: SignalId, step: Step);

    fn add_checkpoint(&mut self, vehicle: VehicleId, message: &str, step: Step);
}

/// One entry of the arbitration log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrationEvent {
    pub step: Step,
    pub vehicle: VehicleId,
    pub action: String,
    pub signal: SignalId,
    /// Preemption mode for requests, reset mode for resets
    pub mode: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArbitrationStats {
    pub accepted: usize,
    pub rejected: usize,
    pub postponed: usize,
    pub resets: usize,
    pub dropped_resets: usize,
}

pub struct ArbitrationEngine {
    programs: ProgramArena,
    queue: VecDeque<PreemptionRequest>,
    /// Winning request per signal
    owners: HashMap<SignalId, PreemptionRequest>,
    snapshots: HashMap<SignalId, PhaseSnapshot>,
    postponed: Vec<PreemptionRequest>,
    resets: SortedVec<ResetRequest>,
    next_sequence: u64,
    events: Vec<ArbitrationEvent>,
    stats: ArbitrationStats,
}

impl ArbitrationEngine {
    pub fn new(programs: ProgramArena) -> Self {
        Self {
            programs,
            queue: VecDeque::new(),
            owners: HashMap::new(),
            snapshots: HashMap::new(),
            postponed: Vec::new(),
            resets: SortedVec::new(),
            next_sequence: 0,
            events: Vec::new(),
            stats: ArbitrationStats::default(),
        }
    }

    /// Captures the active program of every signal as its default template
    pub fn from_simulator(sim: &dyn TrafficSimulator) -> SimResult<Self> {
        let mut programs = ProgramArena::new();
        for signal in sim.signal_ids() {
            programs.capture(signal, sim.signal_program(signal)?);
        }
        debug!("Captured {} default signal programs", programs.len());
        Ok(Self::new(programs))
    }

    /// Read-only default template of a signal
    pub fn default_program(&self, signal: SignalId) -> SimResult<&SignalProgram> {
        self.programs.default_program(signal)
    }

    pub fn owner(&self, signal: SignalId) -> Option<VehicleId> {
        self.owners.get(&signal).map(|request| request.vehicle)
    }

    pub fn current_request(&self, signal: SignalId) -> Option<&PreemptionRequest> {
        self.owners.get(&signal)
    }

    pub fn preempted_signals(&self) -> impl Iterator<Item = (SignalId, VehicleId)> + '_ {
        self.owners
            .iter()
            .map(|(signal, request)| (*signal, request.vehicle))
    }

    pub fn snapshot(&self, signal: SignalId) -> Option<PhaseSnapshot> {
        self.snapshots.get(&signal).copied()
    }

    pub fn postponed(&self) -> &[PreemptionRequest] {
        &self.postponed
    }

    pub fn queued_requests(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_resets(&self) -> usize {
        self.resets.len()
    }

    pub fn events(&self) -> &[ArbitrationEvent] {
        &self.events
    }

    pub fn stats(&self) -> ArbitrationStats {
        self.stats
    }

    /// Queues a request; nothing changes until the next `process_requests`
    pub fn request_preemption(&mut self, request: PreemptionRequest) {
        self.log_request(request.step, &request, "preemption_request", request.log.clone());
        self.queue.push_back(request);
    }

    /// Resolves every queued request in arrival order
    pub fn process_requests(
        &mut self,
        step: Step,
        sim: &mut dyn TrafficSimulator,
        fleet: &mut dyn Fleet,
    ) {
        let queue = std::mem::take(&mut self.queue);
        for request in queue {
            if !self.wins(&request, &*fleet) {
                self.stats.rejected += 1;
                self.log_request(step, &request, "Request rejected.", String::new());
                continue;
            }

            match self.apply(&request, sim) {
                Ok(applied) => self.store_preemption(applied, step, fleet),
                Err(e) => {
                    warn!("Failed to apply preemption of {} for {}: {}", request.signal, request.vehicle, e);
                    self.log_request(step, &request, "apply_failed", e.to_string());
                }
            }
        }
    }

    fn wins(&self, request: &PreemptionRequest, fleet: &dyn Fleet) -> bool {
        let Some(owner) = self.owners.get(&request.signal) else {
            return true;
        };

        if owner.vehicle == request.vehicle {
            return request.mode.is_immediate();
        }

        let requester = fleet.distance_to_signal(request.vehicle, request.signal);
        let holder = fleet.distance_to_signal(owner.vehicle, request.signal);
        match (requester, holder) {
            (Some(requester), Some(holder)) => requester < holder,
            // The owner no longer reports a position on its way to the signal
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Pushes a winning request to the simulator. Returns the request as it
    /// should be stored, with the installed program id for mediated requests.
    fn apply(
        &mut self,
        request: &PreemptionRequest,
        sim: &mut dyn TrafficSimulator,
    ) -> SimResult<PreemptionRequest> {
        let signal = request.signal;
        match &request.payload {
            RequestPayload::Phase { state, duration } => {
                let mediated_snapshot = self
                    .snapshots
                    .get(&signal)
                    .is_some_and(|snapshot| snapshot.mode.is_mediated());
                let phase = sim.signal_phase_index(signal)?;
                sim.set_signal_state(signal, state, *duration)?;
                if !mediated_snapshot {
                    self.snapshots.insert(
                        signal,
                        PhaseSnapshot {
                            mode: request.mode,
                            phase,
                        },
                    );
                }
                Ok(request.clone())
            }
            RequestPayload::Program(program) => {
                let phase = sim.signal_phase_index(signal)?;
                let mut installed = program.clone();
                installed.program_id = self.programs.next_variant_id(signal);
                sim.install_program(signal, &installed)?;
                self.snapshots.insert(
                    signal,
                    PhaseSnapshot {
                        mode: request.mode,
                        phase,
                    },
                );

                let mut stored = request.clone();
                stored.payload = RequestPayload::Program(installed);
                Ok(stored)
            }
        }
    }

    /// Transfers ownership to `request`, postponing or rejecting the previous owner
    fn store_preemption(&mut self, request: PreemptionRequest, step: Step, fleet: &mut dyn Fleet) {
        let signal = request.signal;

        if let Some(previous) = self.owners.remove(&signal) {
            if previous.mode.is_mediated() {
                self.stats.postponed += 1;
                self.log_request(step, &previous, "Added to pending queue.", String::new());
                self.postponed.push(previous);
            } else {
                fleet.preemption_rejected(previous.vehicle, signal, step);
                self.log_request(step, &previous, "Request rejected.", String::new());
            }
        }

        fleet.add_checkpoint(request.vehicle, &request.log, step);
        self.log_request(step, &request, "preemption", request.log.clone());
        fleet.preemption_accepted(request.vehicle, signal, step);
        self.stats.accepted += 1;
        self.owners.insert(signal, request);
    }

    /// Re-queues postponed requests whose signal has become free
    pub fn process_pending_mediate_requests(&mut self, step: Step) {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.postponed)
            .into_iter()
            .partition(|request| !self.owners.contains_key(&request.signal));
        self.postponed = waiting;

        for mut request in ready {
            request.step = step;
            request.log = format!("Postponed mediate request for TL: {}.", request.signal);
            self.request_preemption(request);
        }
    }

    /// Schedules the restoration of `signal` at `step`.
    ///
    /// Fails with `NotFound` when the signal was never preempted.
    pub fn request_reset(
        &mut self,
        vehicle: VehicleId,
        step: Step,
        mode: ResetMode,
        signal: SignalId,
    ) -> SimResult<()> {
        let snapshot = self
            .snapshots
            .get(&signal)
            .ok_or_else(|| SimError::not_found("phase snapshot", signal))?;

        let request = ResetRequest {
            step,
            sequence: self.next_sequence,
            mode,
            signal,
            vehicle,
            previous_phase: snapshot.phase,
        };
        self.next_sequence += 1;
        self.log_reset(&request, "reset_request", String::new());
        self.resets.insert(request);
        Ok(())
    }

    /// Runs every reset whose step has been reached
    pub fn process_reset_queue(
        &mut self,
        step: Step,
        sim: &mut dyn TrafficSimulator,
        fleet: &mut dyn Fleet,
    ) {
        while self.resets.first().is_some_and(|reset| reset.step <= step) {
            let request = self.resets.remove_index(0);
            self.reset_signal(request, step, sim, fleet);
        }
    }

    fn reset_signal(
        &mut self,
        request: ResetRequest,
        step: Step,
        sim: &mut dyn TrafficSimulator,
        fleet: &mut dyn Fleet,
    ) {
        let signal = request.signal;
        match self.owners.get(&signal) {
            None => {
                debug!("Reset of {} by {} skipped, signal is not preempted", signal, request.vehicle);
                self.stats.dropped_resets += 1;
                self.log_reset(
                    &request,
                    "TRACE-key_error",
                    format!("TL: {} is not in current preemptions", signal),
                );
                return;
            }
            Some(owner) if owner.vehicle != request.vehicle => {
                let error = SimError::Authorization {
                    vehicle: request.vehicle,
                    signal,
                };
                warn!("{}", error);
                self.stats.dropped_resets += 1;
                self.log_reset(&request, "ERROR-wrong_vehicle_resetting_tl", error.to_string());
                return;
            }
            Some(_) => {}
        }

        let (action, outcome) = match request.mode {
            ResetMode::Standard => ("standard_reset", self.reset_standard(&request, sim)),
            ResetMode::MaxOutflow => ("reset_max_outflow", self.reset_max_outflow(&request, sim)),
        };
        match outcome {
            Ok(message) => {
                self.stats.resets += 1;
                fleet.add_checkpoint(request.vehicle, &message, step);
                self.log_reset(&request, action, message);
            }
            Err(e) => {
                warn!("Failed to reset {}: {}", signal, e);
                self.log_reset(&request, "reset_failed", e.to_string());
            }
        }

        self.owners.remove(&signal);
        self.snapshots.remove(&signal);
        self.release_postponed(signal, request.vehicle, step, &*fleet);
    }

    fn reset_standard(
        &self,
        request: &ResetRequest,
        sim: &mut dyn TrafficSimulator,
    ) -> SimResult<String> {
        let program = self.programs.default_program(request.signal)?;
        sim.install_program(request.signal, program)?;
        sim.set_signal_phase(request.signal, request.previous_phase)?;
        Ok(format!(
            "Resetting tl {} state. To programId: {}",
            request.signal, program.program_id
        ))
    }

    /// Default program, resumed at the phase whose green links hold the most
    /// halting vehicles
    fn reset_max_outflow(
        &self,
        request: &ResetRequest,
        sim: &mut dyn TrafficSimulator,
    ) -> SimResult<String> {
        let program = self.programs.default_program(request.signal)?;
        sim.install_program(request.signal, program)?;

        let queues: Vec<usize> = sim
            .controlled_lanes(request.signal)?
            .into_iter()
            .map(|lane| sim.lane_halting_count(lane))
            .collect();

        let mut best_phase = 0;
        let mut best_score = None;
        for (index, phase) in program.phases.iter().enumerate() {
            let score: usize = phase
                .state
                .chars()
                .zip(&queues)
                .filter(|(indicator, _)| is_green(*indicator))
                .map(|(_, queue)| *queue)
                .sum();
            if best_score.map_or(true, |best| score > best) {
                best_score = Some(score);
                best_phase = index;
            }
        }

        sim.set_signal_phase(request.signal, best_phase)?;
        Ok(format!(
            "Resetting tl {} with max outflow. ProgramId: {}",
            request.signal, program.program_id
        ))
    }

    /// Empties the postponed set of a freed signal. Entries of the releasing
    /// vehicle and of vehicles no longer approaching the signal are dropped,
    /// everyone else's go back into the queue.
    fn release_postponed(
        &mut self,
        signal: SignalId,
        releasing: VehicleId,
        step: Step,
        fleet: &dyn Fleet,
    ) {
        let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.postponed)
            .into_iter()
            .partition(|request| request.signal == signal);
        self.postponed = kept;

        for mut request in released {
            let approaching = fleet.distance_to_signal(request.vehicle, signal).is_some();
            if request.vehicle == releasing || !approaching {
                self.log_request(step, &request, "delete postponed request", String::new());
                continue;
            }
            request.step = step;
            request.log = format!("Postponed mediate request for TL: {}.", request.signal);
            self.request_preemption(request);
        }
    }

    fn log_request(&mut self, step: Step, request: &PreemptionRequest, action: &str, message: String) {
        self.push_event(ArbitrationEvent {
            step,
            vehicle: request.vehicle,
            action: action.to_string(),
            signal: request.signal,
            mode: request.mode.name().to_string(),
            message,
        });
    }

    fn log_reset(&mut self, request: &ResetRequest, action: &str, message: String) {
        self.push_event(ArbitrationEvent {
            step: request.step,
            vehicle: request.vehicle,
            action: action.to_string(),
            signal: request.signal,
            mode: request.mode.name().to_string(),
            message,
        });
    }

    fn push_event(&mut self, event: ArbitrationEvent) {
        debug!(
            "[{}] {} {} {} ({}) {}",
            event.step, event.vehicle, event.action, event.signal, event.mode, event.message
        );
        self.events.push(event);
    }
}
