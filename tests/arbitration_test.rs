//! Arbitration engine tests
//!
//! Signal ownership, postponement and reset behaviour on a single crossing
//! driven by the built-in simulator.

mod common;

use common::{crossing_network, graph, RecordingFleet, CROSSING};
use intervention_sim::simulation::{
    ArbitrationEngine, EdgeId, LaneId, MicroSim, PhaseOverride, PreemptionMode, PreemptionRequest,
    ResetMode, SimError, SignalId, TrafficSimulator, VehicleId, DEFAULT_PROGRAM_ID,
};

const NEAR: VehicleId = VehicleId(0);
const FAR: VehicleId = VehicleId(1);

fn setup() -> (MicroSim, ArbitrationEngine) {
    let network = crossing_network();
    let sim = MicroSim::new(graph(&network), &network.signals).unwrap();
    let engine = ArbitrationEngine::from_simulator(&sim).unwrap();
    (sim, engine)
}

fn fleet() -> RecordingFleet {
    RecordingFleet::default()
        .with_distance(NEAR, CROSSING, 50.0)
        .with_distance(FAR, CROSSING, 80.0)
}

fn immediate(vehicle: VehicleId, state: &str) -> PreemptionRequest {
    PreemptionRequest::immediate(
        1,
        vehicle,
        CROSSING,
        50.0,
        PreemptionMode::Immediate,
        format!("Immediate TL preemption for {}", vehicle),
        state,
        30.0,
    )
}

fn mediated(engine: &ArbitrationEngine, vehicle: VehicleId) -> PreemptionRequest {
    let template = engine.default_program(CROSSING).unwrap();
    let program = template
        .with_overrides(
            template.program_id.clone(),
            &[PhaseOverride::duration(0, 10.0), PhaseOverride::replace(2, "rGrG", 60.0)],
        )
        .unwrap();
    PreemptionRequest::mediated(
        1,
        vehicle,
        CROSSING,
        80.0,
        PreemptionMode::Mediate,
        "Mediate TL preemption",
        program,
    )
}

#[test]
fn test_requests_are_queued_until_processed() {
    let (sim, mut engine) = setup();

    engine.request_preemption(immediate(NEAR, "GrGr"));

    assert_eq!(engine.queued_requests(), 1);
    assert_eq!(engine.owner(CROSSING), None);
    assert_eq!(sim.signal_state(CROSSING).unwrap(), "GrGr");
}

#[test]
fn test_closer_vehicle_wins_and_farther_is_rejected() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    engine.request_preemption(immediate(NEAR, "rGrG"));
    engine.request_preemption(immediate(FAR, "GrGr"));
    engine.process_requests(1, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), Some(NEAR));
    assert_eq!(sim.signal_state(CROSSING).unwrap(), "rGrG");
    assert_eq!(fleet.accepted, vec![(NEAR, CROSSING)]);
    assert!(fleet.rejected.is_empty());
    assert!(engine.postponed().is_empty());

    let stats = engine.stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(engine.queued_requests(), 0);
}

#[test]
fn test_closer_vehicle_displaces_immediate_owner() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    engine.request_preemption(immediate(FAR, "GrGr"));
    engine.request_preemption(immediate(NEAR, "rGrG"));
    engine.process_requests(1, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), Some(NEAR));
    assert_eq!(sim.signal_state(CROSSING).unwrap(), "rGrG");
    assert_eq!(fleet.accepted, vec![(FAR, CROSSING), (NEAR, CROSSING)]);
    // Immediate owners are told they lost instead of being postponed
    assert_eq!(fleet.rejected, vec![(FAR, CROSSING)]);
    assert!(engine.postponed().is_empty());
}

#[test]
fn test_rejected_request_leaves_signal_untouched() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    engine.request_preemption(immediate(NEAR, "rGrG"));
    engine.process_requests(1, &mut sim, &mut fleet);
    let snapshot = engine.snapshot(CROSSING);

    engine.request_preemption(immediate(FAR, "GrGr"));
    engine.process_requests(2, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), Some(NEAR));
    assert_eq!(sim.signal_state(CROSSING).unwrap(), "rGrG");
    assert_eq!(engine.snapshot(CROSSING), snapshot);
    assert!(engine
        .events()
        .iter()
        .any(|event| event.vehicle == FAR && event.action == "Request rejected."));
}

#[test]
fn test_owner_may_refresh_its_immediate_claim() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    engine.request_preemption(immediate(FAR, "rGrG"));
    engine.process_requests(1, &mut sim, &mut fleet);
    engine.request_preemption(immediate(FAR, "GGGG"));
    engine.process_requests(2, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), Some(FAR));
    assert_eq!(sim.signal_state(CROSSING).unwrap(), "GGGG");
    assert_eq!(engine.stats().accepted, 2);
}

#[test]
fn test_mediated_request_installs_fresh_program() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    let request = mediated(&engine, FAR);
    engine.request_preemption(request);
    engine.process_requests(1, &mut sim, &mut fleet);

    let installed = sim.signal_program(CROSSING).unwrap();
    assert_ne!(installed.program_id, DEFAULT_PROGRAM_ID);
    assert_eq!(installed.phases[0].duration, 10.0);
    assert_eq!(installed.phases[2].state, "rGrG");
    assert_eq!(installed.phases[2].duration, 60.0);

    // The template itself is never modified
    let template = engine.default_program(CROSSING).unwrap();
    assert_eq!(template.program_id, DEFAULT_PROGRAM_ID);
    assert_eq!(template.phases[0].duration, 30.0);
}

#[test]
fn test_mediated_owner_is_postponed_and_retried_on_reset() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    let request = mediated(&engine, FAR);
    engine.request_preemption(request);
    engine.process_requests(1, &mut sim, &mut fleet);
    assert_eq!(engine.owner(CROSSING), Some(FAR));

    engine.request_preemption(immediate(NEAR, "rGrG"));
    engine.process_requests(2, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), Some(NEAR));
    assert_eq!(engine.postponed().len(), 1);
    assert_eq!(engine.postponed()[0].vehicle, FAR);
    assert!(fleet.rejected.is_empty());
    assert_eq!(engine.stats().postponed, 1);

    // Still owned, so nothing is retried
    engine.process_pending_mediate_requests(3);
    assert_eq!(engine.queued_requests(), 0);
    assert_eq!(engine.postponed().len(), 1);

    engine
        .request_reset(NEAR, 4, ResetMode::Standard, CROSSING)
        .unwrap();
    engine.process_reset_queue(4, &mut sim, &mut fleet);

    // The signal is free and the postponed request is back in the queue
    assert_eq!(engine.owner(CROSSING), None);
    assert!(engine.postponed().is_empty());
    assert_eq!(engine.snapshot(CROSSING), None);
    assert_eq!(engine.queued_requests(), 1);

    engine.process_requests(4, &mut sim, &mut fleet);
    engine.process_pending_mediate_requests(4);

    assert_eq!(engine.owner(CROSSING), Some(FAR));
    assert_eq!(engine.queued_requests(), 0);
    assert_ne!(sim.signal_program(CROSSING).unwrap().program_id, DEFAULT_PROGRAM_ID);
    assert_eq!(fleet.accepted.iter().filter(|(vehicle, _)| *vehicle == FAR).count(), 2);
}

#[test]
fn test_reset_drops_the_releasing_vehicles_own_postponed_request() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    engine.request_preemption(mediated(&engine, FAR));
    engine.process_requests(1, &mut sim, &mut fleet);

    // Upgrading its own mediated claim postpones the old one
    engine.request_preemption(immediate(FAR, "rGrG"));
    engine.process_requests(2, &mut sim, &mut fleet);
    assert_eq!(engine.owner(CROSSING), Some(FAR));
    assert_eq!(engine.postponed().len(), 1);

    engine
        .request_reset(FAR, 3, ResetMode::Standard, CROSSING)
        .unwrap();
    engine.process_reset_queue(3, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), None);
    assert!(engine.postponed().is_empty());
    assert_eq!(engine.queued_requests(), 0);
    assert!(engine
        .events()
        .iter()
        .any(|event| event.vehicle == FAR && event.action == "delete postponed request"));
}

#[test]
fn test_postponed_request_of_a_vehicle_past_the_signal_is_dropped() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    engine.request_preemption(mediated(&engine, FAR));
    engine.process_requests(1, &mut sim, &mut fleet);
    engine.request_preemption(immediate(NEAR, "rGrG"));
    engine.process_requests(2, &mut sim, &mut fleet);
    assert_eq!(engine.postponed().len(), 1);

    // FAR no longer has the signal ahead of it
    fleet.distances.remove(&(FAR, CROSSING));
    engine
        .request_reset(NEAR, 3, ResetMode::Standard, CROSSING)
        .unwrap();
    engine.process_reset_queue(3, &mut sim, &mut fleet);

    assert!(engine.postponed().is_empty());
    assert_eq!(engine.queued_requests(), 0);
    assert!(engine
        .events()
        .iter()
        .any(|event| event.vehicle == FAR && event.action == "delete postponed request"));
}

#[test]
fn test_standard_reset_restores_default_program() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    // Move the signal off phase 0 so the restored phase is observable
    sim.set_signal_phase(CROSSING, 2).unwrap();

    engine.request_preemption(immediate(NEAR, "GrGr"));
    engine.process_requests(1, &mut sim, &mut fleet);
    assert_eq!(engine.snapshot(CROSSING).map(|snapshot| snapshot.phase), Some(2));

    engine
        .request_reset(NEAR, 5, ResetMode::Standard, CROSSING)
        .unwrap();
    // Not due yet
    engine.process_reset_queue(4, &mut sim, &mut fleet);
    assert_eq!(engine.owner(CROSSING), Some(NEAR));
    assert_eq!(engine.queued_resets(), 1);

    engine.process_reset_queue(5, &mut sim, &mut fleet);
    assert_eq!(engine.owner(CROSSING), None);
    assert_eq!(engine.queued_resets(), 0);
    assert_eq!(sim.signal_program(CROSSING).unwrap().program_id, DEFAULT_PROGRAM_ID);
    assert_eq!(sim.signal_phase_index(CROSSING).unwrap(), 2);
    assert_eq!(sim.signal_state(CROSSING).unwrap(), "rGrG");
    assert_eq!(engine.stats().resets, 1);
    assert!(fleet
        .checkpoints
        .iter()
        .any(|(vehicle, message)| *vehicle == NEAR && message.starts_with("Resetting tl")));
}

#[test]
fn test_reset_by_other_vehicle_is_dropped() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    engine.request_preemption(immediate(NEAR, "GrGr"));
    engine.process_requests(1, &mut sim, &mut fleet);

    engine
        .request_reset(FAR, 2, ResetMode::Standard, CROSSING)
        .unwrap();
    engine.process_reset_queue(2, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), Some(NEAR));
    assert_eq!(sim.signal_state(CROSSING).unwrap(), "GrGr");
    assert_eq!(engine.stats().dropped_resets, 1);
    assert_eq!(engine.stats().resets, 0);
    assert!(engine
        .events()
        .iter()
        .any(|event| event.action == "ERROR-wrong_vehicle_resetting_tl"));
}

#[test]
fn test_second_reset_finds_signal_free() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    engine.request_preemption(immediate(NEAR, "GrGr"));
    engine.process_requests(1, &mut sim, &mut fleet);
    engine
        .request_reset(NEAR, 2, ResetMode::Standard, CROSSING)
        .unwrap();
    engine
        .request_reset(NEAR, 2, ResetMode::Standard, CROSSING)
        .unwrap();
    engine.process_reset_queue(2, &mut sim, &mut fleet);

    assert_eq!(engine.stats().resets, 1);
    assert_eq!(engine.stats().dropped_resets, 1);
    assert!(engine
        .events()
        .iter()
        .any(|event| event.action == "TRACE-key_error"));
}

#[test]
fn test_reset_without_preemption_is_not_found() {
    let (_sim, mut engine) = setup();

    let result = engine.request_reset(NEAR, 1, ResetMode::Standard, CROSSING);
    assert!(matches!(result, Err(SimError::NotFound { .. })));

    let result = engine.request_reset(NEAR, 1, ResetMode::Standard, SignalId(7));
    assert!(matches!(result, Err(SimError::NotFound { .. })));
    assert_eq!(engine.queued_resets(), 0);
}

#[test]
fn test_max_outflow_reset_serves_longest_queue() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    // Hold north-south green so traffic from the east queues at the line
    engine.request_preemption(immediate(NEAR, "GrGr"));
    engine.process_requests(1, &mut sim, &mut fleet);

    let east_to_west = [EdgeId(2), EdgeId(7)];
    sim.add_vehicle(VehicleId(10), &east_to_west, 1.0).unwrap();
    sim.add_vehicle(VehicleId(11), &east_to_west, 1.0).unwrap();
    for _ in 0..60 {
        sim.advance().unwrap();
    }
    let east_lane = LaneId::new(EdgeId(2), 0);
    assert_eq!(sim.lane_halting_count(east_lane), 2);

    engine
        .request_reset(NEAR, 61, ResetMode::MaxOutflow, CROSSING)
        .unwrap();
    engine.process_reset_queue(61, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), None);
    assert_eq!(sim.signal_program(CROSSING).unwrap().program_id, DEFAULT_PROGRAM_ID);
    // Phase 2 is the only one giving the east approach green
    assert_eq!(sim.signal_phase_index(CROSSING).unwrap(), 2);
    assert!(fleet
        .checkpoints
        .iter()
        .any(|(_, message)| message.contains("max outflow")));
}

#[test]
fn test_failed_apply_keeps_signal_free() {
    let (mut sim, mut engine) = setup();
    let mut fleet = fleet();

    // Three indicators for a four-link signal
    engine.request_preemption(immediate(NEAR, "GGG"));
    engine.process_requests(1, &mut sim, &mut fleet);

    assert_eq!(engine.owner(CROSSING), None);
    assert_eq!(engine.snapshot(CROSSING), None);
    assert!(fleet.accepted.is_empty());
    assert_eq!(engine.stats().accepted, 0);
    assert!(engine.events().iter().any(|event| event.action == "apply_failed"));
}
