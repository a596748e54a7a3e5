use std::process::Command;

use intervention_sim::simulation::{
    build_run, demo_network, demo_scenario, run_scenario, PreemptionMode, ResetMode,
    TrafficSimulator, VehicleMode, DEMO_STATION,
};

fn run_binary(args: &[&str]) -> (bool, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_intervention_sim"))
        .args(args)
        .env("RUST_LOG", "warn,intervention_sim=info")
        .output()
        .expect("Failed to execute simulation");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

/// Test that the demo runs from the command line without crashing
#[test]
fn test_demo_runs_from_command_line() {
    let (success, stderr) = run_binary(&["--max-steps", "600"]);

    assert!(success, "Simulation failed to run. stderr: {}", stderr);
    assert!(
        stderr.contains("SIMULATION COMPLETE"),
        "Simulation did not complete properly. stderr: {}",
        stderr
    );
}

/// Test that run statistics are logged
#[test]
fn test_run_statistics_logged() {
    let (success, stderr) = run_binary(&["--max-steps", "600", "--vehicle-mode", "1"]);

    assert!(success, "Simulation failed to run. stderr: {}", stderr);
    for statistic in [
        "Run: v_mode_1",
        "Steps run:",
        "Intervention vehicles:",
        "Vehicles finished:",
        "Preemptions accepted:",
        "Resets applied:",
    ] {
        assert!(stderr.contains(statistic), "Missing '{}' statistic", statistic);
    }
}

/// Test that an undefined vehicle mode is reported as an error
#[test]
fn test_unknown_vehicle_mode_fails() {
    let (success, stderr) = run_binary(&["--vehicle-mode", "42"]);

    assert!(!success);
    assert!(stderr.contains("Vehicle mode 42 is not defined"), "stderr: {}", stderr);
}

/// Test that every intervention vehicle finishes, including the return trip
#[test]
fn test_demo_vehicles_finish() {
    let summary = run_scenario(&demo_scenario(), None).unwrap();

    assert_eq!(summary.vehicles, 2);
    assert_eq!(summary.finished, summary.vehicles);
    assert!(summary.steps < demo_scenario().general.max_steps);

    // One round trip and one one-way trip
    assert_eq!(summary.report.len(), 3);
    let round_trips = summary
        .report
        .iter()
        .filter(|row| row.route == "station_to_incident")
        .count();
    assert_eq!(round_trips, 2);

    assert!(summary.arbitration.accepted > 0);
    assert!(summary.arbitration.resets > 0);
}

/// Test that passive vehicles leave the signals alone
#[test]
fn test_passive_mode_never_preempts() {
    let scenario = demo_scenario();
    let passive = VehicleMode {
        id: 0,
        preemption_mode: PreemptionMode::None,
        reset_mode: ResetMode::Standard,
    };

    let summary = run_scenario(&scenario, Some(passive)).unwrap();

    assert_eq!(summary.arbitration.accepted, 0);
    assert_eq!(summary.arbitration.resets, 0);
    assert_eq!(summary.finished, summary.vehicles);
}

/// Test that the runner keeps going while a vehicle waits for its return trip
#[test]
fn test_runner_step_by_step() {
    let scenario = demo_scenario();
    let network = demo_network();
    let graph = std::sync::Arc::new(scenario.road_graph().unwrap());
    let mut runner = build_run(&scenario, &network, graph, None, "stepwise").unwrap();

    let station_vehicle = runner
        .registry()
        .iter()
        .find(|vehicle| vehicle.start == DEMO_STATION)
        .map(|vehicle| vehicle.id)
        .unwrap();

    let mut max_owned = 0;
    while runner.sim().current_step() < 1500 {
        runner.tick().unwrap();
        max_owned = max_owned.max(runner.engine().preempted_signals().count());

        let vehicle = runner.registry().get(station_vehicle).unwrap();
        if vehicle.is_finished {
            break;
        }
    }

    let vehicle = runner.registry().get(station_vehicle).unwrap();
    assert!(vehicle.is_finished);
    assert!(vehicle.is_one_way);
    // Back at the station after the return trip
    assert_eq!(vehicle.destination, DEMO_STATION);
    assert_eq!(vehicle.stats.trips().len(), 2);
    assert!(vehicle
        .stats
        .checkpoints
        .iter()
        .any(|checkpoint| checkpoint.description == "Vehicle added into insertion queue."));
    assert!(max_owned > 0);
}
