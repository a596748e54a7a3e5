//! Scenario loading and file-based runs

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use common::crossing_network;
use intervention_sim::simulation::{
    run_parallel, run_scenario, NodeId, PreemptionMode, ResetMode, RouteReportRow, Scenario, VehicleId,
    VehicleRegistry,
};

fn scenario_json() -> Value {
    json!({
        "general": { "max_steps": 400, "min_steps": 0, "seed": 3, "report": "report.jsonl" },
        "map": { "network": crossing_network() },
        "routes": [
            {
                "id": "east_west",
                "start_node": 2,
                "destination_node": 4,
                "preemption_range": 400.0,
                "is_one_way": false
            }
        ],
        "vehicles": [
            {
                "route": "east_west",
                "start_delay": 5,
                "preemption_mode": "IMMEDIATE",
                "reset_mode": "STANDARD",
                "path_finder_mode": "FASTEST",
                "path_finder_algorithm": "ALT"
            }
        ],
        "vehicle_modes": [
            { "id": 0, "preemption_mode": "NONE", "reset_mode": "STANDARD" },
            { "id": 1, "preemption_mode": "MEDIATE", "reset_mode": "MAX_OUTFLOW" }
        ]
    })
}

fn write_scenario(dir: &TempDir, scenario: &Value) -> std::path::PathBuf {
    let path = dir.path().join("scenario.json");
    fs::write(&path, serde_json::to_string_pretty(scenario).unwrap()).unwrap();
    path
}

fn read_report(path: &Path) -> Vec<RouteReportRow> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_load_resolves_paths_against_scenario_dir() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::load(&write_scenario(&dir, &scenario_json())).unwrap();

    assert_eq!(scenario.base_dir, dir.path());
    assert_eq!(scenario.general.max_steps, 400);
    assert_eq!(scenario.map.landmarks, 3);
    assert_eq!(scenario.vehicles[0].preemption_mode, PreemptionMode::Immediate);
    assert_eq!(scenario.vehicles[0].class, "emergency");
    assert_eq!(scenario.road_graph().unwrap().node_count(), 5);
}

#[test]
fn test_network_file_is_read_relative_to_scenario() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("maps")).unwrap();
    fs::write(
        dir.path().join("maps").join("crossing.json"),
        serde_json::to_string(&crossing_network()).unwrap(),
    )
    .unwrap();

    let mut value = scenario_json();
    value["map"] = json!({ "network_file": "maps/crossing.json" });
    let scenario = Scenario::load(&write_scenario(&dir, &value)).unwrap();

    let graph = scenario.road_graph().unwrap();
    assert_eq!(graph.node_count(), 5);
    assert_eq!(graph.edge_count(), 8);
}

#[test]
fn test_missing_network_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut value = scenario_json();
    value["map"] = json!({});

    let err = Scenario::load(&write_scenario(&dir, &value)).unwrap_err();
    assert!(format!("{:#}", err).contains("network"));
}

#[test]
fn test_unknown_mode_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut value = scenario_json();
    value["vehicles"][0]["preemption_mode"] = json!("TELEPORT");

    let err = Scenario::load(&write_scenario(&dir, &value)).unwrap_err();
    let message = format!("{:#}", err);
    assert!(
        message.contains("invalid preemption mode value: TELEPORT"),
        "unexpected error: {}",
        message
    );
}

#[test]
fn test_mode_names_ignore_case() {
    let dir = TempDir::new().unwrap();
    let mut value = scenario_json();
    value["vehicles"][0]["reset_mode"] = json!("max_outflow");

    let scenario = Scenario::load(&write_scenario(&dir, &value)).unwrap();
    assert_eq!(scenario.vehicles[0].reset_mode, ResetMode::MaxOutflow);
}

#[test]
fn test_unknown_route_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut value = scenario_json();
    value["vehicles"][0]["route"] = json!("nowhere");

    let err = Scenario::load(&write_scenario(&dir, &value)).unwrap_err();
    assert!(format!("{:#}", err).contains("unknown route 'nowhere'"));
}

#[test]
fn test_vehicle_mode_overrides_vehicle_settings() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::load(&write_scenario(&dir, &scenario_json())).unwrap();

    let mode = scenario.vehicle_mode(1).unwrap();
    let entries = scenario.vehicle_entries(Some(mode)).unwrap();
    assert_eq!(entries[0].profile.preemption_mode, PreemptionMode::Mediate);
    assert_eq!(entries[0].profile.reset_mode, ResetMode::MaxOutflow);
    assert_eq!(entries[0].profile.start, NodeId(2));
    assert!(!entries[0].profile.is_one_way);

    let entries = scenario.vehicle_entries(None).unwrap();
    assert_eq!(entries[0].profile.preemption_mode, PreemptionMode::Immediate);

    assert!(scenario.vehicle_mode(7).is_err());
}

#[test]
fn test_repeated_vehicles_are_staggered() {
    let dir = TempDir::new().unwrap();
    let mut value = scenario_json();
    value["vehicles"][0]["repeat"] = json!(3);
    value["vehicles"][0]["repeat_period"] = json!(10);
    let scenario = Scenario::load(&write_scenario(&dir, &value)).unwrap();

    let entry = scenario.vehicle_entries(None).unwrap().remove(0);
    let mut registry = VehicleRegistry::new(Arc::new(scenario.road_graph().unwrap()));
    let ids = registry.add_repeated(entry.profile, entry.repeat, entry.repeat_period);

    assert_eq!(ids, vec![VehicleId(0), VehicleId(1), VehicleId(2)]);
    let delays: Vec<u64> = registry.iter().map(|vehicle| vehicle.start_delay).collect();
    assert_eq!(delays, vec![5, 15, 25]);
    let names: Vec<&str> = registry.iter().map(|vehicle| vehicle.route_name.as_str()).collect();
    assert_eq!(names, vec!["east_west", "east_west_1", "east_west_2"]);
}

#[test]
fn test_round_trip_run_writes_report() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::load(&write_scenario(&dir, &scenario_json())).unwrap();

    let summary = run_scenario(&scenario, None).unwrap();

    assert_eq!(summary.label, "sim_0");
    assert_eq!(summary.vehicles, 1);
    assert_eq!(summary.finished, 1);
    assert!(summary.steps < 400, "run hit the step limit");
    // The signal is claimed and restored once in each direction
    assert_eq!(summary.arbitration.accepted, 2);
    assert_eq!(summary.arbitration.resets, 2);

    let rows = read_report(&dir.path().join("report.jsonl"));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].trip, 0);
    assert_eq!(rows[1].trip, 1);
    assert_eq!(rows[0].visited_intersections, 1);
    assert!(rows[1].start_step >= rows[0].finish_step);
    assert_eq!(rows, summary.report);
}

#[test]
fn test_parallel_runs_use_each_vehicle_mode() {
    let dir = TempDir::new().unwrap();
    let scenario = Scenario::load(&write_scenario(&dir, &scenario_json())).unwrap();

    let summaries = run_parallel(&scenario).unwrap();

    let labels: Vec<&str> = summaries.iter().map(|summary| summary.label.as_str()).collect();
    assert_eq!(labels, vec!["v_mode_0", "v_mode_1"]);
    for summary in &summaries {
        assert_eq!(summary.finished, 1);
    }
    // Mode 0 never touches a signal
    assert_eq!(summaries[0].arbitration.accepted, 0);
    assert!(summaries[0]
        .report
        .iter()
        .all(|row| row.preemption_mode == "NONE"));

    // Both runs append their two trips
    let rows = read_report(&dir.path().join("report.jsonl"));
    assert_eq!(rows.len(), 4);
}
