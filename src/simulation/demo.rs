//! Built-in demo scenario
//!
//! A 3x3 grid of signalised junctions with a station and an incident site
//! hanging off opposite corners, plus some background traffic.

use std::collections::HashMap;
use std::f64::consts::TAU;

use super::road_network::{EdgeDescription, NetworkDescription, NodeDescription, SignalDescription};
use super::scenario::{
    BackgroundTrip, GeneralSettings, MapSettings, RouteSettings, Scenario, VehicleMode, VehicleSettings,
};
use super::settings::{PathFinderAlgorithm, PathFinderMode, PlannerConfig, PreemptionMode, ResetMode};
use super::signal::{ControlledLink, Phase};
use super::types::{EdgeId, LaneId, NodeId, SignalId, EMERGENCY_CLASS};
use super::landmarks::DEFAULT_LANDMARK_COUNT;

/// Distance between neighbouring grid junctions
pub const DEMO_SPACING: f64 = 250.0;

/// Node the intervention vehicles start from
pub const DEMO_STATION: NodeId = NodeId(9);

/// Node the intervention vehicles drive to
pub const DEMO_INCIDENT: NodeId = NodeId(10);

const DEMO_SPEED: f64 = 13.89;
const GREEN_DURATION: f64 = 30.0;
const YELLOW_DURATION: f64 = 3.0;

#[derive(Default)]
struct NetworkBuilder {
    network: NetworkDescription,
    positions: HashMap<NodeId, (f64, f64)>,
    next_edge: usize,
}

impl NetworkBuilder {
    fn add_node(&mut self, id: NodeId, x: f64, y: f64) {
        self.positions.insert(id, (x, y));
        self.network.nodes.push(NodeDescription { id, x, y });
    }

    fn add_road(&mut self, from: NodeId, to: NodeId) {
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.network.edges.push(EdgeDescription {
            id,
            from,
            to,
            length: None,
            lanes: 1,
            speed: DEMO_SPEED,
            allow: Vec::new(),
            reverse: None,
        });
    }

    fn add_two_way_road(&mut self, a: NodeId, b: NodeId) {
        self.add_road(a, b);
        self.add_road(b, a);
    }

    /// Unit vector from `from` to `to`
    fn direction(&self, from: NodeId, to: NodeId) -> (f64, f64) {
        let (ax, ay) = self.positions.get(&from).copied().unwrap_or_default();
        let (bx, by) = self.positions.get(&to).copied().unwrap_or_default();
        let (dx, dy) = (bx - ax, by - ay);
        let length = (dx * dx + dy * dy).sqrt().max(f64::EPSILON);
        (dx / length, dy / length)
    }

    /// Two-phase signal (north-south, then east-west) with yellow in between.
    ///
    /// Links are grouped by approach, clockwise from north; within an
    /// approach right turns come first and left turns last.
    fn add_signal(&mut self, id: SignalId, node: NodeId) {
        let mut incoming: Vec<&EdgeDescription> = self.network.edges.iter().filter(|edge| edge.to == node).collect();
        let outgoing: Vec<&EdgeDescription> = self.network.edges.iter().filter(|edge| edge.from == node).collect();

        // Bearing of the approach's origin as seen from the junction, 0 at north
        let bearing = |edge: &EdgeDescription| {
            let (dx, dy) = self.direction(node, edge.from);
            dx.atan2(dy).rem_euclid(TAU)
        };
        incoming.sort_by(|a, b| bearing(*a).total_cmp(&bearing(*b)));

        let mut links = Vec::new();
        let mut north_south = String::new();
        for in_edge in incoming {
            let heading = self.direction(in_edge.from, node);
            let mut turns: Vec<(f64, EdgeId)> = outgoing
                .iter()
                .filter(|out_edge| out_edge.to != in_edge.from)
                .map(|out_edge| {
                    let exit = self.direction(node, out_edge.to);
                    let cross = heading.0 * exit.1 - heading.1 * exit.0;
                    let dot = heading.0 * exit.0 + heading.1 * exit.1;
                    (cross.atan2(dot), out_edge.id)
                })
                .collect();
            turns.sort_by(|a, b| a.0.total_cmp(&b.0));

            let vertical = heading.1.abs() > heading.0.abs();
            for (angle, out_edge) in turns {
                links.push(ControlledLink {
                    from: LaneId::new(in_edge.id, 0),
                    to: LaneId::new(out_edge, 0),
                });
                let left_turn = angle > 0.5;
                north_south.push(match (vertical, left_turn) {
                    (true, false) => 'G',
                    (true, true) => 'g',
                    (false, _) => 'r',
                });
            }
        }

        let swap = |indicator: char| if indicator == 'r' { 'G' } else { 'r' };
        let east_west: String = north_south.chars().map(swap).collect();
        let yellow = |state: &str| -> String {
            state
                .chars()
                .map(|indicator| if indicator == 'r' { 'r' } else { 'y' })
                .collect()
        };

        let phases = vec![
            Phase::new(north_south.clone(), GREEN_DURATION),
            Phase::new(yellow(&north_south), YELLOW_DURATION),
            Phase::new(east_west.clone(), GREEN_DURATION),
            Phase::new(yellow(&east_west), YELLOW_DURATION),
        ];
        self.network.signals.push(SignalDescription { id, node, links, phases });
    }
}

/// The grid network. Node `row * 3 + col` is a junction; nodes 9 to 12 are
/// dead ends off the corners.
pub fn demo_network() -> NetworkDescription {
    let mut builder = NetworkBuilder::default();

    let mut grid = [[NodeId(0); 3]; 3];
    for (row, nodes) in grid.iter_mut().enumerate() {
        for (col, node) in nodes.iter_mut().enumerate() {
            *node = NodeId(row * 3 + col);
            builder.add_node(
                *node,
                (col as f64 - 1.0) * DEMO_SPACING,
                (1.0 - row as f64) * DEMO_SPACING,
            );
        }
    }

    // Connect grid horizontally
    for row in grid {
        for col in 0..2 {
            builder.add_two_way_road(row[col], row[col + 1]);
        }
    }

    // Connect grid vertically
    for row in 0..2 {
        for col in 0..3 {
            builder.add_two_way_road(grid[row][col], grid[row + 1][col]);
        }
    }

    let offshoots = [
        (grid[0][0], DEMO_STATION, -1.6, 1.6),
        (grid[2][2], DEMO_INCIDENT, 1.6, -1.6),
        (grid[0][2], NodeId(11), 1.6, 1.6),
        (grid[2][0], NodeId(12), -1.6, -1.6),
    ];
    for (junction, dead_end, x, y) in offshoots {
        builder.add_node(dead_end, x * DEMO_SPACING, y * DEMO_SPACING);
        builder.add_two_way_road(junction, dead_end);
    }

    for row in grid {
        for node in row {
            builder.add_signal(SignalId(node.0), node);
        }
    }

    builder.network
}

fn demo_vehicle(
    route: &str,
    start_delay: u64,
    preemption_mode: PreemptionMode,
    path_finder_algorithm: PathFinderAlgorithm,
) -> VehicleSettings {
    VehicleSettings {
        route: route.to_string(),
        start_delay,
        preemption_mode,
        reset_mode: ResetMode::Standard,
        path_finder_mode: PathFinderMode::Fastest,
        path_finder_algorithm,
        repeat: None,
        repeat_period: 0,
        class: EMERGENCY_CLASS.to_string(),
    }
}

/// Two intervention vehicles crossing the grid in opposite directions, one
/// of them on a round trip, with background traffic on every diagonal
pub fn demo_scenario() -> Scenario {
    let routes = vec![
        RouteSettings {
            id: "station_to_incident".to_string(),
            start_node: DEMO_STATION,
            destination_node: DEMO_INCIDENT,
            preemption_range: 400.0,
            is_one_way: false,
        },
        RouteSettings {
            id: "cross_town".to_string(),
            start_node: NodeId(11),
            destination_node: NodeId(12),
            preemption_range: 400.0,
            is_one_way: true,
        },
    ];

    let vehicles = vec![
        demo_vehicle("station_to_incident", 10, PreemptionMode::Immediate, PathFinderAlgorithm::Alt),
        demo_vehicle(
            "cross_town",
            15,
            PreemptionMode::ImmediateWithMinimalBlockage,
            PathFinderAlgorithm::AStar,
        ),
    ];

    let vehicle_modes = [
        (PreemptionMode::None, ResetMode::Standard),
        (PreemptionMode::Immediate, ResetMode::Standard),
        (PreemptionMode::ImmediateWithMinimalBlockage, ResetMode::MaxOutflow),
        (PreemptionMode::Mediate, ResetMode::Standard),
    ]
    .into_iter()
    .enumerate()
    .map(|(id, (preemption_mode, reset_mode))| VehicleMode {
        id,
        preemption_mode,
        reset_mode,
    })
    .collect();

    let corners = [NodeId(0), NodeId(2), NodeId(8), NodeId(6)];
    let background_trips = corners
        .iter()
        .zip(corners.iter().cycle().skip(2))
        .map(|(from, to)| BackgroundTrip {
            from: *from,
            to: *to,
            depart: 0,
            count: 20,
            period: 8,
        })
        .collect();

    Scenario {
        general: GeneralSettings {
            max_steps: 1500,
            min_steps: 100,
            ..GeneralSettings::default()
        },
        map: MapSettings {
            network_file: None,
            network: Some(demo_network()),
            landmarks: DEFAULT_LANDMARK_COUNT,
            occupancy: HashMap::new(),
        },
        planner: PlannerConfig::default(),
        routes,
        vehicles,
        vehicle_modes,
        background_trips,
        base_dir: Default::default(),
    }
}
