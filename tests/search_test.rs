//! Route search tests
//!
//! Dijkstra, ALT and A* must agree on cost; the guided searches may only
//! differ in how much of the graph they touch.

mod common;

use std::sync::Arc;

use common::{
    bypass_network, edge, graph, line_network, one_way_fan, A, B, C, D, FAN_LANDMARK, FAN_SOURCE,
    FAN_TARGET,
};
use intervention_sim::simulation::{
    alt, astar, demo_network, dijkstra, CostModel, EdgeId, FreeFlow, LandmarkHeuristic, NodeId,
    PathFinderAlgorithm, PathFinderMode, RouteQuery, RunContext, SimError, DEMO_INCIDENT, DEMO_STATION,
    EMERGENCY_CLASS,
};

const EPSILON: f64 = 1e-9;

#[test]
fn test_shortest_cost_counts_length_and_lanes() {
    let graph = graph(&line_network());
    let times = FreeFlow::new(&graph);
    let cost = CostModel::new(PathFinderMode::Shortest, &times);

    let outcome = dijkstra(&graph, RouteQuery::new(A, D, None), &cost).unwrap();

    assert_eq!(outcome.route.edges, vec![EdgeId(0), EdgeId(1), EdgeId(2)]);
    // 30 units of length plus 1/lanes for each of the three single-lane edges
    assert!((outcome.route.cost - 33.0).abs() < EPSILON);
    assert!((outcome.route.length(&graph).unwrap() - 30.0).abs() < EPSILON);
}

#[test]
fn test_all_algorithms_agree_on_line() {
    let graph = graph(&line_network());
    let times = FreeFlow::new(&graph);
    let cost = CostModel::new(PathFinderMode::Shortest, &times);
    let landmarks = LandmarkHeuristic::from_nodes(&graph, &[D]).unwrap();
    let query = RouteQuery::new(A, D, None);

    let by_dijkstra = dijkstra(&graph, query, &cost).unwrap();
    let by_alt = alt(&graph, &landmarks, query, &cost).unwrap();
    let by_astar = astar(&graph, query, &cost).unwrap();

    assert_eq!(by_dijkstra.route.edges, by_alt.route.edges);
    assert_eq!(by_dijkstra.route.edges, by_astar.route.edges);
    assert!((by_dijkstra.route.cost - by_alt.route.cost).abs() < EPSILON);
    assert!((by_dijkstra.route.cost - by_astar.route.cost).abs() < EPSILON);
}

#[test]
fn test_cost_model_changes_the_route() {
    let graph = graph(&bypass_network());
    let times = FreeFlow::new(&graph);

    // 33 along the line against 35.5 over the bypass
    let shortest = CostModel::new(PathFinderMode::Shortest, &times);
    let route = dijkstra(&graph, RouteQuery::new(A, D, None), &shortest).unwrap().route;
    assert_eq!(route.edges, vec![EdgeId(0), EdgeId(1), EdgeId(2)]);

    // The bypass has two lanes and a single edge bonus, so it is faster
    let fastest = CostModel::new(PathFinderMode::Fastest, &times);
    let route = dijkstra(&graph, RouteQuery::new(A, D, None), &fastest).unwrap().route;
    assert_eq!(route.edges, vec![EdgeId(3)]);
}

#[test]
fn test_guided_searches_match_dijkstra_on_demo_grid() {
    let graph = graph(&demo_network());
    let times = FreeFlow::new(&graph);
    let landmarks = LandmarkHeuristic::from_nodes(&graph, &[NodeId(11), NodeId(12), DEMO_INCIDENT]).unwrap();

    for mode in [
        PathFinderMode::Shortest,
        PathFinderMode::Fastest,
        PathFinderMode::FastestOnAverage,
    ] {
        let cost = CostModel::new(mode, &times);
        for (from, to) in [(DEMO_STATION, DEMO_INCIDENT), (NodeId(11), NodeId(12)), (NodeId(4), NodeId(9))] {
            let query = RouteQuery::new(from, to, Some(EMERGENCY_CLASS));
            let expected = dijkstra(&graph, query, &cost).unwrap().route.cost;

            let by_alt = alt(&graph, &landmarks, query, &cost).unwrap().route.cost;
            let by_astar = astar(&graph, query, &cost).unwrap().route.cost;
            assert!(
                (expected - by_alt).abs() < EPSILON,
                "ALT cost {} differs from {} for {:?} {} -> {}",
                by_alt,
                expected,
                mode,
                from,
                to
            );
            assert!(
                (expected - by_astar).abs() < EPSILON,
                "A* cost {} differs from {} for {:?} {} -> {}",
                by_astar,
                expected,
                mode,
                from,
                to
            );
        }
    }
}

#[test]
fn test_alt_matches_dijkstra_on_one_way_roads() {
    let graph = graph(&one_way_fan());
    let times = FreeFlow::new(&graph);
    let cost = CostModel::new(PathFinderMode::Shortest, &times);
    let landmarks = LandmarkHeuristic::from_nodes(&graph, &[FAN_LANDMARK]).unwrap();
    let query = RouteQuery::new(FAN_SOURCE, FAN_TARGET, None);

    let by_dijkstra = dijkstra(&graph, query, &cost).unwrap();
    let by_alt = alt(&graph, &landmarks, query, &cost).unwrap();
    let by_astar = astar(&graph, query, &cost).unwrap();

    // Two edges of length 1 plus the lane term for each
    assert_eq!(by_dijkstra.route.edges, vec![EdgeId(2), EdgeId(3)]);
    assert!((by_dijkstra.route.cost - 4.0).abs() < EPSILON);
    assert_eq!(by_alt.route.edges, by_dijkstra.route.edges);
    assert!((by_alt.route.cost - by_dijkstra.route.cost).abs() < EPSILON);
    assert!((by_astar.route.cost - by_dijkstra.route.cost).abs() < EPSILON);
}

#[test]
fn test_landmark_at_destination_narrows_the_search() {
    let graph = graph(&demo_network());
    let times = FreeFlow::new(&graph);
    let cost = CostModel::new(PathFinderMode::Shortest, &times);
    let landmarks = LandmarkHeuristic::from_nodes(&graph, &[DEMO_INCIDENT]).unwrap();
    let query = RouteQuery::new(DEMO_STATION, DEMO_INCIDENT, None);

    let by_dijkstra = dijkstra(&graph, query, &cost).unwrap();
    let by_alt = alt(&graph, &landmarks, query, &cost).unwrap();

    assert!((by_dijkstra.route.cost - by_alt.route.cost).abs() < EPSILON);
    assert!(
        by_alt.visited.len() < by_dijkstra.visited.len(),
        "ALT visited {} nodes, Dijkstra {}",
        by_alt.visited.len(),
        by_dijkstra.visited.len()
    );
}

#[test]
fn test_route_to_self_is_empty() {
    let graph = graph(&line_network());
    let times = FreeFlow::new(&graph);
    let cost = CostModel::new(PathFinderMode::Shortest, &times);

    let outcome = dijkstra(&graph, RouteQuery::new(B, B, None), &cost).unwrap();
    assert!(outcome.route.is_empty());
    assert_eq!(outcome.route.cost, 0.0);
}

#[test]
fn test_unreachable_destination_is_no_path() {
    let graph = graph(&line_network());
    let times = FreeFlow::new(&graph);
    let cost = CostModel::new(PathFinderMode::Shortest, &times);

    // Edges only run from A towards D
    let result = astar(&graph, RouteQuery::new(D, A, None), &cost);
    assert!(matches!(result, Err(SimError::NoPath { from, to }) if from == D && to == A));
}

#[test]
fn test_unknown_node_is_not_found() {
    let graph = graph(&line_network());
    let times = FreeFlow::new(&graph);
    let cost = CostModel::new(PathFinderMode::Shortest, &times);

    let result = dijkstra(&graph, RouteQuery::new(A, NodeId(99), None), &cost);
    assert!(matches!(result, Err(SimError::NotFound { .. })));
}

#[test]
fn test_class_restriction_blocks_edges() {
    let mut network = line_network();
    network.edges[1] = edge(1, B, C, Some(10.0), 1);
    network.edges[1].allow = vec!["bus".to_string()];
    let graph = graph(&network);
    let times = FreeFlow::new(&graph);
    let cost = CostModel::new(PathFinderMode::Shortest, &times);

    let restricted = dijkstra(&graph, RouteQuery::new(A, D, Some(EMERGENCY_CLASS)), &cost);
    assert!(matches!(restricted, Err(SimError::NoPath { .. })));

    let bus = dijkstra(&graph, RouteQuery::new(A, D, Some("bus")), &cost).unwrap();
    assert_eq!(bus.route.len(), 3);

    let unrestricted = dijkstra(&graph, RouteQuery::new(A, D, None), &cost).unwrap();
    assert_eq!(unrestricted.route.len(), 3);
}

#[test]
fn test_validator_returns_dijkstra_route() {
    let graph = graph(&demo_network());
    let context = RunContext::new(Arc::clone(&graph), 3, 42);
    let times = FreeFlow::new(&graph);

    let validated = context
        .plan_route(
            DEMO_STATION,
            DEMO_INCIDENT,
            Some(EMERGENCY_CLASS),
            PathFinderMode::Fastest,
            PathFinderAlgorithm::Validator,
            &times,
        )
        .unwrap();
    let plain = context
        .plan_route(
            DEMO_STATION,
            DEMO_INCIDENT,
            Some(EMERGENCY_CLASS),
            PathFinderMode::Fastest,
            PathFinderAlgorithm::Dijkstra,
            &times,
        )
        .unwrap();

    assert_eq!(validated, plain);
    assert!(context.landmarks_ready());
}

#[test]
fn test_plan_route_reports_missing_path() {
    let graph = graph(&line_network());
    let context = RunContext::with_defaults(Arc::clone(&graph));
    let times = FreeFlow::new(&graph);

    let result = context.plan_route(
        C,
        A,
        None,
        PathFinderMode::Shortest,
        PathFinderAlgorithm::Alt,
        &times,
    );
    assert!(matches!(result, Err(SimError::NoPath { .. })));
}
