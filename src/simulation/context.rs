//! Per-run shared state
//!
//! One `RunContext` is built per simulation run and handed to everything
//! that needs the road graph or the landmark tables. Parallel runs each own
//! their own context.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use super::error::SimResult;
use super::landmarks::{LandmarkHeuristic, DEFAULT_LANDMARK_COUNT};
use super::road_network::RoadGraph;
use super::search::{self, CostModel, Route, RouteQuery, SearchOutcome};
use super::settings::{PathFinderAlgorithm, PathFinderMode};
use super::simulator::TravelTimes;
use super::types::NodeId;

/// Relative cost difference above which the validator reports a disagreement
const VALIDATOR_TOLERANCE: f64 = 1e-6;

pub struct RunContext {
    graph: Arc<RoadGraph>,
    landmark_count: usize,
    seed: u64,
    landmarks: OnceLock<LandmarkHeuristic>,
}

impl RunContext {
    pub fn new(graph: Arc<RoadGraph>, landmark_count: usize, seed: u64) -> Self {
        Self {
            graph,
            landmark_count,
            seed,
            landmarks: OnceLock::new(),
        }
    }

    pub fn with_defaults(graph: Arc<RoadGraph>) -> Self {
        Self::new(graph, DEFAULT_LANDMARK_COUNT, 0)
    }

    /// Context whose landmark tables are already computed
    pub fn with_landmarks(graph: Arc<RoadGraph>, landmarks: LandmarkHeuristic) -> Self {
        let count = landmarks.landmarks().len();
        Self {
            graph,
            landmark_count: count,
            seed: 0,
            landmarks: OnceLock::from(landmarks),
        }
    }

    pub fn graph(&self) -> &Arc<RoadGraph> {
        &self.graph
    }

    /// Landmark tables, computed on first use and shared afterwards
    pub fn landmarks(&self) -> &LandmarkHeuristic {
        self.landmarks.get_or_init(|| {
            let mut rng = StdRng::seed_from_u64(self.seed);
            LandmarkHeuristic::precompute(&self.graph, self.landmark_count, &mut rng)
        })
    }

    pub fn landmarks_ready(&self) -> bool {
        self.landmarks.get().is_some()
    }

    /// Computes a route between two nodes with the given strategy
    pub fn plan_route(
        &self,
        from: NodeId,
        to: NodeId,
        class: Option<&str>,
        mode: PathFinderMode,
        algorithm: PathFinderAlgorithm,
        times: &dyn TravelTimes,
    ) -> SimResult<Route> {
        let query = RouteQuery::new(from, to, class);
        let cost = CostModel::new(mode, times);

        let outcome = match algorithm {
            PathFinderAlgorithm::Validator => return self.validate(query, &cost),
            PathFinderAlgorithm::Dijkstra => self.timed(algorithm, || {
                search::dijkstra(&self.graph, query, &cost)
            })?,
            PathFinderAlgorithm::Alt => {
                let landmarks = self.landmarks();
                self.timed(algorithm, || {
                    search::alt(&self.graph, landmarks, query, &cost)
                })?
            }
            PathFinderAlgorithm::AStar => self.timed(algorithm, || {
                search::astar(&self.graph, query, &cost)
            })?,
        };
        Ok(outcome.route)
    }

    fn timed(
        &self,
        algorithm: PathFinderAlgorithm,
        run: impl FnOnce() -> SimResult<SearchOutcome>,
    ) -> SimResult<SearchOutcome> {
        let start = Instant::now();
        let outcome = run()?;
        debug!(
            "{} route search took {:.2} ms, {} edges, {} nodes examined",
            algorithm,
            start.elapsed().as_secs_f64() * 1000.0,
            outcome.route.len(),
            outcome.visited.len()
        );
        Ok(outcome)
    }

    /// Runs every strategy, reports how they compare and returns the
    /// Dijkstra route
    fn validate(&self, query: RouteQuery<'_>, cost: &CostModel<'_>) -> SimResult<Route> {
        let landmarks = self.landmarks();
        let baseline = self.timed(PathFinderAlgorithm::Dijkstra, || {
            search::dijkstra(&self.graph, query, cost)
        })?;
        let guided = [
            (
                PathFinderAlgorithm::Alt,
                self.timed(PathFinderAlgorithm::Alt, || {
                    search::alt(&self.graph, landmarks, query, cost)
                }),
            ),
            (
                PathFinderAlgorithm::AStar,
                self.timed(PathFinderAlgorithm::AStar, || {
                    search::astar(&self.graph, query, cost)
                }),
            ),
        ];

        info!(
            "{}: cost {:.3}, {} edges, {} nodes examined",
            PathFinderAlgorithm::Dijkstra,
            baseline.route.cost,
            baseline.route.len(),
            baseline.visited.len()
        );
        for (algorithm, result) in guided {
            match result {
                Ok(outcome) => {
                    info!(
                        "{}: cost {:.3}, {} edges, {} nodes examined",
                        algorithm,
                        outcome.route.cost,
                        outcome.route.len(),
                        outcome.visited.len()
                    );
                    let difference = (outcome.route.cost - baseline.route.cost).abs();
                    if difference > VALIDATOR_TOLERANCE * baseline.route.cost.max(1.0) {
                        warn!(
                            "{} route from {} to {} costs {:.3}, {} found {:.3}",
                            algorithm,
                            query.from,
                            query.to,
                            outcome.route.cost,
                            PathFinderAlgorithm::Dijkstra,
                            baseline.route.cost
                        );
                    }
                }
                Err(e) => warn!("{} failed: {}", algorithm, e),
            }
        }

        Ok(baseline.route)
    }
}
