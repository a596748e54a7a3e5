//! Simulation driver
//!
//! Owns one simulator, one arbitration engine and one vehicle registry and
//! drives them tick by tick. Independent runs (one per vehicle mode) can be
//! executed side by side; they share nothing but the report file.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use super::arbitration::{ArbitrationEngine, ArbitrationStats};
use super::context::RunContext;
use super::error::SimResult;
use super::micro_sim::MicroSim;
use super::planner::PreemptionPlanner;
use super::registry::VehicleRegistry;
use super::road_network::{NetworkDescription, RoadGraph};
use super::scenario::{GeneralSettings, Scenario, VehicleMode};
use super::settings::{PathFinderAlgorithm, PathFinderMode, PlannerConfig};
use super::simulator::{FreeFlow, TrafficSimulator};
use super::stats::RouteReportRow;
use super::types::{Step, VehicleId};

/// Intervention vehicles drive this much faster than the speed limit
pub const INTERVENTION_SPEED_FACTOR: f64 = 1.5;

/// Steps a vehicle waits at its destination before the return trip
pub const RETURN_TRIP_DELAY: Step = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSettings {
    pub max_steps: Step,
    pub min_steps: Step,
    pub max_num_vehicles: Option<usize>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from(&GeneralSettings::default())
    }
}

impl From<&GeneralSettings> for RunSettings {
    fn from(general: &GeneralSettings) -> Self {
        Self {
            max_steps: general.max_steps,
            min_steps: general.min_steps,
            max_num_vehicles: general.max_num_vehicles,
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub label: String,
    pub steps: Step,
    pub vehicles: usize,
    pub finished: usize,
    pub arbitration: ArbitrationStats,
    pub report: Vec<RouteReportRow>,
}

impl RunSummary {
    pub fn log(&self) {
        info!("=== SIMULATION COMPLETE ===");
        info!("Run: {}", self.label);
        info!("Steps run: {}", self.steps);
        info!("Intervention vehicles: {}", self.vehicles);
        info!("Vehicles finished: {}", self.finished);
        info!("Preemptions accepted: {}", self.arbitration.accepted);
        info!("Preemptions rejected: {}", self.arbitration.rejected);
        info!("Preemptions postponed: {}", self.arbitration.postponed);
        info!("Resets applied: {}", self.arbitration.resets);
        info!("Resets dropped: {}", self.arbitration.dropped_resets);
        if !self.report.is_empty() {
            let total: Step = self.report.iter().map(|row| row.duration).sum();
            info!(
                "Average trip duration: {:.1} steps",
                total as f64 / self.report.len() as f64
            );
        }
    }
}

pub struct SimulationRunner<S: TrafficSimulator> {
    label: String,
    context: RunContext,
    sim: S,
    engine: ArbitrationEngine,
    registry: VehicleRegistry,
    planner: PreemptionPlanner,
    /// Step at which each waiting vehicle enters the network
    insertion_queue: BTreeMap<VehicleId, Step>,
    settings: RunSettings,
}

impl<S: TrafficSimulator> SimulationRunner<S> {
    /// Captures the default signal programs and plans every vehicle's route.
    ///
    /// Fails when any route cannot be computed.
    pub fn new(
        label: impl Into<String>,
        context: RunContext,
        sim: S,
        mut registry: VehicleRegistry,
        planner_config: PlannerConfig,
        settings: RunSettings,
    ) -> SimResult<Self> {
        let engine = ArbitrationEngine::from_simulator(&sim)?;
        let step = sim.current_step();

        let mut insertion_queue = BTreeMap::new();
        for id in registry.ids() {
            let vehicle = registry.get_mut(id)?;
            let route = context.plan_route(
                vehicle.start,
                vehicle.destination,
                Some(vehicle.class.as_str()),
                vehicle.path_finder_mode,
                vehicle.path_finder_algorithm,
                &sim,
            )?;
            vehicle.set_route(route, context.graph(), step)?;
            insertion_queue.insert(id, vehicle.start_delay);
        }

        let planner = PreemptionPlanner::new(Arc::clone(context.graph()), planner_config);
        Ok(Self {
            label: label.into(),
            context,
            sim,
            engine,
            registry,
            planner,
            insertion_queue,
            settings,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }

    pub fn engine(&self) -> &ArbitrationEngine {
        &self.engine
    }

    pub fn registry(&self) -> &VehicleRegistry {
        &self.registry
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    fn should_continue(&self) -> bool {
        let step = self.sim.current_step();
        step < self.settings.max_steps
            && (self.sim.min_expected_vehicles() > 0 || !self.insertion_queue.is_empty())
            && (step <= self.settings.min_steps || !self.registry.all_finished())
    }

    /// Runs until the network empties, every vehicle finished or the step
    /// limit is reached
    pub fn run(&mut self) -> SimResult<RunSummary> {
        while self.should_continue() {
            self.tick()?;
        }
        Ok(self.summary())
    }

    /// Advances the simulator by one step and does all per-step work
    pub fn tick(&mut self) -> SimResult<Step> {
        self.sim.advance()?;
        let step = self.sim.current_step();

        self.limit_background_vehicles();
        self.insert_vehicles(step);
        self.handle_arrivals(step);

        self.engine
            .process_reset_queue(step, &mut self.sim, &mut self.registry);
        self.engine
            .process_requests(step, &mut self.sim, &mut self.registry);
        self.engine.process_pending_mediate_requests(step);

        self.registry.sync_positions(&self.sim);
        for id in self.registry.active_ids() {
            let vehicle = self.registry.get_mut(id)?;
            self.planner
                .evaluate_tick(vehicle, step, &self.sim, &mut self.engine);
        }

        self.registry.record_speeds(&self.sim);
        Ok(step)
    }

    /// Removes background vehicles that just departed into a full network
    fn limit_background_vehicles(&mut self) {
        let Some(limit) = self.settings.max_num_vehicles else {
            return;
        };
        if self.sim.vehicle_count() <= limit {
            return;
        }
        let departed: Vec<VehicleId> = self
            .sim
            .departed_vehicles()
            .iter()
            .copied()
            .filter(|id| !self.registry.contains(*id))
            .collect();
        for id in departed {
            if let Err(e) = self.sim.remove_vehicle(id) {
                debug!("Could not remove {}: {}", id, e);
            }
        }
    }

    fn insert_vehicles(&mut self, step: Step) {
        let due: Vec<VehicleId> = self
            .insertion_queue
            .iter()
            .filter(|(_, insert_at)| **insert_at <= step)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            self.insertion_queue.remove(&id);
            let Ok(vehicle) = self.registry.get_mut(id) else {
                continue;
            };
            if let Err(e) = self
                .sim
                .add_vehicle(id, vehicle.route(), INTERVENTION_SPEED_FACTOR)
            {
                error!("Failed to insert {} on route {}: {}", id, vehicle.route_name, e);
                vehicle.is_finished = true;
                continue;
            }

            vehicle.stats.add_checkpoint("Vehicle added into simulation.", step);
            vehicle.stats.add_start_finish_checkpoint(step);
            vehicle.is_active = true;
            self.planner
                .post_insert(vehicle, step, &self.sim, &mut self.engine);
        }
    }

    fn handle_arrivals(&mut self, step: Step) {
        let arrived: Vec<VehicleId> = self.sim.arrived_vehicles().to_vec();
        for id in arrived {
            let Ok(vehicle) = self.registry.get_mut(id) else {
                continue;
            };
            vehicle.stats.add_checkpoint("Vehicle reached destination.", step);
            vehicle.stats.add_start_finish_checkpoint(step);
            vehicle.is_active = false;
            vehicle.is_finished = vehicle.is_one_way;
            if vehicle.is_one_way {
                info!("{} on route {} finished at step {}", id, vehicle.route_name, step);
                continue;
            }

            // The return trip is the last one
            vehicle.is_one_way = true;
            vehicle.switch_destination();
            let route = self.context.plan_route(
                vehicle.start,
                vehicle.destination,
                Some(vehicle.class.as_str()),
                vehicle.path_finder_mode,
                vehicle.path_finder_algorithm,
                &self.sim,
            );
            let installed = route.and_then(|route| vehicle.set_route(route, self.context.graph(), step));
            if let Err(e) = installed {
                error!("No return route for {} on route {}: {}", id, vehicle.route_name, e);
                vehicle.is_finished = true;
                continue;
            }

            self.insertion_queue.insert(id, step + RETURN_TRIP_DELAY);
            vehicle.stats.add_wait_gap(RETURN_TRIP_DELAY as usize);
            vehicle
                .stats
                .add_checkpoint("Vehicle added into insertion queue.", step);
        }
    }

    /// One row per completed trip of every vehicle
    pub fn report_rows(&self) -> Vec<RouteReportRow> {
        let mut rows = Vec::new();
        for vehicle in self.registry.iter() {
            for (trip, (start, finish)) in vehicle.stats.trips().into_iter().enumerate() {
                let visited = vehicle
                    .stats
                    .visited_intersections
                    .iter()
                    .filter(|visit| visit.step >= start && visit.step <= finish)
                    .count();
                rows.push(RouteReportRow {
                    vehicle: vehicle.id,
                    route: vehicle.route_name.clone(),
                    preemption_mode: vehicle.preemption_mode.name().to_string(),
                    reset_mode: vehicle.reset_mode.name().to_string(),
                    trip,
                    start_step: start,
                    finish_step: finish,
                    duration: finish.saturating_sub(start),
                    visited_intersections: visited,
                    waiting_steps: vehicle.stats.waiting_steps,
                    average_speed: vehicle.stats.average_speed(),
                });
            }
        }
        rows
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            label: self.label.clone(),
            steps: self.sim.current_step(),
            vehicles: self.registry.len(),
            finished: self.registry.finished_count(),
            arbitration: self.engine.stats(),
            report: self.report_rows(),
        }
    }
}

/// Builds a run of `scenario` on the built-in simulator, with every
/// vehicle's modes replaced by `mode` when given
pub fn build_run(
    scenario: &Scenario,
    network: &NetworkDescription,
    graph: Arc<RoadGraph>,
    mode: Option<VehicleMode>,
    label: impl Into<String>,
) -> Result<SimulationRunner<MicroSim>> {
    let mut sim = MicroSim::new(Arc::clone(&graph), &network.signals).context("Failed to set up simulator")?;
    let context = RunContext::new(Arc::clone(&graph), scenario.map.landmarks, scenario.general.seed);

    let mut registry = VehicleRegistry::new(Arc::clone(&graph));
    for entry in scenario.vehicle_entries(mode)? {
        registry.add_repeated(entry.profile, entry.repeat, entry.repeat_period);
    }

    let free_flow = FreeFlow::new(&graph);
    for trip in &scenario.background_trips {
        let route = context
            .plan_route(
                trip.from,
                trip.to,
                None,
                PathFinderMode::Shortest,
                PathFinderAlgorithm::Dijkstra,
                &free_flow,
            )
            .with_context(|| format!("No background route from {} to {}", trip.from, trip.to))?;
        for copy in 0..trip.count {
            sim.schedule_trip(trip.depart + trip.period * copy as Step, route.edges.clone())?;
        }
    }

    let runner = SimulationRunner::new(
        label,
        context,
        sim,
        registry,
        scenario.planner.clone(),
        RunSettings::from(&scenario.general),
    )
    .context("Failed to prepare vehicles")?;
    Ok(runner)
}

/// Runs `scenario` once and writes its report when one is configured
pub fn run_scenario(scenario: &Scenario, mode: Option<VehicleMode>) -> Result<RunSummary> {
    let network = scenario.network()?;
    let graph = Arc::new(
        RoadGraph::from_description(&network, &scenario.map.occupancy).context("Failed to build road graph")?,
    );
    let label = run_label(mode);

    let mut runner = build_run(scenario, &network, graph, mode, label)?;
    let summary = runner.run().context("Simulation failed")?;
    summary.log();

    if let Some(path) = &scenario.general.report {
        write_report(&scenario.base_dir.join(path), &summary.report, &Mutex::new(()))?;
    }
    Ok(summary)
}

/// Runs one isolated simulation per vehicle mode, each on its own thread.
///
/// Only the report write at the end of each run is serialised.
pub fn run_parallel(scenario: &Scenario) -> Result<Vec<RunSummary>> {
    if scenario.vehicle_modes.is_empty() {
        warn!("Parallel run requested but no vehicle modes are defined");
        return Ok(Vec::new());
    }

    let network = scenario.network()?;
    let graph = Arc::new(
        RoadGraph::from_description(&network, &scenario.map.occupancy).context("Failed to build road graph")?,
    );
    let report_lock = Mutex::new(());

    let results: Vec<Result<RunSummary>> = thread::scope(|scope| {
        let handles: Vec<_> = scenario
            .vehicle_modes
            .iter()
            .map(|mode| {
                let graph = Arc::clone(&graph);
                let network = &network;
                let report_lock = &report_lock;
                scope.spawn(move || -> Result<RunSummary> {
                    let mut runner = build_run(scenario, network, graph, Some(*mode), run_label(Some(*mode)))?;
                    let summary = runner.run().context("Simulation failed")?;
                    summary.log();
                    if let Some(path) = &scenario.general.report {
                        write_report(&scenario.base_dir.join(path), &summary.report, report_lock)?;
                    }
                    Ok(summary)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("Simulation thread panicked")),
            })
            .collect()
    });

    results.into_iter().collect()
}

fn run_label(mode: Option<VehicleMode>) -> String {
    match mode {
        Some(mode) => format!("v_mode_{}", mode.id),
        None => "sim_0".to_string(),
    }
}

/// Appends `rows` to `path` as JSON lines
pub fn write_report(path: &Path, rows: &[RouteReportRow], lock: &Mutex<()>) -> Result<()> {
    let _guard = lock
        .lock()
        .map_err(|_| anyhow::anyhow!("Report lock poisoned"))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open report {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row).context("Failed to serialize report row")?;
        writeln!(writer).context("Failed to write report")?;
    }
    writer.flush().context("Failed to write report")?;
    info!("Wrote {} report rows to {}", rows.len(), path.display());
    Ok(())
}
