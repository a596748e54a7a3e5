//! Per-vehicle preemption planning
//!
//! Called once per tick for every active vehicle. The planner never touches
//! signals itself: it reads the simulator and files requests with the
//! arbitration engine.

use log::{debug, error};
use std::sync::Arc;

use super::arbitration::ArbitrationEngine;
use super::conflicts::{self, Approach};
use super::error::{SimError, SimResult};
use super::request::PreemptionRequest;
use super::road_network::RoadGraph;
use super::settings::{PlannerConfig, PreemptionMode};
use super::signal::{PhaseOverride, SignalProgram};
use super::simulator::{TrafficSimulator, UpcomingSignal};
use super::types::{SignalId, Step};
use super::vehicle::InterventionVehicle;

/// Durations for a mediated rewrite of `program`.
///
/// Stretches or shrinks the phases between `current` and `target` so the
/// target phase starts when the vehicle arrives `eta` steps from now, then
/// replaces the target phase with `target_state`. If the signal already
/// shows the target phase and the vehicle is close, only that phase is
/// extended. Returns the reason when the required scale is out of bounds.
pub fn plan_phase_rewrite(
    program: &SignalProgram,
    current: usize,
    target: usize,
    eta: Option<f64>,
    target_state: &str,
    config: &PlannerConfig,
) -> Result<Vec<PhaseOverride>, String> {
    let phases = &program.phases;
    if current >= phases.len() || target >= phases.len() {
        return Err(format!(
            "phase index out of range (current {}, target {}, {} phases)",
            current,
            target,
            phases.len()
        ));
    }

    if current == target {
        if let Some(eta) = eta.filter(|eta| *eta < config.on_target_eta) {
            return Ok(vec![PhaseOverride::replace(
                target,
                target_state,
                eta + config.on_target_margin,
            )]);
        }
    }

    let pending: Vec<usize> = if current >= target {
        (current..phases.len()).chain(0..target).collect()
    } else {
        (current..target).collect()
    };
    let needed: f64 = pending.iter().map(|index| phases[*index].duration).sum();

    let eta = eta.ok_or_else(|| "ETA is not available".to_string())?;
    if needed <= 0.0 {
        return Err("no phase time left before the target phase".to_string());
    }

    let scale = eta / needed;
    if scale > config.max_scale {
        return Err(format!(
            "scale {:.2} above {} for cycle duration {:.1}",
            scale,
            config.max_scale,
            program.cycle_duration()
        ));
    }
    if scale < config.min_scale {
        return Err(format!(
            "scale {:.2} below {} (eta {:.1}, needed {:.1})",
            scale, config.min_scale, eta, needed
        ));
    }

    let mut overrides: Vec<PhaseOverride> = pending
        .iter()
        .map(|index| {
            let phase = &phases[*index];
            let scaled = phase.duration * scale;
            let duration = if phase.has_green() {
                scaled.clamp(config.green_min_duration, config.green_max_duration)
            } else {
                scaled.clamp(config.other_min_duration, config.other_max_duration)
            };
            PhaseOverride::duration(*index, duration)
        })
        .collect();
    overrides.push(PhaseOverride::replace(
        target,
        target_state,
        config.target_phase_duration,
    ));
    Ok(overrides)
}

/// Signal data a planning step needs, read once from the simulator
struct SignalView {
    signal: SignalId,
    approach: Approach,
    controlled_lanes: Vec<super::types::LaneId>,
    links: Vec<super::signal::ControlledLink>,
}

pub struct PreemptionPlanner {
    graph: Arc<RoadGraph>,
    config: PlannerConfig,
}

impl PreemptionPlanner {
    pub fn new(graph: Arc<RoadGraph>, config: PlannerConfig) -> Self {
        Self { graph, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Advances the vehicle along its route, schedules resets for the signals
    /// it passed and plans preemption of the signals ahead.
    ///
    /// Planning failures are logged and never abort the tick.
    pub fn evaluate_tick(
        &self,
        vehicle: &mut InterventionVehicle,
        step: Step,
        sim: &dyn TrafficSimulator,
        engine: &mut ArbitrationEngine,
    ) {
        if let Some(edge) = sim.vehicle_edge(vehicle.id) {
            for signal in vehicle.advance_to(edge) {
                if vehicle.preemption_mode != PreemptionMode::None {
                    let reset_step = step + self.config.reset_delay;
                    if let Err(e) = engine.request_reset(vehicle.id, reset_step, vehicle.reset_mode, signal) {
                        debug!("{}: no reset for {}: {}", vehicle.id, signal, e);
                    }
                }
                vehicle.stats.add_visited_intersection(signal, step);
            }
        }

        if vehicle.preemption_mode == PreemptionMode::None {
            return;
        }

        if let Err(e) = self.preempt(vehicle, step, sim, engine) {
            error!(
                "Failed preemption. {}, route: {}: {}",
                vehicle.preemption_mode, vehicle.route_name, e
            );
        }
    }

    /// Mediated requests for every signal on the route that is far enough
    /// away, issued once when a MEDIATE_FROM_START vehicle is inserted
    pub fn post_insert(
        &self,
        vehicle: &mut InterventionVehicle,
        step: Step,
        sim: &dyn TrafficSimulator,
        engine: &mut ArbitrationEngine,
    ) {
        if vehicle.preemption_mode != PreemptionMode::MediateFromStart {
            return;
        }

        let signals: Vec<SignalId> = vehicle.pending_signals().values().copied().collect();
        for signal in signals {
            if vehicle.is_preemption_set(signal) {
                continue;
            }
            let Some(distance) = vehicle.distance_to_signal(signal, &self.graph) else {
                continue;
            };
            if distance > self.config.initial_mediate_min_distance {
                if let Err(e) = self.mediate_signal(vehicle, signal, distance, step, sim, engine) {
                    error!(
                        "Initial mediated preemption of {} failed, route: {}: {}",
                        signal, vehicle.route_name, e
                    );
                }
            }
        }
    }

    fn preempt(
        &self,
        vehicle: &mut InterventionVehicle,
        step: Step,
        sim: &dyn TrafficSimulator,
        engine: &mut ArbitrationEngine,
    ) -> SimResult<()> {
        let upcoming = sim.next_signals(vehicle.id);
        if upcoming.is_empty() {
            return Ok(());
        }

        match vehicle.preemption_mode {
            PreemptionMode::None => Ok(()),
            PreemptionMode::Immediate => self.immediate(vehicle, &upcoming, step, sim, engine, false),
            PreemptionMode::ImmediateWithMinimalBlockage => {
                self.immediate(vehicle, &upcoming, step, sim, engine, true)
            }
            PreemptionMode::Mediate | PreemptionMode::MediateFromStart => {
                self.mediate(vehicle, &upcoming, step, sim, engine)
            }
        }
    }

    /// Claims the nearest signal and every signal bunched right behind it,
    /// once the nearest is within the vehicle's preemption range
    fn immediate(
        &self,
        vehicle: &mut InterventionVehicle,
        upcoming: &[UpcomingSignal],
        step: Step,
        sim: &dyn TrafficSimulator,
        engine: &mut ArbitrationEngine,
        minimal_blockage: bool,
    ) -> SimResult<()> {
        let Some(nearest) = upcoming.first().map(|next| next.distance) else {
            return Ok(());
        };
        if nearest >= vehicle.preemption_range {
            return Ok(());
        }

        for next in upcoming {
            if vehicle.is_preemption_set(next.signal)
                || next.distance - nearest >= self.config.immediate_group_span
            {
                break;
            }
            if minimal_blockage {
                self.request_minimal_blockage(vehicle, next.signal, next.distance, step, sim, engine)?;
            } else {
                self.request_full_priority(vehicle, next, step, sim, engine)?;
            }
        }
        Ok(())
    }

    fn request_full_priority(
        &self,
        vehicle: &InterventionVehicle,
        next: &UpcomingSignal,
        step: Step,
        sim: &dyn TrafficSimulator,
        engine: &mut ArbitrationEngine,
    ) -> SimResult<()> {
        let controlled_lanes = sim.controlled_lanes(next.signal)?;
        let links = sim.controlled_links(next.signal)?;
        let approach_edge = vehicle
            .approach(&controlled_lanes, &links)
            .and_then(|approach| approach.edge());
        let state = conflicts::full_priority_phase(&controlled_lanes, approach_edge, next.link_index);

        engine.request_preemption(PreemptionRequest::immediate(
            step,
            vehicle.id,
            next.signal,
            next.distance,
            vehicle.preemption_mode,
            format!(
                "Preempting TL with id: {} in distance of {} meters.",
                next.signal, next.distance as i64
            ),
            state,
            self.config.immediate_phase_duration,
        ));
        Ok(())
    }

    fn request_minimal_blockage(
        &self,
        vehicle: &InterventionVehicle,
        signal: SignalId,
        distance: f64,
        step: Step,
        sim: &dyn TrafficSimulator,
        engine: &mut ArbitrationEngine,
    ) -> SimResult<()> {
        let view = self.signal_view(vehicle, signal, sim)?;
        let state = self.conflict_free_phase(vehicle, &view, engine)?;

        engine.request_preemption(PreemptionRequest::immediate(
            step,
            vehicle.id,
            signal,
            distance,
            PreemptionMode::ImmediateWithMinimalBlockage,
            format!(
                "Immediate TL preemption with minimal blockage; TL id: {} in distance of {} meters.",
                signal, distance as i64
            ),
            state,
            self.config.immediate_phase_duration,
        ));
        Ok(())
    }

    fn mediate(
        &self,
        vehicle: &mut InterventionVehicle,
        upcoming: &[UpcomingSignal],
        step: Step,
        sim: &dyn TrafficSimulator,
        engine: &mut ArbitrationEngine,
    ) -> SimResult<()> {
        for next in upcoming {
            if next.distance > self.config.mediate_range {
                break;
            }

            if !vehicle.is_preemption_set(next.signal) {
                if next.distance > self.config.mediate_immediate_cutoff {
                    self.mediate_signal(vehicle, next.signal, next.distance, step, sim, engine)?;
                } else {
                    let view = self.signal_view(vehicle, next.signal, sim)?;
                    let target = self.target_phase(&view, engine)?;
                    let current = sim.signal_phase_index(next.signal)?;
                    vehicle.stats.add_checkpoint(
                        format!(
                            "Missed phase goal. Target index: {}, curr index: {}",
                            target, current
                        ),
                        step,
                    );
                    self.request_minimal_blockage(vehicle, next.signal, next.distance, step, sim, engine)?;
                }
            } else if next.distance < self.config.recheck_distance {
                let view = self.signal_view(vehicle, next.signal, sim)?;
                let expected = self.conflict_free_phase(vehicle, &view, engine)?;
                let shown = sim.signal_state(next.signal)?;
                if shown != expected {
                    let target = self.target_phase(&view, engine)?;
                    let current = sim.signal_phase_index(next.signal)?;
                    vehicle.stats.add_checkpoint(
                        format!(
                            "Missed2 phase goal. Target index: {}, curr index: {}, target phase: {}, curr phase: {}",
                            target, current, expected, shown
                        ),
                        step,
                    );
                    self.request_minimal_blockage(vehicle, next.signal, next.distance, step, sim, engine)?;
                }
            }
        }
        Ok(())
    }

    /// Requests a rewritten program that brings the vehicle's phase up as it
    /// arrives. An infeasible rewrite is logged and nothing is requested.
    fn mediate_signal(
        &self,
        vehicle: &InterventionVehicle,
        signal: SignalId,
        distance: f64,
        step: Step,
        sim: &dyn TrafficSimulator,
        engine: &mut ArbitrationEngine,
    ) -> SimResult<()> {
        let view = self.signal_view(vehicle, signal, sim)?;
        let target = self.target_phase(&view, engine)?;
        let target_state = self.conflict_free_phase(vehicle, &view, engine)?;
        let current = sim.signal_phase_index(signal)?;
        let eta = vehicle.eta_to_signal(signal, &self.graph, self.config.eta_speed_factor);

        let template = engine.default_program(signal)?;
        let overrides = match plan_phase_rewrite(template, current, target, eta, &target_state, &self.config) {
            Ok(overrides) => overrides,
            Err(reason) => {
                let infeasible = SimError::InfeasibleRewrite {
                    vehicle: vehicle.id,
                    signal,
                    reason,
                };
                debug!("{}", infeasible);
                return Ok(());
            }
        };
        let program = template.with_overrides(template.program_id.clone(), &overrides)?;

        engine.request_preemption(PreemptionRequest::mediated(
            step,
            vehicle.id,
            signal,
            distance,
            vehicle.preemption_mode,
            format!(
                "Mediate TL preemption; TL id: {} in distance of {} meters.",
                signal, distance as i64
            ),
            program,
        ));
        Ok(())
    }

    fn signal_view(
        &self,
        vehicle: &InterventionVehicle,
        signal: SignalId,
        sim: &dyn TrafficSimulator,
    ) -> SimResult<SignalView> {
        let controlled_lanes = sim.controlled_lanes(signal)?;
        let links = sim.controlled_links(signal)?;
        let approach = vehicle.approach(&controlled_lanes, &links).ok_or_else(|| {
            SimError::planning(vehicle.id, format!("route does not cross {}", signal))
        })?;
        Ok(SignalView {
            signal,
            approach,
            controlled_lanes,
            links,
        })
    }

    /// Index of the first default phase serving the vehicle's approach
    fn target_phase(&self, view: &SignalView, engine: &ArbitrationEngine) -> SimResult<usize> {
        let served = view.approach.link_indices(&view.controlled_lanes);
        engine
            .default_program(view.signal)?
            .find_green_phase(&served)
            .ok_or_else(|| SimError::not_found("target phase for", view.signal))
    }

    fn conflict_free_phase(
        &self,
        vehicle: &InterventionVehicle,
        view: &SignalView,
        engine: &ArbitrationEngine,
    ) -> SimResult<String> {
        let program = engine.default_program(view.signal)?;
        conflicts::conflict_free_phase(
            &self.graph,
            program,
            &view.controlled_lanes,
            &view.links,
            &view.approach,
        )
        .ok_or_else(|| {
            SimError::planning(
                vehicle.id,
                format!("no default phase of {} serves the approach", view.signal),
            )
        })
    }
}
