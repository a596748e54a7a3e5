//! Phase construction for a vehicle crossing a signalised junction
//!
//! Both constructions produce an indicator string with one character per
//! controlled link. The full-priority phase gives the approach edge green and
//! stops everything else. The conflict-free phase starts from a default phase
//! that already serves the approach and closes only the movements that cross
//! the vehicle's path.

use std::collections::HashMap;

use super::road_network::RoadGraph;
use super::signal::{is_green, ControlledLink, SignalProgram};
use super::types::{EdgeId, LaneId};

/// The lanes a vehicle uses at one signal
#[derive(Debug, Clone, PartialEq)]
pub struct Approach {
    /// Position of the approach edge in the vehicle's route
    pub route_index: usize,
    /// Controlled lanes of the approach edge, in controlled-lane order
    pub in_lanes: Vec<LaneId>,
    /// Lane the vehicle leaves the junction on
    pub out_lane: LaneId,
}

impl Approach {
    pub fn edge(&self) -> Option<EdgeId> {
        self.in_lanes.first().map(|lane| lane.edge)
    }

    /// Link indices whose incoming lane belongs to the approach
    pub fn link_indices(&self, controlled_lanes: &[LaneId]) -> Vec<usize> {
        controlled_lanes
            .iter()
            .enumerate()
            .filter(|(_, lane)| self.in_lanes.contains(lane))
            .map(|(index, _)| index)
            .collect()
    }
}

/// Controlled lanes numbered around the junction so that the vehicle's
/// entry lane sits at index 0.
///
/// Each lane keeps the position of its first link. The numbering is rotated
/// one lane group at a time, starting from the highest group, until one of
/// the entry lanes reaches 0.
#[derive(Debug, Clone)]
pub struct RotatedLaneIndex {
    indices: HashMap<LaneId, usize>,
}

impl RotatedLaneIndex {
    pub fn new(controlled_lanes: &[LaneId], in_lanes: &[LaneId]) -> Self {
        let total = controlled_lanes.len();
        let mut indices: HashMap<LaneId, usize> = HashMap::new();
        let mut counts: HashMap<LaneId, usize> = HashMap::new();
        for (index, lane) in controlled_lanes.iter().enumerate() {
            indices.entry(*lane).or_insert(index);
            *counts.entry(*lane).or_insert(0) += 1;
        }

        for _ in 0..=total {
            let entry = in_lanes.iter().filter_map(|lane| indices.get(lane)).min();
            if entry.map_or(true, |index| *index == 0) {
                break;
            }
            let Some((last_lane, _)) = indices.iter().max_by_key(|(_, index)| **index) else {
                break;
            };
            let shift = counts.get(last_lane).copied().unwrap_or(1);
            for index in indices.values_mut() {
                *index = (*index + shift) % total;
            }
        }

        Self { indices }
    }

    pub fn get(&self, lane: LaneId) -> Option<usize> {
        self.indices.get(&lane).copied()
    }

    pub fn max_index(&self) -> Option<usize> {
        self.indices.values().max().copied()
    }
}

/// Green for every link leaving `approach_edge`, red elsewhere. Falls back
/// to a single green at `link_index` when no controlled lane is on the edge.
pub fn full_priority_phase(
    controlled_lanes: &[LaneId],
    approach_edge: Option<EdgeId>,
    link_index: usize,
) -> String {
    let served: Vec<bool> = controlled_lanes
        .iter()
        .map(|lane| Some(lane.edge) == approach_edge)
        .collect();

    if served.iter().any(|green| *green) {
        served
            .into_iter()
            .map(|green| if green { 'G' } else { 'r' })
            .collect()
    } else {
        (0..controlled_lanes.len())
            .map(|index| if index == link_index { 'G' } else { 'r' })
            .collect()
    }
}

/// The first default phase serving the approach, with every movement that
/// conflicts with the vehicle's path switched to red.
///
/// Returns `None` when no default phase shows green over the approach links.
pub fn conflict_free_phase(
    graph: &RoadGraph,
    program: &SignalProgram,
    controlled_lanes: &[LaneId],
    links: &[ControlledLink],
    approach: &Approach,
) -> Option<String> {
    let served = approach.link_indices(controlled_lanes);
    let base = program.find_green_phase(&served)?;
    let in_lane = *approach.in_lanes.first()?;
    let table = RotatedLaneIndex::new(controlled_lanes, &approach.in_lanes);
    let max_index = table.max_index();

    let index_of = |lane: Option<LaneId>| lane.and_then(|lane| table.get(lane));
    let exit_reverse = graph.opposite_lane(approach.out_lane);

    let mut phase: Vec<char> = program.phases[base].state.chars().collect();
    for (index, indicator) in phase.iter_mut().enumerate() {
        if served.contains(&index) || !is_green(*indicator) {
            continue;
        }
        let Some(link) = links.get(index) else {
            continue;
        };
        let other_in = Some(link.from);
        let other_out_reverse = graph.opposite_lane(link.to);

        let closes = if link.to == approach.out_lane {
            // Merges into the lane the vehicle exits on
            true
        } else if exit_reverse.is_some() && exit_reverse == other_in {
            // Oncoming from the exit side, turning across the vehicle
            match other_out_reverse {
                Some(lane) if approach.in_lanes.contains(&lane) => false,
                _ => chain(index_of(other_out_reverse), &[(Cmp::Ge, index_of(other_in))]).unwrap_or(true),
            }
        } else {
            let crosses_behind = chain(
                index_of(other_in),
                &[
                    (Cmp::Gt, index_of(exit_reverse)),
                    (Cmp::Gt, index_of(other_out_reverse)),
                    (Cmp::Ge, index_of(Some(in_lane))),
                ],
            );
            match crosses_behind {
                Some(false) => chain(
                    index_of(other_in),
                    &[
                        (Cmp::Lt, index_of(exit_reverse)),
                        (Cmp::Lt, index_of(other_out_reverse)),
                        (Cmp::Lt, max_index),
                    ],
                )
                .unwrap_or(true),
                // Crossing, or a lane the junction does not number
                _ => true,
            }
        };

        if closes {
            *indicator = 'r';
        }
    }

    Some(phase.into_iter().collect())
}

#[derive(Debug, Clone, Copy)]
enum Cmp {
    Gt,
    Ge,
    Lt,
}

impl Cmp {
    fn holds(self, a: usize, b: usize) -> bool {
        match self {
            Cmp::Gt => a > b,
            Cmp::Ge => a >= b,
            Cmp::Lt => a < b,
        }
    }
}

/// Evaluates `first op1 v1 op2 v2 ...` left to right, stopping at the first
/// comparison that fails. A missing value reached before any failure yields
/// `None`.
fn chain(first: Option<usize>, rest: &[(Cmp, Option<usize>)]) -> Option<bool> {
    let mut previous = first?;
    for (op, value) in rest {
        let current = (*value)?;
        if !op.holds(previous, current) {
            return Some(false);
        }
        previous = current;
    }
    Some(true)
}
