//! Signal programs and the arena of default templates
//!
//! Default programs are captured once at startup and never mutated. Every
//! rewrite is expressed as a list of [`PhaseOverride`]s applied to a copy of
//! the template under a fresh program id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::{SimError, SimResult};
use super::types::{LaneId, SignalId};

/// Program id the simulator assigns to a signal's default program
pub const DEFAULT_PROGRAM_ID: &str = "0";

/// Returns true for a green right-of-way indicator (`G` or `g`)
pub fn is_green(indicator: char) -> bool {
    indicator.eq_ignore_ascii_case(&'g')
}

/// One phase of a signal cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// One indicator character per controlled link
    pub state: String,
    /// Duration in steps
    pub duration: f64,
}

impl Phase {
    pub fn new(state: impl Into<String>, duration: f64) -> Self {
        Self {
            state: state.into(),
            duration,
        }
    }

    pub fn has_green(&self) -> bool {
        self.state.chars().any(is_green)
    }

    pub fn is_green_at(&self, index: usize) -> bool {
        self.state.chars().nth(index).map(is_green).unwrap_or(false)
    }

    /// True when every link in `first..=last` shows green
    pub fn is_green_span(&self, first: usize, last: usize) -> bool {
        let span: Vec<char> = self.state.chars().skip(first).take(last + 1 - first).collect();
        span.len() == last + 1 - first && span.into_iter().all(is_green)
    }
}

/// A full cycle of phases installed under one program id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalProgram {
    pub program_id: String,
    pub phases: Vec<Phase>,
}

impl SignalProgram {
    pub fn new(program_id: impl Into<String>, phases: Vec<Phase>) -> Self {
        Self {
            program_id: program_id.into(),
            phases,
        }
    }

    pub fn cycle_duration(&self) -> f64 {
        self.phases.iter().map(|phase| phase.duration).sum()
    }

    /// First phase in which every link between the lowest and highest of
    /// `indices` shows green
    pub fn find_green_phase(&self, indices: &[usize]) -> Option<usize> {
        let first = *indices.iter().min()?;
        let last = *indices.iter().max()?;
        self.phases
            .iter()
            .position(|phase| phase.is_green_span(first, last))
    }

    /// Copy of this program with `overrides` applied, installed as `program_id`
    pub fn with_overrides(
        &self,
        program_id: impl Into<String>,
        overrides: &[PhaseOverride],
    ) -> SimResult<SignalProgram> {
        let mut phases = self.phases.clone();
        for phase_override in overrides {
            let phase = phases.get_mut(phase_override.index).ok_or_else(|| {
                SimError::not_found("phase", phase_override.index)
            })?;
            if let Some(state) = &phase_override.state {
                phase.state = state.clone();
            }
            if let Some(duration) = phase_override.duration {
                phase.duration = duration;
            }
        }
        Ok(SignalProgram::new(program_id, phases))
    }
}

/// Value-type change to a single phase of a template
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOverride {
    pub index: usize,
    pub state: Option<String>,
    pub duration: Option<f64>,
}

impl PhaseOverride {
    pub fn duration(index: usize, duration: f64) -> Self {
        Self {
            index,
            state: None,
            duration: Some(duration),
        }
    }

    pub fn replace(index: usize, state: impl Into<String>, duration: f64) -> Self {
        Self {
            index,
            state: Some(state.into()),
            duration: Some(duration),
        }
    }
}

/// A movement a signal controls, from an incoming lane to an outgoing lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlledLink {
    pub from: LaneId,
    pub to: LaneId,
}

/// Read-only default programs, one per signal, plus variant id allocation
#[derive(Debug, Default)]
pub struct ProgramArena {
    defaults: HashMap<SignalId, SignalProgram>,
    next_variant: usize,
}

impl ProgramArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures a default template. Later captures for the same signal are ignored.
    pub fn capture(&mut self, signal: SignalId, program: SignalProgram) {
        self.defaults.entry(signal).or_insert(program);
    }

    pub fn default_program(&self, signal: SignalId) -> SimResult<&SignalProgram> {
        self.defaults
            .get(&signal)
            .ok_or_else(|| SimError::not_found("signal program", signal))
    }

    pub fn contains(&self, signal: SignalId) -> bool {
        self.defaults.contains_key(&signal)
    }

    pub fn len(&self) -> usize {
        self.defaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty()
    }

    /// Allocates a program id no other rewrite of this run has used
    pub fn next_variant_id(&mut self, signal: SignalId) -> String {
        self.next_variant += 1;
        format!("{}-preempt-{}", signal, self.next_variant)
    }
}
