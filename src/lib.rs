//! Intervention Vehicle Simulation Library
//!
//! Routes intervention vehicles through a road network and arbitrates their
//! claims on traffic signals.

pub mod simulation;
