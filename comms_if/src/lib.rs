//! # Communications interface crate.
//!
//! Provides the interface types shared between the mechanisms software and its collaborators:
//! demands sent to the actuators and telemetry events published by them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Demand and telemetry definitions for equipment (like mechanisms)
pub mod eqpt;
