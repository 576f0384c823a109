//! # Guidance library.
//!
//! This library allows other crates in the workspace, and the benches, to access items defined
//! inside the guidance crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Data store - state shared between the stages of a cycle
pub mod data_store;

/// Guidance module - computes the steering command from the pose and reference line
pub mod guidance;

/// Operator console - line based commands from the operator
pub mod operator;

/// Parameters for the guidance executable
pub mod params;

/// Sync client - exchanges state with the wheel host
pub mod sync_client;
