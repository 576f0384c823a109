//! # Communications interface crate.
//!
//! Provides the network layer and message definitions shared by the wheel and guidance
//! executables.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Network module
pub mod net;

/// Messages exchanged between the wheel host and the guidance peer
pub mod sync;
