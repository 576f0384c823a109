//! Parameters structure for Guidance

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the guidance engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {

    /// Working width used whenever the width given to the engine can't be used.
    ///
    /// Units: meters
    pub default_width_m: f64,

    /// Largest magnitude of steering command the engine will produce.
    ///
    /// Units: normalised wheel position
    pub max_command: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            default_width_m: 6.0,
            max_command: comms_if::sync::MAX_STEER_DEM,
        }
    }
}
