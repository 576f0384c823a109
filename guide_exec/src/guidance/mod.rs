//! Guidance module
//!
//! Computes the steering command which brings the vehicle onto the nearest guide line and
//! aligns it with that line. Guide lines are the reference line repeated every working width
//! along the line's normal.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod ref_line;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;

// Internal
pub use params::*;
pub use ref_line::*;
pub use state::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Pose of the vehicle in the world frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    /// Units: meters
    pub position_m: Vector2<f64>,

    /// Heading counter-clockwise from the world X axis.
    ///
    /// Units: radians
    pub heading_rad: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during Guidance operation.
#[derive(Debug, thiserror::Error)]
pub enum GuidanceError {
    #[error("Default working width must be finite and positive, found {0}")]
    InvalidDefaultWidth(f64),

    #[error("Maximum command must be between 0 and 1, found {0}")]
    InvalidMaxCommand(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(x_m: f64, y_m: f64, heading_rad: f64) -> Self {
        Self {
            position_m: Vector2::new(x_m, y_m),
            heading_rad,
        }
    }
}

impl From<&comms_if::sync::PoseMsg> for Pose {
    fn from(msg: &comms_if::sync::PoseMsg) -> Self {
        Self::new(msg.x, msg.y, msg.heading_rad)
    }
}
