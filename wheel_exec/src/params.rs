//! # Wheel Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::telemetry::log_tail::LogTailParams;
use crate::wheel_ctrl::WheelCtrlParams;
#[cfg(feature = "g29")]
use crate::wheel_ctrl::g29::G29Params;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
pub struct WheelExecParams {

    /// Speed cap for every drive episode started from a peer demand
    pub drive_speed: f64,

    /// evdev code of the button that hands the wheel over to autosteer
    pub engage_button: Option<u16>,

    /// Parameters for the wheel controller
    pub wheel_ctrl: WheelCtrlParams,

    /// Parameters for reading telemetry
    pub telemetry: LogTailParams,

    /// Parameters for the simulated wheel
    pub sim: SimParams,

    /// Parameters for the evdev wheel
    #[cfg(feature = "g29")]
    #[serde(default)]
    pub g29: G29Params,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SimParams {
    /// Position change per control tick per unit of push
    pub gain: f64,

    /// Position the simulated wheel starts at
    #[serde(default)]
    pub initial_position: f64,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
