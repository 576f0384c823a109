//! # Sync Messages
//!
//! The guidance peer sends a [`SyncRequest`] every cycle and the wheel host answers each one with
//! exactly one [`SyncReply`]. Every field has a default so a message missing fields (from an older
//! build, or a hand-written test client) still decodes.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest steering demand magnitude which will be sent to the wheel.
pub const MAX_STEER_DEM: f64 = 0.9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Request sent from the guidance peer to the wheel host.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct SyncRequest {
    /// True if the peer wants the wheel to follow its steering demand.
    pub autosteer_status: bool,

    /// Demanded normalised wheel position, or `None` if guidance has no command this cycle.
    pub desired_wheel_rotation: Option<f64>,

    /// Acknowledges a `wheel_connect` edge so the host can drop its latch.
    #[serde(rename = "recieved_wheel_connect")]
    pub received_wheel_connect: bool,
}

/// Reply sent from the wheel host to the guidance peer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct SyncReply {
    /// True if the host has received telemetry. When false the pose, tool and implement fields
    /// hold defaults and must not be steered from.
    pub telemetry_valid: bool,

    /// Latest vehicle pose from telemetry
    pub vehicle: PoseMsg,

    /// Latest tool (implement) pose from telemetry
    pub tool: PoseMsg,

    /// Latest implement state from telemetry
    pub implement: ImplementMsg,

    /// Live normalised position of the wheel.
    ///
    /// Shares its name with the request field but flows the other way.
    pub desired_wheel_rotation: f64,

    /// Edge: the operator has handed the wheel over to autosteer.
    pub wheel_connect: bool,

    /// Edge: the wheel controller lost authority over the wheel.
    pub wheel_disconnect: bool,
}

/// A planar pose.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct PoseMsg {
    pub x: f64,

    pub y: f64,

    /// Heading counter-clockwise from the world X axis.
    pub heading_rad: f64,
}

/// State of the implement being towed or carried.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ImplementMsg {
    /// Implement is switched on
    pub on: bool,

    /// Implement is lowered into work
    pub lowered: bool,

    /// Working width reported by the vehicle, `None` if unknown.
    pub working_width_m: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ImplementMsg {
    fn default() -> Self {
        Self {
            on: false,
            lowered: true,
            working_width_m: None,
        }
    }
}

impl ImplementMsg {
    /// True if the implement is actually doing work.
    pub fn is_working(&self) -> bool {
        self.on && self.lowered
    }
}

impl SyncRequest {
    /// The steering demand limited to the range the wheel will accept.
    ///
    /// Non-finite demands are discarded.
    pub fn clamped_rotation(&self) -> Option<f64> {
        self.desired_wheel_rotation
            .filter(|r| r.is_finite())
            .map(|r| r.clamp(-MAX_STEER_DEM, MAX_STEER_DEM))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_request_uses_defaults() {
        let req: SyncRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, SyncRequest::default());

        let req: SyncRequest = serde_json::from_str(
            r#"{"autosteer_status": true, "desired_wheel_rotation": 1.5}"#
        ).unwrap();
        assert!(req.autosteer_status);
        assert_eq!(req.clamped_rotation(), Some(0.9));
        assert!(!req.received_wheel_connect);

        let req: SyncRequest = serde_json::from_str(
            r#"{"desired_wheel_rotation": null, "recieved_wheel_connect": true}"#
        ).unwrap();
        assert_eq!(req.clamped_rotation(), None);
        assert!(req.received_wheel_connect);
    }

    #[test]
    fn test_partial_reply_uses_defaults() {
        let reply: SyncReply = serde_json::from_str(
            r#"{"vehicle": {"x": 3.0}, "wheel_disconnect": true}"#
        ).unwrap();

        assert!(!reply.telemetry_valid);
        assert_eq!(reply.vehicle.x, 3.0);
        assert_eq!(reply.vehicle.y, 0.0);
        assert!(reply.implement.lowered);
        assert!(!reply.implement.on);
        assert_eq!(reply.implement.working_width_m, None);
        assert!(reply.wheel_disconnect);
        assert!(!reply.wheel_connect);
    }

    #[test]
    fn test_ack_keeps_wire_name() {
        let req = SyncRequest {
            received_wheel_connect: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"recieved_wheel_connect\":true"));
    }

    #[test]
    fn test_clamp_negative() {
        let req = SyncRequest {
            autosteer_status: true,
            desired_wheel_rotation: Some(-4.0),
            ..Default::default()
        };
        assert_eq!(req.clamped_rotation(), Some(-0.9));
    }
}
