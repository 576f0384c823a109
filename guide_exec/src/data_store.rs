//! # Data Store

use comms_if::sync::{SyncReply, SyncRequest};
use log::{info, warn};

use crate::guidance::{GuidanceEngine, Pose, StatusReport};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Global data store for the executable.
#[derive(Default)]
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u128,

    // Sync
    /// Latest reply from the wheel host
    pub latest_reply: Option<SyncReply>,

    /// Acknowledge the host's wheel connect on the next request
    pub ack_wheel_connect: bool,

    // Working width
    /// Working width set by the operator, overrides the one from telemetry
    pub width_override_m: Option<f64>,

    // Guidance
    pub guidance: GuidanceEngine,
    pub guidance_cmd: Option<f64>,
    pub guidance_status_rpt: StatusReport,

    // Monitoring Counters
    /// Number of consecutive failed exchanges with the host
    pub num_consec_sync_errors: u64,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl DataStore {
    /// Create a new store around an initialised guidance engine.
    pub fn new(guidance: GuidanceEngine) -> Self {
        Self {
            guidance,
            ..Default::default()
        }
    }

    /// Perform actions required at the start of a cycle.
    pub fn cycle_start(&mut self) {
        self.guidance_cmd = None;
        self.guidance_status_rpt = StatusReport::default();
    }

    /// Perform actions required at the end of a cycle.
    pub fn cycle_end(&mut self) {
        self.num_cycles += 1;
    }

    /// The request to send to the host this cycle.
    pub fn build_request(&self) -> SyncRequest {
        SyncRequest {
            autosteer_status: self.guidance.is_autosteer_enabled(),
            desired_wheel_rotation: self.guidance_cmd,
            received_wheel_connect: self.ack_wheel_connect,
        }
    }

    /// Take in a reply from the host, acting on its connect and disconnect signals.
    pub fn apply_reply(&mut self, reply: SyncReply) {
        if reply.wheel_disconnect {
            if self.guidance.is_autosteer_enabled() {
                warn!("Wheel disconnected, disengaging autosteer");
                self.guidance.set_autosteer(false);
            }
        }
        else if reply.wheel_connect && !self.ack_wheel_connect {
            info!("Wheel connected, engaging autosteer");
            self.guidance.set_autosteer(true);
        }

        // Acknowledge for as long as the host reports the connect
        self.ack_wheel_connect = reply.wheel_connect;

        self.latest_reply = Some(reply);
        self.num_consec_sync_errors = 0;
    }

    /// Vehicle pose from the latest reply, `None` until the host has telemetry.
    pub fn vehicle_pose(&self) -> Option<Pose> {
        self.telemetry().map(|r| Pose::from(&r.vehicle))
    }

    /// Live wheel position from the latest reply.
    pub fn wheel_position(&self) -> Option<f64> {
        self.latest_reply.as_ref().map(|r| r.desired_wheel_rotation)
    }

    /// The working width guidance should use.
    ///
    /// The operator's override if set, otherwise the width reported by telemetry, otherwise the
    /// default.
    pub fn effective_width_m(&self, default_width_m: f64) -> f64 {
        let valid = |w: &f64| w.is_finite() && *w > 0.0;

        self.width_override_m
            .filter(valid)
            .or_else(|| {
                self.telemetry()
                    .and_then(|r| r.implement.working_width_m)
                    .filter(valid)
            })
            .unwrap_or(default_width_m)
    }

    /// The latest reply, if it carries telemetry.
    fn telemetry(&self) -> Option<&SyncReply> {
        self.latest_reply.as_ref().filter(|r| r.telemetry_valid)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
