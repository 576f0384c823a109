//! # Host State
//!
//! Decides what the host does with each request from the guidance peer, and what it replies.
//!
//! Two one-shot signals are latched here until the peer has seen them:
//! - `wheel_connect` is raised when the operator presses the engage button and held until the
//!   peer acknowledges it.
//! - `wheel_disconnect` is raised when the wheel controller loses authority over the wheel and
//!   held until the peer disengages autosteer. While it is held no new drive is started.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::sync::{SyncReply, SyncRequest};
use log::{debug, info, trace, warn};

use crate::telemetry::Telemetry;
use crate::wheel_ctrl::WheelEvent;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The host's view of the wheel.
pub trait WheelHandle {
    /// Last known wheel position.
    fn position(&self) -> f64;

    /// Whether a drive episode is in progress.
    fn is_busy(&self) -> bool;

    /// Start a drive episode unless one is already running. Returns true if it was started.
    fn try_start_drive(&self, target: f64, max_speed: f64) -> bool;

    /// Take the next pending wheel event, if any.
    fn next_event(&self) -> Option<WheelEvent>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HostState {
    connect_latch: bool,

    disconnect_latch: bool,

    /// Speed cap used for every drive episode
    drive_speed: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HostState {
    pub fn new(drive_speed: f64) -> Self {
        Self {
            connect_latch: false,
            disconnect_latch: false,
            drive_speed,
        }
    }

    pub fn connect_latched(&self) -> bool {
        self.connect_latch
    }

    pub fn disconnect_latched(&self) -> bool {
        self.disconnect_latch
    }

    /// Process one request and build the reply to it.
    ///
    /// `request` is `None` if the request could not be decoded, in which case nothing is driven
    /// but the peer still gets the latest state.
    pub fn handle_request<W: WheelHandle>(
        &mut self,
        request: Option<&SyncRequest>,
        wheel: &W,
        telem: Option<&Telemetry>
    ) -> SyncReply {
        self.drain_events(wheel);

        if let Some(req) = request {
            if req.received_wheel_connect && self.connect_latch {
                debug!("Peer acknowledged wheel connect");
                self.connect_latch = false;
            }

            if req.autosteer_status {
                self.follow_demand(req, wheel);
            }
            else if self.disconnect_latch {
                info!("Autosteer disengaged by peer, wheel re-armed");
                self.disconnect_latch = false;
            }
        }

        self.build_reply(wheel, telem)
    }

    /// Keep the latches current while the peer is silent.
    pub fn handle_silence<W: WheelHandle>(&mut self, wheel: &W) {
        self.drain_events(wheel);
    }

    fn drain_events<W: WheelHandle>(&mut self, wheel: &W) {
        while let Some(event) = wheel.next_event() {
            match event {
                WheelEvent::Disconnected => {
                    warn!("Wheel disconnected from autosteer");
                    self.disconnect_latch = true;
                },
                WheelEvent::ConnectPressed => {
                    info!("Wheel connect requested by operator");
                    self.connect_latch = true;
                }
            }
        }
    }

    fn follow_demand<W: WheelHandle>(&mut self, req: &SyncRequest, wheel: &W) {
        let target = match req.clamped_rotation() {
            Some(t) => t,
            None => return,
        };

        if self.disconnect_latch {
            trace!("Ignoring demand {:.3} while disconnected", target);
            return
        }

        if wheel.try_start_drive(target, self.drive_speed) {
            trace!("Driving wheel to {:.3}", target);
        }
        else {
            trace!("Wheel busy, demand {:.3} dropped", target);
        }
    }

    fn build_reply<W: WheelHandle>(&self, wheel: &W, telem: Option<&Telemetry>) -> SyncReply {
        let mut reply = SyncReply {
            desired_wheel_rotation: wheel.position(),
            wheel_connect: self.connect_latch,
            wheel_disconnect: self.disconnect_latch,
            ..Default::default()
        };

        if let Some(t) = telem {
            reply.telemetry_valid = true;
            reply.vehicle = t.vehicle_pose();
            reply.tool = t.tool_pose();
            reply.implement = t.implement();
        }

        reply
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeWheel {
        position: Cell<f64>,
        busy: Cell<bool>,
        drives: RefCell<Vec<(f64, f64)>>,
        events: RefCell<VecDeque<WheelEvent>>,
    }

    impl FakeWheel {
        fn push_event(&self, event: WheelEvent) {
            self.events.borrow_mut().push_back(event);
        }
    }

    impl WheelHandle for FakeWheel {
        fn position(&self) -> f64 {
            self.position.get()
        }

        fn is_busy(&self) -> bool {
            self.busy.get()
        }

        fn try_start_drive(&self, target: f64, max_speed: f64) -> bool {
            if self.busy.get() {
                return false
            }
            self.drives.borrow_mut().push((target, max_speed));
            true
        }

        fn next_event(&self) -> Option<WheelEvent> {
            self.events.borrow_mut().pop_front()
        }
    }

    fn engaged(rotation: Option<f64>) -> SyncRequest {
        SyncRequest {
            autosteer_status: true,
            desired_wheel_rotation: rotation,
            received_wheel_connect: false,
        }
    }

    #[test]
    fn test_demand_is_clamped() {
        let wheel = FakeWheel::default();
        let mut state = HostState::new(0.4);

        state.handle_request(Some(&engaged(Some(1.5))), &wheel, None);

        assert_eq!(*wheel.drives.borrow(), vec![(0.9, 0.4)]);
    }

    #[test]
    fn test_no_drive_when_busy_or_no_command() {
        let wheel = FakeWheel::default();
        let mut state = HostState::new(0.4);

        state.handle_request(Some(&engaged(None)), &wheel, None);
        state.handle_request(Some(&SyncRequest {
            desired_wheel_rotation: Some(0.3),
            ..Default::default()
        }), &wheel, None);
        wheel.busy.set(true);
        state.handle_request(Some(&engaged(Some(0.3))), &wheel, None);

        assert!(wheel.drives.borrow().is_empty());
    }

    #[test]
    fn test_disconnect_latch() {
        let wheel = FakeWheel::default();
        let mut state = HostState::new(0.4);

        wheel.push_event(WheelEvent::Disconnected);
        let reply = state.handle_request(Some(&engaged(Some(0.5))), &wheel, None);

        assert!(reply.wheel_disconnect);
        assert!(wheel.drives.borrow().is_empty());

        // Still latched, still refusing to drive
        let reply = state.handle_request(Some(&engaged(Some(0.5))), &wheel, None);
        assert!(reply.wheel_disconnect);
        assert!(wheel.drives.borrow().is_empty());

        // Peer disengages, which re-arms
        let reply = state.handle_request(Some(&SyncRequest::default()), &wheel, None);
        assert!(!reply.wheel_disconnect);
        assert!(!state.disconnect_latched());

        state.handle_request(Some(&engaged(Some(0.5))), &wheel, None);
        assert_eq!(wheel.drives.borrow().len(), 1);
    }

    #[test]
    fn test_connect_latch() {
        let wheel = FakeWheel::default();
        let mut state = HostState::new(0.4);

        wheel.push_event(WheelEvent::ConnectPressed);
        state.handle_silence(&wheel);
        assert!(state.connect_latched());

        let reply = state.handle_request(Some(&SyncRequest::default()), &wheel, None);
        assert!(reply.wheel_connect);

        let reply = state.handle_request(Some(&SyncRequest {
            received_wheel_connect: true,
            ..Default::default()
        }), &wheel, None);
        assert!(!reply.wheel_connect);
    }

    #[test]
    fn test_bad_request_still_replies() {
        let wheel = FakeWheel::default();
        wheel.position.set(-0.25);
        wheel.push_event(WheelEvent::Disconnected);

        let mut state = HostState::new(0.4);
        let telem = Telemetry {
            vx: 3.0,
            vz: 4.0,
            vry: 90.0,
            width: Some(12.0),
            ..Default::default()
        };

        let reply = state.handle_request(None, &wheel, Some(&telem));

        assert_eq!(reply.desired_wheel_rotation, -0.25);
        assert!(reply.wheel_disconnect);
        assert!(reply.telemetry_valid);
        assert_eq!(reply.vehicle.x, 3.0);
        assert_eq!(reply.vehicle.y, 4.0);
        assert_eq!(reply.implement.working_width_m, Some(12.0));
        assert!(wheel.drives.borrow().is_empty());
    }

    #[test]
    fn test_reply_without_telemetry() {
        let wheel = FakeWheel::default();
        let mut state = HostState::new(0.4);

        let reply = state.handle_request(Some(&SyncRequest::default()), &wheel, None);

        assert!(!reply.telemetry_valid);
        assert_eq!(reply.vehicle, Default::default());
        assert!(reply.implement.lowered);
        assert_eq!(reply.implement.working_width_m, None);
    }
}
