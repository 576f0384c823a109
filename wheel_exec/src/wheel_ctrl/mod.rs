//! # Wheel Controller Module
//!
//! This module provides closed loop position control of a force feedback steering wheel. The
//! wheel itself is abstracted behind the [`WheelDriver`] trait so the controller can run against
//! a physical wheel or the simulated one in [`sim`].
//!
//! A drive episode moves the wheel towards a target by pushing it with a constant force whose
//! magnitude shrinks as the wheel closes in. If the wheel ends up further from the target than
//! the best approach so far by more than the disconnect threshold, someone (or something) is
//! fighting the wheel, so the controller lets go and raises [`WheelEvent::Disconnected`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Simulated wheel used for testing and for running without hardware.
pub mod sim;

/// [`WheelDriver`] implementation for evdev force feedback wheels (Logitech G29 and similar).
#[cfg(feature = "g29")]
pub mod g29;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace, warn};
use serde::Deserialize;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Capabilities the controller needs from a steering wheel.
pub trait WheelDriver: Send {
    /// Read the current wheel position and buttons.
    fn get_state(&mut self) -> Result<WheelState, WheelError>;

    /// Apply a constant force.
    ///
    /// `force` is in the range [0.0, 1.0] where 0.5 is no force. Forces above 0.5 push the wheel
    /// towards negative positions.
    fn set_force(&mut self, force: f64) -> Result<(), WheelError>;

    /// Release the wheel so it is no longer being pushed.
    fn stop_force(&mut self) -> Result<(), WheelError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A snapshot of the wheel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WheelState {
    /// Normalised steering position in [-1.0, 1.0]
    pub steering: f64,

    /// Codes of the buttons currently held down
    pub buttons: Vec<u16>,
}

/// Parameters for the wheel controller.
#[derive(Debug, Clone, Deserialize)]
pub struct WheelCtrlParams {
    /// Episodes whose initial error is below this are not started at all.
    pub intro_tolerance: f64,

    /// An episode completes once the error is at or below this.
    pub fine_tolerance: f64,

    /// How far the error may grow past the closest approach before the wheel is declared
    /// disconnected.
    pub disconnect_threshold: f64,

    /// Smallest push applied while seeking, unless the caller's speed cap is lower.
    pub min_push: f64,

    /// Largest push ever applied.
    pub max_push: f64,

    /// Force value at which the wheel is not being pushed.
    pub neutral_force: f64,

    /// Period of the control loop.
    pub tick_interval_ms: u64,

    /// If set, an episode which makes no new closest approach for this long is abandoned.
    ///
    /// Without it a wheel which overshoots the fine tolerance on every push never finishes an
    /// episode.
    #[serde(default)]
    pub stall_timeout_ms: Option<u64>,
}

/// Status of the controller which other threads may read at any time.
#[derive(Debug, Default)]
pub struct WheelStatus {
    rotating: AtomicBool,

    connected: AtomicBool,

    /// Bits of the last read `f64` position
    position: AtomicU64,
}

/// Closed loop controller for a single wheel.
pub struct WheelCtrl<D: WheelDriver> {
    driver: D,

    params: WheelCtrlParams,

    status: Arc<WheelStatus>,

    event_sender: Option<Sender<WheelEvent>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur while talking to the wheel.
#[derive(thiserror::Error, Debug)]
pub enum WheelError {
    #[error("Wheel device error: {0}")]
    DeviceError(std::io::Error),

    #[error("No wheel device could be found")]
    NoDevice,

    #[error("Force must be between 0.0 and 1.0, got {0}")]
    InvalidForce(f64),

    #[error("Drive target must be finite, got {0}")]
    InvalidTarget(f64),

    #[error("Drive speed must be finite and positive, got {0}")]
    InvalidSpeed(f64),
}

/// One-shot events raised by the wheel side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelEvent {
    /// The controller lost authority over the wheel during an episode.
    Disconnected,

    /// The operator pressed the engage button on the wheel.
    ConnectPressed,
}

/// How a drive episode finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The wheel was already within the intro tolerance, no force was applied.
    AlreadyThere,

    /// The wheel reached the target within the fine tolerance.
    Reached,

    /// The wheel was pulled away from its closest approach.
    Disconnected,

    /// The wheel stopped making progress.
    Stalled,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<D: WheelDriver> WheelCtrl<D> {
    /// Create a new controller for the given driver.
    pub fn new(driver: D, params: WheelCtrlParams) -> Self {
        Self {
            driver,
            params,
            status: Arc::new(WheelStatus::default()),
            event_sender: None,
        }
    }

    /// Set the channel that [`WheelEvent`]s are sent on.
    pub fn set_event_sender(&mut self, sender: Sender<WheelEvent>) {
        self.event_sender = Some(sender);
    }

    /// Get a handle to the controller's status.
    pub fn status(&self) -> Arc<WheelStatus> {
        self.status.clone()
    }

    /// Whether a drive episode is in progress.
    pub fn is_rotating(&self) -> bool {
        self.status.is_rotating()
    }

    pub fn params(&self) -> &WheelCtrlParams {
        &self.params
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Read the wheel, updating the shared status.
    pub fn read_state(&mut self) -> Result<WheelState, WheelError> {
        match self.driver.get_state() {
            Ok(s) => {
                self.status.set_position(s.steering);
                self.status.connected.store(true, Ordering::Relaxed);
                Ok(s)
            },
            Err(e) => {
                self.status.connected.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Drive the wheel to `target`, pushing no harder than `max_speed`.
    ///
    /// The target must already be limited to the range the wheel should reach. This function
    /// blocks until the episode finishes, which is only when the target is reached, the wheel is
    /// disconnected, or (if configured) the wheel stalls. The wheel is always left unpushed when
    /// this function returns.
    pub fn drive_to(&mut self, target: f64, max_speed: f64) -> Result<DriveOutcome, WheelError> {
        if !target.is_finite() {
            return Err(WheelError::InvalidTarget(target))
        }
        if !max_speed.is_finite() || max_speed <= 0.0 {
            return Err(WheelError::InvalidSpeed(max_speed))
        }

        let initial_error = (target - self.read_state()?.steering).abs();

        if initial_error < self.params.intro_tolerance {
            trace!("Wheel already within {} of {:.3}", self.params.intro_tolerance, target);
            return Ok(DriveOutcome::AlreadyThere)
        }

        debug!("Driving wheel to {:.3} (error {:.3})", target, initial_error);

        self.status.rotating.store(true, Ordering::Relaxed);

        let result = self.seek(target, max_speed, initial_error);

        // Let go of the wheel whatever happened
        let stop_result = self.driver.stop_force();
        self.status.rotating.store(false, Ordering::Relaxed);

        let outcome = result?;
        stop_result?;

        if outcome == DriveOutcome::Disconnected {
            self.raise(WheelEvent::Disconnected);
        }

        Ok(outcome)
    }

    /// The seeking loop of a drive episode.
    fn seek(
        &mut self,
        target: f64,
        max_speed: f64,
        initial_error: f64
    ) -> Result<DriveOutcome, WheelError> {
        let tick = Duration::from_millis(self.params.tick_interval_ms);
        let stall_timeout = self.params.stall_timeout_ms.map(Duration::from_millis);

        let mut error = initial_error;
        let mut closest_error = initial_error;
        let mut last_approach = Instant::now();

        while error > self.params.fine_tolerance {
            let position = self.read_state()?.steering;
            error = (target - position).abs();

            if error < closest_error {
                closest_error = error;
                last_approach = Instant::now();
            }

            // Closest error is never larger than error so no abs needed
            if error - closest_error > self.params.disconnect_threshold {
                warn!(
                    "Wheel disconnected: error {:.3} is {:.3} past closest approach {:.3}",
                    error,
                    error - closest_error,
                    closest_error
                );
                return Ok(DriveOutcome::Disconnected)
            }

            if let Some(timeout) = stall_timeout {
                if last_approach.elapsed() > timeout {
                    warn!(
                        "Wheel stalled at {:.3}, {:.3} from target {:.3}",
                        position, error, target
                    );
                    return Ok(DriveOutcome::Stalled)
                }
            }

            if error <= self.params.fine_tolerance {
                break
            }

            let speed = self.push_speed(error, max_speed);

            let force = if target < position {
                self.params.neutral_force + speed
            }
            else {
                self.params.neutral_force - speed
            };

            self.driver.set_force(force)?;

            thread::sleep(tick);
        }

        trace!("Wheel reached {:.3}", target);

        Ok(DriveOutcome::Reached)
    }

    /// Magnitude of push to apply for the given error.
    ///
    /// Half the error, but at least the minimum push (or the caller's cap if that is lower),
    /// never more than the maximum push or the caller's cap.
    pub fn push_speed(&self, error: f64, max_speed: f64) -> f64 {
        let cap = self.params.max_push.min(max_speed).max(0.0);

        (error / 2.0)
            .max(max_speed.min(self.params.min_push))
            .clamp(0.0, cap)
    }

    fn raise(&self, event: WheelEvent) {
        if let Some(ref tx) = self.event_sender {
            if tx.send(event).is_err() {
                warn!("No listener for wheel event {:?}", event);
            }
        }
    }
}

impl WheelStatus {
    /// Last known wheel position.
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    pub fn is_rotating(&self) -> bool {
        self.rotating.load(Ordering::Relaxed)
    }

    /// True if the last read of the wheel succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn set_position(&self, position: f64) {
        self.position.store(position.to_bits(), Ordering::Relaxed);
    }
}

impl Default for WheelCtrlParams {
    fn default() -> Self {
        Self {
            intro_tolerance: 0.01,
            fine_tolerance: 0.01,
            disconnect_threshold: 0.1,
            min_push: 0.125,
            max_push: 0.5,
            neutral_force: 0.5,
            tick_interval_ms: 2,
            stall_timeout_ms: None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use super::sim::SimWheel;
    use std::sync::mpsc::channel;

    fn test_params() -> WheelCtrlParams {
        WheelCtrlParams {
            tick_interval_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_reaches_target() {
        let (tx, rx) = channel();
        let mut ctrl = WheelCtrl::new(SimWheel::new(0.0, 0.1), test_params());
        ctrl.set_event_sender(tx);

        let outcome = ctrl.drive_to(0.5, 0.4).unwrap();

        assert_eq!(outcome, DriveOutcome::Reached);
        assert!((ctrl.driver().position() - 0.5).abs() <= ctrl.params().fine_tolerance);
        assert!(ctrl.driver().approach_was_monotonic(0.5));
        assert!(rx.try_recv().is_err());
        assert!(!ctrl.is_rotating());
        assert_eq!(ctrl.driver().force(), 0.5);
    }

    #[test]
    fn test_disconnect_on_shove() {
        let (tx, rx) = channel();
        let mut wheel = SimWheel::new(0.0, 0.1);
        wheel.add_shove(5, -0.3);

        let mut ctrl = WheelCtrl::new(wheel, test_params());
        ctrl.set_event_sender(tx);

        let outcome = ctrl.drive_to(0.5, 0.4).unwrap();

        assert_eq!(outcome, DriveOutcome::Disconnected);
        assert!((ctrl.driver().position() - 0.5).abs() > ctrl.params().fine_tolerance);
        assert_eq!(rx.try_recv(), Ok(WheelEvent::Disconnected));
        assert!(rx.try_recv().is_err());
        assert_eq!(ctrl.driver().force(), 0.5);
    }

    #[test]
    fn test_small_shove_is_tolerated() {
        let mut wheel = SimWheel::new(0.0, 0.1);
        wheel.add_shove(5, -0.05);

        let mut ctrl = WheelCtrl::new(wheel, test_params());

        assert_eq!(ctrl.drive_to(0.5, 0.4).unwrap(), DriveOutcome::Reached);
    }

    #[test]
    fn test_already_there() {
        let mut ctrl = WheelCtrl::new(SimWheel::new(0.3, 0.1), test_params());

        assert_eq!(ctrl.drive_to(0.305, 0.4).unwrap(), DriveOutcome::AlreadyThere);
        assert_eq!(ctrl.driver().num_force_commands(), 0);
    }

    #[test]
    fn test_never_exceeds_speed_cap() {
        for &(start, target, cap) in &[
            (0.0, 0.5, 0.4),
            (-0.9, 0.9, 0.1),
            (0.9, -0.9, 0.3),
            (0.2, -0.6, 0.05),
            (-0.5, 0.5, 1.0),
        ] {
            let mut ctrl = WheelCtrl::new(SimWheel::new(start, 0.1), test_params());

            let outcome = ctrl.drive_to(target, cap).unwrap();

            assert_eq!(outcome, DriveOutcome::Reached, "{} -> {} @ {}", start, target, cap);
            assert!(
                ctrl.driver().max_push_applied() <= cap.min(0.5) + 1e-12,
                "pushed {} with cap {}",
                ctrl.driver().max_push_applied(),
                cap
            );
            assert!((ctrl.driver().position() - target).abs() <= 0.01);
        }
    }

    #[test]
    fn test_push_direction() {
        let mut ctrl = WheelCtrl::new(SimWheel::new(0.5, 0.1), test_params());
        ctrl.drive_to(0.0, 0.4).unwrap();

        // Target below the wheel means pushing above neutral
        assert!(ctrl.driver().forces().iter().all(|&f| f > 0.5));

        let mut ctrl = WheelCtrl::new(SimWheel::new(-0.5, 0.1), test_params());
        ctrl.drive_to(0.0, 0.4).unwrap();

        assert!(ctrl.driver().forces().iter().all(|&f| f < 0.5));
    }

    #[test]
    fn test_push_speed() {
        let ctrl = WheelCtrl::new(SimWheel::new(0.0, 0.1), test_params());

        // Large errors are capped
        assert_eq!(ctrl.push_speed(1.8, 0.4), 0.4);
        assert_eq!(ctrl.push_speed(1.8, 0.9), 0.5);
        // Mid errors push with half the error
        assert_eq!(ctrl.push_speed(0.5, 0.4), 0.25);
        // Small errors get the minimum push
        assert_eq!(ctrl.push_speed(0.02, 0.4), 0.125);
        // Unless the cap is lower still
        assert_eq!(ctrl.push_speed(0.02, 0.05), 0.05);
    }

    #[test]
    fn test_stall_timeout() {
        let mut wheel = SimWheel::new(0.0, 0.1);
        wheel.set_stuck(true);

        let mut ctrl = WheelCtrl::new(wheel, WheelCtrlParams {
            tick_interval_ms: 1,
            stall_timeout_ms: Some(20),
            ..Default::default()
        });

        assert_eq!(ctrl.drive_to(0.5, 0.4).unwrap(), DriveOutcome::Stalled);
        assert_eq!(ctrl.driver().force(), 0.5);
    }

    #[test]
    fn test_hunting_wheel_stalls() {
        // Each minimum push moves this wheel further than the fine tolerance band is wide, so it
        // settles into swinging either side of the target without reaching it
        let (tx, rx) = channel();
        let mut ctrl = WheelCtrl::new(SimWheel::new(0.0, 0.5), WheelCtrlParams {
            tick_interval_ms: 1,
            stall_timeout_ms: Some(20),
            ..Default::default()
        });
        ctrl.set_event_sender(tx);

        assert_eq!(ctrl.drive_to(0.5, 0.4).unwrap(), DriveOutcome::Stalled);
        assert!((ctrl.driver().position() - 0.5).abs() > ctrl.params().fine_tolerance);
        assert!(!ctrl.is_rotating());
        assert_eq!(ctrl.driver().force(), 0.5);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_demands_rejected() {
        let mut ctrl = WheelCtrl::new(SimWheel::new(0.0, 0.1), test_params());

        assert!(matches!(ctrl.drive_to(f64::NAN, 0.4), Err(WheelError::InvalidTarget(_))));
        assert!(matches!(ctrl.drive_to(0.5, 0.0), Err(WheelError::InvalidSpeed(_))));
        assert!(matches!(ctrl.drive_to(0.5, f64::INFINITY), Err(WheelError::InvalidSpeed(_))));
    }

    #[test]
    fn test_status_tracks_position() {
        let mut ctrl = WheelCtrl::new(SimWheel::new(-0.2, 0.1), test_params());
        let status = ctrl.status();

        assert!(!status.is_connected());

        ctrl.drive_to(0.3, 0.4).unwrap();

        assert!(status.is_connected());
        assert!((status.position() - 0.3).abs() <= 0.01);
    }
}
