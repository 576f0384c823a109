//! # Wheel Worker
//!
//! Runs the wheel controller on its own thread so that drive episodes, which block until they
//! finish, never hold up the sync server. The server hands demands over with
//! [`WheelWorker::try_start_drive`], which refuses a new demand while an episode is running.
//!
//! While no episode is running the worker keeps polling the wheel, so the live position stays
//! fresh and presses of the engage button are seen.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error, info, trace, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::host_state::WheelHandle;
use crate::wheel_ctrl::{WheelCtrl, WheelCtrlParams, WheelDriver, WheelEvent, WheelStatus};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Period at which the wheel is read between episodes.
const IDLE_POLL_PERIOD: Duration = Duration::from_millis(20);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct WheelWorker {
    demand_tx: Sender<DriveDemand>,

    event_rx: Receiver<WheelEvent>,

    /// Set while an episode is claimed or running
    busy: Arc<AtomicBool>,

    status: Arc<WheelStatus>,

    shutdown: Arc<AtomicBool>,

    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy)]
struct DriveDemand {
    target: f64,
    max_speed: f64,
}

/// Rising edge detector for the engage button.
struct ButtonEdge {
    code: Option<u16>,
    was_pressed: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl WheelWorker {
    /// Start the worker thread, which takes ownership of the driver.
    ///
    /// If `engage_button` is set, pressing that button raises [`WheelEvent::ConnectPressed`].
    pub fn spawn<D>(driver: D, params: WheelCtrlParams, engage_button: Option<u16>) -> Self
    where
        D: WheelDriver + 'static,
    {
        let (demand_tx, demand_rx) = channel::<DriveDemand>();
        let (event_tx, event_rx) = channel();

        let mut ctrl = WheelCtrl::new(driver, params);
        ctrl.set_event_sender(event_tx.clone());

        let busy = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let status = ctrl.status();

        let thread_busy = busy.clone();
        let thread_shutdown = shutdown.clone();

        let handle = thread::spawn(move || {
            let mut engage = ButtonEdge::new(engage_button);

            while !thread_shutdown.load(Ordering::Relaxed) {
                match demand_rx.recv_timeout(IDLE_POLL_PERIOD) {
                    Ok(demand) => {
                        match ctrl.drive_to(demand.target, demand.max_speed) {
                            Ok(outcome) => debug!(
                                "Drive to {:.3} finished: {:?}", demand.target, outcome
                            ),
                            Err(e) => warn!("Drive to {:.3} failed: {}", demand.target, e),
                        }
                        thread_busy.store(false, Ordering::Release);
                    },
                    Err(RecvTimeoutError::Timeout) => match ctrl.read_state() {
                        Ok(state) => {
                            if engage.update(&state.buttons) {
                                info!("Engage button pressed");
                                if event_tx.send(WheelEvent::ConnectPressed).is_err() {
                                    break
                                }
                            }
                        },
                        Err(e) => trace!("Could not read wheel: {}", e),
                    },
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            if let Err(e) = ctrl.driver_mut().stop_force() {
                error!("Could not release wheel on shutdown: {}", e);
            }
            debug!("Wheel worker stopped");
        });

        Self {
            demand_tx,
            event_rx,
            busy,
            status,
            shutdown,
            handle: Some(handle),
        }
    }
}

impl WheelHandle for WheelWorker {
    fn position(&self) -> f64 {
        self.status.position()
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn try_start_drive(&self, target: f64, max_speed: f64) -> bool {
        if self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false
        }

        match self.demand_tx.send(DriveDemand { target, max_speed }) {
            Ok(_) => true,
            Err(_) => {
                error!("Wheel worker has stopped, cannot drive the wheel");
                self.busy.store(false, Ordering::Release);
                false
            }
        }
    }

    fn next_event(&self) -> Option<WheelEvent> {
        self.event_rx.try_recv().ok()
    }
}

impl Drop for WheelWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Wheel worker thread panicked");
            }
        }
    }
}

impl ButtonEdge {
    fn new(code: Option<u16>) -> Self {
        Self {
            code,
            was_pressed: false,
        }
    }

    /// Returns true on the read where the button goes from released to pressed.
    fn update(&mut self, buttons: &[u16]) -> bool {
        let pressed = match self.code {
            Some(c) => buttons.contains(&c),
            None => false,
        };

        let rising = pressed && !self.was_pressed;
        self.was_pressed = pressed;
        rising
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::wheel_ctrl::sim::SimWheel;
    use std::time::Instant;

    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if cond() {
                return true
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_button_edge() {
        let mut edge = ButtonEdge::new(Some(7));

        assert!(!edge.update(&[]));
        assert!(edge.update(&[3, 7]));
        assert!(!edge.update(&[7]));
        assert!(!edge.update(&[]));
        assert!(edge.update(&[7]));

        let mut none = ButtonEdge::new(None);
        assert!(!none.update(&[7]));
    }

    #[test]
    fn test_drive_and_busy() {
        let params = WheelCtrlParams {
            tick_interval_ms: 5,
            ..Default::default()
        };
        let worker = WheelWorker::spawn(SimWheel::new(0.0, 0.1), params, None);

        assert!(worker.try_start_drive(0.5, 0.4));
        // Only one episode at a time
        assert!(!worker.try_start_drive(-0.5, 0.4));

        assert!(wait_for(|| !worker.is_busy()));
        assert!((worker.position() - 0.5).abs() <= 0.01);
        assert_eq!(worker.next_event(), None);

        assert!(worker.try_start_drive(-0.2, 0.4));
        assert!(wait_for(|| !worker.is_busy()));
        assert!((worker.position() + 0.2).abs() <= 0.01);
    }

    #[test]
    fn test_engage_button_raises_connect() {
        let mut wheel = SimWheel::new(0.0, 0.1);
        wheel.set_buttons(vec![291]);

        let worker = WheelWorker::spawn(wheel, WheelCtrlParams::default(), Some(291));

        let mut event = None;
        wait_for(|| {
            event = worker.next_event();
            event.is_some()
        });
        assert_eq!(event, Some(WheelEvent::ConnectPressed));

        // Held button only raises once
        thread::sleep(Duration::from_millis(100));
        assert_eq!(worker.next_event(), None);
    }
}
