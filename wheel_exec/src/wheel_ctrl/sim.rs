//! # Simulated Wheel
//!
//! A wheel which moves in proportion to the force applied to it. Every read of the wheel advances
//! the simulation by one step, so the controller's loop rate sets the simulation rate.
//!
//! Disturbances (someone grabbing the wheel) can be scripted to happen on a given read.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use super::{WheelDriver, WheelError, WheelState};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const NEUTRAL_FORCE: f64 = 0.5;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimWheel {
    position: f64,

    /// Position change per read per unit of push
    gain: f64,

    force: f64,

    stuck: bool,

    buttons: Vec<u16>,

    /// Number of reads made so far
    num_reads: usize,

    /// Pending (read index, position change) pairs
    shoves: Vec<(usize, f64)>,

    /// Every force commanded via `set_force`
    forces: Vec<f64>,

    /// Position after every read
    history: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimWheel {
    pub fn new(position: f64, gain: f64) -> Self {
        Self {
            position: position.clamp(-1.0, 1.0),
            gain,
            force: NEUTRAL_FORCE,
            stuck: false,
            buttons: Vec::new(),
            num_reads: 0,
            shoves: Vec::new(),
            forces: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Move the wheel by `delta` on the `read_index`th read.
    pub fn add_shove(&mut self, read_index: usize, delta: f64) {
        self.shoves.push((read_index, delta));
    }

    /// Hold the wheel still regardless of force.
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    pub fn set_buttons(&mut self, buttons: Vec<u16>) {
        self.buttons = buttons;
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Force currently being applied.
    pub fn force(&self) -> f64 {
        self.force
    }

    pub fn forces(&self) -> &[f64] {
        &self.forces
    }

    pub fn num_force_commands(&self) -> usize {
        self.forces.len()
    }

    /// Largest deviation from neutral of any commanded force.
    pub fn max_push_applied(&self) -> f64 {
        self.forces
            .iter()
            .map(|f| (f - NEUTRAL_FORCE).abs())
            .fold(0.0, f64::max)
    }

    /// True if the distance to `target` never grew between reads.
    pub fn approach_was_monotonic(&self, target: f64) -> bool {
        self.history
            .windows(2)
            .all(|w| (w[1] - target).abs() <= (w[0] - target).abs() + 1e-12)
    }

    fn step(&mut self) {
        if !self.stuck {
            self.position -= (self.force - NEUTRAL_FORCE) * self.gain;
        }

        let index = self.num_reads;
        for &(_, delta) in self.shoves.iter().filter(|(i, _)| *i == index) {
            self.position += delta;
        }

        self.position = self.position.clamp(-1.0, 1.0);
        self.num_reads += 1;
        self.history.push(self.position);
    }
}

impl WheelDriver for SimWheel {
    fn get_state(&mut self) -> Result<WheelState, WheelError> {
        self.step();

        Ok(WheelState {
            steering: self.position,
            buttons: self.buttons.clone(),
        })
    }

    fn set_force(&mut self, force: f64) -> Result<(), WheelError> {
        if !(0.0..=1.0).contains(&force) {
            return Err(WheelError::InvalidForce(force))
        }

        self.force = force;
        self.forces.push(force);
        Ok(())
    }

    fn stop_force(&mut self) -> Result<(), WheelError> {
        self.force = NEUTRAL_FORCE;
        Ok(())
    }
}
