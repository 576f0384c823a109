//! # evdev Force Feedback Wheel Driver
//!
//! Drives a force feedback wheel exposed by the kernel as an evdev device. The steering axis is
//! read from `ABS_X` and force is applied as a single constant effect which is updated in place.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use evdev::{
    AbsoluteAxisCode, Device, FFEffect, FFEffectCode, FFEffectData, FFEffectKind, FFEnvelope,
    FFReplay, FFTrigger,
};
use log::{info, warn};
use serde::Deserialize;
use std::path::PathBuf;

use super::{WheelDriver, WheelError, WheelState};
use util::maths::lin_map;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest magnitude of a constant effect level
const MAX_LEVEL: f64 = 32767.0;

/// Effect direction pointing along the steering axis
const EFFECT_DIRECTION: u16 = 0x4000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct G29Params {
    /// Path to the event device, if not given the first device supporting constant force effects
    /// is used.
    pub device_path: Option<PathBuf>,

    /// Flip the direction of applied force, for wheels whose force axis is reversed.
    #[serde(default)]
    pub invert_force: bool,
}

pub struct G29Wheel {
    device: Device,

    effect: FFEffect,

    invert_force: bool,

    /// Raw (min, max) of the steering axis
    axis_range: (f64, f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl G29Wheel {
    /// Open the wheel described by the parameters.
    pub fn open(params: &G29Params) -> Result<Self, WheelError> {
        let mut device = match params.device_path {
            Some(ref path) => Device::open(path).map_err(WheelError::DeviceError)?,
            None => Self::find_device()?,
        };

        info!("Using wheel \"{}\"", device.name().unwrap_or("unnamed"));

        let abs = device.get_abs_state().map_err(WheelError::DeviceError)?;
        let x = &abs[AbsoluteAxisCode::ABS_X.0 as usize];
        let axis_range = (x.minimum as f64, x.maximum as f64);

        if axis_range.0 >= axis_range.1 {
            warn!("Wheel reports an empty steering range {:?}", axis_range);
            return Err(WheelError::NoDevice)
        }

        let mut effect = device
            .upload_ff_effect(Self::constant_effect(0))
            .map_err(WheelError::DeviceError)?;
        effect.play(1).map_err(WheelError::DeviceError)?;

        Ok(Self {
            device,
            effect,
            invert_force: params.invert_force,
            axis_range,
        })
    }

    fn find_device() -> Result<Device, WheelError> {
        evdev::enumerate()
            .map(|(_, d)| d)
            .find(|d| {
                d.supported_ff()
                    .map(|ff| ff.contains(FFEffectCode::FF_CONSTANT))
                    .unwrap_or(false)
                && d.supported_absolute_axes()
                    .map(|a| a.contains(AbsoluteAxisCode::ABS_X))
                    .unwrap_or(false)
            })
            .ok_or(WheelError::NoDevice)
    }

    fn constant_effect(level: i16) -> FFEffectData {
        FFEffectData {
            direction: EFFECT_DIRECTION,
            trigger: FFTrigger::default(),
            replay: FFReplay {
                // Zero length plays until stopped
                length: 0,
                delay: 0,
            },
            kind: FFEffectKind::Constant {
                level,
                envelope: FFEnvelope {
                    attack_length: 0,
                    attack_level: 0,
                    fade_length: 0,
                    fade_level: 0,
                },
            },
        }
    }
}

impl WheelDriver for G29Wheel {
    fn get_state(&mut self) -> Result<WheelState, WheelError> {
        let abs = self.device.get_abs_state().map_err(WheelError::DeviceError)?;
        let raw = abs[AbsoluteAxisCode::ABS_X.0 as usize].value as f64;

        let steering = lin_map(self.axis_range, (-1.0, 1.0), raw).clamp(-1.0, 1.0);

        let buttons = self
            .device
            .get_key_state()
            .map_err(WheelError::DeviceError)?
            .iter()
            .map(|k| k.code())
            .collect();

        Ok(WheelState { steering, buttons })
    }

    fn set_force(&mut self, force: f64) -> Result<(), WheelError> {
        if !(0.0..=1.0).contains(&force) {
            return Err(WheelError::InvalidForce(force))
        }

        let mut level = lin_map((0.0, 1.0), (-MAX_LEVEL, MAX_LEVEL), force);
        if self.invert_force {
            level = -level;
        }

        self.effect
            .update(Self::constant_effect(level.round() as i16))
            .map_err(WheelError::DeviceError)
    }

    fn stop_force(&mut self) -> Result<(), WheelError> {
        self.effect
            .update(Self::constant_effect(0))
            .map_err(WheelError::DeviceError)
    }
}
