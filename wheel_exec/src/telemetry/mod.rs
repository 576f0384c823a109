//! # Telemetry Module
//!
//! The simulator writes vehicle state into its log file as lines tagged with a marker. This
//! module parses those lines into [`Telemetry`] snapshots and keeps the latest one in a
//! [`TelemetryCell`] which the sync server reads when building replies.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Log file follower feeding the telemetry cell.
pub mod log_tail;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::sync::{ImplementMsg, PoseMsg};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single telemetry snapshot as written by the simulator.
///
/// Positions are in metres in the simulator's ground plane (`x`, `z`) and rotations are in
/// degrees, with 0 facing the ground plane's negative second axis.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Telemetry {
    pub vx: f64,
    pub vz: f64,
    pub vry: f64,

    pub tx: f64,
    pub tz: f64,
    #[serde(rename = "try")]
    pub t_ry: f64,

    pub on: bool,
    pub lowered: bool,

    /// Working width of the implement, may be zero or missing if the simulator doesn't know it
    pub width: Option<f64>,
}

/// Latest-value cell shared between the log follower (writer) and the sync server (reader).
#[derive(Debug, Clone, Default)]
pub struct TelemetryCell {
    inner: Arc<Mutex<Option<Telemetry>>>,
}

/// Parser for tagged telemetry lines.
pub struct LineParser {
    marker: String,

    payload_re: Regex,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("Telemetry line has no payload")]
    NoPayload,

    #[error("Could not parse telemetry payload: {0}")]
    PayloadError(serde_json::Error),

    #[error("Could not open the telemetry log: {0}")]
    OpenError(std::io::Error),

    #[error("Could not read the telemetry log: {0}")]
    ReadError(std::io::Error),

    #[error("Invalid payload pattern: {0}")]
    InvalidPattern(regex::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            vx: 0.0,
            vz: 0.0,
            vry: 0.0,
            tx: 0.0,
            tz: 0.0,
            t_ry: 0.0,
            on: false,
            lowered: true,
            width: None,
        }
    }
}

impl Telemetry {
    /// Convert a simulator rotation in degrees into a heading counter-clockwise from the X axis.
    pub fn heading_rad(rot_deg: f64) -> f64 {
        (rot_deg - 90.0).to_radians()
    }

    pub fn vehicle_pose(&self) -> PoseMsg {
        PoseMsg {
            x: self.vx,
            y: self.vz,
            heading_rad: Self::heading_rad(self.vry),
        }
    }

    pub fn tool_pose(&self) -> PoseMsg {
        PoseMsg {
            x: self.tx,
            y: self.tz,
            heading_rad: Self::heading_rad(self.t_ry),
        }
    }

    /// Implement state, where a width that can't be used for spacing guide lines is reported as
    /// unknown.
    pub fn implement(&self) -> ImplementMsg {
        ImplementMsg {
            on: self.on,
            lowered: self.lowered,
            working_width_m: self.width.filter(|w| w.is_finite() && *w > 0.0),
        }
    }
}

impl TelemetryCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest snapshot.
    pub fn set(&self, telem: Telemetry) {
        // A poisoned lock still holds a valid Option<Telemetry>, so keep going with it
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        *guard = Some(telem);
    }

    /// Get a copy of the latest snapshot, or `None` if no telemetry has been received yet.
    pub fn get(&self) -> Option<Telemetry> {
        match self.inner.lock() {
            Ok(g) => *g,
            Err(p) => *p.into_inner(),
        }
    }
}

impl LineParser {
    pub fn new(marker: &str) -> Result<Self, TelemetryError> {
        Ok(Self {
            marker: marker.to_string(),
            // Everything from the first opening brace to the last closing brace
            payload_re: Regex::new(r"\{.*\}").map_err(TelemetryError::InvalidPattern)?,
        })
    }

    /// Parse a log line.
    ///
    /// Returns `Ok(None)` if the line isn't a telemetry line.
    pub fn parse_line(&self, line: &str) -> Result<Option<Telemetry>, TelemetryError> {
        // Payload starts at the first brace after the marker
        let start = match line.find(&self.marker) {
            Some(i) => i,
            None => return Ok(None),
        };

        let payload = self.payload_re
            .find(&line[start..])
            .ok_or(TelemetryError::NoPayload)?
            .as_str()
            .replace('\'', "\"");

        serde_json::from_str(&payload)
            .map(Some)
            .map_err(TelemetryError::PayloadError)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const LINE: &str = "2023-05-01 12:00:00 TopconX35 {'vx': 12.5, 'vz': -3.25, 'vry': 90.0, \
        'tx': 10.0, 'tz': -3.0, 'try': 180.0, 'on': true, 'lowered': false, 'width': 6.0}";

    #[test]
    fn test_parse_line() {
        let parser = LineParser::new("TopconX35").unwrap();

        let t = parser.parse_line(LINE).unwrap().unwrap();

        assert_eq!(t.vx, 12.5);
        assert_eq!(t.vz, -3.25);
        assert_eq!(t.t_ry, 180.0);
        assert!(t.on);
        assert!(!t.lowered);
        assert_eq!(t.width, Some(6.0));

        let pose = t.vehicle_pose();
        assert_eq!(pose.x, 12.5);
        assert_eq!(pose.y, -3.25);
        assert!(pose.heading_rad.abs() < 1e-12);

        let tool = t.tool_pose();
        assert!((tool.heading_rad - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_other_lines_ignored() {
        let parser = LineParser::new("TopconX35").unwrap();

        assert!(parser.parse_line("Info: loading map {'a': 1}").unwrap().is_none());
        assert!(parser.parse_line("").unwrap().is_none());
    }

    #[test]
    fn test_malformed_lines() {
        let parser = LineParser::new("TopconX35").unwrap();

        assert!(matches!(
            parser.parse_line("TopconX35 no payload"),
            Err(TelemetryError::NoPayload)
        ));
        assert!(matches!(
            parser.parse_line("TopconX35 {'vx': 1.0,"),
            Err(TelemetryError::NoPayload)
        ));
        assert!(matches!(
            parser.parse_line("TopconX35 {'vx': oops}"),
            Err(TelemetryError::PayloadError(_))
        ));
    }

    #[test]
    fn test_missing_fields_default() {
        let parser = LineParser::new("TopconX35").unwrap();

        let t = parser.parse_line("TopconX35 {'vx': 1.0}").unwrap().unwrap();

        assert_eq!(t.vx, 1.0);
        assert!(t.lowered);
        assert_eq!(t.implement().working_width_m, None);
    }

    #[test]
    fn test_unusable_width_is_unknown() {
        let mut t = Telemetry::default();

        t.width = Some(0.0);
        assert_eq!(t.implement().working_width_m, None);
        t.width = Some(-4.0);
        assert_eq!(t.implement().working_width_m, None);
        t.width = Some(8.5);
        assert_eq!(t.implement().working_width_m, Some(8.5));
    }

    #[test]
    fn test_cell() {
        let cell = TelemetryCell::new();
        assert!(cell.get().is_none());

        let reader = cell.clone();
        cell.set(Telemetry { vx: 4.0, ..Default::default() });

        assert_eq!(reader.get().map(|t| t.vx), Some(4.0));
    }
}
