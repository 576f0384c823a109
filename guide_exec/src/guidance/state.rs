//! Implementations for the Guidance state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, trace};
use nalgebra::Vector2;
use serde::Serialize;

// Internal
use super::{GuidanceError, Params, Pose, ReferenceLine};
use util::{maths::wrap_deg_360, module::State};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// A and B points closer than this don't define a direction.
const MIN_AB_SEPARATION_M: f64 = 1e-6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Guidance module state
#[derive(Debug, Default)]
pub struct GuidanceEngine {

    pub(crate) params: Params,

    pub(crate) report: StatusReport,

    ref_line: Option<ReferenceLine>,

    /// First point of an AB capture in progress
    point_a: Option<Vector2<f64>>,

    autosteer: bool,

    command: Option<f64>,
}

/// Input data to Guidance.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputData {
    pub pose: Pose,

    /// Working width, substituted with the default if it isn't positive.
    ///
    /// Units: meters
    pub working_width_m: f64,
}

/// Status report for Guidance processing.
#[derive(Clone, Copy, Default, Serialize, Debug, PartialEq)]
pub struct StatusReport {
    /// Distance from the vehicle to the nearest guide line along the line normal.
    ///
    /// Units: meters
    pub cross_track_m: f64,

    /// Units: degrees, in [-90, 90]
    pub head_err_deg: f64,

    /// Index of the nearest guide line, 0 is the reference line itself
    pub line_index: i64,

    /// Distance of the vehicle along the line direction.
    ///
    /// Units: meters
    pub along_track_m: f64,

    /// -1 if the vehicle is travelling against the line direction, otherwise +1
    pub direction_sign: f64,

    /// Working width actually used
    pub width_m: f64,

    /// True if the default width had to be used
    pub width_substituted: bool,

    /// True if the command was clamped
    pub cmd_limited: bool,
}

/// Result of capturing a reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefPointResult {
    /// The A point was stored, waiting for B.
    ASet,

    /// The reference line now has the given direction in degrees.
    LineUpdated(f64),

    /// B was on top of A, the capture was abandoned.
    Degenerate,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl State for GuidanceEngine {
    type InitData = Params;
    type InitError = GuidanceError;

    type InputData = InputData;
    type OutputData = Option<f64>;
    type StatusReport = StatusReport;
    type ProcError = GuidanceError;

    /// Initialise the Guidance module.
    ///
    /// Expected init data is the parameters.
    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        validate_params(&init_data)?;

        self.params = init_data;

        Ok(())
    }

    /// Perform cyclic processing of Guidance.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let cmd = self.compute_command(&input_data.pose, input_data.working_width_m);

        Ok((cmd, self.report))
    }
}

impl GuidanceEngine {

    /// Create a new engine with the given parameters.
    pub fn new(params: Params) -> Result<Self, GuidanceError> {
        let mut engine = Self::default();
        engine.init(params)?;
        Ok(engine)
    }

    pub fn ref_line(&self) -> Option<&ReferenceLine> {
        self.ref_line.as_ref()
    }

    /// Replace the reference line, for instance with one loaded from disk.
    pub fn set_ref_line(&mut self, ref_line: Option<ReferenceLine>) {
        self.ref_line = ref_line;
    }

    /// The A point of an AB capture in progress.
    pub fn pending_point(&self) -> Option<Vector2<f64>> {
        self.point_a
    }

    pub fn is_autosteer_enabled(&self) -> bool {
        self.autosteer
    }

    pub fn set_autosteer(&mut self, enabled: bool) {
        if enabled != self.autosteer {
            info!("Autosteer {}", if enabled { "engaged" } else { "disengaged" });
        }
        self.autosteer = enabled;
    }

    /// The command produced on the last cycle.
    pub fn command(&self) -> Option<f64> {
        self.command
    }

    /// The status report from the last cycle.
    pub fn report(&self) -> &StatusReport {
        &self.report
    }

    /// Capture a point of the reference line.
    ///
    /// The first call stores A. The second call takes B, sets the line direction from A to B and
    /// clears A. The line's offset is kept, so the new direction pivots about the existing guide
    /// lines until the line is nudged.
    pub fn set_reference_point(&mut self, pos: Vector2<f64>) -> RefPointResult {
        let a = match self.point_a.take() {
            Some(a) => a,
            None => {
                debug!("A point set at ({:.2}, {:.2})", pos.x, pos.y);
                self.point_a = Some(pos);
                return RefPointResult::ASet
            }
        };

        let ab = pos - a;

        if ab.norm() < MIN_AB_SEPARATION_M {
            info!("A and B points coincide, no reference line set");
            return RefPointResult::Degenerate
        }

        let offset = self.ref_line.map(|l| l.offset_m).unwrap_or(0.0);
        let line = ReferenceLine::new(ab.y.atan2(ab.x).to_degrees(), offset);

        info!("Set {:.2} degree guide lines", line.direction_deg);

        self.ref_line = Some(line);

        RefPointResult::LineUpdated(line.direction_deg)
    }

    /// Shift the reference line sideways so that a guide line passes through `pos`.
    ///
    /// Returns false if there is no line to shift.
    pub fn nudge_to_reference_frame(&mut self, pos: Vector2<f64>) -> bool {
        match self.ref_line {
            Some(ref mut line) => {
                line.offset_m = pos.dot(&line.normal());
                info!("Guide lines nudged to offset {:.3} m", line.offset_m);
                true
            },
            None => false
        }
    }

    /// Compute the steering command for the given pose.
    ///
    /// Returns `None`, leaving the wheel uncommanded, if autosteer is disabled or there is no
    /// reference line.
    pub fn compute_command(&mut self, pose: &Pose, working_width_m: f64) -> Option<f64> {
        self.report = StatusReport::default();
        self.command = None;

        if !self.autosteer {
            return None
        }

        let line = self.ref_line?;

        let (width, width_substituted) = if working_width_m.is_finite() && working_width_m > 0.0 {
            (working_width_m, false)
        }
        else {
            (self.params.default_width_m, true)
        };

        let u = line.unit();
        let n = line.normal();

        // Find the nearest guide line
        let line_offset = pose.position_m.dot(&n);
        let along_track = pose.position_m.dot(&u);
        let index = ((line_offset - line.offset_m) / width).round();
        let target_offset = line.offset_m + index * width;

        // Positive when the guide line lies towards increasing normal offset
        let cross_track = target_offset - line_offset;

        let sign = direction_sign(pose.heading_rad.to_degrees(), line.direction_deg);

        let head_err_deg = -(pose.heading_rad - line.direction_deg.to_radians())
            .sin()
            .asin()
            .to_degrees();

        let raw_cmd = sign * (cross_track / width + head_err_deg / 90.0);
        let cmd = raw_cmd.clamp(-self.params.max_command, self.params.max_command);

        self.report = StatusReport {
            cross_track_m: cross_track,
            head_err_deg,
            line_index: index as i64,
            along_track_m: along_track,
            direction_sign: sign,
            width_m: width,
            width_substituted,
            cmd_limited: cmd != raw_cmd,
        };

        trace!("Guidance: {:?} -> {:.3}", self.report, cmd);

        self.command = Some(cmd);
        self.command
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Which way round steering acts, -1 when travelling against the line direction.
///
/// Exactly perpendicular headings count as travelling with the line.
fn direction_sign(heading_deg: f64, line_direction_deg: f64) -> f64 {
    let rel_deg = wrap_deg_360(heading_deg - line_direction_deg);

    if rel_deg > 90.0 && rel_deg < 270.0 { -1.0 } else { 1.0 }
}

fn validate_params(params: &Params) -> Result<(), GuidanceError> {
    if !params.default_width_m.is_finite() || params.default_width_m <= 0.0 {
        return Err(GuidanceError::InvalidDefaultWidth(params.default_width_m))
    }

    if !(0.0..=1.0).contains(&params.max_command) {
        return Err(GuidanceError::InvalidMaxCommand(params.max_command))
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    fn engine_with_line(direction_deg: f64, offset_m: f64) -> GuidanceEngine {
        let mut engine = GuidanceEngine::new(Params::default()).unwrap();
        engine.set_ref_line(Some(ReferenceLine::new(direction_deg, offset_m)));
        engine.set_autosteer(true);
        engine
    }

    #[test]
    fn test_nearest_line_scenario() {
        let mut engine = engine_with_line(0.0, 0.0);

        let cmd = engine.compute_command(&Pose::new(0.0, 3.1, 0.0), 6.0).unwrap();
        let report = engine.report();

        assert_eq!(report.line_index, 1);
        assert!((report.cross_track_m - 2.9).abs() < 1e-9);
        assert!(report.head_err_deg.abs() < 1e-9);
        assert!((cmd - 2.9 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_snaps_to_nearest_line() {
        let width = 6.0;

        for &offset in &[-20.0, -9.1, -3.0, -0.5, 0.0, 2.9, 3.1, 8.99, 14.0, 100.0] {
            let mut engine = engine_with_line(0.0, 0.0);
            engine.compute_command(&Pose::new(5.0, offset, 0.0), width);
            let report = engine.report();

            let expected = (offset / width).round();
            assert_eq!(report.line_index, expected as i64, "offset {}", offset);
            assert!(
                (report.cross_track_m - (expected * width - offset)).abs() < 1e-9,
                "offset {}", offset
            );
            assert!(report.cross_track_m.abs() <= width / 2.0 + 1e-9);
        }
    }

    #[test]
    fn test_offset_line() {
        let mut engine = engine_with_line(90.0, 2.0);

        // Normal of a 90 degree line is -X, so x = -9 is 9 m along the normal
        engine.compute_command(&Pose::new(-9.0, 0.0, PI / 2.0), 6.0);

        assert_eq!(engine.report().line_index, 1);
        assert!((engine.report().cross_track_m - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_no_command_without_autosteer_or_line() {
        let mut engine = engine_with_line(0.0, 0.0);
        assert!(engine.compute_command(&Pose::new(0.0, 1.0, 0.0), 6.0).is_some());

        engine.set_autosteer(false);
        assert!(engine.compute_command(&Pose::new(0.0, 1.0, 0.0), 6.0).is_none());
        assert!(engine.command().is_none());

        let mut engine = GuidanceEngine::new(Params::default()).unwrap();
        engine.set_autosteer(true);
        assert!(engine.compute_command(&Pose::new(0.0, 1.0, 0.0), 6.0).is_none());
    }

    #[test]
    fn test_command_clamped() {
        let mut engine = engine_with_line(0.0, 0.0);

        // Far off the line and pointing the wrong way
        let cmd = engine.compute_command(&Pose::new(0.0, -2.9, -PI / 3.0), 6.0).unwrap();
        assert_eq!(cmd, 0.9);
        assert!(engine.report().cmd_limited);

        let cmd = engine.compute_command(&Pose::new(0.0, 2.9, PI / 3.0), 6.0).unwrap();
        assert_eq!(cmd, -0.9);

        for i in 0..100 {
            let h = i as f64 * 0.37;
            let y = i as f64 * 0.91 - 40.0;
            let cmd = engine.compute_command(&Pose::new(1.0, y, h), 6.0).unwrap();
            assert!(cmd.abs() <= 0.9);
        }
    }

    #[test]
    fn test_direction_sign_flips() {
        let mut engine = engine_with_line(0.0, 0.0);

        let forward = engine.compute_command(&Pose::new(0.0, 3.1, 0.0), 6.0).unwrap();
        assert_eq!(engine.report().direction_sign, 1.0);

        let backward = engine.compute_command(&Pose::new(0.0, 3.1, PI), 6.0).unwrap();
        assert_eq!(engine.report().direction_sign, -1.0);

        assert!((forward + backward).abs() < 1e-9);
    }

    #[test]
    fn test_sign_boundaries() {
        // Exactly perpendicular keeps the positive sign
        assert_eq!(direction_sign(90.0, 0.0), 1.0);
        assert_eq!(direction_sign(270.0, 0.0), 1.0);
        assert_eq!(direction_sign(130.0, 40.0), 1.0);

        assert_eq!(direction_sign(90.5, 0.0), -1.0);
        assert_eq!(direction_sign(269.5, 0.0), -1.0);
        assert_eq!(direction_sign(-90.5, 0.0), -1.0);
        assert_eq!(direction_sign(-89.5, 0.0), 1.0);
        assert_eq!(direction_sign(10.0, 170.0), -1.0);
    }

    #[test]
    fn test_heading_error() {
        let mut engine = engine_with_line(30.0, 0.0);

        engine.compute_command(&Pose::new(0.0, 0.0, 40f64.to_radians()), 6.0);
        assert!((engine.report().head_err_deg - (-10.0)).abs() < 1e-9);

        // Travelling the other way along the line the error is still measured against it
        engine.compute_command(&Pose::new(0.0, 0.0, 220f64.to_radians()), 6.0);
        assert!((engine.report().head_err_deg - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_width_substituted() {
        for &w in &[0.0, -3.0, f64::NAN, f64::INFINITY] {
            let mut engine = engine_with_line(0.0, 0.0);
            let cmd = engine.compute_command(&Pose::new(0.0, 3.1, 0.0), w).unwrap();

            assert!(cmd.is_finite());
            assert!(engine.report().width_substituted);
            assert_eq!(engine.report().width_m, 6.0);
        }
    }

    #[test]
    fn test_ab_capture() {
        let mut engine = GuidanceEngine::new(Params::default()).unwrap();

        assert_eq!(engine.set_reference_point(Vector2::new(10.0, 10.0)), RefPointResult::ASet);
        assert!(engine.ref_line().is_none());

        // Pointing down and to the left folds onto the same line as up and to the right
        match engine.set_reference_point(Vector2::new(0.0, 0.0)) {
            RefPointResult::LineUpdated(d) => assert!((d - 45.0).abs() < 1e-9),
            r => panic!("Unexpected result {:?}", r),
        }
        assert!(engine.pending_point().is_none());
        assert_eq!(engine.ref_line().unwrap().offset_m, 0.0);

        // New capture keeps the offset
        engine.nudge_to_reference_frame(Vector2::new(0.0, 5.0));
        let offset = engine.ref_line().unwrap().offset_m;
        engine.set_reference_point(Vector2::new(0.0, 0.0));
        match engine.set_reference_point(Vector2::new(0.0, -4.0)) {
            RefPointResult::LineUpdated(d) => assert!((d - 90.0).abs() < 1e-9),
            r => panic!("Unexpected result {:?}", r),
        }
        assert_eq!(engine.ref_line().unwrap().offset_m, offset);
    }

    #[test]
    fn test_ab_degenerate() {
        let mut engine = engine_with_line(20.0, 1.0);
        let before = *engine.ref_line().unwrap();

        engine.set_reference_point(Vector2::new(3.0, 3.0));
        assert_eq!(
            engine.set_reference_point(Vector2::new(3.0, 3.0)),
            RefPointResult::Degenerate
        );

        assert_eq!(*engine.ref_line().unwrap(), before);
        assert!(engine.pending_point().is_none());
    }

    #[test]
    fn test_nudge() {
        let mut engine = GuidanceEngine::new(Params::default()).unwrap();
        assert!(!engine.nudge_to_reference_frame(Vector2::new(1.0, 2.0)));

        engine.set_ref_line(Some(ReferenceLine::new(30.0, 0.0)));
        engine.set_autosteer(true);

        let pos = Vector2::new(12.3, -4.5);
        assert!(engine.nudge_to_reference_frame(pos));
        assert_eq!(engine.ref_line().unwrap().direction_deg, 30.0);

        // The vehicle is now on a guide line
        engine.compute_command(&Pose::new(pos.x, pos.y, 30f64.to_radians()), 6.0);
        assert_eq!(engine.report().line_index, 0);
        assert!(engine.report().cross_track_m.abs() < 1e-9);
    }

    #[test]
    fn test_proc() {
        let mut engine = GuidanceEngine::default();
        engine.init(Params::default()).unwrap();
        engine.set_ref_line(Some(ReferenceLine::new(0.0, 0.0)));
        engine.set_autosteer(true);

        let (cmd, report) = engine.proc(&InputData {
            pose: Pose::new(0.0, 3.1, 0.0),
            working_width_m: 6.0,
        }).unwrap();

        assert!(cmd.is_some());
        assert_eq!(report.line_index, 1);
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            GuidanceEngine::new(Params { default_width_m: 0.0, ..Default::default() }),
            Err(GuidanceError::InvalidDefaultWidth(_))
        ));
        assert!(matches!(
            GuidanceEngine::new(Params { max_command: 1.5, ..Default::default() }),
            Err(GuidanceError::InvalidMaxCommand(_))
        ));
    }
}
