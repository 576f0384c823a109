//! # Reference Line
//!
//! The reference (AB) line from which the family of guide lines is generated. Guide lines are
//! all parallel to the reference line and spaced by the working width.
//!
//! On disk the line is stored as plain text, `direction,offset`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, str::FromStr};

use util::maths::fold_half_turn_deg;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A reference line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLine {
    /// Direction of the line counter-clockwise from the world X axis.
    ///
    /// Units: degrees, in the range [0, 180)
    pub direction_deg: f64,

    /// Distance of the line from the world origin along the line's normal.
    ///
    /// Units: meters
    pub offset_m: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RefLineError {
    #[error("Could not read the reference line file: {0}")]
    ReadError(std::io::Error),

    #[error("Could not write the reference line file: {0}")]
    WriteError(std::io::Error),

    #[error("Expected \"direction,offset\", found \"{0}\"")]
    Malformed(String),

    #[error("Invalid number in reference line: {0}")]
    InvalidNumber(std::num::ParseFloatError),

    #[error("Reference line values must be finite, found {0},{1}")]
    NonFinite(f64, f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ReferenceLine {
    /// Create a new line, folding the direction into [0, 180).
    pub fn new(direction_deg: f64, offset_m: f64) -> Self {
        Self {
            direction_deg: fold_half_turn_deg(direction_deg),
            offset_m,
        }
    }

    /// Unit vector along the line.
    pub fn unit(&self) -> Vector2<f64> {
        let d = self.direction_deg.to_radians();
        Vector2::new(d.cos(), d.sin())
    }

    /// Unit normal of the line, the unit vector rotated a quarter turn counter-clockwise.
    pub fn normal(&self) -> Vector2<f64> {
        let d = self.direction_deg.to_radians();
        Vector2::new(-d.sin(), d.cos())
    }

    /// Load a line from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RefLineError> {
        fs::read_to_string(path)
            .map_err(RefLineError::ReadError)?
            .parse()
    }

    /// Save the line to a file, replacing any existing one.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RefLineError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(RefLineError::WriteError)?;
            }
        }

        fs::write(path, self.to_string()).map_err(RefLineError::WriteError)
    }
}

impl std::fmt::Display for ReferenceLine {
    /// `f64`'s `Display` is the shortest string that parses back to the same value, so a saved
    /// line loads back exactly.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.direction_deg, self.offset_m)
    }
}

impl FromStr for ReferenceLine {
    type Err = RefLineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let mut fields = s.split(',');
        let (dir, offset) = match (fields.next(), fields.next(), fields.next()) {
            (Some(d), Some(o), None) => (d.trim(), o.trim()),
            _ => return Err(RefLineError::Malformed(s.to_string()))
        };

        let dir: f64 = dir.parse().map_err(RefLineError::InvalidNumber)?;
        let offset: f64 = offset.parse().map_err(RefLineError::InvalidNumber)?;

        if !dir.is_finite() || !offset.is_finite() {
            return Err(RefLineError::NonFinite(dir, offset))
        }

        Ok(Self::new(dir, offset))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip_exact() {
        let lines = [
            ReferenceLine::new(0.0, 0.0),
            ReferenceLine::new(37.123456789012345, -1234.5678901234567),
            ReferenceLine::new(179.99999999999997, 0.1 + 0.2),
            ReferenceLine::new(1e-300, 6.02214076e23),
        ];

        for line in lines.iter() {
            let parsed: ReferenceLine = line.to_string().parse().unwrap();
            assert_eq!(parsed.direction_deg.to_bits(), line.direction_deg.to_bits());
            assert_eq!(parsed.offset_m.to_bits(), line.offset_m.to_bits());
        }
    }

    #[test]
    fn test_save_load() {
        let path = std::env::temp_dir().join(format!("ref_line_{}.txt", std::process::id()));
        let line = ReferenceLine::new(123.456, -7.891);

        line.save(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "123.456,-7.891");
        assert_eq!(ReferenceLine::load(&path).unwrap(), line);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("".parse::<ReferenceLine>(), Err(RefLineError::Malformed(_))));
        assert!(matches!("1.0".parse::<ReferenceLine>(), Err(RefLineError::Malformed(_))));
        assert!(matches!("1,2,3".parse::<ReferenceLine>(), Err(RefLineError::Malformed(_))));
        assert!(matches!("a,2".parse::<ReferenceLine>(), Err(RefLineError::InvalidNumber(_))));
        assert!(matches!("NaN,2".parse::<ReferenceLine>(), Err(RefLineError::NonFinite(..))));

        // Surrounding whitespace and a trailing newline are fine
        assert_eq!(
            " 45.5 , 3\n".parse::<ReferenceLine>().unwrap(),
            ReferenceLine::new(45.5, 3.0)
        );
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ReferenceLine::load("/nonexistent/ref_line.txt"),
            Err(RefLineError::ReadError(_))
        ));
    }

    #[test]
    fn test_vectors() {
        let line = ReferenceLine::new(90.0, 0.0);

        assert!((line.unit() - Vector2::new(0.0, 1.0)).norm() < 1e-12);
        assert!((line.normal() - Vector2::new(-1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_direction_folded() {
        assert_eq!(ReferenceLine::new(270.0, 0.0).direction_deg, 90.0);
        assert_eq!(ReferenceLine::new(-45.0, 0.0).direction_deg, 135.0);
    }
}
