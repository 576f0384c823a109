//! # Guidance Executable Parameters
//!
//! This module provide parameters for the guidance executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::path::PathBuf;

use crate::guidance;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GuideExecParams {

    /// Target period of the main cycle
    pub cycle_period_ms: u64,

    /// File the reference line is loaded from and saved to, relative paths are resolved against
    /// the software root
    pub ref_line_path: PathBuf,

    /// Working width to use instead of the one reported by the vehicle
    #[serde(default)]
    pub width_override_m: Option<f64>,

    /// File the operator console history is kept in
    #[serde(default)]
    pub console_history_path: Option<PathBuf>,

    /// Parameters for the guidance engine
    pub guidance: guidance::Params,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_params_parse() {
        let params: GuideExecParams = util::params::from_toml_str(
            include_str!("../../params/guide_exec.toml")
        ).unwrap();

        assert_eq!(params.guidance.default_width_m, 6.0);
        assert_eq!(params.guidance.max_command, 0.9);
        assert!(params.width_override_m.is_none());
    }
}
