#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Subprocess bridge to the R statistical runtime.
//!
//! The outbreak model and the calculated-fields script are opaque R
//! programs. This crate spawns `Rscript`, pipes a JSON payload over
//! standard input (command-line arguments and environment variables are
//! kernel-bounded in size; a full yearly batch is not), and parses the JSON
//! the script prints to standard output. Any stderr output is fatal.

pub mod launcher;
pub mod model;

use std::path::PathBuf;
use std::time::Duration;

pub use launcher::{RLauncherConfig, RLauncherError, call_r_script};
pub use model::{
    CalculatedFieldsInput, CalculatedFieldsOutput, ModelError, ModelInput, ModelPrediction,
    run_calculated_fields, run_model,
};

/// Default wall-clock budget for one R invocation before the process is
/// killed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Locations of the R scripts the pipeline invokes.
///
/// Passed explicitly at call time; there is no module-level default state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Launcher / process settings.
    pub launcher: RLauncherConfig,
    /// The outbreak prediction script.
    pub prediction_script: PathBuf,
    /// The calculated diagnostic fields script.
    pub calculated_fields_script: PathBuf,
}

impl ModelConfig {
    /// Builds a config from environment variables, falling back to the
    /// conventional `r-scripts/` layout next to the binary.
    ///
    /// Recognized variables: `RSCRIPT_BIN`, `R_LAUNCHER_SCRIPT`,
    /// `R_PREDICTION_SCRIPT`, `R_CALCULATED_FIELDS_SCRIPT`,
    /// `R_MODEL_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        let timeout = std::env::var("R_MODEL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        Self {
            launcher: RLauncherConfig {
                rscript_bin: env_path("RSCRIPT_BIN", "Rscript"),
                launcher_script: env_path("R_LAUNCHER_SCRIPT", "r-scripts/launch.R"),
                timeout,
            },
            prediction_script: env_path("R_PREDICTION_SCRIPT", "r-scripts/SPB-Predictions.v02.R"),
            calculated_fields_script: env_path(
                "R_CALCULATED_FIELDS_SCRIPT",
                "r-scripts/SPB-Calculated-Fields.v01.R",
            ),
        }
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}
