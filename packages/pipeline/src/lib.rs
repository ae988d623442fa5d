#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! The aggregation-and-prediction pipeline.
//!
//! Turns raw weekly trap records into per-geography-per-year summaries,
//! folds in external spot counts, materializes cross-year lookback fields,
//! derives readiness indicators, and invokes the R outbreak model. Every
//! stage is written once over [`GeographyAxis`] and instantiated for both
//! the county and ranger-district axes; the two axes run concurrently while
//! stages within an axis run strictly in dependency order.
//!
//! [`GeographyAxis`]: pine_beetle_database_models::GeographyAxis

pub mod aggregate;
pub mod calculated;
pub mod indicators;
pub mod offset;
pub mod orchestrator;
pub mod predictions;
pub mod spots;

pub use aggregate::ROUND_EPSILON;
pub use orchestrator::{
    AxisRunSummary, DEFAULT_CUTOFF_YEAR, PipelineRunSummary, run_all, run_state_year,
};
pub use predictions::CLERIDST1_DEFAULT;

use pine_beetle_rmodel::ModelError;
use thiserror::Error;

/// Errors that can occur while running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Store operation failed.
    #[error("Database error: {0}")]
    Database(#[from] pine_beetle_database::DbError),

    /// External model invocation failed.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Caller-supplied input was invalid.
    #[error("Bad request: {message}")]
    BadRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A referenced geography-year does not exist.
    #[error("Not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },
}

impl PipelineError {
    /// Machine-readable error category, mirroring the response-type taxonomy
    /// callers key on.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } | Self::Model(ModelError::InvalidInput { .. }) => {
                "BAD_REQUEST"
            }
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Database(_) | Self::Model(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_model_input_is_bad_request() {
        let err = PipelineError::Model(ModelError::InvalidInput {
            index: 0,
            reason: "SPB is negative".to_string(),
        });
        assert_eq!(err.category(), "BAD_REQUEST");
    }

    #[test]
    fn result_count_mismatch_is_internal() {
        let err = PipelineError::Model(ModelError::ResultCount {
            expected: 2,
            actual: 1,
        });
        assert_eq!(err.category(), "INTERNAL_ERROR");
    }

    #[test]
    fn not_found_category() {
        let err = PipelineError::NotFound {
            message: "no such geography-year".to_string(),
        };
        assert_eq!(err.category(), "NOT_FOUND");
    }
}
