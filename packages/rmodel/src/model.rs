//! Batch runners for the outbreak prediction and calculated-fields scripts.
//!
//! Rows are sent to R in one batch per call (per-row invocations would pay
//! the interpreter startup cost hundreds of times over a full pipeline run).
//! The scripts preserve input order 1:1, so callers map results back to
//! their originating rows by position.

use serde::{Deserialize, Serialize};

use crate::launcher::{RLauncherError, call_r_script};
use crate::ModelConfig;

/// One input row for the prediction script, exactly the fields the script
/// reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelInput {
    /// SPB per trap per two weeks.
    #[serde(rename = "SPB")]
    pub spb: f64,
    /// Clerids per two weeks one year prior (77 when unknown).
    pub cleridst1: f64,
    /// Spots one year prior.
    pub spotst1: f64,
    /// Spots two years prior.
    pub spotst2: f64,
    /// Endobrev regime (0/1).
    pub endobrev: i32,
}

impl ModelInput {
    /// Checks that every field is a usable model input: numeric fields must
    /// be finite and nothing may be negative.
    fn validate(&self) -> Result<(), String> {
        let numeric = [
            ("SPB", self.spb),
            ("cleridst1", self.cleridst1),
            ("spotst1", self.spotst1),
            ("spotst2", self.spotst2),
        ];
        for (name, value) in numeric {
            if !value.is_finite() {
                return Err(format!("{name} is not a number"));
            }
            if value < 0.0 {
                return Err(format!("{name} is negative"));
            }
        }
        if self.endobrev < 0 {
            return Err("endobrev is negative".to_string());
        }
        Ok(())
    }
}

/// One result row from the prediction script.
///
/// `exp_spots_if_outbreak` stays raw here; rounding (and the
/// null-when-non-numeric rule) is applied where the value is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    /// Zero-inflation parameter.
    #[serde(default)]
    pub pi: Option<f64>,
    /// Outbreak-size parameter.
    #[serde(default)]
    pub mu: Option<f64>,
    /// Expected spots if an outbreak occurs.
    #[serde(rename = "expSpotsIfOutbreak", default)]
    pub exp_spots_if_outbreak: Option<f64>,
    /// Probability of more than 0 spots.
    #[serde(rename = "probSpotsGT0", default)]
    pub prob_spots_gt0: Option<f64>,
    /// Probability of more than 20 spots.
    #[serde(rename = "probSpotsGT20", default)]
    pub prob_spots_gt20: Option<f64>,
    /// Probability of more than 50 spots.
    #[serde(rename = "probSpotsGT50", default)]
    pub prob_spots_gt50: Option<f64>,
    /// Probability of more than 150 spots.
    #[serde(rename = "probSpotsGT150", default)]
    pub prob_spots_gt150: Option<f64>,
    /// Probability of more than 400 spots.
    #[serde(rename = "probSpotsGT400", default)]
    pub prob_spots_gt400: Option<f64>,
    /// Probability of more than 1000 spots.
    #[serde(rename = "probSpotsGT1000", default)]
    pub prob_spots_gt1000: Option<f64>,
}

/// One input row for the calculated-fields script.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedFieldsInput {
    /// SPB per trap per two weeks.
    pub spb_per2_weeks: Option<f64>,
    /// Clerids per trap per two weeks.
    pub clerids_per2_weeks: Option<f64>,
    /// Spots observed this year.
    pub spotst0: Option<i64>,
    /// Model probability of more than 50 spots.
    #[serde(rename = "probSpotsGT50")]
    pub prob_spots_gt50: Option<f64>,
    /// Endobrev regime (0/1).
    pub endobrev: Option<i32>,
}

/// One result row from the calculated-fields script. Field spellings match
/// the column labels the script emits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalculatedFieldsOutput {
    /// `ln(spbPer2Weeks + 1)`.
    #[serde(rename = "ln(spbPer2Weeks+1)", default)]
    pub ln_spb_per2_weeks: Option<f64>,
    /// `ln(cleridsPer2Weeks + 1)`.
    #[serde(rename = "ln(cleridsPer2Weeks+1)", default)]
    pub ln_clerids_per2_weeks: Option<f64>,
    /// `ln(spotst0 + 1)`.
    #[serde(rename = "ln(spotst0+1)", default)]
    pub ln_spotst0: Option<f64>,
    /// `logit(probSpotsGT50)`.
    #[serde(rename = "logit(Prob>50)", default)]
    pub logit_prob_gt50: Option<f64>,
    /// Predicted spots in log units.
    #[serde(rename = "predSpotslogUnits", default)]
    pub pred_spots_log_units: Option<f64>,
    /// Predicted spots back-transformed to original units.
    #[serde(rename = "predSpotsorigUnits", default)]
    pub pred_spots_orig_units: Option<f64>,
    /// Observed minus predicted spots in log units.
    #[serde(rename = "residualSpotslogUnits", default)]
    pub residual_spots_log_units: Option<f64>,
}

/// Errors from the batch model runners.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Subprocess-level failure.
    #[error(transparent)]
    Launcher(#[from] RLauncherError),

    /// A row failed input validation; the whole batch is rejected before
    /// any subprocess is spawned.
    #[error("Invalid model input at row {index}: {reason}")]
    InvalidInput {
        /// Zero-based index of the offending row.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The script returned a different number of rows than it was given.
    #[error("R model returned {actual} rows for {expected} inputs")]
    ResultCount {
        /// Number of input rows sent.
        expected: usize,
        /// Number of result rows received.
        actual: usize,
    },

    /// Payload serialization failure.
    #[error("Failed to serialize model payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Validates all rows up front, returning a whole-batch error on the first
/// bad one.
fn validate_batch(inputs: &[ModelInput]) -> Result<(), ModelError> {
    for (index, input) in inputs.iter().enumerate() {
        input
            .validate()
            .map_err(|reason| ModelError::InvalidInput { index, reason })?;
    }
    Ok(())
}

/// Runs the outbreak prediction script over one batch of inputs.
///
/// An empty batch resolves immediately without spawning a subprocess. The
/// returned vector is index-aligned with `inputs`.
///
/// # Errors
///
/// Returns [`ModelError::InvalidInput`] if any row is negative or
/// non-finite (the whole batch is rejected), or a launcher error if the R
/// process fails.
pub async fn run_model(
    config: &ModelConfig,
    inputs: &[ModelInput],
) -> Result<Vec<ModelPrediction>, ModelError> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    validate_batch(inputs)?;

    let data = serde_json::to_value(inputs)?;
    let result = call_r_script(&config.launcher, &config.prediction_script, &[data]).await?;

    let predictions: Vec<ModelPrediction> = serde_json::from_value(result)
        .map_err(RLauncherError::Parse)
        .map_err(ModelError::Launcher)?;

    if predictions.len() != inputs.len() {
        return Err(ModelError::ResultCount {
            expected: inputs.len(),
            actual: predictions.len(),
        });
    }

    Ok(predictions)
}

/// Runs the calculated-fields script over one batch of inputs.
///
/// # Errors
///
/// Returns [`ModelError`] if the R process fails or the result count does
/// not match the input count.
pub async fn run_calculated_fields(
    config: &ModelConfig,
    inputs: &[CalculatedFieldsInput],
) -> Result<Vec<CalculatedFieldsOutput>, ModelError> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let data = serde_json::to_value(inputs)?;
    let result = call_r_script(
        &config.launcher,
        &config.calculated_fields_script,
        &[data],
    )
    .await?;

    let outputs: Vec<CalculatedFieldsOutput> = serde_json::from_value(result)
        .map_err(RLauncherError::Parse)
        .map_err(ModelError::Launcher)?;

    if outputs.len() != inputs.len() {
        return Err(ModelError::ResultCount {
            expected: inputs.len(),
            actual: outputs.len(),
        });
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn input(spb: f64, cleridst1: f64) -> ModelInput {
        ModelInput {
            spb,
            cleridst1,
            spotst1: 1.0,
            spotst2: 0.0,
            endobrev: 1,
        }
    }

    #[test]
    fn wire_field_names() {
        let json = serde_json::to_value(input(5.0, 3.0)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "SPB": 5.0,
                "cleridst1": 3.0,
                "spotst1": 1.0,
                "spotst2": 0.0,
                "endobrev": 1,
            })
        );
    }

    #[test]
    fn valid_batch_passes() {
        assert!(validate_batch(&[input(5.0, 3.0), input(0.0, 77.0)]).is_ok());
    }

    #[test]
    fn negative_value_rejects_whole_batch() {
        let err = validate_batch(&[input(5.0, 3.0), input(-1.0, 3.0)]).unwrap_err();
        match err {
            ModelError::InvalidInput { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("SPB"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nan_rejects_whole_batch() {
        let err = validate_batch(&[input(5.0, f64::NAN)]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidInput { index: 0, .. }));
    }

    #[test]
    fn prediction_parses_r_output() {
        let raw = serde_json::json!([{
            "pi": 0.1,
            "mu": 2.0,
            "expSpotsIfOutbreak": 12.6,
            "probSpotsGT0": 0.9,
            "probSpotsGT20": 0.5,
            "probSpotsGT50": 0.25,
            "probSpotsGT150": 0.1,
            "probSpotsGT400": 0.02,
            "probSpotsGT1000": 0.001,
        }]);

        let parsed: Vec<ModelPrediction> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].pi, Some(0.1));
        assert_eq!(parsed[0].exp_spots_if_outbreak, Some(12.6));
        assert_eq!(parsed[0].prob_spots_gt1000, Some(0.001));
    }

    #[test]
    fn prediction_tolerates_null_fields() {
        let parsed: Vec<ModelPrediction> =
            serde_json::from_value(serde_json::json!([{"pi": null, "mu": 2.0}])).unwrap();
        assert_eq!(parsed[0].pi, None);
        assert_eq!(parsed[0].exp_spots_if_outbreak, None);
    }

    #[test]
    fn calculated_fields_parse_script_labels() {
        let raw = serde_json::json!([{
            "ln(spbPer2Weeks+1)": 2.3,
            "ln(cleridsPer2Weeks+1)": 1.1,
            "ln(spotst0+1)": 0.7,
            "logit(Prob>50)": -1.1,
            "predSpotslogUnits": 1.9,
            "predSpotsorigUnits": 5.7,
            "residualSpotslogUnits": -1.2,
        }]);

        let parsed: Vec<CalculatedFieldsOutput> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed[0].ln_spb_per2_weeks, Some(2.3));
        assert_eq!(parsed[0].logit_prob_gt50, Some(-1.1));
        assert_eq!(parsed[0].pred_spots_orig_units, Some(5.7));
    }
}
