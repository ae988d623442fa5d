//! Prediction generator: builds model inputs from eligible summaries,
//! invokes the R outbreak model in one batch, and persists the returned
//! risk scores.
//!
//! Only rows flagged `is_valid_for_prediction = 1` are considered. The
//! model is invoked once per call with the whole surviving batch — one
//! subprocess spawn instead of one per row — and its results map back to
//! their originating rows by positional index (the runner guarantees
//! order-preserving 1:1 output).

use pine_beetle_database_models::{
    GeoYearKey, GeographyAxis, PredictionRow, SummarizedRow, SummaryFilter,
};
use pine_beetle_rmodel::{ModelConfig, ModelInput, ModelPrediction, run_model};
use switchy_database::Database;

use crate::PipelineError;

/// Clerid lookback value sent to the model when a row has no `cleridst1`
/// (no year-prior trapping existed for that geography).
pub const CLERIDST1_DEFAULT: f64 = 77.0;

/// Builds the model input batch from eligible rows.
///
/// Returns the surviving rows' keys and their index-aligned model inputs.
/// A row is dropped (not an error) when its compound key is incomplete,
/// when a required field other than `cleridst1` is missing or non-finite,
/// or when any numeric field is negative. A missing `cleridst1` is replaced
/// with [`CLERIDST1_DEFAULT`] instead of dropping the row.
#[must_use]
pub fn build_inputs(rows: &[SummarizedRow]) -> (Vec<GeoYearKey>, Vec<ModelInput>) {
    let mut keys = Vec::new();
    let mut inputs = Vec::new();

    for row in rows {
        let Some(key) = row.key() else {
            continue;
        };
        let Some(spb) = row.spb_per2_weeks else {
            continue;
        };
        let (Some(spotst1), Some(spotst2)) = (row.spotst1, row.spotst2) else {
            continue;
        };

        let cleridst1 = row.cleridst1.unwrap_or(CLERIDST1_DEFAULT);

        #[allow(clippy::cast_precision_loss)]
        let input = ModelInput {
            spb,
            cleridst1,
            spotst1: spotst1 as f64,
            spotst2: spotst2 as f64,
            endobrev: key.endobrev,
        };

        let values = [input.spb, input.cleridst1, input.spotst1, input.spotst2];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) || input.endobrev < 0 {
            log::warn!(
                "Dropping prediction input for {}/{}/{}: invalid field value",
                key.state,
                key.geography,
                key.year
            );
            continue;
        }

        keys.push(key);
        inputs.push(input);
    }

    (keys, inputs)
}

/// Rounds a model output to the nearest integer when it is numeric,
/// otherwise persists null.
fn round_if_numeric(value: Option<f64>) -> Option<i64> {
    #[allow(clippy::cast_possible_truncation)]
    let round = |v: f64| v.round() as i64;
    value.filter(|v| v.is_finite()).map(round)
}

/// Pairs each surviving key with the model result at the same index.
fn map_outputs(keys: Vec<GeoYearKey>, predictions: Vec<ModelPrediction>) -> Vec<PredictionRow> {
    keys.into_iter()
        .zip(predictions)
        .map(|(key, p)| PredictionRow {
            key,
            pi: p.pi,
            mu: p.mu,
            exp_spots_if_outbreak: round_if_numeric(p.exp_spots_if_outbreak),
            prob_spots_gt0: p.prob_spots_gt0,
            prob_spots_gt20: p.prob_spots_gt20,
            prob_spots_gt50: p.prob_spots_gt50,
            prob_spots_gt150: p.prob_spots_gt150,
            prob_spots_gt400: p.prob_spots_gt400,
            prob_spots_gt1000: p.prob_spots_gt1000,
        })
        .collect()
}

/// Generates and persists predictions for every eligible geography-year in
/// scope. Returns the number of prediction rows written.
///
/// An empty eligible set returns immediately without invoking the model.
///
/// # Errors
///
/// Returns [`PipelineError`] if a store operation fails or the model
/// invocation fails (including whole-batch input validation inside the
/// runner).
pub async fn generate(
    db: &dyn Database,
    model: &ModelConfig,
    axis: GeographyAxis,
    filter: &SummaryFilter,
) -> Result<u64, PipelineError> {
    let rows = pine_beetle_database::queries::fetch_summarized(db, axis, filter, true).await?;
    let (keys, inputs) = build_inputs(&rows);

    if inputs.is_empty() {
        log::info!("No {axis} rows eligible for prediction");
        return Ok(0);
    }

    log::info!("Running outbreak model over {} {axis} rows", inputs.len());
    let predictions = run_model(model, &inputs).await?;

    let output = map_outputs(keys, predictions);
    pine_beetle_database::queries::upsert_predictions(db, axis, &output).await?;

    Ok(output.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eligible_row(cleridst1: Option<f64>) -> SummarizedRow {
        SummarizedRow {
            year: 2021,
            state: Some("GA".to_string()),
            geography: Some("Alpha".to_string()),
            endobrev: Some(1),
            spb_per2_weeks: Some(20.0),
            spotst1: Some(1),
            spotst2: Some(0),
            cleridst1,
            is_valid_for_prediction: Some(1),
            ..SummarizedRow::default()
        }
    }

    #[test]
    fn cleridst1_defaults_to_exactly_77() {
        let (_, inputs) = build_inputs(&[eligible_row(None)]);
        assert_eq!(inputs.len(), 1);
        assert!((inputs[0].cleridst1 - 77.0).abs() < f64::EPSILON);
        assert!((CLERIDST1_DEFAULT - 77.0).abs() < f64::EPSILON);
    }

    #[test]
    fn present_cleridst1_is_kept() {
        let (_, inputs) = build_inputs(&[eligible_row(Some(3.0))]);
        assert!((inputs[0].cleridst1 - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_field_drops_the_row() {
        let mut row = eligible_row(Some(3.0));
        row.spb_per2_weeks = Some(-1.0);

        let (keys, inputs) = build_inputs(&[row, eligible_row(Some(3.0))]);
        assert_eq!(keys.len(), 1);
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn missing_lookback_drops_the_row() {
        let mut row = eligible_row(Some(3.0));
        row.spotst2 = None;
        let (keys, inputs) = build_inputs(&[row]);
        assert!(keys.is_empty());
        assert!(inputs.is_empty());
    }

    #[test]
    fn keys_and_inputs_stay_index_aligned() {
        let mut beta = eligible_row(Some(3.0));
        beta.geography = Some("Beta".to_string());
        let mut bad = eligible_row(Some(3.0));
        bad.spb_per2_weeks = Some(f64::NAN);

        let (keys, inputs) = build_inputs(&[eligible_row(None), bad, beta]);
        assert_eq!(keys.len(), 2);
        assert_eq!(inputs.len(), 2);
        assert_eq!(keys[0].geography, "Alpha");
        assert_eq!(keys[1].geography, "Beta");
    }

    #[test]
    fn outputs_map_by_position() {
        let (keys, inputs) = build_inputs(&[eligible_row(Some(3.0))]);
        assert_eq!(inputs.len(), 1);

        let prediction = ModelPrediction {
            pi: Some(0.1),
            mu: Some(2.0),
            exp_spots_if_outbreak: Some(12.6),
            prob_spots_gt0: Some(0.9),
            prob_spots_gt20: Some(0.5),
            prob_spots_gt50: Some(0.25),
            prob_spots_gt150: Some(0.1),
            prob_spots_gt400: Some(0.02),
            prob_spots_gt1000: Some(0.001),
        };

        let rows = map_outputs(keys, vec![prediction]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.geography, "Alpha");
        assert_eq!(rows[0].pi, Some(0.1));
        assert_eq!(rows[0].exp_spots_if_outbreak, Some(13));
    }

    #[test]
    fn non_numeric_expected_spots_persists_null() {
        assert_eq!(round_if_numeric(Some(f64::NAN)), None);
        assert_eq!(round_if_numeric(None), None);
        assert_eq!(round_if_numeric(Some(12.4)), Some(12));
    }
}
