//! Calculated-fields generator: post-prediction diagnostics.
//!
//! Sends each summarized row's rates, current-year spots, and the model's
//! `probSpotsGT50` to the calculated-fields R script, and persists the
//! log-transformed diagnostics it returns. Runs over every row in scope
//! (not just prediction-eligible ones) so researchers can average trap
//! captures across locations and years.

use pine_beetle_database_models::{
    CalculatedFieldsRow, GeoYearKey, GeographyAxis, SummarizedRow, SummaryFilter,
};
use pine_beetle_rmodel::{
    CalculatedFieldsInput, CalculatedFieldsOutput, ModelConfig, run_calculated_fields,
};
use switchy_database::Database;

use crate::PipelineError;

/// Builds the calculated-fields input batch, dropping rows whose compound
/// key is incomplete. Keys and inputs stay index-aligned.
#[must_use]
pub fn build_inputs(rows: &[SummarizedRow]) -> (Vec<GeoYearKey>, Vec<CalculatedFieldsInput>) {
    let mut keys = Vec::new();
    let mut inputs = Vec::new();

    for row in rows {
        let Some(key) = row.key() else {
            continue;
        };

        inputs.push(CalculatedFieldsInput {
            spb_per2_weeks: row.spb_per2_weeks,
            clerids_per2_weeks: row.clerids_per2_weeks,
            spotst0: row.spotst0,
            prob_spots_gt50: row.prob_spots_gt50,
            endobrev: Some(key.endobrev),
        });
        keys.push(key);
    }

    (keys, inputs)
}

fn round_if_numeric(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(f64::round)
}

fn map_outputs(
    keys: Vec<GeoYearKey>,
    outputs: Vec<CalculatedFieldsOutput>,
) -> Vec<CalculatedFieldsRow> {
    keys.into_iter()
        .zip(outputs)
        .map(|(key, out)| CalculatedFieldsRow {
            key,
            ln_spb_per2_weeks: out.ln_spb_per2_weeks,
            ln_clerids_per2_weeks: out.ln_clerids_per2_weeks,
            ln_spotst0: out.ln_spotst0,
            logit_prob_gt50: out.logit_prob_gt50,
            pred_spots_log_units: out.pred_spots_log_units,
            pred_spots_orig_units: round_if_numeric(out.pred_spots_orig_units),
            residual_spots_log_units: out.residual_spots_log_units,
        })
        .collect()
}

/// Generates and persists calculated diagnostic fields for all rows in
/// scope. Returns the number of rows written.
///
/// # Errors
///
/// Returns [`PipelineError`] if a store operation or the script invocation
/// fails.
pub async fn run(
    db: &dyn Database,
    model: &ModelConfig,
    axis: GeographyAxis,
    filter: &SummaryFilter,
) -> Result<u64, PipelineError> {
    let rows = pine_beetle_database::queries::fetch_summarized(db, axis, filter, false).await?;
    let (keys, inputs) = build_inputs(&rows);

    if inputs.is_empty() {
        log::info!("No {axis} rows in scope for calculated fields");
        return Ok(0);
    }

    log::info!(
        "Running calculated-fields script over {} {axis} rows",
        inputs.len()
    );
    let outputs = run_calculated_fields(model, &inputs).await?;

    let output_rows = map_outputs(keys, outputs);
    pine_beetle_database::queries::upsert_calculated_fields(db, axis, &output_rows).await?;

    Ok(output_rows.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_orig_units_and_nulls_non_numeric() {
        let key = GeoYearKey {
            year: 2021,
            state: "GA".to_string(),
            geography: "Alpha".to_string(),
            endobrev: 1,
        };
        let output = CalculatedFieldsOutput {
            ln_spb_per2_weeks: Some(2.3),
            ln_clerids_per2_weeks: None,
            ln_spotst0: Some(0.7),
            logit_prob_gt50: Some(-1.1),
            pred_spots_log_units: Some(1.9),
            pred_spots_orig_units: Some(5.7),
            residual_spots_log_units: Some(-1.2),
        };

        let rows = map_outputs(vec![key.clone()], vec![output]);
        assert_eq!(rows[0].pred_spots_orig_units, Some(6.0));

        let nan_output = CalculatedFieldsOutput {
            pred_spots_orig_units: Some(f64::NAN),
            ..output
        };
        let rows = map_outputs(vec![key], vec![nan_output]);
        assert_eq!(rows[0].pred_spots_orig_units, None);
    }

    #[test]
    fn input_batch_skips_incomplete_keys() {
        let complete = SummarizedRow {
            year: 2021,
            state: Some("GA".to_string()),
            geography: Some("Alpha".to_string()),
            endobrev: Some(1),
            spb_per2_weeks: Some(20.0),
            ..SummarizedRow::default()
        };
        let mut incomplete = complete.clone();
        incomplete.endobrev = None;

        let (keys, inputs) = build_inputs(&[complete, incomplete]);
        assert_eq!(keys.len(), 1);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].spb_per2_weeks, Some(20.0));
    }
}
