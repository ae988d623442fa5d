//! Indicator pass: derives the four 0/1 readiness flags from field
//! presence on each summarized row.
//!
//! The cheapest stage in the pipeline — pure null-checks, no arithmetic —
//! but it gates the prediction generator via `is_valid_for_prediction`.

use pine_beetle_database_models::{
    GeoYearKey, GeographyAxis, IndicatorFlags, SummarizedRow, SummaryFilter,
};
use switchy_database::Database;

use crate::PipelineError;

/// Computes indicator flags for every row with a complete compound key.
/// Rows missing a key component cannot be written back and are skipped.
#[must_use]
pub fn compute_indicators(rows: &[SummarizedRow]) -> Vec<(GeoYearKey, IndicatorFlags)> {
    rows.iter()
        .filter_map(|row| {
            let key = row.key()?;
            let flags = IndicatorFlags::from_fields(
                row.spb_per2_weeks,
                row.spotst0,
                row.spotst1,
                row.spotst2,
            );
            Some((key, flags))
        })
        .collect()
}

/// Recomputes and upsert-merges indicator flags for all rows in scope.
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`PipelineError`] if a store operation fails.
pub async fn run(
    db: &dyn Database,
    axis: GeographyAxis,
    filter: &SummaryFilter,
) -> Result<u64, PipelineError> {
    let rows = pine_beetle_database::queries::fetch_summarized(db, axis, filter, false).await?;
    let indicators = compute_indicators(&rows);

    log::info!("Computed indicators for {} {axis} rows", indicators.len());

    pine_beetle_database::queries::upsert_indicators(db, axis, &indicators).await?;

    Ok(indicators.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        spb_per2_weeks: Option<f64>,
        spotst0: Option<i64>,
        spotst1: Option<i64>,
        spotst2: Option<i64>,
    ) -> SummarizedRow {
        SummarizedRow {
            year: 2021,
            state: Some("GA".to_string()),
            geography: Some("Alpha".to_string()),
            endobrev: Some(1),
            spb_per2_weeks,
            spotst0,
            spotst1,
            spotst2,
            ..SummarizedRow::default()
        }
    }

    #[test]
    fn flags_follow_field_presence() {
        let computed = compute_indicators(&[row(Some(10.0), Some(4), Some(1), Some(2))]);
        assert_eq!(computed.len(), 1);

        let (key, flags) = &computed[0];
        assert_eq!(key.geography, "Alpha");
        assert!(flags.has_spb_trapping);
        assert!(flags.is_valid_for_prediction);
        assert!(flags.has_spotst0);
        assert!(flags.has_prediction_and_outcome);
    }

    #[test]
    fn missing_lookback_blocks_prediction() {
        let computed = compute_indicators(&[row(Some(10.0), Some(4), None, Some(2))]);
        let (_, flags) = &computed[0];
        assert!(flags.has_spb_trapping);
        assert!(!flags.is_valid_for_prediction);
        assert!(!flags.has_prediction_and_outcome);
    }

    #[test]
    fn incomplete_key_is_skipped() {
        let mut incomplete = row(Some(10.0), None, None, None);
        incomplete.state = None;
        assert!(compute_indicators(&[incomplete]).is_empty());
    }
}
