//! Pipeline orchestrator: sequences the stages for both geography axes.
//!
//! Within one axis the stages run strictly in dependency order — each
//! stage reads fields only the previous stage could have written. Across
//! the county and ranger-district axes execution is concurrent; their
//! writes target disjoint tables. Failures abort the axis but leave
//! already-committed merges in place: every stage is an idempotent
//! upsert-merge, so re-running the whole pipeline is safe.

use pine_beetle_database_models::{GeographyAxis, SummaryFilter, YearOffset};
use pine_beetle_rmodel::ModelConfig;
use serde::{Deserialize, Serialize};
use switchy_database::Database;

use crate::{PipelineError, aggregate, calculated, indicators, offset, predictions, spots};

/// First year the pipeline is allowed to modify; everything earlier is
/// frozen historical data.
pub const DEFAULT_CUTOFF_YEAR: i32 = 2021;

/// Per-stage row counts from one axis run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisRunSummary {
    /// Rows whose stale SPB value was cleared before re-aggregation.
    pub cleared: u64,
    /// Geography-year summaries written by the aggregator.
    pub summarized: u64,
    /// Rows updated by the three spot-merge passes.
    pub spots_merged: u64,
    /// Rows updated by the two lookback projections.
    pub lookbacks_joined: u64,
    /// Rows whose indicator flags were recomputed.
    pub indicators: u64,
    /// Prediction rows written.
    pub predictions: u64,
    /// Calculated-field rows written.
    pub calculated_fields: u64,
    /// Rows deleted for having neither trapping nor spot data.
    pub stale_deleted: u64,
}

/// Results of a full pipeline run, one summary per axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSummary {
    /// County axis results.
    pub county: AxisRunSummary,
    /// Ranger-district axis results.
    pub ranger_district: AxisRunSummary,
}

/// Runs every stage for one axis under the given scope.
async fn run_axis(
    db: &dyn Database,
    model: &ModelConfig,
    axis: GeographyAxis,
    filter: &SummaryFilter,
) -> Result<AxisRunSummary, PipelineError> {
    log::info!("Running {axis} pipeline");

    // Clear SPB values in scope in case a survey deletion invalidated them.
    let cleared = pine_beetle_database::queries::clear_spb(db, axis, filter).await?;

    let summarized = aggregate::run(db, axis, filter).await?;

    // Spot merges: the filter scopes the source spot rows by their own
    // year, so the lookback offsets widen it backwards.
    let mut spots_merged = spots::run(db, axis, YearOffset::T0, filter).await?;
    spots_merged += spots::run(db, axis, YearOffset::T1, &filter.shift_years(-1)).await?;
    spots_merged += spots::run(db, axis, YearOffset::T2, &filter.shift_years(-2)).await?;

    // Lookback projections, two years back first.
    let mut lookbacks_joined =
        offset::run(db, axis, YearOffset::T2, &filter.shift_years(-2)).await?;
    lookbacks_joined += offset::run(db, axis, YearOffset::T1, &filter.shift_years(-1)).await?;

    let indicators = indicators::run(db, axis, filter).await?;
    let predictions = predictions::generate(db, model, axis, filter).await?;
    let calculated_fields = calculated::run(db, model, axis, filter).await?;

    // Sweep rows that ended up with neither trapping nor spot data.
    let stale_deleted = pine_beetle_database::queries::delete_stale_rows(db, axis, filter).await?;

    log::info!("Finished {axis} pipeline");

    Ok(AxisRunSummary {
        cleared,
        summarized,
        spots_merged,
        lookbacks_joined,
        indicators,
        predictions,
        calculated_fields,
        stale_deleted,
    })
}

/// Runs the whole pipeline over both axes for every year from the cutoff
/// onward.
///
/// # Errors
///
/// Returns [`PipelineError`] from the first failing stage; earlier
/// committed merges are not rolled back.
pub async fn run_all(
    db: &dyn Database,
    model: &ModelConfig,
    cutoff_year: Option<i32>,
) -> Result<PipelineRunSummary, PipelineError> {
    let cutoff = cutoff_year.unwrap_or(DEFAULT_CUTOFF_YEAR);
    let filter = SummaryFilter::from_year(cutoff);

    log::info!("Running full pipeline from cutoff year {cutoff}");

    let (county, ranger_district) = futures::try_join!(
        run_axis(db, model, GeographyAxis::County, &filter),
        run_axis(db, model, GeographyAxis::RangerDistrict, &filter),
    )?;

    log::info!("Finished running full pipeline");

    Ok(PipelineRunSummary {
        county,
        ranger_district,
    })
}

/// Runs the whole pipeline scoped to a single state and year, typically
/// triggered when a state finishes its survey collection for the year.
///
/// # Errors
///
/// Returns [`PipelineError::BadRequest`] if `state` is empty, otherwise
/// errors from the first failing stage.
pub async fn run_state_year(
    db: &dyn Database,
    model: &ModelConfig,
    state: &str,
    year: i32,
) -> Result<PipelineRunSummary, PipelineError> {
    if state.trim().is_empty() {
        return Err(PipelineError::BadRequest {
            message: "state must not be empty".to_string(),
        });
    }

    let filter = SummaryFilter::state_year(state.to_string(), year);

    log::info!("Running pipeline for {state} {year}");

    let (county, ranger_district) = futures::try_join!(
        run_axis(db, model, GeographyAxis::County, &filter),
        run_axis(db, model, GeographyAxis::RangerDistrict, &filter),
    )?;

    log::info!("Finished running pipeline for {state} {year}");

    Ok(PipelineRunSummary {
        county,
        ranger_district,
    })
}
