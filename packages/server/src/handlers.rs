//! HTTP handler functions for the pipeline API.

use actix_web::{HttpResponse, web};
use pine_beetle_database::queries;
use pine_beetle_database_models::{GeographyAxis, SummaryFilter};
use pine_beetle_pipeline::PipelineError;
use serde::Deserialize;

use crate::AppState;

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Query parameters for the pipeline entry point. Both must be present for
/// a scoped run; neither for a full run.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineParams {
    /// State abbreviation for a scoped run.
    pub state: Option<String>,
    /// Year for a scoped run.
    pub year: Option<i32>,
    /// Override for the run-all cutoff year.
    pub cutoff_year: Option<i32>,
}

/// `GET /api/pipeline`
///
/// With `state` and `year`: runs the pipeline scoped to that state and
/// year. Without them: runs the full pipeline from the cutoff year onward.
pub async fn run_pipeline(
    state: web::Data<AppState>,
    params: web::Query<PipelineParams>,
) -> HttpResponse {
    let result = match (&params.state, params.year) {
        (Some(run_state), Some(run_year)) => {
            pine_beetle_pipeline::run_state_year(
                state.db.as_ref(),
                &state.model,
                run_state,
                run_year,
            )
            .await
        }
        (None, None) => {
            pine_beetle_pipeline::run_all(state.db.as_ref(), &state.model, params.cutoff_year)
                .await
        }
        _ => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "type": "BAD_REQUEST",
                "error": "state and year must be provided together",
            }));
        }
    };

    match result {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => pipeline_error_response(&e),
    }
}

/// Query parameters for summarized data reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizedParams {
    /// Earliest year to return, inclusive.
    pub start_year: Option<i32>,
    /// Latest year to return, inclusive.
    pub end_year: Option<i32>,
    /// State abbreviation to filter by.
    pub state: Option<String>,
    /// Geography name (county or ranger district) to filter by.
    pub geography: Option<String>,
}

impl SummarizedParams {
    fn to_filter(&self) -> SummaryFilter {
        SummaryFilter {
            state: self.state.clone(),
            year: None,
            min_year: self.start_year,
            max_year: self.end_year,
            geography: self.geography.clone(),
        }
    }
}

/// `GET /api/summarized-counties`
pub async fn summarized_counties(
    state: web::Data<AppState>,
    params: web::Query<SummarizedParams>,
) -> HttpResponse {
    summarized(&state, GeographyAxis::County, &params).await
}

/// `GET /api/summarized-rangerdistricts`
pub async fn summarized_ranger_districts(
    state: web::Data<AppState>,
    params: web::Query<SummarizedParams>,
) -> HttpResponse {
    summarized(&state, GeographyAxis::RangerDistrict, &params).await
}

async fn summarized(
    state: &web::Data<AppState>,
    axis: GeographyAxis,
    params: &web::Query<SummarizedParams>,
) -> HttpResponse {
    match queries::fetch_summarized(state.db.as_ref(), axis, &params.to_filter(), false).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => {
            log::error!("Failed to query {axis} summaries: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "type": "INTERNAL_ERROR",
                "error": "Failed to query summarized data",
            }))
        }
    }
}

/// Maps a [`PipelineError`] to a JSON response keyed by its category.
fn pipeline_error_response(error: &PipelineError) -> HttpResponse {
    log::error!("Pipeline run failed: {error}");

    let body = serde_json::json!({
        "type": error.category(),
        "error": error.to_string(),
    });

    match error.category() {
        "BAD_REQUEST" => HttpResponse::BadRequest().json(body),
        "NOT_FOUND" => HttpResponse::NotFound().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}
