//! Query and upsert-merge functions for the pipeline stores.
//!
//! Reads are filtered `SELECT`s decoded through `moosicbox_json_utils`'
//! `ToValue`. Writes are chunked multi-row `INSERT .. ON CONFLICT (year,
//! state, geography, endobrev) DO UPDATE` statements that update only the
//! columns owned by the writing stage, so concurrent stages enriching the
//! same key never clobber each other's fields.

use std::fmt::Write as _;

use moosicbox_json_utils::database::ToValue as _;
use pine_beetle_database_models::{
    GeoYearKey, GeoYearSummary, GeographyAxis, IndicatorFlags, PerTrapRates, PredictionRow,
    CalculatedFieldsRow, Season, SummarizedRow, SummaryFilter, UnsummarizedTrappingRow,
};
use switchy_database::{Database, DatabaseValue};

use crate::{DbError, PG_MAX_PARAMS};

/// Builds WHERE fragments and parameters for a [`SummaryFilter`] against
/// the given table qualifier (`""` or `"src."`).
///
/// Returns `(fragments, params, next_param_index)`.
pub(crate) fn filter_frags(
    filter: &SummaryFilter,
    qualifier: &str,
    geo_col: &str,
    start_idx: u32,
) -> (Vec<String>, Vec<DatabaseValue>, u32) {
    let mut frags = Vec::new();
    let mut params: Vec<DatabaseValue> = Vec::new();
    let mut idx = start_idx;

    if let Some(state) = &filter.state {
        frags.push(format!("{qualifier}state = ${idx}"));
        params.push(DatabaseValue::String(state.clone()));
        idx += 1;
    }

    if let Some(year) = filter.year {
        frags.push(format!("{qualifier}year = ${idx}"));
        params.push(DatabaseValue::Int32(year));
        idx += 1;
    }

    if let Some(min_year) = filter.min_year {
        frags.push(format!("{qualifier}year >= ${idx}"));
        params.push(DatabaseValue::Int32(min_year));
        idx += 1;
    }

    if let Some(max_year) = filter.max_year {
        frags.push(format!("{qualifier}year <= ${idx}"));
        params.push(DatabaseValue::Int32(max_year));
        idx += 1;
    }

    if let Some(geography) = &filter.geography {
        frags.push(format!("{qualifier}{geo_col} = ${idx}"));
        params.push(DatabaseValue::String(geography.clone()));
        idx += 1;
    }

    (frags, params, idx)
}

/// Fetches raw spring trapping records for one geography axis.
///
/// Records recorded on the other axis (null geography field) are excluded
/// here rather than in Rust, since the raw store can be large.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn fetch_unsummarized(
    db: &dyn Database,
    axis: GeographyAxis,
    filter: &SummaryFilter,
) -> Result<Vec<UnsummarizedTrappingRow>, DbError> {
    let geo = axis.field_name();

    let mut sql = format!(
        "SELECT * FROM unsummarized_trapping WHERE season = $1 AND {geo} IS NOT NULL"
    );
    let mut params = vec![DatabaseValue::String(Season::Spring.as_ref().to_string())];

    let (frags, filter_params, _) = filter_frags(filter, "", geo, 2);
    for frag in &frags {
        write!(sql, " AND {frag}").unwrap();
    }
    params.extend(filter_params);

    let rows = db.query_raw_params(&sql, &params).await?;

    rows.iter()
        .map(|row| {
            Ok(UnsummarizedTrappingRow {
                id: row.to_value("id").map_err(|e| DbError::Conversion {
                    message: format!("Failed to parse raw trapping id: {e}"),
                })?,
                state: row.to_value("state").unwrap_or(None),
                county: row.to_value("county").unwrap_or(None),
                ranger_district: row.to_value("ranger_district").unwrap_or(None),
                fips: row.to_value("fips").unwrap_or(None),
                trap: row.to_value("trap").unwrap_or(None),
                year: row.to_value("year").map_err(|e| DbError::Conversion {
                    message: format!("Failed to parse raw trapping year: {e}"),
                })?,
                week: row.to_value("week").unwrap_or(None),
                season: row.to_value("season").unwrap_or(None),
                endobrev: row.to_value("endobrev").unwrap_or(None),
                spb_count: row.to_value("spb_count").unwrap_or(None),
                clerid_count: row.to_value("clerid_count").unwrap_or(None),
                days_active: row.to_value("days_active").unwrap_or(None),
                collection_date: row.to_value("collection_date").unwrap_or(None),
                latitude: row.to_value("latitude").unwrap_or(None),
                longitude: row.to_value("longitude").unwrap_or(None),
                lure: row.to_value("lure").unwrap_or(None),
            })
        })
        .collect()
}

/// Fetches summarized geography-year rows, optionally restricted to rows
/// flagged `is_valid_for_prediction = 1`.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn fetch_summarized(
    db: &dyn Database,
    axis: GeographyAxis,
    filter: &SummaryFilter,
    valid_for_prediction_only: bool,
) -> Result<Vec<SummarizedRow>, DbError> {
    let geo = axis.field_name();

    let mut sql = format!("SELECT * FROM {} WHERE 1=1", axis.summarized_table());

    let (frags, params, _) = filter_frags(filter, "", geo, 1);
    for frag in &frags {
        write!(sql, " AND {frag}").unwrap();
    }

    if valid_for_prediction_only {
        sql.push_str(" AND is_valid_for_prediction = 1");
    }

    sql.push_str(" ORDER BY year, state, ");
    sql.push_str(geo);

    let rows = db.query_raw_params(&sql, &params).await?;

    rows.iter().map(|row| decode_summarized(row, axis)).collect()
}

fn decode_per_trap_rates(raw: Option<String>) -> Result<PerTrapRates, DbError> {
    raw.map_or_else(
        || Ok(PerTrapRates::new()),
        |json| {
            serde_json::from_str(&json).map_err(|e| DbError::Conversion {
                message: format!("Failed to parse per-trap rate map: {e}"),
            })
        },
    )
}

fn decode_summarized(
    row: &switchy_database::Row,
    axis: GeographyAxis,
) -> Result<SummarizedRow, DbError> {
    Ok(SummarizedRow {
        year: row.to_value("year").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse summary year: {e}"),
        })?,
        state: row.to_value("state").unwrap_or(None),
        geography: row.to_value(axis.field_name()).unwrap_or(None),
        endobrev: row.to_value("endobrev").unwrap_or(None),
        fips: row.to_value("fips").unwrap_or(None),
        federal_name_old: row.to_value("federal_name_old").unwrap_or(None),
        federal_name_older: row.to_value("federal_name_older").unwrap_or(None),
        spb_count: row.to_value("spb_count").unwrap_or(None),
        clerid_count: row.to_value("clerid_count").unwrap_or(None),
        spb_per2_weeks: row.to_value("spb_per2_weeks").unwrap_or(None),
        spb_per2_weeks_orig: row.to_value("spb_per2_weeks_orig").unwrap_or(None),
        clerids_per2_weeks: row.to_value("clerids_per2_weeks").unwrap_or(None),
        spb_per_day: decode_per_trap_rates(row.to_value("spb_per_day").unwrap_or(None))?,
        clerid_per_day: decode_per_trap_rates(row.to_value("clerid_per_day").unwrap_or(None))?,
        trap_count: row.to_value("trap_count").unwrap_or(None),
        total_trapping_days: row.to_value("total_trapping_days").unwrap_or(None),
        days_per_trap: row.to_value("days_per_trap").unwrap_or(None),
        spotst0: row.to_value("spotst0").unwrap_or(None),
        spotst1: row.to_value("spotst1").unwrap_or(None),
        spotst2: row.to_value("spotst2").unwrap_or(None),
        cleridst1: row.to_value("cleridst1").unwrap_or(None),
        has_spb_trapping: row.to_value("has_spb_trapping").unwrap_or(None),
        is_valid_for_prediction: row.to_value("is_valid_for_prediction").unwrap_or(None),
        has_spotst0: row.to_value("has_spotst0").unwrap_or(None),
        has_prediction_and_outcome: row.to_value("has_prediction_and_outcome").unwrap_or(None),
        pi: row.to_value("pi").unwrap_or(None),
        mu: row.to_value("mu").unwrap_or(None),
        exp_spots_if_outbreak: row.to_value("exp_spots_if_outbreak").unwrap_or(None),
        prob_spots_gt0: row.to_value("prob_spots_gt0").unwrap_or(None),
        prob_spots_gt20: row.to_value("prob_spots_gt20").unwrap_or(None),
        prob_spots_gt50: row.to_value("prob_spots_gt50").unwrap_or(None),
        prob_spots_gt150: row.to_value("prob_spots_gt150").unwrap_or(None),
        prob_spots_gt400: row.to_value("prob_spots_gt400").unwrap_or(None),
        prob_spots_gt1000: row.to_value("prob_spots_gt1000").unwrap_or(None),
        ln_spb_per2_weeks: row.to_value("ln_spb_per2_weeks").unwrap_or(None),
        ln_clerids_per2_weeks: row.to_value("ln_clerids_per2_weeks").unwrap_or(None),
        ln_spotst0: row.to_value("ln_spotst0").unwrap_or(None),
        logit_prob_gt50: row.to_value("logit_prob_gt50").unwrap_or(None),
        pred_spots_log_units: row.to_value("pred_spots_log_units").unwrap_or(None),
        pred_spots_orig_units: row.to_value("pred_spots_orig_units").unwrap_or(None),
        residual_spots_log_units: row.to_value("residual_spots_log_units").unwrap_or(None),
    })
}

/// Pushes `VALUES` placeholders `($n, $n+1, ..)` for one row of `width`
/// parameters onto `sql`, returning the next parameter index.
fn push_row_placeholders(sql: &mut String, start_idx: usize, width: usize) -> usize {
    sql.push('(');
    for offset in 0..width {
        if offset > 0 {
            sql.push_str(", ");
        }
        write!(sql, "${}", start_idx + offset).unwrap();
    }
    sql.push(')');
    start_idx + width
}

fn key_params(key: &GeoYearKey) -> [DatabaseValue; 4] {
    [
        DatabaseValue::Int32(key.year),
        DatabaseValue::String(key.state.clone()),
        DatabaseValue::String(key.geography.clone()),
        DatabaseValue::Int32(key.endobrev),
    ]
}

fn opt_real(value: Option<f64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Real64)
}

fn opt_int(value: Option<i64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Int64)
}

/// Runs one chunked multi-row upsert-merge. `columns` are the non-key
/// columns the writing stage owns; `extra_set` appends axis-specific
/// assignments that take no parameters.
async fn upsert_merge_chunked(
    db: &dyn Database,
    table: &str,
    geo_col: &str,
    columns: &[&str],
    extra_set: &str,
    rows: Vec<Vec<DatabaseValue>>,
) -> Result<u64, DbError> {
    let width = 4 + columns.len();
    let max_rows = (PG_MAX_PARAMS / width).max(1);
    let mut written = 0u64;

    for chunk in rows.chunks(max_rows) {
        let mut sql = format!("INSERT INTO {table} (year, state, {geo_col}, endobrev");
        for col in columns {
            write!(sql, ", {col}").unwrap();
        }
        sql.push_str(") VALUES ");

        let mut idx = 1;
        for (i, _) in chunk.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            idx = push_row_placeholders(&mut sql, idx, width);
        }

        write!(
            sql,
            " ON CONFLICT (year, state, {geo_col}, endobrev) DO UPDATE SET "
        )
        .unwrap();
        for (i, col) in columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            write!(sql, "{col} = EXCLUDED.{col}").unwrap();
        }
        sql.push_str(extra_set);

        let params: Vec<DatabaseValue> = chunk.iter().flatten().cloned().collect();
        written += db.exec_raw_params(&sql, &params).await?;
    }

    Ok(written)
}

/// Upsert-merges aggregator output into the summarized table for `axis`.
///
/// Only the trapping-owned columns are written; spot, indicator, and model
/// fields on existing rows are left untouched. The ranger-district axis
/// additionally nulls the historical federal-name columns, which are only
/// meaningful on externally uploaded rows.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails or a per-trap map
/// cannot be serialized.
pub async fn upsert_summaries(
    db: &dyn Database,
    axis: GeographyAxis,
    summaries: &[GeoYearSummary],
) -> Result<u64, DbError> {
    if summaries.is_empty() {
        return Ok(0);
    }

    let mut columns = vec![
        "spb_count",
        "clerid_count",
        "spb_per2_weeks",
        "spb_per2_weeks_orig",
        "clerids_per2_weeks",
        "spb_per_day",
        "clerid_per_day",
        "trap_count",
        "total_trapping_days",
        "days_per_trap",
    ];
    let extra_set = match axis {
        GeographyAxis::County => {
            columns.push("fips");
            ""
        }
        GeographyAxis::RangerDistrict => {
            ", federal_name_old = NULL, federal_name_older = NULL"
        }
    };

    let mut rows = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let spb_per_day =
            serde_json::to_string(&summary.spb_per_day).map_err(|e| DbError::Conversion {
                message: format!("Failed to serialize spb per-trap map: {e}"),
            })?;
        let clerid_per_day =
            serde_json::to_string(&summary.clerid_per_day).map_err(|e| DbError::Conversion {
                message: format!("Failed to serialize clerid per-trap map: {e}"),
            })?;

        let mut params = key_params(&summary.key).to_vec();
        params.extend([
            DatabaseValue::Int64(summary.spb_count),
            DatabaseValue::Int64(summary.clerid_count),
            opt_real(summary.spb_per2_weeks),
            opt_real(summary.spb_per2_weeks_orig),
            opt_real(summary.clerids_per2_weeks),
            DatabaseValue::String(spb_per_day),
            DatabaseValue::String(clerid_per_day),
            DatabaseValue::Int64(summary.trap_count),
            DatabaseValue::Int64(summary.total_trapping_days),
            opt_real(summary.days_per_trap),
        ]);
        if axis == GeographyAxis::County {
            params.push(
                summary
                    .fips
                    .map_or(DatabaseValue::Null, DatabaseValue::Int32),
            );
        }
        rows.push(params);
    }

    upsert_merge_chunked(
        db,
        axis.summarized_table(),
        axis.field_name(),
        &columns,
        extra_set,
        rows,
    )
    .await
}

/// Upsert-merges the four indicator flags (persisted as 0/1 integers).
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn upsert_indicators(
    db: &dyn Database,
    axis: GeographyAxis,
    indicators: &[(GeoYearKey, IndicatorFlags)],
) -> Result<u64, DbError> {
    if indicators.is_empty() {
        return Ok(0);
    }

    let columns = [
        "has_spb_trapping",
        "is_valid_for_prediction",
        "has_spotst0",
        "has_prediction_and_outcome",
    ];

    let rows = indicators
        .iter()
        .map(|(key, flags)| {
            let mut params = key_params(key).to_vec();
            params.extend([
                DatabaseValue::Int32(i32::from(flags.has_spb_trapping)),
                DatabaseValue::Int32(i32::from(flags.is_valid_for_prediction)),
                DatabaseValue::Int32(i32::from(flags.has_spotst0)),
                DatabaseValue::Int32(i32::from(flags.has_prediction_and_outcome)),
            ]);
            params
        })
        .collect();

    upsert_merge_chunked(
        db,
        axis.summarized_table(),
        axis.field_name(),
        &columns,
        "",
        rows,
    )
    .await
}

/// Upsert-merges model prediction outputs.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn upsert_predictions(
    db: &dyn Database,
    axis: GeographyAxis,
    predictions: &[PredictionRow],
) -> Result<u64, DbError> {
    if predictions.is_empty() {
        return Ok(0);
    }

    let columns = [
        "pi",
        "mu",
        "exp_spots_if_outbreak",
        "prob_spots_gt0",
        "prob_spots_gt20",
        "prob_spots_gt50",
        "prob_spots_gt150",
        "prob_spots_gt400",
        "prob_spots_gt1000",
    ];

    let rows = predictions
        .iter()
        .map(|p| {
            let mut params = key_params(&p.key).to_vec();
            params.extend([
                opt_real(p.pi),
                opt_real(p.mu),
                opt_int(p.exp_spots_if_outbreak),
                opt_real(p.prob_spots_gt0),
                opt_real(p.prob_spots_gt20),
                opt_real(p.prob_spots_gt50),
                opt_real(p.prob_spots_gt150),
                opt_real(p.prob_spots_gt400),
                opt_real(p.prob_spots_gt1000),
            ]);
            params
        })
        .collect();

    upsert_merge_chunked(
        db,
        axis.summarized_table(),
        axis.field_name(),
        &columns,
        "",
        rows,
    )
    .await
}

/// Upsert-merges calculated diagnostic fields.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn upsert_calculated_fields(
    db: &dyn Database,
    axis: GeographyAxis,
    fields: &[CalculatedFieldsRow],
) -> Result<u64, DbError> {
    if fields.is_empty() {
        return Ok(0);
    }

    let columns = [
        "ln_spb_per2_weeks",
        "ln_clerids_per2_weeks",
        "ln_spotst0",
        "logit_prob_gt50",
        "pred_spots_log_units",
        "pred_spots_orig_units",
        "residual_spots_log_units",
    ];

    let rows = fields
        .iter()
        .map(|f| {
            let mut params = key_params(&f.key).to_vec();
            params.extend([
                opt_real(f.ln_spb_per2_weeks),
                opt_real(f.ln_clerids_per2_weeks),
                opt_real(f.ln_spotst0),
                opt_real(f.logit_prob_gt50),
                opt_real(f.pred_spots_log_units),
                opt_real(f.pred_spots_orig_units),
                opt_real(f.residual_spots_log_units),
            ]);
            params
        })
        .collect();

    upsert_merge_chunked(
        db,
        axis.summarized_table(),
        axis.field_name(),
        &columns,
        "",
        rows,
    )
    .await
}

/// Nulls `spb_per2_weeks` for all rows in scope, so stale trapping values
/// cannot survive a survey deletion and re-run.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn clear_spb(
    db: &dyn Database,
    axis: GeographyAxis,
    filter: &SummaryFilter,
) -> Result<u64, DbError> {
    let mut sql = format!(
        "UPDATE {} SET spb_per2_weeks = NULL WHERE 1=1",
        axis.summarized_table()
    );

    let (frags, params, _) = filter_frags(filter, "", axis.field_name(), 1);
    for frag in &frags {
        write!(sql, " AND {frag}").unwrap();
    }

    Ok(db.exec_raw_params(&sql, &params).await?)
}

/// Deletes rows in scope where neither trapping nor spot data exists.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn delete_stale_rows(
    db: &dyn Database,
    axis: GeographyAxis,
    filter: &SummaryFilter,
) -> Result<u64, DbError> {
    let mut sql = format!(
        "DELETE FROM {} WHERE has_spb_trapping = 0 AND has_spotst0 = 0",
        axis.summarized_table()
    );

    let (frags, params, _) = filter_frags(filter, "", axis.field_name(), 1);
    for frag in &frags {
        write!(sql, " AND {frag}").unwrap();
    }

    Ok(db.exec_raw_params(&sql, &params).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_frags_empty() {
        let (frags, params, idx) = filter_frags(&SummaryFilter::all(), "", "county", 1);
        assert!(frags.is_empty());
        assert!(params.is_empty());
        assert_eq!(idx, 1);
    }

    #[test]
    fn filter_frags_state_year() {
        let filter = SummaryFilter::state_year("GA".to_string(), 2021);
        let (frags, params, idx) = filter_frags(&filter, "src.", "county", 3);
        assert_eq!(frags, vec!["src.state = $3", "src.year = $4"]);
        assert_eq!(params.len(), 2);
        assert_eq!(idx, 5);
    }

    #[test]
    fn filter_frags_min_year_uses_gte() {
        let (frags, _, _) = filter_frags(&SummaryFilter::from_year(2019), "", "ranger_district", 1);
        assert_eq!(frags, vec!["year >= $1"]);
    }

    #[test]
    fn row_placeholders_are_sequential() {
        let mut sql = String::new();
        let next = push_row_placeholders(&mut sql, 5, 3);
        assert_eq!(sql, "($5, $6, $7)");
        assert_eq!(next, 8);
    }

    #[test]
    fn per_trap_rates_decode() {
        let rates = decode_per_trap_rates(Some("{\"T1\":1.5,\"T2\":null}".to_string())).unwrap();
        assert_eq!(rates.get("T1"), Some(&Some(1.5)));
        assert_eq!(rates.get("T2"), Some(&None));

        assert!(decode_per_trap_rates(None).unwrap().is_empty());
    }
}
