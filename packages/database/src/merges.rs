//! Set-based merge-if-matched passes for the spot merger and the
//! offset-year joiner.
//!
//! Both are write-forward projections expressed as a single `UPDATE .. FROM`
//! statement: source rows from year `y` update the already-existing summary
//! row for year `y + offset`. An `UPDATE` cannot create rows, which gives
//! the required merge-if-matched / discard-otherwise semantics — a
//! projection whose destination key does not exist simply matches nothing.
//!
//! Each pass targets a single endobrev literal because the compound unique
//! key `(year, state, geography, endobrev)` must be fully resolved for the
//! merge; callers run the endobrev-0 and endobrev-1 passes concurrently.

use std::fmt::Write as _;

use pine_beetle_database_models::{GeographyAxis, SummaryFilter, YearOffset};
use switchy_database::{Database, DatabaseValue};

use crate::DbError;
use crate::queries::filter_frags;

/// Builds the spot-merge statement for one axis, offset, and endobrev
/// literal. The filter scopes the source spot rows.
fn spot_merge_sql(
    axis: GeographyAxis,
    offset: YearOffset,
    endobrev: i32,
    filter: &SummaryFilter,
) -> (String, Vec<DatabaseValue>) {
    let geo = axis.field_name();

    let mut sql = format!(
        "UPDATE {summarized} dst SET {spots_field} = src.spots \
         FROM {spot_table} src \
         WHERE src.state IS NOT NULL AND src.{geo} IS NOT NULL",
        summarized = axis.summarized_table(),
        spots_field = offset.spots_field(),
        spot_table = axis.spot_table(),
    );

    let (frags, mut params, idx) = filter_frags(filter, "src.", geo, 1);
    for frag in &frags {
        write!(sql, " AND {frag}").unwrap();
    }

    write!(
        sql,
        " AND dst.year = src.year + {years} \
         AND dst.state = src.state AND dst.{geo} = src.{geo} \
         AND dst.endobrev = ${idx}",
        years = offset.years(),
    )
    .unwrap();
    params.push(DatabaseValue::Int32(endobrev));

    (sql, params)
}

/// Builds the lookback-projection statement for one axis, offset, and
/// endobrev literal.
fn offset_join_sql(
    axis: GeographyAxis,
    offset: YearOffset,
    endobrev: i32,
    filter: &SummaryFilter,
) -> Result<(String, Vec<DatabaseValue>), DbError> {
    let set_clause = match offset {
        YearOffset::T1 => "spotst1 = src.spotst0, cleridst1 = src.clerids_per2_weeks",
        YearOffset::T2 => "spotst2 = src.spotst0",
        YearOffset::T0 => {
            return Err(DbError::Conversion {
                message: "offset-year join requires a t1 or t2 offset".to_string(),
            });
        }
    };

    let geo = axis.field_name();
    let table = axis.summarized_table();

    let mut sql = format!(
        "UPDATE {table} dst SET {set_clause} \
         FROM {table} src \
         WHERE src.year <> 0 AND src.state IS NOT NULL AND src.{geo} IS NOT NULL"
    );

    let (frags, mut params, idx) = filter_frags(filter, "src.", geo, 1);
    for frag in &frags {
        write!(sql, " AND {frag}").unwrap();
    }

    write!(
        sql,
        " AND dst.year = src.year + {years} \
         AND dst.state = src.state AND dst.{geo} = src.{geo} \
         AND dst.endobrev = ${idx}",
        years = offset.years(),
    )
    .unwrap();
    params.push(DatabaseValue::Int32(endobrev));

    Ok((sql, params))
}

/// Merges external spot counts into `spotst{0,1,2}` on the summarized table
/// for `axis`, one endobrev regime at a time.
///
/// The optional `filter` scopes the *source* spot rows (their own year), not
/// the destination summaries.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn merge_spots(
    db: &dyn Database,
    axis: GeographyAxis,
    offset: YearOffset,
    endobrev: i32,
    filter: &SummaryFilter,
) -> Result<u64, DbError> {
    let (sql, params) = spot_merge_sql(axis, offset, endobrev, filter);
    Ok(db.exec_raw_params(&sql, &params).await?)
}

/// Projects a geography-year's own derived values forward so future rows see
/// them as lookback fields: offset [`YearOffset::T1`] fills `spotst1` and
/// `cleridst1` on the year+1 row, [`YearOffset::T2`] fills `spotst2` on the
/// year+2 row.
///
/// Source rows with a null state/geography or a year-0 sentinel are never
/// joined. The destination endobrev is the passed literal regardless of the
/// source row's endobrev, since pre-split-era data may only exist under one
/// regime.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails, or a
/// [`DbError::Conversion`] if called with [`YearOffset::T0`] (there is
/// nothing to project at offset zero).
pub async fn offset_year_join(
    db: &dyn Database,
    axis: GeographyAxis,
    offset: YearOffset,
    endobrev: i32,
    filter: &SummaryFilter,
) -> Result<u64, DbError> {
    let (sql, params) = offset_join_sql(axis, offset, endobrev, filter)?;
    Ok(db.exec_raw_params(&sql, &params).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_merge_is_update_only() {
        // An UPDATE statement can never create a destination row, which is
        // the merge-if-matched / discard-otherwise contract.
        let (sql, params) =
            spot_merge_sql(GeographyAxis::County, YearOffset::T0, 1, &SummaryFilter::all());

        assert!(sql.starts_with("UPDATE summarized_counties dst SET spotst0 = src.spots"));
        assert!(sql.contains("FROM spot_data_counties src"));
        assert!(sql.contains("dst.year = src.year + 0"));
        assert!(sql.contains("dst.endobrev = $1"));
        assert_eq!(params.len(), 1);
        assert!(matches!(params[0], DatabaseValue::Int32(1)));
    }

    #[test]
    fn spot_merge_filter_scopes_source_rows() {
        let filter = SummaryFilter::state_year("GA".to_string(), 2020);
        let (sql, params) =
            spot_merge_sql(GeographyAxis::RangerDistrict, YearOffset::T1, 0, &filter);

        assert!(sql.contains("src.state = $1"));
        assert!(sql.contains("src.year = $2"));
        assert!(sql.contains("dst.year = src.year + 1"));
        assert!(sql.contains("dst.ranger_district = src.ranger_district"));
        assert!(sql.contains("dst.endobrev = $3"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn offset_join_t1_fills_both_lookback_fields() {
        let (sql, params) =
            offset_join_sql(GeographyAxis::County, YearOffset::T1, 1, &SummaryFilter::all())
                .unwrap();

        assert!(sql.starts_with(
            "UPDATE summarized_counties dst SET spotst1 = src.spotst0, \
             cleridst1 = src.clerids_per2_weeks"
        ));
        assert!(sql.contains("FROM summarized_counties src"));
        assert!(sql.contains("src.year <> 0"));
        assert!(sql.contains("dst.year = src.year + 1"));
        assert_eq!(params.len(), 1);
        assert!(matches!(params[0], DatabaseValue::Int32(1)));
    }

    #[test]
    fn offset_join_t2_fills_only_spotst2() {
        let (sql, _) =
            offset_join_sql(GeographyAxis::County, YearOffset::T2, 0, &SummaryFilter::all())
                .unwrap();

        assert!(sql.contains("SET spotst2 = src.spotst0 "));
        assert!(!sql.contains("cleridst1"));
        assert!(sql.contains("dst.year = src.year + 2"));
    }

    #[test]
    fn offset_join_rejects_t0() {
        assert!(
            offset_join_sql(GeographyAxis::County, YearOffset::T0, 0, &SummaryFilter::all())
                .is_err()
        );
    }
}
