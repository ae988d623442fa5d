//! Two-stage aggregation of raw trapping records into geography-year
//! summaries.
//!
//! Stage one groups by (endobrev, geography, state, trap, year) and sums
//! counts and active days per trap. Stage two groups the trap totals by
//! (endobrev, geography, state, year) and derives the per-two-week rates,
//! per-trap rate maps, and trap statistics. The result is upsert-merged
//! into the summarized table, touching only the trapping-owned columns.

use std::collections::BTreeMap;

use pine_beetle_database_models::{
    GeoYearKey, GeoYearSummary, GeographyAxis, PerTrapRates, Season, SummaryFilter,
    UnsummarizedTrappingRow,
};
use switchy_database::Database;

use crate::PipelineError;

/// Added before rounding to counteract the round-half-to-even bias on
/// values that land exactly on .5 after floating-point division.
pub const ROUND_EPSILON: f64 = 1e-7;

/// Days in the standardized two-week reporting window.
const TWO_WEEKS: f64 = 14.0;

/// Historical normalization factor applied to SPB rates trapped without
/// endo-brevicomin, so both lure regimes read on the same scale.
const NO_ENDOBREV_FACTOR: f64 = 10.0;

fn round_rate(value: f64) -> f64 {
    (value + ROUND_EPSILON).round()
}

#[derive(Debug, Default)]
struct TrapTotals {
    spb_count: i64,
    clerid_count: i64,
    days_active: i64,
    fips: Option<i32>,
}

#[derive(Debug, Default)]
struct GeoYearTotals {
    spb_count: i64,
    clerid_count: i64,
    total_trapping_days: i64,
    trap_count: i64,
    spb_per_day: PerTrapRates,
    clerid_per_day: PerTrapRates,
    spb_rates: Vec<f64>,
    clerid_rates: Vec<f64>,
    fips: Option<i32>,
}

/// Average of the valid (non-null) per-trap rates. Traps whose rate is null
/// contribute nothing, matching aggregate-average semantics over missing
/// values.
fn unweighted_avg(rates: &[f64]) -> Option<f64> {
    if rates.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = rates.len() as f64;
    Some(rates.iter().sum::<f64>() / count)
}

/// Runs the two-stage grouping over pre-filtered raw records.
///
/// Records outside the spring season, on the other geography axis, or
/// missing a key component (state, trap, endobrev) are skipped. A trap
/// group with zero active days yields a null rate, never a division fault.
///
/// The output is ordered by key, so re-running over unchanged input yields
/// an identical result.
#[must_use]
pub fn summarize_rows(rows: &[UnsummarizedTrappingRow], axis: GeographyAxis) -> Vec<GeoYearSummary> {
    // Stage one: per-trap totals within a geography-year.
    let mut trap_totals: BTreeMap<(GeoYearKey, String), TrapTotals> = BTreeMap::new();

    for row in rows {
        if row.season.as_deref() != Some(Season::Spring.as_ref()) {
            continue;
        }
        let Some(geography) = row.geography(axis) else {
            continue;
        };
        let (Some(state), Some(trap), Some(endobrev)) =
            (row.state.as_deref(), row.trap.as_deref(), row.endobrev)
        else {
            log::warn!(
                "Skipping raw trapping record {} with incomplete grouping key",
                row.id
            );
            continue;
        };

        let key = (
            GeoYearKey {
                year: row.year,
                state: state.to_string(),
                geography: geography.to_string(),
                endobrev,
            },
            trap.to_string(),
        );

        let totals = trap_totals.entry(key).or_default();
        totals.spb_count += row.spb_count.unwrap_or(0);
        totals.clerid_count += row.clerid_count.unwrap_or(0);
        totals.days_active += row.days_active.unwrap_or(0);
        if totals.fips.is_none() {
            totals.fips = row.fips;
        }
    }

    // Stage two: geography-year totals across traps.
    let mut geo_totals: BTreeMap<GeoYearKey, GeoYearTotals> = BTreeMap::new();

    for ((key, trap), totals) in trap_totals {
        let entry = geo_totals.entry(key).or_default();

        #[allow(clippy::cast_precision_loss)]
        let (spb_rate, clerid_rate) = if totals.days_active > 0 {
            (
                Some(totals.spb_count as f64 / totals.days_active as f64),
                Some(totals.clerid_count as f64 / totals.days_active as f64),
            )
        } else {
            (None, None)
        };

        entry.spb_count += totals.spb_count;
        entry.clerid_count += totals.clerid_count;
        entry.total_trapping_days += totals.days_active;
        entry.trap_count += 1;
        entry.spb_per_day.insert(trap.clone(), spb_rate);
        entry.clerid_per_day.insert(trap, clerid_rate);
        if let Some(rate) = spb_rate {
            entry.spb_rates.push(rate);
        }
        if let Some(rate) = clerid_rate {
            entry.clerid_rates.push(rate);
        }
        if entry.fips.is_none() {
            entry.fips = totals.fips;
        }
    }

    geo_totals
        .into_iter()
        .map(|(key, totals)| {
            let spb_avg = unweighted_avg(&totals.spb_rates);
            let clerid_avg = unweighted_avg(&totals.clerid_rates);

            let spb_per2_weeks_orig = spb_avg.map(|avg| round_rate(TWO_WEEKS * avg));
            let spb_per2_weeks = if key.endobrev == 1 {
                spb_per2_weeks_orig
            } else {
                spb_avg.map(|avg| round_rate(TWO_WEEKS * avg * NO_ENDOBREV_FACTOR))
            };

            #[allow(clippy::cast_precision_loss)]
            let days_per_trap =
                round_rate(totals.total_trapping_days as f64 / totals.trap_count as f64);

            GeoYearSummary {
                key,
                fips: totals.fips,
                spb_count: totals.spb_count,
                clerid_count: totals.clerid_count,
                spb_per2_weeks,
                spb_per2_weeks_orig,
                clerids_per2_weeks: clerid_avg.map(|avg| round_rate(TWO_WEEKS * avg)),
                spb_per_day: totals.spb_per_day,
                clerid_per_day: totals.clerid_per_day,
                trap_count: totals.trap_count,
                total_trapping_days: totals.total_trapping_days,
                days_per_trap: Some(days_per_trap),
            }
        })
        .collect()
}

/// Summarizes all raw spring trapping in scope and upsert-merges the result
/// into the summarized table for `axis`. Returns the number of summaries
/// written.
///
/// # Errors
///
/// Returns [`PipelineError`] if a store operation fails.
pub async fn run(
    db: &dyn Database,
    axis: GeographyAxis,
    filter: &SummaryFilter,
) -> Result<u64, PipelineError> {
    let rows = pine_beetle_database::queries::fetch_unsummarized(db, axis, filter).await?;
    let summaries = summarize_rows(&rows, axis);

    log::info!(
        "Summarized {} raw records into {} {axis} geography-years",
        rows.len(),
        summaries.len(),
    );

    pine_beetle_database::queries::upsert_summaries(db, axis, &summaries).await?;

    Ok(summaries.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(
        county: &str,
        trap: &str,
        endobrev: i32,
        spb: i64,
        clerid: i64,
        days: i64,
    ) -> UnsummarizedTrappingRow {
        UnsummarizedTrappingRow {
            id: 0,
            state: Some("GA".to_string()),
            county: Some(county.to_string()),
            ranger_district: None,
            fips: Some(13001),
            trap: Some(trap.to_string()),
            year: 2020,
            week: Some(14),
            season: Some("spring".to_string()),
            endobrev: Some(endobrev),
            spb_count: Some(spb),
            clerid_count: Some(clerid),
            days_active: Some(days),
            collection_date: None,
            latitude: None,
            longitude: None,
            lure: None,
        }
    }

    #[test]
    fn single_trap_two_week_rate() {
        // One trap, 14 active days, 20 beetles: round(14 * (20/14)) = 20.
        let rows = vec![raw("Alpha", "T1", 1, 20, 0, 14)];
        let summaries = summarize_rows(&rows, GeographyAxis::County);

        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.key.year, 2020);
        assert_eq!(summary.key.state, "GA");
        assert_eq!(summary.key.geography, "Alpha");
        assert_eq!(summary.spb_per2_weeks, Some(20.0));
        assert_eq!(summary.spb_per2_weeks_orig, Some(20.0));
        assert_eq!(summary.trap_count, 1);
        assert_eq!(summary.total_trapping_days, 14);
        assert_eq!(summary.days_per_trap, Some(14.0));
    }

    #[test]
    fn endobrev_one_is_not_normalized() {
        // Rate of 10 per trap per day: round(14 * 10) = 140.
        let rows = vec![raw("Alpha", "T1", 1, 140, 140, 14)];
        let summaries = summarize_rows(&rows, GeographyAxis::County);

        assert_eq!(summaries[0].spb_per2_weeks, Some(140.0));
        assert_eq!(summaries[0].spb_per2_weeks_orig, Some(140.0));
        assert_eq!(summaries[0].clerids_per2_weeks, Some(140.0));
    }

    #[test]
    fn endobrev_zero_normalizes_spb_and_keeps_orig() {
        // Same rate of 10 per day under endobrev 0: the normalized value is
        // round(14 * 10 * 10) = 1400 while the orig column keeps 140.
        let rows = vec![raw("Alpha", "T1", 0, 140, 140, 14)];
        let summaries = summarize_rows(&rows, GeographyAxis::County);

        assert_eq!(summaries[0].spb_per2_weeks, Some(1400.0));
        assert_eq!(summaries[0].spb_per2_weeks_orig, Some(140.0));
        // The clerid rate carries no lure normalization.
        assert_eq!(summaries[0].clerids_per2_weeks, Some(140.0));
    }

    #[test]
    fn zero_active_days_yields_null_rates() {
        let rows = vec![raw("Alpha", "T1", 1, 20, 5, 0)];
        let summaries = summarize_rows(&rows, GeographyAxis::County);

        let summary = &summaries[0];
        assert_eq!(summary.spb_per2_weeks, None);
        assert_eq!(summary.spb_per2_weeks_orig, None);
        assert_eq!(summary.clerids_per2_weeks, None);
        assert_eq!(summary.spb_per_day.get("T1"), Some(&None));
        assert_eq!(summary.total_trapping_days, 0);
    }

    #[test]
    fn average_is_unweighted_across_traps() {
        // Trap A: 10 beetles over 10 days (rate 1). Trap B: 20 over 5
        // (rate 4). Unweighted average is 2.5 -> round(35) = 35; a
        // weighted total/total average would give 28 instead.
        let rows = vec![raw("Alpha", "A", 1, 10, 0, 10), raw("Alpha", "B", 1, 20, 0, 5)];
        let summaries = summarize_rows(&rows, GeographyAxis::County);

        let summary = &summaries[0];
        assert_eq!(summary.spb_per2_weeks, Some(35.0));
        assert_eq!(summary.trap_count, 2);
        assert_eq!(summary.total_trapping_days, 15);
        assert_eq!(summary.spb_per_day.get("A"), Some(&Some(1.0)));
        assert_eq!(summary.spb_per_day.get("B"), Some(&Some(4.0)));
        // 15 days / 2 traps = 7.5, epsilon pushes the half up to 8.
        assert_eq!(summary.days_per_trap, Some(8.0));
    }

    #[test]
    fn weekly_records_accumulate_per_trap() {
        let rows = vec![raw("Alpha", "T1", 1, 10, 1, 7), raw("Alpha", "T1", 1, 10, 1, 7)];
        let summaries = summarize_rows(&rows, GeographyAxis::County);

        let summary = &summaries[0];
        assert_eq!(summary.trap_count, 1);
        assert_eq!(summary.spb_count, 20);
        assert_eq!(summary.total_trapping_days, 14);
        assert_eq!(summary.spb_per2_weeks, Some(20.0));
    }

    #[test]
    fn endobrev_regimes_stay_separate() {
        let rows = vec![raw("Alpha", "T1", 0, 10, 0, 10), raw("Alpha", "T2", 1, 10, 0, 10)];
        let summaries = summarize_rows(&rows, GeographyAxis::County);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].key.endobrev, 0);
        assert_eq!(summaries[1].key.endobrev, 1);
    }

    #[test]
    fn other_axis_and_off_season_records_are_excluded() {
        let mut fall = raw("Alpha", "T1", 1, 10, 0, 10);
        fall.season = Some("fall".to_string());

        let mut other_axis = raw("Alpha", "T1", 1, 10, 0, 10);
        other_axis.county = None;
        other_axis.ranger_district = Some("District 9".to_string());

        let summaries = summarize_rows(&[fall, other_axis], GeographyAxis::County);
        assert!(summaries.is_empty());
    }

    #[test]
    fn summarize_is_idempotent_over_unchanged_input() {
        let rows = vec![raw("Alpha", "A", 1, 10, 2, 10), raw("Beta", "B", 0, 3, 0, 7)];
        let first = summarize_rows(&rows, GeographyAxis::County);
        let second = summarize_rows(&rows, GeographyAxis::County);
        assert_eq!(first, second);
    }

    #[test]
    fn county_fips_carried_from_first_record() {
        let rows = vec![raw("Alpha", "T1", 1, 1, 0, 7)];
        let summaries = summarize_rows(&rows, GeographyAxis::County);
        assert_eq!(summaries[0].fips, Some(13001));
    }
}
