#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database row types and filter definitions for the pine beetle pipeline.
//!
//! These types represent the shapes of data as stored in and retrieved from
//! the database: raw weekly trapping observations, the per-geography-per-year
//! summaries the pipeline progressively enriches, and the externally supplied
//! spot (damage) counts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Map from trap name to its per-day capture rate for one geography-year.
///
/// A `None` rate means the trap had no recorded active days (or no count),
/// which must never surface as a division fault.
pub type PerTrapRates = BTreeMap<String, Option<f64>>;

/// The grouping dimension for summarization: county or ranger district.
///
/// Every raw trapping record belongs to exactly one axis (the other
/// geography field is null). Each pipeline stage is written once and
/// instantiated per axis; this enum carries the per-axis SQL identifiers so
/// no stage ever branches on a raw string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum GeographyAxis {
    /// County-level grouping.
    County,
    /// Ranger-district-level grouping (federal lands).
    RangerDistrict,
}

impl GeographyAxis {
    /// Both axes, in the order the pipeline runs them.
    pub const ALL: &[Self] = &[Self::County, Self::RangerDistrict];

    /// Column name of this axis' geography field on the raw and summarized
    /// tables.
    #[must_use]
    pub const fn field_name(self) -> &'static str {
        match self {
            Self::County => "county",
            Self::RangerDistrict => "ranger_district",
        }
    }

    /// Table holding this axis' summarized geography-year rows.
    #[must_use]
    pub const fn summarized_table(self) -> &'static str {
        match self {
            Self::County => "summarized_counties",
            Self::RangerDistrict => "summarized_ranger_districts",
        }
    }

    /// Table holding this axis' externally supplied spot counts.
    #[must_use]
    pub const fn spot_table(self) -> &'static str {
        match self {
            Self::County => "spot_data_counties",
            Self::RangerDistrict => "spot_data_ranger_districts",
        }
    }
}

/// Temporal offset for spot merges and lookback joins.
///
/// A source row from year `y` lands in the summary row for year
/// `y + years()`, filling that row's `spots_field()`. T0 merges
/// current-year spots; T1/T2 are the one- and two-year lookbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum YearOffset {
    /// Current year.
    T0,
    /// One year back.
    T1,
    /// Two years back.
    T2,
}

impl YearOffset {
    /// Number of years a source row is projected forward.
    #[must_use]
    pub const fn years(self) -> i32 {
        match self {
            Self::T0 => 0,
            Self::T1 => 1,
            Self::T2 => 2,
        }
    }

    /// Destination spot column on the summarized tables.
    #[must_use]
    pub const fn spots_field(self) -> &'static str {
        match self {
            Self::T0 => "spotst0",
            Self::T1 => "spotst1",
            Self::T2 => "spotst2",
        }
    }
}

/// Trapping season. Only spring records are summarized.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Season {
    /// Spring collection (the aggregation window).
    Spring,
    /// Fall collection.
    Fall,
}

/// One trap, one week, one year of raw field observations.
///
/// Immutable once recorded; created by the ingestion collaborator and only
/// ever read by the pipeline. Exactly one of `county` / `ranger_district` is
/// non-null per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsummarizedTrappingRow {
    /// Primary key.
    pub id: i64,
    /// Two-letter state abbreviation.
    pub state: Option<String>,
    /// County name (null for ranger-district records).
    pub county: Option<String>,
    /// Ranger district name (null for county records).
    pub ranger_district: Option<String>,
    /// FIPS county code.
    pub fips: Option<i32>,
    /// Trap identifier within the geography.
    pub trap: Option<String>,
    /// Observation year.
    pub year: i32,
    /// Week of year (1-52).
    pub week: Option<i32>,
    /// Trapping season (`spring` / `fall`).
    pub season: Option<String>,
    /// Whether endo-brevicomin was used on the lure (0/1).
    pub endobrev: Option<i32>,
    /// Southern pine beetles captured this week.
    pub spb_count: Option<i64>,
    /// Clerid (predator) beetles captured this week.
    pub clerid_count: Option<i64>,
    /// Days the trap was active this week.
    pub days_active: Option<i64>,
    /// Date the trap was emptied.
    pub collection_date: Option<chrono::NaiveDateTime>,
    /// Trap latitude (WGS84).
    pub latitude: Option<f64>,
    /// Trap longitude (WGS84).
    pub longitude: Option<f64>,
    /// Lure type.
    pub lure: Option<String>,
}

impl UnsummarizedTrappingRow {
    /// Returns the geography name for the given axis, or `None` if this
    /// record belongs to the other axis.
    #[must_use]
    pub fn geography(&self, axis: GeographyAxis) -> Option<&str> {
        match axis {
            GeographyAxis::County => self.county.as_deref(),
            GeographyAxis::RangerDistrict => self.ranger_district.as_deref(),
        }
    }
}

/// Unique compound key of a summarized geography-year document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoYearKey {
    /// Summary year.
    pub year: i32,
    /// Two-letter state abbreviation.
    pub state: String,
    /// Geography name (county or ranger district, per axis).
    pub geography: String,
    /// Endobrev regime (0/1); part of the key because endobrev and
    /// non-endobrev trapping in the same place and year are separate data.
    pub endobrev: i32,
}

/// One summarized geography-year row, unique on
/// `(year, state, geography, endobrev)`.
///
/// Created by the aggregator and progressively enriched in place: the spot
/// merger fills `spotst*`, the offset-year joiner fills lookback fields, the
/// indicator pass fills the 0/1 flags, and the prediction / calculated-field
/// stages fill the model outputs. Every writer merges only the fields it
/// owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizedRow {
    /// Summary year.
    pub year: i32,
    /// Two-letter state abbreviation.
    pub state: Option<String>,
    /// Geography name (county or ranger district, per axis).
    pub geography: Option<String>,
    /// Endobrev regime (0/1).
    pub endobrev: Option<i32>,
    /// FIPS county code (county axis only).
    pub fips: Option<i32>,
    /// Historical federal land name (ranger-district axis, download only).
    pub federal_name_old: Option<String>,
    /// Older historical federal land name (ranger-district axis, download only).
    pub federal_name_older: Option<String>,
    /// Total SPB captured across all traps.
    pub spb_count: Option<i64>,
    /// Total clerids captured across all traps.
    pub clerid_count: Option<i64>,
    /// SPB per trap per 14 days; for endobrev = 0 rows this carries the
    /// historical x10 lure normalization.
    pub spb_per2_weeks: Option<f64>,
    /// Un-normalized SPB per trap per 14 days, kept for download
    /// compatibility.
    pub spb_per2_weeks_orig: Option<f64>,
    /// Clerids per trap per 14 days.
    pub clerids_per2_weeks: Option<f64>,
    /// Per-trap SPB capture rates (trap name -> per-day rate).
    pub spb_per_day: PerTrapRates,
    /// Per-trap clerid capture rates (trap name -> per-day rate).
    pub clerid_per_day: PerTrapRates,
    /// Number of traps contributing to this summary.
    pub trap_count: Option<i64>,
    /// Total active trap-days.
    pub total_trapping_days: Option<i64>,
    /// Average days per trap (`total_trapping_days / trap_count`, rounded).
    pub days_per_trap: Option<f64>,
    /// Spots observed this year.
    pub spotst0: Option<i64>,
    /// Spots observed one year prior.
    pub spotst1: Option<i64>,
    /// Spots observed two years prior.
    pub spotst2: Option<i64>,
    /// Clerids per 2 weeks in this geography one year prior.
    pub cleridst1: Option<f64>,
    /// Indicator (0/1): SPB trapping occurred this geography-year.
    pub has_spb_trapping: Option<i32>,
    /// Indicator (0/1): row is eligible for prediction.
    pub is_valid_for_prediction: Option<i32>,
    /// Indicator (0/1): spots were counted this geography-year.
    pub has_spotst0: Option<i32>,
    /// Indicator (0/1): both a prediction and an observed outcome exist.
    pub has_prediction_and_outcome: Option<i32>,
    /// Model output: zero-inflation parameter.
    pub pi: Option<f64>,
    /// Model output: outbreak-size parameter.
    pub mu: Option<f64>,
    /// Model output: expected spots if an outbreak occurs (rounded).
    pub exp_spots_if_outbreak: Option<i64>,
    /// Model output: probability of more than 0 spots.
    #[serde(rename = "probSpotsGT0")]
    pub prob_spots_gt0: Option<f64>,
    /// Model output: probability of more than 20 spots.
    #[serde(rename = "probSpotsGT20")]
    pub prob_spots_gt20: Option<f64>,
    /// Model output: probability of more than 50 spots.
    #[serde(rename = "probSpotsGT50")]
    pub prob_spots_gt50: Option<f64>,
    /// Model output: probability of more than 150 spots.
    #[serde(rename = "probSpotsGT150")]
    pub prob_spots_gt150: Option<f64>,
    /// Model output: probability of more than 400 spots.
    #[serde(rename = "probSpotsGT400")]
    pub prob_spots_gt400: Option<f64>,
    /// Model output: probability of more than 1000 spots.
    #[serde(rename = "probSpotsGT1000")]
    pub prob_spots_gt1000: Option<f64>,
    /// Diagnostic: `ln(spbPer2Weeks + 1)`.
    #[serde(rename = "ln(spbPer2Weeks+1)")]
    pub ln_spb_per2_weeks: Option<f64>,
    /// Diagnostic: `ln(cleridsPer2Weeks + 1)`.
    #[serde(rename = "ln(cleridsPer2Weeks+1)")]
    pub ln_clerids_per2_weeks: Option<f64>,
    /// Diagnostic: `ln(spotst0 + 1)`.
    #[serde(rename = "ln(spotst0+1)")]
    pub ln_spotst0: Option<f64>,
    /// Diagnostic: `logit(probSpotsGT50)`.
    #[serde(rename = "logit(Prob>50)")]
    pub logit_prob_gt50: Option<f64>,
    /// Diagnostic: predicted spots in log units.
    #[serde(rename = "predSpotslogUnits")]
    pub pred_spots_log_units: Option<f64>,
    /// Diagnostic: predicted spots back-transformed to original units.
    #[serde(rename = "predSpotsorigUnits")]
    pub pred_spots_orig_units: Option<f64>,
    /// Diagnostic: observed minus predicted spots in log units.
    #[serde(rename = "residualSpotslogUnits")]
    pub residual_spots_log_units: Option<f64>,
}

impl SummarizedRow {
    /// Returns the compound key if every key component is present.
    #[must_use]
    pub fn key(&self) -> Option<GeoYearKey> {
        Some(GeoYearKey {
            year: self.year,
            state: self.state.clone()?,
            geography: self.geography.clone()?,
            endobrev: self.endobrev?,
        })
    }
}

/// An externally supplied damage-spot observation, unique on
/// `(year, state, geography)`. Read-only input to the spot merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotRow {
    /// Observation year.
    pub year: i32,
    /// Two-letter state abbreviation.
    pub state: Option<String>,
    /// Geography name (county or ranger district, per axis).
    pub geography: Option<String>,
    /// FIPS county code (county axis only).
    pub fips: Option<i32>,
    /// Host acreage in the geography.
    pub host_ac: Option<f64>,
    /// Number of damage spots observed.
    pub spots: Option<i64>,
}

/// Optional state/year constraints threaded through every pipeline stage.
///
/// An empty filter selects the whole collection; the scoped pipeline entry
/// point sets `state` + `year`, the run-all entry point sets `min_year` from
/// the cutoff year.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFilter {
    /// Match a single state.
    pub state: Option<String>,
    /// Match a single year.
    pub year: Option<i32>,
    /// Match years `>= min_year`.
    pub min_year: Option<i32>,
    /// Match years `<= max_year`.
    pub max_year: Option<i32>,
    /// Match a single geography name.
    pub geography: Option<String>,
}

impl SummaryFilter {
    /// A filter matching everything.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            state: None,
            year: None,
            min_year: None,
            max_year: None,
            geography: None,
        }
    }

    /// A filter scoped to one state and year.
    #[must_use]
    pub const fn state_year(state: String, year: i32) -> Self {
        Self {
            state: Some(state),
            year: Some(year),
            min_year: None,
            max_year: None,
            geography: None,
        }
    }

    /// A filter matching all years `>= min_year`.
    #[must_use]
    pub const fn from_year(min_year: i32) -> Self {
        Self {
            state: None,
            year: None,
            min_year: Some(min_year),
            max_year: None,
            geography: None,
        }
    }

    /// Returns this filter with every year constraint shifted by `offset`.
    ///
    /// The t1/t2 lookback passes read source rows one and two years before
    /// the target window, so the scoped year (and cutoff) must move with
    /// them.
    #[must_use]
    pub fn shift_years(&self, offset: i32) -> Self {
        Self {
            state: self.state.clone(),
            year: self.year.map(|y| y + offset),
            min_year: self.min_year.map(|y| y + offset),
            max_year: self.max_year.map(|y| y + offset),
            geography: self.geography.clone(),
        }
    }
}

/// The four readiness flags derived from field presence on a summarized row.
///
/// Persisted as 0/1 integers; `is_valid_for_prediction` gates the prediction
/// generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorFlags {
    /// SPB trapping occurred (per-2-weeks rate is non-null).
    pub has_spb_trapping: bool,
    /// Eligible for prediction (trapping plus both lookback spot counts).
    pub is_valid_for_prediction: bool,
    /// Spots were counted this year.
    pub has_spotst0: bool,
    /// Both a prediction input and an observed outcome exist.
    pub has_prediction_and_outcome: bool,
}

impl IndicatorFlags {
    /// Derives the flags from the already-materialized summary fields.
    /// Pure null-checks; no other branching.
    #[must_use]
    pub const fn from_fields(
        spb_per2_weeks: Option<f64>,
        spotst0: Option<i64>,
        spotst1: Option<i64>,
        spotst2: Option<i64>,
    ) -> Self {
        let has_spb_trapping = spb_per2_weeks.is_some();
        let is_valid_for_prediction =
            has_spb_trapping && spotst1.is_some() && spotst2.is_some();
        let has_spotst0 = spotst0.is_some();
        let has_prediction_and_outcome = is_valid_for_prediction && has_spotst0;

        Self {
            has_spb_trapping,
            is_valid_for_prediction,
            has_spotst0,
            has_prediction_and_outcome,
        }
    }
}

/// Aggregator output for one geography-year: the trapping-owned column
/// group of [`SummarizedRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoYearSummary {
    /// Compound key.
    pub key: GeoYearKey,
    /// FIPS county code (county axis only).
    pub fips: Option<i32>,
    /// Total SPB captured.
    pub spb_count: i64,
    /// Total clerids captured.
    pub clerid_count: i64,
    /// Normalized SPB per trap per 14 days.
    pub spb_per2_weeks: Option<f64>,
    /// Un-normalized SPB per trap per 14 days.
    pub spb_per2_weeks_orig: Option<f64>,
    /// Clerids per trap per 14 days.
    pub clerids_per2_weeks: Option<f64>,
    /// Per-trap SPB rates.
    pub spb_per_day: PerTrapRates,
    /// Per-trap clerid rates.
    pub clerid_per_day: PerTrapRates,
    /// Number of traps.
    pub trap_count: i64,
    /// Total active trap-days.
    pub total_trapping_days: i64,
    /// Rounded average days per trap.
    pub days_per_trap: Option<f64>,
}

/// Prediction-stage output for one geography-year: the model-owned column
/// group of [`SummarizedRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRow {
    /// Compound key.
    pub key: GeoYearKey,
    /// Zero-inflation parameter.
    pub pi: Option<f64>,
    /// Outbreak-size parameter.
    pub mu: Option<f64>,
    /// Expected spots if an outbreak occurs, rounded; null when the model
    /// returned a non-numeric value.
    pub exp_spots_if_outbreak: Option<i64>,
    /// Probability of more than 0 spots.
    pub prob_spots_gt0: Option<f64>,
    /// Probability of more than 20 spots.
    pub prob_spots_gt20: Option<f64>,
    /// Probability of more than 50 spots.
    pub prob_spots_gt50: Option<f64>,
    /// Probability of more than 150 spots.
    pub prob_spots_gt150: Option<f64>,
    /// Probability of more than 400 spots.
    pub prob_spots_gt400: Option<f64>,
    /// Probability of more than 1000 spots.
    pub prob_spots_gt1000: Option<f64>,
}

/// Calculated-fields output for one geography-year: the diagnostics-owned
/// column group of [`SummarizedRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedFieldsRow {
    /// Compound key.
    pub key: GeoYearKey,
    /// `ln(spbPer2Weeks + 1)`.
    pub ln_spb_per2_weeks: Option<f64>,
    /// `ln(cleridsPer2Weeks + 1)`.
    pub ln_clerids_per2_weeks: Option<f64>,
    /// `ln(spotst0 + 1)`.
    pub ln_spotst0: Option<f64>,
    /// `logit(probSpotsGT50)`.
    pub logit_prob_gt50: Option<f64>,
    /// Predicted spots in log units.
    pub pred_spots_log_units: Option<f64>,
    /// Predicted spots in original units, rounded; null when non-numeric.
    pub pred_spots_orig_units: Option<f64>,
    /// Observed minus predicted spots in log units.
    pub residual_spots_log_units: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_field_names() {
        assert_eq!(GeographyAxis::County.field_name(), "county");
        assert_eq!(GeographyAxis::RangerDistrict.field_name(), "ranger_district");
    }

    #[test]
    fn axis_string_round_trip() {
        assert_eq!(GeographyAxis::County.to_string(), "county");
        assert_eq!(GeographyAxis::RangerDistrict.to_string(), "rangerDistrict");
        assert_eq!(
            "rangerDistrict".parse::<GeographyAxis>().unwrap(),
            GeographyAxis::RangerDistrict
        );
    }

    #[test]
    fn offsets_project_forward() {
        assert_eq!(YearOffset::T0.years(), 0);
        assert_eq!(YearOffset::T1.years(), 1);
        assert_eq!(YearOffset::T2.years(), 2);
        assert_eq!(YearOffset::T1.spots_field(), "spotst1");
        assert_eq!("t2".parse::<YearOffset>().unwrap(), YearOffset::T2);
    }

    #[test]
    fn season_matches_raw_records() {
        assert_eq!(Season::Spring.as_ref(), "spring");
        assert_eq!("fall".parse::<Season>().unwrap(), Season::Fall);
    }

    #[test]
    fn geography_follows_axis() {
        let row = UnsummarizedTrappingRow {
            id: 1,
            state: Some("GA".to_string()),
            county: Some("Alpha".to_string()),
            ranger_district: None,
            fips: None,
            trap: Some("T1".to_string()),
            year: 2020,
            week: Some(14),
            season: Some("spring".to_string()),
            endobrev: Some(1),
            spb_count: Some(20),
            clerid_count: Some(3),
            days_active: Some(14),
            collection_date: None,
            latitude: None,
            longitude: None,
            lure: None,
        };

        assert_eq!(row.geography(GeographyAxis::County), Some("Alpha"));
        assert_eq!(row.geography(GeographyAxis::RangerDistrict), None);
    }

    #[test]
    fn indicator_truth_table() {
        // All 8 combinations of (has trapping, has spotst1, has spotst2).
        for has_spb in [false, true] {
            for has_t1 in [false, true] {
                for has_t2 in [false, true] {
                    let flags = IndicatorFlags::from_fields(
                        has_spb.then_some(10.0),
                        None,
                        has_t1.then_some(1),
                        has_t2.then_some(2),
                    );

                    assert_eq!(flags.has_spb_trapping, has_spb);
                    assert_eq!(
                        flags.is_valid_for_prediction,
                        has_spb && has_t1 && has_t2,
                        "spb={has_spb} t1={has_t1} t2={has_t2}"
                    );
                    assert!(!flags.has_spotst0);
                    assert!(!flags.has_prediction_and_outcome);
                }
            }
        }
    }

    #[test]
    fn outcome_requires_validity_and_spots() {
        let flags = IndicatorFlags::from_fields(Some(5.0), Some(3), Some(1), Some(0));
        assert!(flags.is_valid_for_prediction);
        assert!(flags.has_spotst0);
        assert!(flags.has_prediction_and_outcome);

        // Spots alone are not an outcome without a valid prediction.
        let flags = IndicatorFlags::from_fields(None, Some(3), Some(1), Some(0));
        assert!(flags.has_spotst0);
        assert!(!flags.has_prediction_and_outcome);
    }

    #[test]
    fn summarized_key_requires_all_components() {
        let mut row = SummarizedRow {
            year: 2021,
            state: Some("GA".to_string()),
            geography: Some("Alpha".to_string()),
            endobrev: Some(1),
            ..SummarizedRow::default()
        };
        assert_eq!(
            row.key(),
            Some(GeoYearKey {
                year: 2021,
                state: "GA".to_string(),
                geography: "Alpha".to_string(),
                endobrev: 1,
            })
        );

        row.endobrev = None;
        assert_eq!(row.key(), None);
    }

    #[test]
    fn filter_year_shift() {
        let filter = SummaryFilter::state_year("GA".to_string(), 2021);
        let shifted = filter.shift_years(-2);
        assert_eq!(shifted.year, Some(2019));
        assert_eq!(shifted.state.as_deref(), Some("GA"));

        let cutoff = SummaryFilter::from_year(2021).shift_years(-1);
        assert_eq!(cutoff.min_year, Some(2020));
    }

    #[test]
    fn model_output_field_spellings() {
        let row = SummarizedRow {
            year: 2021,
            prob_spots_gt50: Some(0.5),
            ln_spotst0: Some(1.1),
            logit_prob_gt50: Some(0.0),
            pred_spots_log_units: Some(2.2),
            ..SummarizedRow::default()
        };

        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("probSpotsGT50").is_some());
        assert!(json.get("ln(spotst0+1)").is_some());
        assert!(json.get("logit(Prob>50)").is_some());
        assert!(json.get("predSpotslogUnits").is_some());
    }
}
