//! Offset-year joiner: projects each geography-year's own derived values
//! forward so future rows can read them as lookback fields.
//!
//! Implemented as a write-forward projection instead of a read-time join:
//! the t1 pass writes `spotst1`/`cleridst1` onto the year+1 row, the t2
//! pass writes `spotst2` onto the year+2 row. Downstream stages then only
//! ever read single rows. Like the spot merger, each offset is split into
//! two concurrent single-endobrev passes, and projections whose destination
//! row does not exist are discarded — the joiner never creates rows.

use pine_beetle_database_models::{GeographyAxis, SummaryFilter, YearOffset};
use switchy_database::Database;

use crate::PipelineError;

/// Runs the lookback projection for one offset across both endobrev
/// regimes. Returns the number of summary rows updated.
///
/// # Errors
///
/// Returns [`PipelineError`] if a store operation fails or the offset is
/// [`YearOffset::T0`].
pub async fn run(
    db: &dyn Database,
    axis: GeographyAxis,
    offset: YearOffset,
    filter: &SummaryFilter,
) -> Result<u64, PipelineError> {
    let (no_endo, endo) = futures::try_join!(
        pine_beetle_database::merges::offset_year_join(db, axis, offset, 0, filter),
        pine_beetle_database::merges::offset_year_join(db, axis, offset, 1, filter),
    )?;

    log::info!(
        "Projected {offset} lookback fields onto {} {axis} rows",
        no_endo + endo
    );

    Ok(no_endo + endo)
}
