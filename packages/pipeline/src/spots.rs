//! Spot merger: folds external damage-spot counts into the summaries.
//!
//! One call handles one temporal offset (t0/t1/t2). The merge is split into
//! an endobrev-0 and an endobrev-1 pass because the compound unique key
//! requires a concrete endobrev value; the two passes touch disjoint keys
//! and run concurrently.

use pine_beetle_database_models::{GeographyAxis, SummaryFilter, YearOffset};
use switchy_database::Database;

use crate::PipelineError;

/// Merges spot counts into `spotst{offset}` for both endobrev regimes.
/// Returns the number of summary rows updated.
///
/// Only existing summary rows are updated; spots for a geography-year with
/// no summary are discarded.
///
/// # Errors
///
/// Returns [`PipelineError`] if a store operation fails.
pub async fn run(
    db: &dyn Database,
    axis: GeographyAxis,
    offset: YearOffset,
    filter: &SummaryFilter,
) -> Result<u64, PipelineError> {
    let (no_endo, endo) = futures::try_join!(
        pine_beetle_database::merges::merge_spots(db, axis, offset, 0, filter),
        pine_beetle_database::merges::merge_spots(db, axis, offset, 1, filter),
    )?;

    log::info!(
        "Merged {offset} spot data into {} {axis} rows",
        no_endo + endo
    );

    Ok(no_endo + endo)
}
