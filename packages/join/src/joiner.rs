//! Multi-year rotation join.
//!
//! Each historical year is resolved independently: one [`PlotIndex`] is
//! built for the year, every current parcel is resolved against it in
//! parallel, and the outcomes are written into the joined records in one
//! pass. Years run in ascending order so logs and columns come out in a
//! stable order.

use std::collections::BTreeMap;
use std::sync::Arc;

use crop_rotation_plots_models::{JoinedRecord, PlotTable, Year, YearMatch};
use crop_rotation_spatial::PlotIndex;
use rayon::prelude::*;

use crate::progress::{ProgressCallback, null_progress};
use crate::resolver::resolve;
use crate::{JoinError, JoinOptions};

/// Per-parcel outcomes for one historical year, in current row order.
#[derive(Debug, Clone, PartialEq)]
pub struct YearOutcome {
    pub year: Year,
    pub matches: Vec<Option<YearMatch>>,
    /// Index candidates examined across all current parcels.
    pub candidates: usize,
    /// Intersections that failed and counted as zero.
    pub faults: usize,
}

impl YearOutcome {
    /// Number of current parcels that found a match.
    #[must_use]
    pub fn matched(&self) -> usize {
        self.matches.iter().filter(|m| m.is_some()).count()
    }
}

/// Historical years to join, ascending, without `current_year`.
#[must_use]
pub fn historical_years(current_year: Year, historical: &BTreeMap<Year, PlotTable>) -> Vec<Year> {
    historical
        .keys()
        .copied()
        .filter(|&year| {
            if year == current_year {
                log::info!("Skipping historical dataset for {year}: it is the current year");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Resolves every parcel of `current` against `table`.
///
/// Runs on the ambient `rayon` pool. Reports one unit of progress per
/// current parcel.
#[must_use]
pub fn resolve_year(
    current: &PlotTable,
    year: Year,
    table: &PlotTable,
    min_overlap_area: f64,
    progress: &dyn ProgressCallback,
) -> YearOutcome {
    let index = PlotIndex::build(table);

    let resolved: Vec<(usize, usize, Option<YearMatch>)> = current
        .parcels()
        .par_iter()
        .map(|parcel| {
            let resolution = resolve(parcel, &index, min_overlap_area);
            progress.inc(1);
            (
                resolution.candidates,
                resolution.faults,
                resolution.into_year_match(),
            )
        })
        .collect();

    let mut candidates = 0;
    let mut faults = 0;
    let mut matches = Vec::with_capacity(resolved.len());
    for (examined, failed, found) in resolved {
        candidates += examined;
        faults += failed;
        matches.push(found);
    }

    YearOutcome {
        year,
        matches,
        candidates,
        faults,
    }
}

/// Writes one year's outcomes into `records`.
///
/// `records` and `outcome.matches` are both in current row order. Only the
/// year mapping of each record is touched.
pub fn apply_year(records: &mut [JoinedRecord], outcome: YearOutcome) {
    debug_assert_eq!(records.len(), outcome.matches.len());

    let year = outcome.year;
    for (record, found) in records.iter_mut().zip(outcome.matches) {
        record.record_year(year, found);
    }
}

/// Joins the crop history of every historical year onto `current`.
///
/// Returns one record per current parcel, in current row order. A year
/// keyed the same as `current.year` is skipped. A year with no parcels
/// leaves every record without an entry for it.
///
/// # Errors
///
/// Returns [`JoinError`] if `options` are invalid or the worker pool
/// cannot be started. Geometry problems never fail the join.
pub fn join_rotations(
    current: &PlotTable,
    historical: &BTreeMap<Year, PlotTable>,
    options: &JoinOptions,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<Vec<JoinedRecord>, JoinError> {
    options.validate()?;
    let progress = progress.unwrap_or_else(null_progress);

    let years = historical_years(current.year, historical);
    let mut records: Vec<JoinedRecord> = current
        .parcels()
        .iter()
        .map(JoinedRecord::from_parcel)
        .collect();

    log::info!(
        "Joining {} historical year(s) onto {} parcels from {}",
        years.len(),
        records.len(),
        current.year
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads.unwrap_or(0))
        .build()?;

    let total = years.len().saturating_mul(records.len());
    progress.set_total(u64::try_from(total).unwrap_or(u64::MAX));

    for (year, table) in years
        .iter()
        .filter_map(|year| historical.get(year).map(|table| (*year, table)))
    {
        progress.set_message(format!("Joining {year}"));
        if table.is_empty() {
            log::warn!("{year}: no parcels, every row stays empty for this year");
        }

        let outcome = pool.install(|| {
            resolve_year(
                current,
                year,
                table,
                options.min_overlap_area,
                progress.as_ref(),
            )
        });

        if outcome.faults > 0 {
            log::warn!(
                "{year}: {} intersection(s) failed and were counted as zero overlap",
                outcome.faults
            );
        }
        log::debug!(
            "{year}: examined {} candidates for {} parcels",
            outcome.candidates,
            records.len()
        );
        log::info!(
            "Number of rows in {} after joining {year}: {} ({} matched)",
            current.year,
            records.len(),
            outcome.matched()
        );

        apply_year(&mut records, outcome);
    }

    progress.finish(format!("Joined {} year(s)", years.len()));

    Ok(records)
}
