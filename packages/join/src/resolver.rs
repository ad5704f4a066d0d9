//! Picks the best historical match for one current parcel in one year.
//!
//! Candidates come from the year's [`PlotIndex`]. Each is scored by its
//! exact intersection area with the current parcel; anything at or below
//! the minimum overlap area is noise. The largest remaining overlap wins,
//! and exact ties go to the candidate with the lowest row id.

use crop_rotation_plots_models::{Parcel, YearMatch};
use crop_rotation_spatial::{PlotIndex, compute_envelope, envelope_overlap_area};

use crate::overlap::{Overlap, overlap_area};

/// A candidate that survived the area threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch<'a> {
    pub parcel: &'a Parcel,
    /// Intersection area with the current parcel.
    pub area: f64,
}

/// Result of resolving one current parcel against one year.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<'a> {
    pub best: Option<BestMatch<'a>>,
    /// Candidates returned by the index.
    pub candidates: usize,
    /// Candidates whose intersection failed and counted as zero.
    pub faults: usize,
}

impl Resolution<'_> {
    /// Converts the winner into a year entry.
    ///
    /// A winner without a crop code leaves the year empty, the same as no
    /// winner at all.
    #[must_use]
    pub fn into_year_match(self) -> Option<YearMatch> {
        let best = self.best?;
        Some(YearMatch {
            crop_code: best.parcel.crop_code.clone()?,
            parcel_id: best.parcel.id,
            overlap_area: best.area,
        })
    }
}

/// Resolves `parcel` against every candidate `index` returns.
///
/// Candidates whose bounding boxes overlap by no more than
/// `min_overlap_area` are skipped without computing an exact
/// intersection, since the exact overlap can never be larger.
#[must_use]
pub fn resolve<'a>(
    parcel: &Parcel,
    index: &PlotIndex<'a>,
    min_overlap_area: f64,
) -> Resolution<'a> {
    let Some(envelope) = compute_envelope(&parcel.geometry) else {
        return Resolution {
            best: None,
            candidates: 0,
            faults: 0,
        };
    };

    let candidates = index.query_envelope(&envelope);
    let mut faults = 0;

    let scored = candidates.iter().filter_map(|&candidate| {
        let bound = compute_envelope(&candidate.geometry)
            .map_or(0.0, |other| envelope_overlap_area(&envelope, &other));
        if bound <= min_overlap_area {
            return None;
        }

        let overlap = overlap_area(&parcel.geometry, &candidate.geometry);
        if let Overlap::Fault(fault) = overlap {
            log::trace!(
                "{}: parcel {} vs {} intersection failed: {fault:?}",
                index.year(),
                parcel.id,
                candidate.id
            );
            faults += 1;
        }
        Some((candidate, overlap))
    });

    let best = select_best(scored, min_overlap_area);

    Resolution {
        best,
        candidates: candidates.len(),
        faults,
    }
}

/// Selects the largest overlap strictly above `min_overlap_area`.
///
/// Exact ties go to the lowest parcel id, so the result does not depend
/// on the order candidates are supplied in.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn select_best<'a>(
    scored: impl IntoIterator<Item = (&'a Parcel, Overlap)>,
    min_overlap_area: f64,
) -> Option<BestMatch<'a>> {
    let mut best: Option<BestMatch<'a>> = None;

    for (parcel, overlap) in scored {
        let area = overlap.area();
        if area <= min_overlap_area {
            continue;
        }

        match best {
            Some(current) if area < current.area => {}
            Some(current) if area == current.area && parcel.id >= current.parcel.id => {}
            _ => best = Some(BestMatch { parcel, area }),
        }
    }

    best
}
