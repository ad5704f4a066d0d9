#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory spatial index over one year's parcels.
//!
//! Builds an R-tree of parcel bounding boxes once per historical year and
//! answers "which parcels might overlap this geometry" queries. Only
//! bounding boxes are compared here; exact intersection is left to the
//! caller.

use crop_rotation_plots_models::{Parcel, PlotTable, Year};
use geo::{BoundingRect, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};

/// A parcel's row position stored in the R-tree with its bounding box.
struct ParcelEntry {
    row: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for ParcelEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Bounding-box index over a borrowed [`PlotTable`].
///
/// Read-only once built, so it can be queried from many threads at once.
pub struct PlotIndex<'a> {
    table: &'a PlotTable,
    tree: RTree<ParcelEntry>,
}

impl<'a> PlotIndex<'a> {
    /// Bulk-loads an R-tree over every parcel with a usable extent.
    ///
    /// Parcels with empty geometry or non-finite bounds are left out and
    /// can never be returned as candidates.
    #[must_use]
    pub fn build(table: &'a PlotTable) -> Self {
        let entries: Vec<ParcelEntry> = table
            .parcels()
            .iter()
            .enumerate()
            .filter_map(|(row, parcel)| {
                compute_envelope(&parcel.geometry).map(|envelope| ParcelEntry { row, envelope })
            })
            .collect();

        let skipped = table.len() - entries.len();
        if skipped > 0 {
            log::warn!(
                "{}: {skipped} parcel(s) have no usable extent and were not indexed",
                table.year
            );
        }

        let tree = RTree::bulk_load(entries);
        log::debug!("{}: indexed {} parcels", table.year, tree.size());

        Self { table, tree }
    }

    /// Returns every parcel whose bounding box intersects the bounding box
    /// of `geometry`, in ascending row order.
    ///
    /// The result is a superset of the parcels that truly intersect.
    #[must_use]
    pub fn query(&self, geometry: &MultiPolygon<f64>) -> Vec<&'a Parcel> {
        compute_envelope(geometry).map_or_else(Vec::new, |envelope| self.query_envelope(&envelope))
    }

    /// Returns every parcel whose bounding box intersects `envelope`, in
    /// ascending row order.
    #[must_use]
    pub fn query_envelope(&self, envelope: &AABB<[f64; 2]>) -> Vec<&'a Parcel> {
        let mut rows: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(envelope)
            .map(|entry| entry.row)
            .collect();
        // R-tree traversal order depends on tree shape, not on input order.
        rows.sort_unstable();

        let parcels = self.table.parcels();
        rows.into_iter().map(|row| &parcels[row]).collect()
    }

    /// The year of the indexed table.
    #[must_use]
    pub const fn year(&self) -> Year {
        self.table.year
    }

    #[must_use]
    pub const fn table(&self) -> &'a PlotTable {
        self.table
    }

    /// Number of indexed parcels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
///
/// Returns `None` for empty geometries and for bounds that are not finite.
#[must_use]
pub fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    let rect = mp.bounding_rect()?;
    let (min, max) = (rect.min(), rect.max());

    if [min.x, min.y, max.x, max.y].iter().all(|v| v.is_finite()) {
        Some(AABB::from_corners([min.x, min.y], [max.x, max.y]))
    } else {
        None
    }
}

/// Area of the overlap between two envelopes, `0.0` when disjoint.
#[must_use]
pub fn envelope_overlap_area(a: &AABB<[f64; 2]>, b: &AABB<[f64; 2]>) -> f64 {
    let (a_min, a_max) = (a.lower(), a.upper());
    let (b_min, b_max) = (b.lower(), b.upper());

    let width = a_max[0].min(b_max[0]) - a_min[0].max(b_min[0]);
    let height = a_max[1].min(b_max[1]) - a_min[1].max(b_min[1]);

    if width > 0.0 && height > 0.0 {
        width * height
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crop_rotation_plots_models::{AttributeKeys, CropCode};
    use geo::{Rect, coord};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![
            Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon(),
        ])
    }

    fn table(geometries: Vec<MultiPolygon<f64>>) -> PlotTable {
        let parcels = geometries
            .into_iter()
            .map(|g| Parcel::new(0, g, Some(CropCode::from(115))))
            .collect();
        PlotTable::new(2020, AttributeKeys::default(), parcels)
    }

    #[test]
    fn query_returns_bbox_intersectors_in_row_order() {
        let table = table(vec![
            rect(20.0, 20.0, 30.0, 30.0),
            rect(6.0, 0.0, 10.0, 10.0),
            rect(100.0, 100.0, 110.0, 110.0),
            rect(0.0, 0.0, 6.0, 10.0),
        ]);
        let index = PlotIndex::build(&table);

        let ids: Vec<u64> = index
            .query(&rect(0.0, 0.0, 10.0, 10.0))
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn touching_boxes_are_candidates() {
        let table = table(vec![rect(10.0, 0.0, 20.0, 10.0)]);
        let index = PlotIndex::build(&table);

        assert_eq!(index.query(&rect(0.0, 0.0, 10.0, 10.0)).len(), 1);
    }

    #[test]
    fn empty_geometries_are_not_indexed_or_queried() {
        let table = table(vec![MultiPolygon(vec![]), rect(0.0, 0.0, 1.0, 1.0)]);
        let index = PlotIndex::build(&table);

        assert_eq!(index.len(), 1);
        assert!(index.query(&MultiPolygon(vec![])).is_empty());
    }

    #[test]
    fn empty_table_builds_empty_index() {
        let table = PlotTable::empty(2022);
        let index = PlotIndex::build(&table);

        assert!(index.is_empty());
        assert_eq!(index.year(), 2022);
        assert!(index.query(&rect(0.0, 0.0, 10.0, 10.0)).is_empty());
    }

    #[test]
    fn envelope_overlap_area_handles_disjoint_and_nested() {
        let a = AABB::from_corners([0.0, 0.0], [10.0, 10.0]);
        let b = AABB::from_corners([6.0, 0.0], [12.0, 10.0]);
        let c = AABB::from_corners([20.0, 20.0], [30.0, 30.0]);

        assert!((envelope_overlap_area(&a, &b) - 40.0).abs() < f64::EPSILON);
        assert!(envelope_overlap_area(&a, &c).abs() < f64::EPSILON);
        assert!((envelope_overlap_area(&a, &a) - 100.0).abs() < f64::EPSILON);
    }
}
