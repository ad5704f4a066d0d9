//! Exact intersection area between two parcel footprints.
//!
//! Bad geometry never aborts a join. Instead of an error, the computation
//! yields [`Overlap::Fault`], which counts as zero area but stays
//! distinguishable from a genuinely computed zero.

use geo::{Area, BooleanOps, CoordsIter, MultiPolygon};

/// Why an intersection could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFault {
    /// One side has no polygons.
    EmptyGeometry,
    /// One side has a NaN or infinite coordinate.
    NonFiniteCoordinates,
    /// The intersection produced a NaN or infinite area.
    NonFiniteArea,
}

/// Outcome of intersecting two footprints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Overlap {
    /// Intersection area in square units.
    Area(f64),
    /// The intersection failed; treated as zero area.
    Fault(GeometryFault),
}

impl Overlap {
    /// The overlap area, with faults counting as `0.0`.
    #[must_use]
    pub const fn area(self) -> f64 {
        match self {
            Self::Area(area) => area,
            Self::Fault(_) => 0.0,
        }
    }

    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// Computes the area of `a ∩ b`.
#[must_use]
pub fn overlap_area(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Overlap {
    if a.0.is_empty() || b.0.is_empty() {
        return Overlap::Fault(GeometryFault::EmptyGeometry);
    }
    if !has_finite_coords(a) || !has_finite_coords(b) {
        return Overlap::Fault(GeometryFault::NonFiniteCoordinates);
    }

    let area = a.intersection(b).unsigned_area();
    if area.is_finite() {
        Overlap::Area(area)
    } else {
        Overlap::Fault(GeometryFault::NonFiniteArea)
    }
}

fn has_finite_coords(mp: &MultiPolygon<f64>) -> bool {
    mp.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon, Rect, coord};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![
            Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon(),
        ])
    }

    fn approx(overlap: Overlap, expected: f64) -> bool {
        matches!(overlap, Overlap::Area(a) if (a - expected).abs() < 1e-6)
    }

    #[test]
    fn partial_overlap_area() {
        let current = rect(0.0, 0.0, 10.0, 10.0);

        assert!(approx(overlap_area(&current, &rect(0.0, 0.0, 6.0, 10.0)), 60.0));
        assert!(approx(overlap_area(&current, &rect(6.0, 0.0, 14.0, 10.0)), 40.0));
    }

    #[test]
    fn disjoint_and_touching_are_computed_zero() {
        let current = rect(0.0, 0.0, 10.0, 10.0);

        assert!(approx(overlap_area(&current, &rect(20.0, 20.0, 30.0, 30.0)), 0.0));
        assert!(approx(overlap_area(&current, &rect(10.0, 0.0, 20.0, 10.0)), 0.0));
    }

    #[test]
    fn holes_are_excluded() {
        let exterior = LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let hole = LineString::from(vec![(2.0, 2.0), (2.0, 8.0), (8.0, 8.0), (8.0, 2.0)]);
        let donut = MultiPolygon(vec![Polygon::new(exterior, vec![hole])]);

        assert!(approx(overlap_area(&donut, &rect(0.0, 0.0, 10.0, 10.0)), 64.0));
    }

    #[test]
    fn empty_geometry_is_a_fault() {
        let overlap = overlap_area(&MultiPolygon(vec![]), &rect(0.0, 0.0, 1.0, 1.0));

        assert_eq!(overlap, Overlap::Fault(GeometryFault::EmptyGeometry));
        assert!(overlap.area().abs() < f64::EPSILON);
    }

    #[test]
    fn non_finite_coordinates_are_a_fault() {
        let broken = MultiPolygon(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (f64::NAN, 0.0), (10.0, 10.0), (0.0, 10.0)]),
            vec![],
        )]);
        let overlap = overlap_area(&rect(0.0, 0.0, 10.0, 10.0), &broken);

        assert_eq!(overlap, Overlap::Fault(GeometryFault::NonFiniteCoordinates));
        assert!(overlap.is_fault());
    }
}
