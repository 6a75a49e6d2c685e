//! Geometry engine capability.
//!
//! The store never runs geometry algorithms itself. Every repair,
//! simplification and exact predicate goes through [`GeometryEngine`], so
//! a different backend can be injected. [`GeoEngine`] delegates to the
//! `geo` crate.

use geo::algorithm::bool_ops::FillRule;
use geo::algorithm::orient::Direction;
use geo::{
    unary_union, BooleanOps, Contains, Intersects, Orient, Relate, RemoveRepeatedPoints,
    SimplifyVwPreserve, Validation,
};
use geo_types::{MultiPolygon, Point, Polygon, Rect};
use tracing::debug;

use crate::error::{PlaceError, Result};

/// Repair, simplification and exact predicates on lon/lat multipolygons.
pub trait GeometryEngine: Send + Sync {
    /// Repair a geometry into a valid one, or reject it.
    fn make_valid(&self, geometry: MultiPolygon<f64>) -> Result<MultiPolygon<f64>>;

    fn is_valid(&self, geometry: &MultiPolygon<f64>) -> bool;

    fn simplify_preserve_topology(
        &self,
        geometry: &MultiPolygon<f64>,
        tolerance: f64,
    ) -> MultiPolygon<f64>;

    /// `b` lies in `a` and their interiors meet
    fn contains(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool;

    /// Point strictly inside `a`; boundary points are not contained
    fn contains_point(&self, a: &MultiPolygon<f64>, point: Point<f64>) -> bool;

    /// `a` lies in `b`, the inverse of [`GeometryEngine::contains`]
    fn within(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool;

    fn intersects_rect(&self, a: &MultiPolygon<f64>, rect: &Rect<f64>) -> bool;

    /// Clip to a rectangle; the result is always a multipolygon
    fn intersection_with_rect(&self, a: &MultiPolygon<f64>, rect: &Rect<f64>)
        -> MultiPolygon<f64>;

    /// Union of valid pieces, merging shared edges
    fn union(&self, parts: &[MultiPolygon<f64>]) -> MultiPolygon<f64>;
}

/// [`GeometryEngine`] backed by the `geo` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoEngine;

impl GeoEngine {
    pub fn new() -> Self {
        Self
    }

    /// Drop repeated vertices and rings that cannot enclose area.
    fn clean(geometry: MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        let all_finite = geometry
            .0
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
            .flat_map(|ring| ring.coords())
            .all(|c| c.x.is_finite() && c.y.is_finite());
        if !all_finite {
            return Err(PlaceError::InvalidGeometry(
                "non-finite coordinate".to_string(),
            ));
        }

        let polygons: Vec<Polygon<f64>> = geometry
            .remove_repeated_points()
            .0
            .into_iter()
            .filter(|p| p.exterior().0.len() >= 4)
            .map(|p| {
                let (exterior, interiors) = p.into_inner();
                let interiors = interiors.into_iter().filter(|r| r.0.len() >= 4).collect();
                Polygon::new(exterior, interiors)
            })
            .collect();

        Ok(MultiPolygon::new(polygons))
    }

    /// Resolve each polygon's own rings under the even-odd rule, so every
    /// lobe of a self-crossing ring is kept, then merge the polygons.
    fn renode(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        let empty = MultiPolygon::<f64>::new(Vec::new());
        let resolved: Vec<MultiPolygon<f64>> = geometry
            .0
            .iter()
            .map(|p| {
                p.union_with_fill_rule(&empty, FillRule::EvenOdd)
                    .orient(Direction::Default)
            })
            .collect();
        unary_union(resolved.iter())
    }
}

impl GeometryEngine for GeoEngine {
    fn make_valid(&self, geometry: MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        let cleaned = Self::clean(geometry)?;
        if cleaned.0.is_empty() {
            return Err(PlaceError::InvalidGeometry(
                "no ring encloses any area".to_string(),
            ));
        }

        if cleaned.is_valid() {
            return Ok(cleaned);
        }

        debug!("repairing geometry with {} polygons", cleaned.0.len());
        let repaired = Self::renode(&cleaned);
        if repaired.0.is_empty() || !repaired.is_valid() {
            return Err(PlaceError::InvalidGeometry(
                "geometry could not be repaired".to_string(),
            ));
        }
        Ok(repaired)
    }

    fn is_valid(&self, geometry: &MultiPolygon<f64>) -> bool {
        geometry.is_valid()
    }

    fn simplify_preserve_topology(
        &self,
        geometry: &MultiPolygon<f64>,
        tolerance: f64,
    ) -> MultiPolygon<f64> {
        geometry.simplify_vw_preserve(tolerance)
    }

    fn contains(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
        a.relate(b).is_contains()
    }

    fn contains_point(&self, a: &MultiPolygon<f64>, point: Point<f64>) -> bool {
        a.contains(&point)
    }

    fn within(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
        a.relate(b).is_within()
    }

    fn intersects_rect(&self, a: &MultiPolygon<f64>, rect: &Rect<f64>) -> bool {
        a.intersects(rect)
    }

    fn intersection_with_rect(
        &self,
        a: &MultiPolygon<f64>,
        rect: &Rect<f64>,
    ) -> MultiPolygon<f64> {
        a.intersection(&rect.to_polygon())
    }

    fn union(&self, parts: &[MultiPolygon<f64>]) -> MultiPolygon<f64> {
        let oriented: Vec<MultiPolygon<f64>> =
            parts.iter().map(|p| p.orient(Direction::Default)).collect();
        unary_union(oriented.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use geo_types::{coord, polygon};

    fn square(min: f64, max: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
        ]])
    }

    #[test]
    fn test_valid_geometry_passes_through() {
        let engine = GeoEngine::new();
        let sq = square(-1.0, 1.0);
        let repaired = engine.make_valid(sq.clone()).unwrap();
        assert!((repaired.unsigned_area() - sq.unsigned_area()).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_ring_rejected() {
        let engine = GeoEngine::new();
        let sliver = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 0.0),
        ]]);
        let err = engine.make_valid(sliver).unwrap_err();
        assert!(matches!(err, PlaceError::InvalidGeometry(_)));
    }

    #[test]
    fn test_non_finite_rejected() {
        let engine = GeoEngine::new();
        let bad = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: f64::NAN, y: 0.0),
            (x: 1.0, y: 1.0),
        ]]);
        assert!(matches!(
            engine.make_valid(bad),
            Err(PlaceError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_repeated_points_removed() {
        let engine = GeoEngine::new();
        let repeated = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]]);
        let repaired = engine.make_valid(repeated).unwrap();
        assert_eq!(repaired.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn test_bowtie_keeps_both_lobes() {
        let engine = GeoEngine::new();
        let bowtie = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
        ]]);
        assert!(!engine.is_valid(&bowtie));

        let repaired = engine.make_valid(bowtie).unwrap();
        assert!(engine.is_valid(&repaired));
        assert!((repaired.unsigned_area() - 2.0).abs() < 1e-9);
        assert!(engine.contains_point(&repaired, Point::new(0.5, 1.0)));
        assert!(engine.contains_point(&repaired, Point::new(1.5, 1.0)));
    }

    #[test]
    fn test_overlapping_parts_merged() {
        let engine = GeoEngine::new();
        let mut parts = square(0.0, 1.0);
        parts.0.extend(square(0.5, 1.5).0);
        assert!(!engine.is_valid(&parts));

        let repaired = engine.make_valid(parts).unwrap();
        assert!(engine.is_valid(&repaired));
        assert!((repaired.unsigned_area() - 1.75).abs() < 1e-9);
        assert!(engine.contains_point(&repaired, Point::new(0.75, 0.75)));
    }

    #[test]
    fn test_union_merges_tile_seam() {
        let engine = GeoEngine::new();
        let left = MultiPolygon::new(vec![polygon![
            (x: -1.0, y: 0.0),
            (x: 0.0, y: 0.0),
            (x: 0.0, y: 1.0),
            (x: -1.0, y: 1.0),
        ]]);
        let right = square(0.0, 1.0);
        let merged = engine.union(&[left, right]);
        assert!(engine.contains_point(&merged, Point::new(0.0, 0.5)));
    }

    #[test]
    fn test_containment_predicates() {
        let engine = GeoEngine::new();
        let outer = square(-1.0, 1.0);
        let inner = square(-0.5, 0.5);
        assert!(engine.contains(&outer, &inner));
        assert!(!engine.contains(&inner, &outer));
        assert!(engine.within(&inner, &outer));
        assert!(!engine.within(&outer, &inner));
    }

    #[test]
    fn test_point_on_boundary_not_contained() {
        let engine = GeoEngine::new();
        let sq = square(0.0, 1.0);
        assert!(engine.contains_point(&sq, Point::new(0.5, 0.5)));
        assert!(!engine.contains_point(&sq, Point::new(0.0, 0.5)));
        assert!(!engine.contains_point(&sq, Point::new(2.0, 0.5)));
    }

    #[test]
    fn test_clip_to_tile() {
        let engine = GeoEngine::new();
        let sq = square(-1.0, 1.0);
        let tile = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        assert!(engine.intersects_rect(&sq, &tile));
        let clipped = engine.intersection_with_rect(&sq, &tile);
        assert!((clipped.unsigned_area() - 1.0).abs() < 1e-9);

        let far = Rect::new(coord! { x: 5.0, y: 5.0 }, coord! { x: 6.0, y: 6.0 });
        assert!(!engine.intersects_rect(&sq, &far));
        assert!(engine.intersection_with_rect(&sq, &far).0.is_empty());
    }

    #[test]
    fn test_simplify_keeps_square() {
        let engine = GeoEngine::new();
        let sq = square(0.0, 1.0);
        let simplified = engine.simplify_preserve_topology(&sq, 0.0001);
        assert!((simplified.unsigned_area() - 1.0).abs() < 1e-9);
    }
}
