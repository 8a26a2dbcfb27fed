#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Picks the single best candidate feature for a query point.
//!
//! Selection priority, in order:
//!
//! 1. The first polygonal feature that contains the point.
//! 2. Else the first polygonal feature in input order.
//! 3. Else the feature whose reference point is nearest to the query point
//!    (scaled-degree planar distance, not geodesic — inherited behavior,
//!    see `scaled_distance`).
//! 4. Else the first feature.
//!
//! The ordering is deterministic for a fixed input order, and containment
//! failures on malformed geometry count as "no match" for that feature,
//! never as a fatal error.
//!
//! The query point must be supplied in the same CRS as the features'
//! coordinates; reprojection is the caller's responsibility.

use geo::{Contains, Coord, LineString, Point, Polygon};
use plot_enrich_models::{GeoPoint, Geometry, RawFeature};

/// Selects the best feature for `point`, or `None` for an empty slice.
#[must_use]
pub fn select_best<'a>(features: &'a [RawFeature], point: &GeoPoint) -> Option<&'a RawFeature> {
    if features.is_empty() {
        return None;
    }

    // 1. Containment wins immediately, first match in input order.
    for feature in features {
        if let Some(geometry) = &feature.geometry
            && geometry.is_polygonal()
            && contains_point(geometry, point)
        {
            return Some(feature);
        }
    }

    // 2. First polygon even without containment.
    if let Some(feature) = features
        .iter()
        .find(|f| f.geometry.as_ref().is_some_and(Geometry::is_polygonal))
    {
        return Some(feature);
    }

    // 3. Nearest reference point.
    let mut best: Option<(&RawFeature, f64)> = None;
    for feature in features {
        let Some(reference) = feature
            .geometry
            .as_ref()
            .and_then(Geometry::reference_point)
        else {
            continue;
        };
        let distance = scaled_distance(point, reference);
        match best {
            // Strict comparison keeps the earlier feature on ties.
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((feature, distance)),
        }
    }
    if let Some((feature, _)) = best {
        return Some(feature);
    }

    // 4. Give up on geometry and take the first feature.
    features.first()
}

/// Point-in-polygon test. Malformed rings (fewer than 4 positions) are
/// skipped rather than trusted, so a degenerate feature can never match.
fn contains_point(geometry: &Geometry, point: &GeoPoint) -> bool {
    let query = Point::new(point.longitude, point.latitude);
    match geometry {
        Geometry::Polygon(rings) => to_geo_polygon(rings).is_some_and(|p| p.contains(&query)),
        Geometry::MultiPolygon(polygons) => polygons
            .iter()
            .any(|rings| to_geo_polygon(rings).is_some_and(|p| p.contains(&query))),
        Geometry::Point(_) => false,
    }
}

fn to_geo_polygon(rings: &[Vec<[f64; 2]>]) -> Option<Polygon<f64>> {
    let exterior = rings.first()?;
    if exterior.len() < 4 {
        log::debug!("Skipping degenerate ring with {} positions", exterior.len());
        return None;
    }
    let interiors: Vec<LineString<f64>> = rings
        .iter()
        .skip(1)
        .filter(|ring| ring.len() >= 4)
        .map(|ring| to_line_string(ring))
        .collect();
    Some(Polygon::new(to_line_string(exterior), interiors))
}

fn to_line_string(ring: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(
        ring.iter()
            .map(|pos| Coord {
                x: pos[0],
                y: pos[1],
            })
            .collect::<Vec<_>>(),
    )
}

/// Planar distance with the x axis scaled by `cos(latitude)` when the
/// point is geographic. This is the flat degree-to-meter approximation
/// inherited from the original resolution behavior — it can misrank
/// candidates near the poles or across very large boxes, which is accepted
/// for the tie-break role it plays here.
fn scaled_distance(point: &GeoPoint, reference: [f64; 2]) -> f64 {
    let x_scale = if point.srs.is_geographic() {
        point.latitude.to_radians().cos()
    } else {
        1.0
    };
    let dx = (point.longitude - reference[0]) * x_scale;
    let dy = point.latitude - reference[1];
    dx.hypot(dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plot_enrich_models::SrsId;
    use std::collections::BTreeMap;

    fn feature(id: &str, geometry: Option<Geometry>) -> RawFeature {
        RawFeature {
            id: Some(id.to_string()),
            geometry,
            srs: SrsId::WGS84,
            properties: BTreeMap::new(),
        }
    }

    fn unit_square_at(x0: f64, y0: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            [x0, y0],
            [x0 + 1.0, y0],
            [x0 + 1.0, y0 + 1.0],
            [x0, y0 + 1.0],
            [x0, y0],
        ]])
    }

    #[test]
    fn containing_polygon_wins_over_earlier_non_containing() {
        let features = vec![
            feature("miss", Some(unit_square_at(10.0, 10.0))),
            feature("hit", Some(unit_square_at(0.0, 0.0))),
        ];
        let point = GeoPoint::new(0.5, 0.5).unwrap();
        assert_eq!(
            select_best(&features, &point).unwrap().id.as_deref(),
            Some("hit")
        );
    }

    #[test]
    fn first_containing_polygon_wins_on_overlap() {
        let features = vec![
            feature("a", Some(unit_square_at(0.0, 0.0))),
            feature("b", Some(unit_square_at(0.0, 0.0))),
        ];
        let point = GeoPoint::new(0.5, 0.5).unwrap();
        assert_eq!(
            select_best(&features, &point).unwrap().id.as_deref(),
            Some("a")
        );
    }

    #[test]
    fn falls_back_to_first_polygon_without_containment() {
        let features = vec![
            feature("point", Some(Geometry::Point([0.4, 0.4]))),
            feature("poly", Some(unit_square_at(10.0, 10.0))),
        ];
        let point = GeoPoint::new(0.5, 0.5).unwrap();
        assert_eq!(
            select_best(&features, &point).unwrap().id.as_deref(),
            Some("poly")
        );
    }

    #[test]
    fn nearest_point_when_no_polygons() {
        let features = vec![
            feature("far", Some(Geometry::Point([5.0, 5.0]))),
            feature("near", Some(Geometry::Point([0.6, 0.6]))),
        ];
        let point = GeoPoint::new(0.5, 0.5).unwrap();
        assert_eq!(
            select_best(&features, &point).unwrap().id.as_deref(),
            Some("near")
        );
    }

    #[test]
    fn distance_ties_keep_input_order() {
        let features = vec![
            feature("first", Some(Geometry::Point([1.0, 0.0]))),
            feature("second", Some(Geometry::Point([-1.0, 0.0]))),
        ];
        let point = GeoPoint::new(0.0, 0.0).unwrap();
        assert_eq!(
            select_best(&features, &point).unwrap().id.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn degenerate_polygon_is_not_a_match() {
        let degenerate = Geometry::Polygon(vec![vec![[0.0, 0.0], [1.0, 1.0]]]);
        let features = vec![
            feature("bad", Some(degenerate)),
            feature("good", Some(unit_square_at(0.0, 0.0))),
        ];
        let point = GeoPoint::new(0.5, 0.5).unwrap();
        assert_eq!(
            select_best(&features, &point).unwrap().id.as_deref(),
            Some("good")
        );
    }

    #[test]
    fn geometryless_input_returns_first() {
        let features = vec![feature("only", None)];
        let point = GeoPoint::new(0.0, 0.0).unwrap();
        assert_eq!(
            select_best(&features, &point).unwrap().id.as_deref(),
            Some("only")
        );
    }

    #[test]
    fn selection_is_idempotent() {
        let features = vec![
            feature("a", Some(Geometry::Point([2.0, 2.0]))),
            feature("b", Some(unit_square_at(0.0, 0.0))),
            feature("c", Some(unit_square_at(-5.0, -5.0))),
        ];
        let point = GeoPoint::new(0.5, 0.5).unwrap();
        let first = select_best(&features, &point).unwrap().id.clone();
        for _ in 0..5 {
            assert_eq!(select_best(&features, &point).unwrap().id, first);
        }
    }

    #[test]
    fn empty_input_is_none() {
        let point = GeoPoint::new(0.0, 0.0).unwrap();
        assert!(select_best(&[], &point).is_none());
    }
}
