#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Bidirectional coordinate reprojection between WGS84 and the regional
//! projected systems the upstream services use.
//!
//! Supports the ETRS89/UTM zones covering Iberia (29N–31N, EPSG:25829–25831)
//! and Germany (32N–33N, EPSG:25832–25833), plus the WGS84/UTM equivalents
//! (EPSG:32629–32633). The ETRS89↔WGS84 datum shift is centimeter-level,
//! far below upstream service accuracy, so both families share one
//! transverse Mercator path.
//!
//! An unsupported target CRS is a sentinel error, not a fault: callers fall
//! back to querying with geographic coordinates.

use plot_enrich_models::{GeoPoint, SrsId};

/// WGS84 semi-major axis (meters).
const A: f64 = 6_378_137.0;
/// WGS84 flattening.
const F: f64 = 1.0 / 298.257_223_563;
/// UTM central scale factor.
const K0: f64 = 0.9996;
/// UTM false easting (meters).
const FALSE_EASTING: f64 = 500_000.0;
/// UTM false northing for the southern hemisphere (meters).
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// CRS transform failure. All variants are soft-fail sentinels: callers
/// must degrade to treating coordinates as already being in the query CRS.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CrsError {
    /// The requested EPSG code is not in the supported set.
    #[error("unsupported CRS {0}")]
    Unsupported(SrsId),

    /// The input point's CRS does not match what the operation expects.
    #[error("expected coordinates in {expected}, got {actual}")]
    WrongInputSrs {
        /// CRS the operation expects the input in.
        expected: SrsId,
        /// CRS the input actually carried.
        actual: SrsId,
    },
}

/// Returns the UTM zone number for a longitude.
///
/// Pure function of longitude: `floor((lon + 180) / 6) + 1`, clamped to the
/// valid 1–60 range at the antimeridian.
#[must_use]
pub fn utm_zone_for(longitude: f64) -> u8 {
    let zone = ((longitude + 180.0) / 6.0).floor() as i32 + 1;
    u8::try_from(zone.clamp(1, 60)).unwrap_or(60)
}

/// Returns the preferred projected CRS for a longitude, when the zone is
/// one this engine supports (ETRS89/UTM 29N–33N).
#[must_use]
pub fn projected_srs_for_longitude(longitude: f64) -> Option<SrsId> {
    match utm_zone_for(longitude) {
        zone @ 29..=33 => Some(SrsId(25_800 + u32::from(zone))),
        _ => None,
    }
}

/// Decodes a supported projected EPSG code into its UTM zone.
///
/// All supported zones are northern hemisphere.
const fn utm_zone_of(srs: SrsId) -> Option<u8> {
    match srs.0 {
        // ETRS89 / UTM
        25_829..=25_833 => Some((srs.0 - 25_800) as u8),
        // WGS84 / UTM north
        32_629..=32_633 => Some((srs.0 - 32_600) as u8),
        _ => None,
    }
}

/// Projects a WGS84 point into `target`.
///
/// # Errors
///
/// Returns [`CrsError::Unsupported`] for CRS codes outside the supported
/// set and [`CrsError::WrongInputSrs`] when the input is not WGS84.
/// Both are soft-fail sentinels (§ callers use geographic bboxes instead).
pub fn forward(point: &GeoPoint, target: SrsId) -> Result<GeoPoint, CrsError> {
    if point.srs != SrsId::WGS84 {
        return Err(CrsError::WrongInputSrs {
            expected: SrsId::WGS84,
            actual: point.srs,
        });
    }
    if target == SrsId::WGS84 {
        return Ok(*point);
    }
    let Some(zone) = utm_zone_of(target) else {
        return Err(CrsError::Unsupported(target));
    };

    let (easting, northing) = geographic_to_utm(point.longitude, point.latitude, zone);
    Ok(GeoPoint::projected(easting, northing, target))
}

/// Un-projects a point in `source` back to WGS84.
///
/// # Errors
///
/// Returns [`CrsError::Unsupported`] for CRS codes outside the supported
/// set and [`CrsError::WrongInputSrs`] when the point's own CRS disagrees
/// with `source`.
pub fn inverse(point: &GeoPoint, source: SrsId) -> Result<GeoPoint, CrsError> {
    if point.srs != source {
        return Err(CrsError::WrongInputSrs {
            expected: source,
            actual: point.srs,
        });
    }
    if source == SrsId::WGS84 {
        return Ok(*point);
    }
    let Some(zone) = utm_zone_of(source) else {
        return Err(CrsError::Unsupported(source));
    };

    let (longitude, latitude) = utm_to_geographic(point.longitude, point.latitude, zone);
    Ok(GeoPoint {
        longitude,
        latitude,
        srs: SrsId::WGS84,
    })
}

/// Transverse Mercator forward projection (Snyder, *Map Projections — A
/// Working Manual*, eq. 8-9..8-13). Accurate to well under a centimeter
/// within a zone.
#[allow(clippy::many_single_char_names, clippy::similar_names)]
fn geographic_to_utm(longitude: f64, latitude: f64, zone: u8) -> (f64, f64) {
    let e2 = F * (2.0 - F);
    let ep2 = e2 / (1.0 - e2);

    let phi = latitude.to_radians();
    let lambda0 = central_meridian(zone).to_radians();
    let dlambda = longitude.to_radians() - lambda0;

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a_term = cos_phi * dlambda;

    let m = meridional_arc(phi, e2);

    let easting = K0
        * n
        * (a_term
            + (1.0 - t + c) * a_term.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a_term.powi(5) / 120.0)
        + FALSE_EASTING;

    let mut northing = K0
        * (m + n
            * tan_phi
            * (a_term * a_term / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a_term.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a_term.powi(6) / 720.0));

    if latitude < 0.0 {
        northing += FALSE_NORTHING_SOUTH;
    }

    (easting, northing)
}

/// Transverse Mercator inverse projection (Snyder eq. 8-17..8-25).
///
/// All supported zones are northern hemisphere, so no false-northing
/// removal is applied.
#[allow(clippy::many_single_char_names, clippy::similar_names)]
fn utm_to_geographic(easting: f64, northing: f64, zone: u8) -> (f64, f64) {
    let e2 = F * (2.0 - F);
    let ep2 = e2 / (1.0 - e2);
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let x = easting - FALSE_EASTING;
    let m = northing / K0;
    let mu = m / (A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let n1 = A / (1.0 - e2 * sin_phi1 * sin_phi1).sqrt();
    let r1 = A * (1.0 - e2) / (1.0 - e2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = x / (n1 * K0);

    let phi = phi1
        - (n1 * tan_phi1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * ep2
                    - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let dlambda = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos_phi1;

    let longitude = central_meridian(zone) + dlambda.to_degrees();
    (longitude, phi.to_degrees())
}

/// Central meridian (degrees) of a UTM zone.
fn central_meridian(zone: u8) -> f64 {
    f64::from(zone) * 6.0 - 183.0
}

/// Meridional arc length from the equator (Snyder eq. 3-21).
fn meridional_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    A * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON_DEG: f64 = 1e-6;

    #[test]
    fn zone_selection_by_longitude() {
        assert_eq!(utm_zone_for(-7.0), 29);
        assert_eq!(utm_zone_for(-3.0), 30);
        assert_eq!(utm_zone_for(2.0), 31);
        assert_eq!(utm_zone_for(7.0), 32);
        assert_eq!(utm_zone_for(13.4), 33);
    }

    #[test]
    fn preferred_projected_srs() {
        assert_eq!(projected_srs_for_longitude(-7.0), Some(SrsId(25829)));
        assert_eq!(projected_srs_for_longitude(2.1734), Some(SrsId(25831)));
        assert_eq!(projected_srs_for_longitude(13.405), Some(SrsId(25833)));
        // Outside the supported band (e.g., the Azores, zone 26)
        assert_eq!(projected_srs_for_longitude(-27.0), None);
    }

    #[test]
    fn round_trips_within_epsilon() {
        let cases = [
            (2.1734, 41.3851, SrsId(25831)),  // Barcelona
            (-3.7038, 40.4168, SrsId(25830)), // Madrid
            (-8.6110, 41.1496, SrsId(25829)), // Porto
            (13.405, 52.52, SrsId(25833)),    // Berlin
            (6.9603, 50.9375, SrsId(25832)),  // Cologne
        ];
        for (lon, lat, srs) in cases {
            let point = GeoPoint::new(lon, lat).unwrap();
            let projected = forward(&point, srs).unwrap();
            let back = inverse(&projected, srs).unwrap();
            assert!(
                (back.longitude - lon).abs() < EPSILON_DEG,
                "lon drift for {srs}: {} vs {lon}",
                back.longitude
            );
            assert!(
                (back.latitude - lat).abs() < EPSILON_DEG,
                "lat drift for {srs}: {} vs {lat}",
                back.latitude
            );
        }
    }

    #[test]
    fn barcelona_projects_to_known_utm31n_coordinates() {
        // Reference values from the EPSG transformation for ETRS89 / UTM 31N.
        let point = GeoPoint::new(2.1734, 41.3851).unwrap();
        let projected = forward(&point, SrsId(25831)).unwrap();
        assert!(
            (projected.longitude - 430_887.0).abs() < 50.0,
            "easting {}",
            projected.longitude
        );
        assert!(
            (projected.latitude - 4_581_900.0).abs() < 200.0,
            "northing {}",
            projected.latitude
        );
    }

    #[test]
    fn unsupported_crs_is_a_sentinel() {
        let point = GeoPoint::new(2.0, 41.0).unwrap();
        assert_eq!(
            forward(&point, SrsId(3857)),
            Err(CrsError::Unsupported(SrsId(3857)))
        );
    }

    #[test]
    fn wgs84_target_is_identity() {
        let point = GeoPoint::new(2.0, 41.0).unwrap();
        assert_eq!(forward(&point, SrsId::WGS84).unwrap(), point);
    }
}
