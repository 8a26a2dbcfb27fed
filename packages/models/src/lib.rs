#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core value types for the plot enrichment engine.
//!
//! Every regional service client produces [`RawFeature`] values which are
//! narrowed and normalized into the country-agnostic [`NormalizedRecord`]
//! format before being merged into a plot's [`EnrichmentDocument`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// An EPSG spatial reference system identifier (e.g., `4326` for WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SrsId(pub u32);

impl SrsId {
    /// WGS84 geographic coordinates — the default for all input points.
    pub const WGS84: Self = Self(4326);

    /// Returns `true` if this is a geographic (lon/lat degree) system.
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        self.0 == 4326
    }

    /// Formats as a `srsName` parameter value (e.g., `"EPSG:25831"`).
    #[must_use]
    pub fn epsg_code(self) -> String {
        format!("EPSG:{}", self.0)
    }

    /// Formats as the URN form some WFS 2.0.0 servers require.
    #[must_use]
    pub fn urn(self) -> String {
        format!("urn:ogc:def:crs:EPSG::{}", self.0)
    }

    /// Parses any of the common spellings: `"EPSG:4326"`,
    /// `"urn:ogc:def:crs:EPSG::4326"`, `"http://.../epsg/4326"`, or a bare
    /// numeric code. `"CRS84"` maps to 4326.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("CRS84")
            || trimmed.ends_with("CRS84")
            || trimmed.ends_with("crs84")
        {
            return Some(Self::WGS84);
        }
        trimmed
            .rsplit([':', '/'])
            .next()
            .and_then(|tail| tail.parse::<u32>().ok())
            .map(Self)
    }
}

impl std::fmt::Display for SrsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl Default for SrsId {
    fn default() -> Self {
        Self::WGS84
    }
}

/// Invalid input coordinate — rejected before any network call is made.
#[derive(Debug, thiserror::Error)]
pub enum CoordinateError {
    /// Latitude outside [-90, 90].
    #[error("latitude {0} out of range [-90, 90]")]
    Latitude(f64),

    /// Longitude outside [-180, 180].
    #[error("longitude {0} out of range [-180, 180]")]
    Longitude(f64),
}

/// A point with an associated spatial reference system.
///
/// Defaults to WGS84; projected points produced by the CRS transformer
/// carry their projected EPSG code in `srs`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude (or easting when `srs` is projected).
    pub longitude: f64,
    /// Latitude (or northing when `srs` is projected).
    pub latitude: f64,
    /// Spatial reference system of the coordinates.
    #[serde(default)]
    pub srs: SrsId,
}

impl GeoPoint {
    /// Creates a WGS84 point, validating coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] when either coordinate is out of range.
    pub fn new(longitude: f64, latitude: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) || latitude.is_nan() {
            return Err(CoordinateError::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) || longitude.is_nan() {
            return Err(CoordinateError::Longitude(longitude));
        }
        Ok(Self {
            longitude,
            latitude,
            srs: SrsId::WGS84,
        })
    }

    /// Creates a point in a projected system without range validation
    /// (projected eastings/northings are not degree-bounded).
    #[must_use]
    pub const fn projected(x: f64, y: f64, srs: SrsId) -> Self {
        Self {
            longitude: x,
            latitude: y,
            srs,
        }
    }
}

/// A rectangular spatial filter in some CRS's native axis order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum x (longitude or easting).
    pub min_x: f64,
    /// Minimum y (latitude or northing).
    pub min_y: f64,
    /// Maximum x.
    pub max_x: f64,
    /// Maximum y.
    pub max_y: f64,
}

impl BoundingBox {
    /// Builds a box centered on `point` extending `half_size` in each
    /// direction (same units as the point's CRS).
    #[must_use]
    pub const fn around(point: &GeoPoint, half_size: f64) -> Self {
        Self {
            min_x: point.longitude - half_size,
            min_y: point.latitude - half_size,
            max_x: point.longitude + half_size,
            max_y: point.latitude + half_size,
        }
    }

    /// Scales the box about its center by `factor`.
    ///
    /// For `factor > 1` the result strictly contains `self`, which is what
    /// the progressive-widening fallback relies on.
    #[must_use]
    pub fn widen(&self, factor: f64) -> Self {
        let cx = f64::midpoint(self.min_x, self.max_x);
        let cy = f64::midpoint(self.min_y, self.max_y);
        let hw = (self.max_x - self.min_x) / 2.0 * factor;
        let hh = (self.max_y - self.min_y) / 2.0 * factor;
        Self {
            min_x: cx - hw,
            min_y: cy - hh,
            max_x: cx + hw,
            max_y: cy + hh,
        }
    }

    /// Returns `true` if `other` lies strictly inside this box.
    #[must_use]
    pub fn strictly_contains(&self, other: &Self) -> bool {
        self.min_x < other.min_x
            && self.min_y < other.min_y
            && self.max_x > other.max_x
            && self.max_y > other.max_y
    }

    /// Renders `minx,miny,maxx,maxy`, with the two axes swapped when
    /// `flip_axes` is set (some WFS 1.1.0 servers expect lat/lon order for
    /// geographic CRS).
    #[must_use]
    pub fn to_param(&self, flip_axes: bool) -> String {
        if flip_axes {
            format!(
                "{},{},{},{}",
                self.min_y, self.min_x, self.max_y, self.max_x
            )
        } else {
            format!(
                "{},{},{},{}",
                self.min_x, self.min_y, self.max_x, self.max_y
            )
        }
    }
}

/// A feature geometry in GeoJSON's `{type, coordinates}` shape.
///
/// The adjacently-tagged serde representation round-trips GeoJSON geometry
/// objects directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    /// A single position `[x, y]`.
    Point([f64; 2]),
    /// Rings of positions; first ring is the exterior.
    Polygon(Vec<Vec<[f64; 2]>>),
    /// Multiple polygons, each a list of rings.
    MultiPolygon(Vec<Vec<Vec<[f64; 2]>>>),
}

impl Geometry {
    /// Returns `true` for polygonal geometry (Polygon or MultiPolygon).
    #[must_use]
    pub const fn is_polygonal(&self) -> bool {
        matches!(self, Self::Polygon(_) | Self::MultiPolygon(_))
    }

    /// A representative point for distance tie-breaking: the coordinate
    /// itself for points, `None` for polygonal geometry (polygons are
    /// ranked by containment instead).
    #[must_use]
    pub const fn reference_point(&self) -> Option<[f64; 2]> {
        match self {
            Self::Point(pos) => Some(*pos),
            Self::Polygon(_) | Self::MultiPolygon(_) => None,
        }
    }
}

/// A single feature as returned by a regional service, prior to
/// normalization. Ephemeral: created per query, discarded after the
/// normalized record is extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    /// Stable identifier when the source provides one (`gml:id`, GeoJSON
    /// `id`).
    pub id: Option<String>,
    /// Feature geometry, if any was present and recognized.
    pub geometry: Option<Geometry>,
    /// CRS the geometry coordinates are expressed in.
    pub srs: SrsId,
    /// Source-specific property bag. Schemas vary per service.
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl RawFeature {
    /// Returns the first property matching any of `aliases` as a string.
    ///
    /// Matching is case-insensitive on the property name (regional schemas
    /// disagree on casing). Numeric values are stringified.
    #[must_use]
    pub fn str_prop(&self, aliases: &[&str]) -> Option<String> {
        for alias in aliases {
            for (key, value) in &self.properties {
                if key.eq_ignore_ascii_case(alias) {
                    match value {
                        serde_json::Value::String(s) if !s.is_empty() => {
                            return Some(s.clone());
                        }
                        serde_json::Value::Number(n) => return Some(n.to_string()),
                        _ => {}
                    }
                }
            }
        }
        None
    }

    /// Returns the first property matching any of `aliases` as an `f64`.
    #[must_use]
    pub fn f64_prop(&self, aliases: &[&str]) -> Option<f64> {
        for alias in aliases {
            for (key, value) in &self.properties {
                if key.eq_ignore_ascii_case(alias) {
                    match value {
                        serde_json::Value::Number(n) => return n.as_f64(),
                        serde_json::Value::String(s) => {
                            if let Ok(parsed) = s.trim().replace(',', ".").parse::<f64>() {
                                return Some(parsed);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        None
    }
}

/// The enrichment categories this engine resolves.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordCategory {
    /// Land parcel from the cadastral registry.
    Cadastral,
    /// Building footprint / construction record.
    Building,
    /// Official postal/cadastral address point.
    Address,
    /// Urban-planning zoning classification.
    Zoning,
}

/// A feature normalized to the fixed, country-agnostic property set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Reference identifier in the source registry (e.g., the cadastral
    /// reference).
    pub reference: Option<String>,
    /// Human-readable label.
    pub label: Option<String>,
    /// Area in square meters, when the source reports one.
    pub area_m2: Option<f64>,
    /// Source-specific classification code (land use, building type).
    pub classification: Option<String>,
    /// Geometry reprojected to WGS84, when available.
    pub geometry: Option<Geometry>,
    /// Short name of the producing service.
    pub source: String,
    /// Endpoint URL the record came from.
    pub service_url: String,
    /// Free-text caveats carried from the service config (e.g.,
    /// "no legal validity").
    pub notes: String,
}

impl NormalizedRecord {
    /// Serializes into the persisted per-category payload shape, naming the
    /// reference and area keys per category.
    #[must_use]
    pub fn into_payload(self, category: RecordCategory) -> serde_json::Value {
        let (ref_key, area_key) = match category {
            RecordCategory::Cadastral => ("cadastral_reference", "parcel_area_m2"),
            RecordCategory::Building => ("building_reference", "built_area_m2"),
            RecordCategory::Address | RecordCategory::Zoning => ("reference", "area_m2"),
        };

        let mut map = serde_json::Map::new();
        if let Some(reference) = self.reference {
            map.insert(ref_key.to_string(), serde_json::Value::String(reference));
        }
        if let Some(label) = self.label {
            map.insert("label".to_string(), serde_json::Value::String(label));
        }
        if let Some(area) = self.area_m2
            && let Some(num) = serde_json::Number::from_f64(area)
        {
            map.insert(area_key.to_string(), serde_json::Value::Number(num));
        }
        if let Some(classification) = self.classification {
            map.insert(
                "classification".to_string(),
                serde_json::Value::String(classification),
            );
        }
        if let Some(geometry) = self.geometry {
            if let Ok(value) = serde_json::to_value(geometry) {
                map.insert("geometry".to_string(), value);
            }
        }
        map.insert("source".to_string(), serde_json::Value::String(self.source));
        map.insert(
            "service_url".to_string(),
            serde_json::Value::String(self.service_url),
        );
        map.insert("notes".to_string(), serde_json::Value::String(self.notes));

        serde_json::Value::Object(map)
    }
}

/// A plot's accumulated enrichment data, keyed by category string
/// (`"cadastral"`, `"zoning"`, ...). Persisted 1:1 with a plot identifier
/// and accumulated over multiple enrichment runs.
pub type EnrichmentDocument = BTreeMap<String, serde_json::Value>;
