//! Point → region classification.
//!
//! Primary strategy is an ordered list of bounding-box tests loaded from
//! the embedded `regions.toml` — fast, offline, approximate. Overlapping
//! boxes are resolved by document order, so sub-region exceptions (Berlin
//! inside Brandenburg's box) come first in the file.
//!
//! Classification is a pure function of coordinates plus the static table:
//! the same point always yields the same region. A delegated lookup
//! against an administrative-boundary service is the orchestrator's
//! concern; when it fails, classification stays "unknown".

use plot_enrich_models::GeoPoint;
use serde::Deserialize;

/// How a region label was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    /// Matched one of the static bounding boxes.
    BoundingBox,
    /// Resolved by a delegated administrative-boundary lookup.
    Delegated,
    /// No strategy produced a region.
    Unknown,
}

/// A classified region: label, parent country, and how it was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDescriptor {
    /// Region label (e.g., `"Catalunya"`, `"Berlin"`).
    pub label: String,
    /// ISO 3166-1 alpha-2 parent country code, when known.
    pub country: Option<String>,
    /// Detection method that produced this descriptor.
    pub method: DetectionMethod,
}

impl RegionDescriptor {
    /// The sentinel descriptor for unclassifiable points.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            label: String::new(),
            country: None,
            method: DetectionMethod::Unknown,
        }
    }

    /// Returns `true` when no region could be determined.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.method == DetectionMethod::Unknown
    }
}

#[derive(Debug, Deserialize)]
struct RegionTable {
    region: Vec<RegionBox>,
}

#[derive(Debug, Deserialize)]
struct RegionBox {
    label: String,
    country: String,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    bbox: [f64; 4],
}

const REGIONS_TOML: &str = include_str!("../regions.toml");

#[cfg(test)]
const EXPECTED_REGION_COUNT: usize = 10;

fn region_table() -> Vec<RegionBox> {
    let table: RegionTable = toml::de::from_str(REGIONS_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse regions.toml: {e}"));
    table.region
}

/// Classifies a WGS84 point against the ordered bounding-box table.
///
/// Returns [`RegionDescriptor::unknown`] when no box matches — callers may
/// then attempt a delegated lookup and feed the result through
/// [`region_by_label`].
#[must_use]
pub fn classify(point: &GeoPoint) -> RegionDescriptor {
    for region in region_table() {
        let [min_lon, min_lat, max_lon, max_lat] = region.bbox;
        if point.longitude >= min_lon
            && point.longitude <= max_lon
            && point.latitude >= min_lat
            && point.latitude <= max_lat
        {
            return RegionDescriptor {
                label: region.label,
                country: Some(region.country),
                method: DetectionMethod::BoundingBox,
            };
        }
    }
    RegionDescriptor::unknown()
}

/// Looks up a configured region by label (case-insensitive), for wiring a
/// delegated boundary-service answer back into the static table.
#[must_use]
pub fn region_by_label(label: &str) -> Option<RegionDescriptor> {
    region_table()
        .into_iter()
        .find(|region| region.label.eq_ignore_ascii_case(label.trim()))
        .map(|region| RegionDescriptor {
            label: region.label,
            country: Some(region.country),
            method: DetectionMethod::Delegated,
        })
}
