//! Compile-time registry of regional geodata service configurations.
//!
//! Each region is defined in a TOML file under `services/`, embedded at
//! compile time. A region's endpoints are ordered and each endpoint's
//! candidate layers are listed most-specific-first; clients try them in
//! order. Purely data: no network access happens here.

use plot_enrich_models::{RecordCategory, SrsId};
use serde::Deserialize;

/// Protocol family an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// OGC WFS 1.1.0 (`maxFeatures`, lat/lon bbox quirks).
    #[serde(rename = "wfs_1_1_0")]
    Wfs1_1_0,
    /// OGC WFS 2.0.0 (`count`, `typeNames`).
    #[serde(rename = "wfs_2_0_0")]
    Wfs2_0_0,
    /// OGC API Features (`/collections/{id}/items`).
    OgcApiFeatures,
}

impl ProtocolFamily {
    /// Short label used in result payloads (`service_type`).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Wfs1_1_0 | Self::Wfs2_0_0 => "WFS",
            Self::OgcApiFeatures => "OGC API Features",
        }
    }
}

/// Output format preference for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// GeoJSON in any of its MIME spellings.
    GeoJson,
    /// GML, routed through the GML parser.
    Gml,
}

/// Axis order the endpoint uses for geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisOrder {
    /// Longitude/easting first (GeoJSON convention).
    #[default]
    Xy,
    /// Latitude/northing first (strict EPSG:4326 axis order).
    Yx,
}

/// One queryable endpoint for one enrichment category.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpointConfig {
    /// Which enrichment category this endpoint serves.
    pub category: RecordCategory,
    /// Human-readable service name (goes into result payloads as `source`).
    pub name: String,
    /// Base URL of the service.
    pub base_url: String,
    /// Protocol family.
    pub protocol: ProtocolFamily,
    /// Candidate layer/collection names, most specific first.
    pub layers: Vec<String>,
    /// EPSG code the service prefers for queries.
    pub preferred_crs: u32,
    /// Output formats worth attempting, in order.
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,
    /// Axis-order quirk for geographic coordinates.
    #[serde(default)]
    pub axis_order: AxisOrder,
    /// Free-text caveats ("no legal validity", coverage gaps). Carried
    /// into result payloads, never interpreted.
    #[serde(default)]
    pub notes: String,
}

impl ServiceEndpointConfig {
    /// The endpoint's preferred CRS as an [`SrsId`].
    #[must_use]
    pub const fn preferred_srs(&self) -> SrsId {
        SrsId(self.preferred_crs)
    }
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::GeoJson, OutputFormat::Gml]
}

/// All endpoints configured for one region.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionServices {
    /// Region label, matching the router's `regions.toml`.
    pub region: String,
    /// Ordered endpoint list.
    #[serde(default)]
    pub endpoint: Vec<ServiceEndpointConfig>,
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("catalunya", include_str!("../services/catalunya.toml")),
    ("madrid", include_str!("../services/madrid.toml")),
    ("andalucia", include_str!("../services/andalucia.toml")),
    ("valencia", include_str!("../services/valencia.toml")),
    ("euskadi", include_str!("../services/euskadi.toml")),
    ("galicia", include_str!("../services/galicia.toml")),
    ("portugal", include_str!("../services/portugal.toml")),
    ("berlin", include_str!("../services/berlin.toml")),
    ("brandenburg", include_str!("../services/brandenburg.toml")),
    ("nrw", include_str!("../services/nrw.toml")),
];

#[cfg(test)]
const EXPECTED_REGION_COUNT: usize = 10;

/// Returns every configured region's services.
///
/// # Panics
///
/// Panics if any embedded TOML is malformed (a compile-time guarantee in
/// practice, since the configs are baked into the binary).
#[must_use]
pub fn all_regions() -> Vec<RegionServices> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse region services '{name}': {e}"))
        })
        .collect()
}

/// Returns the ordered endpoint configs for a region label, or an empty
/// vector for unconfigured regions. Absence is not an error: callers
/// produce an "unknown service" sentinel result instead.
#[must_use]
pub fn services_for(region_label: &str) -> Vec<ServiceEndpointConfig> {
    all_regions()
        .into_iter()
        .find(|region| region.region.eq_ignore_ascii_case(region_label))
        .map_or_else(
            || {
                log::debug!("No services configured for region '{region_label}'");
                Vec::new()
            },
            |region| region.endpoint,
        )
}

/// Endpoints of one category for a region, preserving configured order.
#[must_use]
pub fn services_for_category(
    region_label: &str,
    category: RecordCategory,
) -> Vec<ServiceEndpointConfig> {
    services_for(region_label)
        .into_iter()
        .filter(|endpoint| endpoint.category == category)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn loads_all_regions() {
        assert_eq!(all_regions().len(), EXPECTED_REGION_COUNT);
    }

    #[test]
    fn region_labels_are_unique() {
        let regions = all_regions();
        let mut seen = BTreeSet::new();
        for region in &regions {
            assert!(
                seen.insert(&region.region),
                "Duplicate region: {}",
                region.region
            );
        }
    }

    #[test]
    fn all_endpoints_have_required_fields() {
        for region in &all_regions() {
            assert!(!region.endpoint.is_empty(), "{}: no endpoints", region.region);
            for endpoint in &region.endpoint {
                assert!(
                    !endpoint.base_url.is_empty(),
                    "{}/{}: empty base_url",
                    region.region,
                    endpoint.name
                );
                assert!(
                    !endpoint.layers.is_empty(),
                    "{}/{}: no candidate layers",
                    region.region,
                    endpoint.name
                );
                assert!(
                    endpoint.preferred_crs >= 4326,
                    "{}/{}: implausible CRS {}",
                    region.region,
                    endpoint.name,
                    endpoint.preferred_crs
                );
            }
        }
    }

    #[test]
    fn catalunya_zoning_layer_order() {
        let zoning = services_for_category("Catalunya", RecordCategory::Zoning);
        assert_eq!(zoning.len(), 1);
        assert_eq!(
            zoning[0].layers,
            vec!["MUC_QUALIFICACIONS", "MUC_CLASSIFICACIONS"]
        );
    }

    #[test]
    fn unknown_region_yields_empty_not_error() {
        assert!(services_for("Atlantis").is_empty());
        assert!(services_for_category("Atlantis", RecordCategory::Cadastral).is_empty());
    }

    #[test]
    fn spanish_regions_share_the_national_cadastre() {
        for label in ["Catalunya", "Madrid", "Galicia"] {
            let cadastral = services_for_category(label, RecordCategory::Cadastral);
            assert_eq!(cadastral.len(), 1, "{label}");
            assert!(cadastral[0].base_url.contains("catastro"), "{label}");
            assert_eq!(cadastral[0].layers[0], "CP.CadastralParcel");
            assert!(cadastral[0].notes.contains("no legal validity"));
        }
    }
}
