//! Declarative query strategies.
//!
//! A [`QueryStrategy`] is a pure description of one attempt: protocol
//! version, output format, query CRS, bbox scale, and axis handling.
//! [`build_strategies`] turns an endpoint config into the ordered attempt
//! table; the client executes it until an attempt yields features.
//!
//! Table order mirrors the fallback policy:
//!
//! 1. the endpoint's preferred format(s), sweeping GeoJSON MIME variants,
//! 2. a GML-only request on the same protocol,
//! 3. the other WFS protocol version, with an axis-flipped bbox variant
//!    when the query is geographic,
//! 4. the whole sequence again over progressively larger bboxes and the
//!    alternate CRS.

use plot_enrich_models::{BoundingBox, GeoPoint, SrsId};
use plot_enrich_region::{AxisOrder, OutputFormat, ProtocolFamily, ServiceEndpointConfig};

use crate::FeatureQuery;

/// MIME spellings servers use for "GeoJSON", in preference order.
pub const GEOJSON_MIMES: &[&str] = &["application/json", "application/geo+json", "json"];

/// Bbox widening steps. Strictly increasing, bounded.
pub const BBOX_SCALES: &[f64] = &[1.0, 3.0, 9.0];

/// Approximate meters per degree at mid latitudes, for sizing projected
/// search boxes from the degree-based query half-size.
const METERS_PER_DEGREE: f64 = 111_000.0;

/// Output format of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFormat {
    /// GeoJSON with a specific `outputFormat` MIME value.
    GeoJson(&'static str),
    /// Server-native GML (no `outputFormat` parameter).
    Gml,
}

/// One fully described query attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStrategy {
    /// Protocol version for this attempt.
    pub protocol: ProtocolFamily,
    /// Output format requested.
    pub format: AttemptFormat,
    /// CRS the bbox (and `srsName`) are expressed in.
    pub srs: SrsId,
    /// Multiplier applied to the query's base bbox half-size.
    pub bbox_scale: f64,
    /// Emit the bbox in y,x order (geographic axis-order quirk probing).
    pub flip_bbox_axes: bool,
    /// Swap coordinate pairs when decoding GML responses (endpoint quirk).
    pub gml_swap_axes: bool,
}

impl QueryStrategy {
    /// Computes this attempt's bbox around the query point.
    ///
    /// For projected CRS the point is reprojected first; a CRS transform
    /// failure falls back to the geographic box (coordinates treated as
    /// already being in the query CRS).
    #[must_use]
    pub fn bbox(&self, query: &FeatureQuery) -> BoundingBox {
        if self.srs.is_geographic() {
            return BoundingBox::around(&query.point, query.half_size_deg * self.bbox_scale);
        }
        plot_enrich_crs::forward(&query.point, self.srs).map_or_else(
            |_| BoundingBox::around(&query.point, query.half_size_deg * self.bbox_scale),
            |projected| {
                BoundingBox::around(
                    &projected,
                    query.half_size_deg * METERS_PER_DEGREE * self.bbox_scale,
                )
            },
        )
    }

    /// Builds the request URL and query parameters for this attempt.
    #[must_use]
    pub fn request_parts(
        &self,
        endpoint: &ServiceEndpointConfig,
        query: &FeatureQuery,
    ) -> (String, Vec<(String, String)>) {
        let bbox = self.bbox(query);
        let bbox_param = bbox.to_param(self.flip_bbox_axes);

        match self.protocol {
            ProtocolFamily::OgcApiFeatures => {
                let url = format!(
                    "{}/collections/{}/items",
                    endpoint.base_url.trim_end_matches('/'),
                    query.layer
                );
                let params = vec![
                    ("f".to_string(), "json".to_string()),
                    ("bbox".to_string(), bbox_param),
                    ("limit".to_string(), query.count.to_string()),
                ];
                (url, params)
            }
            ProtocolFamily::Wfs2_0_0 => {
                let mut params = vec![
                    ("service".to_string(), "WFS".to_string()),
                    ("version".to_string(), "2.0.0".to_string()),
                    ("request".to_string(), "GetFeature".to_string()),
                    ("typeNames".to_string(), query.layer.clone()),
                    ("srsName".to_string(), self.srs.epsg_code()),
                    (
                        "bbox".to_string(),
                        format!("{bbox_param},{}", self.srs.epsg_code()),
                    ),
                    ("count".to_string(), query.count.to_string()),
                ];
                if let AttemptFormat::GeoJson(mime) = self.format {
                    params.push(("outputFormat".to_string(), mime.to_string()));
                }
                (endpoint.base_url.clone(), params)
            }
            ProtocolFamily::Wfs1_1_0 => {
                let mut params = vec![
                    ("service".to_string(), "WFS".to_string()),
                    ("version".to_string(), "1.1.0".to_string()),
                    ("request".to_string(), "GetFeature".to_string()),
                    ("typeName".to_string(), query.layer.clone()),
                    ("srsName".to_string(), self.srs.epsg_code()),
                    ("bbox".to_string(), bbox_param),
                    ("maxFeatures".to_string(), query.count.to_string()),
                ];
                if let AttemptFormat::GeoJson(mime) = self.format {
                    params.push(("outputFormat".to_string(), mime.to_string()));
                }
                (endpoint.base_url.clone(), params)
            }
        }
    }
}

/// The other WFS protocol version, for the protocol-downgrade fallback.
const fn alternate_protocol(protocol: ProtocolFamily) -> Option<ProtocolFamily> {
    match protocol {
        ProtocolFamily::Wfs2_0_0 => Some(ProtocolFamily::Wfs1_1_0),
        ProtocolFamily::Wfs1_1_0 => Some(ProtocolFamily::Wfs2_0_0),
        ProtocolFamily::OgcApiFeatures => None,
    }
}

/// Expands configured formats into per-MIME attempt formats.
fn expand_formats(formats: &[OutputFormat]) -> Vec<AttemptFormat> {
    let mut out = Vec::new();
    for format in formats {
        match format {
            OutputFormat::GeoJson => {
                out.extend(GEOJSON_MIMES.iter().copied().map(AttemptFormat::GeoJson));
            }
            OutputFormat::Gml => out.push(AttemptFormat::Gml),
        }
    }
    if !out.contains(&AttemptFormat::Gml) {
        // GML-only fallback even when the config only lists GeoJSON
        out.push(AttemptFormat::Gml);
    }
    out
}

/// CRS candidates for an endpoint: the preferred projected system when
/// the point can be projected into it, then geographic WGS84.
fn srs_candidates(endpoint: &ServiceEndpointConfig, point: &GeoPoint) -> Vec<SrsId> {
    let preferred = endpoint.preferred_srs();
    if preferred.is_geographic() {
        return vec![SrsId::WGS84];
    }
    if plot_enrich_crs::forward(point, preferred).is_ok() {
        vec![preferred, SrsId::WGS84]
    } else {
        // Unsupported projection: degrade to geographic queries only
        vec![SrsId::WGS84]
    }
}

/// Builds the ordered attempt table for an endpoint and query.
#[must_use]
pub fn build_strategies(
    endpoint: &ServiceEndpointConfig,
    query: &FeatureQuery,
) -> Vec<QueryStrategy> {
    let gml_swap = endpoint.axis_order == AxisOrder::Yx;
    let mut strategies = Vec::new();

    if endpoint.protocol == ProtocolFamily::OgcApiFeatures {
        // OGC API Features: always JSON, always WGS84 bbox, no protocol
        // downgrade. Only the widening dimension remains.
        for &scale in BBOX_SCALES {
            strategies.push(QueryStrategy {
                protocol: ProtocolFamily::OgcApiFeatures,
                format: AttemptFormat::GeoJson("json"),
                srs: SrsId::WGS84,
                bbox_scale: scale,
                flip_bbox_axes: false,
                gml_swap_axes: false,
            });
        }
        return strategies;
    }

    let formats = expand_formats(&endpoint.formats);
    let candidates = srs_candidates(endpoint, &query.point);

    for &scale in BBOX_SCALES {
        for &srs in &candidates {
            // (a)+(b): preferred protocol, every format variant, GML last.
            for &format in &formats {
                strategies.push(QueryStrategy {
                    protocol: endpoint.protocol,
                    format,
                    srs,
                    bbox_scale: scale,
                    flip_bbox_axes: false,
                    gml_swap_axes: gml_swap,
                });
            }

            // (c): the other protocol version; probe both bbox axis
            // orders when the query is geographic, since servers
            // interpret those inconsistently.
            if let Some(alternate) = alternate_protocol(endpoint.protocol) {
                let mut alternate_formats =
                    vec![formats.first().copied().unwrap_or(AttemptFormat::Gml)];
                if alternate_formats[0] != AttemptFormat::Gml {
                    alternate_formats.push(AttemptFormat::Gml);
                }
                for format in alternate_formats {
                    strategies.push(QueryStrategy {
                        protocol: alternate,
                        format,
                        srs,
                        bbox_scale: scale,
                        flip_bbox_axes: false,
                        gml_swap_axes: gml_swap,
                    });
                    if srs.is_geographic() {
                        strategies.push(QueryStrategy {
                            protocol: alternate,
                            format,
                            srs,
                            bbox_scale: scale,
                            flip_bbox_axes: true,
                            gml_swap_axes: gml_swap,
                        });
                    }
                }
            }
        }
    }

    strategies
}
