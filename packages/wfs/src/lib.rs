#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Executes parameterized spatial queries against one regional endpoint,
//! across protocol and format variants.
//!
//! Regional services are inconsistent in ways that only show up at
//! runtime: servers advertise GeoJSON under several MIME spellings, some
//! only speak GML, WFS 1.1.0 servers disagree about geographic bbox axis
//! order, and sparse layers return nothing until the search box grows.
//! Instead of nesting those fallbacks as conditionals, [`strategy`] builds
//! an ordered table of [`strategy::QueryStrategy`] descriptions and
//! [`ProtocolClient::query`] executes them until one yields features.
//!
//! All failures inside a query are soft: a failed or timed-out attempt
//! advances to the next strategy, and a fully exhausted table yields an
//! empty feature list. Nothing is cached across calls.

pub mod strategy;

use std::collections::BTreeMap;
use std::time::Duration;

use plot_enrich_models::{GeoPoint, Geometry, RawFeature, SrsId};
use plot_enrich_region::{OutputFormat, ProtocolFamily, ServiceEndpointConfig};

use crate::strategy::{AttemptFormat, QueryStrategy, build_strategies};

/// Errors surfaced by the HTTP layer. Inside [`ProtocolClient::query`]
/// these only ever advance the fallback chain; the type exists for the
/// lower-level single-attempt API.
#[derive(Debug, thiserror::Error)]
pub enum WfsError {
    /// HTTP request failed or timed out.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be interpreted in the expected format.
    #[error("Response parse error: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },
}

/// A spatial query for one candidate layer around one point.
#[derive(Debug, Clone)]
pub struct FeatureQuery {
    /// Query point (WGS84).
    pub point: GeoPoint,
    /// Layer/collection name to query.
    pub layer: String,
    /// Result-count cap passed to the server.
    pub count: u32,
    /// Base bbox half-size in degrees (projected CRS use the meter
    /// equivalent at mid latitudes). Widening strategies scale this up.
    pub half_size_deg: f64,
}

impl FeatureQuery {
    /// A query with the defaults used by the enrichment pipeline:
    /// ~100 m search box, 10 features max.
    #[must_use]
    pub fn around(point: GeoPoint, layer: &str) -> Self {
        Self {
            point,
            layer: layer.to_string(),
            count: 10,
            half_size_deg: 0.001,
        }
    }
}

/// Builds the shared HTTP client every request-issuing component receives.
///
/// One explicit client value: constructed once, passed by reference.
/// Each attempt is time-boxed by the client-level timeout.
///
/// # Errors
///
/// Returns a `reqwest::Error` if the TLS backend fails to initialize.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent("plot-enrich/0.1 (https://github.com/BSteffaniak/plot-enrich)")
        .timeout(timeout)
        .build()
}

/// Spatial query client for one endpoint at a time.
pub struct ProtocolClient<'a> {
    http: &'a reqwest::Client,
}

impl<'a> ProtocolClient<'a> {
    /// Wraps the shared HTTP client.
    #[must_use]
    pub const fn new(http: &'a reqwest::Client) -> Self {
        Self { http }
    }

    /// Runs the endpoint's strategy table until one attempt yields
    /// features. An exhausted table yields an empty list — callers treat
    /// that as license to try the next candidate layer or endpoint.
    pub async fn query(
        &self,
        endpoint: &ServiceEndpointConfig,
        query: &FeatureQuery,
    ) -> Vec<RawFeature> {
        let strategies = build_strategies(endpoint, query);
        let total = strategies.len();

        for (index, strategy) in strategies.iter().enumerate() {
            match self.attempt(endpoint, query, strategy).await {
                Ok(features) if !features.is_empty() => {
                    log::debug!(
                        "{}: strategy {}/{total} returned {} feature(s) for layer {}",
                        endpoint.name,
                        index + 1,
                        features.len(),
                        query.layer
                    );
                    return features;
                }
                Ok(_) => {
                    log::debug!(
                        "{}: strategy {}/{total} returned no features, advancing",
                        endpoint.name,
                        index + 1
                    );
                }
                Err(e) => {
                    log::warn!(
                        "{}: strategy {}/{total} failed ({e}), advancing",
                        endpoint.name,
                        index + 1
                    );
                }
            }
        }

        log::debug!(
            "{}: all {total} strategies exhausted for layer {}",
            endpoint.name,
            query.layer
        );
        Vec::new()
    }

    /// Executes a single strategy: one HTTP request, one parse.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError`] on HTTP failure; parse failures degrade to an
    /// empty list because "couldn't read it" and "nothing there" advance
    /// the chain identically.
    async fn attempt(
        &self,
        endpoint: &ServiceEndpointConfig,
        query: &FeatureQuery,
        strategy: &QueryStrategy,
    ) -> Result<Vec<RawFeature>, WfsError> {
        let (url, params) = strategy.request_parts(endpoint, query);
        log::debug!("GET {url} {params:?}");

        let response = self.http.get(&url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WfsError::Parse {
                message: format!("HTTP {status}"),
            });
        }
        let body = response.text().await?;

        match strategy.format {
            AttemptFormat::GeoJson(_) => Ok(decode_geojson(&body)),
            AttemptFormat::Gml => {
                let swap = strategy.srs.is_geographic() && strategy.gml_swap_axes;
                Ok(plot_enrich_gml::parse_with(&body, strategy.srs, swap))
            }
        }
    }
}

/// Decodes a GeoJSON `FeatureCollection` body into raw features.
///
/// GeoJSON coordinates are WGS84 lon/lat per RFC 7946, so decoded
/// features are tagged WGS84 regardless of the query CRS. Unparseable
/// bodies and unsupported geometry kinds soft-fail to empty/`None`.
#[must_use]
pub fn decode_geojson(body: &str) -> Vec<RawFeature> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        log::debug!("GeoJSON body did not parse as JSON");
        return Vec::new();
    };

    let Some(features) = value.get("features").and_then(serde_json::Value::as_array) else {
        log::debug!("JSON body is not a FeatureCollection");
        return Vec::new();
    };

    features
        .iter()
        .map(|feature| {
            let id = match feature.get("id") {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };

            let geometry = feature
                .get("geometry")
                .and_then(|g| serde_json::from_value::<Geometry>(g.clone()).ok());

            let properties: BTreeMap<String, serde_json::Value> = feature
                .get("properties")
                .and_then(serde_json::Value::as_object)
                .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();

            RawFeature {
                id,
                geometry,
                srs: SrsId::WGS84,
                properties,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_feature_collection() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "id": "zone.1",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[2.0, 41.0], [2.1, 41.0], [2.1, 41.1], [2.0, 41.0]]]
                },
                "properties": {"uso_suelo": "Residencial", "codi": 12}
            }]
        })
        .to_string();

        let features = decode_geojson(&body);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id.as_deref(), Some("zone.1"));
        assert_eq!(features[0].srs, SrsId::WGS84);
        assert!(features[0].geometry.as_ref().unwrap().is_polygonal());
        assert_eq!(
            features[0].str_prop(&["uso_suelo"]).as_deref(),
            Some("Residencial")
        );
        assert_eq!(features[0].str_prop(&["codi"]).as_deref(), Some("12"));
    }

    #[test]
    fn unsupported_geometry_kind_is_dropped_feature_kept() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]},
                "properties": {"name": "road"}
            }]
        })
        .to_string();

        let features = decode_geojson(&body);
        assert_eq!(features.len(), 1);
        assert!(features[0].geometry.is_none());
        assert_eq!(features[0].str_prop(&["name"]).as_deref(), Some("road"));
    }

    #[test]
    fn garbage_body_soft_fails() {
        assert!(decode_geojson("<html>error</html>").is_empty());
        assert!(decode_geojson("{\"type\": \"Feature\"}").is_empty());
        assert!(decode_geojson("").is_empty());
    }
}
