//! Per-point resolution: classify the region, walk its configured
//! endpoints and candidate layers, select the best feature, and shape the
//! per-category payloads that get merged into the enrichment document.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use plot_enrich_models::{
    GeoPoint, Geometry, NormalizedRecord, RawFeature, RecordCategory, SrsId,
};
use plot_enrich_region::{
    DetectionMethod, RegionDescriptor, ServiceEndpointConfig, classify, region_by_label,
    services_for_category,
};
use plot_enrich_spatial::select_best;
use plot_enrich_wfs::{FeatureQuery, ProtocolClient};
use serde_json::json;

use crate::translate::LabelTranslator;

/// Every category a full resolution covers, in resolution order.
pub const ALL_CATEGORIES: [RecordCategory; 4] = [
    RecordCategory::Cadastral,
    RecordCategory::Building,
    RecordCategory::Address,
    RecordCategory::Zoning,
];

const REFERENCE_ALIASES: &[&str] = &[
    "nationalCadastralReference",
    "referencia_catastral",
    "refcat",
    "localId",
    "flurstueckskennzeichen",
    "gebaeudefunktion_id",
    "reference",
];

const LABEL_ALIASES: &[&str] = &[
    "label",
    "text",
    "direccion",
    "address",
    "strassenname",
    "designator",
    "name",
];

const AREA_ALIASES: &[&str] = &[
    "areaValue",
    "superficie",
    "shape_area",
    "amtlicheflaeche",
    "flaeche",
    "area",
];

const CLASSIFICATION_ALIASES: &[&str] = &[
    "currentUse",
    "uso",
    "clase",
    "nutzart",
    "buildingNature",
    "use",
];

/// Property names that carry a zoning label, across the Catalan MUC,
/// Spanish municipal, German Bebauungsplan, and Portuguese PDM schemas.
const ZONING_LABEL_ALIASES: &[&str] = &[
    "descripcio",
    "qualificacio",
    "classificacio",
    "calificacion",
    "clasificacion",
    "uso_predominante",
    "zweckbestimmung",
    "nutzungsart",
    "nutzung",
    "designacao",
    "uso",
    "descripcion",
    "name",
];

const SAMPLE_PROPERTY_CAP: usize = 20;

/// Anything that can turn a point into per-category payloads. The batch
/// orchestrator depends on this seam, not on the concrete [`Resolver`],
/// so it can be exercised without a network.
#[async_trait]
pub trait PointResolver: Send + Sync {
    /// Resolves every category for one point. Infallible by contract:
    /// failures degrade to sentinel payloads, never to errors.
    async fn resolve(&self, point: &GeoPoint) -> Vec<(RecordCategory, serde_json::Value)>;
}

/// The production resolver: region router + protocol client + selector.
#[derive(Clone)]
pub struct Resolver {
    http: reqwest::Client,
    translator: Option<Arc<dyn LabelTranslator>>,
    target_lang: String,
    reverse_geocode_url: Option<String>,
}

impl Resolver {
    #[must_use]
    pub const fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            translator: None,
            target_lang: String::new(),
            reverse_geocode_url: None,
        }
    }

    /// Enables best-effort zoning label translation into `target_lang`.
    #[must_use]
    pub fn with_translator(
        mut self,
        translator: Arc<dyn LabelTranslator>,
        target_lang: &str,
    ) -> Self {
        self.translator = Some(translator);
        self.target_lang = target_lang.to_string();
        self
    }

    /// Enables the delegated reverse-geocoding fallback for points no
    /// static bounding box claims.
    #[must_use]
    pub fn with_reverse_geocoding(mut self, base_url: &str) -> Self {
        self.reverse_geocode_url = Some(base_url.to_string());
        self
    }

    /// Classifies the point's region, falling back to a reverse-geocoder
    /// lookup when the static bounding boxes don't claim it.
    async fn detect_region(&self, point: &GeoPoint) -> RegionDescriptor {
        let region = classify(point);
        if !region.is_unknown() {
            return region;
        }

        let Some(base_url) = &self.reverse_geocode_url else {
            return region;
        };

        match plot_enrich_geocoder::reverse_lookup(&self.http, base_url, point).await {
            Ok(Some(result)) => {
                if let Some(label) = result.region.as_deref()
                    && let Some(mut delegated) = region_by_label(label)
                {
                    delegated.method = DetectionMethod::Delegated;
                    return delegated;
                }
                log::debug!(
                    "Reverse geocoder answered but no configured region matched: {:?}",
                    result.region
                );
                region
            }
            Ok(None) => region,
            Err(e) => {
                log::warn!("Delegated region lookup failed: {e}");
                region
            }
        }
    }

    /// Resolves one category by walking the region's endpoints and each
    /// endpoint's candidate layers in configured order. The first layer
    /// that yields features wins; an exhausted walk produces a sentinel.
    async fn resolve_category(
        &self,
        region: &RegionDescriptor,
        category: RecordCategory,
        point: &GeoPoint,
    ) -> serde_json::Value {
        let endpoints = services_for_category(&region.label, category);
        if endpoints.is_empty() {
            return sentinel(
                Some(region),
                &format!("no {category} service configured for {}", region.label),
            );
        }

        let client = ProtocolClient::new(&self.http);

        for endpoint in &endpoints {
            for layer in &endpoint.layers {
                let query = FeatureQuery::around(*point, layer);
                let features = client.query(endpoint, &query).await;
                if features.is_empty() {
                    continue;
                }

                let selection_point = selection_point(point, &features);
                let Some(best) = select_best(&features, &selection_point) else {
                    continue;
                };

                log::info!(
                    "{}: {category} resolved from layer {layer} ({} candidate(s))",
                    endpoint.name,
                    features.len()
                );

                if category == RecordCategory::Zoning {
                    return self
                        .zoning_payload(best, features.len(), endpoint, region)
                        .await;
                }
                return normalize(best, endpoint).into_payload(category);
            }
        }

        let tried = endpoints
            .iter()
            .map(|endpoint| endpoint.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        sentinel(
            Some(region),
            &format!("no features at this point from: {tried}"),
        )
    }

    /// Zoning keeps a richer payload than the other categories: the picked
    /// label and the field it came from, plus a capped property sample for
    /// manual inspection.
    async fn zoning_payload(
        &self,
        feature: &RawFeature,
        feature_count: usize,
        endpoint: &ServiceEndpointConfig,
        region: &RegionDescriptor,
    ) -> serde_json::Value {
        let picked = pick_labeled(feature, ZONING_LABEL_ALIASES);

        let mut payload = json!({
            "ccaa": region.label,
            "service_type": endpoint.protocol.label(),
            "feature_count": feature_count,
            "source": endpoint.name,
            "service_url": endpoint.base_url,
            "notes": endpoint.notes,
            "sample_properties": sample_properties(feature),
            "checked_at": Utc::now().to_rfc3339(),
        });

        if let Some((field, label)) = picked {
            if let Some(translator) = &self.translator
                && let Some(translated) = translator.translate(&label, &self.target_lang).await
            {
                payload["label_en"] = json!(translated);
            }
            payload["label"] = json!(label);
            payload["picked_field"] = json!(field);
        }

        payload
    }
}

#[async_trait]
impl PointResolver for Resolver {
    async fn resolve(&self, point: &GeoPoint) -> Vec<(RecordCategory, serde_json::Value)> {
        let region = self.detect_region(point).await;

        if region.is_unknown() {
            log::info!(
                "Point ({}, {}) is outside all configured regions",
                point.longitude,
                point.latitude
            );
            return ALL_CATEGORIES
                .into_iter()
                .map(|category| {
                    (
                        category,
                        sentinel(None, "point is outside all configured regions"),
                    )
                })
                .collect();
        }

        log::debug!(
            "Point ({}, {}) classified as {} via {:?}",
            point.longitude,
            point.latitude,
            region.label,
            region.method
        );

        // The three registry categories hit independent services, so run
        // them concurrently. Zoning follows once they settle: zoning
        // portals tend to be the flakiest and benefit from not competing
        // for the connection pool.
        let (cadastral, building, address) = futures::future::join3(
            self.resolve_category(&region, RecordCategory::Cadastral, point),
            self.resolve_category(&region, RecordCategory::Building, point),
            self.resolve_category(&region, RecordCategory::Address, point),
        )
        .await;
        let zoning = self
            .resolve_category(&region, RecordCategory::Zoning, point)
            .await;

        vec![
            (RecordCategory::Cadastral, cadastral),
            (RecordCategory::Building, building),
            (RecordCategory::Address, address),
            (RecordCategory::Zoning, zoning),
        ]
    }
}

/// The sentinel payload written when a category cannot be resolved.
/// Always carries `feature_count: 0` and a non-empty `notes` so the
/// document records that the lookup ran and found nothing.
fn sentinel(region: Option<&RegionDescriptor>, notes: &str) -> serde_json::Value {
    let mut payload = json!({
        "service_type": "unknown",
        "feature_count": 0,
        "notes": notes,
        "checked_at": Utc::now().to_rfc3339(),
    });
    if let Some(region) = region {
        payload["ccaa"] = json!(region.label);
    }
    payload
}

/// Transforms the WGS84 query point into the features' CRS so containment
/// and distance checks compare like with like. Falls back to the raw point
/// when the features are geographic or the transform is unsupported.
fn selection_point(point: &GeoPoint, features: &[RawFeature]) -> GeoPoint {
    let Some(srs) = features.first().map(|feature| feature.srs) else {
        return *point;
    };
    if srs.is_geographic() {
        return *point;
    }
    match plot_enrich_crs::forward(point, srs) {
        Ok(projected) => projected,
        Err(e) => {
            log::debug!("Cannot project selection point into {srs:?}: {e}");
            *point
        }
    }
}

/// Maps a raw feature onto the fixed country-agnostic record shape.
fn normalize(feature: &RawFeature, endpoint: &ServiceEndpointConfig) -> NormalizedRecord {
    let (geometry, geometry_note) = match &feature.geometry {
        Some(geometry) => match reproject_to_wgs84(geometry, feature.srs) {
            Some(reprojected) => (Some(reprojected), None),
            None => (
                None,
                Some(format!("geometry dropped: cannot reproject from {}", feature.srs.epsg_code())),
            ),
        },
        None => (None, None),
    };

    let mut notes = endpoint.notes.clone();
    if let Some(note) = geometry_note {
        if !notes.is_empty() {
            notes.push_str("; ");
        }
        notes.push_str(&note);
    }

    NormalizedRecord {
        reference: feature
            .str_prop(REFERENCE_ALIASES)
            .or_else(|| feature.id.clone()),
        label: feature.str_prop(LABEL_ALIASES),
        area_m2: feature.f64_prop(AREA_ALIASES),
        classification: feature.str_prop(CLASSIFICATION_ALIASES),
        geometry,
        source: endpoint.name.clone(),
        service_url: endpoint.base_url.clone(),
        notes,
    }
}

/// Reprojects every position of a geometry into WGS84. Geographic input
/// passes through; an unsupported source CRS yields `None`.
fn reproject_to_wgs84(geometry: &Geometry, srs: SrsId) -> Option<Geometry> {
    if srs.is_geographic() {
        return Some(geometry.clone());
    }

    let to_wgs84 = |pos: &[f64; 2]| -> Option<[f64; 2]> {
        let projected = GeoPoint::projected(pos[0], pos[1], srs);
        plot_enrich_crs::inverse(&projected, srs)
            .ok()
            .map(|p| [p.longitude, p.latitude])
    };

    match geometry {
        Geometry::Point(pos) => to_wgs84(pos).map(Geometry::Point),
        Geometry::Polygon(rings) => rings
            .iter()
            .map(|ring| ring.iter().map(to_wgs84).collect::<Option<Vec<_>>>())
            .collect::<Option<Vec<_>>>()
            .map(Geometry::Polygon),
        Geometry::MultiPolygon(polygons) => polygons
            .iter()
            .map(|rings| {
                rings
                    .iter()
                    .map(|ring| ring.iter().map(to_wgs84).collect::<Option<Vec<_>>>())
                    .collect::<Option<Vec<_>>>()
            })
            .collect::<Option<Vec<_>>>()
            .map(Geometry::MultiPolygon),
    }
}

/// First alias (in alias-list order) that resolves to a non-empty string
/// property, returning the actual property key alongside the value.
fn pick_labeled(feature: &RawFeature, aliases: &[&str]) -> Option<(String, String)> {
    for alias in aliases {
        for (key, value) in &feature.properties {
            if key.eq_ignore_ascii_case(alias)
                && let serde_json::Value::String(s) = value
                && !s.is_empty()
            {
                return Some((key.clone(), s.clone()));
            }
        }
    }
    None
}

/// A capped copy of the feature's properties for manual inspection of
/// schemas we don't map yet.
fn sample_properties(feature: &RawFeature) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = feature
        .properties
        .iter()
        .take(SAMPLE_PROPERTY_CAP)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn feature(props: &[(&str, serde_json::Value)]) -> RawFeature {
        RawFeature {
            id: Some("f1".to_string()),
            geometry: None,
            srs: SrsId::WGS84,
            properties: props
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        }
    }

    fn endpoint() -> ServiceEndpointConfig {
        ServiceEndpointConfig {
            category: RecordCategory::Cadastral,
            name: "Test Cadastre".to_string(),
            base_url: "https://example.com/wfs".to_string(),
            protocol: plot_enrich_region::ProtocolFamily::Wfs2_0_0,
            layers: vec!["CP.CadastralParcel".to_string()],
            preferred_crs: 25831,
            formats: vec![],
            axis_order: plot_enrich_region::AxisOrder::Xy,
            notes: "no legal validity".to_string(),
        }
    }

    #[test]
    fn pick_labeled_is_case_insensitive_and_ordered() {
        let f = feature(&[
            ("NAME", json!("fallback")),
            ("Qualificacio", json!("R3 eixample")),
        ]);

        let (field, value) = pick_labeled(&f, ZONING_LABEL_ALIASES).unwrap();

        assert_eq!(field, "Qualificacio");
        assert_eq!(value, "R3 eixample");
    }

    #[test]
    fn pick_labeled_skips_empty_and_non_string() {
        let f = feature(&[("descripcio", json!("")), ("uso", json!(42))]);
        assert!(pick_labeled(&f, ZONING_LABEL_ALIASES).is_none());
    }

    #[test]
    fn normalize_maps_inspire_cadastral_properties() {
        let f = feature(&[
            ("nationalCadastralReference", json!("9722109DF2892C")),
            ("areaValue", json!(412.5)),
            ("currentUse", json!("residential")),
        ]);

        let record = normalize(&f, &endpoint());

        assert_eq!(record.reference.as_deref(), Some("9722109DF2892C"));
        assert_eq!(record.area_m2, Some(412.5));
        assert_eq!(record.classification.as_deref(), Some("residential"));
        assert_eq!(record.source, "Test Cadastre");
        assert!(record.notes.contains("no legal validity"));
    }

    #[test]
    fn normalize_falls_back_to_feature_id() {
        let f = feature(&[("unrelated", json!("x"))]);
        let record = normalize(&f, &endpoint());
        assert_eq!(record.reference.as_deref(), Some("f1"));
    }

    #[test]
    fn reproject_polygon_from_utm_round_trips() {
        // Barcelona in ETRS89 / UTM 31N.
        let utm = Geometry::Polygon(vec![vec![
            [430_887.0, 4_581_900.0],
            [430_987.0, 4_581_900.0],
            [430_987.0, 4_582_000.0],
            [430_887.0, 4_581_900.0],
        ]]);

        let wgs84 = reproject_to_wgs84(&utm, SrsId(25_831)).unwrap();

        let Geometry::Polygon(rings) = wgs84 else {
            panic!("expected polygon");
        };
        let [lon, lat] = rings[0][0];
        assert!((lon - 2.1734).abs() < 0.01, "lon {lon}");
        assert!((lat - 41.3851).abs() < 0.01, "lat {lat}");
    }

    #[test]
    fn reproject_unsupported_srs_yields_none() {
        let geometry = Geometry::Point([100.0, 200.0]);
        assert!(reproject_to_wgs84(&geometry, SrsId(3857)).is_none());
    }

    #[test]
    fn geographic_geometry_passes_through() {
        let geometry = Geometry::Point([2.17, 41.38]);
        assert_eq!(
            reproject_to_wgs84(&geometry, SrsId::WGS84),
            Some(geometry)
        );
    }

    #[test]
    fn sentinel_carries_zero_count_and_notes() {
        let payload = sentinel(None, "point is outside all configured regions");

        assert_eq!(payload["feature_count"], 0);
        assert_eq!(payload["service_type"], "unknown");
        assert!(!payload["notes"].as_str().unwrap().is_empty());
    }

    #[test]
    fn selection_point_projects_into_feature_srs() {
        let point = GeoPoint::new(2.1734, 41.3851).unwrap();
        let features = vec![RawFeature {
            id: None,
            geometry: None,
            srs: SrsId(25_831),
            properties: BTreeMap::new(),
        }];

        let selected = selection_point(&point, &features);

        assert_eq!(selected.srs, SrsId(25_831));
        assert!((selected.longitude - 430_887.0).abs() < 50.0);
    }

    #[test]
    fn selection_point_keeps_geographic_features_unprojected() {
        let point = GeoPoint::new(2.17, 41.38).unwrap();
        let features = vec![feature(&[])];
        assert_eq!(selection_point(&point, &features), point);
    }

    #[tokio::test]
    async fn ocean_point_resolves_to_sentinels_without_network() {
        // Mid-Atlantic: no bounding box claims it and no reverse geocoder
        // is configured, so every category gets a sentinel and no HTTP
        // request is ever issued.
        let resolver = Resolver::new(reqwest::Client::new());
        let point = GeoPoint::new(-30.0, 30.0).unwrap();

        let payloads = resolver.resolve(&point).await;

        assert_eq!(payloads.len(), ALL_CATEGORIES.len());
        for (_, payload) in payloads {
            assert_eq!(payload["feature_count"], 0);
            assert!(!payload["notes"].as_str().unwrap().is_empty());
        }
    }
}
