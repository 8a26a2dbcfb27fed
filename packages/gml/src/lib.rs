#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Decodes namespaced GML/XML feature collections into [`RawFeature`]s.
//!
//! Regional WFS servers disagree about namespace prefixes (`wfs:member`,
//! `gml:featureMember`, bare `member`), geometry encodings (Point `pos`,
//! Polygon `posList`, MultiSurface `surfaceMember`), and property schemas.
//! Rather than matching exact tag names, the parser builds a small element
//! tree and resolves logical names against alias tables on the local part
//! of each tag name.
//!
//! This is a soft-fail pathway: malformed or unrecognized XML yields an
//! empty feature list, which callers treat as license to try the next
//! query strategy.

use std::collections::BTreeMap;

use plot_enrich_models::{Geometry, RawFeature, SrsId};
use quick_xml::Reader;
use quick_xml::events::Event;

// ── Alias tables ──────────────────────────────────────────────────────

/// Feature container tags, across WFS versions and bare-XML servers.
const MEMBER_TAGS: &[&str] = &["member", "featureMember", "featureMembers"];
/// Point geometry container and its coordinate tags.
const POINT_TAGS: &[&str] = &["Point"];
/// Polygon geometry containers.
const POLYGON_TAGS: &[&str] = &["Polygon", "Surface"];
/// Multi-polygon geometry containers.
const MULTI_TAGS: &[&str] = &["MultiSurface", "MultiPolygon", "MultiGeometry"];
/// Coordinate-bearing leaf tags (GML 3 `pos`/`posList`, GML 2 `coordinates`).
const COORD_TAGS: &[&str] = &["pos", "posList", "coordinates"];
/// Exterior-ring wrappers (GML 3 / GML 2).
const EXTERIOR_TAGS: &[&str] = &["exterior", "outerBoundaryIs"];
/// Interior-ring wrappers.
const INTERIOR_TAGS: &[&str] = &["interior", "innerBoundaryIs"];
/// Ring element.
const RING_TAGS: &[&str] = &["LinearRing"];
/// Per-polygon wrapper inside a multi-geometry.
const SURFACE_MEMBER_TAGS: &[&str] = &["surfaceMember", "polygonMember", "geometryMember"];
/// Subtrees that never contribute feature properties.
const NON_PROPERTY_TAGS: &[&str] = &["boundedBy", "Envelope", "lowerCorner", "upperCorner"];

/// A minimal XML element: local name, attributes (local names), children,
/// and accumulated text.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: BTreeMap<String, String>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn matches(&self, aliases: &[&str]) -> bool {
        aliases.iter().any(|a| self.name.eq_ignore_ascii_case(a))
    }

    /// First descendant (document order, self excluded) matching `aliases`.
    fn find<'a>(&'a self, aliases: &[&str]) -> Option<&'a XmlNode> {
        for child in &self.children {
            if child.matches(aliases) {
                return Some(child);
            }
            if let Some(found) = child.find(aliases) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants matching `aliases`, document order.
    fn find_all<'a>(&'a self, aliases: &[&str], out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.matches(aliases) {
                out.push(child);
            } else {
                child.find_all(aliases, out);
            }
        }
    }

    /// First `srsName` attribute in this subtree.
    fn srs_name(&self) -> Option<&str> {
        if let Some(value) = self.attrs.get("srsName") {
            return Some(value);
        }
        self.children.iter().find_map(XmlNode::srs_name)
    }
}

/// Strips any namespace prefix from a qualified name.
fn local_name(raw: &[u8]) -> String {
    let local = raw
        .rsplit(|&b| b == b':')
        .next()
        .unwrap_or(raw);
    String::from_utf8_lossy(local).into_owned()
}

/// Builds the element tree, or `None` on any well-formedness error.
fn build_tree(xml: &str) -> Option<XmlNode> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let mut node = XmlNode {
                    name: local_name(start.name().as_ref()),
                    ..XmlNode::default()
                };
                for attr in start.attributes() {
                    let attr = attr.ok()?;
                    let key = local_name(attr.key.as_ref());
                    let value = attr.unescape_value().ok()?.into_owned();
                    node.attrs.insert(key, value);
                }
                stack.push(node);
            }
            Ok(Event::Empty(empty)) => {
                let mut node = XmlNode {
                    name: local_name(empty.name().as_ref()),
                    ..XmlNode::default()
                };
                for attr in empty.attributes() {
                    let attr = attr.ok()?;
                    let key = local_name(attr.key.as_ref());
                    let value = attr.unescape_value().ok()?.into_owned();
                    node.attrs.insert(key, value);
                }
                stack.last_mut()?.children.push(node);
            }
            Ok(Event::End(_)) => {
                let node = stack.pop()?;
                // Underflow means mismatched tags
                stack.last_mut()?.children.push(node);
            }
            Ok(Event::Text(text)) => {
                let decoded = text.unescape().ok()?;
                let trimmed = decoded.trim();
                if !trimmed.is_empty() {
                    let current = stack.last_mut()?;
                    if !current.text.is_empty() {
                        current.text.push(' ');
                    }
                    current.text.push_str(trimmed);
                }
            }
            Ok(Event::CData(cdata)) => {
                let decoded = String::from_utf8_lossy(cdata.as_ref()).into_owned();
                let trimmed = decoded.trim();
                if !trimmed.is_empty() {
                    stack.last_mut()?.text.push_str(trimmed);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!("GML parse aborted: {e}");
                return None;
            }
        }
    }

    // A balanced document leaves exactly the synthetic root on the stack.
    if stack.len() == 1 {
        stack.pop()
    } else {
        None
    }
}

/// Parses whitespace- or comma-separated coordinate text into `[x, y]`
/// pairs. Unparseable tokens are dropped; an unpaired trailing value is
/// truncated. `swap_axes` flips each pair (for servers whose native axis
/// order is y,x).
fn parse_coordinates(text: &str, swap_axes: bool) -> Vec<[f64; 2]> {
    let values: Vec<f64> = text
        .split([' ', ',', '\t', '\n', '\r'])
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<f64>().ok())
        .collect();

    values
        .chunks_exact(2)
        .map(|pair| {
            if swap_axes {
                [pair[1], pair[0]]
            } else {
                [pair[0], pair[1]]
            }
        })
        .collect()
}

/// Extracts one ring from a `LinearRing` wrapper (or the wrapper's parent,
/// for servers that put `posList` directly under `exterior`).
fn ring_coordinates(wrapper: &XmlNode, swap_axes: bool) -> Option<Vec<[f64; 2]>> {
    let ring = wrapper.find(RING_TAGS).unwrap_or(wrapper);
    let coords = ring.find(COORD_TAGS)?;
    let positions = parse_coordinates(&coords.text, swap_axes);
    if positions.is_empty() {
        None
    } else {
        Some(positions)
    }
}

/// Decodes a `Polygon`/`Surface` element into rings (exterior first).
fn polygon_rings(polygon: &XmlNode, swap_axes: bool) -> Option<Vec<Vec<[f64; 2]>>> {
    let mut rings = Vec::new();

    let mut exteriors = Vec::new();
    polygon.find_all(EXTERIOR_TAGS, &mut exteriors);
    if let Some(exterior) = exteriors.first() {
        rings.push(ring_coordinates(exterior, swap_axes)?);
    } else {
        // Some servers skip the exterior wrapper entirely
        rings.push(ring_coordinates(polygon, swap_axes)?);
    }

    let mut interiors = Vec::new();
    polygon.find_all(INTERIOR_TAGS, &mut interiors);
    for interior in interiors {
        if let Some(ring) = ring_coordinates(interior, swap_axes) {
            rings.push(ring);
        }
    }

    Some(rings)
}

/// Finds and decodes the first recognizable geometry under `feature`.
fn extract_geometry(feature: &XmlNode, swap_axes: bool) -> Option<Geometry> {
    if let Some(multi) = feature.find(MULTI_TAGS) {
        let mut members = Vec::new();
        multi.find_all(SURFACE_MEMBER_TAGS, &mut members);
        let polygons: Vec<Vec<Vec<[f64; 2]>>> = members
            .iter()
            .filter_map(|member| {
                member
                    .find(POLYGON_TAGS)
                    .and_then(|polygon| polygon_rings(polygon, swap_axes))
            })
            .collect();
        if !polygons.is_empty() {
            return Some(Geometry::MultiPolygon(polygons));
        }
    }

    if let Some(polygon) = feature.find(POLYGON_TAGS) {
        if let Some(rings) = polygon_rings(polygon, swap_axes) {
            return Some(Geometry::Polygon(rings));
        }
    }

    if let Some(point) = feature.find(POINT_TAGS) {
        let coords = point.find(COORD_TAGS)?;
        let positions = parse_coordinates(&coords.text, swap_axes);
        if let Some(first) = positions.first() {
            return Some(Geometry::Point(*first));
        }
    }

    None
}

/// Collects leaf text elements outside geometry containers as the feature
/// property bag. First occurrence of a name wins.
fn collect_properties(node: &XmlNode, out: &mut BTreeMap<String, serde_json::Value>) {
    for child in &node.children {
        if child.matches(POINT_TAGS)
            || child.matches(POLYGON_TAGS)
            || child.matches(MULTI_TAGS)
            || child.matches(NON_PROPERTY_TAGS)
        {
            continue;
        }
        if child.children.is_empty() {
            if !child.text.is_empty() && !out.contains_key(&child.name) {
                out.insert(
                    child.name.clone(),
                    serde_json::Value::String(child.text.clone()),
                );
            }
        } else {
            collect_properties(child, out);
        }
    }
}

/// Decodes one feature element.
fn decode_feature(feature: &XmlNode, default_srs: SrsId, swap_axes: bool) -> RawFeature {
    let id = feature.attrs.get("id").cloned();
    let srs = feature
        .srs_name()
        .and_then(SrsId::parse)
        .unwrap_or(default_srs);
    let geometry = extract_geometry(feature, swap_axes);

    let mut properties = BTreeMap::new();
    collect_properties(feature, &mut properties);

    RawFeature {
        id,
        geometry,
        srs,
        properties,
    }
}

/// Parses a GML/XML feature collection, assuming WGS84 when no `srsName`
/// is present and x,y axis order.
#[must_use]
pub fn parse(xml: &str) -> Vec<RawFeature> {
    parse_with(xml, SrsId::WGS84, false)
}

/// Parses a GML/XML feature collection.
///
/// `default_srs` applies to features without their own `srsName`;
/// `swap_axes` flips coordinate pairs for endpoints whose native axis
/// order is y,x (a per-endpoint quirk from the service registry).
///
/// Malformed or unrecognized XML yields an empty list.
#[must_use]
pub fn parse_with(xml: &str, default_srs: SrsId, swap_axes: bool) -> Vec<RawFeature> {
    let Some(root) = build_tree(xml) else {
        log::debug!("GML: document not well-formed, returning no features");
        return Vec::new();
    };

    let mut members = Vec::new();
    root.find_all(MEMBER_TAGS, &mut members);

    let features: Vec<RawFeature> = members
        .iter()
        .flat_map(|member| &member.children)
        .map(|feature| decode_feature(feature, default_srs, swap_axes))
        .collect();

    if features.is_empty() {
        log::debug!("GML: no member elements recognized");
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    const WFS2_POLYGON: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:cp="http://inspire.ec.europa.eu/schemas/cp/4.0" numberMatched="1">
  <wfs:member>
    <cp:CadastralParcel gml:id="ES.SDGC.CP.1234567VK4713S">
      <cp:nationalCadastralReference>1234567VK4713S</cp:nationalCadastralReference>
      <cp:areaValue uom="m2">512.5</cp:areaValue>
      <cp:geometry>
        <gml:MultiSurface srsName="urn:ogc:def:crs:EPSG::25831">
          <gml:surfaceMember>
            <gml:Polygon>
              <gml:exterior>
                <gml:LinearRing>
                  <gml:posList>430000 4581000 430010 4581000 430010 4581010 430000 4581000</gml:posList>
                </gml:LinearRing>
              </gml:exterior>
            </gml:Polygon>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </cp:geometry>
    </cp:CadastralParcel>
  </wfs:member>
</wfs:FeatureCollection>"#;

    #[test]
    fn parses_wfs2_multisurface_member() {
        let features = parse(WFS2_POLYGON);
        assert_eq!(features.len(), 1);
        let feature = &features[0];
        assert_eq!(feature.id.as_deref(), Some("ES.SDGC.CP.1234567VK4713S"));
        assert_eq!(feature.srs, SrsId(25831));
        assert_eq!(
            feature.str_prop(&["nationalCadastralReference"]).as_deref(),
            Some("1234567VK4713S")
        );
        assert_eq!(feature.f64_prop(&["areaValue"]), Some(512.5));
        match &feature.geometry {
            Some(Geometry::MultiPolygon(polygons)) => {
                assert_eq!(polygons.len(), 1);
                assert_eq!(polygons[0][0].len(), 4);
                assert_eq!(polygons[0][0][0], [430_000.0, 4_581_000.0]);
            }
            other => panic!("expected MultiPolygon, got {other:?}"),
        }
    }

    #[test]
    fn parses_wfs1_feature_member_point() {
        let xml = r#"<FeatureCollection xmlns:gml="http://www.opengis.net/gml">
          <gml:featureMember>
            <address fid="ad.42">
              <street>Carrer de Mallorca</street>
              <gml:Point srsName="EPSG:4326"><gml:pos>2.1734 41.3851</gml:pos></gml:Point>
            </address>
          </gml:featureMember>
        </FeatureCollection>"#;
        let features = parse(xml);
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0].geometry,
            Some(Geometry::Point([2.1734, 41.3851]))
        );
        assert_eq!(
            features[0].str_prop(&["street"]).as_deref(),
            Some("Carrer de Mallorca")
        );
    }

    #[test]
    fn bare_member_and_no_namespace() {
        let xml = r"<FeatureCollection>
          <member>
            <zone>
              <uso_suelo>Residencial</uso_suelo>
              <Polygon>
                <exterior><LinearRing>
                  <posList>0 0 1 0 1 1 0 0</posList>
                </LinearRing></exterior>
              </Polygon>
            </zone>
          </member>
        </FeatureCollection>";
        let features = parse(xml);
        assert_eq!(features.len(), 1);
        assert!(features[0].geometry.as_ref().unwrap().is_polygonal());
        assert_eq!(
            features[0].str_prop(&["uso_suelo"]).as_deref(),
            Some("Residencial")
        );
    }

    #[test]
    fn unpaired_trailing_coordinate_is_truncated() {
        assert_eq!(
            parse_coordinates("1 2 3 4 5", false),
            vec![[1.0, 2.0], [3.0, 4.0]]
        );
    }

    #[test]
    fn axis_swap_flips_pairs() {
        assert_eq!(
            parse_coordinates("41.38 2.17", true),
            vec![[2.17, 41.38]]
        );
    }

    #[test]
    fn malformed_xml_is_soft_fail() {
        assert!(parse("<FeatureCollection><member></FeatureCollection>").is_empty());
        assert!(parse("not xml at all").is_empty());
        assert!(parse("").is_empty());
    }

    #[test]
    fn collection_without_members_is_empty() {
        let xml = r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0"
            numberMatched="0" numberReturned="0"/>"#;
        assert!(parse(xml).is_empty());
    }

    #[test]
    fn gml2_coordinates_with_commas() {
        let xml = r"<FeatureCollection><featureMember>
          <parcel>
            <Polygon>
              <outerBoundaryIs><LinearRing>
                <coordinates>0,0 1,0 1,1 0,0</coordinates>
              </LinearRing></outerBoundaryIs>
            </Polygon>
          </parcel>
        </featureMember></FeatureCollection>";
        let features = parse(xml);
        assert_eq!(features.len(), 1);
        match &features[0].geometry {
            Some(Geometry::Polygon(rings)) => assert_eq!(rings[0].len(), 4),
            other => panic!("expected Polygon, got {other:?}"),
        }
    }
}
