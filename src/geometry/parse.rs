//! Decoding WKT and GeoJSON text into place geometries.

use std::str::FromStr;

use geo_types::{Geometry, MultiPolygon};
use geojson::GeoJson;

use crate::error::{PlaceError, Result};

/// Parse WKT into a multipolygon.
pub fn parse_wkt(text: &str) -> Result<MultiPolygon<f64>> {
    let wkt = wkt::Wkt::<f64>::from_str(text)
        .map_err(|e| PlaceError::GeometryParse(format!("{:?}", e)))?;
    let geometry: Geometry<f64> = wkt
        .try_into()
        .map_err(|e: wkt::conversion::Error| PlaceError::GeometryParse(format!("{:?}", e)))?;
    to_multipolygon(geometry)
}

/// Parse a GeoJSON geometry (or a Feature carrying one) into a multipolygon.
pub fn parse_geojson(text: &str) -> Result<MultiPolygon<f64>> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| PlaceError::GeometryParse(e.to_string()))?;
    let geometry = match geojson {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature.geometry.ok_or_else(|| {
            PlaceError::GeometryParse("feature has no geometry".to_string())
        })?,
        GeoJson::FeatureCollection(_) => {
            return Err(PlaceError::GeometryParse(
                "expected a single geometry, got a feature collection".to_string(),
            ))
        }
    };
    geojson_to_multipolygon(geometry)
}

/// Convert a GeoJSON geometry object into a multipolygon.
pub fn geojson_to_multipolygon(geometry: geojson::Geometry) -> Result<MultiPolygon<f64>> {
    let geometry: Geometry<f64> = geometry
        .try_into()
        .map_err(|e: geojson::Error| PlaceError::GeometryParse(e.to_string()))?;
    to_multipolygon(geometry)
}

/// Cast an areal geometry to a multipolygon.
///
/// Polygons are wrapped, collections are flattened to their areal members.
/// Anything without area is rejected.
pub fn to_multipolygon(geometry: Geometry<f64>) -> Result<MultiPolygon<f64>> {
    match geometry {
        Geometry::MultiPolygon(mp) => Ok(mp),
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Ok(MultiPolygon::new(vec![t.to_polygon()])),
        Geometry::GeometryCollection(collection) => {
            let mut polygons = Vec::new();
            for member in collection {
                if let Ok(mp) = to_multipolygon(member) {
                    polygons.extend(mp.0);
                }
            }
            if polygons.is_empty() {
                return Err(PlaceError::InvalidGeometry(
                    "collection has no areal members".to_string(),
                ));
            }
            Ok(MultiPolygon::new(polygons))
        }
        other => Err(PlaceError::InvalidGeometry(format!(
            "expected polygon or multipolygon, got {}",
            geometry_kind(&other)
        ))),
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "point",
        Geometry::Line(_) => "line",
        Geometry::LineString(_) => "linestring",
        Geometry::MultiPoint(_) => "multipoint",
        Geometry::MultiLineString(_) => "multilinestring",
        Geometry::Polygon(_) => "polygon",
        Geometry::MultiPolygon(_) => "multipolygon",
        Geometry::GeometryCollection(_) => "geometrycollection",
        Geometry::Rect(_) => "rect",
        Geometry::Triangle(_) => "triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wkt_polygon() {
        let mp = parse_wkt("POLYGON((-1 -1, 1 -1, 1 1, -1 1, -1 -1))").unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn test_parse_wkt_multipolygon() {
        let mp = parse_wkt(
            "MULTIPOLYGON(((0 0, 1 0, 1 1, 0 1, 0 0)), ((2 2, 3 2, 3 3, 2 3, 2 2)))",
        )
        .unwrap();
        assert_eq!(mp.0.len(), 2);
    }

    #[test]
    fn test_parse_wkt_rejects_point() {
        let err = parse_wkt("POINT(1 2)").unwrap_err();
        assert!(matches!(err, PlaceError::InvalidGeometry(_)));
    }

    #[test]
    fn test_parse_wkt_garbage() {
        assert!(matches!(
            parse_wkt("POLYGON((nope"),
            Err(PlaceError::GeometryParse(_))
        ));
    }

    #[test]
    fn test_parse_geojson_geometry_and_feature() {
        let geometry = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#;
        assert_eq!(parse_geojson(geometry).unwrap().0.len(), 1);

        let feature = format!(
            r#"{{"type":"Feature","properties":{{"name":"x"}},"geometry":{}}}"#,
            geometry
        );
        assert_eq!(parse_geojson(&feature).unwrap().0.len(), 1);
    }

    #[test]
    fn test_parse_geojson_rejects_linestring() {
        let line = r#"{"type":"LineString","coordinates":[[0,0],[1,1]]}"#;
        assert!(matches!(
            parse_geojson(line),
            Err(PlaceError::InvalidGeometry(_))
        ));
    }
}
