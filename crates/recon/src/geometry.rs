//! Polygon normalisation and validity checks shared by the engine and loaders.

use geo::{Area as _, BoundingRect, CoordsIter};
use geo_types::{Geometry, MultiPolygon, Rect};

/// Collapse a decoded geometry into a multi-polygon.
///
/// Polygons, multi-polygons and collections that only hold those are
/// accepted. Anything without area is rejected with a message naming the
/// geometry kind.
pub fn into_multipolygon(geometry: Geometry<f64>) -> Result<MultiPolygon<f64>, String> {
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Ok(mp),
        Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Ok(MultiPolygon::new(vec![t.to_polygon()])),
        Geometry::GeometryCollection(gc) => {
            let mut polygons = Vec::new();
            for member in gc.0 {
                polygons.extend(into_multipolygon(member)?.0);
            }
            Ok(MultiPolygon::new(polygons))
        }
        other => Err(format!("unsupported geometry type {}", kind_name(&other))),
    }
}

fn kind_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Reject geometries that cannot take part in area arithmetic: empty,
/// non-finite coordinates or zero area.
pub fn check(geometry: &MultiPolygon<f64>) -> Result<(), String> {
    if geometry.0.is_empty() || geometry.coords_count() == 0 {
        return Err("empty geometry".into());
    }
    if !geometry.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite()) {
        return Err("non-finite coordinate".into());
    }
    let area = geometry.unsigned_area();
    if !area.is_finite() || area <= 0.0 {
        return Err(format!("degenerate geometry (area {area})"));
    }
    Ok(())
}

pub fn envelope(geometry: &MultiPolygon<f64>) -> Option<Rect<f64>> {
    geometry.bounding_rect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::rect;
    use super::*;
    use geo_types::{line_string, point, GeometryCollection, LineString, Polygon};

    #[test]
    fn polygon_becomes_multipolygon() {
        let p = rect(0.0, 0.0, 2.0, 2.0).0.remove(0);
        let out = into_multipolygon(Geometry::Polygon(p)).unwrap();
        assert_eq!(out.0.len(), 1);
        assert!((out.unsigned_area() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn collection_of_polygons_flattens() {
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = rect(5.0, 5.0, 6.0, 6.0);
        let gc = GeometryCollection::new_from(vec![
            Geometry::MultiPolygon(a),
            Geometry::MultiPolygon(b),
        ]);
        let out = into_multipolygon(Geometry::GeometryCollection(gc)).unwrap();
        assert_eq!(out.0.len(), 2);
    }

    #[test]
    fn lines_and_points_rejected() {
        let err = into_multipolygon(Geometry::Point(point!(x: 1.0, y: 1.0))).unwrap_err();
        assert!(err.contains("Point"));
        let err = into_multipolygon(Geometry::LineString(line_string![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
        ]))
        .unwrap_err();
        assert!(err.contains("LineString"));
    }

    #[test]
    fn check_rejects_empty_nan_and_flat() {
        assert!(check(&rect(0.0, 0.0, 1.0, 1.0)).is_ok());
        assert_eq!(check(&MultiPolygon::new(vec![])).unwrap_err(), "empty geometry");
        assert!(check(&rect(0.0, 0.0, f64::NAN, 1.0)).is_err());
        assert!(check(&rect(0.0, 0.0, 1.0, 0.0)).unwrap_err().contains("degenerate"));
        let empty_ring = MultiPolygon::new(vec![Polygon::new(LineString::new(vec![]), vec![])]);
        assert!(check(&empty_ring).is_err());
    }
}
