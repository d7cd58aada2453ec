//! Planar shapes built from GeoJSON geometries, and the distance between them.
//!
//! Coordinates are used as given (no geodesic math). GeoJSON input is
//! validated here, then converted into a [`geo::Geometry`]; distances come from
//! `geo`'s Euclidean distance, which is zero when two shapes touch, cross or
//! one contains the other.

use geo::{
    Coord, EuclideanDistance, Geometry as GeoGeometry, GeometryCollection, LineString,
    MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use geojson::{Feature, Geometry, Value};

use crate::error::{Result, TerrainError};

/// A validated planar geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    geometry: GeoGeometry<f64>,
}

impl Shape {
    /// The underlying `geo` geometry.
    pub fn geometry(&self) -> &GeoGeometry<f64> {
        &self.geometry
    }

    /// Build the shape of a feature's geometry.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::InvalidGeometry`] if the feature has no
    /// geometry or the geometry is malformed.
    pub fn from_feature(feature: &Feature) -> Result<Self> {
        match &feature.geometry {
            Some(geometry) => Shape::try_from(geometry),
            None => Err(TerrainError::invalid_geometry("feature has no geometry")),
        }
    }

    /// Smallest planar distance between the two shapes; 0 when they
    /// intersect or one contains the other.
    pub fn distance(&self, other: &Shape) -> f64 {
        self.geometry.euclidean_distance(&other.geometry)
    }
}

impl TryFrom<&Geometry> for Shape {
    type Error = TerrainError;

    fn try_from(geometry: &Geometry) -> Result<Self> {
        Ok(Shape {
            geometry: to_geo(&geometry.value)?,
        })
    }
}

impl From<GeoGeometry<f64>> for Shape {
    fn from(geometry: GeoGeometry<f64>) -> Self {
        Shape { geometry }
    }
}

// geojson's own conversion indexes positions directly, so shapes are checked
// before they are handed to geo.
fn to_geo(value: &Value) -> Result<GeoGeometry<f64>> {
    let geometry = match value {
        Value::Point(position) => GeoGeometry::Point(Point::from(to_coord(position)?)),
        Value::MultiPoint(positions) => {
            non_empty(positions, "MultiPoint")?;
            let points = positions
                .iter()
                .map(|p| to_coord(p).map(Point::from))
                .collect::<Result<Vec<_>>>()?;
            GeoGeometry::MultiPoint(MultiPoint::new(points))
        }
        Value::LineString(positions) => GeoGeometry::LineString(to_line(positions)?),
        Value::MultiLineString(lines) => {
            non_empty(lines, "MultiLineString")?;
            let lines = lines.iter().map(|l| to_line(l)).collect::<Result<Vec<_>>>()?;
            GeoGeometry::MultiLineString(MultiLineString::new(lines))
        }
        Value::Polygon(rings) => GeoGeometry::Polygon(to_polygon(rings)?),
        Value::MultiPolygon(polygons) => {
            non_empty(polygons, "MultiPolygon")?;
            let polygons = polygons
                .iter()
                .map(|rings| to_polygon(rings))
                .collect::<Result<Vec<_>>>()?;
            GeoGeometry::MultiPolygon(MultiPolygon::new(polygons))
        }
        Value::GeometryCollection(geometries) => {
            non_empty(geometries, "GeometryCollection")?;
            let members = geometries
                .iter()
                .map(|g| to_geo(&g.value))
                .collect::<Result<Vec<_>>>()?;
            GeoGeometry::GeometryCollection(GeometryCollection::from(members))
        }
    };
    Ok(geometry)
}

fn non_empty<T>(items: &[T], kind: &str) -> Result<()> {
    if items.is_empty() {
        Err(TerrainError::invalid_geometry(format!("empty {}", kind)))
    } else {
        Ok(())
    }
}

fn to_coord(position: &[f64]) -> Result<Coord<f64>> {
    match position {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
        [_, _, ..] => Err(TerrainError::invalid_geometry(
            "position has a non-finite coordinate",
        )),
        _ => Err(TerrainError::invalid_geometry(format!(
            "position needs at least 2 coordinates, got {}",
            position.len()
        ))),
    }
}

fn to_coords(positions: &[Vec<f64>]) -> Result<Vec<Coord<f64>>> {
    positions.iter().map(|p| to_coord(p)).collect()
}

fn to_line(positions: &[Vec<f64>]) -> Result<LineString<f64>> {
    if positions.len() < 2 {
        return Err(TerrainError::invalid_geometry(format!(
            "LineString needs at least 2 positions, got {}",
            positions.len()
        )));
    }
    Ok(LineString::new(to_coords(positions)?))
}

fn to_ring(positions: &[Vec<f64>]) -> Result<LineString<f64>> {
    if positions.len() < 4 {
        return Err(TerrainError::invalid_geometry(format!(
            "polygon ring needs at least 4 positions, got {}",
            positions.len()
        )));
    }
    Ok(LineString::new(to_coords(positions)?))
}

fn to_polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let Some((exterior, holes)) = rings.split_first() else {
        return Err(TerrainError::invalid_geometry("polygon has no rings"));
    };
    let holes = holes.iter().map(|h| to_ring(h)).collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(to_ring(exterior)?, holes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn shape(json: &str) -> Result<Shape> {
        let geometry: Geometry = serde_json::from_str(json).unwrap();
        Shape::try_from(&geometry)
    }

    fn unit_square() -> Shape {
        shape(r#"{"type": "Polygon", "coordinates": [[[0,0],[0,1],[1,1],[1,0],[0,0]]]}"#).unwrap()
    }

    #[test]
    fn test_point_inside_polygon_is_zero() {
        let p = shape(r#"{"type": "Point", "coordinates": [0.5, 0.5]}"#).unwrap();
        assert_eq!(p.distance(&unit_square()), 0.0);
        assert_eq!(unit_square().distance(&p), 0.0);
    }

    #[test]
    fn test_point_outside_polygon() {
        let p = shape(r#"{"type": "Point", "coordinates": [3.0, 0.5]}"#).unwrap();
        assert_relative_eq!(p.distance(&unit_square()), 2.0);

        let corner = shape(r#"{"type": "Point", "coordinates": [4.0, 5.0]}"#).unwrap();
        assert_relative_eq!(corner.distance(&unit_square()), 5.0);
    }

    #[test]
    fn test_point_in_hole_measures_to_hole_edge() {
        let donut = shape(
            r#"{"type": "Polygon", "coordinates": [
                [[0,0],[0,10],[10,10],[10,0],[0,0]],
                [[4,4],[4,6],[6,6],[6,4],[4,4]]
            ]}"#,
        )
        .unwrap();
        let p = shape(r#"{"type": "Point", "coordinates": [5.0, 5.0]}"#).unwrap();
        assert_relative_eq!(p.distance(&donut), 1.0);
    }

    #[test]
    fn test_crossing_line_is_zero() {
        let line = shape(r#"{"type": "LineString", "coordinates": [[-1, 0.5], [2, 0.5]]}"#).unwrap();
        assert_eq!(line.distance(&unit_square()), 0.0);

        let apart = shape(r#"{"type": "LineString", "coordinates": [[0, 3], [1, 3]]}"#).unwrap();
        assert_relative_eq!(apart.distance(&unit_square()), 2.0);
    }

    #[test]
    fn test_contained_polygon_is_zero() {
        let inner = shape(
            r#"{"type": "Polygon", "coordinates": [[[0.2,0.2],[0.2,0.4],[0.4,0.4],[0.4,0.2],[0.2,0.2]]]}"#,
        )
        .unwrap();
        assert_eq!(inner.distance(&unit_square()), 0.0);
        assert_eq!(unit_square().distance(&inner), 0.0);
    }

    #[test]
    fn test_multi_geometry_uses_nearest_part() {
        let points = shape(r#"{"type": "MultiPoint", "coordinates": [[10, 10], [1.5, 0.5]]}"#)
            .unwrap();
        assert_relative_eq!(points.distance(&unit_square()), 0.5);
    }

    #[test]
    fn test_converted_geometry_keeps_structure() {
        let square = unit_square();
        let GeoGeometry::Polygon(polygon) = square.geometry() else {
            panic!("expected a polygon, got {:?}", square.geometry());
        };
        assert_eq!(polygon.exterior().0.len(), 5);
        assert!(polygon.interiors().is_empty());

        let from_geo = Shape::from(GeoGeometry::Point(Point::new(0.5, 3.0)));
        assert_relative_eq!(from_geo.distance(&square), 2.0);
    }

    #[test]
    fn test_malformed_geometries_rejected() {
        let cases = [
            r#"{"type": "MultiPoint", "coordinates": []}"#,
            r#"{"type": "LineString", "coordinates": [[0, 0]]}"#,
            r#"{"type": "Polygon", "coordinates": [[[0,0],[1,1],[0,0]]]}"#,
            r#"{"type": "Polygon", "coordinates": []}"#,
            r#"{"type": "GeometryCollection", "geometries": []}"#,
        ];
        for json in cases {
            assert!(
                matches!(shape(json), Err(TerrainError::InvalidGeometry { .. })),
                "{}",
                json
            );
        }

        let feature = Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: None,
            foreign_members: None,
        };
        assert!(Shape::from_feature(&feature).is_err());
    }

    #[test]
    fn test_bad_positions_rejected() {
        let short = Geometry::new(Value::Point(vec![1.0]));
        let non_finite = Geometry::new(Value::Point(vec![f64::NAN, 1.0]));
        let short_in_line = Geometry::new(Value::LineString(vec![vec![0.0, 0.0], vec![1.0]]));

        for geometry in [short, non_finite, short_in_line] {
            assert!(matches!(
                Shape::try_from(&geometry),
                Err(TerrainError::InvalidGeometry { .. })
            ));
        }
    }
}
