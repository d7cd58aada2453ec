//! Proximity and slope based risk scoring of vector features.
//!
//! A feature's risk combines how close it lies to the nearest restricted area
//! with the terrain slope stored in its `slope` property:
//!
//! ```text
//! risk = min(round2(100 * exp(-distance / 0.01) + 10 * slope), 100)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use demrisk::risk;
//!
//! let features: geojson::FeatureCollection = serde_json::from_str(&sites)?;
//! let restricted: geojson::FeatureCollection = serde_json::from_str(&zones)?;
//! let scores = risk::score(&features, &restricted)?;
//! assert_eq!(scores.len(), features.features.len());
//! ```

use geojson::{Feature, FeatureCollection, Value};
use serde_json::Value as JsonValue;

use crate::error::{Result, TerrainError};
use crate::geometry::Shape;
use crate::grid::{Field, RasterGrid};

/// Half-width, in coordinate units, of the window averaged by [`annotate_slopes`].
pub const SLOPE_WINDOW: f64 = 0.01;

/// Name used in logs for features without a `name` property.
const UNNAMED: &str = "Unnamed";

/// Weights of the risk formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskModel {
    /// Distance at which proximity risk has dropped to `1/e` of its maximum.
    pub decay_length: f64,
    /// Risk added per degree of slope.
    pub slope_weight: f64,
    /// Upper bound of every score.
    pub max_risk: f64,
}

impl Default for RiskModel {
    fn default() -> Self {
        Self {
            decay_length: 0.01,
            slope_weight: 10.0,
            max_risk: 100.0,
        }
    }
}

impl RiskModel {
    /// Risk for a feature at `distance` from the nearest restricted area on
    /// terrain of `slope` degrees, rounded to 2 decimals.
    pub fn risk(&self, distance: f64, slope: f64) -> f64 {
        let distance_risk = 100.0 * (-distance / self.decay_length).exp();
        let slope_risk = self.slope_weight * slope;
        round2(distance_risk + slope_risk).clamp(0.0, self.max_risk)
    }

    /// Score every feature against the restricted areas, in input order.
    ///
    /// Features whose geometry cannot be interpreted score `0.0`; the result
    /// always has one entry per input feature.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::NoRestrictedGeometry`] if no restricted feature
    /// has a usable geometry.
    pub fn score(
        &self,
        features: &FeatureCollection,
        restricted: &FeatureCollection,
    ) -> Result<Vec<f64>> {
        let zones = restricted_shapes(restricted)?;

        let scores = features
            .features
            .iter()
            .map(|feature| self.score_feature(feature, &zones))
            .collect();
        Ok(scores)
    }

    fn score_feature(&self, feature: &Feature, zones: &[Shape]) -> f64 {
        let name = feature_name(feature);
        let shape = match Shape::from_feature(feature) {
            Ok(shape) => shape,
            Err(e) => {
                tracing::warn!(feature = name, error = %e, "Skipping feature with invalid geometry");
                return 0.0;
            }
        };

        let distance = min_distance(&shape, zones);
        let slope = feature_slope(feature);
        let risk = self.risk(distance, slope);

        tracing::debug!(
            feature = name,
            distance = round4(distance),
            slope,
            risk,
            "Calculated risk"
        );
        risk
    }
}

/// Score features with the default [`RiskModel`].
pub fn score(features: &FeatureCollection, restricted: &FeatureCollection) -> Result<Vec<f64>> {
    RiskModel::default().score(features, restricted)
}

/// Shapes of the restricted features, skipping malformed ones.
///
/// # Errors
///
/// Returns [`TerrainError::NoRestrictedGeometry`] if none is usable.
pub fn restricted_shapes(restricted: &FeatureCollection) -> Result<Vec<Shape>> {
    let shapes: Vec<Shape> = restricted
        .features
        .iter()
        .filter_map(|feature| match Shape::from_feature(feature) {
            Ok(shape) => Some(shape),
            Err(e) => {
                tracing::warn!(
                    feature = feature_name(feature),
                    error = %e,
                    "Skipping restricted area with invalid geometry"
                );
                None
            }
        })
        .collect();

    if shapes.is_empty() {
        return Err(TerrainError::NoRestrictedGeometry);
    }
    Ok(shapes)
}

/// Distance from `shape` to the nearest of `zones` (infinite when empty).
pub fn min_distance(shape: &Shape, zones: &[Shape]) -> f64 {
    zones
        .iter()
        .map(|zone| shape.distance(zone))
        .fold(f64::INFINITY, f64::min)
}

/// The feature's numeric `slope` property; `0.0` when absent or not a number.
pub fn feature_slope(feature: &Feature) -> f64 {
    match feature.property("slope") {
        None => 0.0,
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(other) => {
            tracing::warn!(
                feature = feature_name(feature),
                slope = %other,
                "Invalid slope value, using 0"
            );
            0.0
        }
    }
}

/// The feature's `name` property, or `"Unnamed"`.
pub fn feature_name(feature: &Feature) -> &str {
    feature
        .property("name")
        .and_then(JsonValue::as_str)
        .unwrap_or(UNNAMED)
}

/// Set each polygon feature's `slope` property to the mean slope around the
/// mean of its outer ring's vertices.
///
/// The mean is taken over the defined cells of `slope` within
/// [`SLOPE_WINDOW`] of that point. Other geometry types, and polygons whose
/// window holds no defined cell, get `0.0`. Returns the slopes in feature
/// order.
pub fn annotate_slopes(
    features: &mut FeatureCollection,
    grid: &RasterGrid,
    slope: &Field<f64>,
) -> Vec<f64> {
    let mut slopes = Vec::with_capacity(features.features.len());

    for feature in &mut features.features {
        let value = match ring_center(feature) {
            Some((x, y)) => window_mean(grid, slope, x, y).unwrap_or(0.0),
            None => 0.0,
        };
        feature.set_property("slope", value);
        slopes.push(value);
    }

    slopes
}

/// Mean of a polygon's outer ring vertices, as given (closing vertex included).
fn ring_center(feature: &Feature) -> Option<(f64, f64)> {
    let Value::Polygon(rings) = &feature.geometry.as_ref()?.value else {
        return None;
    };
    let ring = rings.first()?;
    if ring.is_empty() || ring.iter().any(|p| p.len() < 2) {
        return None;
    }
    let n = ring.len() as f64;
    let x = ring.iter().map(|p| p[0]).sum::<f64>() / n;
    let y = ring.iter().map(|p| p[1]).sum::<f64>() / n;
    (x.is_finite() && y.is_finite()).then_some((x, y))
}

fn window_mean(grid: &RasterGrid, slope: &Field<f64>, x: f64, y: f64) -> Option<f64> {
    let transform = grid.transform();
    let (row_a, col_a) = transform.world_to_pixel(x - SLOPE_WINDOW, y + SLOPE_WINDOW);
    let (row_b, col_b) = transform.world_to_pixel(x + SLOPE_WINDOW, y - SLOPE_WINDOW);

    let row_start = row_a.min(row_b).floor().max(0.0) as usize;
    let row_end = (row_a.max(row_b).ceil().max(0.0) as usize).min(slope.height);
    let col_start = col_a.min(col_b).floor().max(0.0) as usize;
    let col_end = (col_a.max(col_b).ceil().max(0.0) as usize).min(slope.width);

    let mut sum = 0.0;
    let mut count = 0usize;
    for row in row_start..row_end {
        for col in col_start..col_end {
            if let Some(v) = slope.get(row, col).filter(|v| v.is_finite()) {
                sum += v;
                count += 1;
            }
        }
    }
    (count > 0).then(|| sum / count as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GeoTransform;
    use approx::assert_relative_eq;
    use geojson::Geometry;

    fn collection(json: &str) -> FeatureCollection {
        serde_json::from_str(json).unwrap()
    }

    fn restricted_square() -> FeatureCollection {
        collection(
            r#"{"type": "FeatureCollection", "features": [{
                "type": "Feature",
                "properties": {"name": "zone"},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[0,1],[1,1],[1,0],[0,0]]]}
            }]}"#,
        )
    }

    fn point_feature(x: f64, y: f64, slope: JsonValue) -> String {
        format!(
            r#"{{"type": "Feature", "properties": {{"slope": {}}}, "geometry": {{"type": "Point", "coordinates": [{}, {}]}}}}"#,
            slope, x, y
        )
    }

    fn points(features: &[String]) -> FeatureCollection {
        collection(&format!(
            r#"{{"type": "FeatureCollection", "features": [{}]}}"#,
            features.join(",")
        ))
    }

    #[test]
    fn test_inside_restricted_area_is_max_risk() {
        let features = points(&[point_feature(0.5, 0.5, JsonValue::from(0))]);
        let scores = score(&features, &restricted_square()).unwrap();
        assert_eq!(scores, vec![100.0]);
    }

    #[test]
    fn test_far_feature_has_no_risk() {
        let features = points(&[point_feature(10.0, 10.0, JsonValue::from(0))]);
        let scores = score(&features, &restricted_square()).unwrap();
        assert_eq!(scores, vec![0.0]);
    }

    #[test]
    fn test_slope_adds_risk() {
        let features = points(&[
            point_feature(10.0, 10.0, JsonValue::from(5)),
            point_feature(10.0, 10.0, JsonValue::from(2.5)),
            point_feature(0.5, 0.5, JsonValue::from(5)),
        ]);
        let scores = score(&features, &restricted_square()).unwrap();
        assert_eq!(scores, vec![50.0, 25.0, 100.0]);
    }

    #[test]
    fn test_risk_decreases_with_distance() {
        let features = points(
            &[0.0, 0.001, 0.005, 0.01, 0.02, 0.05, 0.5]
                .iter()
                .map(|d| point_feature(1.0 + d, 0.5, JsonValue::from(1)))
                .collect::<Vec<_>>(),
        );
        let scores = score(&features, &restricted_square()).unwrap();

        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1], "{:?}", scores);
        }
        assert_relative_eq!(scores[3], round2(100.0 * (-1.0f64).exp() + 10.0));
    }

    #[test]
    fn test_invalid_features_keep_length() {
        let mut features = collection(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"name": "no geometry"}, "geometry": null},
                {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,1],[0,0]]]}}
            ]}"#,
        );
        let short = Geometry::new(Value::Point(vec![1.0]));
        features.features.push(Feature::from(short));

        let scores = score(&features, &restricted_square()).unwrap();
        assert_eq!(scores, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_no_restricted_geometry() {
        let features = points(&[point_feature(0.5, 0.5, JsonValue::from(0))]);

        let empty = collection(r#"{"type": "FeatureCollection", "features": []}"#);
        assert!(matches!(
            score(&features, &empty),
            Err(TerrainError::NoRestrictedGeometry)
        ));

        let broken = collection(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": null}
            ]}"#,
        );
        assert!(matches!(
            score(&features, &broken),
            Err(TerrainError::NoRestrictedGeometry)
        ));
    }

    #[test]
    fn test_malformed_restricted_geometry_is_skipped() {
        let restricted = collection(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "LineString", "coordinates": [[5, 5]]}},
                {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0, 0]}}
            ]}"#,
        );
        let features = points(&[point_feature(0.0, 0.0, JsonValue::from(0))]);
        assert_eq!(score(&features, &restricted).unwrap(), vec![100.0]);
    }

    #[test]
    fn test_non_numeric_slope_counts_as_zero() {
        let features = points(&[
            point_feature(10.0, 10.0, JsonValue::from("steep")),
            point_feature(10.0, 10.0, JsonValue::Bool(true)),
            point_feature(10.0, 10.0, JsonValue::Null),
        ]);
        let scores = score(&features, &restricted_square()).unwrap();
        assert_eq!(scores, vec![0.0, 0.0, 0.0]);

        let unsloped = collection(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": null, "geometry": {"type": "Point", "coordinates": [10, 10]}}
            ]}"#,
        );
        assert_eq!(feature_slope(&unsloped.features[0]), 0.0);
        assert_eq!(feature_name(&unsloped.features[0]), "Unnamed");
    }

    #[test]
    fn test_custom_model() {
        let model = RiskModel {
            decay_length: 1.0,
            slope_weight: 2.0,
            max_risk: 80.0,
        };
        assert_eq!(model.risk(0.0, 0.0), 80.0);
        assert_relative_eq!(model.risk(1.0, 3.0), round2(100.0 * (-1.0f64).exp() + 6.0));
    }

    #[test]
    fn test_annotate_slopes() {
        let grid = RasterGrid::new(
            vec![0.0; 100 * 100],
            100,
            100,
            GeoTransform::north_up(0.0, 0.1, 0.001, 0.001),
            None,
        )
        .unwrap();
        let mut values = vec![12.0; 100 * 100];
        values[0] = f64::NAN;
        let slope = Field {
            values,
            width: 100,
            height: 100,
        };

        let mut features = collection(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"name": "parcel"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0.049,0.049],[0.049,0.051],[0.051,0.051],[0.051,0.049],[0.049,0.049]]]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [0.05, 0.05]}},
                {"type": "Feature", "properties": null,
                 "geometry": {"type": "Polygon", "coordinates": [[[5,5],[5,6],[6,6],[6,5],[5,5]]]}}
            ]}"#,
        );

        let slopes = annotate_slopes(&mut features, &grid, &slope);
        assert_eq!(slopes.len(), 3);
        assert_relative_eq!(slopes[0], 12.0);
        assert_eq!(slopes[1], 0.0);
        assert_eq!(slopes[2], 0.0);

        assert_eq!(feature_slope(&features.features[0]), slopes[0]);
        assert_eq!(
            features.features[2].property("slope"),
            Some(&JsonValue::from(0.0))
        );
    }
}
