//! Centroid derivation from feed geometries.
//!
//! Every canonical incident carries exactly one representative point. Feeds
//! deliver points, lines, polygons, multi-geometries, and collections; this
//! module reduces each to a single in-range `(lat, lng)` pair, or `None`
//! when no centroid can be derived, in which case the record is dropped
//! before it reaches storage.

use geojson::Geometry;

/// Parses a raw GeoJSON geometry value.
///
/// Returns `None` for null, missing, or structurally invalid geometry.
#[must_use]
pub fn parse_geometry(value: &serde_json::Value) -> Option<Geometry> {
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

/// Derives the representative `(lat, lng)` point for a geometry.
///
/// - Point: the point itself.
/// - LineString: the middle vertex.
/// - Polygon: average of the exterior ring's vertices.
/// - Multi-geometries: the first member.
/// - GeometryCollection: the first member that yields a centroid.
///
/// Returns `None` when the geometry is empty or the result falls outside
/// valid WGS84 ranges.
#[must_use]
pub fn centroid(geometry: &Geometry) -> Option<(f64, f64)> {
    use geojson::Value;

    let candidate = match &geometry.value {
        Value::Point(position) => position_latlng(position),
        Value::MultiPoint(positions) => positions.first().and_then(|p| position_latlng(p)),
        Value::LineString(line) => line_midpoint(line),
        Value::MultiLineString(lines) => lines.first().and_then(|line| line_midpoint(line)),
        Value::Polygon(polygon) => ring_average(polygon.first()?),
        Value::MultiPolygon(polygons) => ring_average(polygons.first()?.first()?),
        Value::GeometryCollection(members) => members.iter().find_map(centroid),
    };

    candidate.filter(|&(lat, lng)| in_range(lat, lng))
}

/// `(lat, lng)` from a GeoJSON `[lng, lat]` position.
fn position_latlng(position: &[f64]) -> Option<(f64, f64)> {
    match position {
        [lng, lat, ..] => Some((*lat, *lng)),
        _ => None,
    }
}

/// The middle vertex of a line string.
fn line_midpoint(line: &[Vec<f64>]) -> Option<(f64, f64)> {
    line.get(line.len() / 2)
        .and_then(|position| position_latlng(position))
}

/// Average of a polygon ring's vertices.
#[allow(clippy::cast_precision_loss)]
fn ring_average(ring: &[Vec<f64>]) -> Option<(f64, f64)> {
    if ring.is_empty() {
        return None;
    }

    let mut lat_sum = 0.0;
    let mut lng_sum = 0.0;
    let mut count = 0usize;
    for position in ring {
        let (lat, lng) = position_latlng(position)?;
        lat_sum += lat;
        lng_sum += lng;
        count += 1;
    }

    Some((lat_sum / count as f64, lng_sum / count as f64))
}

/// `true` when the pair is finite and inside valid WGS84 ranges.
fn in_range(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng)
}
