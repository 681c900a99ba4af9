#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the incident map server.

use incident_map_incident_models::CanonicalIncident;
use serde::{Deserialize, Serialize};

/// `GET /api/health` response.
#[derive(Debug, Serialize)]
pub struct ApiHealth {
    /// Whether the server considers itself healthy.
    pub healthy: bool,
    /// Crate version string.
    pub version: String,
}

/// Query string parameters for `GET /api/incidents`.
#[derive(Debug, Default, Deserialize)]
pub struct IncidentQueryParams {
    /// Bounding box as `"west,south,east,north"`.
    pub bbox: Option<String>,
    /// Region id filter.
    pub region: Option<String>,
    /// Top-level category filter.
    pub category: Option<String>,
    /// Source filter.
    pub source: Option<String>,
    /// RFC 3339 timestamp; only incidents updated at or after it.
    pub since: Option<String>,
    /// When `true`, only active/monitoring incidents.
    pub active: Option<bool>,
}

/// Query string parameters for `POST /api/ingest/run`.
#[derive(Debug, Default, Deserialize)]
pub struct IngestRunParams {
    /// Specific source to run; all sources when absent.
    pub source: Option<String>,
}

/// Converts a canonical incident into the GeoJSON feature served to map
/// clients: the original geometry (or a centroid point) plus the canonical
/// fields and the precomputed convenience fields the frontend reads.
#[must_use]
pub fn incident_feature(incident: &CanonicalIncident) -> geojson::Feature {
    let geometry = incident.geometry.clone().unwrap_or_else(|| {
        geojson::Geometry::new(geojson::Value::Point(vec![
            incident.centroid_lng,
            incident.centroid_lat,
        ]))
    });

    let mut properties = serde_json::Map::new();
    let mut set = |key: &str, value: serde_json::Value| {
        properties.insert(key.to_string(), value);
    };

    set("id", serde_json::json!(incident.id));
    set("source", serde_json::json!(incident.source));
    set("sourceId", serde_json::json!(incident.source_id));
    set("title", serde_json::json!(incident.title));
    set("description", serde_json::json!(incident.description));
    set("location", serde_json::json!(incident.location));
    set("category", serde_json::json!(incident.category));
    set("subcategory", serde_json::json!(incident.subcategory));
    set("severity", serde_json::json!(incident.severity));
    set("status", serde_json::json!(incident.status));
    set("centroidLat", serde_json::json!(incident.centroid_lat));
    set("centroidLng", serde_json::json!(incident.centroid_lng));
    set("regionIds", serde_json::json!(incident.region_ids));
    set("geocell", serde_json::json!(incident.geocell));
    set("incidentTime", serde_json::json!(incident.incident_time));
    set("lastUpdated", serde_json::json!(incident.last_updated));
    set("publishedAt", serde_json::json!(incident.published_at));
    set("version", serde_json::json!(incident.version));

    // Convenience fields precomputed for presentation.
    set("categoryId", serde_json::json!(incident.subcategory));
    set("reporterId", serde_json::json!(incident.user_id));
    set("userAuthored", serde_json::json!(incident.is_user_authored()));

    geojson::Feature {
        bbox: None,
        geometry: Some(geometry),
        id: Some(geojson::feature::Id::String(incident.id.clone())),
        properties: Some(properties),
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_map_incident_models::{
        IncidentCategory, IncidentSeverity, IncidentSource, IncidentStatus, IncidentSubcategory,
    };

    fn incident() -> CanonicalIncident {
        CanonicalIncident {
            id: "road-traffic:e1".to_string(),
            source: IncidentSource::RoadTraffic,
            source_id: "e1".to_string(),
            title: "Crash: Multi-vehicle".to_string(),
            description: String::new(),
            location: "Brisbane City".to_string(),
            category: IncidentCategory::Traffic,
            subcategory: IncidentSubcategory::RoadClosure,
            severity: IncidentSeverity::Critical,
            status: IncidentStatus::Active,
            geometry: None,
            centroid_lat: -27.47,
            centroid_lng: 153.02,
            region_ids: vec!["brisbane".to_string()],
            geocell: Some("c3:-27.470:153.020".to_string()),
            incident_time: None,
            last_updated: "2025-06-09T00:00:00Z".parse().unwrap(),
            published_at: None,
            user_id: "system-road-authority".to_string(),
            properties: serde_json::json!({}),
            version: 1,
        }
    }

    #[test]
    fn feature_carries_convenience_fields() {
        let feature = incident_feature(&incident());
        let props = feature.properties.unwrap();

        assert_eq!(props["categoryId"], "road-closure");
        assert_eq!(props["reporterId"], "system-road-authority");
        assert_eq!(props["userAuthored"], false);
        assert_eq!(props["severity"], "critical");
    }

    #[test]
    fn missing_geometry_falls_back_to_centroid_point() {
        let feature = incident_feature(&incident());
        match feature.geometry.unwrap().value {
            geojson::Value::Point(position) => {
                assert!((position[0] - 153.02).abs() < f64::EPSILON);
                assert!((position[1] - -27.47).abs() < f64::EPSILON);
            }
            other => panic!("expected point geometry, got {other:?}"),
        }
    }
}
