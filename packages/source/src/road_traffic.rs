//! Road-traffic feed normalizer.
//!
//! The road authority publishes traffic events either as a GeoJSON feature
//! collection or as a flat event list, depending on the endpoint vintage.
//! Flat events are wrapped into the feature shape first so a single
//! normalization path handles both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use incident_map_incident_models::{
    CanonicalIncident, IncidentSource, IncidentSeverity, IncidentStatus, IncidentSubcategory,
};
use incident_map_spatial::{DEFAULT_PRECISION, RegionClassifier, compute_cell};

use crate::parsing::{
    contains_any, first_string_field, first_timestamp, string_field, within_recency_window,
};
use crate::registry::FeedConfig;
use crate::{IncidentFeed, SourceError, attribution, geometry, retry};

/// Timestamp keys checked for change detection, most specific first.
const UPDATED_KEYS: &[&str] = &["last_updated", "lastUpdated", "updated"];
const PUBLISHED_KEYS: &[&str] = &["published", "published_at", "publishedAt"];

/// The road-traffic event feed.
pub struct RoadTrafficFeed {
    config: FeedConfig,
}

impl RoadTrafficFeed {
    /// Creates the feed from its registry config.
    #[must_use]
    pub const fn new(config: FeedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl IncidentFeed for RoadTrafficFeed {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn source(&self) -> IncidentSource {
        IncidentSource::RoadTraffic
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<serde_json::Value, SourceError> {
        let url = self.config.api_url.clone();
        let api_key = self.config.api_key.clone();
        retry::send_json(|| {
            let request = client.get(&url);
            match &api_key {
                Some(key) => request.query(&[("apikey", key.as_str())]),
                None => request,
            }
        })
        .await
    }

    fn normalize(
        &self,
        raw: &serde_json::Value,
        regions: &RegionClassifier,
    ) -> Vec<CanonicalIncident> {
        normalize(raw, regions, Utc::now())
    }
}

/// Normalizes a raw road-traffic payload into canonical incidents.
///
/// `now` anchors the recency window so tests stay deterministic. Malformed
/// payloads yield an empty list; malformed individual events are dropped
/// without discarding the rest.
#[must_use]
pub fn normalize(
    raw: &serde_json::Value,
    regions: &RegionClassifier,
    now: DateTime<Utc>,
) -> Vec<CanonicalIncident> {
    let Some(features) = extract_features(raw) else {
        log::warn!("road-traffic payload has no recognizable event list");
        return Vec::new();
    };

    features
        .iter()
        .filter_map(|feature| normalize_feature(feature, regions, now))
        .collect()
}

/// Pulls the feature list out of the payload, wrapping flat events into the
/// feature shape when needed.
fn extract_features(raw: &serde_json::Value) -> Option<Vec<serde_json::Value>> {
    if let Some(features) = raw.get("features").and_then(serde_json::Value::as_array) {
        return Some(features.clone());
    }

    let flat = raw
        .as_array()
        .or_else(|| raw.get("events").and_then(serde_json::Value::as_array))?;

    Some(flat.iter().map(wrap_flat_event).collect())
}

/// Wraps a flat event into `{ "geometry": ..., "properties": ... }`.
///
/// Events carrying a `geometry` member keep it; otherwise a point geometry
/// is synthesized from `latitude`/`longitude` fields when present. Events
/// with neither end up with a null geometry and are dropped later by the
/// centroid rule.
fn wrap_flat_event(event: &serde_json::Value) -> serde_json::Value {
    let geometry = event.get("geometry").cloned().unwrap_or_else(|| {
        let lat = event.get("latitude").and_then(serde_json::Value::as_f64);
        let lng = event.get("longitude").and_then(serde_json::Value::as_f64);
        match (lat, lng) {
            (Some(lat), Some(lng)) => serde_json::json!({
                "type": "Point",
                "coordinates": [lng, lat],
            }),
            _ => serde_json::Value::Null,
        }
    });

    serde_json::json!({
        "geometry": geometry,
        "properties": event.clone(),
    })
}

/// Normalizes a single feature. Returns `None` to drop it.
fn normalize_feature(
    feature: &serde_json::Value,
    regions: &RegionClassifier,
    now: DateTime<Utc>,
) -> Option<CanonicalIncident> {
    let props = feature.get("properties")?;

    let updated = first_timestamp(props, UPDATED_KEYS);
    let published = first_timestamp(props, PUBLISHED_KEYS);

    // Recency filter on whichever timestamp is present; events without any
    // timestamp are kept and treated as still relevant.
    if let Some(timestamp) = updated.or(published)
        && !within_recency_window(timestamp, now)
    {
        return None;
    }

    let geom = feature.get("geometry").and_then(geometry::parse_geometry);
    let (lat, lng) = geom.as_ref().and_then(geometry::centroid).or_else(|| {
        log::debug!("dropping road-traffic event without derivable centroid");
        None
    })?;

    let source_id = first_string_field(props, &["id", "event_id", "eventId"])
        .map(ToString::to_string)
        .or_else(|| props.get("id").and_then(serde_json::Value::as_i64).map(|n| n.to_string()))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let event_type = first_string_field(props, &["event_type", "eventType", "type"])
        .unwrap_or("Traffic event");
    let event_subtype = first_string_field(props, &["event_subtype", "eventSubtype", "subtype"]);
    let title = event_subtype.map_or_else(
        || event_type.to_string(),
        |subtype| format!("{event_type}: {subtype}"),
    );

    let impact = impact_text(props);
    let description = [
        first_string_field(props, &["description", "details"]),
        string_field(props, "advice"),
        string_field(props, "information"),
        impact.as_deref(),
    ]
    .iter()
    .flatten()
    .copied()
    .collect::<Vec<_>>()
    .join("; ");

    let classify_text = format!(
        "{event_type} {} {}",
        event_subtype.unwrap_or_default(),
        impact.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    let subcategory = classify_event(&classify_text);

    let severity = impact
        .as_deref()
        .map_or(IncidentSeverity::Medium, severity_from_impact);

    let status = derive_status(props);

    let locality = first_string_field(props, &["locality", "suburb"]);
    let road = first_string_field(props, &["road_name", "road", "street"]);
    let location = match (road, locality) {
        (Some(road), Some(locality)) => format!("{road}, {locality}"),
        (Some(single), None) | (None, Some(single)) => single.to_string(),
        (None, None) => String::new(),
    };

    let owner = match attribution::resolve(IncidentSource::RoadTraffic, None, props) {
        Ok(owner) => owner,
        Err(e) => {
            log::warn!("dropping road-traffic event {source_id}: {e}");
            return None;
        }
    };

    let region_ids = regions
        .classify(lat, lng, locality.or(Some(location.as_str())))
        .map(|region| vec![region.id.clone()])
        .unwrap_or_default();

    Some(CanonicalIncident {
        id: CanonicalIncident::composite_id(IncidentSource::RoadTraffic, &source_id),
        source: IncidentSource::RoadTraffic,
        source_id,
        title,
        description,
        location,
        category: subcategory.category(),
        subcategory,
        severity,
        status,
        geometry: geom,
        centroid_lat: lat,
        centroid_lng: lng,
        region_ids,
        geocell: Some(compute_cell(lat, lng, DEFAULT_PRECISION)),
        incident_time: first_timestamp(props, &["start_time", "startTime", "incident_time"]),
        last_updated: updated.or(published).unwrap_or(now),
        published_at: published,
        user_id: owner.owner_id,
        properties: crate::user_report::annotate_properties(
            props.clone(),
            IncidentSource::RoadTraffic,
            false,
        ),
        version: 0,
    })
}

/// Flattens the impact field, which may be a bare string or an object with
/// its own type/description members.
fn impact_text(props: &serde_json::Value) -> Option<String> {
    match props.get("impact") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(obj @ serde_json::Value::Object(_)) => {
            let parts: Vec<&str> = [
                first_string_field(obj, &["impact_type", "impactType"]),
                first_string_field(obj, &["description", "impact_description"]),
            ]
            .iter()
            .flatten()
            .copied()
            .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        _ => None,
    }
}

/// Maps combined event/impact text to a traffic subcategory.
///
/// Priority: closure > congestion > accident > roadwork > other.
fn classify_event(lower: &str) -> IncidentSubcategory {
    if contains_any(lower, &["closed", "closure", "blocked"]) {
        return IncidentSubcategory::RoadClosure;
    }
    if contains_any(lower, &["congestion", "heavy traffic", "delay", "queue"]) {
        return IncidentSubcategory::Congestion;
    }
    if contains_any(lower, &["crash", "accident", "collision", "rollover"]) {
        return IncidentSubcategory::Accident;
    }
    if contains_any(lower, &["roadwork", "road work", "maintenance", "resurfacing"]) {
        return IncidentSubcategory::Roadwork;
    }
    IncidentSubcategory::TrafficOther
}

/// Maps the impact description to a severity.
fn severity_from_impact(impact: &str) -> IncidentSeverity {
    let lower = impact.to_lowercase();
    if contains_any(&lower, &["blocked", "closed"]) {
        IncidentSeverity::Critical
    } else if contains_any(&lower, &["major", "severe"]) {
        IncidentSeverity::High
    } else if contains_any(&lower, &["minor", "light"]) {
        IncidentSeverity::Low
    } else {
        IncidentSeverity::Medium
    }
}

/// Published events are active; everything else is closed.
fn derive_status(props: &serde_json::Value) -> IncidentStatus {
    let published_flag = props
        .get("published")
        .and_then(serde_json::Value::as_bool)
        .or_else(|| {
            string_field(props, "status").map(|s| s.eq_ignore_ascii_case("published"))
        });

    match published_flag {
        Some(false) => IncidentStatus::Closed,
        // Absent flags mean the feed only exports published events.
        _ => IncidentStatus::Active,
    }
}
