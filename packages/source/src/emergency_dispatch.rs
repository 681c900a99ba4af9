//! Emergency-dispatch feed normalizer.
//!
//! Dispatch incidents arrive as a GeoJSON feature collection (or a bare
//! `incidents` list) with jurisdiction, status, and vehicle assignment
//! counts. Classification inspects jurisdiction, incident type, and free
//! text for keyword families in a fixed priority order before falling back
//! to jurisdiction-code heuristics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use incident_map_incident_models::{
    CanonicalIncident, IncidentSource, IncidentSeverity, IncidentStatus, IncidentSubcategory,
};
use incident_map_spatial::{DEFAULT_PRECISION, RegionClassifier, compute_cell};

use crate::parsing::{
    contains_any, first_string_field, first_timestamp, within_recency_window,
};
use crate::registry::FeedConfig;
use crate::{IncidentFeed, SourceError, attribution, geometry, retry};

const UPDATED_KEYS: &[&str] = &["last_updated", "lastUpdated", "updated"];
const PUBLISHED_KEYS: &[&str] = &["published", "published_at", "response_date", "responseDate"];

/// The emergency services dispatch feed.
pub struct EmergencyDispatchFeed {
    config: FeedConfig,
}

impl EmergencyDispatchFeed {
    /// Creates the feed from its registry config.
    #[must_use]
    pub const fn new(config: FeedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl IncidentFeed for EmergencyDispatchFeed {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn source(&self) -> IncidentSource {
        IncidentSource::EmergencyDispatch
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<serde_json::Value, SourceError> {
        let url = self.config.api_url.clone();
        retry::send_json(|| client.get(&url)).await
    }

    fn normalize(
        &self,
        raw: &serde_json::Value,
        regions: &RegionClassifier,
    ) -> Vec<CanonicalIncident> {
        normalize(raw, regions, Utc::now())
    }
}

/// Normalizes a raw dispatch payload into canonical incidents.
#[must_use]
pub fn normalize(
    raw: &serde_json::Value,
    regions: &RegionClassifier,
    now: DateTime<Utc>,
) -> Vec<CanonicalIncident> {
    let features = raw
        .get("features")
        .or_else(|| raw.get("incidents"))
        .and_then(serde_json::Value::as_array);

    let Some(features) = features else {
        log::warn!("emergency-dispatch payload has no recognizable incident list");
        return Vec::new();
    };

    features
        .iter()
        .filter_map(|feature| normalize_feature(feature, regions, now))
        .collect()
}

/// Normalizes a single dispatch feature. Returns `None` to drop it.
#[allow(clippy::too_many_lines)]
fn normalize_feature(
    feature: &serde_json::Value,
    regions: &RegionClassifier,
    now: DateTime<Utc>,
) -> Option<CanonicalIncident> {
    let props = feature.get("properties").unwrap_or(feature);

    let updated = first_timestamp(props, UPDATED_KEYS);
    let published = first_timestamp(props, PUBLISHED_KEYS);

    if let Some(timestamp) = updated.or(published)
        && !within_recency_window(timestamp, now)
    {
        return None;
    }

    let geom = feature.get("geometry").and_then(geometry::parse_geometry);
    let (lat, lng) = geom.as_ref().and_then(geometry::centroid).or_else(|| {
        log::debug!("dropping dispatch incident without derivable centroid");
        None
    })?;

    let source_id = first_string_field(
        props,
        &["id", "master_incident_number", "masterIncidentNumber", "incident_number"],
    )
    .map(ToString::to_string)
    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let incident_type = first_string_field(
        props,
        &["incident_type", "incidentType", "grouped_type", "groupedType"],
    )
    .unwrap_or("Emergency incident");
    let locality = first_string_field(props, &["locality", "suburb", "location"]);
    let raw_status = first_string_field(props, &["status", "current_status", "currentStatus"]);
    let jurisdiction = first_string_field(props, &["jurisdiction", "agency", "service"]);
    let free_text = first_string_field(props, &["description", "details"]);

    let on_scene = count_field(props, &["vehicles_on_scene", "vehiclesOnScene"]);
    let en_route = count_field(
        props,
        &["vehicles_on_route", "vehiclesOnRoute", "vehicles_en_route", "vehiclesEnRoute"],
    );

    let description = build_description(incident_type, locality, raw_status, on_scene, en_route);

    let classify_text = format!(
        "{} {incident_type} {}",
        jurisdiction.unwrap_or_default(),
        free_text.unwrap_or_default()
    )
    .to_lowercase();
    let subcategory = classify_dispatch(&classify_text, jurisdiction);

    let severity = derive_severity(on_scene, en_route, raw_status);
    let status = derive_status(raw_status);

    let owner = match attribution::resolve(IncidentSource::EmergencyDispatch, None, props) {
        Ok(owner) => owner,
        Err(e) => {
            log::warn!("dropping dispatch incident {source_id}: {e}");
            return None;
        }
    };

    let region_ids = regions
        .classify(lat, lng, locality)
        .map(|region| vec![region.id.clone()])
        .unwrap_or_default();

    Some(CanonicalIncident {
        id: CanonicalIncident::composite_id(IncidentSource::EmergencyDispatch, &source_id),
        source: IncidentSource::EmergencyDispatch,
        source_id,
        title: incident_type.to_string(),
        description,
        location: locality.unwrap_or_default().to_string(),
        category: subcategory.category(),
        subcategory,
        severity,
        status,
        geometry: geom,
        centroid_lat: lat,
        centroid_lng: lng,
        region_ids,
        geocell: Some(compute_cell(lat, lng, DEFAULT_PRECISION)),
        incident_time: published.or(updated),
        last_updated: updated.or(published).unwrap_or(now),
        published_at: published,
        user_id: owner.owner_id,
        properties: crate::user_report::annotate_properties(
            props.clone(),
            IncidentSource::EmergencyDispatch,
            false,
        ),
        version: 0,
    })
}

/// Assembles the description from incident type, locality, current status,
/// and vehicle counts, since the feed itself carries no prose.
fn build_description(
    incident_type: &str,
    locality: Option<&str>,
    status: Option<&str>,
    on_scene: u32,
    en_route: u32,
) -> String {
    let mut parts = vec![incident_type.to_string()];
    if let Some(locality) = locality {
        parts.push(format!("at {locality}"));
    }
    if let Some(status) = status {
        parts.push(format!("({status})"));
    }
    parts.push(format!("{on_scene} on scene, {en_route} en route"));
    parts.join(" ")
}

/// Reads a vehicle count that may be numeric or a numeric string.
fn count_field(props: &serde_json::Value, keys: &[&str]) -> u32 {
    keys.iter()
        .filter_map(|key| props.get(key))
        .find_map(|value| match value {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Keyword-family classification in fixed priority order, falling back to
/// jurisdiction-code heuristics, then the generic emergency-response bucket.
fn classify_dispatch(lower: &str, jurisdiction: Option<&str>) -> IncidentSubcategory {
    if contains_any(lower, &["rescue", "crash", "collision", "trapped", "rollover"]) {
        return IncidentSubcategory::RescueCrash;
    }
    if contains_any(lower, &["power", "gas", "electrical", "powerline", "wires down"]) {
        return IncidentSubcategory::UtilityHazard;
    }
    if contains_any(lower, &["storm", "flood", "swift water", "tree down", "roof damage"]) {
        return IncidentSubcategory::StormFlood;
    }
    if contains_any(lower, &["medical", "cardiac", "resus", "patient"]) {
        return IncidentSubcategory::MedicalEmergency;
    }
    if contains_any(lower, &["hazmat", "chemical", "spill", "fuel leak"]) {
        return IncidentSubcategory::Hazmat;
    }
    if contains_any(lower, &["fire", "smoke", "alight", "burning"]) {
        return IncidentSubcategory::Fire;
    }
    if contains_any(lower, &["police", "siege", "firearm"]) {
        return IncidentSubcategory::PoliceOperation;
    }

    match jurisdiction.map(str::to_uppercase).as_deref() {
        Some(code) if code.contains("QFES") || code.contains("FIRE") => IncidentSubcategory::Fire,
        Some(code) if code.contains("SES") => IncidentSubcategory::StormFlood,
        Some(code) if code.contains("QAS") => IncidentSubcategory::MedicalEmergency,
        Some(code) if code.contains("QPS") => IncidentSubcategory::PoliceOperation,
        _ => IncidentSubcategory::EmergencyResponse,
    }
}

/// Vehicle counts outrank status keywords: a large response is critical no
/// matter what the status string says.
fn derive_severity(on_scene: u32, en_route: u32, status: Option<&str>) -> IncidentSeverity {
    if on_scene >= 3 || en_route >= 3 {
        return IncidentSeverity::Critical;
    }
    if on_scene >= 2 || en_route >= 2 {
        return IncidentSeverity::High;
    }

    let lower = status.unwrap_or_default().to_lowercase();
    if lower.contains("on scene") {
        IncidentSeverity::Critical
    } else if contains_any(&lower, &["responding", "en route"]) {
        IncidentSeverity::High
    } else if contains_any(&lower, &["finished", "returning", "complete"]) {
        IncidentSeverity::Low
    } else {
        IncidentSeverity::Medium
    }
}

/// Maps the dispatch status string to a lifecycle status.
fn derive_status(status: Option<&str>) -> IncidentStatus {
    let lower = status.unwrap_or_default().to_lowercase();
    if contains_any(&lower, &["finished", "complete", "closed"]) {
        IncidentStatus::Resolved
    } else if contains_any(&lower, &["contained", "monitoring", "patrol", "standby"]) {
        IncidentStatus::Monitoring
    } else {
        IncidentStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(props: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "geometry": {"type": "Point", "coordinates": [153.03, -27.45]},
            "properties": props,
        })
    }

    fn now() -> DateTime<Utc> {
        "2025-06-10T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn normalizes_dispatch_incident() {
        let raw = serde_json::json!({"features": [feature(serde_json::json!({
            "master_incident_number": "QF123",
            "incident_type": "Structure Fire",
            "locality": "West End",
            "current_status": "On Scene",
            "vehicles_on_scene": 2,
            "vehicles_on_route": 1,
            "jurisdiction": "QFES",
            "last_updated": "2025-06-09T23:00:00Z",
        }))]});

        let regions = RegionClassifier::builtin();
        let incidents = normalize(&raw, &regions, now());
        assert_eq!(incidents.len(), 1);

        let incident = &incidents[0];
        assert_eq!(incident.id, "emergency-dispatch:QF123");
        assert_eq!(incident.subcategory, IncidentSubcategory::Fire);
        // 2 on scene -> High beats the on-scene status keyword.
        assert_eq!(incident.severity, IncidentSeverity::High);
        assert_eq!(incident.status, IncidentStatus::Active);
        assert_eq!(incident.user_id, attribution::FIRE_RESCUE_ID);
        assert!(incident.description.contains("2 on scene, 1 en route"));
        assert!(incident.description.contains("at West End"));
    }

    #[test]
    fn three_vehicles_is_critical() {
        assert_eq!(derive_severity(3, 0, Some("Going")), IncidentSeverity::Critical);
        assert_eq!(derive_severity(0, 3, None), IncidentSeverity::Critical);
        assert_eq!(derive_severity(2, 0, None), IncidentSeverity::High);
    }

    #[test]
    fn status_keywords_apply_when_counts_are_low() {
        assert_eq!(derive_severity(1, 1, Some("On Scene")), IncidentSeverity::Critical);
        assert_eq!(derive_severity(0, 0, Some("Responding")), IncidentSeverity::High);
        assert_eq!(derive_severity(0, 0, Some("Finished")), IncidentSeverity::Low);
        assert_eq!(derive_severity(0, 0, None), IncidentSeverity::Medium);
    }

    #[test]
    fn keyword_families_take_priority_over_jurisdiction() {
        // Fire jurisdiction but the incident text says road crash rescue.
        assert_eq!(
            classify_dispatch("qfes road crash rescue", Some("QFES")),
            IncidentSubcategory::RescueCrash
        );
    }

    #[test]
    fn jurisdiction_heuristics_fall_back() {
        assert_eq!(
            classify_dispatch("assist occupant", Some("SES")),
            IncidentSubcategory::StormFlood
        );
        assert_eq!(
            classify_dispatch("assist occupant", Some("XYZ")),
            IncidentSubcategory::EmergencyResponse
        );
    }

    #[test]
    fn status_lifecycle_mapping() {
        assert_eq!(derive_status(Some("Finished")), IncidentStatus::Resolved);
        assert_eq!(derive_status(Some("Contained")), IncidentStatus::Monitoring);
        assert_eq!(derive_status(Some("Going")), IncidentStatus::Active);
        assert_eq!(derive_status(None), IncidentStatus::Active);
    }

    #[test]
    fn stale_incidents_filtered() {
        let raw = serde_json::json!({"features": [feature(serde_json::json!({
            "id": "old",
            "last_updated": "2025-05-01T00:00:00Z",
        }))]});
        let regions = RegionClassifier::builtin();
        assert!(normalize(&raw, &regions, now()).is_empty());
    }

    #[test]
    fn malformed_payload_yields_empty_list() {
        let regions = RegionClassifier::builtin();
        assert!(normalize(&serde_json::json!({"nope": 1}), &regions, now()).is_empty());
    }
}
