//! User-report feed normalizer.
//!
//! User submissions are already persisted in near-canonical form; the
//! upstream store is itself the source. Normalization re-annotates each
//! record (source tag, authored flag), fills in missing spatial metadata,
//! and re-resolves attribution, without re-deriving geometry.
//!
//! A legacy bridge adapts records from the old single-incident report table
//! into the canonical shape; those are attributed to a fixed legacy-system
//! identity rather than any real user.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use incident_map_incident_models::{
    CanonicalIncident, IncidentSource, IncidentStatus, IncidentSubcategory,
};
use incident_map_spatial::{DEFAULT_PRECISION, RegionClassifier, compute_cell};
use incident_map_storage::IncidentStore;

use crate::parsing::{contains_any, first_string_field, first_timestamp};
use crate::{IncidentFeed, SourceError, attribution};

/// The user-submitted report feed, reading from the report store.
pub struct UserReportFeed {
    store: Arc<dyn IncidentStore>,
}

impl UserReportFeed {
    /// Creates the feed over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IncidentFeed for UserReportFeed {
    fn id(&self) -> &str {
        "user-reports"
    }

    fn name(&self) -> &str {
        "User Reports"
    }

    fn source(&self) -> IncidentSource {
        IncidentSource::UserSubmitted
    }

    async fn fetch(&self, _client: &reqwest::Client) -> Result<serde_json::Value, SourceError> {
        let reports: Vec<CanonicalIncident> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(|record| record.source == IncidentSource::UserSubmitted)
            .collect();
        Ok(serde_json::to_value(reports)?)
    }

    fn normalize(
        &self,
        raw: &serde_json::Value,
        regions: &RegionClassifier,
    ) -> Vec<CanonicalIncident> {
        normalize(raw, regions, Utc::now())
    }
}

/// Normalizes a raw user-report payload.
///
/// Each entry is either an already-canonical record (re-annotated in place)
/// or a legacy-table record (adapted through the bridge). Entries that are
/// neither are dropped with a warning.
#[must_use]
pub fn normalize(
    raw: &serde_json::Value,
    regions: &RegionClassifier,
    now: DateTime<Utc>,
) -> Vec<CanonicalIncident> {
    let Some(entries) = raw.as_array() else {
        log::warn!("user-report payload is not a list");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            if let Ok(record) = serde_json::from_value::<CanonicalIncident>(entry.clone()) {
                annotate_report(record, regions)
            } else {
                normalize_legacy(entry, regions, now)
            }
        })
        .collect()
}

/// Re-annotates an already-canonical user report.
///
/// Geometry is trusted as-is; geocell and region ids are recomputed from
/// the stored centroid when missing. Reports whose centroid is out of range
/// or whose attribution cannot be resolved are dropped.
fn annotate_report(
    mut record: CanonicalIncident,
    regions: &RegionClassifier,
) -> Option<CanonicalIncident> {
    if !(-90.0..=90.0).contains(&record.centroid_lat)
        || !(-180.0..=180.0).contains(&record.centroid_lng)
    {
        log::warn!("dropping user report {} with out-of-range centroid", record.id);
        return None;
    }

    let owner = match attribution::resolve(
        IncidentSource::UserSubmitted,
        Some(&record.user_id),
        &record.properties,
    ) {
        Ok(owner) => owner,
        Err(e) => {
            log::warn!("dropping user report {}: {e}", record.id);
            return None;
        }
    };

    record.source = IncidentSource::UserSubmitted;
    record.id =
        CanonicalIncident::composite_id(IncidentSource::UserSubmitted, &record.source_id);
    record.user_id = owner.owner_id;

    if record.geocell.is_none() {
        record.geocell = Some(compute_cell(
            record.centroid_lat,
            record.centroid_lng,
            DEFAULT_PRECISION,
        ));
    }
    if record.region_ids.is_empty() {
        record.region_ids = regions
            .classify(record.centroid_lat, record.centroid_lng, Some(&record.location))
            .map(|region| vec![region.id.clone()])
            .unwrap_or_default();
    }

    record.properties =
        annotate_properties(record.properties, IncidentSource::UserSubmitted, true);
    Some(record)
}

/// Adapts a record from the legacy report table into the canonical shape.
///
/// The legacy table predates per-user attribution, so these records belong
/// to the fixed legacy-import identity and are not flagged as user-authored.
#[must_use]
pub fn normalize_legacy(
    raw: &serde_json::Value,
    regions: &RegionClassifier,
    now: DateTime<Utc>,
) -> Option<CanonicalIncident> {
    let lat = raw
        .get("lat")
        .or_else(|| raw.get("latitude"))
        .and_then(serde_json::Value::as_f64)?;
    let lng = raw
        .get("lng")
        .or_else(|| raw.get("longitude"))
        .and_then(serde_json::Value::as_f64)?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }

    let source_id = first_string_field(raw, &["id", "report_id"])
        .map(ToString::to_string)
        .or_else(|| raw.get("id").and_then(serde_json::Value::as_i64).map(|n| n.to_string()))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let title = first_string_field(raw, &["title", "subject"])
        .unwrap_or("Community report")
        .to_string();
    let description = first_string_field(raw, &["details", "description", "body"])
        .unwrap_or_default()
        .to_string();
    let suburb = first_string_field(raw, &["suburb", "locality"]);

    let classify_text = format!(
        "{title} {description} {}",
        first_string_field(raw, &["type", "category"]).unwrap_or_default()
    )
    .to_lowercase();
    let subcategory = if contains_any(
        &classify_text,
        &["power", "utility", "gas", "water main", "streetlight", "outage"],
    ) {
        IncidentSubcategory::InfrastructureFault
    } else {
        IncidentSubcategory::CommunityIssue
    };

    let reported_at = first_timestamp(raw, &["created_at", "createdAt", "reported_at"]);

    let geometry = serde_json::json!({
        "type": "Point",
        "coordinates": [lng, lat],
    });

    Some(CanonicalIncident {
        id: CanonicalIncident::composite_id(IncidentSource::UserSubmitted, &source_id),
        source: IncidentSource::UserSubmitted,
        source_id,
        title,
        description,
        location: suburb.unwrap_or_default().to_string(),
        category: subcategory.category(),
        subcategory,
        severity: subcategory.default_severity(),
        status: IncidentStatus::Active,
        geometry: crate::geometry::parse_geometry(&geometry),
        centroid_lat: lat,
        centroid_lng: lng,
        region_ids: regions
            .classify(lat, lng, suburb)
            .map(|region| vec![region.id.clone()])
            .unwrap_or_default(),
        geocell: Some(compute_cell(lat, lng, DEFAULT_PRECISION)),
        incident_time: reported_at,
        last_updated: reported_at.unwrap_or(now),
        published_at: reported_at,
        user_id: attribution::LEGACY_IMPORT_ID.to_string(),
        properties: annotate_properties(raw.clone(), IncidentSource::UserSubmitted, false),
        version: 0,
    })
}

/// Annotates a properties payload with the canonical `source` tag and the
/// user-authored flag consumed downstream.
#[must_use]
pub fn annotate_properties(
    props: serde_json::Value,
    source: IncidentSource,
    user_authored: bool,
) -> serde_json::Value {
    let mut object = match props {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            if !other.is_null() {
                map.insert("raw".to_string(), other);
            }
            map
        }
    };
    object.insert("source".to_string(), serde_json::json!(source.to_string()));
    object.insert("userAuthored".to_string(), serde_json::json!(user_authored));
    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_map_incident_models::{IncidentCategory, IncidentSeverity};

    fn report(user_id: &str) -> CanonicalIncident {
        CanonicalIncident {
            id: "user-submitted:r1".to_string(),
            source: IncidentSource::UserSubmitted,
            source_id: "r1".to_string(),
            title: "Pothole".to_string(),
            description: "Deep pothole on the bridge".to_string(),
            location: "West End".to_string(),
            category: IncidentCategory::Community,
            subcategory: IncidentSubcategory::CommunityIssue,
            severity: IncidentSeverity::Low,
            status: IncidentStatus::Active,
            geometry: None,
            centroid_lat: -27.48,
            centroid_lng: 153.01,
            region_ids: Vec::new(),
            geocell: None,
            incident_time: None,
            last_updated: "2025-06-09T00:00:00Z".parse().unwrap(),
            published_at: None,
            user_id: user_id.to_string(),
            properties: serde_json::json!({}),
            version: 1,
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-06-10T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn annotates_canonical_reports() {
        let raw = serde_json::to_value(vec![report("u1")]).unwrap();
        let regions = RegionClassifier::builtin();
        let reports = normalize(&raw, &regions, now());
        assert_eq!(reports.len(), 1);

        let record = &reports[0];
        assert_eq!(record.user_id, "u1");
        assert!(record.geocell.is_some());
        assert_eq!(record.region_ids, vec!["brisbane".to_string()]);
        assert_eq!(record.properties["userAuthored"], true);
        assert_eq!(record.properties["source"], "user-submitted");
    }

    #[test]
    fn drops_reports_without_user() {
        let raw = serde_json::to_value(vec![report("")]).unwrap();
        let regions = RegionClassifier::builtin();
        assert!(normalize(&raw, &regions, now()).is_empty());
    }

    #[test]
    fn legacy_bridge_adapts_old_records() {
        let raw = serde_json::json!([{
            "id": 17,
            "title": "Streetlight out",
            "details": "Power outage on the corner",
            "lat": -27.47,
            "lng": 153.02,
            "suburb": "Fortitude Valley",
            "created_at": "2025-06-08T10:00:00Z",
        }]);

        let regions = RegionClassifier::builtin();
        let reports = normalize(&raw, &regions, now());
        assert_eq!(reports.len(), 1);

        let record = &reports[0];
        assert_eq!(record.id, "user-submitted:17");
        assert_eq!(record.subcategory, IncidentSubcategory::InfrastructureFault);
        assert_eq!(record.category, IncidentCategory::Infrastructure);
        assert_eq!(record.user_id, attribution::LEGACY_IMPORT_ID);
        assert_eq!(record.properties["userAuthored"], false);
        assert!(record.geometry.is_some());
    }

    #[test]
    fn legacy_bridge_defaults_to_community_issue() {
        let raw = serde_json::json!([{
            "id": 18,
            "title": "Dumped rubbish",
            "lat": -27.47,
            "lng": 153.02,
        }]);

        let regions = RegionClassifier::builtin();
        let reports = normalize(&raw, &regions, now());
        assert_eq!(reports[0].subcategory, IncidentSubcategory::CommunityIssue);
    }

    #[test]
    fn legacy_records_without_coordinates_are_dropped() {
        let raw = serde_json::json!([{"id": 19, "title": "No location"}]);
        let regions = RegionClassifier::builtin();
        assert!(normalize(&raw, &regions, now()).is_empty());
    }

    #[test]
    fn annotate_wraps_non_object_payloads() {
        let annotated = annotate_properties(
            serde_json::json!("bare"),
            IncidentSource::RoadTraffic,
            false,
        );
        assert_eq!(annotated["raw"], "bare");
        assert_eq!(annotated["source"], "road-traffic");
    }
}
