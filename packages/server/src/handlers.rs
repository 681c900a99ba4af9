//! HTTP handler functions for the incident map API.

use actix_web::{HttpResponse, web};
use incident_map_incident_models::{IncidentCategory, IncidentSource};
use incident_map_ingest::CycleOutcome;
use incident_map_query::{IncidentFilter, QueryError};
use incident_map_server_models::{
    ApiHealth, IncidentQueryParams, IngestRunParams, incident_feature,
};
use incident_map_spatial::BoundingBox;

use crate::AppState;

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/incidents`
///
/// Queries incidents with bounding box, region, category, source, recency,
/// and active-only filters, returning a GeoJSON feature collection.
pub async fn incidents(
    state: web::Data<AppState>,
    params: web::Query<IncidentQueryParams>,
) -> HttpResponse {
    let filter = match build_filter(&params) {
        Ok(filter) => filter,
        Err(message) => return bad_request(&message),
    };

    match state.ingest.lookup().query(&filter) {
        Ok(result) => {
            let features: Vec<geojson::Feature> =
                result.incidents.iter().map(incident_feature).collect();

            let mut foreign_members = serde_json::Map::new();
            foreign_members.insert(
                "stats".to_string(),
                serde_json::to_value(result.stats).unwrap_or_default(),
            );
            foreign_members.insert("cacheHit".to_string(), serde_json::json!(result.cache_hit));
            foreign_members.insert(
                "queryTimeMs".to_string(),
                serde_json::json!(result.query_time_ms),
            );

            HttpResponse::Ok().json(geojson::FeatureCollection {
                bbox: None,
                features,
                foreign_members: Some(foreign_members),
            })
        }
        Err(e @ QueryError::InvalidBoundingBox { .. }) => bad_request(&e.to_string()),
    }
}

/// `GET /api/sources`
///
/// Per-source ingestion health: last fetch/success times, consecutive
/// errors, and circuit state.
pub async fn sources(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.ingest.health())
}

/// `POST /api/ingest/run`
///
/// Forces one source's cycle (or every source's) to run immediately. Used
/// for operational recovery.
pub async fn ingest_run(
    state: web::Data<AppState>,
    params: web::Query<IngestRunParams>,
) -> HttpResponse {
    match state.ingest.force_run(params.source.as_deref()).await {
        Ok(summaries) => {
            let body: Vec<serde_json::Value> = summaries
                .iter()
                .map(|(id, summary)| {
                    serde_json::json!({
                        "source": id,
                        "outcome": outcome_json(&summary.outcome),
                        "nextIntervalSecs": summary.next_interval.as_secs(),
                    })
                })
                .collect();
            HttpResponse::Ok().json(body)
        }
        Err(e) => HttpResponse::NotFound().json(serde_json::json!({
            "error": e.to_string(),
        })),
    }
}

fn outcome_json(outcome: &CycleOutcome) -> serde_json::Value {
    match outcome {
        CycleOutcome::Completed {
            processed,
            upserted,
            failed,
        } => serde_json::json!({
            "status": "completed",
            "processed": processed,
            "upserted": upserted,
            "failed": failed,
        }),
        CycleOutcome::SkippedCircuitOpen => serde_json::json!({
            "status": "skipped-circuit-open",
        }),
        CycleOutcome::FetchFailed { error } => serde_json::json!({
            "status": "fetch-failed",
            "error": error,
        }),
    }
}

/// Translates query-string parameters into an [`IncidentFilter`],
/// rejecting malformed values instead of silently ignoring them.
fn build_filter(params: &IncidentQueryParams) -> Result<IncidentFilter, String> {
    let bbox = match params.bbox.as_deref() {
        Some(raw) => Some(
            parse_bbox(raw).ok_or_else(|| format!("invalid bbox parameter: {raw:?}"))?,
        ),
        None => None,
    };

    let category = match params.category.as_deref() {
        Some(raw) => Some(
            raw.parse::<IncidentCategory>()
                .map_err(|_| format!("unknown category: {raw:?}"))?,
        ),
        None => None,
    };

    let source = match params.source.as_deref() {
        Some(raw) => Some(
            raw.parse::<IncidentSource>()
                .map_err(|_| format!("unknown source: {raw:?}"))?,
        ),
        None => None,
    };

    let since = match params.since.as_deref() {
        Some(raw) => Some(
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|_| format!("invalid since timestamp: {raw:?}"))?,
        ),
        None => None,
    };

    Ok(IncidentFilter {
        bbox,
        region_id: params.region.clone(),
        category,
        source,
        since,
        active_only: params.active.unwrap_or(false),
    })
}

/// Parses a bounding box string `"west,south,east,north"`.
fn parse_bbox(s: &str) -> Option<BoundingBox> {
    let parts: Vec<f64> = s.split(',').filter_map(|p| p.trim().parse().ok()).collect();
    if parts.len() == 4 {
        Some(BoundingBox::new(parts[0], parts[1], parts[2], parts[3]))
    } else {
        None
    }
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": message,
    }))
}
