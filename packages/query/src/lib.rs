#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Three-stage cached spatial query engine.
//!
//! Holds the full incident set in memory behind a read-write lock, indexed
//! by geocell in a grid hash map. Queries run a coarse geocell pre-filter,
//! an exact bounding-box filter, then attribute filters, with per-stage
//! survivor counts retained for observability and results cached in a
//! bounded LRU+TTL cache.
//!
//! `load()` performs a full atomic replacement of the incident set, index,
//! and cache, so readers always see either the previous snapshot or the new
//! one, never a partial update.

pub mod cache;

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use incident_map_incident_models::{CanonicalIncident, IncidentCategory, IncidentSource};
use incident_map_spatial::{
    BoundingBox, DEFAULT_PRECISION, cell_indices, compute_cell, covering_cell_count,
};
use serde::Serialize;

use cache::{CacheStats, CachedResult, QueryCache};

/// Fixed latitude degrees-per-kilometre conversion used by [`SpatialLookupEngine::query_near`].
const DEGREES_PER_KM_LAT: f64 = 1.0 / 111.0;

/// Errors from query validation.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The bounding box's south-west corner is not south-west of its
    /// north-east corner (or a coordinate is out of range).
    #[error(
        "invalid bounding box: west={west}, south={south}, east={east}, north={north}"
    )]
    InvalidBoundingBox {
        /// Western longitude as supplied.
        west: f64,
        /// Southern latitude as supplied.
        south: f64,
        /// Eastern longitude as supplied.
        east: f64,
        /// Northern latitude as supplied.
        north: f64,
    },
}

/// Filters accepted by [`SpatialLookupEngine::query`]. All fields optional;
/// an empty filter returns the full set.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    /// Spatial bounding box.
    pub bbox: Option<BoundingBox>,
    /// Region membership.
    pub region_id: Option<String>,
    /// Top-level category equality.
    pub category: Option<IncidentCategory>,
    /// Source equality.
    pub source: Option<IncidentSource>,
    /// Only incidents with `last_updated >= since`.
    pub since: Option<DateTime<Utc>>,
    /// Only incidents whose status is active or monitoring.
    pub active_only: bool,
}

/// Per-stage survivor counts for one query execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    /// Survivors of the geocell pre-filter.
    pub stage1_filtered: usize,
    /// Survivors of the exact bounding-box filter.
    pub stage2_filtered: usize,
    /// Survivors of the attribute filters.
    pub stage3_filtered: usize,
    /// Final result count.
    pub total_found: usize,
}

/// The outcome of a query: matching incidents plus observability metadata.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Incidents matching the filter.
    pub incidents: Vec<CanonicalIncident>,
    /// Per-stage survivor counts.
    pub stats: QueryStats,
    /// `true` when served from the cache.
    pub cache_hit: bool,
    /// Pipeline execution time; zero for cache hits.
    pub query_time_ms: u64,
}

/// Immutable snapshot installed by `load()` and read by queries.
struct EngineState {
    incidents: Vec<CanonicalIncident>,
    /// Grid hash map: quantized cell index pair -> indices into `incidents`.
    cell_index: HashMap<(i64, i64), Vec<usize>>,
    /// Indices of incidents without a geocell; these always pass stage 1.
    unindexed: Vec<usize>,
    /// Cheap content hash of the loaded set.
    content_hash: String,
}

/// In-memory spatial lookup engine over the full incident set.
pub struct SpatialLookupEngine {
    state: RwLock<EngineState>,
    cache: Mutex<QueryCache>,
    precision: u8,
}

impl Default for SpatialLookupEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialLookupEngine {
    /// Creates an empty engine at the default geocell precision.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState {
                incidents: Vec::new(),
                cell_index: HashMap::new(),
                unindexed: Vec::new(),
                content_hash: String::new(),
            }),
            cache: Mutex::new(QueryCache::new()),
            precision: DEFAULT_PRECISION,
        }
    }

    /// Replaces the incident set.
    ///
    /// A cheap content hash (count plus min/max `last_updated`) guards the
    /// replacement: when the hash is unchanged the call is a no-op and the
    /// cache is preserved. Otherwise the set is swapped atomically, missing
    /// geocells are backfilled from centroids, and the cache is cleared.
    ///
    /// Returns `true` when a new snapshot was installed.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn load(&self, mut incidents: Vec<CanonicalIncident>) -> bool {
        let hash = content_hash(&incidents);
        {
            let state = self.state.read().expect("spatial engine lock poisoned");
            if state.content_hash == hash {
                log::debug!("spatial index unchanged ({hash}), keeping current snapshot");
                return false;
            }
        }

        let mut backfilled = 0usize;
        for incident in &mut incidents {
            if incident.geocell.is_none() {
                incident.geocell = Some(compute_cell(
                    incident.centroid_lat,
                    incident.centroid_lng,
                    self.precision,
                ));
                backfilled += 1;
            }
        }

        // The grid map keys on the integer index pair behind each geocell;
        // the string form stays on the record as the persisted tag.
        let mut cell_index: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        let mut unindexed = Vec::new();
        for (idx, incident) in incidents.iter().enumerate() {
            if incident.geocell.is_some() {
                let pair =
                    cell_indices(incident.centroid_lat, incident.centroid_lng, self.precision);
                cell_index.entry(pair).or_default().push(idx);
            } else {
                unindexed.push(idx);
            }
        }

        log::info!(
            "spatial index loaded: {} incidents, {} cells ({backfilled} geocells backfilled)",
            incidents.len(),
            cell_index.len()
        );

        *self.state.write().expect("spatial engine lock poisoned") = EngineState {
            incidents,
            cell_index,
            unindexed,
            content_hash: hash,
        };
        self.cache.lock().expect("query cache lock poisoned").clear();
        true
    }

    /// Runs the three-stage filter pipeline.
    ///
    /// Stage 1 pre-filters by covering geocells (a coarse accelerant;
    /// incidents without a geocell are never discarded here), stage 2
    /// applies the exact bounding-box comparison, stage 3 applies region,
    /// category, source, recency, and active-only filters in that order,
    /// each short-circuiting to an empty result. Results are cached; a hit
    /// is returned with zero computed latency.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidBoundingBox`] when the filter's box is
    /// inverted or out of range.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::significant_drop_tightening)]
    pub fn query(&self, filter: &IncidentFilter) -> Result<QueryResult, QueryError> {
        if let Some(bbox) = &filter.bbox
            && !bbox.is_valid()
        {
            return Err(QueryError::InvalidBoundingBox {
                west: bbox.west,
                south: bbox.south,
                east: bbox.east,
                north: bbox.north,
            });
        }

        let key = cache_key(filter);
        let now = Instant::now();

        if let Some(cached) = self
            .cache
            .lock()
            .expect("query cache lock poisoned")
            .get(&key, now)
        {
            return Ok(QueryResult {
                incidents: cached.incidents,
                stats: cached.stats,
                cache_hit: true,
                query_time_ms: 0,
            });
        }

        let started = Instant::now();
        let mut stats = QueryStats::default();

        let incidents = {
            let state = self.state.read().expect("spatial engine lock poisoned");

            // Stage 1: geocell pre-filter.
            let candidates = stage1_candidates(&state, filter.bbox.as_ref(), self.precision);
            stats.stage1_filtered = candidates.len();

            // Stage 2: exact bounding-box comparison.
            let survivors: Vec<&CanonicalIncident> = match &filter.bbox {
                Some(bbox) => candidates
                    .into_iter()
                    .filter(|incident| bbox.contains(incident.centroid_lat, incident.centroid_lng))
                    .collect(),
                None => candidates,
            };
            stats.stage2_filtered = survivors.len();

            // Stage 3: attribute filters.
            let survivors = stage3_filters(survivors, filter);
            stats.stage3_filtered = survivors.len();
            stats.total_found = survivors.len();

            survivors.into_iter().cloned().collect::<Vec<_>>()
        };

        #[allow(clippy::cast_possible_truncation)]
        let query_time_ms = started.elapsed().as_millis() as u64;

        self.cache
            .lock()
            .expect("query cache lock poisoned")
            .insert(
                key,
                CachedResult {
                    incidents: incidents.clone(),
                    stats,
                },
                now,
            );

        Ok(QueryResult {
            incidents,
            stats,
            cache_hit: false,
            query_time_ms,
        })
    }

    /// Queries everything inside a viewport. Corners are `(lat, lng)`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidBoundingBox`] when the corners are
    /// inverted or out of range.
    pub fn query_viewport(
        &self,
        south_west: (f64, f64),
        north_east: (f64, f64),
        mut filter: IncidentFilter,
    ) -> Result<QueryResult, QueryError> {
        filter.bbox = Some(BoundingBox::new(
            south_west.1,
            south_west.0,
            north_east.1,
            north_east.0,
        ));
        self.query(&filter)
    }

    /// Queries everything within roughly `radius_km` of a point, by
    /// converting the radius to a bounding box: a fixed degrees-per-km
    /// latitude conversion and a `cos(latitude)`-corrected longitude one.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidBoundingBox`] when the derived box
    /// leaves valid coordinate ranges.
    pub fn query_near(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        mut filter: IncidentFilter,
    ) -> Result<QueryResult, QueryError> {
        let dlat = radius_km * DEGREES_PER_KM_LAT;
        let dlng = radius_km * DEGREES_PER_KM_LAT / lat.to_radians().cos().abs().max(0.01);
        filter.bbox = Some(BoundingBox::new(
            lng - dlng,
            lat - dlat,
            lng + dlng,
            lat + dlat,
        ));
        self.query(&filter)
    }

    /// Number of incidents in the current snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn incident_count(&self) -> usize {
        self.state
            .read()
            .expect("spatial engine lock poisoned")
            .incidents
            .len()
    }

    /// Cumulative cache counters.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .lock()
            .expect("query cache lock poisoned")
            .stats()
    }
}

/// Stage 1: candidates surviving the geocell pre-filter.
///
/// With a bounding box, bucket indices are gathered from the grid map,
/// probing covering cells when the box is small, or walking the occupied
/// cells when it is large, whichever side is cheaper, plus all unindexed
/// incidents. Without a box, the whole set passes through.
fn stage1_candidates<'state>(
    state: &'state EngineState,
    bbox: Option<&BoundingBox>,
    precision: u8,
) -> Vec<&'state CanonicalIncident> {
    let Some(bbox) = bbox else {
        return state.incidents.iter().collect();
    };

    let (lat_min, lng_min) = cell_indices(bbox.south, bbox.west, precision);
    let (lat_max, lng_max) = cell_indices(bbox.north, bbox.east, precision);

    let mut indices: Vec<usize> =
        if covering_cell_count(bbox, precision) <= state.cell_index.len() as u64 {
            (lat_min..=lat_max)
                .flat_map(|lat_idx| {
                    (lng_min..=lng_max).filter_map(move |lng_idx| {
                        state.cell_index.get(&(lat_idx, lng_idx))
                    })
                })
                .flatten()
                .copied()
                .collect()
        } else {
            state
                .cell_index
                .iter()
                .filter(|((lat_idx, lng_idx), _)| {
                    (lat_min..=lat_max).contains(lat_idx)
                        && (lng_min..=lng_max).contains(lng_idx)
                })
                .flat_map(|(_, bucket)| bucket)
                .copied()
                .collect()
        };
    indices.extend_from_slice(&state.unindexed);
    indices.sort_unstable();
    indices.dedup();

    indices.into_iter().map(|idx| &state.incidents[idx]).collect()
}

/// Stage 3: region, category, source, recency, and active-only filters,
/// applied in that order, each short-circuiting on an empty survivor set.
fn stage3_filters<'set>(
    mut survivors: Vec<&'set CanonicalIncident>,
    filter: &IncidentFilter,
) -> Vec<&'set CanonicalIncident> {
    if let Some(region_id) = &filter.region_id {
        survivors.retain(|incident| incident.region_ids.iter().any(|id| id == region_id));
        if survivors.is_empty() {
            return survivors;
        }
    }

    if let Some(category) = filter.category {
        survivors.retain(|incident| incident.category == category);
        if survivors.is_empty() {
            return survivors;
        }
    }

    if let Some(source) = filter.source {
        survivors.retain(|incident| incident.source == source);
        if survivors.is_empty() {
            return survivors;
        }
    }

    if let Some(since) = filter.since {
        survivors.retain(|incident| incident.last_updated >= since);
        if survivors.is_empty() {
            return survivors;
        }
    }

    if filter.active_only {
        survivors.retain(|incident| incident.status.is_open());
    }

    survivors
}

/// Cheap content hash over an incident set: count plus min/max
/// `last_updated`. Enough to detect any batch-level change without hashing
/// record contents.
fn content_hash(incidents: &[CanonicalIncident]) -> String {
    let min = incidents.iter().map(|incident| incident.last_updated).min();
    let max = incidents.iter().map(|incident| incident.last_updated).max();
    match (min, max) {
        (Some(min), Some(max)) => format!(
            "{}:{}:{}",
            incidents.len(),
            min.timestamp_millis(),
            max.timestamp_millis()
        ),
        _ => "0".to_string(),
    }
}

/// Deterministic cache key from the filter's present fields.
fn cache_key(filter: &IncidentFilter) -> String {
    let mut parts = Vec::new();
    if let Some(bbox) = &filter.bbox {
        parts.push(format!(
            "bbox={:.6},{:.6},{:.6},{:.6}",
            bbox.west, bbox.south, bbox.east, bbox.north
        ));
    }
    if let Some(region_id) = &filter.region_id {
        parts.push(format!("region={region_id}"));
    }
    if let Some(category) = filter.category {
        parts.push(format!("category={category}"));
    }
    if let Some(source) = filter.source {
        parts.push(format!("source={source}"));
    }
    if let Some(since) = filter.since {
        parts.push(format!("since={}", since.timestamp_millis()));
    }
    if filter.active_only {
        parts.push("active=true".to_string());
    }

    if parts.is_empty() {
        "all".to_string()
    } else {
        parts.join("|")
    }
}
