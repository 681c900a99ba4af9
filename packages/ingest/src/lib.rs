#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-source ingestion scheduler.
//!
//! One self-rescheduling loop per registered feed: fetch under the bounded
//! retry wrapper, normalize, upsert every record independently, rebuild the
//! spatial index, then sleep for an interval derived from how much activity
//! the cycle saw. Repeated fetch failures open a per-source circuit that
//! skips cycles until a cool-down elapses.
//!
//! The engine is an explicitly constructed service owned by the process's
//! composition root (`new`, `start`, `stop`), with no global instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use incident_map_incident_models::CanonicalIncident;
use incident_map_query::SpatialLookupEngine;
use incident_map_source::IncidentFeed;
use incident_map_spatial::{DEFAULT_PRECISION, RegionClassifier, compute_cell};
use incident_map_storage::IncidentStore;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors that can occur driving the ingestion engine.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The requested source id is not registered.
    #[error("unknown source: {id}")]
    UnknownSource {
        /// The id that failed to resolve.
        id: String,
    },
}

/// Tuning knobs for the scheduler. The defaults match production.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Consecutive fetch failures before the circuit opens.
    pub error_threshold: u32,
    /// Cool-down applied while the circuit is open; also the cap on the
    /// failure reschedule backoff.
    pub circuit_cooldown: Duration,
    /// Base delay for the failure reschedule backoff.
    pub backoff_base: Duration,
    /// Polling floor for highly active cycles.
    pub fast_poll: Duration,
    /// Polling interval for cycles with some activity.
    pub default_poll: Duration,
    /// Polling interval for idle cycles.
    pub slow_poll: Duration,
    /// Processed-record count at which a cycle counts as highly active.
    pub high_activity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            circuit_cooldown: Duration::from_secs(600),
            backoff_base: Duration::from_secs(30),
            fast_poll: Duration::from_secs(60),
            default_poll: Duration::from_secs(180),
            slow_poll: Duration::from_secs(300),
            high_activity: 25,
        }
    }
}

/// Per-source scheduler bookkeeping.
#[derive(Debug, Default, Clone)]
struct SourceState {
    last_fetch: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    consecutive_errors: u32,
    circuit_open: bool,
}

/// Read-only per-source health snapshot, exposed for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    /// Feed id.
    pub id: String,
    /// Feed display name.
    pub name: String,
    /// Canonical source the feed produces.
    pub source: String,
    /// When a fetch was last attempted.
    pub last_fetch: Option<DateTime<Utc>>,
    /// When a cycle last completed successfully.
    pub last_success: Option<DateTime<Utc>>,
    /// Consecutive fetch failures.
    pub consecutive_errors: u32,
    /// Whether the circuit is currently open.
    pub circuit_open: bool,
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fetch, normalize, and upserts ran.
    Completed {
        /// Records the normalizer produced.
        processed: usize,
        /// Records upserted successfully.
        upserted: usize,
        /// Records whose upsert failed.
        failed: usize,
    },
    /// The circuit was open; nothing was fetched.
    SkippedCircuitOpen,
    /// The fetch failed after all retries.
    FetchFailed {
        /// The underlying error, stringified for diagnostics.
        error: String,
    },
}

/// Outcome of one cycle plus the delay until the next.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    /// What happened.
    pub outcome: CycleOutcome,
    /// When the source should run again.
    pub next_interval: Duration,
}

struct FeedEntry {
    feed: Arc<dyn IncidentFeed>,
    state: Mutex<SourceState>,
}

/// The ingestion engine: owns the feed set, per-source state, and the
/// rebuild path into the spatial lookup engine.
pub struct IngestionEngine {
    store: Arc<dyn IncidentStore>,
    lookup: Arc<SpatialLookupEngine>,
    regions: Arc<RegionClassifier>,
    client: reqwest::Client,
    feeds: HashMap<String, FeedEntry>,
    feed_order: Vec<String>,
    rebuild_in_flight: AtomicBool,
    shutdown: watch::Sender<bool>,
    config: IngestConfig,
}

impl IngestionEngine {
    /// Wires up the engine. All collaborators are injected; the engine does
    /// not construct its own store or lookup engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn IncidentStore>,
        lookup: Arc<SpatialLookupEngine>,
        regions: Arc<RegionClassifier>,
        feeds: Vec<Arc<dyn IncidentFeed>>,
        config: IngestConfig,
    ) -> Self {
        let feed_order: Vec<String> = feeds.iter().map(|feed| feed.id().to_string()).collect();
        let feeds = feeds
            .into_iter()
            .map(|feed| {
                (
                    feed.id().to_string(),
                    FeedEntry {
                        feed,
                        state: Mutex::new(SourceState::default()),
                    },
                )
            })
            .collect();

        let (shutdown, _) = watch::channel(false);

        Self {
            store,
            lookup,
            regions,
            client: reqwest::Client::new(),
            feeds,
            feed_order,
            rebuild_in_flight: AtomicBool::new(false),
            shutdown,
            config,
        }
    }

    /// Spawns one self-rescheduling polling loop per registered feed.
    /// Loops never block each other and run until [`Self::stop`].
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        self.feed_order
            .iter()
            .map(|feed_id| {
                let engine = Arc::clone(&self);
                let feed_id = feed_id.clone();
                tokio::spawn(async move {
                    engine.run_loop(&feed_id).await;
                })
            })
            .collect()
    }

    /// Signals every polling loop to exit after its current cycle.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn run_loop(&self, feed_id: &str) {
        let mut shutdown = self.shutdown.subscribe();
        log::info!("starting polling loop for {feed_id}");

        loop {
            let delay = match self.run_cycle(feed_id).await {
                Ok(summary) => summary.next_interval,
                Err(e) => {
                    // Unknown source inside our own loop is a wiring bug.
                    log::error!("polling loop for {feed_id} stopping: {e}");
                    return;
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("polling loop for {feed_id} shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Runs one fetch/normalize/upsert cycle for a source.
    ///
    /// Per-record failures never abort the batch and cycle failures never
    /// propagate as errors; they feed the circuit breaker and reschedule
    /// with backoff instead.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::UnknownSource`] for an unregistered id.
    ///
    /// # Panics
    ///
    /// Panics if a per-source state lock is poisoned.
    pub async fn run_cycle(&self, source_id: &str) -> Result<CycleSummary, IngestError> {
        let entry = self.feeds.get(source_id).ok_or_else(|| IngestError::UnknownSource {
            id: source_id.to_string(),
        })?;

        // Circuit open: skip this cycle and move to half-open so the run
        // after the cool-down attempts a real fetch. This is how a source
        // self-heals without caller intervention.
        {
            let mut state = entry.state.lock().expect("source state lock poisoned");
            if state.circuit_open {
                state.circuit_open = false;
                log::warn!(
                    "{source_id}: circuit open ({} consecutive errors), skipping cycle",
                    state.consecutive_errors
                );
                return Ok(CycleSummary {
                    outcome: CycleOutcome::SkippedCircuitOpen,
                    next_interval: self.config.circuit_cooldown,
                });
            }
            state.last_fetch = Some(Utc::now());
        }

        let raw = match entry.feed.fetch(&self.client).await {
            Ok(raw) => raw,
            Err(e) => {
                let next_interval = self.record_failure(source_id, entry);
                log::warn!("{source_id}: fetch failed: {e}");
                return Ok(CycleSummary {
                    outcome: CycleOutcome::FetchFailed {
                        error: e.to_string(),
                    },
                    next_interval,
                });
            }
        };

        let incidents = entry.feed.normalize(&raw, &self.regions);
        let processed = incidents.len();

        // Upserts are issued concurrently and collected independently so
        // one bad record cannot block the others.
        let results = futures::future::join_all(incidents.into_iter().map(|incident| {
            let store = Arc::clone(&self.store);
            async move {
                let source = incident.source;
                let source_id = incident.source_id.clone();
                store
                    .upsert(source, &source_id, incident)
                    .await
                    .map_err(|e| (source_id, e))
            }
        }))
        .await;

        let mut upserted = 0usize;
        let mut failed = 0usize;
        for result in results {
            match result {
                Ok(_) => upserted += 1,
                Err((record_id, e)) => {
                    failed += 1;
                    log::warn!("{source_id}: upsert failed for {record_id}: {e}");
                }
            }
        }

        {
            let mut state = entry.state.lock().expect("source state lock poisoned");
            state.last_success = Some(Utc::now());
            state.consecutive_errors = 0;
            state.circuit_open = false;
        }

        self.rebuild_index().await;

        let next_interval = self.next_interval(processed);
        log::info!(
            "{source_id}: cycle complete, {upserted}/{processed} upserted ({failed} failed), \
             next run in {next_interval:?}"
        );

        Ok(CycleSummary {
            outcome: CycleOutcome::Completed {
                processed,
                upserted,
                failed,
            },
            next_interval,
        })
    }

    /// Runs one or all sources' cycles immediately. Used for operational
    /// recovery through the HTTP trigger.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::UnknownSource`] when a specific id is given
    /// and not registered.
    pub async fn force_run(
        &self,
        source_id: Option<&str>,
    ) -> Result<Vec<(String, CycleSummary)>, IngestError> {
        let targets: Vec<String> = match source_id {
            Some(id) => {
                if !self.feeds.contains_key(id) {
                    return Err(IngestError::UnknownSource { id: id.to_string() });
                }
                vec![id.to_string()]
            }
            None => self.feed_order.clone(),
        };

        let mut summaries = Vec::with_capacity(targets.len());
        for id in targets {
            let summary = self.run_cycle(&id).await?;
            summaries.push((id, summary));
        }
        Ok(summaries)
    }

    /// Per-source health snapshots, in registration order.
    ///
    /// # Panics
    ///
    /// Panics if a per-source state lock is poisoned.
    #[must_use]
    pub fn health(&self) -> Vec<SourceHealth> {
        self.feed_order
            .iter()
            .filter_map(|id| self.feeds.get(id))
            .map(|entry| {
                let state = entry.state.lock().expect("source state lock poisoned");
                SourceHealth {
                    id: entry.feed.id().to_string(),
                    name: entry.feed.name().to_string(),
                    source: entry.feed.source().to_string(),
                    last_fetch: state.last_fetch,
                    last_success: state.last_success,
                    consecutive_errors: state.consecutive_errors,
                    circuit_open: state.circuit_open,
                }
            })
            .collect()
    }

    /// The spatial lookup engine this ingestion engine rebuilds.
    #[must_use]
    pub fn lookup(&self) -> &Arc<SpatialLookupEngine> {
        &self.lookup
    }

    /// Records a fetch failure, opens the circuit at the threshold, and
    /// computes the exponential reschedule delay (capped at the cool-down).
    fn record_failure(&self, source_id: &str, entry: &FeedEntry) -> Duration {
        let mut state = entry.state.lock().expect("source state lock poisoned");
        state.consecutive_errors += 1;

        if state.consecutive_errors >= self.config.error_threshold && !state.circuit_open {
            state.circuit_open = true;
            log::error!(
                "{source_id}: circuit opened after {} consecutive errors",
                state.consecutive_errors
            );
        }

        let exponent = state.consecutive_errors.saturating_sub(1).min(16);
        let backoff = self
            .config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(exponent));
        backoff.min(self.config.circuit_cooldown)
    }

    /// Adaptive polling: more activity means a shorter interval, down to the
    /// fast floor; an idle cycle backs off to the slow interval.
    fn next_interval(&self, processed: usize) -> Duration {
        if processed >= self.config.high_activity {
            self.config.fast_poll
        } else if processed > 0 {
            self.config.default_poll
        } else {
            self.config.slow_poll
        }
    }

    /// Rebuilds the spatial index from storage, persisting backfilled
    /// geocell/region metadata so a restart does not recompute it.
    ///
    /// Guarded by an in-flight flag: a concurrent trigger is a logged no-op
    /// and queries keep seeing the previous snapshot until the new one is
    /// installed atomically by `load()`.
    async fn rebuild_index(&self) {
        if self
            .rebuild_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("spatial index rebuild already in flight, skipping trigger");
            return;
        }

        let result = self.rebuild_index_inner().await;
        self.rebuild_in_flight.store(false, Ordering::Release);

        if let Err(e) = result {
            log::error!("spatial index rebuild failed: {e}");
        }
    }

    async fn rebuild_index_inner(
        &self,
    ) -> Result<(), incident_map_storage::StorageError> {
        let mut incidents = self.store.get_all().await?;

        // Persist derived spatial metadata back onto records that lack it.
        for incident in &mut incidents {
            if incident.geocell.is_some() && !incident.region_ids.is_empty() {
                continue;
            }
            if let Some(updated) = self.backfill_spatial(incident) {
                match self
                    .store
                    .upsert(updated.source, &updated.source_id.clone(), updated.clone())
                    .await
                {
                    Ok(stored) => *incident = stored,
                    Err(e) => {
                        log::warn!("failed to persist spatial backfill for {}: {e}", incident.id);
                    }
                }
            }
        }

        self.lookup.load(incidents);
        Ok(())
    }

    /// Fills in missing geocell/region ids from the centroid. Returns the
    /// updated record, or `None` when nothing was missing.
    fn backfill_spatial(&self, incident: &CanonicalIncident) -> Option<CanonicalIncident> {
        let mut updated = incident.clone();
        let mut changed = false;

        if updated.geocell.is_none() {
            updated.geocell = Some(compute_cell(
                updated.centroid_lat,
                updated.centroid_lng,
                DEFAULT_PRECISION,
            ));
            changed = true;
        }
        if updated.region_ids.is_empty() {
            let location = updated.location.clone();
            if let Some(region) = self.regions.classify(
                updated.centroid_lat,
                updated.centroid_lng,
                Some(&location),
            ) {
                updated.region_ids = vec![region.id.clone()];
                changed = true;
            }
        }

        changed.then_some(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use incident_map_incident_models::{
        IncidentCategory, IncidentSeverity, IncidentSource, IncidentStatus, IncidentSubcategory,
    };
    use incident_map_source::SourceError;
    use incident_map_storage::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    /// Test feed: fails while `failures_left > 0`, then serves a fixed
    /// payload of already-canonical records.
    struct ScriptedFeed {
        failures_left: AtomicUsize,
        payload: serde_json::Value,
    }

    impl ScriptedFeed {
        fn new(failures: usize, payload: serde_json::Value) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                payload,
            }
        }
    }

    #[async_trait]
    impl IncidentFeed for ScriptedFeed {
        fn id(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted Feed"
        }

        fn source(&self) -> IncidentSource {
            IncidentSource::RoadTraffic
        }

        async fn fetch(&self, _client: &reqwest::Client) -> Result<serde_json::Value, SourceError> {
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(SourceError::Normalization {
                    message: "scripted failure".to_string(),
                });
            }
            Ok(self.payload.clone())
        }

        fn normalize(
            &self,
            raw: &serde_json::Value,
            _regions: &RegionClassifier,
        ) -> Vec<CanonicalIncident> {
            serde_json::from_value(raw.clone()).unwrap_or_default()
        }
    }

    fn incident(source_id: &str) -> CanonicalIncident {
        CanonicalIncident {
            id: CanonicalIncident::composite_id(IncidentSource::RoadTraffic, source_id),
            source: IncidentSource::RoadTraffic,
            source_id: source_id.to_string(),
            title: "Crash".to_string(),
            description: String::new(),
            location: String::new(),
            category: IncidentCategory::Traffic,
            subcategory: IncidentSubcategory::Accident,
            severity: IncidentSeverity::Medium,
            status: IncidentStatus::Active,
            geometry: None,
            centroid_lat: -27.47,
            centroid_lng: 153.02,
            region_ids: Vec::new(),
            geocell: None,
            incident_time: None,
            last_updated: "2025-06-09T00:00:00Z".parse().unwrap(),
            published_at: None,
            user_id: "system-road-authority".to_string(),
            properties: serde_json::json!({}),
            version: 0,
        }
    }

    fn engine_with(feed: ScriptedFeed, config: IngestConfig) -> Arc<IngestionEngine> {
        Arc::new(IngestionEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SpatialLookupEngine::new()),
            Arc::new(RegionClassifier::builtin()),
            vec![Arc::new(feed) as Arc<dyn IncidentFeed>],
            config,
        ))
    }

    #[tokio::test]
    async fn successful_cycle_upserts_and_rebuilds_index() {
        let payload = serde_json::to_value(vec![incident("e1"), incident("e2")]).unwrap();
        let engine = engine_with(ScriptedFeed::new(0, payload), IngestConfig::default());

        let summary = engine.run_cycle("scripted").await.unwrap();
        assert_eq!(
            summary.outcome,
            CycleOutcome::Completed {
                processed: 2,
                upserted: 2,
                failed: 0,
            }
        );
        assert_eq!(engine.lookup().incident_count(), 2);

        let health = &engine.health()[0];
        assert!(health.last_success.is_some());
        assert_eq!(health.consecutive_errors, 0);
        assert!(!health.circuit_open);
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_recovers() {
        let payload = serde_json::to_value(vec![incident("e1")]).unwrap();
        let config = IngestConfig {
            error_threshold: 3,
            ..IngestConfig::default()
        };
        let engine = engine_with(ScriptedFeed::new(3, payload), config.clone());

        for _ in 0..3 {
            let summary = engine.run_cycle("scripted").await.unwrap();
            assert!(matches!(summary.outcome, CycleOutcome::FetchFailed { .. }));
        }
        assert!(engine.health()[0].circuit_open);

        // The next scheduled run is a no-op skip with the cool-down delay.
        let skipped = engine.run_cycle("scripted").await.unwrap();
        assert_eq!(skipped.outcome, CycleOutcome::SkippedCircuitOpen);
        assert_eq!(skipped.next_interval, config.circuit_cooldown);

        // After the cool-down the feed succeeds: errors reset, circuit closed.
        let recovered = engine.run_cycle("scripted").await.unwrap();
        assert!(matches!(recovered.outcome, CycleOutcome::Completed { .. }));
        let health = &engine.health()[0];
        assert_eq!(health.consecutive_errors, 0);
        assert!(!health.circuit_open);
    }

    #[tokio::test]
    async fn failure_reschedule_backs_off_exponentially() {
        let payload = serde_json::to_value(Vec::<CanonicalIncident>::new()).unwrap();
        let config = IngestConfig {
            error_threshold: 10,
            backoff_base: Duration::from_secs(30),
            circuit_cooldown: Duration::from_secs(600),
            ..IngestConfig::default()
        };
        let engine = engine_with(ScriptedFeed::new(8, payload), config);

        let first = engine.run_cycle("scripted").await.unwrap();
        assert_eq!(first.next_interval, Duration::from_secs(30));

        let second = engine.run_cycle("scripted").await.unwrap();
        assert_eq!(second.next_interval, Duration::from_secs(60));

        let third = engine.run_cycle("scripted").await.unwrap();
        assert_eq!(third.next_interval, Duration::from_secs(120));

        // Capped at the circuit cool-down.
        for _ in 0..5 {
            engine.run_cycle("scripted").await.unwrap();
        }
        let capped = engine.health()[0].consecutive_errors;
        assert_eq!(capped, 8);
    }

    #[tokio::test]
    async fn adaptive_interval_tracks_activity() {
        let config = IngestConfig::default();

        let busy: Vec<CanonicalIncident> =
            (0..30).map(|i| incident(&format!("e{i}"))).collect();
        let engine = engine_with(
            ScriptedFeed::new(0, serde_json::to_value(busy).unwrap()),
            config.clone(),
        );
        let summary = engine.run_cycle("scripted").await.unwrap();
        assert_eq!(summary.next_interval, config.fast_poll);

        let idle = engine_with(
            ScriptedFeed::new(0, serde_json::to_value(Vec::<CanonicalIncident>::new()).unwrap()),
            config.clone(),
        );
        let summary = idle.run_cycle("scripted").await.unwrap();
        assert_eq!(summary.next_interval, config.slow_poll);
    }

    #[tokio::test]
    async fn rebuild_persists_spatial_backfill() {
        let payload = serde_json::to_value(vec![incident("e1")]).unwrap();
        let engine = engine_with(ScriptedFeed::new(0, payload), IngestConfig::default());

        engine.run_cycle("scripted").await.unwrap();

        let stored = engine
            .store
            .get_by_id("road-traffic:e1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.geocell.is_some());
        assert_eq!(stored.region_ids, vec!["brisbane".to_string()]);
    }

    #[tokio::test]
    async fn unknown_source_is_an_error() {
        let payload = serde_json::to_value(Vec::<CanonicalIncident>::new()).unwrap();
        let engine = engine_with(ScriptedFeed::new(0, payload), IngestConfig::default());

        assert!(matches!(
            engine.run_cycle("nope").await,
            Err(IngestError::UnknownSource { .. })
        ));
        assert!(engine.force_run(Some("nope")).await.is_err());
    }

    #[tokio::test]
    async fn force_run_covers_all_sources() {
        let payload = serde_json::to_value(vec![incident("e1")]).unwrap();
        let engine = engine_with(ScriptedFeed::new(0, payload), IngestConfig::default());

        let summaries = engine.force_run(None).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].0, "scripted");
    }

    #[tokio::test]
    async fn idempotent_re_ingestion_updates_in_place() {
        let payload = serde_json::to_value(vec![incident("e1")]).unwrap();
        let engine = engine_with(ScriptedFeed::new(0, payload), IngestConfig::default());

        engine.run_cycle("scripted").await.unwrap();
        engine.run_cycle("scripted").await.unwrap();

        let all = engine.store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        // Backfill persisted once, then the second cycle's upsert.
        assert!(all[0].version >= 2);
    }
}
