#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident feed trait and normalization logic.
//!
//! Each feed implements the [`IncidentFeed`] trait to define how raw data is
//! fetched and mapped to the canonical incident shape. Normalizers are pure
//! transforms: raw payload in, canonical records out, with the centroid,
//! geocell, region ids, and owning identity resolved along the way.

pub mod attribution;
pub mod emergency_dispatch;
pub mod geometry;
pub mod parsing;
pub mod registry;
pub mod retry;
pub mod road_traffic;
pub mod user_report;

use async_trait::async_trait;
use incident_map_incident_models::{CanonicalIncident, IncidentSource};
use incident_map_spatial::RegionClassifier;

/// Events older than this window (by published/updated timestamp) are
/// filtered out during normalization. Events without any timestamp are kept
/// and treated as still relevant.
pub const RECENCY_WINDOW_DAYS: i64 = 7;

/// Errors that can occur during feed operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading from the upstream store failed.
    #[error("store read failed: {0}")]
    Storage(#[from] incident_map_storage::StorageError),

    /// Feed registration/configuration error.
    #[error("feed configuration error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },

    /// Data normalization error.
    #[error("Normalization error: {message}")]
    Normalization {
        /// Description of what went wrong.
        message: String,
    },
}

/// Trait that all incident feeds must implement.
///
/// Each feed knows how to fetch its raw payload and normalize it into
/// canonical incidents. Normalization never fails: malformed payloads yield
/// an empty list (logged as a warning) and malformed individual records are
/// dropped without discarding the rest of the batch.
#[async_trait]
pub trait IncidentFeed: Send + Sync {
    /// Returns a unique identifier for this feed (e.g. `"road-traffic"`).
    fn id(&self) -> &str;

    /// Returns the human-readable name of this feed.
    fn name(&self) -> &str;

    /// Returns which canonical source this feed produces.
    fn source(&self) -> IncidentSource;

    /// Fetches the raw payload for one polling cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the fetch fails after all retries.
    async fn fetch(&self, client: &reqwest::Client) -> Result<serde_json::Value, SourceError>;

    /// Normalizes a raw payload into canonical incidents.
    fn normalize(
        &self,
        raw: &serde_json::Value,
        regions: &RegionClassifier,
    ) -> Vec<CanonicalIncident>;
}
