#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident persistence interface.
//!
//! The ingestion core does not own persistence; it consumes the
//! [`IncidentStore`] trait. [`MemoryStore`] is the bundled implementation,
//! used by the server binary and tests; deployments with a relational store
//! implement the same trait against their own table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use incident_map_incident_models::{CanonicalIncident, IncidentSource};
use tokio::sync::RwLock;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The record's own composite id disagrees with the keying pair.
    #[error("record id {record_id} does not match upsert key {key}")]
    IdMismatch {
        /// Id carried by the record.
        record_id: String,
        /// Composite id derived from the upsert arguments.
        key: String,
    },

    /// Backend-specific failure (connection loss, serialization, etc.).
    #[error("store backend error: {message}")]
    Backend {
        /// Description of what went wrong.
        message: String,
    },
}

/// The persistence collaborator consumed by the ingestion core.
///
/// Keyed by composite id (`source:sourceId`). `upsert` must be
/// identity-stable: re-ingesting the same `(source, sourceId)` pair updates
/// the existing record in place and increments its version, never creating
/// a duplicate.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Returns every stored incident.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend read fails.
    async fn get_all(&self) -> Result<Vec<CanonicalIncident>, StorageError>;

    /// Returns the incident with the given composite id, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend read fails.
    async fn get_by_id(&self, id: &str) -> Result<Option<CanonicalIncident>, StorageError>;

    /// Inserts or updates a record keyed by `(source, source_id)`.
    ///
    /// When the existing record at the composite id came from an official
    /// feed and the incoming record is user-submitted, the write is skipped
    /// and the existing record returned unchanged: the first authoritative
    /// record wins. How composite ids come to collide across sources is
    /// product-defined behavior; this method only preserves it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the record's id disagrees with the keying
    /// pair or the backend write fails.
    async fn upsert(
        &self,
        source: IncidentSource,
        source_id: &str,
        record: CanonicalIncident,
    ) -> Result<CanonicalIncident, StorageError>;

    /// Deletes the incident with the given composite id. Returns `true` if a
    /// record was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend write fails.
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;
}

/// In-memory [`IncidentStore`] backed by a `BTreeMap` under an async
/// read-write lock.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, CanonicalIncident>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` when no records are stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn get_all(&self) -> Result<Vec<CanonicalIncident>, StorageError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<CanonicalIncident>, StorageError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn upsert(
        &self,
        source: IncidentSource,
        source_id: &str,
        mut record: CanonicalIncident,
    ) -> Result<CanonicalIncident, StorageError> {
        let key = CanonicalIncident::composite_id(source, source_id);
        if record.id != key {
            return Err(StorageError::IdMismatch {
                record_id: record.id,
                key,
            });
        }

        let mut records = self.records.write().await;

        if let Some(existing) = records.get(&key) {
            if existing.source.is_official()
                && record.source == IncidentSource::UserSubmitted
            {
                log::info!(
                    "Skipping user-submitted upsert for {key}: official {} record wins",
                    existing.source
                );
                return Ok(existing.clone());
            }

            record.version = existing.version + 1;
        } else {
            record.version = 1;
        }

        records.insert(key, record.clone());
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone as _, Utc};
    use incident_map_incident_models::{
        IncidentCategory, IncidentSeverity, IncidentStatus, IncidentSubcategory,
    };

    fn incident(source: IncidentSource, source_id: &str) -> CanonicalIncident {
        CanonicalIncident {
            id: CanonicalIncident::composite_id(source, source_id),
            source,
            source_id: source_id.to_string(),
            title: "Test incident".to_string(),
            description: String::new(),
            location: "Brisbane City".to_string(),
            category: IncidentCategory::Traffic,
            subcategory: IncidentSubcategory::Accident,
            severity: IncidentSeverity::Medium,
            status: IncidentStatus::Active,
            geometry: None,
            centroid_lat: -27.47,
            centroid_lng: 153.02,
            region_ids: vec!["brisbane".to_string()],
            geocell: None,
            incident_time: None,
            last_updated: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            published_at: None,
            user_id: "system-road-authority".to_string(),
            properties: serde_json::json!({}),
            version: 0,
        }
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_in_place() {
        let store = MemoryStore::new();

        let first = store
            .upsert(IncidentSource::RoadTraffic, "e1", incident(IncidentSource::RoadTraffic, "e1"))
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        let mut changed = incident(IncidentSource::RoadTraffic, "e1");
        changed.title = "Updated".to_string();
        let second = store
            .upsert(IncidentSource::RoadTraffic, "e1", changed)
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.title, "Updated");

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn official_record_beats_user_submission() {
        let store = MemoryStore::new();

        let official = store
            .upsert(
                IncidentSource::EmergencyDispatch,
                "x1",
                incident(IncidentSource::EmergencyDispatch, "x1"),
            )
            .await
            .unwrap();

        // A user-submitted record resolving to the same composite id must
        // not overwrite the official one.
        let mut user = incident(IncidentSource::EmergencyDispatch, "x1");
        user.source = IncidentSource::UserSubmitted;
        user.title = "User overwrite attempt".to_string();

        let returned = store
            .upsert(IncidentSource::EmergencyDispatch, "x1", user)
            .await
            .unwrap();

        assert_eq!(returned, official);
        let stored = store.get_by_id(&official.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Test incident");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn user_records_update_normally() {
        let store = MemoryStore::new();

        store
            .upsert(
                IncidentSource::UserSubmitted,
                "r1",
                incident(IncidentSource::UserSubmitted, "r1"),
            )
            .await
            .unwrap();
        let updated = store
            .upsert(
                IncidentSource::UserSubmitted,
                "r1",
                incident(IncidentSource::UserSubmitted, "r1"),
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn rejects_mismatched_record_id() {
        let store = MemoryStore::new();
        let mut bad = incident(IncidentSource::RoadTraffic, "e1");
        bad.id = "road-traffic:other".to_string();

        let err = store.upsert(IncidentSource::RoadTraffic, "e1", bad).await;
        assert!(matches!(err, Err(StorageError::IdMismatch { .. })));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = MemoryStore::new();
        let stored = store
            .upsert(IncidentSource::RoadTraffic, "e1", incident(IncidentSource::RoadTraffic, "e1"))
            .await
            .unwrap();

        assert!(store.delete(&stored.id).await.unwrap());
        assert!(!store.delete(&stored.id).await.unwrap());
        assert!(store.get_by_id(&stored.id).await.unwrap().is_none());
    }
}
