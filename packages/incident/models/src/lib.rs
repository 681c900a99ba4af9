#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical incident record and the shared category taxonomy.
//!
//! Every feed (road traffic, emergency dispatch, user submissions) normalizes
//! its source-specific payload into [`CanonicalIncident`] records that conform
//! to the taxonomy defined here. The composite id `source:sourceId` is the
//! primary key across the entire system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The origin feed of an incident record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum IncidentSource {
    /// Road authority traffic event feed
    RoadTraffic,
    /// Emergency services dispatch feed
    EmergencyDispatch,
    /// Reports submitted by end users
    UserSubmitted,
}

impl IncidentSource {
    /// Returns `true` for feeds operated by an authority rather than end
    /// users. Official records win precedence conflicts against
    /// user-submitted ones.
    #[must_use]
    pub const fn is_official(self) -> bool {
        matches!(self, Self::RoadTraffic | Self::EmergencyDispatch)
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::RoadTraffic, Self::EmergencyDispatch, Self::UserSubmitted]
    }
}

/// Severity level for an incident, from 1 (low) to 4 (critical).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum IncidentSeverity {
    /// Level 1: minor disruption, no response urgency
    Low = 1,
    /// Level 2: default for events without stronger signals
    Medium = 2,
    /// Level 3: significant impact or active response
    High = 3,
    /// Level 4: blocked roads, major emergency presence
    Critical = 4,
}

impl IncidentSeverity {
    /// Returns the numeric value of this severity level.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Creates a severity level from a numeric value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not in the range 1-4.
    pub const fn from_value(value: u8) -> Result<Self, InvalidSeverityError> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            4 => Ok(Self::Critical),
            _ => Err(InvalidSeverityError { value }),
        }
    }
}

/// Error returned when attempting to create an [`IncidentSeverity`] from an
/// invalid numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSeverityError {
    /// The invalid severity value that was provided.
    pub value: u8,
}

impl std::fmt::Display for InvalidSeverityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid severity value {}: expected 1-4", self.value)
    }
}

impl std::error::Error for InvalidSeverityError {}

/// Lifecycle status of an incident.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum IncidentStatus {
    /// The incident is ongoing
    Active,
    /// The incident has been resolved
    Resolved,
    /// Being watched but not currently disruptive
    Monitoring,
    /// Closed out administratively
    Closed,
}

impl IncidentStatus {
    /// Returns `true` for statuses that count as "active" in queries
    /// (active or monitoring).
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::Monitoring)
    }
}

/// Top-level incident category groupings.
///
/// Each variant maps to a set of more specific subcategories defined in
/// [`IncidentSubcategory`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum IncidentCategory {
    /// Road network events (closures, congestion, crashes, roadwork)
    Traffic,
    /// Emergency service responses (fire, rescue, hazmat, medical)
    Emergency,
    /// Issues reported by residents
    Community,
    /// Utility and infrastructure faults
    Infrastructure,
}

impl IncidentCategory {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Traffic,
            Self::Emergency,
            Self::Community,
            Self::Infrastructure,
        ]
    }
}

/// Specific incident subcategories within each top-level
/// [`IncidentCategory`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum IncidentSubcategory {
    // ── Traffic ─────────────────────────────────────────
    /// Road fully or partially closed
    RoadClosure,
    /// Heavy or unusual traffic flow
    Congestion,
    /// Vehicle crash or collision
    Accident,
    /// Planned roadworks
    Roadwork,
    /// Traffic events that fit no other subcategory
    TrafficOther,

    // ── Emergency ───────────────────────────────────────
    /// Rescue operations and vehicle crash responses
    RescueCrash,
    /// Power, gas, and utility hazards
    UtilityHazard,
    /// Storm damage and flooding
    StormFlood,
    /// Medical emergencies
    MedicalEmergency,
    /// Hazardous material incidents
    Hazmat,
    /// Structure and landscape fires
    Fire,
    /// Police operations
    PoliceOperation,
    /// Generic emergency response
    EmergencyResponse,

    // ── Community ───────────────────────────────────────
    /// Resident-reported local issue
    CommunityIssue,

    // ── Infrastructure ──────────────────────────────────
    /// Broken or failed public infrastructure
    InfrastructureFault,
}

impl IncidentSubcategory {
    /// Returns the parent [`IncidentCategory`] for this subcategory.
    #[must_use]
    pub const fn category(self) -> IncidentCategory {
        match self {
            Self::RoadClosure
            | Self::Congestion
            | Self::Accident
            | Self::Roadwork
            | Self::TrafficOther => IncidentCategory::Traffic,

            Self::RescueCrash
            | Self::UtilityHazard
            | Self::StormFlood
            | Self::MedicalEmergency
            | Self::Hazmat
            | Self::Fire
            | Self::PoliceOperation
            | Self::EmergencyResponse => IncidentCategory::Emergency,

            Self::CommunityIssue => IncidentCategory::Community,

            Self::InfrastructureFault => IncidentCategory::Infrastructure,
        }
    }

    /// Returns the default severity for this subcategory, used when a feed
    /// carries no stronger severity signal.
    #[must_use]
    pub const fn default_severity(self) -> IncidentSeverity {
        match self {
            Self::RoadClosure | Self::Fire | Self::Hazmat => IncidentSeverity::High,
            Self::Accident
            | Self::RescueCrash
            | Self::StormFlood
            | Self::MedicalEmergency
            | Self::UtilityHazard
            | Self::InfrastructureFault => IncidentSeverity::Medium,
            Self::Congestion
            | Self::Roadwork
            | Self::TrafficOther
            | Self::PoliceOperation
            | Self::EmergencyResponse
            | Self::CommunityIssue => IncidentSeverity::Low,
        }
    }

    /// Returns all subcategories belonging to the given top-level category.
    #[must_use]
    pub fn for_category(category: IncidentCategory) -> Vec<Self> {
        Self::all()
            .iter()
            .copied()
            .filter(|sub| sub.category() == category)
            .collect()
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::RoadClosure,
            Self::Congestion,
            Self::Accident,
            Self::Roadwork,
            Self::TrafficOther,
            Self::RescueCrash,
            Self::UtilityHazard,
            Self::StormFlood,
            Self::MedicalEmergency,
            Self::Hazmat,
            Self::Fire,
            Self::PoliceOperation,
            Self::EmergencyResponse,
            Self::CommunityIssue,
            Self::InfrastructureFault,
        ]
    }
}

/// An incident normalized to the canonical schema.
///
/// All feeds produce this type after parsing and mapping their
/// source-specific formats. The centroid is always present and in valid
/// range; records whose geometry yields no centroid are dropped before
/// they reach storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalIncident {
    /// Composite primary key: `source:sourceId`.
    pub id: String,
    /// Which feed produced this record.
    pub source: IncidentSource,
    /// Identifier assigned by the origin feed (or a generated fallback).
    pub source_id: String,
    /// Short human-readable title.
    pub title: String,
    /// Longer free-text description.
    pub description: String,
    /// Free-text location (street, suburb, landmark).
    pub location: String,
    /// Top-level category.
    pub category: IncidentCategory,
    /// Specific subcategory.
    pub subcategory: IncidentSubcategory,
    /// Severity level.
    pub severity: IncidentSeverity,
    /// Lifecycle status.
    pub status: IncidentStatus,
    /// Original spatial shape as received from the feed.
    pub geometry: Option<geojson::Geometry>,
    /// Representative latitude derived from `geometry`. Always in [-90, 90].
    pub centroid_lat: f64,
    /// Representative longitude derived from `geometry`. Always in [-180, 180].
    pub centroid_lng: f64,
    /// Region identifiers containing the centroid. May be empty.
    pub region_ids: Vec<String>,
    /// Grid-cell key computed from the centroid. Backfilled on index load
    /// when absent.
    pub geocell: Option<String>,
    /// When the incident occurred, if the feed reports it.
    pub incident_time: Option<DateTime<Utc>>,
    /// Last observed change; drives change detection and cache invalidation.
    pub last_updated: DateTime<Utc>,
    /// When the feed first published the record.
    pub published_at: Option<DateTime<Utc>>,
    /// Owning identity. Always resolved, never empty.
    pub user_id: String,
    /// Free-form source payload, annotated with `source` and `userAuthored`.
    pub properties: serde_json::Value,
    /// Optimistic-concurrency counter, incremented on every update.
    pub version: i64,
}

impl CanonicalIncident {
    /// Builds the composite primary key for a `(source, sourceId)` pair.
    #[must_use]
    pub fn composite_id(source: IncidentSource, source_id: &str) -> String {
        format!("{source}:{source_id}")
    }

    /// Returns `true` if the record was authored by an end user rather than
    /// an official feed.
    #[must_use]
    pub const fn is_user_authored(&self) -> bool {
        matches!(self.source, IncidentSource::UserSubmitted)
    }
}
