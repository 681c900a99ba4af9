//! Attribution resolution.
//!
//! Maps `(source, optional user hint, source metadata)` to the owning
//! identity of an incident. System and agency feeds map to a small fixed set
//! of well-known identities, never to an arbitrary end user. Total over the
//! source enum; the unresolvable-source case of looser systems is
//! unrepresentable here.

use incident_map_incident_models::IncidentSource;

/// Identity owning all road-traffic feed records.
pub const ROAD_AUTHORITY_ID: &str = "system-road-authority";

/// Fire and rescue service identity.
pub const FIRE_RESCUE_ID: &str = "agency-fire-rescue";

/// State emergency service identity (storm/flood response).
pub const STATE_EMERGENCY_ID: &str = "agency-state-emergency";

/// Ambulance service identity.
pub const AMBULANCE_ID: &str = "agency-ambulance";

/// Police service identity.
pub const POLICE_ID: &str = "agency-police";

/// Fallback identity when dispatch metadata is inconclusive.
pub const DEFAULT_EMERGENCY_AGENCY_ID: &str = "agency-emergency-services";

/// Identity owning records bridged from the legacy report table.
pub const LEGACY_IMPORT_ID: &str = "system-legacy-import";

/// A resolved owning identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    /// The owning user or system identity. Never empty.
    pub owner_id: String,
    /// `true` when the owner is a system/agency identity rather than a
    /// real user.
    pub is_system_account: bool,
}

/// Errors from attribution resolution.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AttributionError {
    /// A user-submitted record arrived without a user hint. This is a caller
    /// contract violation, not a recoverable case.
    #[error("user-submitted incident has no submitting user")]
    MissingUser,
}

/// Resolves the owning identity for an incident.
///
/// - User submissions belong to the hinted user.
/// - Road-traffic records belong to the fixed road-authority identity.
/// - Emergency-dispatch records belong to an agency chosen from
///   jurisdiction hints in the metadata, defaulting to the generic
///   emergency-services identity when the metadata is inconclusive.
///
/// # Errors
///
/// Returns [`AttributionError::MissingUser`] when a user-submitted record
/// carries no user hint.
pub fn resolve(
    source: IncidentSource,
    user_hint: Option<&str>,
    metadata: &serde_json::Value,
) -> Result<Attribution, AttributionError> {
    match source {
        IncidentSource::UserSubmitted => {
            let user = user_hint
                .map(str::trim)
                .filter(|hint| !hint.is_empty())
                .ok_or(AttributionError::MissingUser)?;
            Ok(Attribution {
                owner_id: user.to_string(),
                is_system_account: false,
            })
        }
        IncidentSource::RoadTraffic => Ok(Attribution {
            owner_id: ROAD_AUTHORITY_ID.to_string(),
            is_system_account: true,
        }),
        IncidentSource::EmergencyDispatch => Ok(Attribution {
            owner_id: emergency_agency(metadata).to_string(),
            is_system_account: true,
        }),
    }
}

/// Picks the agency identity for a dispatch record from jurisdiction hints.
fn emergency_agency(metadata: &serde_json::Value) -> &'static str {
    let hint = ["jurisdiction", "agency", "service"]
        .iter()
        .filter_map(|key| metadata.get(key).and_then(serde_json::Value::as_str))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if hint.is_empty() {
        return DEFAULT_EMERGENCY_AGENCY_ID;
    }
    if hint.contains("fire") || hint.contains("qfes") {
        return FIRE_RESCUE_ID;
    }
    if hint.contains("ses") || hint.contains("storm") {
        return STATE_EMERGENCY_ID;
    }
    if hint.contains("ambulance") || hint.contains("medical") || hint.contains("qas") {
        return AMBULANCE_ID;
    }
    if hint.contains("police") || hint.contains("qps") {
        return POLICE_ID;
    }
    DEFAULT_EMERGENCY_AGENCY_ID
}
