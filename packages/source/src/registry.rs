//! Feed registry: loads feed definitions from embedded TOML configs.
//!
//! Each `.toml` file in `packages/source/feeds/` is baked into the binary at
//! compile time via [`include_str!`]. The user-report feed has no config
//! file; it reads from the report store and is appended at build time.

use std::sync::Arc;

use incident_map_incident_models::IncidentSource;
use incident_map_storage::IncidentStore;
use serde::Deserialize;

use crate::emergency_dispatch::EmergencyDispatchFeed;
use crate::road_traffic::RoadTrafficFeed;
use crate::user_report::UserReportFeed;
use crate::{IncidentFeed, SourceError};

/// TOML configs embedded at compile time.
const FEED_TOMLS: &[(&str, &str)] = &[
    ("road_traffic", include_str!("../feeds/road_traffic.toml")),
    (
        "emergency_dispatch",
        include_str!("../feeds/emergency_dispatch.toml"),
    ),
];

/// Configuration for an HTTP-backed feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Unique feed identifier (e.g. `"road-traffic"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Which canonical source this feed produces.
    pub source: IncidentSource,
    /// Endpoint returning the raw payload.
    pub api_url: String,
    /// Optional API key, sent as the `apikey` query parameter.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Returns all HTTP feed configs, parsed from embedded TOML.
///
/// # Panics
///
/// Panics if any TOML config is malformed (the configs are embedded, so
/// this is effectively a compile-time guarantee).
#[must_use]
pub fn http_feed_configs() -> Vec<FeedConfig> {
    FEED_TOMLS
        .iter()
        .map(|(name, raw)| {
            toml::from_str(raw).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Builds the full feed set: every configured HTTP feed plus the
/// store-backed user-report feed.
///
/// # Errors
///
/// Returns [`SourceError::Config`] when a TOML config declares a source
/// type the registry cannot instantiate. This is the one failure allowed to
/// be fatal at startup.
pub fn build_feeds(
    store: Arc<dyn IncidentStore>,
) -> Result<Vec<Arc<dyn IncidentFeed>>, SourceError> {
    let mut feeds: Vec<Arc<dyn IncidentFeed>> = Vec::new();

    for config in http_feed_configs() {
        let feed: Arc<dyn IncidentFeed> = match config.source {
            IncidentSource::RoadTraffic => Arc::new(RoadTrafficFeed::new(config)),
            IncidentSource::EmergencyDispatch => Arc::new(EmergencyDispatchFeed::new(config)),
            IncidentSource::UserSubmitted => {
                return Err(SourceError::Config {
                    message: format!(
                        "feed '{}' declares a user-submitted source; user reports are \
                         store-backed and not configured via TOML",
                        config.id
                    ),
                });
            }
        };
        feeds.push(feed);
    }

    feeds.push(Arc::new(UserReportFeed::new(store)));
    Ok(feeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_map_storage::MemoryStore;

    #[test]
    fn loads_all_http_configs() {
        let configs = http_feed_configs();
        assert_eq!(configs.len(), 2);
    }

    #[test]
    fn config_ids_are_unique() {
        let configs = http_feed_configs();
        let mut ids: Vec<&str> = configs.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), configs.len());
    }

    #[test]
    fn all_configs_have_required_fields() {
        for config in &http_feed_configs() {
            assert!(!config.id.is_empty(), "feed id is empty");
            assert!(!config.name.is_empty(), "feed name is empty");
            assert!(
                config.api_url.starts_with("https://"),
                "{}: api_url is not https",
                config.id
            );
        }
    }

    #[test]
    fn builds_http_feeds_plus_user_reports() {
        let feeds = build_feeds(Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(feeds.len(), 3);

        let sources: Vec<IncidentSource> = feeds.iter().map(|f| f.source()).collect();
        assert!(sources.contains(&IncidentSource::RoadTraffic));
        assert!(sources.contains(&IncidentSource::EmergencyDispatch));
        assert!(sources.contains(&IncidentSource::UserSubmitted));
    }
}
