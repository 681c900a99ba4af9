#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the incident map.
//!
//! Wires the composition root (store, region classifier, spatial lookup
//! engine, feed registry, ingestion engine), then serves the query API and
//! the operational ingestion trigger. The ingestion engine is an injected
//! service with explicit start/stop, owned here.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use incident_map_ingest::{IngestConfig, IngestionEngine};
use incident_map_query::SpatialLookupEngine;
use incident_map_source::registry;
use incident_map_spatial::RegionClassifier;
use incident_map_storage::{IncidentStore, MemoryStore};

/// Shared application state.
pub struct AppState {
    /// The ingestion engine, which owns the spatial lookup engine.
    pub ingest: Arc<IngestionEngine>,
}

/// Starts the incident map API server.
///
/// Builds the composition root, starts the per-source polling loops, and
/// runs the HTTP server until shutdown, then stops the polling loops. This
/// is a regular async function; the caller provides the runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
///
/// # Panics
///
/// Panics if the embedded feed registry is misconfigured; that is the one
/// failure allowed to be fatal at startup.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let store: Arc<dyn IncidentStore> = Arc::new(MemoryStore::new());
    let lookup = Arc::new(SpatialLookupEngine::new());
    let regions = Arc::new(RegionClassifier::builtin());

    let feeds = registry::build_feeds(Arc::clone(&store)).expect("invalid feed configuration");
    log::info!("registered {} feeds", feeds.len());

    let ingest = Arc::new(IngestionEngine::new(
        store,
        lookup,
        regions,
        feeds,
        IngestConfig::default(),
    ));
    let loops = Arc::clone(&ingest).start();

    let state = web::Data::new(AppState {
        ingest: Arc::clone(&ingest),
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    let result = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route("/incidents", web::get().to(handlers::incidents))
                    .route("/sources", web::get().to(handlers::sources))
                    .route("/ingest/run", web::post().to(handlers::ingest_run)),
            )
    })
    .bind((bind_addr, port))?
    .run()
    .await;

    log::info!("Server stopped, shutting down polling loops");
    ingest.stop();
    for handle in loops {
        handle.abort();
    }

    result
}
