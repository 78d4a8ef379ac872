//! Daily COVID-19 figures per basic health zone.
//!
//! # General Infrastructure
//! - One axum server exposing zones and their daily records as JSON
//! - Redis holds two collections: zones and daily records, linked by record id
//! - A background task polls the published feed and appends each new day
//!
//!
//!
//! # Routes
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /zonas` | zones ordered by name |
//! | `GET /datosporzona?code=` | a zone's records ordered by date |
//! | `GET /datosdiarios` | every record, deprecated |
//! | `POST /zonasanitaria` | register a zone and import its history from the local feed copy |
//! | `POST /datodiario` | append one day to a zone from its cumulative count |
//! | `POST /actualizarfichero` | replace the local feed copy (multipart `file`) |
//! | `POST /datosporfecha` | fill in one date for every zone, deprecated |
//!
//! Mutating JSON routes require `auth` to match the configured secret.
//!
//!
//!
//! # Feed
//!
//! The feed is re-fetched every 30 seconds by default. See [`poller`] for a tick and
//! [`reconcile`] for how rows become records.
//!
//!
//!
//! # Setup
//!
//! Required environment, everything else has defaults (see [`config`]).
//! ```sh
//! export AUTH=...
//! export CSV_SOURCE=https://...
//! export REDIS_URL=redis://127.0.0.1:6379
//! cargo run -p incidence
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod poller;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;

use config::Config;
use database::RedisStore;
use poller::spawn_poller;
use routes::{
    backfill_handler, daily_record_handler, daily_records_handler, upload_handler,
    zone_handler, zone_records_handler, zones_handler,
};
use state::AppState;
use store::Store;

pub fn build_router<S: Store>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let upload_limit = DefaultBodyLimit::max(state.config.upload_limit);

    Router::new()
        .route("/datosdiarios", get(daily_records_handler::<S>))
        .route("/datodiario", post(daily_record_handler::<S>))
        .route("/zonasanitaria", post(zone_handler::<S>))
        .route("/datosporzona", get(zone_records_handler::<S>))
        .route("/zonas", get(zones_handler::<S>))
        .route(
            "/actualizarfichero",
            post(upload_handler::<S>).layer(upload_limit),
        )
        .route("/datosporfecha", post(backfill_handler::<S>))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading configuration...");
    let config = Config::load()?;

    info!("Connecting to Redis...");
    let store = RedisStore::connect(&config.redis_url, &config.redis_prefix).await?;
    let state = AppState::new(config, store)?;

    let poller = spawn_poller(state.clone());

    info!("Starting server...");
    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(poller) = poller {
        poller.abort();
    }

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
