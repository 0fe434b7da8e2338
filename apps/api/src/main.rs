mod aggregation;
mod cities;
mod config;
mod db;
mod errors;
mod models;
mod prediction_client;
mod response;
mod routes;
mod state;
#[cfg(test)]
mod testing;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::aggregation::assembler::{AssemblerSettings, ResultAssembler};
use crate::aggregation::probe::AvailabilityProbe;
use crate::cities::store::PgCityStore;
use crate::config::Config;
use crate::db::create_pool;
use crate::prediction_client::PredictionClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Citywise API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config).await?;
    let store = Arc::new(PgCityStore::new(db));

    // Initialize prediction client
    let predictions = Arc::new(PredictionClient::new(
        config.prediction_api_url.clone(),
        config.prediction_timeout,
    )?);
    info!(
        "Prediction client initialized (base url: {})",
        predictions.base_url()
    );

    let probe = Arc::new(AvailabilityProbe::new(
        predictions.clone(),
        config.probe_timeout,
        config.probe_ttl,
    ));

    let assembler = ResultAssembler::new(
        store.clone(),
        store.clone(),
        predictions,
        probe.clone(),
        AssemblerSettings {
            prediction_timeout: config.prediction_timeout,
            store_timeout: config.store_timeout,
            prediction_fetch_limit: config.prediction_fetch_limit,
        },
    );

    // Build app state
    let state = AppState {
        assembler,
        store: store.clone(),
        saved: store,
        probe,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
