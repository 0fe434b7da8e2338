use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::cities::store::within_budget;
use crate::state::AppState;

/// GET /health
/// Reports service version plus record-store and prediction-service reachability.
/// The prediction flag is informational: the API keeps serving without it.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let (database, predictions) = tokio::join!(
        within_budget(state.config.store_timeout, state.store.ping()),
        state.probe.is_available(),
    );

    Json(json!({
        "status": if database.is_ok() { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "service": "citywise-api",
        "database": database.is_ok(),
        "prediction_service": predictions,
    }))
}
