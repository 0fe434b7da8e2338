pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::cities::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Cities
        .route("/api/v1/cities", get(handlers::handle_list_cities))
        .route("/api/v1/cities/search", get(handlers::handle_search_cities))
        .route(
            "/api/v1/cities/personalized",
            post(handlers::handle_personalized_cities),
        )
        .route("/api/v1/cities/:key", get(handlers::handle_get_city))
        // Saved cities
        .route(
            "/api/v1/users/:user_id/saved-cities",
            get(handlers::handle_list_saved).post(handlers::handle_save_city),
        )
        .route(
            "/api/v1/users/:user_id/saved-cities/:city_id",
            delete(handlers::handle_unsave_city),
        )
        .with_state(state)
}
