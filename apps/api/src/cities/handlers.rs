use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::aggregation::assembler::CityPage;
use crate::aggregation::pagination::PaginationPolicy;
use crate::cities::query::{parse_user_id, CityListParams, CityQuery};
use crate::cities::store::{within_budget, CityRef};
use crate::errors::AppError;
use crate::models::city::EnrichedCityRecord;
use crate::models::user::SavedCityRow;
use crate::response::ApiResponse;
use crate::state::AppState;

const LISTING_MAX_LIMIT: u32 = 100;
const SEARCH_MAX_LIMIT: u32 = 50;
const PERSONALIZED_MAX_LIMIT: u32 = 50;
const SAVED_MAX_LIMIT: u32 = 200;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct UserParams {
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PersonalizedRequest {
    pub preferences: Option<Value>,
    /// Number or numeric string; normalized like the query-string variant.
    pub page: Option<Value>,
    pub limit: Option<Value>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveCityRequest {
    pub city_id: String,
}

fn policy(state: &AppState, max_limit: u32) -> PaginationPolicy {
    PaginationPolicy::new(state.config.default_page_limit, max_limit)
}

/// JSON bodies may carry pagination as numbers or strings.
fn raw_number(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Unwraps a JSON body, turning axum's rejection into the error envelope.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

fn parse_uuid(param: &'static str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidParam {
        param,
        message: format!("{param} '{raw}' is not a valid UUID"),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/cities
pub async fn handle_list_cities(
    State(state): State<AppState>,
    Query(params): Query<CityListParams>,
) -> Result<ApiResponse<CityPage>, AppError> {
    let query = CityQuery::from_params(&params)?;
    let user_id = parse_user_id(params.user_id.as_deref())?;
    let window =
        policy(&state, LISTING_MAX_LIMIT).resolve(params.page.as_deref(), params.limit.as_deref());

    let mut page = state.assembler.listing(&query, window).await?;
    state
        .assembler
        .annotate_saved(user_id, &mut page.cities)
        .await?;

    Ok(ApiResponse::ok("Cities retrieved successfully", page))
}

/// GET /api/v1/cities/search?q=
///
/// Same pipeline as the listing, restricted to names containing `q`.
pub async fn handle_search_cities(
    State(state): State<AppState>,
    Query(params): Query<CityListParams>,
) -> Result<ApiResponse<CityPage>, AppError> {
    let query = CityQuery::from_params(&params)?;
    if query.filter.search.is_none() {
        return Err(AppError::Validation(
            "Search term 'q' is required".to_string(),
        ));
    }
    let user_id = parse_user_id(params.user_id.as_deref())?;
    let window =
        policy(&state, SEARCH_MAX_LIMIT).resolve(params.page.as_deref(), params.limit.as_deref());

    let mut page = state.assembler.listing(&query, window).await?;
    state
        .assembler
        .annotate_saved(user_id, &mut page.cities)
        .await?;

    Ok(ApiResponse::ok("Search completed successfully", page))
}

/// GET /api/v1/cities/:id_or_slug
pub async fn handle_get_city(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<UserParams>,
) -> Result<ApiResponse<EnrichedCityRecord>, AppError> {
    let user_id = parse_user_id(params.user_id.as_deref())?;
    let mut city = state.assembler.city(&CityRef::parse(&key)).await?;
    state
        .assembler
        .annotate_saved(user_id, std::slice::from_mut(&mut city))
        .await?;

    Ok(ApiResponse::ok("City retrieved successfully", city))
}

/// POST /api/v1/cities/personalized
///
/// The prediction service paginates this listing itself; its pagination block
/// is returned unchanged.
pub async fn handle_personalized_cities(
    State(state): State<AppState>,
    payload: Result<Json<PersonalizedRequest>, JsonRejection>,
) -> Result<ApiResponse<CityPage>, AppError> {
    let request = json_body(payload)?;
    let user_id = parse_user_id(request.user_id.as_deref())?;
    let preferences = match request.preferences {
        Some(preferences @ Value::Object(_)) => preferences,
        _ => {
            return Err(AppError::Validation(
                "preferences must be a JSON object".to_string(),
            ))
        }
    };
    let window = policy(&state, PERSONALIZED_MAX_LIMIT).resolve(
        raw_number(request.page.as_ref()).as_deref(),
        raw_number(request.limit.as_ref()).as_deref(),
    );

    let mut page = state.assembler.personalized(&preferences, window).await?;
    state
        .assembler
        .annotate_saved(user_id, &mut page.cities)
        .await?;

    Ok(ApiResponse::ok("Personalized cities retrieved successfully", page))
}

/// GET /api/v1/users/:user_id/saved-cities
pub async fn handle_list_saved(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<ApiResponse<CityPage>, AppError> {
    let user_id = parse_uuid("user_id", &user_id)?;
    let window =
        policy(&state, SAVED_MAX_LIMIT).resolve(params.page.as_deref(), params.limit.as_deref());

    let page = state.assembler.saved_page(user_id, window).await?;
    Ok(ApiResponse::ok("Saved cities retrieved successfully", page))
}

/// POST /api/v1/users/:user_id/saved-cities
pub async fn handle_save_city(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<SaveCityRequest>, JsonRejection>,
) -> Result<ApiResponse<SavedCityRow>, AppError> {
    let user_id = parse_uuid("user_id", &user_id)?;
    let city_id = parse_uuid("city_id", &json_body(payload)?.city_id)?;
    let budget = state.config.store_timeout;

    within_budget(budget, state.store.get(&CityRef::Id(city_id)))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("City {city_id} not found")))?;

    let row = within_budget(budget, state.saved.save(user_id, city_id)).await?;
    tracing::info!("User {user_id} saved city {city_id}");

    Ok(ApiResponse::created("City saved successfully", row))
}

/// DELETE /api/v1/users/:user_id/saved-cities/:city_id
pub async fn handle_unsave_city(
    State(state): State<AppState>,
    Path((user_id, city_id)): Path<(String, String)>,
) -> Result<ApiResponse<Value>, AppError> {
    let user_id = parse_uuid("user_id", &user_id)?;
    let city_id = parse_uuid("city_id", &city_id)?;

    let removed = within_budget(
        state.config.store_timeout,
        state.saved.unsave(user_id, city_id),
    )
    .await?;
    if !removed {
        return Err(AppError::NotFound(format!(
            "City {city_id} is not in the saved list"
        )));
    }

    Ok(ApiResponse::ok(
        "City removed from saved list",
        json!({ "city_id": city_id }),
    ))
}
