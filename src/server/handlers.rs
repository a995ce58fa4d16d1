use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{parse_choice, Item, ItemFilter, DEFAULT_MAX_PRICE, DEFAULT_MIN_PRICE};
use crate::location::{
    Coordinate, DistrictInfo, DistrictMatch, LocationError, LocationProvider, LocationReading, LocationSource, ResolveError,
};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    message: String,
    reason: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
            code: self.status.as_u16(),
            reason: self.reason,
        };
        (self.status, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError { status, message: msg.into(), reason: None }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        let status = match &e {
            ResolveError::NoLocationAvailable(LocationError::InvalidCoordinate { .. }) => StatusCode::BAD_REQUEST,
            ResolveError::NoLocationAvailable(_) | ResolveError::EmptyRegistry => StatusCode::SERVICE_UNAVAILABLE,
            ResolveError::InaccurateReading { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };
        ApiError { status, message: e.to_string(), reason: Some(e.reason()) }
    }
}

// ─── GET /api/nearest ────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct NearestQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub accuracy: Option<f64>,
}

/// Resolve a fix reported by the client device.
pub async fn nearest(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearestQuery>,
) -> Result<Json<DistrictMatch>, ApiError> {
    let start = Instant::now();

    let (Some(lat), Some(lon)) = (params.lat, params.lon) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Provide 'lat' and 'lon' parameters"));
    };
    let coordinate = Coordinate::new(lat, lon).map_err(ResolveError::from)?;
    let reading = LocationReading::now(coordinate, params.accuracy.unwrap_or(0.0), LocationSource::Manual);

    let found = state.resolver.resolve_reading(reading)?;

    tracing::info!(
        "GET /api/nearest lat={} lon={} -> {} ({:.1}ms)",
        lat,
        lon,
        found.district,
        start.elapsed().as_secs_f64() * 1000.0,
    );
    Ok(Json(found))
}

// ─── GET /api/detect ─────────────────────────────────────────────

/// Resolve using the provider selected for this server.
pub async fn detect(State(state): State<Arc<AppState>>) -> Result<Json<DistrictMatch>, ApiError> {
    let start = Instant::now();

    let found = state.resolver.find_nearest_district().await.map_err(|e| {
        tracing::warn!(provider = state.resolver.provider().name(), "GET /api/detect failed: {}", e);
        ApiError::from(e)
    })?;

    tracing::info!(
        "GET /api/detect via {} -> {} ({:.1}ms)",
        state.resolver.provider().name(),
        found.district,
        start.elapsed().as_secs_f64() * 1000.0,
    );
    Ok(Json(found))
}

// ─── GET /api/districts ──────────────────────────────────────────

pub async fn district_list(State(state): State<Arc<AppState>>) -> Json<Vec<DistrictInfo>> {
    Json(state.resolver.registry().district_list())
}

// ─── GET /api/items ──────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct ItemsQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub district: Option<String>,
    #[serde(rename = "type")]
    pub listing_type: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub available: Option<bool>,
}

impl ItemsQuery {
    fn to_filter(&self) -> Result<ItemFilter, ApiError> {
        let category = match self.category.as_deref() {
            Some(c) => parse_choice(c).map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("category: {}", e)))?,
            None => None,
        };
        let listing_type = match self.listing_type.as_deref() {
            Some(t) => parse_choice(t).map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("type: {}", e)))?,
            None => None,
        };
        let filter = ItemFilter {
            search: self.search.clone().unwrap_or_default(),
            category,
            listing_type,
            min_price: self.min_price.unwrap_or(DEFAULT_MIN_PRICE),
            max_price: self.max_price.unwrap_or(DEFAULT_MAX_PRICE),
            available_only: self.available.unwrap_or(false),
            ..Default::default()
        }
        .with_district(self.district.as_deref());
        filter.validate().map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
        Ok(filter)
    }
}

pub async fn items(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ItemsQuery>,
) -> Result<Json<Vec<Item>>, ApiError> {
    let filter = params.to_filter()?;
    let found: Vec<Item> = state.catalog.filter(&filter).into_iter().cloned().collect();
    tracing::debug!("GET /api/items -> {} of {}", found.len(), state.catalog.len());
    Ok(Json(found))
}
