use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use crate::model::{
    ActiveVehicle, CurrentLocation, RecentObservation, RouteObservation, RouteSummary, Summary,
};
use crate::services::observation_store::{
    ACTIVE_WINDOW_MINUTES, LOCATION_WINDOW_MINUTES, RECENT_ROW_LIMIT, ROUTE_ROW_LIMIT,
};

const DEFAULT_HOURS: i32 = 1;

#[derive(Debug, Default, Deserialize)]
pub struct RecentParams {
    hours: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RouteParams {
    name: Option<String>,
    hours: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    timestamp: DateTime<Utc>,
    service: String,
}

#[derive(Debug, Serialize)]
pub struct RecentResponse {
    hours_back: i32,
    record_count: usize,
    data: Vec<RecentObservation>,
}

#[derive(Debug, Serialize)]
pub struct RoutesResponse {
    routes: Vec<RouteSummary>,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    route_name: String,
    hours_back: i32,
    record_count: usize,
    data: Vec<RouteObservation>,
}

#[derive(Debug, Serialize)]
pub struct VehiclesResponse {
    active_vehicles: usize,
    vehicles: Vec<ActiveVehicle>,
}

#[derive(Debug, Serialize)]
pub struct LocationsResponse {
    timestamp: DateTime<Utc>,
    vehicle_count: usize,
    locations: Vec<CurrentLocation>,
}

/// `hours` defaults to 1 and must otherwise be a positive integer.
pub fn parse_hours(raw: Option<&str>) -> Result<i32, ApiError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_HOURS);
    };
    match raw.trim().parse::<i32>() {
        Ok(hours) if hours > 0 => Ok(hours),
        _ => Err(ApiError::BadRequest(format!(
            "hours must be a positive integer, got '{raw}'"
        ))),
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        timestamp: Utc::now(),
        service: state.service_name.to_string(),
    })
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<Summary>, ApiError> {
    Ok(Json(state.store.summary().await?))
}

pub async fn recent(
    State(state): State<AppState>,
    query: Result<Query<RecentParams>, QueryRejection>,
) -> Result<Json<RecentResponse>, ApiError> {
    let Query(params) = query?;
    let hours = parse_hours(params.hours.as_deref())?;
    let data = state.store.recent(hours, RECENT_ROW_LIMIT).await?;
    Ok(Json(RecentResponse {
        hours_back: hours,
        record_count: data.len(),
        data,
    }))
}

pub async fn routes(State(state): State<AppState>) -> Result<Json<RoutesResponse>, ApiError> {
    Ok(Json(RoutesResponse {
        routes: state.store.routes().await?,
    }))
}

pub async fn route(
    State(state): State<AppState>,
    query: Result<Query<RouteParams>, QueryRejection>,
) -> Result<Json<RouteResponse>, ApiError> {
    let Query(params) = query?;
    let name = params
        .name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing required parameter 'name'".to_string()))?;
    let hours = parse_hours(params.hours.as_deref())?;

    let data = state.store.route(&name, hours, ROUTE_ROW_LIMIT).await?;
    Ok(Json(RouteResponse {
        route_name: name,
        hours_back: hours,
        record_count: data.len(),
        data,
    }))
}

pub async fn vehicles(State(state): State<AppState>) -> Result<Json<VehiclesResponse>, ApiError> {
    let vehicles = state
        .store
        .active_vehicles(TimeDelta::minutes(ACTIVE_WINDOW_MINUTES))
        .await?;
    Ok(Json(VehiclesResponse {
        active_vehicles: vehicles.len(),
        vehicles,
    }))
}

pub async fn locations(State(state): State<AppState>) -> Result<Json<LocationsResponse>, ApiError> {
    let locations = state
        .store
        .current_locations(TimeDelta::minutes(LOCATION_WINDOW_MINUTES))
        .await?;
    Ok(Json(LocationsResponse {
        timestamp: Utc::now(),
        vehicle_count: locations.len(),
        locations,
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
