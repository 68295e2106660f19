use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{log_activity, require_admin};
use crate::error::ApiError;
use crate::firebase::firestore::Document;
use crate::models::{coerce_bool, now_rfc3339, Vehicle, VehicleInput, VEHICLES};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    /// Omitted means toggle.
    #[serde(default)]
    pub available: Option<Value>,
}

pub async fn load_fleet(state: &AppState) -> Result<Vec<Vehicle>, ApiError> {
    let docs = state.db.list(VEHICLES, None, None).await?;
    let mut fleet: Vec<Vehicle> = docs.iter().map(Vehicle::from_document).collect();
    fleet.sort_by(|a, b| a.display_name().cmp(&b.display_name()));
    Ok(fleet)
}

/// GET /api/admin/vehicles
pub async fn list_vehicles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Vehicle>>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(load_fleet(&state).await?))
}

/// POST /api/admin/vehicles
pub async fn create_vehicle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<VehicleInput>,
) -> Result<(StatusCode, Json<Vehicle>), ApiError> {
    let admin = require_admin(&state, &headers).await?;

    let mut fields = input.into_fields(true).map_err(ApiError::BadRequest)?;
    let now = now_rfc3339();
    fields.insert("created_at".into(), Value::String(now.clone()));
    fields.insert("updated_at".into(), Value::String(now));

    let doc = state.db.create(VEHICLES, &fields).await?;
    let vehicle = Vehicle::from_document(&doc);
    tracing::info!(vehicle_id = %vehicle.id, admin = %admin.email, "Vehicle created");

    log_activity(
        &state,
        &admin,
        "vehicle_created",
        &vehicle.id,
        json!({ "name": vehicle.display_name() }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(vehicle)))
}

/// PUT /api/admin/vehicles/{id}
pub async fn update_vehicle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<VehicleInput>,
) -> Result<Json<Vehicle>, ApiError> {
    let admin = require_admin(&state, &headers).await?;

    let mut fields = input.into_fields(false).map_err(ApiError::BadRequest)?;
    if fields.is_empty() {
        return Err(ApiError::BadRequest("no fields to update".to_string()));
    }
    let changed: Vec<String> = fields.keys().cloned().collect();
    fields.insert("updated_at".into(), Value::String(now_rfc3339()));

    let doc = state.db.update(VEHICLES, &id, &fields).await?;
    let vehicle = Vehicle::from_document(&doc);

    log_activity(
        &state,
        &admin,
        "vehicle_updated",
        &id,
        json!({ "name": vehicle.display_name(), "fields": changed }),
    )
    .await;

    Ok(Json(vehicle))
}

/// DELETE /api/admin/vehicles/{id}
pub async fn delete_vehicle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let admin = require_admin(&state, &headers).await?;

    let existing = Vehicle::from_document(&state.db.get(VEHICLES, &id).await?);
    state.db.delete(VEHICLES, &id).await?;
    tracing::info!(vehicle_id = %id, admin = %admin.email, "Vehicle deleted");

    log_activity(
        &state,
        &admin,
        "vehicle_deleted",
        &id,
        json!({ "name": existing.display_name() }),
    )
    .await;

    Ok(Json(json!({ "deleted": id })))
}

/// POST /api/admin/vehicles/{id}/availability
pub async fn set_availability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AvailabilityRequest>,
) -> Result<Json<Vehicle>, ApiError> {
    let admin = require_admin(&state, &headers).await?;

    let available = match req.available {
        Some(raw) => coerce_bool(Some(&raw)).ok_or_else(|| {
            ApiError::BadRequest(format!("available must be a boolean, got {raw}"))
        })?,
        None => !Vehicle::from_document(&state.db.get(VEHICLES, &id).await?).available,
    };

    let mut fields = Document::new();
    fields.insert("available".into(), Value::Bool(available));
    fields.insert("updated_at".into(), Value::String(now_rfc3339()));
    let vehicle = Vehicle::from_document(&state.db.update(VEHICLES, &id, &fields).await?);

    log_activity(
        &state,
        &admin,
        "vehicle_availability",
        &id,
        json!({ "name": vehicle.display_name(), "available": available }),
    )
    .await;

    Ok(Json(vehicle))
}
