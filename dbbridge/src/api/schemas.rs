//! Availability, database, schema, storage unit and graph endpoints

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;

use super::{ApiError, ApiState, RequestCredentials, StatusResponse};
use crate::config::resolve_config;
use crate::schema::{GraphUnit, Record, StorageUnit};

#[derive(Debug, Deserialize)]
pub struct DatabasesQuery {
    /// Engine to ask, defaults to the credentials' engine type
    #[serde(rename = "type")]
    pub engine_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStorageUnitRequest {
    pub name: String,

    /// Field definitions: key = name, value = declared type
    #[serde(default)]
    pub fields: Vec<Record>,
}

/// Handler for POST /api/login
///
/// Reports whether the engine named by the credentials is reachable with them.
/// Never fails for an unreachable engine; the status is `false` instead.
pub async fn login_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
) -> Result<Json<StatusResponse>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    let status = plugin.is_available(&config).await;
    Ok(Json(StatusResponse { status }))
}

/// Handler for GET /api/databases?type=
pub async fn list_databases_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Query(query): Query<DatabasesQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let config = resolve_config(&credentials, None, None, state.timeout)?;
    let plugin = match query.engine_type.as_deref() {
        Some(engine_type) => state.registry.select(engine_type)?,
        None => state.registry.select_for(&config)?,
    };

    Ok(Json(plugin.get_databases(&config).await?))
}

/// Handler for GET /api/schemas
pub async fn list_schemas_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
) -> Result<Json<Vec<String>>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    Ok(Json(plugin.get_all_schemas(&config).await?))
}

/// Handler for GET /api/schemas/{schema}/units
pub async fn list_storage_units_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Path(schema): Path<String>,
) -> Result<Json<Vec<StorageUnit>>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    Ok(Json(plugin.get_storage_units(&config, &schema).await?))
}

/// Handler for POST /api/schemas/{schema}/units
///
/// Request body:
/// ```json
/// {
///   "name": "tags",
///   "fields": [{"key": "id", "value": "integer", "extra": {"Primary": "true"}}]
/// }
/// ```
pub async fn add_storage_unit_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Path(schema): Path<String>,
    Json(request): Json<AddStorageUnitRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    let status = plugin
        .add_storage_unit(&config, &schema, &request.name, &request.fields)
        .await?;
    Ok(Json(StatusResponse { status }))
}

/// Handler for GET /api/schemas/{schema}/graph
pub async fn get_graph_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Path(schema): Path<String>,
) -> Result<Json<Vec<GraphUnit>>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    Ok(Json(plugin.get_graph(&config, &schema).await?))
}
