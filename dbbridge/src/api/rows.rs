//! Row endpoints: paged search and single-row mutations

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;

use super::{ApiError, ApiState, RequestCredentials, StatusResponse};
use crate::schema::{Record, RowsResult, WhereCondition};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsRequest {
    #[serde(default, rename = "where")]
    pub filter: Option<WhereCondition>,

    /// 0 selects the default page size
    #[serde(default)]
    pub page_size: u64,

    #[serde(default)]
    pub page_offset: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowValuesRequest {
    pub values: Vec<Record>,

    /// Columns to write on update; ignored otherwise
    #[serde(default)]
    pub updated_columns: Vec<String>,
}

/// Handler for POST /api/schemas/{schema}/units/{unit}/rows/search
///
/// Request body:
/// ```json
/// {
///   "where": {"atomic": {"key": "age", "operator": ">", "value": "30"}},
///   "pageSize": 50,
///   "pageOffset": 0
/// }
/// ```
pub async fn get_rows_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Path((schema, unit)): Path<(String, String)>,
    Json(request): Json<RowsRequest>,
) -> Result<Json<RowsResult>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    let rows = plugin
        .get_rows(
            &config,
            &schema,
            &unit,
            request.filter.as_ref(),
            request.page_size,
            request.page_offset,
        )
        .await?;
    Ok(Json(rows))
}

/// Handler for POST /api/schemas/{schema}/units/{unit}/rows
pub async fn add_row_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Path((schema, unit)): Path<(String, String)>,
    Json(request): Json<RowValuesRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    let status = plugin.add_row(&config, &schema, &unit, &request.values).await?;
    Ok(Json(StatusResponse { status }))
}

/// Handler for PATCH /api/schemas/{schema}/units/{unit}/rows
///
/// `values` must contain the primary-key columns identifying the row.
pub async fn update_rows_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Path((schema, unit)): Path<(String, String)>,
    Json(request): Json<RowValuesRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    let status = plugin
        .update_storage_unit(&config, &schema, &unit, &request.values, &request.updated_columns)
        .await?;
    Ok(Json(StatusResponse { status }))
}

/// Handler for DELETE /api/schemas/{schema}/units/{unit}/rows
pub async fn delete_row_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Path((schema, unit)): Path<(String, String)>,
    Json(request): Json<RowValuesRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    let status = plugin.delete_row(&config, &schema, &unit, &request.values).await?;
    Ok(Json(StatusResponse { status }))
}
