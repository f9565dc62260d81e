//! Raw query execution endpoint

use axum::{extract::State, response::Json};
use serde::Deserialize;
use tracing::debug;

use super::{ApiError, ApiState, RequestCredentials};
use crate::schema::RowsResult;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Query text in the engine's own language
    pub query: String,
}

/// Handler for POST /api/query
///
/// Executes caller-supplied query text and returns its rows. Results are
/// never updatable (`disableUpdate` is always true).
///
/// # Security Warning
///
/// This endpoint runs ANY statement the credentials are allowed to run.
///
/// Request body:
/// ```json
/// {
///   "query": "SELECT * FROM users LIMIT 10"
/// }
/// ```
///
/// Engine errors are returned verbatim:
/// ```json
/// {
///   "error": "near \"SELCT\": syntax error"
/// }
/// ```
pub async fn execute_query_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Json(request): Json<QueryRequest>,
) -> Result<Json<RowsResult>, ApiError> {
    let (config, plugin) = state.resolve(&credentials, None, None)?;
    debug!("Executing raw query on {}", plugin.engine());
    Ok(Json(plugin.raw_execute(&config, &request.query).await?))
}
