//! REST API endpoints
//!
//! Every handler resolves the request configuration from the credentials
//! header, selects the plugin for the credentials' engine type and calls one
//! capability. No handler knows which engine it is talking to.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{resolve_config, Credentials, CredentialsSource, PluginConfig};
use crate::database::traits::{ErrorKind, Plugin, PluginError};
use crate::registry::EngineRegistry;

pub mod chat;
pub mod query;
pub mod rows;
pub mod schemas;

/// Header carrying the caller's credentials as JSON
pub const CREDENTIALS_HEADER: &str = "x-database-credentials";

/// Shared state of every handler
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<EngineRegistry>,

    /// Deadline applied to every capability call
    pub timeout: Option<Duration>,
}

impl ApiState {
    /// Configuration and plugin for one request
    pub fn resolve(
        &self,
        credentials: &RequestCredentials,
        model_type: Option<&str>,
        token: Option<&str>,
    ) -> Result<(PluginConfig, &dyn Plugin), ApiError> {
        let config = resolve_config(credentials, model_type, token, self.timeout)?;
        let plugin = self.registry.select_for(&config)?;
        Ok((config, plugin))
    }
}

/// Credentials placed on the request by the authentication collaborator
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials(pub Option<Credentials>);

impl CredentialsSource for RequestCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.0.clone()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestCredentials {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(CREDENTIALS_HEADER) else {
            return Ok(Self(None));
        };

        let text = value
            .to_str()
            .map_err(|_| ApiError::BadRequest("credentials header is not valid text".to_string()))?;
        let credentials = serde_json::from_str::<Credentials>(text)
            .map_err(|error| ApiError::BadRequest(format!("invalid credentials: {}", error)))?;

        Ok(Self(Some(credentials)))
    }
}

/// Response body of operations answering with a flag
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: bool,
}

/// Error returned by every handler
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request outside the capability interface
    BadRequest(String),

    Plugin(PluginError),
}

impl From<PluginError> for ApiError {
    fn from(error: PluginError) -> Self {
        ApiError::Plugin(error)
    }
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnsupportedEngine | ErrorKind::UnknownColumn | ErrorKind::Query => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::SchemaNotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conversion => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Connection | ErrorKind::ExternalModel => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Plugin(error) => (status_for(error.kind()), error.to_string()),
        };

        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, message);
        }

        (
            status,
            Json(serde_json::json!({
                "error": message
            })),
        )
            .into_response()
    }
}

/// Create the API router with all endpoints
///
/// Paths use axum 0.8 `{param}` captures.
pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/login", post(schemas::login_handler))
        .route("/databases", get(schemas::list_databases_handler))
        .route("/schemas", get(schemas::list_schemas_handler))
        .route(
            "/schemas/{schema}/units",
            get(schemas::list_storage_units_handler).post(schemas::add_storage_unit_handler),
        )
        .route("/schemas/{schema}/graph", get(schemas::get_graph_handler))
        .route(
            "/schemas/{schema}/units/{unit}/rows/search",
            post(rows::get_rows_handler),
        )
        .route(
            "/schemas/{schema}/units/{unit}/rows",
            post(rows::add_row_handler)
                .patch(rows::update_rows_handler)
                .delete(rows::delete_row_handler),
        )
        .route("/query", post(query::execute_query_handler))
        .route("/schemas/{schema}/chat", post(chat::chat_handler))
        .route("/ai-models", post(chat::list_models_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_by_error_kind() {
        assert_eq!(
            ApiError::from(PluginError::UnsupportedEngine("Oracle".to_string()))
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(PluginError::SchemaNotFound("nope".to_string()))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(PluginError::Conversion {
                column: "age".to_string(),
                attempted_type: "integer".to_string(),
                raw_value: "abc".to_string(),
            })
            .into_response()
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Connection), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::from(PluginError::MissingCredentials).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
