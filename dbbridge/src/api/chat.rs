//! Chat and external-model endpoints

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;

use super::{ApiError, ApiState, RequestCredentials};
use crate::config::ExternalModel;
use crate::schema::ChatMessage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// AI provider type, e.g. `OpenAI`
    pub model_type: String,

    #[serde(default)]
    pub token: Option<String>,

    pub model: String,

    #[serde(default)]
    pub previous_conversation: String,

    pub query: String,
}

/// Handler for POST /api/schemas/{schema}/chat
///
/// Messages whose type starts with `sql` carry the rows their query produced.
pub async fn chat_handler(
    State(state): State<ApiState>,
    credentials: RequestCredentials,
    Path(schema): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let (config, plugin) = state.resolve(
        &credentials,
        Some(&request.model_type),
        request.token.as_deref(),
    )?;

    let messages = plugin
        .chat(
            &config,
            &schema,
            &request.model,
            &request.previous_conversation,
            &request.query,
        )
        .await?;
    Ok(Json(messages))
}

/// Handler for POST /api/ai-models
///
/// Lists the models the provider offers. Needs no database credentials.
pub async fn list_models_handler(
    State(state): State<ApiState>,
    Json(external_model): Json<ExternalModel>,
) -> Result<Json<Vec<String>>, ApiError> {
    let models = state
        .registry
        .chat_model()
        .supported_models(&external_model)
        .await?;
    Ok(Json(models))
}
