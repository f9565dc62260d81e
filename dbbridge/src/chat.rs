//! Natural-language chat over a schema
//!
//! Query generation belongs to an external [`ChatModel`]. This module hands
//! the model a description of the schema, runs every query message it
//! returns through the plugin's raw execution and attaches the result.

use crate::config::{ExternalModel, PluginConfig};
use crate::database::traits::{Plugin, PluginError};
use crate::registry::EngineType;
use crate::schema::{ChatMessage, TableMetadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::debug;

/// Message types starting with this prefix carry a query to execute
pub const QUERY_MESSAGE_PREFIX: &str = "sql";

/// One reply produced by the external model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: String,
}

impl ChatReply {
    pub fn new(message_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            text: text.into(),
        }
    }

    pub fn is_query(&self) -> bool {
        is_query_message(&self.message_type)
    }
}

pub fn is_query_message(message_type: &str) -> bool {
    message_type
        .get(..QUERY_MESSAGE_PREFIX.len())
        .map(|prefix| prefix.eq_ignore_ascii_case(QUERY_MESSAGE_PREFIX))
        .unwrap_or(false)
}

/// Schema description handed to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    pub engine: EngineType,
    pub schema: String,
    pub tables: Vec<TableMetadata>,
}

impl ChatContext {
    /// Plain-text listing of every storage unit and its columns
    pub fn describe(&self) -> String {
        let mut description = format!("{} schema {}\n", self.engine, self.schema);
        for table in &self.tables {
            let columns = table
                .columns
                .iter()
                .map(|column| {
                    if table.is_primary_key(&column.name) {
                        format!("{} {} primary key", column.name, column.column_type)
                    } else {
                        format!("{} {}", column.name, column.column_type)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(description, "- {}({})", table.name, columns);
        }
        description
    }
}

/// AI-model collaborator
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model names offered by the provider
    async fn supported_models(&self, external_model: &ExternalModel) -> Result<Vec<String>, PluginError>;

    /// Answer `query`, possibly with query messages in the engine's language
    async fn complete(
        &self,
        external_model: &ExternalModel,
        model: &str,
        context: &ChatContext,
        previous_conversation: &str,
        query: &str,
    ) -> Result<Vec<ChatReply>, PluginError>;
}

/// Chat model used when no provider is wired in
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredChatModel;

#[async_trait]
impl ChatModel for UnconfiguredChatModel {
    async fn supported_models(&self, external_model: &ExternalModel) -> Result<Vec<String>, PluginError> {
        Err(PluginError::ExternalModel(format!(
            "no chat model available for provider '{}'",
            external_model.model_type
        )))
    }

    async fn complete(
        &self,
        external_model: &ExternalModel,
        _model: &str,
        _context: &ChatContext,
        _previous_conversation: &str,
        _query: &str,
    ) -> Result<Vec<ChatReply>, PluginError> {
        Err(PluginError::ExternalModel(format!(
            "no chat model available for provider '{}'",
            external_model.model_type
        )))
    }
}

/// External model of the request, required for chat
pub fn require_external_model(config: &PluginConfig) -> Result<&ExternalModel, PluginError> {
    config
        .external_model()
        .ok_or_else(|| PluginError::ExternalModel("no external model configured".to_string()))
}

/// Ask the model and execute the query messages it returns
///
/// Any failure, from the model or from executing a query, fails the whole
/// exchange; partial results are discarded.
#[allow(clippy::too_many_arguments)]
pub async fn run_chat(
    plugin: &dyn Plugin,
    chat_model: &dyn ChatModel,
    config: &PluginConfig,
    context: &ChatContext,
    model: &str,
    previous_conversation: &str,
    query: &str,
) -> Result<Vec<ChatMessage>, PluginError> {
    let external_model = require_external_model(config)?;
    let replies = chat_model
        .complete(external_model, model, context, previous_conversation, query)
        .await?;

    let mut messages = Vec::with_capacity(replies.len());
    for reply in replies {
        let result = if reply.is_query() {
            debug!("Executing chat query for {}", context.schema);
            Some(plugin.raw_execute(config, &reply.text).await?)
        } else {
            None
        };

        messages.push(ChatMessage {
            message_type: reply.message_type,
            text: reply.text,
            result,
        });
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::schema::Column;

    #[test]
    fn test_query_message_detection() {
        assert!(is_query_message("sql"));
        assert!(is_query_message("sql:get"));
        assert!(is_query_message("SQL:update"));
        assert!(!is_query_message("message"));
        assert!(!is_query_message("sq"));
        assert!(!is_query_message(""));
    }

    #[test]
    fn test_context_description() {
        let context = ChatContext {
            engine: EngineType::Postgres,
            schema: "public".to_string(),
            tables: vec![TableMetadata {
                name: "users".to_string(),
                columns: vec![Column::new("id", "integer"), Column::new("name", "text")],
                primary_key: vec!["id".to_string()],
                ..Default::default()
            }],
        };

        assert_eq!(
            context.describe(),
            "Postgres schema public\n- users(id integer primary key, name text)\n"
        );
    }

    #[test]
    fn test_chat_requires_external_model() {
        let config = PluginConfig::new(Credentials::new("Postgres", "localhost", "u", "p", "db"));
        assert!(matches!(
            require_external_model(&config),
            Err(PluginError::ExternalModel(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_model_fails() {
        let external_model = ExternalModel {
            model_type: "Ollama".to_string(),
            token: String::new(),
        };

        let error = UnconfiguredChatModel.supported_models(&external_model).await.unwrap_err();
        assert!(error.to_string().contains("Ollama"));
    }
}
