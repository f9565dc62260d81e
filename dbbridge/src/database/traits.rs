//! Engine plugin trait
//!
//! This trait defines the capability interface that every engine implementation
//! must provide. Callers only ever see this interface, never the engine behind it.

use crate::config::PluginConfig;
use crate::registry::EngineType;
use crate::schema::{ChatMessage, GraphUnit, Record, RowsResult, StorageUnit, WhereCondition};
use async_trait::async_trait;
use thiserror::Error;

/// Capability interface implemented once per engine
///
/// Every method takes the request configuration first and opens (and releases)
/// its own connection.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// The engine this plugin serves
    fn engine(&self) -> EngineType;

    /// Whether the engine can be reached and authenticated against
    ///
    /// Never fails; any error means "not available".
    async fn is_available(&self, config: &PluginConfig) -> bool;

    /// List the databases visible to the credentials
    async fn get_databases(&self, config: &PluginConfig) -> Result<Vec<String>, PluginError>;

    /// List the schemas (namespaces) of the connected database
    async fn get_all_schemas(&self, config: &PluginConfig) -> Result<Vec<String>, PluginError>;

    /// List the storage units of a schema
    ///
    /// An existing schema without storage units yields an empty list.
    async fn get_storage_units(
        &self,
        config: &PluginConfig,
        schema: &str,
    ) -> Result<Vec<StorageUnit>, PluginError>;

    /// Fetch one page of rows, optionally filtered
    async fn get_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        filter: Option<&WhereCondition>,
        page_size: u64,
        page_offset: u64,
    ) -> Result<RowsResult, PluginError>;

    /// Execute caller-supplied query text in the engine's own language
    ///
    /// Engine errors are surfaced verbatim.
    async fn raw_execute(&self, config: &PluginConfig, query: &str) -> Result<RowsResult, PluginError>;

    /// Create a storage unit from field definitions (key = name, value = type)
    async fn add_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        fields: &[Record],
    ) -> Result<bool, PluginError>;

    /// Update one row identified by its primary key
    ///
    /// Only the columns named in `updated_columns` are written.
    async fn update_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
        updated_columns: &[String],
    ) -> Result<bool, PluginError>;

    /// Insert one row
    async fn add_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
    ) -> Result<bool, PluginError>;

    /// Delete the rows matching an equality filter
    async fn delete_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
    ) -> Result<bool, PluginError>;

    /// Relationship graph of a schema
    async fn get_graph(&self, config: &PluginConfig, schema: &str) -> Result<Vec<GraphUnit>, PluginError>;

    /// Converse with the external model about a schema
    ///
    /// Query messages are executed and carry their result.
    async fn chat(
        &self,
        config: &PluginConfig,
        schema: &str,
        model: &str,
        previous_conversation: &str,
        query: &str,
    ) -> Result<Vec<ChatMessage>, PluginError>;
}

/// Plugin error type
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin registered for the database-type identifier
    #[error("Unsupported database type: {0}")]
    UnsupportedEngine(String),

    /// Engine cannot be reached or authenticated against
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request carried no credentials
    #[error("Missing credentials")]
    MissingCredentials,

    /// Schema or storage unit does not exist
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// Column does not exist in the storage unit
    #[error("Column '{column}' does not exist in {storage_unit}")]
    UnknownColumn { storage_unit: String, column: String },

    /// Value does not parse as the column's declared type
    #[error("Failed to convert value '{raw_value}' for column '{column}' to {attempted_type}")]
    Conversion {
        column: String,
        attempted_type: String,
        raw_value: String,
    },

    /// Native execution failure, engine message preserved
    #[error("{0}")]
    Query(String),

    /// A write matched no rows
    #[error("{0}")]
    NoRowsAffected(String),

    /// AI-model collaborator failure
    #[error("External model error: {0}")]
    ExternalModel(String),

    /// Query timeout
    #[error("Query timeout exceeded")]
    Timeout,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of [`PluginError`] used at the transport seam
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedEngine,
    Connection,
    Unauthorized,
    SchemaNotFound,
    UnknownColumn,
    Conversion,
    Query,
    ExternalModel,
    Timeout,
    Internal,
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::UnsupportedEngine(_) => ErrorKind::UnsupportedEngine,
            PluginError::Connection(_) => ErrorKind::Connection,
            PluginError::MissingCredentials => ErrorKind::Unauthorized,
            PluginError::SchemaNotFound(_) => ErrorKind::SchemaNotFound,
            PluginError::UnknownColumn { .. } => ErrorKind::UnknownColumn,
            PluginError::Conversion { .. } => ErrorKind::Conversion,
            PluginError::Query(_) | PluginError::NoRowsAffected(_) => ErrorKind::Query,
            PluginError::ExternalModel(_) => ErrorKind::ExternalModel,
            PluginError::Timeout => ErrorKind::Timeout,
            PluginError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for PluginError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(database_error) => PluginError::Query(database_error.message().to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => PluginError::Connection(error.to_string()),
            sqlx::Error::PoolTimedOut => PluginError::Timeout,
            other => PluginError::Query(other.to_string()),
        }
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for PluginError {
    fn from(error: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind as MongoErrorKind;

        match *error.kind {
            MongoErrorKind::Authentication { .. }
            | MongoErrorKind::DnsResolve { .. }
            | MongoErrorKind::Io(_)
            | MongoErrorKind::ServerSelection { .. }
            | MongoErrorKind::InvalidArgument { .. }
            | MongoErrorKind::ConnectionPoolCleared { .. } => PluginError::Connection(error.to_string()),
            _ => PluginError::Query(error.to_string()),
        }
    }
}

#[cfg(feature = "clickhouse")]
impl From<reqwest::Error> for PluginError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            PluginError::Timeout
        } else if error.is_connect() || error.is_builder() {
            PluginError::Connection(error.to_string())
        } else if error.is_decode() {
            PluginError::Serialization(error.to_string())
        } else {
            PluginError::Query(error.to_string())
        }
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(error: serde_json::Error) -> Self {
        PluginError::Serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rows_affected_is_a_query_error() {
        let error = PluginError::NoRowsAffected("no rows were updated".to_string());
        assert_eq!(error.kind(), ErrorKind::Query);
        assert_eq!(error.to_string(), "no rows were updated");
    }

    #[test]
    fn test_conversion_error_names_the_offending_value() {
        let error = PluginError::Conversion {
            column: "age".to_string(),
            attempted_type: "integer".to_string(),
            raw_value: "abc".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("age"));
        assert!(message.contains("abc"));
        assert!(message.contains("integer"));
    }

    #[test]
    fn test_sqlx_pool_timeout_maps_to_timeout() {
        assert!(matches!(PluginError::from(sqlx::Error::PoolTimedOut), PluginError::Timeout));
        assert!(matches!(
            PluginError::from(sqlx::Error::RowNotFound),
            PluginError::Query(_)
        ));
    }
}
