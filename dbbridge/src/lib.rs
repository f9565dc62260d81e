//! # dbbridge
//!
//! A uniform browse/query/mutate layer over heterogeneous database engines.
//!
//! ## Features
//!
//! - One capability interface ([`Plugin`]) implemented per engine
//! - PostgreSQL, MySQL and SQLite through sqlx, MongoDB through the official driver,
//!   ClickHouse through its HTTP interface
//! - String-encoded rows and filters at the boundary, typed values at the driver
//! - Relationship graph derived from foreign-key metadata
//! - Natural-language chat through a pluggable [`ChatModel`]
//! - Axum router exposing every capability
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dbbridge::{Credentials, EngineRegistry, PluginConfig, UnconfiguredChatModel};
//!
//! # async fn example() -> dbbridge::Result<()> {
//! let registry = EngineRegistry::with_default_plugins(Arc::new(UnconfiguredChatModel));
//!
//! let credentials = Credentials::new("Sqlite3", "", "", "", "./data/example.db");
//! let config = PluginConfig::new(credentials);
//!
//! let plugin = registry.select_for(&config)?;
//! let units = plugin.get_storage_units(&config, "main").await?;
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod api;
pub mod chat;
pub mod config;
pub mod convert;
pub mod database;
pub mod graph;
pub mod layer;
pub mod registry;
pub mod schema;

// Public exports
pub use chat::{ChatContext, ChatModel, ChatReply, UnconfiguredChatModel};
pub use config::{Credentials, CredentialsSource, ExternalModel, PluginConfig};
pub use database::traits::{ErrorKind, Plugin, PluginError};
pub use layer::DbBridgeLayer;
pub use registry::{EngineRegistry, EngineType};
pub use schema::{
    ChatMessage, Column, GraphUnit, Record, Relation, RelationshipType, RowsResult, StorageUnit,
    WhereCondition,
};

pub type Result<T> = std::result::Result<T, PluginError>;
