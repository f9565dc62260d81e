//! Engine plugin registry and selector
//!
//! The registry is built once at startup and shared immutably afterwards.
//! Selecting a plugin is a map lookup and never touches the network.

use crate::chat::ChatModel;
use crate::config::PluginConfig;
use crate::database::traits::{Plugin, PluginError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineType {
    Postgres,
    #[serde(rename = "MySQL")]
    MySql,
    #[serde(rename = "Sqlite3")]
    Sqlite,
    #[serde(rename = "MongoDB")]
    MongoDb,
    ClickHouse,
}

impl EngineType {
    pub const ALL: [EngineType; 5] = [
        EngineType::Postgres,
        EngineType::MySql,
        EngineType::Sqlite,
        EngineType::MongoDb,
        EngineType::ClickHouse,
    ];

    /// Canonical database-type identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Postgres => "Postgres",
            EngineType::MySql => "MySQL",
            EngineType::Sqlite => "Sqlite3",
            EngineType::MongoDb => "MongoDB",
            EngineType::ClickHouse => "ClickHouse",
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = PluginError;

    fn from_str(identifier: &str) -> Result<Self, Self::Err> {
        match identifier.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineType::Postgres),
            "mysql" => Ok(EngineType::MySql),
            "sqlite3" | "sqlite" => Ok(EngineType::Sqlite),
            "mongodb" | "mongo" => Ok(EngineType::MongoDb),
            "clickhouse" => Ok(EngineType::ClickHouse),
            _ => Err(PluginError::UnsupportedEngine(identifier.to_string())),
        }
    }
}

/// Immutable map from engine to plugin
pub struct EngineRegistry {
    plugins: HashMap<EngineType, Arc<dyn Plugin>>,
    chat_model: Arc<dyn ChatModel>,
}

impl EngineRegistry {
    pub fn builder(chat_model: Arc<dyn ChatModel>) -> EngineRegistryBuilder {
        EngineRegistryBuilder {
            plugins: HashMap::new(),
            chat_model,
        }
    }

    /// Registry with every engine compiled into this build
    pub fn with_default_plugins(chat_model: Arc<dyn ChatModel>) -> Self {
        #[allow(unused_mut)]
        let mut builder = Self::builder(Arc::clone(&chat_model));

        #[cfg(feature = "postgres")]
        {
            builder = builder.register(Arc::new(crate::database::postgres::postgres_plugin(Arc::clone(&chat_model))));
        }
        #[cfg(feature = "mysql")]
        {
            builder = builder.register(Arc::new(crate::database::mysql::mysql_plugin(Arc::clone(&chat_model))));
        }
        #[cfg(feature = "sqlite")]
        {
            builder = builder.register(Arc::new(crate::database::sqlite::sqlite_plugin(Arc::clone(&chat_model))));
        }
        #[cfg(feature = "mongodb")]
        {
            builder = builder.register(Arc::new(crate::database::mongodb::MongoPlugin::new(Arc::clone(
                &chat_model,
            ))));
        }
        #[cfg(feature = "clickhouse")]
        {
            builder = builder.register(Arc::new(crate::database::clickhouse::clickhouse_plugin(
                Arc::clone(&chat_model),
            )));
        }

        builder.build()
    }

    /// Plugin for a database-type identifier
    pub fn select(&self, identifier: &str) -> Result<&dyn Plugin, PluginError> {
        let engine = identifier.parse::<EngineType>()?;
        self.plugins
            .get(&engine)
            .map(|plugin| plugin.as_ref())
            .ok_or_else(|| PluginError::UnsupportedEngine(identifier.to_string()))
    }

    /// Plugin for the engine named by the request credentials
    pub fn select_for(&self, config: &PluginConfig) -> Result<&dyn Plugin, PluginError> {
        self.select(&config.credentials().engine_type)
    }

    pub fn engines(&self) -> Vec<EngineType> {
        EngineType::ALL
            .into_iter()
            .filter(|engine| self.plugins.contains_key(engine))
            .collect()
    }

    pub fn chat_model(&self) -> &dyn ChatModel {
        self.chat_model.as_ref()
    }
}

pub struct EngineRegistryBuilder {
    plugins: HashMap<EngineType, Arc<dyn Plugin>>,
    chat_model: Arc<dyn ChatModel>,
}

impl EngineRegistryBuilder {
    /// Register a plugin, replacing any earlier one for the same engine
    pub fn register(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.insert(plugin.engine(), plugin);
        self
    }

    pub fn build(self) -> EngineRegistry {
        EngineRegistry {
            plugins: self.plugins,
            chat_model: self.chat_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::UnconfiguredChatModel;
    use crate::config::Credentials;

    #[test]
    fn test_identifiers_and_aliases() {
        assert_eq!("Postgres".parse::<EngineType>().unwrap(), EngineType::Postgres);
        assert_eq!("postgresql".parse::<EngineType>().unwrap(), EngineType::Postgres);
        assert_eq!("MYSQL".parse::<EngineType>().unwrap(), EngineType::MySql);
        assert_eq!("sqlite".parse::<EngineType>().unwrap(), EngineType::Sqlite);
        assert_eq!("Mongo".parse::<EngineType>().unwrap(), EngineType::MongoDb);
        assert_eq!(" ClickHouse ".parse::<EngineType>().unwrap(), EngineType::ClickHouse);

        for engine in EngineType::ALL {
            assert_eq!(engine.as_str().parse::<EngineType>().unwrap(), engine);
        }
    }

    #[test]
    fn test_unknown_identifier_is_unsupported() {
        let registry = EngineRegistry::builder(Arc::new(UnconfiguredChatModel)).build();

        assert!(matches!(registry.select("Oracle"), Err(PluginError::UnsupportedEngine(name)) if name == "Oracle"));
        // known engine, nothing registered for it
        assert!(matches!(registry.select("Postgres"), Err(PluginError::UnsupportedEngine(_))));
        assert!(registry.engines().is_empty());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_default_registry_selects_by_credentials() {
        let registry = EngineRegistry::with_default_plugins(Arc::new(UnconfiguredChatModel));
        let config = PluginConfig::new(Credentials::new("sqlite3", "", "", "", "/nonexistent/app.db"));

        let plugin = registry.select_for(&config).unwrap();
        assert_eq!(plugin.engine(), EngineType::Sqlite);
        assert!(registry.engines().contains(&EngineType::Sqlite));
    }
}
