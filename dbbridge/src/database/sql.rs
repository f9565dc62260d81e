//! Generic plugin over SQL engines
//!
//! Each SQL engine supplies connection handling, dialect, introspection and
//! execution through [`SqlEngine`]; [`SqlPlugin`] turns that into the full
//! capability interface once.

use crate::chat::{require_external_model, run_chat, ChatContext, ChatModel};
use crate::config::PluginConfig;
use crate::database::connection::{with_connection, Connector};
use crate::database::crud::{self, StatementRunner};
use crate::database::dialect::{Dialect, Statement};
use crate::database::traits::{Plugin, PluginError};
use crate::graph::{build_graph, collect_metadata};
use crate::registry::EngineType;
use crate::schema::{
    ChatMessage, Column, GraphUnit, Record, RowsResult, StorageUnit, TableMetadata, WhereCondition,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Engine-specific half of a SQL plugin
///
/// Every method receives a handle opened by the engine's [`Connector`] half.
#[async_trait]
pub trait SqlEngine: Connector + Dialect + 'static {
    fn engine(&self) -> EngineType;

    /// Cheapest round trip proving the handle works
    async fn ping(&self, handle: &Self::Handle) -> Result<(), PluginError>;

    async fn list_databases(&self, handle: &Self::Handle) -> Result<Vec<String>, PluginError>;

    async fn list_schemas(&self, handle: &Self::Handle) -> Result<Vec<String>, PluginError>;

    /// Storage units of a schema, `SchemaNotFound` if the schema is missing
    async fn list_storage_units(&self, handle: &Self::Handle, schema: &str) -> Result<Vec<StorageUnit>, PluginError>;

    /// Columns, keys and foreign keys of one storage unit
    async fn table_metadata(
        &self,
        handle: &Self::Handle,
        schema: &str,
        storage_unit: &str,
    ) -> Result<TableMetadata, PluginError>;

    /// Run a planned statement, returning the affected row count
    async fn execute(&self, handle: &Self::Handle, statement: Statement) -> Result<u64, PluginError>;

    /// Run a planned query, returning one normalized cell per column
    async fn fetch(
        &self,
        handle: &Self::Handle,
        statement: Statement,
        columns: &[Column],
    ) -> Result<Vec<Vec<String>>, PluginError>;

    /// Run caller-supplied SQL
    async fn raw_execute(&self, handle: &Self::Handle, query: &str) -> Result<RowsResult, PluginError>;
}

/// Columns covered by a single-column unique constraint, given columns per constraint
pub fn single_columns(constraints: BTreeMap<String, Vec<String>>) -> Vec<String> {
    constraints
        .into_values()
        .filter(|columns| columns.len() == 1)
        .flatten()
        .collect()
}

/// Run caller-supplied SQL on a sqlx pool, decoding each cell with `decode`
///
/// Rows whose width differs from the first one (trailing statements of a
/// multi-statement script) are skipped. When nothing comes back the header
/// is taken from the statement's prepared description, so a query matching
/// no rows still reports its columns; statements without a result set (or
/// scripts the engine cannot describe) yield none.
#[cfg(any(feature = "sqlite", feature = "postgres", feature = "mysql"))]
pub async fn raw_rows<DB, F>(pool: &sqlx::Pool<DB>, query: &str, decode: F) -> Result<RowsResult, PluginError>
where
    DB: sqlx::Database,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    F: Fn(&DB::Row, usize) -> Result<String, PluginError>,
{
    use sqlx::{Column as _, Executor as _, Row as _, TypeInfo as _};

    let rows = sqlx::raw_sql(query).fetch_all(pool).await?;

    let columns: Vec<Column> = match rows.first() {
        Some(first_row) => first_row
            .columns()
            .iter()
            .map(|column| Column::new(column.name(), column.type_info().name()))
            .collect(),
        None => match pool.describe(query).await {
            Ok(description) => description
                .columns()
                .iter()
                .map(|column| Column::new(column.name(), column.type_info().name()))
                .collect(),
            Err(error) => {
                debug!("No result description for raw query: {}", error);
                Vec::new()
            }
        },
    };

    let mut cells = Vec::with_capacity(rows.len());
    for row in rows.iter().filter(|row| row.columns().len() == columns.len()) {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            values.push(decode(row, index)?);
        }
        cells.push(values);
    }

    Ok(RowsResult {
        columns,
        rows: cells,
        disable_update: true,
    })
}

/// An engine bound to one open handle
struct Session<'a, E: SqlEngine> {
    engine: &'a E,
    handle: &'a E::Handle,
}

#[async_trait]
impl<E: SqlEngine> StatementRunner for Session<'_, E> {
    fn engine(&self) -> EngineType {
        self.engine.engine()
    }

    fn dialect(&self) -> &dyn Dialect {
        self.engine
    }

    async fn table_metadata(&self, schema: &str, storage_unit: &str) -> Result<TableMetadata, PluginError> {
        self.engine.table_metadata(self.handle, schema, storage_unit).await
    }

    async fn execute(&self, statement: Statement) -> Result<u64, PluginError> {
        debug!("{}: {}", self.engine.engine(), statement.sql);
        self.engine.execute(self.handle, statement).await
    }

    async fn fetch(&self, statement: Statement, columns: &[Column]) -> Result<Vec<Vec<String>>, PluginError> {
        debug!("{}: {}", self.engine.engine(), statement.sql);
        self.engine.fetch(self.handle, statement, columns).await
    }
}

/// Capability interface over any [`SqlEngine`]
pub struct SqlPlugin<E: SqlEngine> {
    engine: E,
    chat_model: Arc<dyn ChatModel>,
}

impl<E: SqlEngine> SqlPlugin<E> {
    pub fn new(engine: E, chat_model: Arc<dyn ChatModel>) -> Self {
        Self { engine, chat_model }
    }

    async fn schema_metadata(&self, handle: &E::Handle, schema: &str) -> Result<(Vec<StorageUnit>, Vec<TableMetadata>), PluginError> {
        let units = self.engine.list_storage_units(handle, schema).await?;
        let metadata = collect_metadata(&units, |name| async move {
            self.engine.table_metadata(handle, schema, &name).await
        })
        .await?;
        Ok((units, metadata))
    }
}

fn log_failure<T>(engine: EngineType, operation: &str, result: Result<T, PluginError>) -> Result<T, PluginError> {
    if let Err(error) = &result {
        warn!("{} {} failed: {}", engine, operation, error);
    }
    result
}

#[async_trait]
impl<E: SqlEngine> Plugin for SqlPlugin<E> {
    fn engine(&self) -> EngineType {
        self.engine.engine()
    }

    async fn is_available(&self, config: &PluginConfig) -> bool {
        let result = with_connection(&self.engine, config, |handle| async move { self.engine.ping(&handle).await }).await;
        if let Err(error) = &result {
            debug!("{} is not available: {}", self.engine.engine(), error);
        }
        result.is_ok()
    }

    async fn get_databases(&self, config: &PluginConfig) -> Result<Vec<String>, PluginError> {
        let result = with_connection(&self.engine, config, |handle| async move {
            self.engine.list_databases(&handle).await
        })
        .await;
        log_failure(self.engine.engine(), "get_databases", result)
    }

    async fn get_all_schemas(&self, config: &PluginConfig) -> Result<Vec<String>, PluginError> {
        let result = with_connection(&self.engine, config, |handle| async move {
            self.engine.list_schemas(&handle).await
        })
        .await;
        log_failure(self.engine.engine(), "get_all_schemas", result)
    }

    async fn get_storage_units(&self, config: &PluginConfig, schema: &str) -> Result<Vec<StorageUnit>, PluginError> {
        debug!("Listing storage units of {} on {}", schema, self.engine.engine());
        let result = with_connection(&self.engine, config, |handle| async move {
            self.engine.list_storage_units(&handle, schema).await
        })
        .await;
        log_failure(self.engine.engine(), "get_storage_units", result)
    }

    async fn get_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        filter: Option<&WhereCondition>,
        page_size: u64,
        page_offset: u64,
    ) -> Result<RowsResult, PluginError> {
        let result = with_connection(&self.engine, config, |handle| async move {
            let session = Session {
                engine: &self.engine,
                handle: &handle,
            };
            crud::get_rows(&session, schema, storage_unit, filter, page_size, page_offset).await
        })
        .await;
        log_failure(self.engine.engine(), "get_rows", result)
    }

    async fn raw_execute(&self, config: &PluginConfig, query: &str) -> Result<RowsResult, PluginError> {
        debug!("{} raw query: {}", self.engine.engine(), query);
        let result = with_connection(&self.engine, config, |handle| async move {
            let mut result = self.engine.raw_execute(&handle, query).await?;
            result.disable_update = true;
            Ok(result)
        })
        .await;
        log_failure(self.engine.engine(), "raw_execute", result)
    }

    async fn add_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        fields: &[Record],
    ) -> Result<bool, PluginError> {
        let result = with_connection(&self.engine, config, |handle| async move {
            let session = Session {
                engine: &self.engine,
                handle: &handle,
            };
            crud::add_storage_unit(&session, schema, storage_unit, fields).await
        })
        .await;
        log_failure(self.engine.engine(), "add_storage_unit", result)
    }

    async fn update_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
        updated_columns: &[String],
    ) -> Result<bool, PluginError> {
        let result = with_connection(&self.engine, config, |handle| async move {
            let session = Session {
                engine: &self.engine,
                handle: &handle,
            };
            crud::update_storage_unit(&session, schema, storage_unit, values, updated_columns).await
        })
        .await;
        log_failure(self.engine.engine(), "update_storage_unit", result)
    }

    async fn add_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
    ) -> Result<bool, PluginError> {
        let result = with_connection(&self.engine, config, |handle| async move {
            let session = Session {
                engine: &self.engine,
                handle: &handle,
            };
            crud::add_row(&session, schema, storage_unit, values).await
        })
        .await;
        log_failure(self.engine.engine(), "add_row", result)
    }

    async fn delete_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
    ) -> Result<bool, PluginError> {
        let result = with_connection(&self.engine, config, |handle| async move {
            let session = Session {
                engine: &self.engine,
                handle: &handle,
            };
            crud::delete_row(&session, schema, storage_unit, values).await
        })
        .await;
        log_failure(self.engine.engine(), "delete_row", result)
    }

    async fn get_graph(&self, config: &PluginConfig, schema: &str) -> Result<Vec<GraphUnit>, PluginError> {
        let result = with_connection(&self.engine, config, |handle| async move {
            let (units, metadata) = self.schema_metadata(&handle, schema).await?;
            Ok(build_graph(&units, &metadata))
        })
        .await;
        log_failure(self.engine.engine(), "get_graph", result)
    }

    async fn chat(
        &self,
        config: &PluginConfig,
        schema: &str,
        model: &str,
        previous_conversation: &str,
        query: &str,
    ) -> Result<Vec<ChatMessage>, PluginError> {
        require_external_model(config)?;

        let tables = with_connection(&self.engine, config, |handle| async move {
            let (_, metadata) = self.schema_metadata(&handle, schema).await?;
            Ok(metadata)
        })
        .await?;

        let context = ChatContext {
            engine: self.engine.engine(),
            schema: schema.to_string(),
            tables,
        };

        let result = run_chat(
            self,
            self.chat_model.as_ref(),
            config,
            &context,
            model,
            previous_conversation,
            query,
        )
        .await;
        log_failure(self.engine.engine(), "chat", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_column_unique_constraints() {
        let mut constraints = BTreeMap::new();
        constraints.insert("users_email_key".to_string(), vec!["email".to_string()]);
        constraints.insert(
            "users_name_org_key".to_string(),
            vec!["name".to_string(), "org_id".to_string()],
        );

        assert_eq!(single_columns(constraints), vec!["email".to_string()]);
    }
}
