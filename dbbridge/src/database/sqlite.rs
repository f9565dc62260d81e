//! SQLite engine
//!
//! The credentials' database is the path of the database file. Schemas are
//! the attached databases (`main` first).

use crate::chat::ChatModel;
use crate::config::PluginConfig;
use crate::convert::{normalize_cell, to_wire_string, NativeValue};
use crate::database::connection::Connector;
use crate::database::dialect::{BoundValue, Dialect, Statement};
use crate::database::sql::{raw_rows, single_columns, SqlEngine, SqlPlugin};
use crate::database::traits::PluginError;
use crate::registry::EngineType;
use crate::schema::{Column, ForeignKey, Record, RowsResult, StorageUnit, TableMetadata};
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::collections::BTreeMap;
use std::sync::Arc;

/// SQLite through a single-connection sqlx pool per call
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteEngine;

pub fn sqlite_plugin(chat_model: Arc<dyn ChatModel>) -> SqlPlugin<SqliteEngine> {
    SqlPlugin::new(SqliteEngine, chat_model)
}

fn bind_value<'q>(query: Query<'q, Sqlite, SqliteArguments<'q>>, bound: BoundValue) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match bound.value {
        NativeValue::Null => query.bind(None::<String>),
        NativeValue::Bool(value) => query.bind(value),
        NativeValue::Int(value) => query.bind(value),
        NativeValue::Float(value) => query.bind(value),
        // dynamic typing: everything else is stored in its wire form
        other => query.bind(to_wire_string(&other)),
    }
}

/// Read a cell by its runtime storage class
///
/// SQLite reports INTEGER, REAL, TEXT, BLOB or NULL per value, whatever the
/// column declares.
fn decode_cell(row: &SqliteRow, index: usize) -> Result<String, PluginError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(String::new());
    }
    let storage_class = raw.type_info().name().to_string();

    let value = match storage_class.as_str() {
        "INTEGER" => row.try_get_unchecked::<i64, _>(index)?.to_string(),
        "REAL" => row.try_get_unchecked::<f64, _>(index)?.to_string(),
        "BLOB" => String::from_utf8_lossy(&row.try_get_unchecked::<Vec<u8>, _>(index)?).into_owned(),
        _ => row.try_get_unchecked::<String, _>(index)?,
    };
    Ok(value)
}

#[async_trait]
impl Connector for SqliteEngine {
    type Handle = SqlitePool;

    async fn open(&self, config: &PluginConfig) -> Result<SqlitePool, PluginError> {
        let credentials = config.credentials();
        if credentials.database.trim().is_empty() {
            return Err(PluginError::Connection("no database file given".to_string()));
        }

        let options = SqliteConnectOptions::new()
            .filename(&credentials.database)
            .create_if_missing(false)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(1);
        if let Some(timeout) = credentials.connection_timeout()? {
            pool_options = pool_options.acquire_timeout(timeout);
        }

        pool_options
            .connect_with(options)
            .await
            .map_err(|error| PluginError::Connection(error.to_string()))
    }

    async fn release(&self, pool: SqlitePool) {
        pool.close().await;
    }
}

impl Dialect for SqliteEngine {
    fn placeholder(&self, _index: usize, _declared_type: Option<&str>) -> String {
        "?".to_string()
    }
}

impl SqliteEngine {
    async fn attached_databases(&self, pool: &SqlitePool) -> Result<Vec<(String, String)>, PluginError> {
        let rows = sqlx::query("PRAGMA database_list").fetch_all(pool).await?;

        let mut databases = Vec::with_capacity(rows.len());
        for row in rows {
            // PRAGMA database_list returns: seq, name, file
            let name: String = row.try_get("name")?;
            let file: Option<String> = row.try_get("file")?;
            databases.push((name, file.unwrap_or_default()));
        }
        Ok(databases)
    }

    async fn primary_key_of(&self, pool: &SqlitePool, schema: &str, storage_unit: &str) -> Result<Vec<String>, PluginError> {
        let query = format!(
            "PRAGMA {}.table_info({})",
            self.quote_identifier(schema),
            self.quote_identifier(storage_unit)
        );
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut keyed = Vec::new();
        for row in rows {
            let position: i64 = row.try_get("pk")?;
            if position > 0 {
                keyed.push((position, row.try_get::<String, _>("name")?));
            }
        }
        keyed.sort_by_key(|(position, _)| *position);
        Ok(keyed.into_iter().map(|(_, name)| name).collect())
    }
}

#[async_trait]
impl SqlEngine for SqliteEngine {
    fn engine(&self) -> EngineType {
        EngineType::Sqlite
    }

    async fn ping(&self, pool: &SqlitePool) -> Result<(), PluginError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    async fn list_databases(&self, pool: &SqlitePool) -> Result<Vec<String>, PluginError> {
        Ok(self
            .attached_databases(pool)
            .await?
            .into_iter()
            .map(|(name, file)| if file.is_empty() { name } else { file })
            .collect())
    }

    async fn list_schemas(&self, pool: &SqlitePool) -> Result<Vec<String>, PluginError> {
        Ok(self
            .attached_databases(pool)
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn list_storage_units(&self, pool: &SqlitePool, schema: &str) -> Result<Vec<StorageUnit>, PluginError> {
        let attached = self.attached_databases(pool).await?;
        if !attached.iter().any(|(name, _)| name == schema) {
            return Err(PluginError::SchemaNotFound(schema.to_string()));
        }

        let query = format!(
            "SELECT name, type FROM {}.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            self.quote_identifier(schema)
        );
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut units = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let unit_type: String = row.try_get("type")?;

            let count_query = format!("SELECT COUNT(*) FROM {}", self.qualified_name(schema, &name));
            let count: i64 = sqlx::query_scalar(&count_query).fetch_one(pool).await?;

            units.push(StorageUnit {
                name,
                attributes: vec![
                    Record::new("Type", unit_type),
                    Record::new("Count", count.to_string()),
                ],
            });
        }

        Ok(units)
    }

    async fn table_metadata(&self, pool: &SqlitePool, schema: &str, storage_unit: &str) -> Result<TableMetadata, PluginError> {
        let quoted_schema = self.quote_identifier(schema);
        let quoted_unit = self.quote_identifier(storage_unit);

        let table_info_query = format!("PRAGMA {}.table_info({})", quoted_schema, quoted_unit);
        let column_rows = sqlx::query(&table_info_query).fetch_all(pool).await?;

        if column_rows.is_empty() {
            return Err(PluginError::SchemaNotFound(format!("{}.{}", schema, storage_unit)));
        }

        let mut columns = Vec::with_capacity(column_rows.len());
        let mut keyed = Vec::new();
        for row in column_rows {
            // PRAGMA table_info returns: cid, name, type, notnull, dflt_value, pk
            let name: String = row.try_get("name")?;
            let data_type: String = row.try_get("type")?;
            let position: i64 = row.try_get("pk")?;

            if position > 0 {
                keyed.push((position, name.clone()));
            }
            columns.push(Column::new(name, data_type));
        }
        keyed.sort_by_key(|(position, _)| *position);
        let primary_key: Vec<String> = keyed.into_iter().map(|(_, name)| name).collect();

        // PRAGMA index_list returns: seq, name, unique, origin, partial
        let index_list_query = format!("PRAGMA {}.index_list({})", quoted_schema, quoted_unit);
        let index_rows = sqlx::query(&index_list_query).fetch_all(pool).await?;

        let mut unique_indexes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in index_rows {
            let index_name: String = row.try_get("name")?;
            let unique: i64 = row.try_get("unique")?;
            let origin: String = row.try_get("origin")?;
            if unique == 0 || origin == "pk" {
                continue;
            }

            let index_info_query = format!(
                "PRAGMA {}.index_info({})",
                quoted_schema,
                self.quote_identifier(&index_name)
            );
            let index_columns = sqlx::query(&index_info_query).fetch_all(pool).await?;
            let entry = unique_indexes.entry(index_name).or_default();
            for column_row in index_columns {
                // expression indexes have no column name
                if let Some(name) = column_row.try_get::<Option<String>, _>("name")? {
                    entry.push(name);
                }
            }
        }

        // PRAGMA foreign_key_list returns: id, seq, table, from, to, on_update, on_delete, match
        let foreign_key_query = format!("PRAGMA {}.foreign_key_list({})", quoted_schema, quoted_unit);
        let foreign_key_rows = sqlx::query(&foreign_key_query).fetch_all(pool).await?;

        let mut foreign_keys = Vec::with_capacity(foreign_key_rows.len());
        for row in foreign_key_rows {
            let column: String = row.try_get("from")?;
            let references_table: String = row.try_get("table")?;
            let references_column: Option<String> = row.try_get("to")?;

            // a missing target column means the target's primary key
            let references_column = match references_column {
                Some(references_column) => references_column,
                None => self
                    .primary_key_of(pool, schema, &references_table)
                    .await?
                    .into_iter()
                    .next()
                    .unwrap_or_default(),
            };

            foreign_keys.push(ForeignKey {
                column,
                references_table,
                references_column,
            });
        }

        Ok(TableMetadata {
            name: storage_unit.to_string(),
            columns,
            primary_key,
            unique_columns: single_columns(unique_indexes),
            foreign_keys,
        })
    }

    async fn execute(&self, pool: &SqlitePool, statement: Statement) -> Result<u64, PluginError> {
        let mut query = sqlx::query(&statement.sql);
        for bound in statement.params {
            query = bind_value(query, bound);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    async fn fetch(&self, pool: &SqlitePool, statement: Statement, columns: &[Column]) -> Result<Vec<Vec<String>>, PluginError> {
        let mut query = sqlx::query(&statement.sql);
        for bound in statement.params {
            query = bind_value(query, bound);
        }

        let rows = query.fetch_all(pool).await?;
        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let raw = decode_cell(&row, index)?;
                values.push(if raw.is_empty() { raw } else { normalize_cell(&column.column_type, &raw) });
            }
            cells.push(values);
        }
        Ok(cells)
    }

    async fn raw_execute(&self, pool: &SqlitePool, query: &str) -> Result<RowsResult, PluginError> {
        raw_rows(pool, query, decode_cell).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatContext, ChatReply};
    use crate::config::{Credentials, ExternalModel};
    use crate::database::traits::Plugin;
    use crate::schema::{RelationshipType, WhereCondition};
    use tempfile::TempDir;

    struct ScriptedChatModel {
        replies: Vec<ChatReply>,
    }

    #[async_trait]
    impl ChatModel for ScriptedChatModel {
        async fn supported_models(&self, _external_model: &ExternalModel) -> Result<Vec<String>, PluginError> {
            Ok(vec!["scripted".to_string()])
        }

        async fn complete(
            &self,
            _external_model: &ExternalModel,
            _model: &str,
            context: &ChatContext,
            _previous_conversation: &str,
            _query: &str,
        ) -> Result<Vec<ChatReply>, PluginError> {
            assert!(context.tables.iter().any(|table| table.name == "users"));
            Ok(self.replies.clone())
        }
    }

    async fn fixture(replies: Vec<ChatReply>) -> (TempDir, SqlPlugin<SqliteEngine>, PluginConfig) {
        let directory = TempDir::new().unwrap();
        let path = directory.path().join("app.db");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(&path).create_if_missing(true))
            .await
            .unwrap();
        sqlx::raw_sql(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active BOOLEAN DEFAULT 1);
             CREATE TABLE profiles (id INTEGER PRIMARY KEY, user_id INTEGER UNIQUE REFERENCES users(id), bio TEXT);
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users, total REAL);
             CREATE TABLE audit_log (message TEXT);
             INSERT INTO users (id, name, active) VALUES (7, 'Bob', 1), (8, 'Carol', 0);
             INSERT INTO orders (user_id, total) VALUES (7, 12.5);",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let plugin = sqlite_plugin(Arc::new(ScriptedChatModel { replies }));
        let config = PluginConfig::new(Credentials::new("Sqlite3", "", "", "", path.to_string_lossy()));
        (directory, plugin, config)
    }

    fn cell<'r>(result: &'r RowsResult, row: usize, column: &str) -> &'r str {
        let index = result
            .columns
            .iter()
            .position(|candidate| candidate.name == column)
            .unwrap();
        &result.rows[row][index]
    }

    #[tokio::test]
    async fn test_availability() {
        let (_directory, plugin, config) = fixture(vec![]).await;
        assert!(plugin.is_available(&config).await);

        let missing = PluginConfig::new(Credentials::new("Sqlite3", "", "", "", "/nonexistent/dir/app.db"));
        assert!(!plugin.is_available(&missing).await);
    }

    #[tokio::test]
    async fn test_schemas_and_storage_units() {
        let (_directory, plugin, config) = fixture(vec![]).await;

        assert_eq!(plugin.get_all_schemas(&config).await.unwrap(), vec!["main".to_string()]);

        let databases = plugin.get_databases(&config).await.unwrap();
        assert_eq!(databases.len(), 1);
        assert!(databases[0].ends_with("app.db"));

        let units = plugin.get_storage_units(&config, "main").await.unwrap();
        let names: Vec<&str> = units.iter().map(|unit| unit.name.as_str()).collect();
        assert_eq!(names, vec!["audit_log", "orders", "profiles", "users"]);

        let users = units.iter().find(|unit| unit.name == "users").unwrap();
        assert!(users.attributes.contains(&Record::new("Count", "2")));

        assert!(matches!(
            plugin.get_storage_units(&config, "missing").await,
            Err(PluginError::SchemaNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_then_read_back() {
        let (_directory, plugin, config) = fixture(vec![]).await;
        let values = [Record::new("id", "7"), Record::new("name", "Alice")];

        let updated = plugin
            .update_storage_unit(&config, "main", "users", &values, &["name".to_string()])
            .await
            .unwrap();
        assert!(updated);

        let filter = WhereCondition::equals("id", "7");
        let rows = plugin
            .get_rows(&config, "main", "users", Some(&filter), 10, 0)
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(cell(&rows, 0, "name"), "Alice");
        assert_eq!(cell(&rows, 0, "active"), "true");
        assert!(!rows.disable_update);
        assert!(rows.is_rectangular());
    }

    #[tokio::test]
    async fn test_update_missing_row_fails() {
        let (_directory, plugin, config) = fixture(vec![]).await;
        let values = [Record::new("id", "999"), Record::new("name", "Nobody")];

        let error = plugin
            .update_storage_unit(&config, "main", "users", &values, &["name".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(error, PluginError::NoRowsAffected(_)));
    }

    #[tokio::test]
    async fn test_add_and_delete_rows() {
        let (_directory, plugin, config) = fixture(vec![]).await;

        let added = plugin
            .add_row(
                &config,
                "main",
                "users",
                &[Record::new("id", "9"), Record::new("name", "Dave"), Record::new("active", "no")],
            )
            .await
            .unwrap();
        assert!(added);

        assert!(plugin
            .delete_row(&config, "main", "users", &[Record::new("id", "9")])
            .await
            .unwrap());

        let error = plugin
            .delete_row(&config, "main", "users", &[Record::new("id", "999")])
            .await
            .unwrap_err();
        assert!(matches!(&error, PluginError::NoRowsAffected(message) if message == "no rows matched"));

        let error = plugin
            .add_row(&config, "main", "users", &[Record::new("id", "abc")])
            .await
            .unwrap_err();
        assert!(matches!(error, PluginError::Conversion { .. }));
    }

    #[tokio::test]
    async fn test_rows_without_primary_key_are_read_only() {
        let (_directory, plugin, config) = fixture(vec![]).await;

        let rows = plugin.get_rows(&config, "main", "audit_log", None, 0, 0).await.unwrap();
        assert!(rows.disable_update);
        assert!(rows.rows.is_empty());
        assert_eq!(rows.columns, vec![Column::new("message", "TEXT")]);
    }

    #[tokio::test]
    async fn test_add_storage_unit_and_empty_schema_listing() {
        let (_directory, plugin, config) = fixture(vec![]).await;
        let fields = [
            Record::new("id", "INTEGER").with_extra("Primary", "true"),
            Record::new("label", "TEXT").with_extra("Nullable", "false"),
        ];

        assert!(plugin.add_storage_unit(&config, "main", "tags", &fields).await.unwrap());

        let metadata = {
            let pool = SqliteEngine.open(&config).await.unwrap();
            let metadata = SqliteEngine.table_metadata(&pool, "main", "tags").await.unwrap();
            SqliteEngine.release(pool).await;
            metadata
        };
        assert_eq!(metadata.primary_key, vec!["id".to_string()]);

        let empty = TempDir::new().unwrap();
        let path = empty.path().join("empty.db");
        let pool = SqlitePoolOptions::new()
            .connect_with(SqliteConnectOptions::new().filename(&path).create_if_missing(true))
            .await
            .unwrap();
        pool.close().await;

        let empty_config = PluginConfig::new(Credentials::new("Sqlite3", "", "", "", path.to_string_lossy()));
        assert!(plugin.get_storage_units(&empty_config, "main").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_graph() {
        let (_directory, plugin, config) = fixture(vec![]).await;

        let graph = plugin.get_graph(&config, "main").await.unwrap();
        assert_eq!(graph.len(), 4);

        let users = graph.iter().find(|unit| unit.unit.name == "users").unwrap();
        assert!(users
            .relations
            .iter()
            .any(|relation| relation.name == "orders" && relation.relationship == RelationshipType::OneToMany));
        assert!(users
            .relations
            .iter()
            .any(|relation| relation.name == "profiles" && relation.relationship == RelationshipType::OneToOne));

        let audit_log = graph.iter().find(|unit| unit.unit.name == "audit_log").unwrap();
        assert!(audit_log.relations.is_empty());
    }

    #[tokio::test]
    async fn test_raw_execute() {
        let (_directory, plugin, config) = fixture(vec![]).await;

        let result = plugin
            .raw_execute(&config, "SELECT id, name FROM users ORDER BY id")
            .await
            .unwrap();
        assert!(result.disable_update);
        assert!(result.is_rectangular());
        assert_eq!(result.rows, vec![vec!["7", "Bob"], vec!["8", "Carol"]]);

        let error = plugin.raw_execute(&config, "SELEC nonsense").await.unwrap_err();
        assert!(matches!(&error, PluginError::Query(message) if message.contains("syntax error")));
    }

    #[tokio::test]
    async fn test_chat_executes_query_messages() {
        let replies = vec![
            ChatReply::new("message", "Here are the users"),
            ChatReply::new("sql:get", "SELECT name FROM users ORDER BY id"),
        ];
        let (_directory, plugin, config) = fixture(replies).await;
        let config = config.with_external_model(ExternalModel {
            model_type: "Scripted".to_string(),
            token: String::new(),
        });

        let messages = plugin
            .chat(&config, "main", "scripted", "", "list users")
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert!(messages[0].result.is_none());
        let result = messages[1].result.as_ref().unwrap();
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.rows, vec![vec!["Bob"], vec!["Carol"]]);
    }

    #[tokio::test]
    async fn test_raw_execute_without_rows_keeps_the_header() {
        let (_directory, plugin, config) = fixture(vec![]).await;

        let result = plugin
            .raw_execute(&config, "SELECT id, name FROM users WHERE id = 999")
            .await
            .unwrap();
        let names: Vec<&str> = result.columns.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert!(result.rows.is_empty());

        let result = plugin
            .raw_execute(&config, "DELETE FROM audit_log WHERE message = 'none'")
            .await
            .unwrap();
        assert!(result.columns.is_empty());
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_chat_query_without_rows_carries_columns() {
        let replies = vec![ChatReply::new("sql", "SELECT name FROM users WHERE id = 999")];
        let (_directory, plugin, config) = fixture(replies).await;
        let config = config.with_external_model(ExternalModel::default());

        let messages = plugin
            .chat(&config, "main", "scripted", "", "who is user 999")
            .await
            .unwrap();

        let result = messages[0].result.as_ref().unwrap();
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.columns[0].name, "name");
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_chat_fails_when_a_query_fails() {
        let replies = vec![ChatReply::new("sql", "SELECT * FROM missing_table")];
        let (_directory, plugin, config) = fixture(replies).await;
        let config = config.with_external_model(ExternalModel::default());

        assert!(matches!(
            plugin.chat(&config, "main", "scripted", "", "anything").await,
            Err(PluginError::Query(_))
        ));
    }
}
