//! MySQL engine
//!
//! MySQL has no schemas inside a database, so the schema of every capability
//! call names a database on the server.

use crate::chat::ChatModel;
use crate::config::{PluginConfig, OPTION_SSL_MODE};
use crate::convert::{normalize_cell, to_wire_string, NativeValue};
use crate::database::connection::Connector;
use crate::database::dialect::{BoundValue, Dialect, Statement};
use crate::database::sql::{raw_rows, single_columns, SqlEngine, SqlPlugin};
use crate::database::traits::PluginError;
use crate::registry::EngineType;
use crate::schema::{Column, ForeignKey, Record, RowsResult, StorageUnit, TableMetadata};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{MySql, MySqlPool, Row};
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_PORT: u16 = 3306;

const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

/// MySQL through a single-connection sqlx pool per call
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlEngine;

pub fn mysql_plugin(chat_model: Arc<dyn ChatModel>) -> SqlPlugin<MySqlEngine> {
    SqlPlugin::new(MySqlEngine, chat_model)
}

fn bind_value(query: Query<'_, MySql, MySqlArguments>, bound: BoundValue) -> Query<'_, MySql, MySqlArguments> {
    match bound.value {
        NativeValue::Null => query.bind(None::<String>),
        NativeValue::Bool(value) => query.bind(value),
        NativeValue::Int(value) => query.bind(value),
        NativeValue::Float(value) => query.bind(value),
        NativeValue::Date(value) => query.bind(value),
        NativeValue::Time(value) => query.bind(value),
        NativeValue::Timestamp(value) => query.bind(value),
        NativeValue::TimestampTz(value) => query.bind(value.with_timezone(&Utc)),
        other => query.bind(to_wire_string(&other)),
    }
}

fn text_cell(row: &MySqlRow, index: usize) -> Result<String, PluginError> {
    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(_) => Ok(row
            .try_get_unchecked::<Option<Vec<u8>>, _>(index)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()),
    }
}

#[async_trait]
impl Connector for MySqlEngine {
    type Handle = MySqlPool;

    async fn open(&self, config: &PluginConfig) -> Result<MySqlPool, PluginError> {
        let credentials = config.credentials();

        let mut options = MySqlConnectOptions::new()
            .host(&credentials.hostname)
            .port(credentials.port(DEFAULT_PORT)?)
            .username(&credentials.username)
            .password(&credentials.password);
        if !credentials.database.is_empty() {
            options = options.database(&credentials.database);
        }
        if let Some(mode) = credentials.option(OPTION_SSL_MODE) {
            let mode = mode
                .parse::<MySqlSslMode>()
                .map_err(|error| PluginError::Connection(error.to_string()))?;
            options = options.ssl_mode(mode);
        }

        let mut pool_options = MySqlPoolOptions::new().max_connections(1);
        if let Some(timeout) = credentials.connection_timeout()? {
            pool_options = pool_options.acquire_timeout(timeout);
        }

        pool_options
            .connect_with(options)
            .await
            .map_err(|error| PluginError::Connection(error.to_string()))
    }

    async fn release(&self, pool: MySqlPool) {
        pool.close().await;
    }
}

impl Dialect for MySqlEngine {
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize, _declared_type: Option<&str>) -> String {
        "?".to_string()
    }

    fn insert_default_values(&self, table: &str) -> String {
        format!("INSERT INTO {} () VALUES ()", table)
    }

    fn text_comparison(&self, column: &str) -> String {
        format!("CAST({} AS CHAR)", self.quote_identifier(column))
    }

    fn select_expression(&self, column: &str, _declared_type: &str) -> String {
        let quoted = self.quote_identifier(column);
        format!("CAST({} AS CHAR) AS {}", quoted, quoted)
    }
}

#[async_trait]
impl SqlEngine for MySqlEngine {
    fn engine(&self) -> EngineType {
        EngineType::MySql
    }

    async fn ping(&self, pool: &MySqlPool) -> Result<(), PluginError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    async fn list_databases(&self, pool: &MySqlPool) -> Result<Vec<String>, PluginError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT CAST(SCHEMA_NAME AS CHAR) FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME",
        )
        .fetch_all(pool)
        .await?;
        Ok(names)
    }

    async fn list_schemas(&self, pool: &MySqlPool) -> Result<Vec<String>, PluginError> {
        let names = self.list_databases(pool).await?;
        Ok(names
            .into_iter()
            .filter(|name| !SYSTEM_SCHEMAS.contains(&name.to_ascii_lowercase().as_str()))
            .collect())
    }

    async fn list_storage_units(&self, pool: &MySqlPool, schema: &str) -> Result<Vec<StorageUnit>, PluginError> {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT CAST(1 AS SIGNED) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?")
                .bind(schema)
                .fetch_optional(pool)
                .await?;
        if exists.is_none() {
            return Err(PluginError::SchemaNotFound(schema.to_string()));
        }

        let rows = sqlx::query(
            "SELECT CAST(TABLE_NAME AS CHAR) AS name, CAST(TABLE_TYPE AS CHAR) AS table_type, \
                    CAST(COALESCE(TABLE_ROWS, 0) AS SIGNED) AS row_count, \
                    CAST(COALESCE(DATA_LENGTH, 0) + COALESCE(INDEX_LENGTH, 0) AS SIGNED) AS total_size \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? \
             ORDER BY TABLE_NAME",
        )
        .bind(schema)
        .fetch_all(pool)
        .await?;

        let mut units = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let table_type: String = row.try_get("table_type")?;
            let row_count: i64 = row.try_get("row_count")?;
            let total_size: i64 = row.try_get("total_size")?;

            units.push(StorageUnit {
                name,
                attributes: vec![
                    Record::new("Type", table_type),
                    Record::new("Total Size", format!("{} bytes", total_size)),
                    Record::new("Count", row_count.to_string()),
                ],
            });
        }

        Ok(units)
    }

    async fn table_metadata(&self, pool: &MySqlPool, schema: &str, storage_unit: &str) -> Result<TableMetadata, PluginError> {
        let column_rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS name, CAST(COLUMN_TYPE AS CHAR) AS data_type \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(schema)
        .bind(storage_unit)
        .fetch_all(pool)
        .await?;

        if column_rows.is_empty() {
            return Err(PluginError::SchemaNotFound(format!("{}.{}", schema, storage_unit)));
        }

        let mut columns = Vec::with_capacity(column_rows.len());
        for row in column_rows {
            columns.push(Column::new(
                row.try_get::<String, _>("name")?,
                row.try_get::<String, _>("data_type")?,
            ));
        }

        let primary_key = sqlx::query_scalar::<_, String>(
            "SELECT CAST(COLUMN_NAME AS CHAR) FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(schema)
        .bind(storage_unit)
        .fetch_all(pool)
        .await?;

        let index_rows = sqlx::query(
            "SELECT CAST(INDEX_NAME AS CHAR) AS index_name, CAST(COLUMN_NAME AS CHAR) AS column_name \
             FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND NON_UNIQUE = 0 AND INDEX_NAME <> 'PRIMARY' \
             ORDER BY INDEX_NAME, SEQ_IN_INDEX",
        )
        .bind(schema)
        .bind(storage_unit)
        .fetch_all(pool)
        .await?;

        let mut unique_indexes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in index_rows {
            let index_name: String = row.try_get("index_name")?;
            let column_name: Option<String> = row.try_get("column_name")?;
            if let Some(column_name) = column_name {
                unique_indexes.entry(index_name).or_default().push(column_name);
            }
        }

        let foreign_key_rows = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name, \
                    CAST(REFERENCED_TABLE_NAME AS CHAR) AS references_table, \
                    CAST(REFERENCED_COLUMN_NAME AS CHAR) AS references_column \
             FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
               AND REFERENCED_TABLE_NAME IS NOT NULL AND REFERENCED_TABLE_SCHEMA = TABLE_SCHEMA \
             ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION",
        )
        .bind(schema)
        .bind(storage_unit)
        .fetch_all(pool)
        .await?;

        let mut foreign_keys = Vec::with_capacity(foreign_key_rows.len());
        for row in foreign_key_rows {
            foreign_keys.push(ForeignKey {
                column: row.try_get("column_name")?,
                references_table: row.try_get("references_table")?,
                references_column: row.try_get("references_column")?,
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

    async fn execute(&self, pool: &MySqlPool, statement: Statement) -> Result<u64, PluginError> {
        let mut query = sqlx::query(&statement.sql);
        for bound in statement.params {
            query = bind_value(query, bound);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    async fn fetch(&self, pool: &MySqlPool, statement: Statement, columns: &[Column]) -> Result<Vec<Vec<String>>, PluginError> {
        let mut query = sqlx::query(&statement.sql);
        for bound in statement.params {
            query = bind_value(query, bound);
        }

        let rows = query.fetch_all(pool).await?;
        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let raw = text_cell(&row, index)?;
                values.push(if raw.is_empty() { raw } else { normalize_cell(&column.column_type, &raw) });
            }
            cells.push(values);
        }
        Ok(cells)
    }

    async fn raw_execute(&self, pool: &MySqlPool, query: &str) -> Result<RowsResult, PluginError> {
        // text protocol, every value arrives as a string
        raw_rows(pool, query, text_cell).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::crud::{plan_insert, plan_select};
    use crate::schema::WhereCondition;

    fn products() -> TableMetadata {
        TableMetadata {
            name: "products".to_string(),
            columns: vec![Column::new("id", "int(11)"), Column::new("title", "varchar(100)")],
            primary_key: vec!["id".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_backtick_quoting() {
        assert_eq!(MySqlEngine.quote_identifier("order"), "`order`");
        assert_eq!(MySqlEngine.quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(MySqlEngine.qualified_name("shop", "order"), "`shop`.`order`");
    }

    #[test]
    fn test_select_casts_columns_to_char() {
        let filter = WhereCondition::equals("id", "3");
        let statement = plan_select(&MySqlEngine, &products(), "shop", "products", Some(&filter), 10, 0).unwrap();

        assert_eq!(
            statement.sql,
            "SELECT CAST(`id` AS CHAR) AS `id`, CAST(`title` AS CHAR) AS `title` FROM `shop`.`products` \
             WHERE `id` = ? ORDER BY `id` LIMIT 10 OFFSET 0"
        );
        assert_eq!(statement.params[0].value, NativeValue::Int(3));
    }

    #[test]
    fn test_insert_with_only_defaults() {
        let values = [Record::new("id", "").with_extra("Default", "true")];
        let statement = plan_insert(&MySqlEngine, &products(), "shop", "products", &values).unwrap();
        assert_eq!(statement.sql, "INSERT INTO `shop`.`products` () VALUES ()");
    }
}
