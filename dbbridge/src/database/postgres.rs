//! PostgreSQL engine

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
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_PORT: u16 = 5432;

/// PostgreSQL through a single-connection sqlx pool per call
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresEngine;

pub fn postgres_plugin(chat_model: Arc<dyn ChatModel>) -> SqlPlugin<PostgresEngine> {
    SqlPlugin::new(PostgresEngine, chat_model)
}

fn bind_value(query: Query<'_, Postgres, PgArguments>, bound: BoundValue) -> Query<'_, Postgres, PgArguments> {
    match bound.value {
        NativeValue::Null => query.bind(None::<String>),
        NativeValue::Bool(value) => query.bind(value),
        NativeValue::Int(value) => query.bind(value),
        NativeValue::Float(value) => query.bind(value),
        NativeValue::Date(value) => query.bind(value),
        NativeValue::Time(value) => query.bind(value),
        NativeValue::Timestamp(value) => query.bind(value),
        NativeValue::TimestampTz(value) => query.bind(value.with_timezone(&Utc)),
        NativeValue::Uuid(value) => query.bind(value),
        other => query.bind(to_wire_string(&other)),
    }
}

/// Read a text-format cell, falling back to lossy bytes
fn text_cell(row: &PgRow, index: usize) -> Result<String, PluginError> {
    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(_) => Ok(row
            .try_get_unchecked::<Option<Vec<u8>>, _>(index)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()),
    }
}

#[async_trait]
impl Connector for PostgresEngine {
    type Handle = PgPool;

    async fn open(&self, config: &PluginConfig) -> Result<PgPool, PluginError> {
        let credentials = config.credentials();

        let mut options = PgConnectOptions::new()
            .host(&credentials.hostname)
            .port(credentials.port(DEFAULT_PORT)?)
            .username(&credentials.username)
            .password(&credentials.password);
        if !credentials.database.is_empty() {
            options = options.database(&credentials.database);
        }
        if let Some(mode) = credentials.option(OPTION_SSL_MODE) {
            let mode = mode
                .parse::<PgSslMode>()
                .map_err(|error| PluginError::Connection(error.to_string()))?;
            options = options.ssl_mode(mode);
        }

        let mut pool_options = PgPoolOptions::new().max_connections(1);
        if let Some(timeout) = credentials.connection_timeout()? {
            pool_options = pool_options.acquire_timeout(timeout);
        }

        pool_options
            .connect_with(options)
            .await
            .map_err(|error| PluginError::Connection(error.to_string()))
    }

    async fn release(&self, pool: PgPool) {
        pool.close().await;
    }
}

impl Dialect for PostgresEngine {
    fn placeholder(&self, index: usize, declared_type: Option<&str>) -> String {
        match declared_type {
            Some(declared_type) => format!("CAST(${} AS {})", index, declared_type),
            None => format!("${}", index),
        }
    }

    fn select_expression(&self, column: &str, _declared_type: &str) -> String {
        let quoted = self.quote_identifier(column);
        format!("CAST({} AS TEXT) AS {}", quoted, quoted)
    }
}

#[async_trait]
impl SqlEngine for PostgresEngine {
    fn engine(&self) -> EngineType {
        EngineType::Postgres
    }

    async fn ping(&self, pool: &PgPool) -> Result<(), PluginError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    async fn list_databases(&self, pool: &PgPool) -> Result<Vec<String>, PluginError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT datname::text FROM pg_database WHERE NOT datistemplate AND datallowconn ORDER BY datname",
        )
        .fetch_all(pool)
        .await?;
        Ok(names)
    }

    async fn list_schemas(&self, pool: &PgPool) -> Result<Vec<String>, PluginError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT nspname::text FROM pg_namespace \
             WHERE nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
             AND nspname NOT LIKE 'pg_temp_%' AND nspname NOT LIKE 'pg_toast_temp_%' \
             ORDER BY nspname",
        )
        .fetch_all(pool)
        .await?;
        Ok(names)
    }

    async fn list_storage_units(&self, pool: &PgPool, schema: &str) -> Result<Vec<StorageUnit>, PluginError> {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_namespace WHERE nspname = $1")
            .bind(schema)
            .fetch_optional(pool)
            .await?;
        if exists.is_none() {
            return Err(PluginError::SchemaNotFound(schema.to_string()));
        }

        let rows = sqlx::query(
            "SELECT t.table_name::text AS name, t.table_type::text AS table_type, \
                    GREATEST(c.reltuples, 0)::bigint AS row_count, \
                    pg_size_pretty(pg_total_relation_size(c.oid)) AS total_size \
             FROM information_schema.tables t \
             JOIN pg_namespace n ON n.nspname = t.table_schema \
             JOIN pg_class c ON c.relname = t.table_name AND c.relnamespace = n.oid \
             WHERE t.table_schema = $1 \
             ORDER BY t.table_name",
        )
        .bind(schema)
        .fetch_all(pool)
        .await?;

        let mut units = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let table_type: String = row.try_get("table_type")?;
            let row_count: i64 = row.try_get("row_count")?;
            let total_size: String = row.try_get("total_size")?;

            units.push(StorageUnit {
                name,
                attributes: vec![
                    Record::new("Type", table_type),
                    Record::new("Total Size", total_size),
                    Record::new("Count", row_count.to_string()),
                ],
            });
        }

        Ok(units)
    }

    async fn table_metadata(&self, pool: &PgPool, schema: &str, storage_unit: &str) -> Result<TableMetadata, PluginError> {
        let column_rows = sqlx::query(
            "SELECT a.attname::text AS name, format_type(a.atttypid, a.atttypmod) AS data_type \
             FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
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

        // contype: p = primary key, u = unique, f = foreign key
        let constraint_rows = sqlx::query(
            "SELECT con.contype::text AS kind, con.conname::text AS constraint_name, \
                    src.attname::text AS column_name, \
                    ref_class.relname::text AS references_table, \
                    ref.attname::text AS references_column \
             FROM pg_constraint con \
             JOIN pg_class c ON c.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, position) \
             JOIN pg_attribute src ON src.attrelid = con.conrelid AND src.attnum = k.attnum \
             LEFT JOIN pg_class ref_class ON ref_class.oid = con.confrelid \
             LEFT JOIN pg_attribute ref ON ref.attrelid = con.confrelid AND ref.attnum = con.confkey[k.position] \
             WHERE n.nspname = $1 AND c.relname = $2 AND con.contype IN ('p', 'u', 'f') \
             ORDER BY con.conname, k.position",
        )
        .bind(schema)
        .bind(storage_unit)
        .fetch_all(pool)
        .await?;

        let mut primary_key = Vec::new();
        let mut unique_constraints: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut foreign_keys = Vec::new();

        for row in constraint_rows {
            let kind: String = row.try_get("kind")?;
            let constraint_name: String = row.try_get("constraint_name")?;
            let column_name: String = row.try_get("column_name")?;

            match kind.as_str() {
                "p" => primary_key.push(column_name),
                "u" => unique_constraints.entry(constraint_name).or_default().push(column_name),
                "f" => {
                    let references_table: Option<String> = row.try_get("references_table")?;
                    let references_column: Option<String> = row.try_get("references_column")?;
                    if let (Some(references_table), Some(references_column)) = (references_table, references_column) {
                        foreign_keys.push(ForeignKey {
                            column: column_name,
                            references_table,
                            references_column,
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(TableMetadata {
            name: storage_unit.to_string(),
            columns,
            primary_key,
            unique_columns: single_columns(unique_constraints),
            foreign_keys,
        })
    }

    async fn execute(&self, pool: &PgPool, statement: Statement) -> Result<u64, PluginError> {
        let mut query = sqlx::query(&statement.sql);
        for bound in statement.params {
            query = bind_value(query, bound);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }

    async fn fetch(&self, pool: &PgPool, statement: Statement, columns: &[Column]) -> Result<Vec<Vec<String>>, PluginError> {
        let mut query = sqlx::query(&statement.sql);
        for bound in statement.params {
            query = bind_value(query, bound);
        }

        let rows = query.fetch_all(pool).await?;
        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let raw: Option<String> = row.try_get(index)?;
                values.push(raw.map(|raw| normalize_cell(&column.column_type, &raw)).unwrap_or_default());
            }
            cells.push(values);
        }
        Ok(cells)
    }

    async fn raw_execute(&self, pool: &PgPool, query: &str) -> Result<RowsResult, PluginError> {
        // simple query protocol, every value arrives in text format
        raw_rows(pool, query, text_cell).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::crud::plan_update;

    #[test]
    fn test_placeholders_cast_to_declared_type() {
        assert_eq!(PostgresEngine.placeholder(1, Some("integer")), "CAST($1 AS integer)");
        assert_eq!(PostgresEngine.placeholder(3, None), "$3");
    }

    #[test]
    fn test_select_expression_reads_text() {
        assert_eq!(
            PostgresEngine.select_expression("created at", "timestamp"),
            "CAST(\"created at\" AS TEXT) AS \"created at\""
        );
    }

    #[test]
    fn test_update_statement() {
        let metadata = TableMetadata {
            name: "users".to_string(),
            columns: vec![Column::new("id", "integer"), Column::new("name", "character varying(50)")],
            primary_key: vec!["id".to_string()],
            ..Default::default()
        };
        let values = [Record::new("id", "7"), Record::new("name", "Alice")];

        let statement = plan_update(&PostgresEngine, &metadata, "public", "users", &values, &["name".to_string()])
            .unwrap()
            .unwrap();

        assert_eq!(
            statement.sql,
            "UPDATE \"public\".\"users\" SET \"name\" = CAST($1 AS character varying(50)) \
             WHERE \"id\" = CAST($2 AS integer)"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connection_error() {
        let credentials = crate::config::Credentials::new("Postgres", "127.0.0.1", "user", "secret", "app")
            .with_option("Port", "1")
            .with_option("Connection Timeout", "1");
        let config = PluginConfig::new(credentials);

        assert!(matches!(
            PostgresEngine.open(&config).await,
            Err(PluginError::Connection(_))
        ));
    }
}
