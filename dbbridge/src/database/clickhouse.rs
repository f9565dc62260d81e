//! ClickHouse engine over the HTTP interface
//!
//! Statements are POSTed as the request body; bound values travel as typed
//! server-side parameters (`{p1:Int32}` in the text, `param_p1` in the URL).
//! Schemas are ClickHouse databases. There are no foreign keys, and
//! mutations do not report affected rows.

use crate::chat::ChatModel;
use crate::config::{PluginConfig, OPTION_HTTP_PROTOCOL};
use crate::convert::{normalize_cell, to_wire_string, NativeValue};
use crate::database::connection::Connector;
use crate::database::dialect::{Dialect, Statement};
use crate::database::sql::{SqlEngine, SqlPlugin};
use crate::database::traits::PluginError;
use crate::registry::EngineType;
use crate::schema::{Column, Record, RowsResult, StorageUnit, TableMetadata};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_PORT: u16 = 8123;

const OUTPUT_FORMAT: &str = "JSONCompactStrings";

const SUMMARY_HEADER: &str = "x-clickhouse-summary";

/// Settings for planned writes: wait until `ALTER TABLE` mutations are applied
const WRITE_SETTINGS: &[(&str, &str)] = &[("mutations_sync", "1")];

const SYSTEM_DATABASES: &[&str] = &["system", "INFORMATION_SCHEMA", "information_schema"];

/// ClickHouse through one HTTP client per call
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickHouseEngine;

pub fn clickhouse_plugin(chat_model: Arc<dyn ChatModel>) -> SqlPlugin<ClickHouseEngine> {
    SqlPlugin::new(ClickHouseEngine, chat_model)
}

/// Connection settings plus the HTTP client carrying them
#[derive(Debug, Clone)]
pub struct ClickHouseClient {
    http: reqwest::Client,
    url: String,
    username: String,
    password: String,
    database: String,
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

/// Body of a `JSONCompactStrings` response
#[derive(Debug, Default, Deserialize)]
struct QueryOutput {
    #[serde(default)]
    meta: Vec<ColumnMeta>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuerySummary {
    #[serde(default)]
    written_rows: String,
}

impl ClickHouseClient {
    /// POST a statement with its named parameters and extra server settings
    async fn send(
        &self,
        sql: &str,
        params: Vec<(String, String)>,
        settings: &[(&str, &str)],
    ) -> Result<reqwest::Response, PluginError> {
        let mut query = vec![("default_format".to_string(), OUTPUT_FORMAT.to_string())];
        if !self.database.is_empty() {
            query.push(("database".to_string(), self.database.clone()));
        }
        query.extend(
            settings
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        query.extend(
            params
                .into_iter()
                .map(|(name, value)| (format!("param_{}", name), value)),
        );

        let response = self
            .http
            .post(&self.url)
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .query(&query)
            .body(sql.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PluginError::Query(message.trim().to_string()));
        }
        Ok(response)
    }

    async fn query(&self, sql: &str, params: Vec<(String, String)>) -> Result<QueryOutput, PluginError> {
        let body = self.send(sql, params, &[]).await?.text().await?;
        parse_output(&body)
    }
}

fn parse_output(body: &str) -> Result<QueryOutput, PluginError> {
    // statements without a result set answer with an empty body
    if body.trim().is_empty() {
        return Ok(QueryOutput::default());
    }
    Ok(serde_json::from_str(body)?)
}

/// Rows written according to the summary header, 0 when absent
fn written_rows(summary: Option<&str>) -> u64 {
    summary
        .and_then(|summary| serde_json::from_str::<QuerySummary>(summary).ok())
        .and_then(|summary| summary.written_rows.parse().ok())
        .unwrap_or(0)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Render a bound value in the escaped text form parameters are parsed from
fn parameter_text(value: &NativeValue) -> String {
    let text = match value {
        NativeValue::Null => return "\\N".to_string(),
        NativeValue::TimestampTz(value) => value.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string(),
        other => to_wire_string(other),
    };
    text.replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
}

fn string_param(name: &str, value: &str) -> (String, String) {
    (name.to_string(), parameter_text(&NativeValue::Text(value.to_string())))
}

#[async_trait]
impl Connector for ClickHouseEngine {
    type Handle = ClickHouseClient;

    async fn open(&self, config: &PluginConfig) -> Result<ClickHouseClient, PluginError> {
        let credentials = config.credentials();

        let protocol = match credentials.option(OPTION_HTTP_PROTOCOL) {
            Some(protocol) if protocol.eq_ignore_ascii_case("https") => "https",
            _ => "http",
        };
        let url = format!(
            "{}://{}:{}/",
            protocol,
            credentials.hostname,
            credentials.port(DEFAULT_PORT)?
        );

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = credentials.connection_timeout()? {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|error| PluginError::Connection(error.to_string()))?;

        Ok(ClickHouseClient {
            http,
            url,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            database: credentials.database.clone(),
        })
    }

    // HTTP connections are pooled by the client and dropped with it
    async fn release(&self, _client: ClickHouseClient) {}
}

impl Dialect for ClickHouseEngine {
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('\\', "\\\\").replace('`', "\\`"))
    }

    fn placeholder(&self, index: usize, declared_type: Option<&str>) -> String {
        format!("{{p{}:{}}}", index, declared_type.unwrap_or("String"))
    }

    fn update_prefix(&self, table: &str) -> String {
        format!("ALTER TABLE {} UPDATE ", table)
    }

    fn delete_prefix(&self, table: &str) -> String {
        format!("ALTER TABLE {} DELETE WHERE ", table)
    }

    fn insert_default_values(&self, table: &str) -> String {
        format!("INSERT INTO {} FORMAT JSONEachRow {{}}", table)
    }

    fn text_comparison(&self, column: &str) -> String {
        format!("toString({})", self.quote_identifier(column))
    }

    fn inline_primary_key(&self) -> bool {
        false
    }

    fn create_table_suffix(&self, primary_key: &[String]) -> String {
        if primary_key.is_empty() {
            return " ENGINE = MergeTree ORDER BY tuple()".to_string();
        }
        let columns = primary_key
            .iter()
            .map(|column| self.quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        format!(" ENGINE = MergeTree ORDER BY ({})", columns)
    }
}

#[async_trait]
impl SqlEngine for ClickHouseEngine {
    fn engine(&self) -> EngineType {
        EngineType::ClickHouse
    }

    async fn ping(&self, client: &ClickHouseClient) -> Result<(), PluginError> {
        client.query("SELECT 1", Vec::new()).await?;
        Ok(())
    }

    async fn list_databases(&self, client: &ClickHouseClient) -> Result<Vec<String>, PluginError> {
        let output = client
            .query("SELECT name FROM system.databases ORDER BY name", Vec::new())
            .await?;

        Ok(output
            .data
            .iter()
            .filter_map(|row| row.first().map(cell_text))
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .collect())
    }

    async fn list_schemas(&self, client: &ClickHouseClient) -> Result<Vec<String>, PluginError> {
        self.list_databases(client).await
    }

    async fn list_storage_units(&self, client: &ClickHouseClient, schema: &str) -> Result<Vec<StorageUnit>, PluginError> {
        let exists = client
            .query(
                "SELECT 1 FROM system.databases WHERE name = {database:String}",
                vec![string_param("database", schema)],
            )
            .await?;
        if exists.data.is_empty() {
            return Err(PluginError::SchemaNotFound(schema.to_string()));
        }

        let output = client
            .query(
                "SELECT name, engine, ifNull(total_rows, 0), formatReadableSize(ifNull(total_bytes, 0)) \
                 FROM system.tables WHERE database = {database:String} ORDER BY name",
                vec![string_param("database", schema)],
            )
            .await?;

        Ok(output
            .data
            .iter()
            .filter(|row| row.len() == 4)
            .map(|row| StorageUnit {
                name: cell_text(&row[0]),
                attributes: vec![
                    Record::new("Type", cell_text(&row[1])),
                    Record::new("Total Size", cell_text(&row[3])),
                    Record::new("Count", cell_text(&row[2])),
                ],
            })
            .collect())
    }

    async fn table_metadata(
        &self,
        client: &ClickHouseClient,
        schema: &str,
        storage_unit: &str,
    ) -> Result<TableMetadata, PluginError> {
        let output = client
            .query(
                "SELECT name, type, is_in_primary_key FROM system.columns \
                 WHERE database = {database:String} AND table = {table:String} ORDER BY position",
                vec![string_param("database", schema), string_param("table", storage_unit)],
            )
            .await?;

        if output.data.is_empty() {
            return Err(PluginError::SchemaNotFound(format!("{}.{}", schema, storage_unit)));
        }

        let mut columns = Vec::with_capacity(output.data.len());
        let mut primary_key = Vec::new();
        for row in output.data.iter().filter(|row| row.len() == 3) {
            let name = cell_text(&row[0]);
            if cell_text(&row[2]) == "1" {
                primary_key.push(name.clone());
            }
            columns.push(Column::new(name, cell_text(&row[1])));
        }

        Ok(TableMetadata {
            name: storage_unit.to_string(),
            columns,
            primary_key,
            unique_columns: Vec::new(),
            foreign_keys: Vec::new(),
        })
    }

    async fn execute(&self, client: &ClickHouseClient, statement: Statement) -> Result<u64, PluginError> {
        let params = statement
            .params
            .iter()
            .enumerate()
            .map(|(index, bound)| (format!("p{}", index + 1), parameter_text(&bound.value)))
            .collect();

        let response = client.send(&statement.sql, params, WRITE_SETTINGS).await?;
        let summary = response
            .headers()
            .get(SUMMARY_HEADER)
            .and_then(|value| value.to_str().ok());
        Ok(written_rows(summary))
    }

    async fn fetch(
        &self,
        client: &ClickHouseClient,
        statement: Statement,
        columns: &[Column],
    ) -> Result<Vec<Vec<String>>, PluginError> {
        let params = statement
            .params
            .iter()
            .enumerate()
            .map(|(index, bound)| (format!("p{}", index + 1), parameter_text(&bound.value)))
            .collect();

        let output = client.query(&statement.sql, params).await?;
        Ok(output
            .data
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(index, column)| {
                        let raw = row.get(index).map(cell_text).unwrap_or_default();
                        if raw.is_empty() {
                            raw
                        } else {
                            normalize_cell(&column.column_type, &raw)
                        }
                    })
                    .collect()
            })
            .collect())
    }

    async fn raw_execute(&self, client: &ClickHouseClient, query: &str) -> Result<RowsResult, PluginError> {
        let output = client.query(query, Vec::new()).await?;

        let columns: Vec<Column> = output
            .meta
            .iter()
            .map(|meta| Column::new(&meta.name, &meta.column_type))
            .collect();
        let rows = output
            .data
            .iter()
            .filter(|row| row.len() == columns.len())
            .map(|row| row.iter().map(cell_text).collect())
            .collect();

        Ok(RowsResult {
            columns,
            rows,
            disable_update: true,
        })
    }
}
