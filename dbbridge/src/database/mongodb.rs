//! MongoDB engine
//!
//! Schemas are databases and storage units are collections. Collections are
//! untyped, so every row is one `document` cell holding the document as
//! relaxed extended JSON, and references between collections are inferred
//! from field names.

use crate::chat::{require_external_model, run_chat, ChatContext, ChatModel};
use crate::config::{PluginConfig, OPTION_DNS_ENABLED};
use crate::convert::{convert_value, infer_value, NativeValue};
use crate::database::connection::{with_connection, Connector};
use crate::database::crud::effective_page_size;
use crate::database::traits::{Plugin, PluginError};
use crate::graph::build_graph;
use crate::registry::EngineType;
use crate::schema::{
    ChatMessage, Column, ForeignKey, GraphUnit, Record, RowsResult, StorageUnit, TableMetadata,
    WhereCondition, EXTRA_IS_NULL,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, Credential};
use mongodb::results::CollectionType;
use mongodb::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_PORT: u16 = 27017;

/// Name of the single column every row is returned in
pub const DOCUMENT_COLUMN: &str = "document";

const DOCUMENT_TYPE: &str = "Document";

/// Documents sampled per collection to discover field names
const SAMPLE_SIZE: i64 = 100;

/// Upper bound on documents returned by a raw query without a limit
const RAW_QUERY_LIMIT: i64 = 1000;

/// Opens one client per call and shuts it down afterwards
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    type Handle = Client;

    async fn open(&self, config: &PluginConfig) -> Result<Client, PluginError> {
        let credentials = config.credentials();

        let uri = if credentials.option_enabled(OPTION_DNS_ENABLED) {
            format!("mongodb+srv://{}/", credentials.hostname)
        } else {
            format!("mongodb://{}:{}/", credentials.hostname, credentials.port(DEFAULT_PORT)?)
        };

        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|error| PluginError::Connection(error.to_string()))?;
        if !credentials.username.is_empty() {
            options.credential = Some(
                Credential::builder()
                    .username(credentials.username.clone())
                    .password(credentials.password.clone())
                    .build(),
            );
        }
        if let Some(timeout) = credentials.connection_timeout()? {
            options.connect_timeout = Some(timeout);
            options.server_selection_timeout = Some(timeout);
        }

        Client::with_options(options).map_err(|error| PluginError::Connection(error.to_string()))
    }

    async fn release(&self, client: Client) {
        client.shutdown().await;
    }
}

/// Raw query accepted by [`MongoPlugin`]
///
/// `{"collection": "users", "filter": {"age": {"$gt": 25}}, "limit": 10}`
#[derive(Debug, Deserialize)]
struct RawQuery {
    collection: String,
    #[serde(default)]
    filter: Option<serde_json::Value>,
    #[serde(default)]
    limit: Option<i64>,
}

pub struct MongoPlugin {
    connector: MongoConnector,
    chat_model: Arc<dyn ChatModel>,
}

impl MongoPlugin {
    pub fn new(chat_model: Arc<dyn ChatModel>) -> Self {
        Self {
            connector: MongoConnector,
            chat_model,
        }
    }

    async fn ensure_database(&self, client: &Client, database: &str) -> Result<(), PluginError> {
        let names = client.list_database_names().await?;
        if names.iter().any(|name| name == database) {
            Ok(())
        } else {
            Err(PluginError::SchemaNotFound(database.to_string()))
        }
    }

    async fn list_collections(&self, client: &Client, database: &str) -> Result<Vec<StorageUnit>, PluginError> {
        self.ensure_database(client, database).await?;
        let db = client.database(database);

        let specifications: Vec<_> = db.list_collections().await?.try_collect().await?;

        let mut units = Vec::with_capacity(specifications.len());
        for specification in specifications {
            let unit_type = match specification.collection_type {
                CollectionType::View => "View",
                CollectionType::Timeseries => "Timeseries",
                _ => "Collection",
            };
            let count = db
                .collection::<Document>(&specification.name)
                .estimated_document_count()
                .await
                .unwrap_or(0);

            units.push(StorageUnit {
                name: specification.name,
                attributes: vec![
                    Record::new("Type", unit_type),
                    Record::new("Count", count.to_string()),
                ],
            });
        }

        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    /// Field names seen in a sample of each collection, as pseudo metadata
    async fn sampled_metadata(
        &self,
        client: &Client,
        database: &str,
        units: &[StorageUnit],
    ) -> Result<Vec<TableMetadata>, PluginError> {
        let db = client.database(database);
        let names: Vec<String> = units.iter().map(|unit| unit.name.clone()).collect();

        let mut metadata = Vec::with_capacity(units.len());
        for unit in units {
            let fields = sample_fields(&db, &unit.name).await?;

            metadata.push(TableMetadata {
                name: unit.name.clone(),
                columns: fields
                    .iter()
                    .map(|field| Column::new(field, DOCUMENT_TYPE))
                    .collect(),
                primary_key: vec!["_id".to_string()],
                unique_columns: Vec::new(),
                foreign_keys: infer_references(&fields, &names),
            });
        }

        Ok(metadata)
    }
}

/// Sorted top-level field names of the first documents of a collection
async fn sample_fields(db: &mongodb::Database, collection: &str) -> Result<Vec<String>, PluginError> {
    let documents: Vec<Document> = db
        .collection::<Document>(collection)
        .find(doc! {})
        .limit(SAMPLE_SIZE)
        .await?
        .try_collect()
        .await?;

    let mut fields = BTreeSet::new();
    for document in &documents {
        fields.extend(document.keys().cloned());
    }
    Ok(fields.into_iter().collect())
}

/// Field names a filter tree refers to
fn condition_keys(condition: &WhereCondition) -> Vec<&str> {
    match condition {
        WhereCondition::Atomic(atomic) => vec![atomic.key.as_str()],
        WhereCondition::And(children) | WhereCondition::Or(children) => {
            children.iter().flat_map(condition_keys).collect()
        }
    }
}

/// Reject keys naming no field seen in the sampled documents
///
/// `_id` and the whole-document column always pass, and so does any key of
/// a collection without sampled documents. Dotted paths are checked by their
/// first segment.
pub fn check_fields<'a>(
    storage_unit: &str,
    keys: impl IntoIterator<Item = &'a str>,
    sampled: &[String],
) -> Result<(), PluginError> {
    if sampled.is_empty() {
        return Ok(());
    }
    for key in keys {
        let field = key.split('.').next().unwrap_or(key);
        if field == "_id" || field == DOCUMENT_COLUMN || sampled.iter().any(|known| known == field) {
            continue;
        }
        return Err(PluginError::UnknownColumn {
            storage_unit: storage_unit.to_string(),
            column: key.to_string(),
        });
    }
    Ok(())
}

/// References implied by `<name>_id` / `<name>Id` fields
///
/// A field references collection `<name>` or `<name>s`, compared without
/// regard to case.
pub fn infer_references(fields: &[String], collections: &[String]) -> Vec<ForeignKey> {
    let mut references = Vec::new();

    for field in fields {
        let stem = field
            .strip_suffix("_id")
            .or_else(|| field.strip_suffix("Id"))
            .filter(|stem| !stem.is_empty());
        let Some(stem) = stem else {
            continue;
        };

        let plural = format!("{}s", stem);
        let target = collections
            .iter()
            .find(|collection| collection.eq_ignore_ascii_case(stem) || collection.eq_ignore_ascii_case(&plural));

        if let Some(target) = target {
            references.push(ForeignKey {
                column: field.clone(),
                references_table: target.clone(),
                references_column: "_id".to_string(),
            });
        }
    }

    references
}

fn native_to_bson(value: NativeValue) -> Bson {
    match value {
        NativeValue::Null => Bson::Null,
        NativeValue::Bool(value) => Bson::Boolean(value),
        NativeValue::Int(value) => Bson::Int64(value),
        NativeValue::Float(value) => Bson::Double(value),
        NativeValue::Json(value) => Bson::try_from(value.clone()).unwrap_or_else(|_| Bson::String(value.to_string())),
        NativeValue::TimestampTz(value) => Bson::DateTime(mongodb::bson::DateTime::from_millis(value.timestamp_millis())),
        NativeValue::Timestamp(value) => {
            Bson::DateTime(mongodb::bson::DateTime::from_millis(value.and_utc().timestamp_millis()))
        }
        other => Bson::String(crate::convert::to_wire_string(&other)),
    }
}

/// Typed value of one record: hint first, then ObjectId for `_id`, then inference
fn record_to_bson(record: &Record) -> Result<Bson, PluginError> {
    if record.extra_flag(EXTRA_IS_NULL) {
        return Ok(Bson::Null);
    }
    if let Some(hint) = record.type_hint() {
        if hint.eq_ignore_ascii_case("objectid") {
            return ObjectId::parse_str(record.value.trim())
                .map(Bson::ObjectId)
                .map_err(|_| PluginError::Conversion {
                    column: record.key.clone(),
                    attempted_type: hint.to_string(),
                    raw_value: record.value.clone(),
                });
        }
        return convert_value(&record.key, hint, &record.value).map(native_to_bson);
    }
    if record.key == "_id" {
        if let Ok(id) = ObjectId::parse_str(record.value.trim()) {
            return Ok(Bson::ObjectId(id));
        }
    }
    Ok(native_to_bson(infer_value(&record.value)))
}

/// Parse extended JSON into a document
fn parse_document(text: &str) -> Result<Document, PluginError> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|error| PluginError::Query(format!("invalid document: {}", error)))?;
    match Bson::try_from(json) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(_) => Err(PluginError::Query("expected a JSON object".to_string())),
        Err(error) => Err(PluginError::Query(format!("invalid document: {}", error))),
    }
}

/// Build a document from records
///
/// A single `document` record carries a whole document as extended JSON;
/// otherwise every record becomes one field.
pub fn records_to_document(records: &[Record]) -> Result<Document, PluginError> {
    if let [record] = records {
        if record.key == DOCUMENT_COLUMN {
            return parse_document(&record.value);
        }
    }

    let mut document = Document::new();
    for record in records {
        document.insert(record.key.clone(), record_to_bson(record)?);
    }
    Ok(document)
}

/// Translate a filter tree into a query document
pub fn filter_document(condition: &WhereCondition) -> Result<Document, PluginError> {
    match condition {
        WhereCondition::Atomic(atomic) => {
            let value = record_to_bson(&Record::new(&atomic.key, &atomic.value))?;
            let operator = atomic.operator.trim().to_ascii_uppercase();
            let clause = match operator.as_str() {
                "=" => value,
                "!=" | "<>" => Bson::Document(doc! { "$ne": value }),
                "<" => Bson::Document(doc! { "$lt": value }),
                "<=" => Bson::Document(doc! { "$lte": value }),
                ">" => Bson::Document(doc! { "$gt": value }),
                ">=" => Bson::Document(doc! { "$gte": value }),
                "LIKE" => Bson::Document(doc! { "$regex": like_pattern(&atomic.value) }),
                "NOT LIKE" => Bson::Document(doc! {
                    "$not": { "$regex": like_pattern(&atomic.value) }
                }),
                _ => {
                    return Err(PluginError::Query(format!(
                        "unsupported operator '{}'",
                        atomic.operator
                    )))
                }
            };
            let mut filter = Document::new();
            filter.insert(atomic.key.clone(), clause);
            Ok(filter)
        }
        WhereCondition::And(children) => {
            if children.is_empty() {
                return Ok(Document::new());
            }
            let children = children.iter().map(filter_document).collect::<Result<Vec<_>, _>>()?;
            Ok(doc! { "$and": children })
        }
        WhereCondition::Or(children) => {
            // an empty disjunction matches nothing
            if children.is_empty() {
                return Ok(doc! { "$nor": [{}] });
            }
            let children = children.iter().map(filter_document).collect::<Result<Vec<_>, _>>()?;
            Ok(doc! { "$or": children })
        }
    }
}

/// Anchored regular expression equivalent to a SQL `LIKE` pattern
fn like_pattern(pattern: &str) -> String {
    let mut regex = String::from("^");
    for character in pattern.chars() {
        match character {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other if "\\.^$|?*+()[]{}".contains(other) => {
                regex.push('\\');
                regex.push(other);
            }
            other => regex.push(other),
        }
    }
    regex.push('$');
    regex
}

fn document_text(document: Document) -> String {
    Bson::Document(document).into_relaxed_extjson().to_string()
}

fn documents_result(documents: Vec<Document>, disable_update: bool) -> RowsResult {
    RowsResult {
        columns: vec![Column::new(DOCUMENT_COLUMN, DOCUMENT_TYPE)],
        rows: documents
            .into_iter()
            .map(|document| vec![document_text(document)])
            .collect(),
        disable_update,
    }
}

fn log_failure<T>(operation: &str, result: Result<T, PluginError>) -> Result<T, PluginError> {
    if let Err(error) = &result {
        warn!("MongoDB {} failed: {}", operation, error);
    }
    result
}

#[async_trait]
impl Plugin for MongoPlugin {
    fn engine(&self) -> EngineType {
        EngineType::MongoDb
    }

    async fn is_available(&self, config: &PluginConfig) -> bool {
        let result = with_connection(&self.connector, config, |client| async move {
            client.database("admin").run_command(doc! { "ping": 1 }).await?;
            Ok(())
        })
        .await;
        if let Err(error) = &result {
            debug!("MongoDB is not available: {}", error);
        }
        result.is_ok()
    }

    async fn get_databases(&self, config: &PluginConfig) -> Result<Vec<String>, PluginError> {
        let result = with_connection(&self.connector, config, |client| async move {
            Ok(client.list_database_names().await?)
        })
        .await;
        log_failure("get_databases", result)
    }

    async fn get_all_schemas(&self, config: &PluginConfig) -> Result<Vec<String>, PluginError> {
        self.get_databases(config).await
    }

    async fn get_storage_units(&self, config: &PluginConfig, schema: &str) -> Result<Vec<StorageUnit>, PluginError> {
        let result = with_connection(&self.connector, config, |client| async move {
            self.list_collections(&client, schema).await
        })
        .await;
        log_failure("get_storage_units", result)
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
        let keys = filter.map(condition_keys).unwrap_or_default();
        let filter = match filter {
            Some(condition) => filter_document(condition)?,
            None => Document::new(),
        };
        let limit = effective_page_size(page_size) as i64;

        let result = with_connection(&self.connector, config, |client| async move {
            let db = client.database(schema);
            if !keys.is_empty() {
                check_fields(storage_unit, keys, &sample_fields(&db, storage_unit).await?)?;
            }
            let documents: Vec<Document> = db
                .collection::<Document>(storage_unit)
                .find(filter)
                .sort(doc! { "_id": 1 })
                .skip(page_offset)
                .limit(limit)
                .await?
                .try_collect()
                .await?;
            Ok(documents_result(documents, false))
        })
        .await;
        log_failure("get_rows", result)
    }

    async fn raw_execute(&self, config: &PluginConfig, query: &str) -> Result<RowsResult, PluginError> {
        let raw: RawQuery = serde_json::from_str(query)
            .map_err(|error| PluginError::Query(format!("invalid query: {}", error)))?;
        let filter = match raw.filter {
            Some(filter) => parse_document(&filter.to_string())?,
            None => Document::new(),
        };
        let limit = raw.limit.filter(|limit| *limit > 0).unwrap_or(RAW_QUERY_LIMIT);
        let database = config.credentials().database.clone();

        let result = with_connection(&self.connector, config, |client| async move {
            let documents: Vec<Document> = client
                .database(&database)
                .collection::<Document>(&raw.collection)
                .find(filter)
                .limit(limit)
                .await?
                .try_collect()
                .await?;
            Ok(documents_result(documents, true))
        })
        .await;
        log_failure("raw_execute", result)
    }

    // collections are schemaless; field definitions only document intent
    async fn add_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        _fields: &[Record],
    ) -> Result<bool, PluginError> {
        let result = with_connection(&self.connector, config, |client| async move {
            client.database(schema).create_collection(storage_unit).await?;
            Ok(true)
        })
        .await;
        log_failure("add_storage_unit", result)
    }

    async fn update_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
        updated_columns: &[String],
    ) -> Result<bool, PluginError> {
        let mut document = records_to_document(values)?;
        let id = document
            .remove("_id")
            .ok_or_else(|| PluginError::Query(format!("refusing to update {} without an _id", storage_unit)))?;

        let whole_document = updated_columns.iter().any(|column| column == DOCUMENT_COLUMN);
        let changes: Document = document
            .into_iter()
            .filter(|(key, _)| whole_document || updated_columns.contains(key))
            .collect();
        if changes.is_empty() {
            debug!("Nothing to update in {}", storage_unit);
            return Ok(true);
        }

        let result = with_connection(&self.connector, config, |client| async move {
            let outcome = client
                .database(schema)
                .collection::<Document>(storage_unit)
                .update_one(doc! { "_id": id }, doc! { "$set": changes })
                .await?;
            if outcome.matched_count == 0 {
                return Err(PluginError::NoRowsAffected("no rows were updated".to_string()));
            }
            Ok(true)
        })
        .await;
        log_failure("update_storage_unit", result)
    }

    async fn add_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
    ) -> Result<bool, PluginError> {
        let document = records_to_document(values)?;

        let result = with_connection(&self.connector, config, |client| async move {
            client
                .database(schema)
                .collection::<Document>(storage_unit)
                .insert_one(document)
                .await?;
            Ok(true)
        })
        .await;
        log_failure("add_row", result)
    }

    async fn delete_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        storage_unit: &str,
        values: &[Record],
    ) -> Result<bool, PluginError> {
        let filter = records_to_document(values)?;
        if filter.is_empty() {
            return Err(PluginError::Query(format!(
                "refusing to delete from {} without a condition",
                storage_unit
            )));
        }

        let result = with_connection(&self.connector, config, |client| async move {
            let db = client.database(schema);
            let keys = values.iter().map(|record| record.key.as_str());
            check_fields(storage_unit, keys, &sample_fields(&db, storage_unit).await?)?;
            let outcome = db
                .collection::<Document>(storage_unit)
                .delete_many(filter)
                .await?;
            if outcome.deleted_count == 0 {
                return Err(PluginError::NoRowsAffected("no rows matched".to_string()));
            }
            Ok(true)
        })
        .await;
        log_failure("delete_row", result)
    }

    async fn get_graph(&self, config: &PluginConfig, schema: &str) -> Result<Vec<GraphUnit>, PluginError> {
        let result = with_connection(&self.connector, config, |client| async move {
            let units = self.list_collections(&client, schema).await?;
            let metadata = self.sampled_metadata(&client, schema, &units).await?;
            Ok(build_graph(&units, &metadata))
        })
        .await;
        log_failure("get_graph", result)
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

        let tables = with_connection(&self.connector, config, |client| async move {
            let units = self.list_collections(&client, schema).await?;
            self.sampled_metadata(&client, schema, &units).await
        })
        .await?;

        let context = ChatContext {
            engine: EngineType::MongoDb,
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
        log_failure("chat", result)
    }
}
