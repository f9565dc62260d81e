//! Engine-agnostic data model
//!
//! Every value crossing the capability boundary is one of these types. Cell
//! values and filter values travel as strings; only [`crate::convert`] turns
//! them into typed values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Extra key carrying a declared-type hint for engines without column types
pub const EXTRA_TYPE: &str = "Type";

/// Extra key asking an insert to store NULL instead of the value
pub const EXTRA_IS_NULL: &str = "IsNull";

/// Extra key asking an insert to leave the column to its default
pub const EXTRA_DEFAULT: &str = "Default";

/// Extra key marking a field definition as part of the primary key
pub const EXTRA_PRIMARY: &str = "Primary";

/// Extra key marking a field definition as nullable (`"false"` adds NOT NULL)
pub const EXTRA_NULLABLE: &str = "Nullable";

/// One column/value pair, used for row data, filters and field definitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Column (or field) name
    pub key: String,

    /// String-encoded value
    pub value: String,

    /// Engine-specific annotations such as type hints
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            extra: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up an extra entry, ignoring key case
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Whether an extra entry is set to a truthy value
    pub fn extra_flag(&self, key: &str) -> bool {
        matches!(
            self.extra_value(key).map(|value| value.trim().to_ascii_lowercase()),
            Some(value) if value == "true" || value == "1" || value == "yes"
        )
    }

    pub fn type_hint(&self) -> Option<&str> {
        self.extra_value(EXTRA_TYPE).filter(|hint| !hint.trim().is_empty())
    }
}

/// A result column with its engine-native declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,

    /// Declared type in the engine's own vocabulary (not normalized)
    #[serde(rename = "type")]
    pub column_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

/// A table, collection or index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUnit {
    pub name: String,

    /// Descriptive attributes such as type, row count or size
    pub attributes: Vec<Record>,
}

/// Relationship cardinality between two storage units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

/// An outbound relationship from one storage unit to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Target storage unit name
    pub name: String,

    pub relationship: RelationshipType,
}

/// A storage unit together with its outbound relationships
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUnit {
    pub unit: StorageUnit,
    pub relations: Vec<Relation>,
}

/// Uniform shape of every row-producing operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsResult {
    pub columns: Vec<Column>,

    /// String-encoded cells; NULL is the empty string
    pub rows: Vec<Vec<String>>,

    /// Rows cannot be mapped back to a single updatable storage unit
    pub disable_update: bool,
}

impl RowsResult {
    /// Every row has exactly one cell per column
    pub fn is_rectangular(&self) -> bool {
        self.rows.iter().all(|row| row.len() == self.columns.len())
    }
}

/// A single comparison against one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomicCondition {
    pub key: String,

    /// One of `=`, `!=`, `<>`, `<`, `<=`, `>`, `>=`, `LIKE`, `NOT LIKE`
    pub operator: String,

    pub value: String,
}

/// Filter tree for row queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WhereCondition {
    Atomic(AtomicCondition),
    And(Vec<WhereCondition>),
    Or(Vec<WhereCondition>),
}

impl WhereCondition {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        WhereCondition::Atomic(AtomicCondition {
            key: key.into(),
            operator: "=".to_string(),
            value: value.into(),
        })
    }

    /// Equality conjunction over a list of records, `None` when empty
    pub fn from_records(records: &[Record]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        Some(WhereCondition::And(
            records
                .iter()
                .map(|record| WhereCondition::equals(&record.key, &record.value))
                .collect(),
        ))
    }
}

/// Foreign key constraint information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Column name in this table
    pub column: String,

    /// Referenced table name
    pub references_table: String,

    /// Referenced column name
    pub references_column: String,
}

/// Schema Introspector output for one storage unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    /// Name of the storage unit
    pub name: String,

    /// Columns in declaration order
    pub columns: Vec<Column>,

    /// Primary key column names in key order
    pub primary_key: Vec<String>,

    /// Columns carrying a single-column unique constraint
    pub unique_columns: Vec<String>,

    /// Outbound foreign keys
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableMetadata {
    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|candidate| candidate.name == column)
            .map(|candidate| candidate.column_type.as_str())
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|key| key == column)
    }

    /// The column alone identifies a row
    pub fn is_unique_column(&self, column: &str) -> bool {
        (self.primary_key.len() == 1 && self.primary_key[0] == column)
            || self.unique_columns.iter().any(|unique| unique == column)
    }
}

/// One message of a chat exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message type; types starting with `sql` carry a result
    #[serde(rename = "type")]
    pub message_type: String,

    pub text: String,

    pub result: Option<RowsResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_extra_lookup_ignores_case() {
        let record = Record::new("name", "Alice")
            .with_extra("isnull", "TRUE")
            .with_extra("type", "text");

        assert!(record.extra_flag(EXTRA_IS_NULL));
        assert!(!record.extra_flag(EXTRA_DEFAULT));
        assert_eq!(record.type_hint(), Some("text"));
    }

    #[test]
    fn test_where_condition_from_records() {
        assert_eq!(WhereCondition::from_records(&[]), None);

        let condition = WhereCondition::from_records(&[Record::new("id", "7")]);
        assert_eq!(
            condition,
            Some(WhereCondition::And(vec![WhereCondition::equals("id", "7")]))
        );
    }

    #[test]
    fn test_where_condition_json_shape() {
        let condition: WhereCondition = serde_json::from_str(
            r#"{"or": [{"atomic": {"key": "age", "operator": ">", "value": "30"}}]}"#,
        )
        .unwrap();

        match condition {
            WhereCondition::Or(children) => assert_eq!(children.len(), 1),
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_unique_column_detection() {
        let metadata = TableMetadata {
            name: "profiles".to_string(),
            columns: vec![Column::new("id", "integer"), Column::new("user_id", "integer")],
            primary_key: vec!["id".to_string()],
            unique_columns: vec!["user_id".to_string()],
            foreign_keys: vec![],
        };

        assert!(metadata.is_unique_column("id"));
        assert!(metadata.is_unique_column("user_id"));
        assert_eq!(metadata.column_type("user_id"), Some("integer"));
        assert_eq!(metadata.column_type("missing"), None);
    }

    #[test]
    fn test_rows_result_rectangular() {
        let mut result = RowsResult {
            columns: vec![Column::new("a", "text")],
            rows: vec![vec!["1".to_string()]],
            disable_update: false,
        };
        assert!(result.is_rectangular());

        result.rows.push(vec![]);
        assert!(!result.is_rectangular());
    }
}
