//! Generic CRUD translator
//!
//! Turns engine-agnostic records and filters into parameterized native
//! statements. Planning is pure; execution goes through a [`StatementRunner`]
//! bound to one open connection, so a read-then-write sequence always uses the
//! same handle in order.

use crate::convert::{convert_value, NativeValue};
use crate::database::dialect::{is_safe_type_name, Dialect, Statement, StatementBuilder};
use crate::database::traits::PluginError;
use crate::registry::EngineType;
use crate::schema::{
    Column, Record, RowsResult, TableMetadata, WhereCondition, EXTRA_DEFAULT, EXTRA_IS_NULL,
    EXTRA_NULLABLE, EXTRA_PRIMARY,
};
use async_trait::async_trait;
use tracing::debug;

/// Page size used when the caller asks for zero rows
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Upper bound for one page of rows
pub const MAX_PAGE_SIZE: u64 = 10_000;

/// Engines whose affected-row counts cannot be trusted
///
/// ClickHouse applies `ALTER TABLE ... UPDATE/DELETE` as asynchronous
/// mutations and reports no row count for them.
pub const UNRELIABLE_AFFECTED_ROWS: &[EngineType] = &[EngineType::ClickHouse];

const COMPARISON_OPERATORS: &[&str] = &["=", "!=", "<>", "<", "<=", ">", ">="];
const PATTERN_OPERATORS: &[&str] = &["LIKE", "NOT LIKE"];

/// Whether a zero affected-row count from `engine` means nothing matched
pub fn reports_affected_rows(engine: EngineType) -> bool {
    !UNRELIABLE_AFFECTED_ROWS.contains(&engine)
}

/// Executes planned statements on one open connection
#[async_trait]
pub trait StatementRunner: Send + Sync {
    fn engine(&self) -> EngineType;

    fn dialect(&self) -> &dyn Dialect;

    async fn table_metadata(&self, schema: &str, storage_unit: &str) -> Result<TableMetadata, PluginError>;

    /// Run a statement and return the affected row count
    async fn execute(&self, statement: Statement) -> Result<u64, PluginError>;

    /// Run a query and return its rows as wire strings, one cell per column
    async fn fetch(&self, statement: Statement, columns: &[Column]) -> Result<Vec<Vec<String>>, PluginError>;
}

fn declared_type<'m>(metadata: &'m TableMetadata, column: &str) -> Result<&'m str, PluginError> {
    metadata
        .column_type(column)
        .ok_or_else(|| PluginError::UnknownColumn {
            storage_unit: metadata.name.clone(),
            column: column.to_string(),
        })
}

/// Typed value of a record, honoring the `IsNull` and `Type` hints
fn record_value(record: &Record, declared_type: &str) -> Result<NativeValue, PluginError> {
    if record.extra_flag(EXTRA_IS_NULL) {
        return Ok(NativeValue::Null);
    }
    convert_value(&record.key, record.type_hint().unwrap_or(declared_type), &record.value)
}

/// Plan the update of one row
///
/// Values on primary-key columns become equality conditions, values on
/// `updated_columns` become assignments, everything else is ignored. Returns
/// `None` when there is nothing to assign.
pub fn plan_update(
    dialect: &dyn Dialect,
    metadata: &TableMetadata,
    schema: &str,
    storage_unit: &str,
    values: &[Record],
    updated_columns: &[String],
) -> Result<Option<Statement>, PluginError> {
    let mut conditions = Vec::new();
    let mut assignments = Vec::new();

    for record in values {
        let column_type = declared_type(metadata, &record.key)?;

        if metadata.is_primary_key(&record.key) {
            conditions.push((record, column_type, record_value(record, column_type)?));
        } else if updated_columns.iter().any(|column| column == &record.key) {
            assignments.push((record, column_type, record_value(record, column_type)?));
        }
    }

    if assignments.is_empty() {
        return Ok(None);
    }
    if conditions.is_empty() {
        return Err(PluginError::Query(format!(
            "refusing to update {} without a primary key condition",
            storage_unit
        )));
    }

    let mut builder = StatementBuilder::new(dialect);
    builder.push_sql(&dialect.update_prefix(&dialect.qualified_name(schema, storage_unit)));

    for (index, (record, column_type, value)) in assignments.into_iter().enumerate() {
        if index > 0 {
            builder.push_sql(", ");
        }
        builder
            .push_identifier(&record.key)
            .push_sql(" = ")
            .push_bind(value, Some(column_type));
    }

    builder.push_sql(" WHERE ");
    push_equalities(&mut builder, conditions);

    Ok(Some(builder.finish()))
}

fn push_equalities(builder: &mut StatementBuilder<'_>, conditions: Vec<(&Record, &str, NativeValue)>) {
    for (index, (record, column_type, value)) in conditions.into_iter().enumerate() {
        if index > 0 {
            builder.push_sql(" AND ");
        }
        builder.push_identifier(&record.key);
        if value.is_null() {
            builder.push_sql(" IS NULL");
        } else {
            builder.push_sql(" = ").push_bind(value, Some(column_type));
        }
    }
}

/// Plan the insertion of one row
pub fn plan_insert(
    dialect: &dyn Dialect,
    metadata: &TableMetadata,
    schema: &str,
    storage_unit: &str,
    values: &[Record],
) -> Result<Statement, PluginError> {
    let table = dialect.qualified_name(schema, storage_unit);

    let mut columns = Vec::new();
    for record in values {
        let column_type = declared_type(metadata, &record.key)?;
        if record.extra_flag(EXTRA_DEFAULT) {
            continue;
        }
        columns.push((record, column_type, record_value(record, column_type)?));
    }

    if columns.is_empty() {
        return Ok(Statement {
            sql: dialect.insert_default_values(&table),
            params: Vec::new(),
        });
    }

    let mut builder = StatementBuilder::new(dialect);
    builder.push_sql(&format!("INSERT INTO {} (", table));
    for (index, (record, _, _)) in columns.iter().enumerate() {
        if index > 0 {
            builder.push_sql(", ");
        }
        builder.push_identifier(&record.key);
    }

    builder.push_sql(") VALUES (");
    for (index, (_, column_type, value)) in columns.into_iter().enumerate() {
        if index > 0 {
            builder.push_sql(", ");
        }
        builder.push_bind(value, Some(column_type));
    }
    builder.push_sql(")");

    Ok(builder.finish())
}

/// Plan the deletion of the rows equal to every record
pub fn plan_delete(
    dialect: &dyn Dialect,
    metadata: &TableMetadata,
    schema: &str,
    storage_unit: &str,
    values: &[Record],
) -> Result<Statement, PluginError> {
    let mut conditions = Vec::new();
    for record in values {
        let column_type = declared_type(metadata, &record.key)?;
        conditions.push((record, column_type, record_value(record, column_type)?));
    }

    if conditions.is_empty() {
        return Err(PluginError::Query(format!(
            "refusing to delete from {} without a filter",
            storage_unit
        )));
    }

    let mut builder = StatementBuilder::new(dialect);
    builder.push_sql(&dialect.delete_prefix(&dialect.qualified_name(schema, storage_unit)));
    push_equalities(&mut builder, conditions);

    Ok(builder.finish())
}

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`
pub fn effective_page_size(page_size: u64) -> u64 {
    if page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.min(MAX_PAGE_SIZE)
    }
}

/// Plan a paged, optionally filtered select over every column
pub fn plan_select(
    dialect: &dyn Dialect,
    metadata: &TableMetadata,
    schema: &str,
    storage_unit: &str,
    filter: Option<&WhereCondition>,
    page_size: u64,
    page_offset: u64,
) -> Result<Statement, PluginError> {
    let mut builder = StatementBuilder::new(dialect);

    let select_list = if metadata.columns.is_empty() {
        "*".to_string()
    } else {
        metadata
            .columns
            .iter()
            .map(|column| dialect.select_expression(&column.name, &column.column_type))
            .collect::<Vec<_>>()
            .join(", ")
    };
    builder.push_sql(&format!(
        "SELECT {} FROM {}",
        select_list,
        dialect.qualified_name(schema, storage_unit)
    ));

    if let Some(filter) = filter {
        builder.push_sql(" WHERE ");
        push_condition(&mut builder, metadata, filter)?;
    }

    if !metadata.primary_key.is_empty() {
        let order = metadata
            .primary_key
            .iter()
            .map(|column| dialect.quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        builder.push_sql(&format!(" ORDER BY {}", order));
    }

    builder.push_sql(&format!(
        " LIMIT {} OFFSET {}",
        effective_page_size(page_size),
        page_offset
    ));

    Ok(builder.finish())
}

fn push_condition(
    builder: &mut StatementBuilder<'_>,
    metadata: &TableMetadata,
    condition: &WhereCondition,
) -> Result<(), PluginError> {
    match condition {
        WhereCondition::Atomic(atomic) => {
            let column_type = declared_type(metadata, &atomic.key)?;
            let operator = atomic.operator.trim().to_ascii_uppercase();
            let operator = operator.split_whitespace().collect::<Vec<_>>().join(" ");

            if PATTERN_OPERATORS.contains(&operator.as_str()) {
                let expression = builder.dialect().text_comparison(&atomic.key);
                builder
                    .push_sql(&format!("{} {} ", expression, operator))
                    .push_bind(NativeValue::Text(atomic.value.clone()), None);
            } else if COMPARISON_OPERATORS.contains(&operator.as_str()) {
                let value = convert_value(&atomic.key, column_type, &atomic.value)?;
                builder
                    .push_identifier(&atomic.key)
                    .push_sql(&format!(" {} ", operator))
                    .push_bind(value, Some(column_type));
            } else {
                return Err(PluginError::Query(format!(
                    "unsupported operator '{}'",
                    atomic.operator
                )));
            }
        }
        WhereCondition::And(children) | WhereCondition::Or(children) => {
            let (joiner, identity) = match condition {
                WhereCondition::And(_) => (" AND ", "1 = 1"),
                _ => (" OR ", "1 = 0"),
            };

            if children.is_empty() {
                builder.push_sql(identity);
                return Ok(());
            }

            builder.push_sql("(");
            for (index, child) in children.iter().enumerate() {
                if index > 0 {
                    builder.push_sql(joiner);
                }
                push_condition(builder, metadata, child)?;
            }
            builder.push_sql(")");
        }
    }

    Ok(())
}

/// Plan `CREATE TABLE` from field definitions (key = name, value = type)
pub fn plan_create(
    dialect: &dyn Dialect,
    schema: &str,
    storage_unit: &str,
    fields: &[Record],
) -> Result<Statement, PluginError> {
    if fields.is_empty() {
        return Err(PluginError::Query(format!(
            "cannot create {} without fields",
            storage_unit
        )));
    }

    let mut definitions = Vec::new();
    let mut primary_key = Vec::new();

    for field in fields {
        if field.key.trim().is_empty() {
            return Err(PluginError::Query("field name must not be empty".to_string()));
        }
        if !is_safe_type_name(&field.value) {
            return Err(PluginError::Query(format!(
                "invalid type '{}' for field '{}'",
                field.value, field.key
            )));
        }

        let mut definition = format!("{} {}", dialect.quote_identifier(&field.key), field.value.trim());
        let not_nullable = field
            .extra_value(EXTRA_NULLABLE)
            .map(|value| value.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        if not_nullable {
            definition.push_str(" NOT NULL");
        }
        if field.extra_flag(EXTRA_PRIMARY) {
            primary_key.push(field.key.clone());
        }
        definitions.push(definition);
    }

    if !primary_key.is_empty() && dialect.inline_primary_key() {
        let columns = primary_key
            .iter()
            .map(|column| dialect.quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        definitions.push(format!("PRIMARY KEY ({})", columns));
    }

    Ok(Statement {
        sql: format!(
            "CREATE TABLE {} ({}){}",
            dialect.qualified_name(schema, storage_unit),
            definitions.join(", "),
            dialect.create_table_suffix(&primary_key)
        ),
        params: Vec::new(),
    })
}

fn check_affected(engine: EngineType, affected: u64, message: &str) -> Result<bool, PluginError> {
    if affected == 0 && reports_affected_rows(engine) {
        return Err(PluginError::NoRowsAffected(message.to_string()));
    }
    Ok(true)
}

pub async fn update_storage_unit(
    runner: &dyn StatementRunner,
    schema: &str,
    storage_unit: &str,
    values: &[Record],
    updated_columns: &[String],
) -> Result<bool, PluginError> {
    let metadata = runner.table_metadata(schema, storage_unit).await?;

    let Some(statement) = plan_update(runner.dialect(), &metadata, schema, storage_unit, values, updated_columns)?
    else {
        debug!("Nothing to update in {}.{}", schema, storage_unit);
        return Ok(true);
    };

    let affected = runner.execute(statement).await?;
    check_affected(runner.engine(), affected, "no rows were updated")
}

pub async fn add_row(
    runner: &dyn StatementRunner,
    schema: &str,
    storage_unit: &str,
    values: &[Record],
) -> Result<bool, PluginError> {
    let metadata = runner.table_metadata(schema, storage_unit).await?;
    let statement = plan_insert(runner.dialect(), &metadata, schema, storage_unit, values)?;
    runner.execute(statement).await?;
    Ok(true)
}

pub async fn delete_row(
    runner: &dyn StatementRunner,
    schema: &str,
    storage_unit: &str,
    values: &[Record],
) -> Result<bool, PluginError> {
    let metadata = runner.table_metadata(schema, storage_unit).await?;
    let statement = plan_delete(runner.dialect(), &metadata, schema, storage_unit, values)?;
    let affected = runner.execute(statement).await?;
    check_affected(runner.engine(), affected, "no rows matched")
}

pub async fn get_rows(
    runner: &dyn StatementRunner,
    schema: &str,
    storage_unit: &str,
    filter: Option<&WhereCondition>,
    page_size: u64,
    page_offset: u64,
) -> Result<RowsResult, PluginError> {
    let metadata = runner.table_metadata(schema, storage_unit).await?;
    let statement = plan_select(
        runner.dialect(),
        &metadata,
        schema,
        storage_unit,
        filter,
        page_size,
        page_offset,
    )?;
    let rows = runner.fetch(statement, &metadata.columns).await?;

    Ok(RowsResult {
        columns: metadata.columns,
        rows,
        disable_update: metadata.primary_key.is_empty(),
    })
}

pub async fn add_storage_unit(
    runner: &dyn StatementRunner,
    schema: &str,
    storage_unit: &str,
    fields: &[Record],
) -> Result<bool, PluginError> {
    let statement = plan_create(runner.dialect(), schema, storage_unit, fields)?;
    runner.execute(statement).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::dialect::tests::PlainDialect;
    use std::sync::Mutex;

    struct SpyRunner {
        engine: EngineType,
        metadata: TableMetadata,
        affected: u64,
        executed: Mutex<Vec<Statement>>,
    }

    impl SpyRunner {
        fn new(engine: EngineType, affected: u64) -> Self {
            Self {
                engine,
                metadata: users(),
                affected,
                executed: Mutex::new(Vec::new()),
            }
        }

        fn executed(&self) -> Vec<Statement> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatementRunner for SpyRunner {
        fn engine(&self) -> EngineType {
            self.engine
        }

        fn dialect(&self) -> &dyn Dialect {
            &PlainDialect
        }

        async fn table_metadata(&self, _schema: &str, _storage_unit: &str) -> Result<TableMetadata, PluginError> {
            Ok(self.metadata.clone())
        }

        async fn execute(&self, statement: Statement) -> Result<u64, PluginError> {
            self.executed.lock().unwrap().push(statement);
            Ok(self.affected)
        }

        async fn fetch(&self, statement: Statement, columns: &[Column]) -> Result<Vec<Vec<String>>, PluginError> {
            self.executed.lock().unwrap().push(statement);
            Ok(vec![vec![String::new(); columns.len()]])
        }
    }

    fn users() -> TableMetadata {
        TableMetadata {
            name: "users".to_string(),
            columns: vec![
                Column::new("id", "integer"),
                Column::new("name", "text"),
                Column::new("age", "integer"),
            ],
            primary_key: vec!["id".to_string()],
            ..Default::default()
        }
    }

    fn updated(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|column| column.to_string()).collect()
    }

    #[tokio::test]
    async fn test_update_without_assignments_executes_nothing() {
        let runner = SpyRunner::new(EngineType::Postgres, 0);

        let result = update_storage_unit(&runner, "public", "users", &[Record::new("id", "7")], &[]).await;

        assert!(result.unwrap());
        assert!(runner.executed().is_empty());
    }

    #[tokio::test]
    async fn test_update_sets_only_updated_columns() {
        let runner = SpyRunner::new(EngineType::Postgres, 1);
        let values = [
            Record::new("id", "7"),
            Record::new("name", "Alice"),
            Record::new("age", "31"),
        ];

        assert!(update_storage_unit(&runner, "public", "users", &values, &updated(&["name"]))
            .await
            .unwrap());

        let executed = runner.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(
            executed[0].sql,
            "UPDATE \"public\".\"users\" SET \"name\" = ? WHERE \"id\" = ?"
        );
        assert_eq!(executed[0].params[0].value, NativeValue::Text("Alice".to_string()));
        assert_eq!(executed[0].params[1].value, NativeValue::Int(7));
    }

    #[tokio::test]
    async fn test_zero_affected_rows_depends_on_engine() {
        let values = [Record::new("id", "999"), Record::new("name", "Nobody")];
        let columns = updated(&["name"]);

        let strict = SpyRunner::new(EngineType::Postgres, 0);
        let error = update_storage_unit(&strict, "public", "users", &values, &columns)
            .await
            .unwrap_err();
        assert!(matches!(&error, PluginError::NoRowsAffected(message) if message == "no rows were updated"));

        let exempt = SpyRunner::new(EngineType::ClickHouse, 0);
        assert!(update_storage_unit(&exempt, "default", "users", &values, &columns)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_unknown_column_fails_before_execution() {
        let runner = SpyRunner::new(EngineType::MySql, 1);
        let values = [Record::new("id", "7"), Record::new("nickname", "Al")];

        let error = update_storage_unit(&runner, "app", "users", &values, &updated(&["nickname"]))
            .await
            .unwrap_err();

        assert!(matches!(error, PluginError::UnknownColumn { column, .. } if column == "nickname"));
        assert!(runner.executed().is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_primary_key_condition() {
        let runner = SpyRunner::new(EngineType::Postgres, 1);
        let values = [Record::new("name", "Alice")];

        let error = update_storage_unit(&runner, "public", "users", &values, &updated(&["name"]))
            .await
            .unwrap_err();

        assert!(matches!(error, PluginError::Query(_)));
        assert!(runner.executed().is_empty());
    }

    #[tokio::test]
    async fn test_update_conversion_error() {
        let runner = SpyRunner::new(EngineType::Postgres, 1);
        let values = [Record::new("id", "7"), Record::new("age", "old")];

        let error = update_storage_unit(&runner, "public", "users", &values, &updated(&["age"]))
            .await
            .unwrap_err();

        assert!(matches!(error, PluginError::Conversion { column, .. } if column == "age"));
    }

    #[tokio::test]
    async fn test_delete_zero_rows_is_an_error() {
        let runner = SpyRunner::new(EngineType::Sqlite, 0);

        let error = delete_row(&runner, "main", "users", &[Record::new("id", "999")])
            .await
            .unwrap_err();

        assert!(matches!(&error, PluginError::NoRowsAffected(message) if message == "no rows matched"));
        assert_eq!(runner.executed()[0].sql, "DELETE FROM \"main\".\"users\" WHERE \"id\" = ?");
    }

    #[tokio::test]
    async fn test_delete_zero_rows_on_mutation_engine_succeeds() {
        let runner = SpyRunner::new(EngineType::ClickHouse, 0);

        assert!(delete_row(&runner, "default", "users", &[Record::new("id", "999")])
            .await
            .unwrap());
        assert_eq!(runner.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_a_filter() {
        let runner = SpyRunner::new(EngineType::Sqlite, 3);
        assert!(matches!(
            delete_row(&runner, "main", "users", &[]).await,
            Err(PluginError::Query(_))
        ));
    }

    #[test]
    fn test_plan_delete_null_filter() {
        let values = [Record::new("id", "1"), Record::new("name", "").with_extra(EXTRA_IS_NULL, "true")];

        let statement = plan_delete(&PlainDialect, &users(), "main", "users", &values).unwrap();

        assert_eq!(
            statement.sql,
            "DELETE FROM \"main\".\"users\" WHERE \"id\" = ? AND \"name\" IS NULL"
        );
        assert_eq!(statement.params.len(), 1);
    }

    #[test]
    fn test_plan_insert_honors_hints() {
        let values = [
            Record::new("id", "").with_extra(EXTRA_DEFAULT, "true"),
            Record::new("name", "Bob"),
            Record::new("age", "").with_extra(EXTRA_IS_NULL, "true"),
        ];

        let statement = plan_insert(&PlainDialect, &users(), "main", "users", &values).unwrap();

        assert_eq!(
            statement.sql,
            "INSERT INTO \"main\".\"users\" (\"name\", \"age\") VALUES (?, ?)"
        );
        assert_eq!(statement.params[1].value, NativeValue::Null);

        let defaults = plan_insert(&PlainDialect, &users(), "main", "users", &[]).unwrap();
        assert_eq!(defaults.sql, "INSERT INTO \"main\".\"users\" DEFAULT VALUES");
    }

    #[test]
    fn test_plan_select_with_nested_filter() {
        let filter = WhereCondition::Or(vec![
            WhereCondition::equals("id", "1"),
            WhereCondition::And(vec![
                WhereCondition::Atomic(crate::schema::AtomicCondition {
                    key: "name".to_string(),
                    operator: "like".to_string(),
                    value: "A%".to_string(),
                }),
                WhereCondition::Atomic(crate::schema::AtomicCondition {
                    key: "age".to_string(),
                    operator: ">=".to_string(),
                    value: "18".to_string(),
                }),
            ]),
        ]);

        let statement = plan_select(&PlainDialect, &users(), "main", "users", Some(&filter), 0, 20).unwrap();

        assert_eq!(
            statement.sql,
            "SELECT \"id\", \"name\", \"age\" FROM \"main\".\"users\" \
             WHERE (\"id\" = ? OR (CAST(\"name\" AS TEXT) LIKE ? AND \"age\" >= ?)) \
             ORDER BY \"id\" LIMIT 100 OFFSET 20"
        );
        assert_eq!(statement.params.len(), 3);
        assert_eq!(statement.params[2].value, NativeValue::Int(18));
    }

    #[test]
    fn test_plan_select_rejects_unknown_operator_and_column() {
        let bad_operator = WhereCondition::Atomic(crate::schema::AtomicCondition {
            key: "id".to_string(),
            operator: "; DROP".to_string(),
            value: "1".to_string(),
        });
        assert!(matches!(
            plan_select(&PlainDialect, &users(), "main", "users", Some(&bad_operator), 10, 0),
            Err(PluginError::Query(_))
        ));

        let bad_column = WhereCondition::equals("missing", "1");
        assert!(matches!(
            plan_select(&PlainDialect, &users(), "main", "users", Some(&bad_column), 10, 0),
            Err(PluginError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_page_size_bounds() {
        assert_eq!(effective_page_size(0), DEFAULT_PAGE_SIZE);
        assert_eq!(effective_page_size(25), 25);
        assert_eq!(effective_page_size(1_000_000), MAX_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_get_rows_without_primary_key_disables_update() {
        let mut runner = SpyRunner::new(EngineType::Sqlite, 0);
        runner.metadata.primary_key.clear();

        let result = get_rows(&runner, "main", "users", None, 10, 0).await.unwrap();

        assert!(result.disable_update);
        assert!(result.is_rectangular());
        assert_eq!(result.columns.len(), 3);
    }

    #[test]
    fn test_plan_create() {
        let fields = [
            Record::new("id", "INTEGER").with_extra(EXTRA_PRIMARY, "true"),
            Record::new("email", "TEXT").with_extra(EXTRA_NULLABLE, "false"),
        ];

        let statement = plan_create(&PlainDialect, "main", "accounts", &fields).unwrap();
        assert_eq!(
            statement.sql,
            "CREATE TABLE \"main\".\"accounts\" (\"id\" INTEGER, \"email\" TEXT NOT NULL, PRIMARY KEY (\"id\"))"
        );

        let injected = [Record::new("id", "INTEGER); DROP TABLE users; --")];
        assert!(plan_create(&PlainDialect, "main", "accounts", &injected).is_err());
        assert!(plan_create(&PlainDialect, "main", "accounts", &[]).is_err());
    }
}
