//! SQL dialect differences
//!
//! The CRUD translator writes statements through a [`Dialect`], which knows how
//! an engine quotes identifiers, spells placeholders and phrases mutations.

use crate::convert::NativeValue;

/// A value bound to a statement placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct BoundValue {
    pub value: NativeValue,

    /// Catalog type of the target column, if the value belongs to one
    pub declared_type: Option<String>,
}

/// A parameterized native statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<BoundValue>,
}

/// Per-engine SQL spelling
pub trait Dialect: Send + Sync {
    /// Quote an identifier (table or column name) to prevent SQL injection
    ///
    /// The default doubles embedded double quotes.
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Schema-qualified storage unit name
    fn qualified_name(&self, schema: &str, storage_unit: &str) -> String {
        if schema.is_empty() {
            self.quote_identifier(storage_unit)
        } else {
            format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(storage_unit)
            )
        }
    }

    /// Placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize, declared_type: Option<&str>) -> String;

    /// Statement text preceding the assignment list of an update
    fn update_prefix(&self, table: &str) -> String {
        format!("UPDATE {} SET ", table)
    }

    /// Statement text preceding the condition list of a delete
    fn delete_prefix(&self, table: &str) -> String {
        format!("DELETE FROM {} WHERE ", table)
    }

    fn insert_default_values(&self, table: &str) -> String {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    }

    /// Column expression compared textually by `LIKE`
    fn text_comparison(&self, column: &str) -> String {
        format!("CAST({} AS TEXT)", self.quote_identifier(column))
    }

    /// Select-list entry for a column of the given declared type
    fn select_expression(&self, column: &str, _declared_type: &str) -> String {
        self.quote_identifier(column)
    }

    /// Whether `CREATE TABLE` declares the primary key as a table constraint
    fn inline_primary_key(&self) -> bool {
        true
    }

    /// Text appended after the column list of `CREATE TABLE`
    fn create_table_suffix(&self, _primary_key: &[String]) -> String {
        String::new()
    }
}

/// Accumulates statement text and its bound values
pub struct StatementBuilder<'a> {
    dialect: &'a dyn Dialect,
    statement: Statement,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            statement: Statement::default(),
        }
    }

    pub fn dialect(&self) -> &'a dyn Dialect {
        self.dialect
    }

    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        self.statement.sql.push_str(sql);
        self
    }

    pub fn push_identifier(&mut self, identifier: &str) -> &mut Self {
        let quoted = self.dialect.quote_identifier(identifier);
        self.statement.sql.push_str(&quoted);
        self
    }

    /// Append a placeholder and remember the value bound to it
    pub fn push_bind(&mut self, value: NativeValue, declared_type: Option<&str>) -> &mut Self {
        let index = self.statement.params.len() + 1;
        let placeholder = self.dialect.placeholder(index, declared_type);
        self.statement.sql.push_str(&placeholder);
        self.statement.params.push(BoundValue {
            value,
            declared_type: declared_type.map(str::to_string),
        });
        self
    }

    pub fn finish(self) -> Statement {
        self.statement
    }
}

/// Whether a declared type in a field definition is safe to splice into DDL
pub fn is_safe_type_name(declared_type: &str) -> bool {
    !declared_type.trim().is_empty()
        && declared_type
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || " _(),[]".contains(character))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Question-mark placeholders and default spelling everywhere else
    pub(crate) struct PlainDialect;

    impl Dialect for PlainDialect {
        fn placeholder(&self, _index: usize, _declared_type: Option<&str>) -> String {
            "?".to_string()
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(PlainDialect.quote_identifier("users"), "\"users\"");
        assert_eq!(PlainDialect.quote_identifier("table\"name"), "\"table\"\"name\"");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(PlainDialect.qualified_name("main", "users"), "\"main\".\"users\"");
        assert_eq!(PlainDialect.qualified_name("", "users"), "\"users\"");
    }

    #[test]
    fn test_builder_numbers_parameters() {
        let mut builder = StatementBuilder::new(&PlainDialect);
        builder
            .push_sql("SELECT 1 WHERE ")
            .push_identifier("a")
            .push_sql(" = ")
            .push_bind(NativeValue::Int(1), Some("integer"));

        let statement = builder.finish();
        assert_eq!(statement.sql, "SELECT 1 WHERE \"a\" = ?");
        assert_eq!(statement.params.len(), 1);
        assert_eq!(statement.params[0].declared_type.as_deref(), Some("integer"));
    }

    #[test]
    fn test_safe_type_names() {
        assert!(is_safe_type_name("varchar(255)"));
        assert!(is_safe_type_name("Nullable(Decimal(10, 2))"));
        assert!(is_safe_type_name("integer[]"));
        assert!(!is_safe_type_name("text); DROP TABLE users; --"));
        assert!(!is_safe_type_name("  "));
    }
}
