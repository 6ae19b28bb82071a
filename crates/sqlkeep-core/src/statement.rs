//! Canonical statement descriptors used as statement-cache keys
//!
//! A [`StatementKey`] captures everything that makes two prepared statements
//! interchangeable: the SQL text, the catalog/schema it was prepared under,
//! result-set options, generated-key options and whether it is a prepared or
//! callable statement. Keys compare field by field, so two keys are equal
//! exactly when a cached handle for one can serve the other.

use serde::{Deserialize, Serialize};

/// Kind of statement a key describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Prepared,
    Callable,
}

/// Scrolling behaviour of result sets produced by a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetType {
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Whether result sets produced by a statement can be updated in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetConcurrency {
    ReadOnly,
    Updatable,
}

/// Whether result sets stay open across a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holdability {
    HoldCursorsOverCommit,
    CloseCursorsAtCommit,
}

/// Whether the driver should return auto-generated keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedKeys {
    Return,
    NoReturn,
}

/// Value-equal descriptor of a prepared or callable statement.
///
/// Key column arrays are copied on construction, so the caller keeps no
/// handle through which a key already stored in a cache could change.
/// `None` and an empty array are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatementKey {
    sql: String,
    catalog: Option<String>,
    schema: Option<String>,
    result_set_type: Option<ResultSetType>,
    concurrency: Option<ResultSetConcurrency>,
    holdability: Option<Holdability>,
    generated_keys: Option<GeneratedKeys>,
    key_column_indexes: Option<Vec<i32>>,
    key_column_names: Option<Vec<String>>,
    kind: StatementKind,
}

impl StatementKey {
    fn new(sql: impl Into<String>, kind: StatementKind) -> Self {
        Self {
            sql: sql.into(),
            catalog: None,
            schema: None,
            result_set_type: None,
            concurrency: None,
            holdability: None,
            generated_keys: None,
            key_column_indexes: None,
            key_column_names: None,
            kind,
        }
    }

    /// Key for a plain prepared statement.
    pub fn prepared(sql: impl Into<String>) -> Self {
        Self::new(sql, StatementKind::Prepared)
    }

    /// Key for a callable (stored procedure) statement.
    pub fn callable(sql: impl Into<String>) -> Self {
        Self::new(sql, StatementKind::Callable)
    }

    pub fn with_catalog(mut self, catalog: Option<&str>) -> Self {
        self.catalog = catalog.map(str::to_string);
        self
    }

    pub fn with_schema(mut self, schema: Option<&str>) -> Self {
        self.schema = schema.map(str::to_string);
        self
    }

    pub fn with_result_set_type(mut self, result_set_type: ResultSetType) -> Self {
        self.result_set_type = Some(result_set_type);
        self
    }

    pub fn with_concurrency(mut self, concurrency: ResultSetConcurrency) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = Some(holdability);
        self
    }

    pub fn with_generated_keys(mut self, generated_keys: GeneratedKeys) -> Self {
        self.generated_keys = Some(generated_keys);
        self
    }

    /// Request generated keys for the given column positions (copied).
    pub fn with_key_columns_by_index(mut self, indexes: &[i32]) -> Self {
        self.key_column_indexes = Some(indexes.to_vec());
        self
    }

    /// Request generated keys for the given column names (copied).
    pub fn with_key_columns_by_name<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.key_column_names = Some(names.iter().map(|n| n.as_ref().to_string()).collect());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn catalog(&self) -> Option<&str> {
        self.catalog.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn result_set_type(&self) -> Option<ResultSetType> {
        self.result_set_type
    }

    pub fn concurrency(&self) -> Option<ResultSetConcurrency> {
        self.concurrency
    }

    pub fn holdability(&self) -> Option<Holdability> {
        self.holdability
    }

    pub fn generated_keys(&self) -> Option<GeneratedKeys> {
        self.generated_keys
    }

    pub fn key_column_indexes(&self) -> Option<&[i32]> {
        self.key_column_indexes.as_deref()
    }

    pub fn key_column_names(&self) -> Option<&[String]> {
        self.key_column_names.as_deref()
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn is_callable(&self) -> bool {
        self.kind == StatementKind::Callable
    }
}

impl std::fmt::Display for StatementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            StatementKind::Prepared => "prepared",
            StatementKind::Callable => "callable",
        };
        write!(f, "{} `{}`", kind, self.sql)?;
        if let Some(schema) = &self.schema {
            write!(f, " in {}", schema)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
