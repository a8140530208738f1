use crate::error::{DataError, Result};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Working set of column names of a datasource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: BTreeSet<String>,
}

impl Schema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted: Vec<String> = self.iter().map(|c| format!("\"{}\"", c)).collect();
        write!(f, "{}", quoted.join(" "))
    }
}

/// Ordered, duplicate-free columns forming a row's identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyColumns {
    columns: Vec<String>,
}

impl KeyColumns {
    /// Validate `columns` against `schema`.
    ///
    /// Every column must be in the schema and appear at most once.
    pub fn new(columns: Vec<String>, schema: &Schema) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !schema.contains(column) {
                return Err(DataError::configuration(format!(
                    "key column \"{}\" is not part of the schema",
                    column
                )));
            }
            if !seen.insert(column.as_str()) {
                return Err(DataError::configuration(format!(
                    "key column \"{}\" is listed more than once",
                    column
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One record of a queried backend ("Dataset").
///
/// The key is computed once at construction from the key columns and never
/// changes afterwards.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: Arc<Schema>,
    values: HashMap<String, Option<String>>,
    key: Key,
}

impl Dataset {
    pub fn new(
        schema: Arc<Schema>,
        key_columns: &KeyColumns,
        values: HashMap<String, Option<String>>,
    ) -> Self {
        let key = Key::from_pairs(key_columns.iter().filter_map(|column| {
            values
                .get(column)
                .and_then(|v| v.as_deref())
                .map(|value| (column, value))
        }));
        Self {
            schema,
            values,
            key,
        }
    }

    /// Value of `column`; `Ok(None)` when the column is not set in this row
    pub fn get(&self, column: &str) -> Result<Option<&str>> {
        if !self.schema.contains(column) {
            return Err(DataError::ColumnNotFound(column.to_string()));
        }
        Ok(self.values.get(column).and_then(|v| v.as_deref()))
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Glob match of a single column, e.g. `("Beschreibung", "*uTTer")`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPart {
    pub column: String,
    pub pattern: String,
}

impl QueryPart {
    pub fn new(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            pattern: pattern.into(),
        }
    }
}

/// Abstract query against a datasource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Conjunction of glob matches
    Find(Vec<QueryPart>),
    /// Rows matching any of the given keys
    ByKey(Vec<Key>),
    /// Full scan
    Everything,
}

/// What to do when the deadline passes while a query is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Abort with a timeout error and discard collected rows
    Fail,
    /// Stop and return the rows collected so far
    Truncate,
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPolicy::Fail => write!(f, "fail"),
            TimeoutPolicy::Truncate => write!(f, "truncate"),
        }
    }
}

/// Statistics about query execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStats {
    /// Number of rows returned
    pub row_count: usize,
    /// Query execution time in milliseconds
    pub execution_ms: u64,
    /// Whether the result was cut short by the deadline or a backend failure
    pub truncated: bool,
}

/// Ordered result of a query, in backend row order
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    datasets: Vec<Dataset>,
    stats: QueryStats,
}

impl QueryResults {
    pub fn new(datasets: Vec<Dataset>, execution_ms: u64, truncated: bool) -> Self {
        let row_count = datasets.len();
        Self {
            datasets,
            stats: QueryStats {
                row_count,
                execution_ms,
                truncated,
            },
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dataset> {
        self.datasets.iter()
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    pub fn is_truncated(&self) -> bool {
        self.stats.truncated
    }

    pub fn keys(&self) -> Vec<Key> {
        self.datasets.iter().map(|d| d.key().clone()).collect()
    }
}

impl IntoIterator for QueryResults {
    type Item = Dataset;
    type IntoIter = std::vec::IntoIter<Dataset>;

    fn into_iter(self) -> Self::IntoIter {
        self.datasets.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResults {
    type Item = &'a Dataset;
    type IntoIter = std::slice::Iter<'a, Dataset>;

    fn into_iter(self) -> Self::IntoIter {
        self.datasets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(["UserVorname", "UserNachname", "Beschreibung"]))
    }

    fn key_columns(schema: &Schema) -> KeyColumns {
        KeyColumns::new(
            vec!["UserVorname".to_string(), "UserNachname".to_string()],
            schema,
        )
        .unwrap()
    }

    #[test]
    fn test_key_columns_outside_schema() {
        let err = KeyColumns::new(vec!["Missing".to_string()], &schema()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("\"Missing\""));
    }

    #[test]
    fn test_key_columns_duplicate() {
        let err = KeyColumns::new(
            vec!["UserVorname".to_string(), "UserVorname".to_string()],
            &schema(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_dataset_get_distinguishes_unset_and_empty() {
        let schema = schema();
        let keys = key_columns(&schema);
        let mut values = HashMap::new();
        values.insert("UserVorname".to_string(), Some("Hans".to_string()));
        values.insert("UserNachname".to_string(), Some(String::new()));
        values.insert("Beschreibung".to_string(), None);

        let dataset = Dataset::new(schema, &keys, values);
        assert_eq!(dataset.get("UserVorname").unwrap(), Some("Hans"));
        assert_eq!(dataset.get("UserNachname").unwrap(), Some(""));
        assert_eq!(dataset.get("Beschreibung").unwrap(), None);
        assert!(matches!(
            dataset.get("Unbekannt"),
            Err(DataError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_dataset_key_skips_unset_columns() {
        let schema = schema();
        let keys = key_columns(&schema);
        let mut values = HashMap::new();
        values.insert("UserVorname".to_string(), None);
        values.insert("UserNachname".to_string(), Some("Muster".to_string()));

        let dataset = Dataset::new(schema, &keys, values);
        assert_eq!(dataset.key().as_str(), "UserNachname#Muster#");
    }

    #[test]
    fn test_query_results_stats() {
        let results = QueryResults::new(Vec::new(), 12, true);
        assert!(results.is_empty());
        assert_eq!(results.stats().row_count, 0);
        assert_eq!(results.stats().execution_ms, 12);
        assert!(results.is_truncated());
    }

    #[test]
    fn test_schema_display() {
        let schema = Schema::new(["b", "a"]);
        assert_eq!(schema.to_string(), "\"a\" \"b\"");
    }
}
