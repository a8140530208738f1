//! Renders abstract queries as SQL `SELECT` statements.
//!
//! Identifiers and literals are always quoted with their quote characters
//! doubled; no caller-supplied text reaches the statement unescaped.

use crate::key::Key;
use crate::types::{Query, QueryPart, Schema};
use tracing::{debug, warn};

/// Escape character declared in every `LIKE ... ESCAPE` clause
pub const LIKE_ESCAPE: char = '\\';

/// Single wildcard of the caller-facing glob syntax
pub const GLOB_WILDCARD: char = '*';

/// Quote an identifier (table or column name)
pub fn sql_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Translate a glob into a `LIKE` pattern using [`LIKE_ESCAPE`].
///
/// The backend wildcards `%` and `_` and the escape character itself are
/// matched literally; only `*` becomes `%`.
pub fn sql_search_pattern(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    for c in glob.chars() {
        match c {
            LIKE_ESCAPE | '%' | '_' => {
                out.push(LIKE_ESCAPE);
                out.push(c);
            }
            GLOB_WILDCARD => out.push('%'),
            other => out.push(other),
        }
    }
    out
}

/// Builds the SQL for one configured table
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    table: String,
}

impl QueryTranslator {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Render `query`; `None` means the query can match no rows and the
    /// backend need not be asked.
    pub fn translate(&self, query: &Query, schema: &Schema) -> Option<String> {
        match query {
            Query::Everything => Some(self.full_scan()),
            Query::Find(parts) => {
                if let Some(part) = parts.iter().find(|p| !schema.contains(&p.column)) {
                    debug!(
                        "Column \"{}\" is not in the schema; find matches nothing",
                        part.column
                    );
                    return None;
                }
                self.find(parts)
            }
            Query::ByKey(keys) => self.by_key(keys, schema),
        }
    }

    pub fn full_scan(&self) -> String {
        format!("SELECT * FROM {};", sql_identifier(&self.table))
    }

    /// Case-insensitive conjunction of glob matches.
    ///
    /// Columns are cast to text first so non-text columns can be searched.
    pub fn find(&self, parts: &[QueryPart]) -> Option<String> {
        if parts.is_empty() {
            return None;
        }

        let predicates: Vec<String> = parts
            .iter()
            .map(|part| {
                format!(
                    "(lower(CAST({} AS VARCHAR)) LIKE lower({}) ESCAPE {})",
                    sql_identifier(&part.column),
                    sql_literal(&sql_search_pattern(&part.pattern)),
                    sql_literal(&LIKE_ESCAPE.to_string())
                )
            })
            .collect();

        Some(self.select_where(&predicates.join(" AND ")))
    }

    /// Disjunction over keys, each an equality conjunction over its pairs.
    ///
    /// Keys that cannot be decoded, decode to no pairs, or name a column
    /// outside `schema` match nothing and are left out.
    pub fn by_key(&self, keys: &[Key], schema: &Schema) -> Option<String> {
        let mut alternatives = Vec::with_capacity(keys.len());

        for key in keys {
            let pairs = match key.pairs() {
                Ok(pairs) => pairs,
                Err(e) => {
                    warn!("Skipping key {:?}: {}", key.as_str(), e);
                    continue;
                }
            };

            if pairs.is_empty() {
                debug!("Skipping empty key");
                continue;
            }

            if let Some((column, _)) = pairs.iter().find(|(c, _)| !schema.contains(c)) {
                warn!(
                    "Skipping key {:?}: column \"{}\" is not in the schema",
                    key.as_str(),
                    column
                );
                continue;
            }

            let conjunction: Vec<String> = pairs
                .iter()
                .map(|(column, value)| format!("{}={}", sql_identifier(column), sql_literal(value)))
                .collect();
            alternatives.push(format!("({})", conjunction.join(" AND ")));
        }

        if alternatives.is_empty() {
            return None;
        }

        Some(self.select_where(&alternatives.join(" OR ")))
    }

    fn select_where(&self, predicate: &str) -> String {
        format!(
            "SELECT * FROM {} WHERE {};",
            sql_identifier(&self.table),
            predicate
        )
    }
}
