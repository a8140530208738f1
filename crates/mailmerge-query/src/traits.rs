use crate::error::Result;
use crate::key::Key;
use crate::types::*;
use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use std::time::Duration;

/// Factory for connections to one kind of backend (PostgreSQL, SQLite, ...)
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend type name, matched against the `TYPE` of a datasource definition
    fn backend_type(&self) -> &'static str;

    /// Open a new connection to `source`.
    ///
    /// `login_timeout` bounds how long establishing the connection may take.
    async fn connect(&self, source: &str, login_timeout: Duration) -> Result<Box<dyn Connection>>;
}

/// An open connection, owned by exactly one call
#[async_trait]
pub trait Connection: Send {
    /// Execute a query and return a cursor over its rows
    async fn execute(&mut self, query: &str) -> Result<Box<dyn RowCursor>>;

    /// Column names of a table or view
    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Primary key columns of a table in key order
    async fn primary_key_columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Release the connection. Dropping a connection releases it as well.
    async fn close(&mut self) -> Result<()>;
}

/// Forward-only cursor over the rows of an executed query
#[async_trait]
pub trait RowCursor: Send {
    /// Index of `column` in the result set, `None` if the result has no such column
    fn column_index(&self, column: &str) -> Option<usize>;

    /// Advance to the next row; `false` once the result is exhausted
    async fn next(&mut self) -> Result<bool>;

    /// Value of the current row at `index` as text, `None` for SQL NULL
    fn string_value(&self, index: usize) -> Result<Option<String>>;
}

/// Uniform query interface of a configured datasource
#[async_trait]
pub trait Datasource: DowncastSync {
    /// Name of the datasource as configured
    fn name(&self) -> &str;

    fn schema(&self) -> &Schema;

    /// Rows whose keys are among `keys`. Fails with a timeout error if
    /// `timeout` is exceeded.
    async fn get_datasets_by_key(&self, keys: &[Key], timeout: Duration) -> Result<QueryResults>;

    /// Rows matching every query part. Fails with a timeout error if
    /// `timeout` is exceeded.
    async fn find(&self, query: &[QueryPart], timeout: Duration) -> Result<QueryResults>;

    /// All rows. Fails with a timeout error if `timeout` is exceeded.
    async fn get_contents(&self, timeout: Duration) -> Result<QueryResults>;
}

impl_downcast!(sync Datasource);
