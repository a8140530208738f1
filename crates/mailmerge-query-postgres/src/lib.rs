//! PostgreSQL backend for mailmerge-query
//!
//! `SOURCE` is a libpq-style connection string or URL, e.g.
//! `host=localhost user=merge dbname=personal`. `TABLE` names one table or
//! view in the connection's current schema and is quoted as a single
//! identifier, so a name like `hr.mitarbeiter` is taken literally.
//!
//! Rows are read over the simple query protocol, which delivers every value
//! in PostgreSQL's text format regardless of the column type.

use async_trait::async_trait;
use futures::StreamExt;
use mailmerge_query::{Backend, Connection, DataError, Result, RowCursor};
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage, SimpleQueryRow, SimpleQueryStream};
use tracing::{debug, error, warn};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// PostgreSQL backend
#[derive(Debug, Default, Clone)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self, source: &str, login_timeout: Duration) -> Result<Box<dyn Connection>> {
        let mut config: tokio_postgres::Config = source.parse().map_err(|e| {
            DataError::ConnectionFailed(format!("Invalid PostgreSQL connection string: {}", e))
        })?;
        config.connect_timeout(login_timeout);

        debug!(
            "Connecting to PostgreSQL: {:?}/{:?}",
            config.get_hosts(),
            config.get_dbname()
        );

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            DataError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e))
        })?;

        // Spawn connection handler
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Box::new(PostgresConnection {
            client: Some(client),
            task: Some(task),
        }))
    }
}

/// One PostgreSQL session
pub struct PostgresConnection {
    client: Option<Client>,
    task: Option<JoinHandle<()>>,
}

impl PostgresConnection {
    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| DataError::ConnectionFailed("connection already closed".to_string()))
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, query: &str) -> Result<Box<dyn RowCursor>> {
        let client = self.client()?;

        // Describe once for the column names; rows then arrive as text.
        let statement = client
            .prepare(query)
            .await
            .map_err(|e| query_error(query, e))?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let stream = client
            .simple_query_raw(query)
            .await
            .map_err(|e| query_error(query, e))?;

        Ok(Box::new(PostgresCursor {
            columns,
            stream: Box::pin(stream),
            current: None,
        }))
    }

    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let client = self.client()?;

        debug!("Getting columns for table: {}", table);

        let query = r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name = $1::text
            ORDER BY ordinal_position
        "#;

        let rows = client.query(query, &[&table]).await.map_err(|e| {
            DataError::SchemaError(format!(
                "Failed to get columns of table '{}': {}",
                table, e
            ))
        })?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn primary_key_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let client = self.client()?;

        let query = r#"
            SELECT kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.constraint_schema = kcu.constraint_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_schema = current_schema()
              AND tc.table_name = $1::text
            ORDER BY kcu.ordinal_position
        "#;

        let rows = client.query(query, &[&table]).await.map_err(|e| {
            DataError::SchemaError(format!(
                "Failed to get primary key of table '{}': {}",
                table, e
            ))
        })?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closing PostgreSQL connection");
        // Dropping the client lets the connection task finish.
        self.client = None;
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("PostgreSQL connection did not shut down in time; aborting");
                task.abort();
            }
        }
        Ok(())
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Forward-only cursor over a simple-query row stream
pub struct PostgresCursor {
    columns: Vec<String>,
    stream: Pin<Box<SimpleQueryStream>>,
    current: Option<SimpleQueryRow>,
}

#[async_trait]
impl RowCursor for PostgresCursor {
    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    async fn next(&mut self) -> Result<bool> {
        self.current = None;
        loop {
            match self.stream.next().await {
                Some(Ok(SimpleQueryMessage::Row(row))) => {
                    self.current = Some(row);
                    return Ok(true);
                }
                // Row descriptions and command completion carry no values
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!("PostgreSQL row fetch failed: {}", e);
                    return Err(DataError::QueryFailed(format!("Failed to fetch row: {}", e)));
                }
                None => return Ok(false),
            }
        }
    }

    fn string_value(&self, index: usize) -> Result<Option<String>> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| DataError::Internal("cursor is not on a row".to_string()))?;
        row.try_get(index)
            .map(|value| value.map(str::to_string))
            .map_err(|e| DataError::QueryFailed(format!("column index {}: {}", index, e)))
    }
}

fn query_error(query: &str, e: tokio_postgres::Error) -> DataError {
    error!("PostgreSQL query failed: {}", e);
    error!("Failed SQL: {}", query);

    let error_msg = if let Some(db_error) = e.as_db_error() {
        let mut msg = db_error.message().to_string();

        if let Some(detail) = db_error.detail() {
            msg.push_str(&format!("\nDetail: {}", detail));
        }

        if let Some(hint) = db_error.hint() {
            msg.push_str(&format!("\nHint: {}", hint));
        }

        if let Some(position) = db_error.position() {
            msg.push_str(&format!("\nPosition: {:?}", position));
        }

        msg
    } else {
        // Non-database error (connection error, etc.)
        e.to_string()
    };

    DataError::QueryFailed(format!("{}\n\nQuery: {}", error_msg, query))
}
