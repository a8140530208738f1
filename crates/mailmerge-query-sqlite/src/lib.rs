//! SQLite backend for mailmerge-query
//!
//! `SOURCE` is a database file path or an SQLite URI. Shared in-memory
//! databases (`file:name?mode=memory&cache=shared`) work as long as some
//! other connection keeps them alive.
//!
//! ## Streaming
//!
//! rusqlite is synchronous, so each query runs on a blocking worker that
//! sends rows over a bounded channel. The cursor awaits the channel, which
//! keeps every fetch interruptible by the caller's deadline. Dropping the
//! cursor interrupts the running statement, and `close` waits for the worker
//! to let go of the connection.
//!
//! ## Case folding
//!
//! SQLite's built-in `lower` only folds ASCII. Each connection replaces it
//! with a Unicode-aware version so glob searches like `mü*` match `MÜLLER`.

use async_trait::async_trait;
use mailmerge_query::{Backend, Connection, DataError, Result, RowCursor};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{InterruptHandle, OpenFlags};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rows buffered between the worker and the cursor
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// How long `close` waits for an interrupted worker
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Pause between repeated interrupts while waiting for a worker
const INTERRUPT_INTERVAL: Duration = Duration::from_millis(20);

/// SQLite backend
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    channel_capacity: usize,
}

impl SqliteBackend {
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for SqliteBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn backend_type(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(&self, source: &str, login_timeout: Duration) -> Result<Box<dyn Connection>> {
        debug!("Opening SQLite database: {}", source);

        let path = source.to_string();
        let connection = tokio::task::spawn_blocking(move || {
            // No SQLITE_OPEN_CREATE: a missing database is an error, not a new file.
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            let connection = rusqlite::Connection::open_with_flags(&path, flags).map_err(|e| {
                DataError::ConnectionFailed(format!("Cannot open SQLite database '{}': {}", path, e))
            })?;
            connection
                .busy_timeout(login_timeout)
                .and_then(|_| register_unicode_lower(&connection))
                .map_err(|e| {
                    DataError::ConnectionFailed(format!("Cannot configure SQLite database: {}", e))
                })?;
            Ok::<_, DataError>(connection)
        })
        .await
        .map_err(|e| DataError::Internal(format!("SQLite open task failed: {}", e)))??;

        Ok(Box::new(SqliteConnection {
            interrupt: Arc::new(connection.get_interrupt_handle()),
            inner: Some(Arc::new(Mutex::new(connection))),
            worker: None,
            channel_capacity: self.channel_capacity,
        }))
    }
}

type SharedConnection = Arc<Mutex<rusqlite::Connection>>;

/// Replace the built-in ASCII-only `lower` with Unicode lowercasing
fn register_unicode_lower(connection: &rusqlite::Connection) -> rusqlite::Result<()> {
    connection.create_scalar_function(
        "lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(text_value(ctx.get_raw(0)).map(|value| value.to_lowercase())),
    )
}

/// One SQLite connection
pub struct SqliteConnection {
    inner: Option<SharedConnection>,
    interrupt: Arc<InterruptHandle>,
    worker: Option<JoinHandle<()>>,
    channel_capacity: usize,
}

impl SqliteConnection {
    fn shared(&self) -> Result<SharedConnection> {
        self.inner
            .clone()
            .ok_or_else(|| DataError::ConnectionFailed("connection already closed".to_string()))
    }

    /// Run `f` against the connection on a blocking thread
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = self.shared()?;
        tokio::task::spawn_blocking(move || {
            let connection = shared
                .lock()
                .map_err(|_| DataError::Internal("SQLite connection lock poisoned".to_string()))?;
            f(&connection)
        })
        .await
        .map_err(|e| DataError::Internal(format!("SQLite task failed: {}", e)))?
    }

    /// `(name, primary key position)` of every column; position 0 means not
    /// part of the primary key
    async fn table_info(&self, table: &str) -> Result<Vec<(String, i64)>> {
        let table = table.to_string();
        self.with_connection(move |connection| {
            let schema_error = |e: rusqlite::Error| {
                DataError::SchemaError(format!("Failed to inspect table '{}': {}", table, e))
            };
            let mut statement = connection
                .prepare("SELECT name, pk FROM pragma_table_info(?1) ORDER BY cid")
                .map_err(schema_error)?;
            let rows = statement
                .query_map([&table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(schema_error)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(schema_error)
        })
        .await
    }

    /// Interrupt the running statement until the worker is gone or
    /// [`CLOSE_GRACE`] has passed
    async fn stop_worker(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        let give_up = Instant::now() + CLOSE_GRACE;
        loop {
            if worker.is_finished() {
                return;
            }
            self.interrupt.interrupt();
            if tokio::time::timeout(INTERRUPT_INTERVAL, &mut worker)
                .await
                .is_ok()
            {
                return;
            }
            if Instant::now() >= give_up {
                warn!("SQLite worker did not stop within {:?}", CLOSE_GRACE);
                return;
            }
        }
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn execute(&mut self, query: &str) -> Result<Box<dyn RowCursor>> {
        let shared = self.shared()?;
        let query = query.to_string();
        let (tx, mut rx) = mpsc::channel(self.channel_capacity);

        self.worker = Some(tokio::task::spawn_blocking(move || {
            stream_rows(&shared, &query, tx)
        }));

        match rx.recv().await {
            Some(Ok(Message::Columns(columns))) => Ok(Box::new(SqliteCursor {
                columns,
                rx,
                current: None,
                exhausted: false,
                interrupt: self.interrupt.clone(),
            })),
            Some(Err(e)) => Err(e),
            Some(Ok(Message::Row(_))) | None => Err(DataError::Internal(
                "SQLite worker ended before describing the result".to_string(),
            )),
        }
    }

    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let info = self.table_info(table).await?;
        Ok(info.into_iter().map(|(name, _)| name).collect())
    }

    async fn primary_key_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let mut key: Vec<(String, i64)> = self
            .table_info(table)
            .await?
            .into_iter()
            .filter(|(_, position)| *position > 0)
            .collect();
        key.sort_by_key(|(_, position)| *position);
        Ok(key.into_iter().map(|(name, _)| name).collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.stop_worker().await;
        let Some(shared) = self.inner.take() else {
            return Ok(());
        };

        // A worker that ignored the interrupt holds the last reference and
        // closes the connection when it drops it.
        let Ok(mutex) = Arc::try_unwrap(shared) else {
            debug!("SQLite connection still referenced; closing deferred");
            return Ok(());
        };

        let connection = mutex
            .into_inner()
            .map_err(|_| DataError::Internal("SQLite connection lock poisoned".to_string()))?;

        tokio::task::spawn_blocking(move || connection.close())
            .await
            .map_err(|e| DataError::Internal(format!("SQLite close task failed: {}", e)))?
            .map_err(|(_, e)| DataError::ConnectionFailed(format!("Failed to close SQLite database: {}", e)))
    }
}

enum Message {
    Columns(Vec<String>),
    Row(Vec<Option<String>>),
}

/// Worker body: describe the result, then send rows until exhausted or the
/// receiving cursor is gone
fn stream_rows(shared: &Mutex<rusqlite::Connection>, query: &str, tx: mpsc::Sender<Result<Message>>) {
    let connection = match shared.lock() {
        Ok(connection) => connection,
        Err(_) => {
            let _ = tx.blocking_send(Err(DataError::Internal(
                "SQLite connection lock poisoned".to_string(),
            )));
            return;
        }
    };

    if let Err(e) = send_rows(&connection, query, &tx) {
        let _ = tx.blocking_send(Err(e));
    }
}

fn send_rows(
    connection: &rusqlite::Connection,
    query: &str,
    tx: &mpsc::Sender<Result<Message>>,
) -> Result<()> {
    let query_error =
        |e: rusqlite::Error| DataError::QueryFailed(format!("{}\n\nQuery: {}", e, query));

    let mut statement = connection.prepare(query).map_err(query_error)?;
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let width = columns.len();

    if tx.blocking_send(Ok(Message::Columns(columns))).is_err() || tx.is_closed() {
        return Ok(());
    }

    let mut rows = statement.query([]).map_err(query_error)?;
    while let Some(row) = rows.next().map_err(query_error)? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(text_value(row.get_ref(idx).map_err(query_error)?));
        }
        if tx.blocking_send(Ok(Message::Row(values))).is_err() {
            debug!("SQLite cursor dropped; stopping worker");
            break;
        }
    }
    Ok(())
}

fn text_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Cursor fed by a blocking worker
pub struct SqliteCursor {
    columns: Vec<String>,
    rx: mpsc::Receiver<Result<Message>>,
    current: Option<Vec<Option<String>>>,
    exhausted: bool,
    interrupt: Arc<InterruptHandle>,
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if !self.exhausted {
            self.rx.close();
            self.interrupt.interrupt();
        }
    }
}

#[async_trait]
impl RowCursor for SqliteCursor {
    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    async fn next(&mut self) -> Result<bool> {
        self.current = None;
        match self.rx.recv().await {
            Some(Ok(Message::Row(values))) => {
                self.current = Some(values);
                Ok(true)
            }
            Some(Ok(Message::Columns(_))) => {
                warn!("Unexpected column description in SQLite row stream");
                Err(DataError::Internal("unexpected column description".to_string()))
            }
            Some(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    fn string_value(&self, index: usize) -> Result<Option<String>> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| DataError::Internal("cursor is not on a row".to_string()))?;
        row.get(index).cloned().ok_or_else(|| {
            DataError::QueryFailed(format!("column index {} out of range", index))
        })
    }
}
