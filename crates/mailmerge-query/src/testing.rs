//! Scripted in-memory backend for unit tests.

use crate::error::{DataError, Result};
use crate::traits::{Backend, Connection, RowCursor};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct StubRow {
    delay: Duration,
    values: Vec<Option<String>>,
}

/// Backend whose single table and query result are fixed up front.
///
/// Every query returns the configured rows regardless of its text; the text
/// is recorded so tests can inspect it.
#[derive(Debug, Default)]
pub(crate) struct StubBackend {
    table_columns: Vec<String>,
    primary_key: Vec<String>,
    result_columns: Vec<String>,
    rows: Vec<StubRow>,
    connect_delay: Duration,
    fail_connect: bool,
    fail_introspection: bool,
    fail_after: Option<usize>,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl StubBackend {
    pub fn new<S: Into<String>>(result_columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            result_columns: result_columns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_table<S: Into<String>, P: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
        primary_key: impl IntoIterator<Item = P>,
    ) -> Self {
        self.table_columns = columns.into_iter().map(Into::into).collect();
        self.primary_key = primary_key.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_row(self, values: &[Option<&str>]) -> Self {
        self.with_delayed_row(Duration::ZERO, values)
    }

    /// Row that takes `delay` to fetch
    pub fn with_delayed_row(mut self, delay: Duration, values: &[Option<&str>]) -> Self {
        self.rows.push(StubRow {
            delay,
            values: values.iter().map(|v| v.map(str::to_string)).collect(),
        });
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_introspection(mut self) -> Self {
        self.fail_introspection = true;
        self
    }

    /// Cursor errors once `rows` rows have been fetched
    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for StubBackend {
    fn backend_type(&self) -> &'static str {
        "stub"
    }

    async fn connect(&self, _source: &str, _login_timeout: Duration) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail_connect {
            return Err(DataError::ConnectionFailed("stub refuses".to_string()));
        }
        Ok(Box::new(StubConnection {
            table_columns: self.table_columns.clone(),
            primary_key: self.primary_key.clone(),
            result_columns: self.result_columns.clone(),
            rows: self.rows.clone(),
            fail_introspection: self.fail_introspection,
            fail_after: self.fail_after,
            closes: self.closes.clone(),
            queries: self.queries.clone(),
            closed: false,
        }))
    }
}

struct StubConnection {
    table_columns: Vec<String>,
    primary_key: Vec<String>,
    result_columns: Vec<String>,
    rows: Vec<StubRow>,
    fail_introspection: bool,
    fail_after: Option<usize>,
    closes: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

#[async_trait]
impl Connection for StubConnection {
    async fn execute(&mut self, query: &str) -> Result<Box<dyn RowCursor>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(Box::new(StubCursor {
            columns: self.result_columns.clone(),
            rows: self.rows.clone(),
            fail_after: self.fail_after,
            position: None,
        }))
    }

    async fn table_columns(&mut self, _table: &str) -> Result<Vec<String>> {
        if self.fail_introspection {
            return Err(DataError::SchemaError("no such table".to_string()));
        }
        Ok(self.table_columns.clone())
    }

    async fn primary_key_columns(&mut self, _table: &str) -> Result<Vec<String>> {
        Ok(self.primary_key.clone())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct StubCursor {
    columns: Vec<String>,
    rows: Vec<StubRow>,
    fail_after: Option<usize>,
    position: Option<usize>,
}

#[async_trait]
impl RowCursor for StubCursor {
    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    async fn next(&mut self) -> Result<bool> {
        let next = self.position.map_or(0, |p| p + 1);
        if Some(next) == self.fail_after {
            return Err(DataError::QueryFailed("stub cursor broke".to_string()));
        }
        match self.rows.get(next) {
            Some(row) => {
                if !row.delay.is_zero() {
                    tokio::time::sleep(row.delay).await;
                }
                self.position = Some(next);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn string_value(&self, index: usize) -> Result<Option<String>> {
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| DataError::Internal("cursor is not on a row".to_string()))?;
        Ok(row.values.get(index).cloned().flatten())
    }
}
