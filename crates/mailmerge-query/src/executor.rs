//! Runs translated queries against a backend under a wall-clock deadline.
//!
//! Each call opens its own connection and closes it again on every path out.
//! The deadline bounds the statement execution and every row fetch; after
//! each produced row it is checked once more. What happens when it passes is
//! decided by the [`TimeoutPolicy`]: `Fail` returns a timeout error, while
//! `Truncate` returns the rows collected so far and never returns an error.

use crate::error::{DataError, Result};
use crate::traits::{Backend, Connection};
use crate::types::{Dataset, KeyColumns, QueryResults, Schema, TimeoutPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

/// Login timeout for a query with `remaining` budget left: whole seconds,
/// at least one
pub fn login_timeout_for(remaining: Duration) -> Duration {
    Duration::from_secs(remaining.as_secs().max(1))
}

/// Connect to `source`, giving up after `login_timeout`
pub(crate) async fn open_connection(
    backend: &dyn Backend,
    source: &str,
    login_timeout: Duration,
) -> Result<Box<dyn Connection>> {
    debug!(
        "Connecting to {} source \"{}\" (login timeout {:?})",
        backend.backend_type(),
        source,
        login_timeout
    );

    timeout(login_timeout, backend.connect(source, login_timeout))
        .await
        .map_err(|_| {
            DataError::ConnectionFailed(format!(
                "no connection to \"{}\" within {:?}",
                source, login_timeout
            ))
        })?
}

enum Completion {
    Exhausted,
    DeadlineExceeded,
}

pub struct TimeBoundedExecutor {
    backend: Arc<dyn Backend>,
    source: String,
    schema: Arc<Schema>,
    key_columns: Arc<KeyColumns>,
}

impl TimeBoundedExecutor {
    pub fn new(
        backend: Arc<dyn Backend>,
        source: impl Into<String>,
        schema: Arc<Schema>,
        key_columns: Arc<KeyColumns>,
    ) -> Self {
        Self {
            backend,
            source: source.into(),
            schema,
            key_columns,
        }
    }

    /// Run `query` and collect its rows until the result is exhausted or
    /// `deadline` passes
    pub async fn execute(
        &self,
        query: &str,
        deadline: Instant,
        policy: TimeoutPolicy,
    ) -> Result<QueryResults> {
        debug!("Executing query: {} (policy: {})", query, policy);
        let start = Instant::now();

        if start > deadline {
            return self.deadline_exceeded(policy, Vec::new(), start);
        }

        let login_timeout = login_timeout_for(deadline - start);
        let mut connection =
            match open_connection(self.backend.as_ref(), &self.source, login_timeout).await {
                Ok(connection) => connection,
                Err(e) => {
                    let message = format!("cannot connect to datasource \"{}\"", self.source);
                    return self.backend_failed(policy, Vec::new(), start, message, e);
                }
            };

        let mut datasets = Vec::new();
        let outcome = self
            .collect_rows(connection.as_mut(), query, deadline, &mut datasets)
            .await;

        if let Err(e) = connection.close().await {
            warn!("Failed to close connection to \"{}\": {}", self.source, e);
        }

        match outcome {
            Ok(Completion::Exhausted) => {
                let execution_ms = start.elapsed().as_millis() as u64;
                debug!("Query returned {} rows in {}ms", datasets.len(), execution_ms);
                Ok(QueryResults::new(datasets, execution_ms, false))
            }
            Ok(Completion::DeadlineExceeded) => self.deadline_exceeded(policy, datasets, start),
            Err(e) => self.backend_failed(
                policy,
                datasets,
                start,
                "error while running the query".to_string(),
                e,
            ),
        }
    }

    async fn collect_rows(
        &self,
        connection: &mut dyn Connection,
        query: &str,
        deadline: Instant,
        datasets: &mut Vec<Dataset>,
    ) -> Result<Completion> {
        let mut cursor = match timeout_at(deadline, connection.execute(query)).await {
            Ok(cursor) => cursor?,
            Err(_) => return Ok(Completion::DeadlineExceeded),
        };

        // Schema columns missing from the live result are reported as unset.
        let mapping: Vec<(&str, Option<usize>)> = self
            .schema
            .iter()
            .map(|column| (column, cursor.column_index(column)))
            .collect();
        for (column, _) in mapping.iter().filter(|(_, index)| index.is_none()) {
            debug!("Column \"{}\" is not in the result set", column);
        }

        loop {
            match timeout_at(deadline, cursor.next()).await {
                Err(_) => return Ok(Completion::DeadlineExceeded),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(false)) => return Ok(Completion::Exhausted),
                Ok(Ok(true)) => {}
            }

            let mut values = HashMap::with_capacity(mapping.len());
            for (column, index) in &mapping {
                let value = match index {
                    Some(index) => cursor.string_value(*index)?,
                    None => None,
                };
                values.insert(column.to_string(), value);
            }
            datasets.push(Dataset::new(
                self.schema.clone(),
                &self.key_columns,
                values,
            ));

            if Instant::now() > deadline {
                return Ok(Completion::DeadlineExceeded);
            }
        }
    }

    fn deadline_exceeded(
        &self,
        policy: TimeoutPolicy,
        datasets: Vec<Dataset>,
        start: Instant,
    ) -> Result<QueryResults> {
        match policy {
            TimeoutPolicy::Fail => Err(DataError::timeout(
                "query could not be completed within the time limit",
            )),
            TimeoutPolicy::Truncate => {
                warn!(
                    "Deadline exceeded on \"{}\"; returning {} rows collected so far",
                    self.source,
                    datasets.len()
                );
                Ok(QueryResults::new(
                    datasets,
                    start.elapsed().as_millis() as u64,
                    true,
                ))
            }
        }
    }

    fn backend_failed(
        &self,
        policy: TimeoutPolicy,
        datasets: Vec<Dataset>,
        start: Instant,
        message: String,
        cause: DataError,
    ) -> Result<QueryResults> {
        match policy {
            TimeoutPolicy::Fail => Err(DataError::timeout_caused_by(message, cause)),
            TimeoutPolicy::Truncate => {
                warn!(
                    "{}: {}; returning {} rows collected so far",
                    message,
                    cause,
                    datasets.len()
                );
                Ok(QueryResults::new(
                    datasets,
                    start.elapsed().as_millis() as u64,
                    true,
                ))
            }
        }
    }
}
