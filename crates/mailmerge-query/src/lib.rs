//! # mailmerge-query
//!
//! Query engine that exposes a table or view of an external backend as a
//! uniform datasource for mail-merge document automation.
//!
//! ## Architecture
//!
//! - **key**: reversible encoding of key-column values into one opaque [`Key`]
//! - **translator**: renders glob searches, key lookups and full scans as SQL
//!   with every identifier and literal escaped
//! - **schema**: resolves schema and key columns from configuration or from
//!   the live backend
//! - **executor**: runs a statement under a wall-clock deadline with a hard
//!   ([`TimeoutPolicy::Fail`]) or soft ([`TimeoutPolicy::Truncate`]) policy
//! - **datasource**: [`SqlDatasource`], the public facade
//!
//! Backends plug in through the [`Backend`], [`Connection`] and [`RowCursor`]
//! traits. Backend crates:
//! - `mailmerge-query-postgres` - PostgreSQL
//! - `mailmerge-query-sqlite` - SQLite files and in-memory databases
//!
//! ## Example
//!
//! ```rust,no_run
//! use mailmerge_query::{Backend, Datasource, DatasourceConfig, QueryPart, SqlDatasource};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(backend: Arc<dyn Backend>) -> mailmerge_query::Result<()> {
//! let config = DatasourceConfig::new("personal", "host=localhost dbname=hr", "mitarbeiter")
//!     .with_key_columns(["personalnummer"]);
//! let datasource = SqlDatasource::new(config, backend).await?;
//!
//! let found = datasource
//!     .find(&[QueryPart::new("nachname", "Mü*")], Duration::from_secs(3))
//!     .await?;
//! let again = datasource
//!     .get_datasets_by_key(&found.keys(), Duration::from_secs(3))
//!     .await?;
//! assert_eq!(found.len(), again.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//!
//! The deadline bounds every awaited fetch. A backend whose cursor blocks a
//! thread inside `next` without yielding cannot be interrupted before that
//! fetch returns.
//!
//! Case-insensitive search relies on the backend's `lower` function. Both
//! shipped backends fold non-ASCII letters; a backend whose `lower` folds
//! ASCII only makes `Mü*` miss `MÜLLER`.

pub mod config;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod key;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod translator;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used items
pub use config::{DatasourceConfig, DatasourcesFile, RawDatasourceConfig};
pub use datasource::SqlDatasource;
pub use error::{DataError, Result};
pub use executor::TimeBoundedExecutor;
pub use key::Key;
pub use registry::BackendRegistry;
pub use schema::{ResolvedSchema, SchemaResolver};
pub use traits::{Backend, Connection, Datasource, RowCursor};
pub use translator::QueryTranslator;
pub use types::{
    Dataset, KeyColumns, Query, QueryPart, QueryResults, QueryStats, Schema, TimeoutPolicy,
};
