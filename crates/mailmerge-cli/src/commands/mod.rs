pub mod contents;
pub mod find;
pub mod lookup;
pub mod schema;

pub use contents::ContentsCommand;
pub use find::FindCommand;
pub use lookup::LookupCommand;
pub use schema::SchemaCommand;

use anyhow::Context;
use clap::Args;
use mailmerge_query::{
    BackendRegistry, Datasource, DatasourcesFile, Query, QueryResults, SqlDatasource,
    TimeoutPolicy,
};
use mailmerge_query_postgres::PostgresBackend;
use mailmerge_query_sqlite::SqliteBackend;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Options shared by every command that talks to a datasource
#[derive(Args)]
pub struct DatasourceArgs {
    /// YAML file with the datasource definitions
    #[arg(long, short = 'c', env = "MAILMERGE_CONFIG")]
    pub config: PathBuf,

    /// Name of the datasource to use
    #[arg(long, short = 'd', env = "MAILMERGE_DATASOURCE")]
    pub datasource: String,
}

/// Options for commands that run a query
#[derive(Args)]
pub struct QueryArgs {
    /// Time budget for the query in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub timeout_ms: u64,

    /// Print the rows collected before the budget ran out instead of failing
    #[arg(long)]
    pub best_effort: bool,
}

impl QueryArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn policy(&self) -> TimeoutPolicy {
        if self.best_effort {
            TimeoutPolicy::Truncate
        } else {
            TimeoutPolicy::Fail
        }
    }
}

/// Registry with every backend this binary ships
pub async fn registry() -> BackendRegistry {
    let registry = BackendRegistry::new();
    registry.register_backend(Arc::new(PostgresBackend::new())).await;
    registry.register_backend(Arc::new(SqliteBackend::new())).await;
    registry
}

impl DatasourceArgs {
    pub async fn open(&self) -> anyhow::Result<Arc<dyn Datasource>> {
        let text = std::fs::read_to_string(&self.config)
            .with_context(|| format!("Cannot read {}", self.config.display()))?;
        let file = DatasourcesFile::from_yaml(&text)?;
        let config = file.find(&self.datasource)?;

        debug!(
            "Opening datasource \"{}\" from {}",
            self.datasource,
            self.config.display()
        );
        let datasource = registry().await.create_datasource(config).await?;
        Ok(datasource)
    }
}

/// Run `query` against `datasource` with the budget and policy from `args`
pub async fn run_query(
    datasource: &Arc<dyn Datasource>,
    query: Query,
    args: &QueryArgs,
) -> anyhow::Result<QueryResults> {
    let results = match datasource.downcast_ref::<SqlDatasource>() {
        Some(sql) => sql.query(&query, args.timeout(), args.policy()).await?,
        None => match query {
            Query::Find(parts) => datasource.find(&parts, args.timeout()).await?,
            Query::ByKey(keys) => {
                datasource
                    .get_datasets_by_key(&keys, args.timeout())
                    .await?
            }
            Query::Everything => datasource.get_contents(args.timeout()).await?,
        },
    };
    Ok(results)
}
