use crate::config::DatasourceConfig;
use crate::error::Result;
use crate::executor::TimeBoundedExecutor;
use crate::key::Key;
use crate::schema::SchemaResolver;
use crate::traits::{Backend, Datasource};
use crate::translator::QueryTranslator;
use crate::types::{KeyColumns, Query, QueryPart, QueryResults, Schema, TimeoutPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Datasource backed by one table or view of an SQL backend.
///
/// Schema and key columns are fixed at construction; every query opens and
/// closes its own connection, so one instance can serve concurrent callers.
pub struct SqlDatasource {
    name: String,
    schema: Arc<Schema>,
    key_columns: Arc<KeyColumns>,
    translator: QueryTranslator,
    executor: TimeBoundedExecutor,
}

impl SqlDatasource {
    /// Resolve the schema for `config` and build the datasource.
    ///
    /// Without a `Schema` section this needs a round-trip to the backend.
    pub async fn new(config: DatasourceConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        let resolved = SchemaResolver::new(backend.as_ref())
            .resolve(&config)
            .await?;

        let schema = Arc::new(resolved.schema);
        let key_columns = Arc::new(resolved.key_columns);
        let executor = TimeBoundedExecutor::new(
            backend,
            config.source.clone(),
            schema.clone(),
            key_columns.clone(),
        );

        Ok(Self {
            name: config.name,
            schema,
            key_columns,
            translator: QueryTranslator::new(config.table),
            executor,
        })
    }

    pub fn key_columns(&self) -> &KeyColumns {
        &self.key_columns
    }

    pub fn table(&self) -> &str {
        self.translator.table()
    }

    /// Run `query` with an explicit timeout policy.
    ///
    /// With [`TimeoutPolicy::Truncate`] this never fails; a passed deadline or
    /// a backend failure yields the rows collected until then.
    pub async fn query(
        &self,
        query: &Query,
        timeout: Duration,
        policy: TimeoutPolicy,
    ) -> Result<QueryResults> {
        let deadline = Instant::now() + timeout;

        let Some(sql) = self.translator.translate(query, &self.schema) else {
            debug!(
                "Query on datasource \"{}\" cannot match any row; backend not contacted",
                self.name
            );
            return Ok(QueryResults::empty());
        };

        self.executor.execute(&sql, deadline, policy).await
    }
}

#[async_trait]
impl Datasource for SqlDatasource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn get_datasets_by_key(&self, keys: &[Key], timeout: Duration) -> Result<QueryResults> {
        self.query(&Query::ByKey(keys.to_vec()), timeout, TimeoutPolicy::Fail)
            .await
    }

    async fn find(&self, query: &[QueryPart], timeout: Duration) -> Result<QueryResults> {
        self.query(&Query::Find(query.to_vec()), timeout, TimeoutPolicy::Fail)
            .await
    }

    async fn get_contents(&self, timeout: Duration) -> Result<QueryResults> {
        self.query(&Query::Everything, timeout, TimeoutPolicy::Fail)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubBackend;

    const BUDGET: Duration = Duration::from_secs(5);

    fn config() -> DatasourceConfig {
        DatasourceConfig::new("test", "datenbank", "UserAnsicht")
            .with_schema(["UserVorname", "UserNachname", "Beschreibung"])
            .with_key_columns(["UserVorname", "UserNachname"])
    }

    fn people() -> StubBackend {
        StubBackend::new(["UserVorname", "UserNachname", "Beschreibung"])
            .with_row(&[Some("Hans"), Some("Mu%ster#rmann"), Some("Kutter")])
            .with_row(&[Some("Sina"), None, Some("Mutter")])
    }

    async fn datasource(backend: Arc<StubBackend>) -> SqlDatasource {
        SqlDatasource::new(config(), backend).await.unwrap()
    }

    #[tokio::test]
    async fn test_schema_accessor() {
        let ds = datasource(Arc::new(people())).await;
        assert_eq!(ds.name(), "test");
        assert_eq!(ds.table(), "UserAnsicht");
        assert!(ds.schema().contains("Beschreibung"));
        assert_eq!(ds.key_columns().len(), 2);
    }

    #[tokio::test]
    async fn test_find_with_no_parts_skips_backend() {
        let backend = Arc::new(people());
        let ds = datasource(backend.clone()).await;

        let results = ds.find(&[], BUDGET).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(backend.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_with_no_keys_skips_backend() {
        let backend = Arc::new(people());
        let ds = datasource(backend.clone()).await;

        let results = ds.get_datasets_by_key(&[], BUDGET).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(backend.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_contents_builds_keys() {
        let backend = Arc::new(people());
        let ds = datasource(backend.clone()).await;

        let results = ds.get_contents(BUDGET).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            backend.queries(),
            vec!["SELECT * FROM \"UserAnsicht\";".to_string()]
        );

        let keys = results.keys();
        assert_eq!(keys[0].as_str(), "UserVorname#Hans#UserNachname#Mu%%ster%rrmann#");
        assert_eq!(keys[1].as_str(), "UserVorname#Sina#");
    }

    #[tokio::test]
    async fn test_lookup_renders_keys_from_previous_results() {
        let backend = Arc::new(people());
        let ds = datasource(backend.clone()).await;

        let keys = ds.get_contents(BUDGET).await.unwrap().keys();
        ds.get_datasets_by_key(&keys[..1], BUDGET).await.unwrap();

        assert_eq!(
            backend.queries()[1],
            "SELECT * FROM \"UserAnsicht\" WHERE \
             (\"UserVorname\"='Hans' AND \"UserNachname\"='Mu%ster#rmann');"
        );
    }

    #[tokio::test]
    async fn test_find_renders_patterns() {
        let backend = Arc::new(people());
        let ds = datasource(backend.clone()).await;

        ds.find(&[QueryPart::new("Beschreibung", "*uTTer")], BUDGET)
            .await
            .unwrap();
        assert_eq!(
            backend.queries(),
            vec!["SELECT * FROM \"UserAnsicht\" WHERE \
                  (lower(CAST(\"Beschreibung\" AS VARCHAR)) LIKE lower('%uTTer') ESCAPE '\\');"
                .to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_and_soft_budget_with_blocking_backend() {
        let backend = Arc::new(
            StubBackend::new(["UserVorname", "UserNachname", "Beschreibung"])
                .with_row(&[Some("A"), Some("1"), None])
                .with_delayed_row(Duration::from_millis(40), &[Some("B"), Some("2"), None])
                .with_delayed_row(Duration::from_secs(60), &[Some("C"), Some("3"), None]),
        );
        let ds = datasource(backend.clone()).await;
        let budget = Duration::from_millis(100);
        let query = vec![QueryPart::new("UserVorname", "*")];

        let err = ds.find(&query, budget).await.unwrap_err();
        assert!(err.is_timeout());

        let results = ds
            .query(&Query::Find(query), budget, TimeoutPolicy::Truncate)
            .await
            .unwrap();
        let names: Vec<_> = results
            .iter()
            .map(|d| d.get("UserVorname").unwrap().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(results.is_truncated());

        // The instance stays usable after a failed call.
        assert_eq!(backend.close_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_use_separate_connections() {
        let backend = Arc::new(people());
        let ds = Arc::new(datasource(backend.clone()).await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ds = ds.clone();
                tokio::spawn(async move { ds.get_contents(BUDGET).await })
            })
            .collect();

        for handle in handles {
            let results = handle.await.unwrap().unwrap();
            assert_eq!(results.len(), 2);
        }
        assert_eq!(backend.connect_count(), 8);
        assert_eq!(backend.close_count(), 8);
    }

    #[tokio::test]
    async fn test_construction_fails_without_usable_schema() {
        let backend = Arc::new(StubBackend::new(Vec::<String>::new()).failing_connect());
        let config = DatasourceConfig::new("test", "datenbank", "UserAnsicht");
        let err = SqlDatasource::new(config, backend).await.err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_downcast_from_trait_object() {
        let ds: Arc<dyn Datasource> = Arc::new(datasource(Arc::new(people())).await);
        let sql = ds.downcast_arc::<SqlDatasource>().ok().unwrap();
        assert_eq!(sql.key_columns().len(), 2);
    }
}
