use crate::config::DatasourceConfig;
use crate::datasource::SqlDatasource;
use crate::error::{DataError, Result};
use crate::traits::{Backend, Datasource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Backends by type plus the datasources constructed through them.
///
/// The registry is an ordinary value handed to whoever needs it; nothing is
/// registered process-wide.
pub struct BackendRegistry {
    backends: Arc<RwLock<HashMap<String, Arc<dyn Backend>>>>,
    datasources: Arc<RwLock<HashMap<String, Arc<dyn Datasource>>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: Arc::new(RwLock::new(HashMap::new())),
            datasources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a backend under its type name
    pub async fn register_backend(&self, backend: Arc<dyn Backend>) {
        let backend_type = backend.backend_type();
        let mut backends = self.backends.write().await;

        if backends.contains_key(backend_type) {
            warn!("Overwriting existing backend: {}", backend_type);
        }

        backends.insert(backend_type.to_string(), backend);
        debug!("Registered backend: {}", backend_type);
    }

    /// Construct the datasource described by `config` with the backend
    /// named by its `TYPE`, and keep it under its name
    pub async fn create_datasource(&self, config: DatasourceConfig) -> Result<Arc<dyn Datasource>> {
        let backend_type = config.backend.clone().ok_or_else(|| {
            DataError::configuration(format!(
                "datasource \"{}\": TYPE (backend type) is missing",
                config.name
            ))
        })?;

        let backend = self
            .backends
            .read()
            .await
            .get(&backend_type)
            .cloned()
            .ok_or_else(|| {
                DataError::configuration(format!(
                    "datasource \"{}\": no backend registered for TYPE \"{}\"",
                    config.name, backend_type
                ))
            })?;

        debug!(
            "Creating datasource \"{}\" on backend {}",
            config.name, backend_type
        );

        let name = config.name.clone();
        let datasource: Arc<dyn Datasource> = Arc::new(SqlDatasource::new(config, backend).await?);

        let mut datasources = self.datasources.write().await;
        if datasources.contains_key(&name) {
            warn!("Replacing existing datasource: {}", name);
        }
        datasources.insert(name, datasource.clone());

        Ok(datasource)
    }

    pub async fn get_datasource(&self, name: &str) -> Option<Arc<dyn Datasource>> {
        self.datasources.read().await.get(name).cloned()
    }

    pub async fn remove_datasource(&self, name: &str) -> Option<Arc<dyn Datasource>> {
        self.datasources.write().await.remove(name)
    }

    /// Names of all kept datasources, sorted
    pub async fn list_datasources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered backend types, sorted
    pub async fn list_backends(&self) -> Vec<String> {
        let mut types: Vec<String> = self.backends.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    pub async fn has_backend(&self, backend_type: &str) -> bool {
        self.backends.read().await.contains_key(backend_type)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
