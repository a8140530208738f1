use crate::config::DatasourceConfig;
use crate::error::{DataError, Result};
use crate::executor::open_connection;
use crate::traits::{Backend, Connection};
use crate::types::{KeyColumns, Schema};
use tracing::{debug, warn};

/// Schema and key columns a datasource works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    pub schema: Schema,
    pub key_columns: KeyColumns,
}

/// Determines schema and key columns from configuration, falling back to
/// introspection of the live backend when no `Schema` section is given.
///
/// On success both are non-empty and every key column is in the schema.
/// An empty key column list is rejected on every path.
pub struct SchemaResolver<'a> {
    backend: &'a dyn Backend,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    pub async fn resolve(&self, config: &DatasourceConfig) -> Result<ResolvedSchema> {
        let resolved = match &config.schema {
            Some(columns) => Self::from_declaration(config, columns)?,
            None => self.from_backend(config).await?,
        };

        if resolved.key_columns.is_empty() {
            return Err(DataError::configuration(format!(
                "datasource \"{}\": no key columns defined",
                config.name
            )));
        }

        debug!(
            "Datasource \"{}\": schema {}, {} key column(s)",
            config.name,
            resolved.schema,
            resolved.key_columns.len()
        );
        Ok(resolved)
    }

    fn from_declaration(config: &DatasourceConfig, columns: &[String]) -> Result<ResolvedSchema> {
        let schema = Schema::new(columns.iter().cloned());
        if schema.is_empty() {
            return Err(DataError::configuration(format!(
                "datasource \"{}\": Schema section is empty",
                config.name
            )));
        }

        let declared = config.key_columns.clone().ok_or_else(|| {
            DataError::configuration(format!(
                "datasource \"{}\": a Schluessel section is required when Schema is given",
                config.name
            ))
        })?;

        let key_columns =
            KeyColumns::new(declared, &schema).map_err(|e| in_datasource(&config.name, e))?;

        Ok(ResolvedSchema {
            schema,
            key_columns,
        })
    }

    async fn from_backend(&self, config: &DatasourceConfig) -> Result<ResolvedSchema> {
        debug!(
            "Schema of datasource \"{}\" not given; asking the backend",
            config.name
        );

        let mut connection = open_connection(self.backend, &config.source, config.login_timeout)
            .await
            .map_err(|e| unreadable_schema(config, e))?;

        let introspected = Self::introspect(connection.as_mut(), config).await;

        if let Err(e) = connection.close().await {
            warn!("Failed to close connection to \"{}\": {}", config.source, e);
        }

        introspected
    }

    async fn introspect(
        connection: &mut dyn Connection,
        config: &DatasourceConfig,
    ) -> Result<ResolvedSchema> {
        let columns = connection
            .table_columns(&config.table)
            .await
            .map_err(|e| unreadable_schema(config, e))?;

        let schema = Schema::new(columns);
        if schema.is_empty() {
            return Err(DataError::configuration(format!(
                "datasource \"{}\": table \"{}\" has no columns",
                config.name, config.table
            )));
        }

        let declared = match &config.key_columns {
            Some(declared) => declared.clone(),
            None => connection
                .primary_key_columns(&config.table)
                .await
                .map_err(|e| unreadable_schema(config, e))?,
        };

        let key_columns =
            KeyColumns::new(declared, &schema).map_err(|e| in_datasource(&config.name, e))?;

        Ok(ResolvedSchema {
            schema,
            key_columns,
        })
    }
}

fn unreadable_schema(config: &DatasourceConfig, cause: DataError) -> DataError {
    DataError::configuration_caused_by(
        format!(
            "datasource \"{}\": could not read schema of table \"{}\" from \"{}\"",
            config.name, config.table, config.source
        ),
        cause,
    )
}

fn in_datasource(name: &str, err: DataError) -> DataError {
    match err {
        DataError::Configuration { message, source } => DataError::Configuration {
            message: format!("datasource \"{}\": {}", name, message),
            source,
        },
        other => other,
    }
}
