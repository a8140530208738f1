//! Datasource definitions.
//!
//! A definition is parsed into [`RawDatasourceConfig`] with every field
//! optional and then validated into a [`DatasourceConfig`], so a missing field
//! is reported by name together with the datasource it belongs to.

use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time allowed for the connection used to introspect the schema
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Datasource definition as written in a configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDatasourceConfig {
    #[serde(rename = "NAME", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Backend type (`postgres`, `sqlite`, ...)
    #[serde(rename = "TYPE", default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Backend identifier, e.g. a connection string or database file
    #[serde(rename = "SOURCE", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(rename = "TABLE", default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    #[serde(rename = "Schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<String>>,

    #[serde(
        rename = "Schluessel",
        alias = "KeyColumns",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub key_columns: Option<Vec<String>>,

    /// Seconds
    #[serde(rename = "LOGIN_TIMEOUT", default, skip_serializing_if = "Option::is_none")]
    pub login_timeout: Option<u64>,
}

/// Validated datasource definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasourceConfig {
    pub name: String,
    pub backend: Option<String>,
    pub source: String,
    pub table: String,
    /// Explicit schema; `None` means introspect the backend
    pub schema: Option<Vec<String>>,
    /// Explicit key columns; `None` means use the backend's primary key
    pub key_columns: Option<Vec<String>>,
    pub login_timeout: Duration,
}

impl DatasourceConfig {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backend: None,
            source: source.into(),
            table: table.into(),
            schema: None,
            key_columns: None,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_schema<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Validate a raw definition
    pub fn from_raw(raw: RawDatasourceConfig) -> Result<Self> {
        let name = non_blank(raw.name)
            .ok_or_else(|| DataError::configuration("datasource NAME is missing"))?;

        let source = non_blank(raw.source).ok_or_else(|| {
            DataError::configuration(format!(
                "datasource \"{}\": SOURCE (backend identifier) is missing",
                name
            ))
        })?;

        let table = non_blank(raw.table).ok_or_else(|| {
            DataError::configuration(format!(
                "datasource \"{}\": TABLE (table or view name) is missing",
                name
            ))
        })?;

        let login_timeout = raw
            .login_timeout
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(DEFAULT_LOGIN_TIMEOUT);

        Ok(Self {
            name,
            backend: non_blank(raw.backend),
            source,
            table,
            schema: raw.schema,
            key_columns: raw.key_columns,
            login_timeout,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawDatasourceConfig = serde_json::from_str(json).map_err(|e| {
            DataError::configuration(format!("malformed datasource definition: {}", e))
        })?;
        Self::from_raw(raw)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: RawDatasourceConfig = serde_yaml::from_str(yaml).map_err(|e| {
            DataError::configuration(format!("malformed datasource definition: {}", e))
        })?;
        Self::from_raw(raw)
    }
}

impl TryFrom<RawDatasourceConfig> for DatasourceConfig {
    type Error = DataError;

    fn try_from(raw: RawDatasourceConfig) -> Result<Self> {
        Self::from_raw(raw)
    }
}

/// A configuration file listing several datasources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasourcesFile {
    #[serde(rename = "Datenquellen", alias = "datasources", default)]
    pub datasources: Vec<RawDatasourceConfig>,
}

impl DatasourcesFile {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| DataError::configuration(format!("malformed datasources file: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DataError::configuration(format!("malformed datasources file: {}", e)))
    }

    /// Validate every definition; the first invalid one fails the whole file
    pub fn configs(&self) -> Result<Vec<DatasourceConfig>> {
        self.datasources
            .iter()
            .cloned()
            .map(DatasourceConfig::from_raw)
            .collect()
    }

    /// Validated definition named `name`
    pub fn find(&self, name: &str) -> Result<DatasourceConfig> {
        let raw = self
            .datasources
            .iter()
            .find(|raw| raw.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| {
                DataError::configuration(format!("datasource \"{}\" is not defined", name))
            })?;
        DatasourceConfig::from_raw(raw)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
