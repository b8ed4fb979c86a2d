//! Runtime configuration snapshot: one parsed, substituted, immutable configuration.

use crate::config::types::*;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Name given to the unnamed `data-source` of a document.
pub const DEFAULT_DATA_SOURCE_NAME: &str = "default";

/// Immutable configuration value. Shared as `Arc<RuntimeConfig>` and replaced, never mutated.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub default_data_source: String,
    pub data_sources: BTreeMap<String, DataSourceConfig>,
    pub runtime: RuntimeOptions,
    pub entities: BTreeMap<String, EntityConfig>,
    /// GraphQL schema text supplied alongside the document (document-store backends).
    #[serde(skip)]
    pub graphql_schema: Option<String>,
    #[serde(skip)]
    pub loaded_at: DateTime<Utc>,
}

impl RuntimeConfig {
    /// Flatten a parsed document into a snapshot. Fails only on structural problems
    /// (no data source, a name used twice); references are checked by the validator.
    pub fn from_document(doc: RuntimeConfigDocument) -> Result<Self, ConfigError> {
        let mut data_sources = doc.data_sources;
        if let Some(ds) = doc.data_source {
            if data_sources.contains_key(DEFAULT_DATA_SOURCE_NAME) {
                return Err(ConfigError::Validation(format!(
                    "'data-source' and data-sources.{} both define the default data source",
                    DEFAULT_DATA_SOURCE_NAME
                )));
            }
            data_sources.insert(DEFAULT_DATA_SOURCE_NAME.to_string(), ds);
        }
        let default_data_source = match doc.default_data_source {
            Some(name) => name,
            None if data_sources.contains_key(DEFAULT_DATA_SOURCE_NAME) => DEFAULT_DATA_SOURCE_NAME.to_string(),
            None => data_sources
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| ConfigError::Validation("at least one data source is required".into()))?,
        };
        Ok(RuntimeConfig {
            schema: doc.schema,
            default_data_source,
            data_sources,
            runtime: doc.runtime,
            entities: doc.entities,
            graphql_schema: None,
            loaded_at: Utc::now(),
        })
    }

    pub fn data_source_names(&self) -> impl Iterator<Item = &str> {
        self.data_sources.keys().map(String::as_str)
    }

    pub fn data_source(&self, name: &str) -> Option<&DataSourceConfig> {
        self.data_sources.get(name)
    }

    pub fn default_data_source(&self) -> Option<&DataSourceConfig> {
        self.data_sources.get(&self.default_data_source)
    }

    /// Data source name an entity is bound to.
    pub fn data_source_name_for<'a>(&'a self, entity: &'a EntityConfig) -> &'a str {
        entity.data_source.as_deref().unwrap_or(&self.default_data_source)
    }

    /// Entities served by one data source, in name order.
    pub fn entities_for_data_source<'a>(
        &'a self,
        data_source: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a EntityConfig)> + 'a {
        self.entities
            .iter()
            .filter(move |(_, e)| self.data_source_name_for(e) == data_source)
    }

    pub fn is_development_mode(&self) -> bool {
        self.runtime.host.mode == HostMode::Development
    }

    pub fn cosmos_data_source_used(&self) -> bool {
        self.data_sources
            .values()
            .any(|ds| ds.database_type == DatabaseType::CosmosDbNoSql)
    }

    /// REST route for an entity: configured path or the entity name, with a leading slash.
    pub fn rest_path_for(&self, name: &str, entity: &EntityConfig) -> String {
        let path = entity.rest.path.as_deref().unwrap_or(name);
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        }
    }

    /// Apply a connection string override and access token to the default data source.
    pub fn with_connection_override(mut self, connection_string: Option<&str>, access_token: Option<&str>) -> Self {
        let default_name = self.default_data_source.clone();
        if let Some(ds) = self.data_sources.get_mut(&default_name) {
            if let Some(conn) = connection_string.filter(|s| !s.is_empty()) {
                ds.connection_string = conn.to_string();
            }
            if let Some(token) = access_token.filter(|s| !s.is_empty()) {
                if matches!(ds.database_type, DatabaseType::Other(_)) {
                    tracing::warn!(data_source = %default_name, "access token ignored for unsupported database type");
                } else {
                    ds.access_token = Some(token.to_string());
                }
            }
        }
        self
    }

    pub fn with_graphql_schema(mut self, schema: Option<&str>) -> Self {
        if let Some(s) = schema.filter(|s| !s.trim().is_empty()) {
            self.graphql_schema = Some(s.to_string());
        }
        self
    }

    /// New snapshot with one more entity. The receiver is left untouched.
    pub fn with_entity(&self, name: &str, entity: EntityConfig) -> Result<Self, ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation("entity name cannot be empty".into()));
        }
        if self.entities.contains_key(name) {
            return Err(ConfigError::Validation(format!("entity '{}' already exists", name)));
        }
        let mut next = self.clone();
        next.entities.insert(name.to_string(), entity);
        next.loaded_at = Utc::now();
        Ok(next)
    }
}
