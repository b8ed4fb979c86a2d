//! Backend-kind dispatch: which provider variant serves which database type.

use crate::config::{DataSourceConfig, DatabaseType, RuntimeConfig};
use crate::error::ConfigError;
use crate::metadata::{CosmosMetadataProvider, MetadataProvider, SchemaIntrospector, SqlDialect, SqlMetadataProvider};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Sql(SqlDialect),
    Cosmos,
}

/// Pure dispatch table from database type to provider variant. `None` means unsupported.
pub fn provider_kind(database_type: &DatabaseType) -> Option<ProviderKind> {
    match database_type {
        DatabaseType::MsSql | DatabaseType::DwSql => Some(ProviderKind::Sql(SqlDialect::MsSql)),
        DatabaseType::PostgreSql => Some(ProviderKind::Sql(SqlDialect::PostgreSql)),
        DatabaseType::MySql => Some(ProviderKind::Sql(SqlDialect::MySql)),
        DatabaseType::CosmosDbNoSql => Some(ProviderKind::Cosmos),
        DatabaseType::CosmosDbPostgreSql | DatabaseType::Other(_) => None,
    }
}

/// Builds providers for data sources. SQL dialects need a registered introspector.
#[derive(Clone, Default)]
pub struct MetadataProviderFactory {
    introspectors: HashMap<SqlDialect, Arc<dyn SchemaIntrospector>>,
}

impl MetadataProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_introspector(mut self, dialect: SqlDialect, introspector: Arc<dyn SchemaIntrospector>) -> Self {
        self.introspectors.insert(dialect, introspector);
        self
    }

    pub fn supports(&self, database_type: &DatabaseType) -> bool {
        match provider_kind(database_type) {
            Some(ProviderKind::Sql(dialect)) => self.introspectors.contains_key(&dialect),
            Some(ProviderKind::Cosmos) => true,
            None => false,
        }
    }

    pub fn create(
        &self,
        data_source_name: &str,
        data_source: &DataSourceConfig,
        snapshot: &Arc<RuntimeConfig>,
    ) -> Result<Arc<dyn MetadataProvider>, ConfigError> {
        let unsupported = || ConfigError::UnsupportedBackend {
            data_source: data_source_name.to_string(),
            database_type: data_source.database_type.to_string(),
        };
        let provider: Arc<dyn MetadataProvider> = match provider_kind(&data_source.database_type).ok_or_else(unsupported)? {
            ProviderKind::Sql(dialect) => {
                let introspector = self.introspectors.get(&dialect).cloned().ok_or_else(unsupported)?;
                Arc::new(SqlMetadataProvider::new(dialect, data_source_name, snapshot.clone(), introspector))
            }
            ProviderKind::Cosmos => Arc::new(CosmosMetadataProvider::new(data_source_name, snapshot.clone())),
        };
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_and_substitute, EnvVarReplacement};
    use crate::metadata::PgIntrospector;

    #[test]
    fn dispatch_table() {
        assert_eq!(provider_kind(&DatabaseType::DwSql), Some(ProviderKind::Sql(SqlDialect::MsSql)));
        assert_eq!(provider_kind(&DatabaseType::PostgreSql), Some(ProviderKind::Sql(SqlDialect::PostgreSql)));
        assert_eq!(provider_kind(&DatabaseType::CosmosDbNoSql), Some(ProviderKind::Cosmos));
        assert_eq!(provider_kind(&DatabaseType::CosmosDbPostgreSql), None);
        assert_eq!(provider_kind(&DatabaseType::Other("graphdb".into())), None);
    }

    #[test]
    fn unsupported_kind_names_the_data_source() {
        let doc = serde_json::json!({
            "data-sources": { "graph": { "database-type": "graphdb", "connection-string": "bolt://x" } }
        });
        let snapshot = Arc::new(parse_and_substitute(&doc.to_string(), &EnvVarReplacement::disabled()).unwrap());
        let factory = MetadataProviderFactory::new();
        let err = factory
            .create("graph", snapshot.data_source("graph").unwrap(), &snapshot)
            .err()
            .unwrap();
        match err {
            ConfigError::UnsupportedBackend { data_source, database_type } => {
                assert_eq!(data_source, "graph");
                assert_eq!(database_type, "graphdb");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sql_dialect_without_introspector_is_unsupported() {
        let factory = MetadataProviderFactory::new();
        assert!(!factory.supports(&DatabaseType::MySql));
        let factory = factory.with_introspector(SqlDialect::PostgreSql, Arc::new(PgIntrospector::new()));
        assert!(factory.supports(&DatabaseType::PostgreSql));
        assert!(factory.supports(&DatabaseType::CosmosDbNoSql));
    }
}
