//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dataapi_sdk::config::{DataSourceConfig, SourceType};
use dataapi_sdk::metadata::{ColumnDefinition, DatabaseObject, ObjectRef};
use dataapi_sdk::{
    AppError, AuthorizationResolver, ConfigProvider, ConfigurationConsumer, DocumentationGenerator,
    MetadataProviderFactory, RuntimeConfig, SchemaIntrospector, SqlDialect,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Connection string the fake introspector refuses.
pub const DOWN: &str = "postgres://down";
/// Connection string the fake introspector answers slowly.
pub const SLOW: &str = "postgres://slow";

/// Describes every requested object as a table with `id` and `name` columns.
pub struct FakeCatalog;

#[async_trait]
impl SchemaIntrospector for FakeCatalog {
    async fn introspect(&self, ds: &DataSourceConfig, objects: &[ObjectRef]) -> Result<Vec<DatabaseObject>, AppError> {
        match ds.connection_string.as_str() {
            DOWN => return Err(AppError::Db(sqlx::Error::PoolTimedOut)),
            SLOW => tokio::time::sleep(Duration::from_millis(400)).await,
            _ => {}
        }
        Ok(objects
            .iter()
            .map(|r| {
                let mut obj = DatabaseObject::new(r.schema.as_deref(), &r.name, SourceType::Table);
                for name in ["id", "name"] {
                    obj.columns.push(ColumnDefinition {
                        name: name.into(),
                        data_type: "text".into(),
                        nullable: name != "id",
                        has_default: false,
                    });
                }
                obj.primary_key.push("id".into());
                obj
            })
            .collect())
    }
}

pub fn factory() -> MetadataProviderFactory {
    MetadataProviderFactory::new().with_introspector(SqlDialect::PostgreSql, Arc::new(FakeCatalog))
}

/// Counts rebinds; fails every call after the first `fail_after` when set.
#[derive(Default)]
pub struct Recorder {
    pub rebinds: AtomicUsize,
    pub fail_after: Option<usize>,
}

impl Recorder {
    pub fn failing_after(n: usize) -> Self {
        Recorder {
            rebinds: AtomicUsize::new(0),
            fail_after: Some(n),
        }
    }

    pub fn count(&self) -> usize {
        self.rebinds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationConsumer for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn rebind_configuration(&self, provider: Arc<ConfigProvider>) -> Result<(), AppError> {
        let n = self.rebinds.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(AppError::Dependent {
                service: "recorder",
                message: "rebind refused".into(),
            });
        }
        provider.get_config().map(|_| ())
    }
}

#[async_trait]
impl AuthorizationResolver for Recorder {
    async fn rebuild_permission_map(&self, _snapshot: &RuntimeConfig) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct BrokenDocs;

#[async_trait]
impl DocumentationGenerator for BrokenDocs {
    async fn generate_best_effort(&self, _p: Arc<ConfigProvider>, _s: Arc<RuntimeConfig>) -> Result<(), AppError> {
        Err(AppError::Dependent {
            service: "docs",
            message: "no REST-enabled entities to document".into(),
        })
    }
}

pub struct HangingDocs;

#[async_trait]
impl DocumentationGenerator for HangingDocs {
    async fn generate_best_effort(&self, _p: Arc<ConfigProvider>, _s: Arc<RuntimeConfig>) -> Result<(), AppError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

/// Two postgres data sources with one entity each.
pub fn two_sources(db1: &str, db2: &str) -> serde_json::Value {
    serde_json::json!({
        "data-sources": {
            "db1": { "database-type": "postgresql", "connection-string": db1 },
            "db2": { "database-type": "postgresql", "connection-string": db2 }
        },
        "default-data-source": "db1",
        "entities": {
            "Book": {
                "source": { "object": "books" },
                "permissions": [{ "role": "anonymous", "actions": ["read"] }]
            },
            "Report": {
                "source": { "object": "reports" },
                "data-source": "db2",
                "permissions": [{ "role": "authenticated", "actions": ["*"] }]
            }
        }
    })
}

pub fn graphdb() -> serde_json::Value {
    serde_json::json!({
        "data-sources": { "graph": { "database-type": "graphdb", "connection-string": "bolt://graph" } },
        "entities": {}
    })
}
