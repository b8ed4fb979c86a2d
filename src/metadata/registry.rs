//! Registry of metadata providers keyed by data-source name.
//!
//! The live mapping is an immutable [`ProviderSet`] behind a lock. A rebuild populates and
//! initializes a fresh set off to the side; only a complete set is ever swapped in, so readers
//! see either the old or the new mapping, never a mix and never an empty gap.

use crate::config::{ConfigProvider, RuntimeConfig};
use crate::error::{AppError, ConfigError};
use crate::metadata::{MetadataException, MetadataProvider, MetadataProviderFactory};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinSet;

/// Default bound on one provider's introspection.
pub const DEFAULT_INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(15);

/// One complete generation of providers and the snapshot they were built from.
#[derive(Default)]
pub struct ProviderSet {
    snapshot: Option<Arc<RuntimeConfig>>,
    providers: HashMap<String, Arc<dyn MetadataProvider>>,
}

impl ProviderSet {
    pub fn snapshot(&self) -> Option<&Arc<RuntimeConfig>> {
        self.snapshot.as_ref()
    }

    pub fn get(&self, data_source_name: &str) -> Result<Arc<dyn MetadataProvider>, AppError> {
        self.providers
            .get(data_source_name)
            .cloned()
            .ok_or_else(|| AppError::DataSourceNotFound(data_source_name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn exceptions(&self) -> Vec<MetadataException> {
        self.providers.values().flat_map(|p| p.exceptions()).collect()
    }
}

/// Outcome of initializing a set of providers. Names are sorted.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InitializationReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl InitializationReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct MetadataProviderRegistry {
    factory: MetadataProviderFactory,
    config_provider: RwLock<Arc<ConfigProvider>>,
    current: RwLock<Arc<ProviderSet>>,
    introspection_timeout: Duration,
}

impl MetadataProviderRegistry {
    /// Starts with no providers. Boot and hot-reload both populate it through [`rebuild`] (or
    /// the orchestrator's prepare-then-publish), whatever `config_provider` already holds.
    ///
    /// [`rebuild`]: MetadataProviderRegistry::rebuild
    pub fn new(config_provider: Arc<ConfigProvider>, factory: MetadataProviderFactory) -> Self {
        MetadataProviderRegistry {
            factory,
            config_provider: RwLock::new(config_provider),
            current: RwLock::new(Arc::new(ProviderSet::default())),
            introspection_timeout: DEFAULT_INTROSPECTION_TIMEOUT,
        }
    }

    pub fn with_introspection_timeout(mut self, timeout: Duration) -> Self {
        self.introspection_timeout = timeout;
        self
    }

    /// Provider reference the current set is bound to.
    pub fn config_provider(&self) -> Arc<ConfigProvider> {
        self.config_provider.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn current(&self) -> Arc<ProviderSet> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get(&self, data_source_name: &str) -> Result<Arc<dyn MetadataProvider>, AppError> {
        self.current().get(data_source_name)
    }

    pub fn list(&self) -> Vec<Arc<dyn MetadataProvider>> {
        self.current().providers.values().cloned().collect()
    }

    /// Initialize every current provider concurrently.
    pub async fn initialize_all(&self) -> InitializationReport {
        let set = self.current();
        initialize_providers(&set.providers, self.introspection_timeout).await
    }

    /// Every provider's accumulated exceptions. Order is unspecified.
    pub fn collect_all_exceptions(&self) -> Vec<MetadataException> {
        self.current().exceptions()
    }

    /// Construct and initialize providers for `snapshot` without publishing them.
    /// Construction failures are fatal and wrapped in `RebuildFailed`; introspection failures
    /// are recorded on the providers and listed in the report.
    pub async fn prepare(
        &self,
        snapshot: Arc<RuntimeConfig>,
    ) -> Result<(Arc<ProviderSet>, InitializationReport), ConfigError> {
        let set = construct(&self.factory, &snapshot).map_err(|e| {
            tracing::error!(error = %e, "metadata provider construction failed; current providers kept");
            ConfigError::RebuildFailed(Box::new(e))
        })?;
        let report = initialize_providers(&set.providers, self.introspection_timeout).await;
        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "metadata providers built"
        );
        Ok((Arc::new(set), report))
    }

    /// Replace the whole mapping with initialized providers for `snapshot`. A construction
    /// failure returns `RebuildFailed` and leaves the previous mapping in place.
    pub async fn rebuild(
        &self,
        config_provider: Arc<ConfigProvider>,
        snapshot: Arc<RuntimeConfig>,
    ) -> Result<InitializationReport, ConfigError> {
        let (set, report) = self.prepare(snapshot).await?;
        self.publish(config_provider, set);
        Ok(report)
    }

    /// Make `set` the live mapping, bound to `config_provider`.
    pub(crate) fn publish(&self, config_provider: Arc<ConfigProvider>, set: Arc<ProviderSet>) {
        *self.config_provider.write().unwrap_or_else(PoisonError::into_inner) = config_provider;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = set;
    }
}

/// One provider per data source of `snapshot`, or the first construction error.
fn construct(factory: &MetadataProviderFactory, snapshot: &Arc<RuntimeConfig>) -> Result<ProviderSet, ConfigError> {
    let mut providers = HashMap::with_capacity(snapshot.data_sources.len());
    for (name, ds) in &snapshot.data_sources {
        let provider = factory.create(name, ds, snapshot)?;
        providers.insert(name.clone(), provider);
    }
    Ok(ProviderSet {
        snapshot: Some(snapshot.clone()),
        providers,
    })
}

async fn initialize_providers(
    providers: &HashMap<String, Arc<dyn MetadataProvider>>,
    timeout: Duration,
) -> InitializationReport {
    let mut tasks = JoinSet::new();
    for (name, provider) in providers {
        let name = name.clone();
        let provider = provider.clone();
        tasks.spawn(async move {
            // inner task so a panicking provider still reports under its own name
            let worker = provider.clone();
            let outcome = tokio::spawn(async move { tokio::time::timeout(timeout, worker.initialize()).await }).await;
            (name, provider, outcome)
        });
    }

    let mut report = InitializationReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, _, Ok(Ok(Ok(()))))) => report.succeeded.push(name),
            Ok((name, _, Ok(Ok(Err(e))))) => {
                tracing::warn!(data_source = %name, error = %e, "metadata initialization failed");
                report.failed.push(name);
            }
            Ok((name, provider, Ok(Err(_)))) => {
                provider.record_exception(MetadataException::Timeout {
                    data_source: name.clone(),
                    after: timeout,
                });
                report.failed.push(name);
            }
            Ok((name, provider, Err(e))) => {
                tracing::error!(data_source = %name, error = %e, "metadata initialization task aborted");
                provider.record_exception(MetadataException::Introspection {
                    data_source: name.clone(),
                    message: format!("initialization aborted: {}", e),
                });
                report.failed.push(name);
            }
            Err(e) => tracing::error!(error = %e, "metadata initialization task aborted"),
        }
    }
    report.succeeded.sort();
    report.failed.sort();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_and_substitute, DataSourceConfig, EnvVarReplacement, SourceType};
    use crate::metadata::{DatabaseObject, ObjectRef, SchemaIntrospector, SqlDialect};
    use async_trait::async_trait;

    /// Returns every requested object with an `id` primary key; fails for one connection string.
    struct Echo {
        failing: &'static str,
    }

    #[async_trait]
    impl SchemaIntrospector for Echo {
        async fn introspect(&self, ds: &DataSourceConfig, objects: &[ObjectRef]) -> Result<Vec<DatabaseObject>, AppError> {
            if ds.connection_string == self.failing {
                return Err(AppError::Db(sqlx::Error::PoolTimedOut));
            }
            Ok(objects
                .iter()
                .map(|r| {
                    let mut obj = DatabaseObject::new(r.schema.as_deref(), &r.name, SourceType::Table);
                    obj.primary_key.push("id".into());
                    obj
                })
                .collect())
        }
    }

    fn factory() -> MetadataProviderFactory {
        MetadataProviderFactory::new().with_introspector(SqlDialect::PostgreSql, Arc::new(Echo { failing: "down" }))
    }

    fn snapshot(sources: serde_json::Value) -> Arc<RuntimeConfig> {
        let doc = serde_json::json!({ "data-sources": sources });
        Arc::new(parse_and_substitute(&doc.to_string(), &EnvVarReplacement::disabled()).unwrap())
    }

    fn pg(conn: &str) -> serde_json::Value {
        serde_json::json!({ "database-type": "postgresql", "connection-string": conn })
    }

    #[tokio::test]
    async fn rebuild_yields_one_provider_per_data_source() {
        let provider = Arc::new(ConfigProvider::new());
        let registry = MetadataProviderRegistry::new(provider.clone(), factory());
        assert!(registry.list().is_empty());

        let snap = snapshot(serde_json::json!({ "db1": pg("a"), "db2": pg("b"), "db3": pg("c") }));
        let report = registry.rebuild(provider.clone(), snap.clone()).await.unwrap();
        assert_eq!(report.succeeded, vec!["db1", "db2", "db3"]);
        assert_eq!(registry.list().len(), 3);
        assert_eq!(registry.current().names(), vec!["db1", "db2", "db3"]);

        let smaller = snapshot(serde_json::json!({ "db2": pg("b") }));
        registry.rebuild(provider, smaller).await.unwrap();
        assert_eq!(registry.current().names(), vec!["db2"]);
        assert!(matches!(registry.get("db1"), Err(AppError::DataSourceNotFound(ref n)) if n == "db1"));
    }

    #[tokio::test]
    async fn one_failing_provider_does_not_stop_the_others() {
        let provider = Arc::new(ConfigProvider::new());
        let registry = MetadataProviderRegistry::new(provider.clone(), factory());
        let snap = snapshot(serde_json::json!({ "db1": pg("a"), "db2": pg("down"), "db3": pg("c") }));
        let report = registry.rebuild(provider, snap).await.unwrap();
        assert_eq!(report.succeeded, vec!["db1", "db3"]);
        assert_eq!(report.failed, vec!["db2"]);
        assert!(registry.get("db1").unwrap().is_initialized());
        assert!(!registry.get("db2").unwrap().is_initialized());

        let exceptions = registry.collect_all_exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].data_source(), "db2");
    }

    #[tokio::test]
    async fn unsupported_backend_keeps_previous_mapping() {
        let provider = Arc::new(ConfigProvider::new());
        let registry = MetadataProviderRegistry::new(provider.clone(), factory());
        let first = snapshot(serde_json::json!({ "db1": pg("a") }));
        registry.rebuild(provider.clone(), first.clone()).await.unwrap();

        let bad = snapshot(serde_json::json!({
            "db1": pg("a"),
            "graph": { "database-type": "graphdb", "connection-string": "bolt://g" }
        }));
        let err = registry.rebuild(provider, bad).await.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::RebuildFailed(ref inner) if matches!(**inner, ConfigError::UnsupportedBackend { ref data_source, .. } if data_source == "graph")
        ));
        assert_eq!(registry.current().names(), vec!["db1"]);
        assert!(Arc::ptr_eq(registry.current().snapshot().unwrap(), &first));
        assert!(registry.get("db1").unwrap().is_initialized());
    }

    #[tokio::test]
    async fn new_starts_empty_even_when_a_snapshot_is_held() {
        let graph = snapshot(serde_json::json!({
            "graph": { "database-type": "graphdb", "connection-string": "bolt://g" }
        }));
        let provider = Arc::new(ConfigProvider::with_snapshot(graph));
        let registry = MetadataProviderRegistry::new(provider, factory());
        assert!(registry.list().is_empty());
        assert!(registry.current().snapshot().is_none());
        assert_eq!(registry.initialize_all().await, InitializationReport::default());
    }

    #[tokio::test]
    async fn prepared_set_is_not_visible_until_published() {
        let provider = Arc::new(ConfigProvider::new());
        let registry = MetadataProviderRegistry::new(provider.clone(), factory());
        let (set, report) = registry
            .prepare(snapshot(serde_json::json!({ "db1": pg("a"), "db2": pg("b") })))
            .await
            .unwrap();
        assert!(report.all_succeeded());
        assert!(registry.list().is_empty());
        assert!(set.get("db2").unwrap().is_initialized());

        registry.publish(provider, set.clone());
        assert!(Arc::ptr_eq(&registry.current(), &set));
        assert_eq!(registry.list().len(), 2);
    }

    struct Slow;

    #[async_trait]
    impl SchemaIntrospector for Slow {
        async fn introspect(&self, _: &DataSourceConfig, _: &[ObjectRef]) -> Result<Vec<DatabaseObject>, AppError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn slow_introspection_times_out() {
        let provider = Arc::new(ConfigProvider::new());
        let factory = MetadataProviderFactory::new().with_introspector(SqlDialect::PostgreSql, Arc::new(Slow));
        let registry =
            MetadataProviderRegistry::new(provider.clone(), factory).with_introspection_timeout(Duration::from_millis(20));
        let report = registry
            .rebuild(provider, snapshot(serde_json::json!({ "db1": pg("a") })))
            .await
            .unwrap();
        assert_eq!(report.failed, vec!["db1"]);
        assert!(matches!(registry.collect_all_exceptions()[0], MetadataException::Timeout { .. }));

        let again = registry.initialize_all().await;
        assert_eq!(again.failed, vec!["db1"]);
    }

    /// Panics for one connection string, answers normally for the rest.
    struct Exploding;

    #[async_trait]
    impl SchemaIntrospector for Exploding {
        async fn introspect(&self, ds: &DataSourceConfig, objects: &[ObjectRef]) -> Result<Vec<DatabaseObject>, AppError> {
            if ds.connection_string == "boom" {
                panic!("catalog query panicked");
            }
            Echo { failing: "" }.introspect(ds, objects).await
        }
    }

    #[tokio::test]
    async fn panicking_provider_is_reported_as_failed() {
        let provider = Arc::new(ConfigProvider::new());
        let factory = MetadataProviderFactory::new().with_introspector(SqlDialect::PostgreSql, Arc::new(Exploding));
        let registry = MetadataProviderRegistry::new(provider.clone(), factory);
        let report = registry
            .rebuild(provider, snapshot(serde_json::json!({ "db1": pg("a"), "db2": pg("boom") })))
            .await
            .unwrap();
        assert_eq!(report.succeeded, vec!["db1"]);
        assert_eq!(report.failed, vec!["db2"]);
        let exceptions = registry.collect_all_exceptions();
        assert!(matches!(
            &exceptions[..],
            [MetadataException::Introspection { data_source, .. }] if data_source == "db2"
        ));
    }
}
