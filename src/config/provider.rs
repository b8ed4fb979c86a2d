//! Process-wide holder of the current configuration snapshot.

use crate::config::loader::{load_from_file, merge_overrides, parse_and_substitute, EnvVarReplacement};
use crate::config::snapshot::RuntimeConfig;
use crate::error::{AppError, ConfigError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Arguments of the one-shot configuration path.
#[derive(Clone, Debug, Default)]
pub struct InitializeRequest<'a> {
    pub configuration: &'a str,
    /// Merged over `configuration` before parsing.
    pub configuration_overrides: Option<&'a str>,
    /// GraphQL schema text; required by document-store data sources.
    pub schema: Option<&'a str>,
    pub connection_string: Option<&'a str>,
    pub access_token: Option<&'a str>,
    pub replacement: EnvVarReplacement,
}

/// Holds at most one snapshot. `initialize` installs the first one; later replacements
/// go through `hot_reload` only.
#[derive(Debug, Default)]
pub struct ConfigProvider {
    current: RwLock<Option<Arc<RuntimeConfig>>>,
    version: AtomicU64,
    late_configured: AtomicBool,
}

impl ConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that already holds `snapshot`.
    pub fn with_snapshot(snapshot: Arc<RuntimeConfig>) -> Self {
        ConfigProvider {
            current: RwLock::new(Some(snapshot)),
            version: AtomicU64::new(1),
            late_configured: AtomicBool::new(false),
        }
    }

    /// Provider holding the snapshot read from a configuration file.
    pub async fn from_file(path: impl AsRef<Path>, replacement: &EnvVarReplacement) -> Result<Self, ConfigError> {
        let config = load_from_file(path, replacement).await?;
        Ok(Self::with_snapshot(Arc::new(config)))
    }

    pub fn try_get_config(&self) -> Option<Arc<RuntimeConfig>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_config(&self) -> Result<Arc<RuntimeConfig>, AppError> {
        self.try_get_config().ok_or(AppError::NotConfigured)
    }

    pub fn is_configured(&self) -> bool {
        self.try_get_config().is_some()
    }

    /// True when `snapshot` is the value currently held (same allocation).
    pub fn holds(&self, snapshot: &Arc<RuntimeConfig>) -> bool {
        self.try_get_config().is_some_and(|c| Arc::ptr_eq(&c, snapshot))
    }

    /// Incremented on every install or replacement; 0 before the first one.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn is_late_configured(&self) -> bool {
        self.late_configured.load(Ordering::SeqCst)
    }

    pub fn mark_late_configured(&self) {
        self.late_configured.store(true, Ordering::SeqCst);
    }

    /// Parse and install the first snapshot. Fails with `AlreadyConfigured` when one is held,
    /// leaving it untouched.
    pub fn initialize(&self, request: InitializeRequest<'_>) -> Result<Arc<RuntimeConfig>, AppError> {
        if self.is_configured() {
            return Err(AppError::AlreadyConfigured);
        }
        let raw = match request.configuration_overrides {
            Some(overrides) => merge_overrides(request.configuration, overrides)?,
            None => request.configuration.to_string(),
        };
        let config = parse_and_substitute(&raw, &request.replacement)?
            .with_connection_override(request.connection_string, request.access_token)
            .with_graphql_schema(request.schema);
        let snapshot = Arc::new(config);

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return Err(AppError::AlreadyConfigured);
        }
        *guard = Some(snapshot.clone());
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(version, data_sources = snapshot.data_sources.len(), "configuration initialized");
        Ok(snapshot)
    }

    /// Replace the held snapshot. Returns the new version.
    pub fn hot_reload(&self, snapshot: Arc<RuntimeConfig>) -> u64 {
        self.replace(Some(snapshot))
    }

    /// Put back a previously held value (including "nothing held").
    pub(crate) fn replace(&self, snapshot: Option<Arc<RuntimeConfig>>) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = snapshot;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(version, "configuration replaced");
        version
    }
}
