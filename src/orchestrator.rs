//! Configuration change orchestration.
//!
//! Every accepted configuration, at boot or on hot-reload, runs the same fixed sequence:
//! validate, rebuild metadata, revalidate relationships (development mode), rewire dependent
//! services, then generate best-effort artifacts. Metadata is built off to the side and only
//! committed, together with the snapshot, when dependents are about to be rewired; a failure
//! while rewiring puts the previous registry, provider binding and snapshot back.

use crate::config::{validate_config_properties, validate_permissions, validate_relationship_config, validate_relationships};
use crate::config::{ConfigProvider, RuntimeConfig};
use crate::error::{AppError, OrchestrationError};
use crate::metadata::{InitializationReport, MetadataException, MetadataProviderRegistry, ProviderSet};
use crate::service::{ConfigurationConsumer, DependentServices};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default bound on one stage (or one dependent call).
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStage {
    Idle,
    Validating,
    RebuildingMetadata,
    RevalidatingRelationships,
    RewiringDependents,
    GeneratingArtifacts,
    Ready,
    Failed,
}

impl OrchestrationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationStage::Idle => "idle",
            OrchestrationStage::Validating => "validating",
            OrchestrationStage::RebuildingMetadata => "rebuilding_metadata",
            OrchestrationStage::RevalidatingRelationships => "revalidating_relationships",
            OrchestrationStage::RewiringDependents => "rewiring_dependents",
            OrchestrationStage::GeneratingArtifacts => "generating_artifacts",
            OrchestrationStage::Ready => "ready",
            OrchestrationStage::Failed => "failed",
        }
    }
}

impl fmt::Display for OrchestrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful run. `diagnostics` carries best-effort failures that did not stop it.
#[derive(Clone, Debug, Serialize)]
pub struct OrchestrationReport {
    pub run_id: Uuid,
    pub version: u64,
    pub initialization: InitializationReport,
    #[serde(serialize_with = "as_messages")]
    pub metadata_exceptions: Vec<MetadataException>,
    pub diagnostics: Vec<String>,
}

fn as_messages<S: serde::Serializer>(exceptions: &[MetadataException], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(exceptions.iter().map(|e| e.to_string()))
}

/// State that was serving before a run; put back when the run fails.
struct Checkpoint {
    provider: Arc<ConfigProvider>,
    provider_set: Arc<ProviderSet>,
    target_snapshot: Option<Arc<RuntimeConfig>>,
    was_ready: bool,
}

pub struct ConfigChangeOrchestrator {
    registry: Arc<MetadataProviderRegistry>,
    dependents: DependentServices,
    stage: RwLock<OrchestrationStage>,
    ready: AtomicBool,
    run_lock: Mutex<()>,
    stage_timeout: Duration,
    last_report: RwLock<Option<OrchestrationReport>>,
}

impl ConfigChangeOrchestrator {
    pub fn new(registry: Arc<MetadataProviderRegistry>, dependents: DependentServices) -> Self {
        ConfigChangeOrchestrator {
            registry,
            dependents,
            stage: RwLock::new(OrchestrationStage::Idle),
            ready: AtomicBool::new(false),
            run_lock: Mutex::new(()),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            last_report: RwLock::new(None),
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<MetadataProviderRegistry> {
        &self.registry
    }

    pub fn stage(&self) -> OrchestrationStage {
        *self.stage.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a run has reached `Ready`. A failed hot-reload keeps the previous state serving.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    pub fn last_report(&self) -> Option<OrchestrationReport> {
        self.last_report.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn enter(&self, run_id: Uuid, stage: OrchestrationStage) {
        *self.stage.write().unwrap_or_else(PoisonError::into_inner) = stage;
        tracing::info!(%run_id, %stage, "orchestration stage");
    }

    /// Boolean entry point for boot and hot-reload triggers. Failures are logged.
    pub async fn on_configuration_accepted(&self, provider: Arc<ConfigProvider>, snapshot: Arc<RuntimeConfig>) -> bool {
        match self.apply(provider, snapshot).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(stage = ?e.stage(), cause = %e.innermost_cause(), "configuration was not applied");
                false
            }
        }
    }

    /// Propagate `snapshot` (held, or to be held, by `provider`) to the registry and every
    /// dependent service. Rejected with `InProgress` while another run holds the lock.
    pub async fn apply(
        &self,
        provider: Arc<ConfigProvider>,
        snapshot: Arc<RuntimeConfig>,
    ) -> Result<OrchestrationReport, OrchestrationError> {
        let _guard = self.run_lock.try_lock().map_err(|_| OrchestrationError::InProgress)?;
        self.apply_locked(Uuid::new_v4(), provider, snapshot).await
    }

    /// Derive the next snapshot from the one `provider` holds and apply it. The current snapshot
    /// is read under the run lock, so a change committed by another run is never overwritten.
    /// An `edit` error fails the run at `Validating`.
    pub async fn apply_edit<F>(&self, provider: Arc<ConfigProvider>, edit: F) -> Result<OrchestrationReport, OrchestrationError>
    where
        F: FnOnce(&RuntimeConfig) -> Result<RuntimeConfig, AppError> + Send,
    {
        let _guard = self.run_lock.try_lock().map_err(|_| OrchestrationError::InProgress)?;
        let run_id = Uuid::new_v4();
        let next = provider
            .get_config()
            .and_then(|current| edit(current.as_ref()))
            .map_err(|e| fail(OrchestrationStage::Validating, e));
        match next {
            Ok(next) => self.apply_locked(run_id, provider, Arc::new(next)).await,
            Err(e) => {
                tracing::warn!(%run_id, error = %e, "configuration edit rejected");
                Err(e)
            }
        }
    }

    async fn apply_locked(
        &self,
        run_id: Uuid,
        provider: Arc<ConfigProvider>,
        snapshot: Arc<RuntimeConfig>,
    ) -> Result<OrchestrationReport, OrchestrationError> {
        let checkpoint = Checkpoint {
            provider: self.registry.config_provider(),
            provider_set: self.registry.current(),
            target_snapshot: provider.try_get_config(),
            was_ready: self.is_ready(),
        };

        match self.run(run_id, &provider, &snapshot).await {
            Ok(report) => {
                self.ready.store(true, Ordering::SeqCst);
                self.enter(run_id, OrchestrationStage::Ready);
                *self.last_report.write().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                tracing::error!(%run_id, stage = ?e.stage(), error = %e, "orchestration failed");
                // earlier stages publish nothing
                if e.stage() == Some(OrchestrationStage::RewiringDependents) {
                    self.roll_back(run_id, &provider, checkpoint).await;
                }
                self.enter(run_id, OrchestrationStage::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        run_id: Uuid,
        provider: &Arc<ConfigProvider>,
        snapshot: &Arc<RuntimeConfig>,
    ) -> Result<OrchestrationReport, OrchestrationError> {
        self.enter(run_id, OrchestrationStage::Validating);
        let stage = OrchestrationStage::Validating;
        validate_config_properties(snapshot).map_err(|e| fail(stage, e.into()))?;
        if snapshot.is_development_mode() {
            validate_permissions(snapshot).map_err(|e| fail(stage, e.into()))?;
        }

        self.enter(run_id, OrchestrationStage::RebuildingMetadata);
        let (providers, initialization) = self
            .bounded(OrchestrationStage::RebuildingMetadata, self.registry.prepare(snapshot.clone()))
            .await?
            .map_err(|e| fail(OrchestrationStage::RebuildingMetadata, e.into()))?;

        if snapshot.is_development_mode() {
            self.enter(run_id, OrchestrationStage::RevalidatingRelationships);
            let stage = OrchestrationStage::RevalidatingRelationships;
            validate_relationship_config(snapshot).map_err(|e| fail(stage, e.into()))?;
            validate_relationships(snapshot, &providers).map_err(|e| fail(stage, e))?;
        }

        self.enter(run_id, OrchestrationStage::RewiringDependents);
        // snapshot and provider set are committed back to back, with no await in between
        let version = if provider.holds(snapshot) {
            provider.version()
        } else {
            provider.hot_reload(snapshot.clone())
        };
        self.registry.publish(provider.clone(), providers.clone());
        self.rewire(provider, snapshot).await?;

        let mut diagnostics = Vec::new();
        if let Some(documentor) = &self.dependents.documentor {
            if snapshot.cosmos_data_source_used() {
                tracing::debug!(%run_id, "artifact generation skipped for document-store configuration");
            } else {
                self.enter(run_id, OrchestrationStage::GeneratingArtifacts);
                let outcome = tokio::time::timeout(
                    self.stage_timeout,
                    documentor.generate_best_effort(provider.clone(), snapshot.clone()),
                )
                .await;
                let message = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("documentation generation timed out after {:?}", self.stage_timeout)),
                };
                if let Some(message) = message {
                    tracing::warn!(%run_id, error = %message, "best-effort artifact generation failed");
                    diagnostics.push(message);
                }
            }
        }

        let metadata_exceptions = providers.exceptions();
        tracing::info!(
            %run_id,
            version,
            failed_providers = initialization.failed.len(),
            exceptions = metadata_exceptions.len(),
            "configuration applied"
        );
        Ok(OrchestrationReport {
            run_id,
            version,
            initialization,
            metadata_exceptions,
            diagnostics,
        })
    }

    /// Point every dependent at `provider`. The authorization resolver binds first, then its
    /// permission map is rebuilt from `snapshot`.
    async fn rewire(&self, provider: &Arc<ConfigProvider>, snapshot: &Arc<RuntimeConfig>) -> Result<(), OrchestrationError> {
        let stage = OrchestrationStage::RewiringDependents;
        let authorization = &self.dependents.authorization;
        self.bounded(stage, authorization.rebind_configuration(provider.clone()))
            .await?
            .map_err(|e| dependent_failure(authorization.name(), e))?;
        self.bounded(stage, authorization.rebuild_permission_map(snapshot))
            .await?
            .map_err(|e| dependent_failure(authorization.name(), e))?;
        for consumer in [&self.dependents.request_validator, &self.dependents.schema_creator] {
            self.rebind(consumer, provider).await?;
        }
        Ok(())
    }

    async fn rebind(&self, consumer: &Arc<dyn ConfigurationConsumer>, provider: &Arc<ConfigProvider>) -> Result<(), OrchestrationError> {
        self.bounded(OrchestrationStage::RewiringDependents, consumer.rebind_configuration(provider.clone()))
            .await?
            .map_err(|e| dependent_failure(consumer.name(), e))
    }

    async fn bounded<T>(&self, stage: OrchestrationStage, fut: impl Future<Output = T>) -> Result<T, OrchestrationError> {
        tokio::time::timeout(self.stage_timeout, fut)
            .await
            .map_err(|_| OrchestrationError::Timeout {
                stage,
                after: self.stage_timeout,
            })
    }

    /// Undo a commit made at the start of `RewiringDependents`.
    async fn roll_back(&self, run_id: Uuid, provider: &Arc<ConfigProvider>, checkpoint: Checkpoint) {
        let Checkpoint {
            provider: previous_provider,
            provider_set,
            target_snapshot,
            was_ready,
        } = checkpoint;

        let snapshot_changed = match (&target_snapshot, provider.try_get_config()) {
            (Some(prev), Some(now)) => !Arc::ptr_eq(prev, &now),
            (None, Some(_)) => true,
            (_, None) => false,
        };
        if snapshot_changed {
            provider.replace(target_snapshot);
        }
        self.registry.publish(previous_provider.clone(), provider_set);
        tracing::warn!(%run_id, snapshot_restored = snapshot_changed, "previous configuration restored");

        if !was_ready {
            return;
        }
        if let Err(e) = self.rewire_previous(&previous_provider).await {
            tracing::error!(%run_id, error = %e, "could not re-point dependents at the previous configuration");
        }
    }

    async fn rewire_previous(&self, provider: &Arc<ConfigProvider>) -> Result<(), OrchestrationError> {
        match provider.try_get_config() {
            Some(snapshot) => self.rewire(provider, &snapshot).await,
            None => Ok(()),
        }
    }
}

fn dependent_failure(service: &'static str, cause: AppError) -> OrchestrationError {
    let cause = match cause {
        e @ AppError::Dependent { .. } => e,
        other => AppError::Dependent {
            service,
            message: other.to_string(),
        },
    };
    fail(OrchestrationStage::RewiringDependents, cause)
}

fn fail(stage: OrchestrationStage, cause: AppError) -> OrchestrationError {
    OrchestrationError::Stage {
        stage,
        cause: Box::new(cause),
    }
}
