//! Shared application state for all routes. Configuration is reloadable at runtime through the
//! orchestrator; nothing here is replaced after construction.

use crate::config::ConfigProvider;
use crate::metadata::{MetadataProviderFactory, MetadataProviderRegistry};
use crate::orchestrator::ConfigChangeOrchestrator;
use crate::service::{DependentServices, EntitySchemaCatalog, OpenApiDocumentor, PermissionResolver, RequestValidator};
use crate::settings::Settings;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config_provider: Arc<ConfigProvider>,
    pub orchestrator: Arc<ConfigChangeOrchestrator>,
    pub permissions: Arc<PermissionResolver>,
    pub request_validator: Arc<RequestValidator>,
    pub schema: Arc<EntitySchemaCatalog>,
    pub documentor: Arc<OpenApiDocumentor>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Wire the registry, the dependent services and the orchestrator around `config_provider`.
    /// Nothing is built or applied yet, even when a snapshot is held; see
    /// [`AppState::apply_current`].
    pub fn new(settings: Settings, config_provider: Arc<ConfigProvider>, factory: MetadataProviderFactory) -> Self {
        let registry = Arc::new(
            MetadataProviderRegistry::new(config_provider.clone(), factory)
                .with_introspection_timeout(settings.introspection_timeout),
        );
        let permissions = Arc::new(PermissionResolver::new());
        let request_validator = Arc::new(RequestValidator::new());
        let schema = Arc::new(EntitySchemaCatalog::new(registry.clone()));
        let documentor = Arc::new(OpenApiDocumentor::new());
        let dependents = DependentServices {
            authorization: permissions.clone(),
            request_validator: request_validator.clone(),
            schema_creator: schema.clone(),
            documentor: Some(documentor.clone()),
        };
        let orchestrator = Arc::new(
            ConfigChangeOrchestrator::new(registry, dependents).with_stage_timeout(settings.stage_timeout),
        );
        AppState {
            config_provider,
            orchestrator,
            permissions,
            request_validator,
            schema,
            documentor,
            settings: Arc::new(settings),
        }
    }

    /// Run the orchestrator for the snapshot the provider already holds (boot from file).
    /// Returns false when nothing is held or the run failed.
    pub async fn apply_current(&self) -> bool {
        match self.config_provider.try_get_config() {
            Some(snapshot) => {
                self.orchestrator
                    .on_configuration_accepted(self.config_provider.clone(), snapshot)
                    .await
            }
            None => false,
        }
    }
}
