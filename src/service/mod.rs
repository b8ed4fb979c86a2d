//! Services that derive their state from the current configuration and are re-pointed at it
//! after every accepted change.

pub mod authorization;
pub mod openapi;
pub mod schema;
pub mod validation;

pub use authorization::{EntityAction, PermissionResolver};
pub use openapi::{GeneratedDocument, OpenApiDocumentor};
pub use schema::{EntitySchemaCatalog, GraphQLTypeInfo};
pub use validation::RequestValidator;

use crate::config::{ConfigProvider, RuntimeConfig};
use crate::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;

/// A service bound to a configuration provider. Rebinding re-derives all internal state from
/// the provider's current snapshot.
#[async_trait]
pub trait ConfigurationConsumer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn rebind_configuration(&self, provider: Arc<ConfigProvider>) -> Result<(), AppError>;
}

#[async_trait]
pub trait AuthorizationResolver: ConfigurationConsumer {
    async fn rebuild_permission_map(&self, snapshot: &RuntimeConfig) -> Result<(), AppError>;
}

/// Generator of secondary artifacts (API documentation). Failures are never fatal to callers
/// that treat it as best-effort.
#[async_trait]
pub trait DocumentationGenerator: Send + Sync {
    async fn generate_best_effort(
        &self,
        provider: Arc<ConfigProvider>,
        snapshot: Arc<RuntimeConfig>,
    ) -> Result<(), AppError>;
}

/// The services the orchestrator keeps in step with the configuration.
#[derive(Clone)]
pub struct DependentServices {
    pub authorization: Arc<dyn AuthorizationResolver>,
    pub request_validator: Arc<dyn ConfigurationConsumer>,
    pub schema_creator: Arc<dyn ConfigurationConsumer>,
    pub documentor: Option<Arc<dyn DocumentationGenerator>>,
}
