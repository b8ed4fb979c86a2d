//! Data API SDK: runtime configuration lifecycle and multi-backend metadata orchestration.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metadata;
pub mod orchestrator;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod state;

pub use config::{
    load_from_file, merge_overrides, parse_and_substitute, ConfigProvider, EnvVarReplacement, InitializeRequest,
    ReplacementFailureMode, RuntimeConfig,
};
pub use error::{AppError, ConfigError, OrchestrationError};
pub use metadata::{
    MetadataException, MetadataProvider, MetadataProviderFactory, MetadataProviderRegistry, PgIntrospector,
    SchemaIntrospector, SqlDialect,
};
pub use orchestrator::{ConfigChangeOrchestrator, OrchestrationReport, OrchestrationStage};
pub use response::{success_one, success_one_ok};
pub use routes::{app, common_routes_with_ready, configuration_routes};
pub use service::{
    AuthorizationResolver, ConfigurationConsumer, DependentServices, DocumentationGenerator, EntitySchemaCatalog,
    OpenApiDocumentor, PermissionResolver, RequestValidator,
};
pub use settings::Settings;
pub use state::AppState;
