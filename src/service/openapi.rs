//! OpenAPI document for the REST surface of the current configuration.

use crate::config::{ConfigProvider, EntityConfig, RuntimeConfig};
use crate::error::AppError;
use crate::service::DocumentationGenerator;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use utoipa::openapi::path::{HttpMethod, OperationBuilder, ParameterBuilder, ParameterIn, PathItemBuilder};
use utoipa::openapi::{InfoBuilder, OpenApi, OpenApiBuilder, PathsBuilder, Required, ResponseBuilder};

const SERVICE: &str = "openapi documentor";

/// A generated document and the configuration it describes.
#[derive(Debug)]
pub struct GeneratedDocument {
    pub snapshot: Arc<RuntimeConfig>,
    /// Provider version at generation time.
    pub version: u64,
    pub json: String,
}

/// Generates and keeps the latest OpenAPI document. Generation is best-effort: on failure the
/// previous document is kept, tagged with the snapshot it was built from.
#[derive(Default)]
pub struct OpenApiDocumentor {
    document: RwLock<Option<Arc<GeneratedDocument>>>,
}

impl OpenApiDocumentor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest generated document, whichever configuration it was built from.
    pub fn document(&self) -> Option<Arc<GeneratedDocument>> {
        self.document.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Latest document, only if it describes the snapshot `provider` holds now.
    pub fn current_document(&self, provider: &ConfigProvider) -> Option<Arc<GeneratedDocument>> {
        self.document().filter(|doc| provider.holds(&doc.snapshot))
    }

    pub fn build(snapshot: &RuntimeConfig) -> Result<OpenApi, AppError> {
        if !snapshot.runtime.rest.enabled {
            return Err(AppError::Dependent {
                service: SERVICE,
                message: "REST endpoint is disabled".into(),
            });
        }
        let base = snapshot.runtime.rest.path.trim_end_matches('/');
        let mut paths = PathsBuilder::new();
        let mut count = 0usize;
        for (name, entity) in snapshot.entities.iter().filter(|(_, e)| e.rest.enabled) {
            let route = format!("{}{}", base, snapshot.rest_path_for(name, entity));
            if entity.is_stored_procedure() {
                paths = paths.path(
                    route,
                    PathItemBuilder::new()
                        .operation(HttpMethod::Post, operation(name, "execute", None))
                        .build(),
                );
            } else {
                paths = paths.path(
                    route.clone(),
                    PathItemBuilder::new()
                        .operation(HttpMethod::Get, operation(name, "list", None))
                        .operation(HttpMethod::Post, operation(name, "create", None))
                        .build(),
                );
                let key = key_segment(entity);
                paths = paths.path(
                    format!("{}/{}/{{{}}}", route, key, key),
                    PathItemBuilder::new()
                        .operation(HttpMethod::Get, operation(name, "get", Some(&key)))
                        .operation(HttpMethod::Put, operation(name, "replace", Some(&key)))
                        .operation(HttpMethod::Patch, operation(name, "update", Some(&key)))
                        .operation(HttpMethod::Delete, operation(name, "delete", Some(&key)))
                        .build(),
                );
            }
            count += 1;
        }
        if count == 0 {
            return Err(AppError::Dependent {
                service: SERVICE,
                message: "no REST-enabled entities to document".into(),
            });
        }
        Ok(OpenApiBuilder::new()
            .info(
                InfoBuilder::new()
                    .title("Data API")
                    .version(env!("CARGO_PKG_VERSION"))
                    .build(),
            )
            .paths(paths.build())
            .build())
    }
}

fn key_segment(entity: &EntityConfig) -> String {
    entity.source.key_fields.first().cloned().unwrap_or_else(|| "id".to_string())
}

fn operation(entity: &str, verb: &str, key: Option<&str>) -> utoipa::openapi::path::Operation {
    let mut op = OperationBuilder::new()
        .operation_id(Some(format!("{}_{}", verb, entity)))
        .tag(entity)
        .response("200", ResponseBuilder::new().description("OK").build())
        .response("400", ResponseBuilder::new().description("Bad request").build());
    if let Some(key) = key {
        op = op
            .parameter(
                ParameterBuilder::new()
                    .name(key)
                    .parameter_in(ParameterIn::Path)
                    .required(Required::True)
                    .build(),
            )
            .response("404", ResponseBuilder::new().description("Not found").build());
    }
    op.build()
}

#[async_trait]
impl DocumentationGenerator for OpenApiDocumentor {
    async fn generate_best_effort(
        &self,
        provider: Arc<ConfigProvider>,
        snapshot: Arc<RuntimeConfig>,
    ) -> Result<(), AppError> {
        let doc = Self::build(&snapshot)?;
        let json = doc.to_pretty_json().map_err(|e| AppError::Dependent {
            service: SERVICE,
            message: e.to_string(),
        })?;
        let version = provider.version();
        *self.document.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(GeneratedDocument {
            snapshot,
            version,
            json,
        }));
        tracing::debug!(version, "openapi document generated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_and_substitute, EnvVarReplacement};

    fn snapshot(entities: serde_json::Value) -> Arc<RuntimeConfig> {
        let doc = serde_json::json!({
            "data-source": { "database-type": "postgresql", "connection-string": "x" },
            "entities": entities
        });
        Arc::new(parse_and_substitute(&doc.to_string(), &EnvVarReplacement::disabled()).unwrap())
    }

    #[tokio::test]
    async fn documents_rest_enabled_entities() {
        let snap = snapshot(serde_json::json!({
            "Book": { "source": { "object": "books" }, "rest": { "path": "/books" } },
            "Secret": { "source": { "object": "secrets" }, "rest": { "enabled": false } },
            "GetStats": { "source": { "object": "get_stats", "type": "stored-procedure" } }
        }));
        let documentor = OpenApiDocumentor::new();
        documentor
            .generate_best_effort(Arc::new(ConfigProvider::new()), snap)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&documentor.document().unwrap().json).unwrap();
        let paths = json["paths"].as_object().unwrap();
        assert!(paths.contains_key("/api/books"));
        assert!(paths.contains_key("/api/books/id/{id}"));
        assert!(paths.contains_key("/api/GetStats"));
        assert!(!paths.keys().any(|p| p.contains("Secret")));
    }

    #[tokio::test]
    async fn previous_document_is_not_current_for_a_newer_snapshot() {
        let documentor = OpenApiDocumentor::new();
        let ok = snapshot(serde_json::json!({ "Book": { "source": { "object": "books" } } }));
        let provider = Arc::new(ConfigProvider::with_snapshot(ok.clone()));
        documentor.generate_best_effort(provider.clone(), ok).await.unwrap();
        assert_eq!(documentor.current_document(&provider).unwrap().version, 1);

        let empty = snapshot(serde_json::json!({}));
        provider.hot_reload(empty.clone());
        let err = documentor.generate_best_effort(provider.clone(), empty).await.unwrap_err();
        assert!(matches!(err, AppError::Dependent { .. }));
        assert_eq!(documentor.document().unwrap().version, 1);
        assert!(documentor.current_document(&provider).is_none());
    }
}
