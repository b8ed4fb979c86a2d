//! Typed errors and HTTP mapping.

use crate::metadata::MetadataException;
use crate::orchestrator::OrchestrationStage;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("parse: {0}")]
    Parse(String),
    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate rest path: {0}")]
    DuplicatePath(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("data source '{data_source}': database type '{database_type}' is not supported")]
    UnsupportedBackend {
        data_source: String,
        database_type: String,
    },
    #[error("failed to rebuild metadata providers: {0}")]
    RebuildFailed(#[source] Box<ConfigError>),
    #[error("config load: {0}")]
    Load(String),
}

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("a configuration change is already being applied")]
    InProgress,
    #[error("{stage} failed: {cause}")]
    Stage {
        stage: OrchestrationStage,
        #[source]
        cause: Box<AppError>,
    },
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        stage: OrchestrationStage,
        after: Duration,
    },
}

impl OrchestrationError {
    pub fn stage(&self) -> Option<OrchestrationStage> {
        match self {
            OrchestrationError::InProgress => None,
            OrchestrationError::Stage { stage, .. } | OrchestrationError::Timeout { stage, .. } => Some(*stage),
        }
    }

    /// Message of the deepest error in the source chain.
    pub fn innermost_cause(&self) -> String {
        let mut current: &dyn std::error::Error = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current.to_string()
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    #[error(transparent)]
    Metadata(#[from] MetadataException),
    #[error("runtime is already configured")]
    AlreadyConfigured,
    #[error("runtime is not configured")]
    NotConfigured,
    #[error("dataSourceName:{0} could not be found within the config")]
    DataSourceNotFound(String),
    #[error("{service}: {message}")]
    Dependent { service: &'static str, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Config(_) => (StatusCode::BAD_REQUEST, "invalid_configuration"),
            AppError::Orchestration(OrchestrationError::InProgress) => (StatusCode::CONFLICT, "reload_in_progress"),
            AppError::Orchestration(OrchestrationError::Timeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, "orchestration_timed_out")
            }
            AppError::Orchestration(OrchestrationError::Stage {
                stage: OrchestrationStage::RewiringDependents,
                ..
            }) => (StatusCode::INTERNAL_SERVER_ERROR, "orchestration_failed"),
            AppError::Orchestration(_) => (StatusCode::BAD_REQUEST, "orchestration_failed"),
            AppError::Metadata(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metadata_error"),
            AppError::AlreadyConfigured => (StatusCode::CONFLICT, "already_configured"),
            AppError::NotConfigured => (StatusCode::SERVICE_UNAVAILABLE, "not_configured"),
            AppError::DataSourceNotFound(_) => (StatusCode::BAD_REQUEST, "data_source_not_found"),
            AppError::Dependent { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "dependent_service_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        let details = match &self {
            AppError::Orchestration(e @ (OrchestrationError::Stage { .. } | OrchestrationError::Timeout { .. })) => {
                Some(serde_json::json!({
                    "stage": e.stage().map(|s| s.to_string()),
                    "cause": e.innermost_cause(),
                }))
            }
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_cause_walks_the_source_chain() {
        let err = OrchestrationError::Stage {
            stage: OrchestrationStage::RebuildingMetadata,
            cause: Box::new(AppError::Config(ConfigError::RebuildFailed(Box::new(
                ConfigError::UnsupportedBackend {
                    data_source: "graph".into(),
                    database_type: "graphdb".into(),
                },
            )))),
        };
        assert_eq!(
            err.innermost_cause(),
            "data source 'graph': database type 'graphdb' is not supported"
        );
        assert_eq!(err.stage(), Some(OrchestrationStage::RebuildingMetadata));
    }

    #[test]
    fn conflict_and_bad_request_are_distinct() {
        let conflict = AppError::AlreadyConfigured.into_response();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let malformed = AppError::Config(ConfigError::Parse("expected value".into())).into_response();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        let missing = AppError::DataSourceNotFound("db3".into()).into_response();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn server_side_orchestration_failures_are_5xx() {
        let rejected = AppError::Orchestration(OrchestrationError::Stage {
            stage: OrchestrationStage::Validating,
            cause: Box::new(AppError::Config(ConfigError::Validation("no data sources".into()))),
        });
        assert_eq!(rejected.into_response().status(), StatusCode::BAD_REQUEST);

        let rewire = AppError::Orchestration(OrchestrationError::Stage {
            stage: OrchestrationStage::RewiringDependents,
            cause: Box::new(AppError::Dependent {
                service: "request validator",
                message: "invalid pattern".into(),
            }),
        });
        assert_eq!(rewire.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let slow = AppError::Orchestration(OrchestrationError::Timeout {
            stage: OrchestrationStage::RebuildingMetadata,
            after: Duration::from_secs(30),
        });
        assert_eq!(slow.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
