//! Configuration administration handlers: first configuration, hot-reload, entity add, status.

use crate::config::{parse_and_substitute, EntityConfig, EnvVarReplacement, InitializeRequest, RuntimeConfig};
use crate::error::AppError;
use crate::orchestrator::OrchestrationReport;
use crate::response::{success_one, success_one_ok, success_with_meta};
use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Original submission shape. Environment references are not substituted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigurationPost {
    pub configuration: Value,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Submission with overrides merged into the base document; connection details travel in the
/// overrides and `@env('..')` references are resolved.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigurationPostV2 {
    pub configuration: Value,
    #[serde(default)]
    pub configuration_overrides: Option<Value>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReloadPost {
    pub configuration: Value,
}

#[derive(Debug, Deserialize)]
pub struct EntityPost {
    pub name: String,
    pub entity: EntityConfig,
}

#[derive(Serialize)]
pub struct StatusBody {
    pub stage: String,
    pub ready: bool,
    pub running: bool,
    pub configured: bool,
    pub late_configured: bool,
    pub version: u64,
    pub data_sources: Vec<String>,
    pub metadata_exceptions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<OrchestrationReport>,
}

/// Documents may be posted as JSON text (the usual form) or inline as an object.
fn document_text(value: &Value) -> Result<String, AppError> {
    match value {
        Value::String(s) if s.trim().is_empty() => Err(AppError::BadRequest("configuration is empty".into())),
        Value::String(s) => Ok(s.clone()),
        Value::Object(_) => Ok(value.to_string()),
        _ => Err(AppError::BadRequest("configuration must be a JSON document".into())),
    }
}

async fn accept(state: &AppState, snapshot: Arc<RuntimeConfig>) -> Result<OrchestrationReport, AppError> {
    let report = state
        .orchestrator
        .apply(state.config_provider.clone(), snapshot)
        .await?;
    Ok(report)
}

pub async fn post_configuration(
    State(state): State<AppState>,
    Json(body): Json<ConfigurationPost>,
) -> Result<impl IntoResponse, AppError> {
    let raw = document_text(&body.configuration)?;
    let snapshot = state.config_provider.initialize(InitializeRequest {
        configuration: &raw,
        configuration_overrides: None,
        schema: body.schema.as_deref(),
        connection_string: body.connection_string.as_deref(),
        access_token: body.access_token.as_deref(),
        replacement: EnvVarReplacement::disabled(),
    })?;
    state.config_provider.mark_late_configured();
    let report = accept(&state, snapshot).await?;
    Ok(success_one_ok(report))
}

pub async fn post_configuration_v2(
    State(state): State<AppState>,
    Json(body): Json<ConfigurationPostV2>,
) -> Result<impl IntoResponse, AppError> {
    let raw = document_text(&body.configuration)?;
    let overrides = body.configuration_overrides.as_ref().map(document_text).transpose()?;
    let snapshot = state.config_provider.initialize(InitializeRequest {
        configuration: &raw,
        configuration_overrides: overrides.as_deref(),
        schema: body.schema.as_deref(),
        connection_string: None,
        access_token: body.access_token.as_deref(),
        replacement: EnvVarReplacement::default(),
    })?;
    state.config_provider.mark_late_configured();
    let report = accept(&state, snapshot).await?;
    Ok(success_one_ok(report))
}

/// Replace the running configuration. Requires one to be held already; its GraphQL schema is
/// carried over.
pub async fn post_reload(
    State(state): State<AppState>,
    Json(body): Json<ReloadPost>,
) -> Result<impl IntoResponse, AppError> {
    state.config_provider.get_config()?;
    let raw = document_text(&body.configuration)?;
    let parsed = parse_and_substitute(&raw, &EnvVarReplacement::default())?
        .with_connection_override(state.settings.connection_string.as_deref(), None);
    let report = state
        .orchestrator
        .apply_edit(state.config_provider.clone(), move |current| {
            Ok(parsed.with_graphql_schema(current.graphql_schema.as_deref()))
        })
        .await?;
    Ok(success_one_ok(report))
}

/// Add one entity to the running configuration.
pub async fn post_entity(
    State(state): State<AppState>,
    Json(body): Json<EntityPost>,
) -> Result<impl IntoResponse, AppError> {
    state.config_provider.get_config()?;
    state.config_provider.mark_late_configured();
    let EntityPost { name, entity } = body;
    let report = state
        .orchestrator
        .apply_edit(state.config_provider.clone(), move |current| {
            Ok(current.with_entity(&name, entity)?)
        })
        .await?;
    Ok(success_one(report))
}

pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let provider = &state.config_provider;
    let body = StatusBody {
        stage: orchestrator.stage().to_string(),
        ready: orchestrator.is_ready(),
        running: orchestrator.is_running(),
        configured: provider.is_configured(),
        late_configured: provider.is_late_configured(),
        version: provider.version(),
        data_sources: orchestrator.registry().current().names(),
        metadata_exceptions: orchestrator
            .registry()
            .collect_all_exceptions()
            .iter()
            .map(ToString::to_string)
            .collect(),
        last_report: orchestrator.last_report(),
    };
    success_one_ok(body)
}

pub async fn get_openapi(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let doc = state
        .documentor
        .current_document(&state.config_provider)
        .ok_or_else(|| AppError::NotFound("openapi document for the current configuration".into()))?;
    let value: Value = serde_json::from_str(&doc.json).map_err(|e| AppError::Dependent {
        service: "openapi documentor",
        message: e.to_string(),
    })?;
    Ok(success_with_meta(value, serde_json::json!({ "version": doc.version })))
}
