//! Request validation from entity `validation` rules.

use crate::config::{ConfigProvider, ValidationRule};
use crate::error::AppError;
use crate::service::ConfigurationConsumer;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

struct FieldRule {
    rule: ValidationRule,
    pattern: Option<Regex>,
}

type EntityRules = HashMap<String, HashMap<String, FieldRule>>;

/// Validates request bodies against the rules of the bound configuration. Rules are compiled
/// once per rebind.
#[derive(Default)]
pub struct RequestValidator {
    provider: RwLock<Option<Arc<ConfigProvider>>>,
    rules: RwLock<Arc<EntityRules>>,
}

impl RequestValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.provider.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn rules(&self) -> Arc<EntityRules> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Validate body against per-field rules. All required fields must be present.
    pub fn validate(&self, entity: &str, body: &HashMap<String, Value>) -> Result<(), AppError> {
        let rules = self.rules();
        let fields = rules
            .get(entity)
            .ok_or_else(|| AppError::NotFound(format!("entity '{}'", entity)))?;
        for (col, field) in fields {
            let val = body.get(col);
            if field.rule.required == Some(true) && (val.is_none() || val == Some(&Value::Null)) {
                return Err(AppError::Validation(format!("{} is required", col)));
            }
            if let Some(v) = val {
                validate_field(col, v, field)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for PATCH). Required is not enforced for missing fields.
    pub fn validate_partial(&self, entity: &str, body: &HashMap<String, Value>) -> Result<(), AppError> {
        let rules = self.rules();
        let fields = rules
            .get(entity)
            .ok_or_else(|| AppError::NotFound(format!("entity '{}'", entity)))?;
        for (col, v) in body {
            if let Some(field) = fields.get(col) {
                validate_field(col, v, field)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigurationConsumer for RequestValidator {
    fn name(&self) -> &'static str {
        "request validator"
    }

    async fn rebind_configuration(&self, provider: Arc<ConfigProvider>) -> Result<(), AppError> {
        let snapshot = provider.get_config()?;
        let mut compiled: EntityRules = HashMap::with_capacity(snapshot.entities.len());
        for (name, entity) in &snapshot.entities {
            let mut fields = HashMap::with_capacity(entity.validation.len());
            for (col, rule) in &entity.validation {
                let pattern = match &rule.pattern {
                    Some(p) => Some(Regex::new(p).map_err(|e| AppError::Dependent {
                        service: "request validator",
                        message: format!("entity '{}' field '{}': invalid pattern: {}", name, col, e),
                    })?),
                    None => None,
                };
                fields.insert(
                    col.clone(),
                    FieldRule {
                        rule: rule.clone(),
                        pattern,
                    },
                );
            }
            compiled.insert(name.clone(), fields);
        }
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(compiled);
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
        Ok(())
    }
}

fn validate_field(col: &str, v: &Value, field: &FieldRule) -> Result<(), AppError> {
    let rule = &field.rule;
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = &rule.format {
        validate_format(col, v, format)?;
    }
    if let Some(max) = rule.max_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() > max as usize {
                return Err(AppError::Validation(format!("{} must be at most {} characters", col, max)));
            }
        }
    }
    if let Some(min) = rule.min_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() < min as usize {
                return Err(AppError::Validation(format!("{} must be at least {} characters", col, min)));
            }
        }
    }
    if let (Some(re), Some(s)) = (&field.pattern, v.as_str()) {
        if !re.is_match(s) {
            return Err(AppError::Validation(format!("{} does not match required pattern", col)));
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(AppError::Validation(format!(
                "{} must be one of: {:?}",
                col,
                allowed.iter().take(5).collect::<Vec<_>>()
            )));
        }
    }
    if let (Some(min), Some(n)) = (rule.minimum, v.as_f64()) {
        if n < min {
            return Err(AppError::Validation(format!("{} must be at least {}", col, min)));
        }
    }
    if let (Some(max), Some(n)) = (rule.maximum, v.as_f64()) {
        if n > max {
            return Err(AppError::Validation(format!("{} must be at most {}", col, max)));
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), AppError> {
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    match format.to_lowercase().as_str() {
        "email" => {
            if !s.contains('@') || s.len() < 3 {
                return Err(AppError::Validation(format!("{} must be a valid email", col)));
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err(AppError::Validation(format!("{} must be a valid UUID", col)));
            }
        }
        "date-time" => {
            if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                return Err(AppError::Validation(format!("{} must be an RFC 3339 timestamp", col)));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_and_substitute, EnvVarReplacement};

    fn provider(validation: serde_json::Value) -> Arc<ConfigProvider> {
        let doc = serde_json::json!({
            "data-source": { "database-type": "postgresql", "connection-string": "x" },
            "entities": { "users": { "source": { "object": "users" }, "validation": validation } }
        });
        let config = parse_and_substitute(&doc.to_string(), &EnvVarReplacement::disabled()).unwrap();
        Arc::new(ConfigProvider::with_snapshot(Arc::new(config)))
    }

    fn body(v: serde_json::Value) -> HashMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    #[tokio::test]
    async fn rules_come_from_the_bound_snapshot() {
        let validator = RequestValidator::new();
        validator
            .rebind_configuration(provider(serde_json::json!({
                "email": { "required": true, "format": "email" },
                "code": { "pattern": "^[A-Z]{3}$" },
                "age": { "minimum": 0, "maximum": 150 }
            })))
            .await
            .unwrap();
        assert!(validator.is_bound());
        validator
            .validate("users", &body(serde_json::json!({ "email": "a@b.c", "code": "ABC", "age": 30 })))
            .unwrap();
        assert!(validator.validate("users", &body(serde_json::json!({ "code": "ABC" }))).is_err());
        assert!(validator
            .validate("users", &body(serde_json::json!({ "email": "a@b.c", "code": "abc" })))
            .is_err());
        validator
            .validate_partial("users", &body(serde_json::json!({ "age": 99 })))
            .unwrap();
        assert!(validator.validate_partial("users", &body(serde_json::json!({ "age": 151 }))).is_err());
    }

    #[tokio::test]
    async fn unknown_entity_is_not_found() {
        let validator = RequestValidator::new();
        validator.rebind_configuration(provider(serde_json::json!({}))).await.unwrap();
        assert!(matches!(
            validator.validate("orders", &HashMap::new()),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_pattern_fails_rebind() {
        let validator = RequestValidator::new();
        let err = validator
            .rebind_configuration(provider(serde_json::json!({ "code": { "pattern": "([" } })))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Dependent { .. }));
        assert!(!validator.is_bound());
    }

    #[tokio::test]
    async fn rebind_requires_a_snapshot() {
        let validator = RequestValidator::new();
        let err = validator
            .rebind_configuration(Arc::new(ConfigProvider::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotConfigured));
    }
}
