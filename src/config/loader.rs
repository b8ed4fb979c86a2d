//! Parse configuration documents: environment substitution, override merge, file loading.

use crate::config::snapshot::RuntimeConfig;
use crate::config::types::RuntimeConfigDocument;
use crate::error::ConfigError;
use regex::{Captures, Regex};
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

/// What to do when `@env('NAME')` refers to a variable that is not set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplacementFailureMode {
    #[default]
    Throw,
    /// Leave the `@env(...)` token in place.
    Ignore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvVarReplacement {
    pub replace: bool,
    pub failure_mode: ReplacementFailureMode,
}

impl Default for EnvVarReplacement {
    fn default() -> Self {
        EnvVarReplacement {
            replace: true,
            failure_mode: ReplacementFailureMode::Throw,
        }
    }
}

impl EnvVarReplacement {
    /// No substitution at all (documents posted with secrets already inlined).
    pub fn disabled() -> Self {
        EnvVarReplacement {
            replace: false,
            failure_mode: ReplacementFailureMode::Ignore,
        }
    }
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@env\('([^']*)'\)").expect("static env pattern"))
}

/// Replace `@env('NAME')` tokens using `lookup`.
pub fn substitute_with<F>(raw: &str, mode: ReplacementFailureMode, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing: Option<String> = None;
    let out = env_pattern().replace_all(raw, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(v) => escape_json_fragment(&v),
            None => {
                if mode == ReplacementFailureMode::Throw && missing.is_none() {
                    missing = Some(name.to_string());
                }
                caps[0].to_string()
            }
        }
    });
    match missing {
        Some(name) => Err(ConfigError::MissingEnvVar(name)),
        None => Ok(out.into_owned()),
    }
}

/// Replace `@env('NAME')` tokens from the process environment.
pub fn substitute_env_vars(raw: &str, mode: ReplacementFailureMode) -> Result<String, ConfigError> {
    substitute_with(raw, mode, |name| std::env::var(name).ok())
}

/// Values land inside JSON string literals.
fn escape_json_fragment(v: &str) -> String {
    let quoted = Value::String(v.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

pub fn parse_and_substitute(raw: &str, replacement: &EnvVarReplacement) -> Result<RuntimeConfig, ConfigError> {
    let text = if replacement.replace {
        substitute_env_vars(raw, replacement.failure_mode)?
    } else {
        raw.to_string()
    };
    let doc: RuntimeConfigDocument = serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    RuntimeConfig::from_document(doc)
}

/// Deep-merge `overrides` into `base`. Objects merge key by key; anything else is replaced.
pub fn merge_overrides(base: &str, overrides: &str) -> Result<String, ConfigError> {
    let mut base: Value = serde_json::from_str(base).map_err(|e| ConfigError::Parse(format!("configuration: {}", e)))?;
    if overrides.trim().is_empty() {
        return Ok(base.to_string());
    }
    let overrides: Value =
        serde_json::from_str(overrides).map_err(|e| ConfigError::Parse(format!("configuration overrides: {}", e)))?;
    merge_values(&mut base, overrides);
    Ok(base.to_string())
}

fn merge_values(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(b), Value::Object(o)) => {
            for (key, value) in o {
                match b.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        b.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

pub async fn load_from_file(path: impl AsRef<Path>, replacement: &EnvVarReplacement) -> Result<RuntimeConfig, ConfigError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), "loaded configuration file");
    parse_and_substitute(&raw, replacement)
}
