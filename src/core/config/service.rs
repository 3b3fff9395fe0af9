use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::paths::AppPaths;
use super::settings::Settings;
use super::validation::validate_config;
use crate::core::errors::CoreError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 9] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "auth_",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 4] = ["max_tokens", "answer_max_tokens", "token_count", "tokens"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("COVENANT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Public config deep-merged with secrets, before environment overrides.
    pub fn load_config(&self) -> Result<Value, CoreError> {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        let merged = deep_merge(&public_config, &secrets_config);
        validate_config(&merged)?;
        Ok(merged)
    }

    /// Files plus `MODEL_*` / `DOCS_PATH` environment overrides, as raw JSON.
    pub fn effective_config(&self) -> Result<Value, CoreError> {
        let files = self.load_config()?;
        let merged = deep_merge(&files, &env_overlay(|key| env::var(key).ok()));
        validate_config(&merged)?;
        Ok(merged)
    }

    pub fn load_settings(&self) -> Result<Settings, CoreError> {
        settings_from_value(self.effective_config()?)
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

pub fn settings_from_value(value: Value) -> Result<Settings, CoreError> {
    let mut settings: Settings =
        serde_json::from_value(value).map_err(|e| CoreError::Config(e.to_string()))?;
    settings.provider.endpoint = settings.provider.endpoint.trim_end_matches('/').to_string();
    if settings
        .provider
        .api_key
        .as_deref()
        .is_some_and(|key| key.trim().is_empty())
    {
        settings.provider.api_key = None;
    }
    Ok(settings)
}

/// Builds the override layer from environment lookups; unset or blank
/// variables contribute nothing.
pub fn env_overlay<F>(lookup: F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let mut provider = Map::new();
    if let Some(endpoint) = get("MODEL_ENDPOINT") {
        provider.insert("endpoint".to_string(), json!(endpoint));
    }
    if let Some(model) = get("MODEL_NAME") {
        provider.insert("model".to_string(), json!(model));
    }
    if let Some(api_key) = get("MODEL_API_KEY") {
        provider.insert("api_key".to_string(), json!(api_key));
    }
    if let Some(timeout) = get("MODEL_TIMEOUT").and_then(|v| v.trim().parse::<u64>().ok()) {
        provider.insert("timeout_secs".to_string(), json!(timeout));
    }

    let mut overlay = Map::new();
    if !provider.is_empty() {
        overlay.insert("provider".to_string(), Value::Object(provider));
    }
    if let Some(docs) = get("DOCS_PATH") {
        overlay.insert("ingest".to_string(), json!({ "docs_path": docs }));
    }
    Value::Object(overlay)
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => Value::Object(Map::new()),
            Err(err) => {
                tracing::warn!("Ignoring unparsable config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}
