use serde_json::{Map, Value};

use crate::core::errors::CoreError;

pub fn validate_config(config: &Value) -> Result<(), CoreError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(provider) = expect_optional_object(root, "provider")? {
        validate_optional_string_field(provider, "provider.endpoint", "endpoint")?;
        validate_optional_string_field(provider, "provider.model", "model")?;
        validate_optional_string_field(provider, "provider.api_key", "api_key")?;
        validate_u64_field(provider, "provider.timeout_secs", "timeout_secs", 1, 3_600)?;
        validate_u64_field(
            provider,
            "provider.health_timeout_secs",
            "health_timeout_secs",
            1,
            300,
        )?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 1_000)?;
        validate_u64_field(
            retrieval,
            "retrieval.excerpt_chars",
            "excerpt_chars",
            1,
            100_000,
        )?;
        validate_u64_field(
            retrieval,
            "retrieval.answer_max_tokens",
            "answer_max_tokens",
            1,
            1_000_000,
        )?;
    }

    if let Some(events) = expect_optional_object(root, "events")? {
        validate_u64_field(events, "events.queue_capacity", "queue_capacity", 1, 1_000_000)?;
        validate_u64_field(
            events,
            "events.enqueue_timeout_ms",
            "enqueue_timeout_ms",
            0,
            60_000,
        )?;
        validate_u64_field(events, "events.stop_timeout_ms", "stop_timeout_ms", 0, 600_000)?;
    }

    if let Some(ingest) = expect_optional_object(root, "ingest")? {
        validate_optional_string_field(ingest, "ingest.docs_path", "docs_path")?;
        validate_string_array_field(ingest, "ingest.extensions", "extensions")?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, CoreError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), CoreError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(CoreError::Config(format!(
            "'{}' must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), CoreError> {
    match section.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(config_type_error(path, "string")),
    }
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), CoreError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(CoreError::Config(format!(
                "'{}[{}]' cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> CoreError {
    CoreError::Config(format!("'{}': expected {}", path, expected))
}
