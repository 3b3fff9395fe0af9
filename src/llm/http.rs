use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde_json::{json, Value};

use super::provider::GenerationProvider;
use super::types::{ChatCompletionRequest, ChatMessage, CompletionRequest, GenerateOptions, HealthReport};
use crate::core::config::ProviderSettings;
use crate::core::errors::CoreError;

const PROVIDER_NAME: &str = "HttpProvider";
const DIAGNOSTIC_CHARS: usize = 200;
const HEALTH_PATHS: [&str; 3] = ["/health", "/version", "/"];
const COMPLETION_TEXT_FIELDS: [&str; 3] = ["content", "text", "response"];

/// Talks to a llama.cpp-style `/completion` server and falls back to an
/// OpenAI-compatible `/v1/chat/completions` endpoint.
#[derive(Clone)]
pub struct HttpProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    health_timeout: Duration,
    client: Client,
}

impl HttpProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(CoreError::internal)?;

        Ok(Self {
            endpoint: settings.endpoint.trim().trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings
                .api_key
                .as_ref()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            health_timeout: settings.health_timeout(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(header::AUTHORIZATION, format!("Bearer {}", key)),
            None => request,
        }
    }

    async fn try_completion(&self, prompt: &str, options: &GenerateOptions) -> Option<String> {
        let body = CompletionRequest {
            prompt,
            n_predict: options.max_tokens,
            temperature: options.temperature,
            stop: options.stop.as_deref(),
        };

        let response = match self.authorize(self.client.post(self.url("/completion"))).json(&body).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!("/completion returned {}, falling back to chat", response.status());
                return None;
            }
            Err(err) => {
                tracing::debug!("/completion unreachable, falling back to chat: {}", err);
                return None;
            }
        };

        let payload: Value = response.json().await.ok()?;
        let object = payload.as_object()?;
        COMPLETION_TEXT_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str))
            .map(str::to_string)
    }

    async fn chat_completion(&self, prompt: &str, options: &GenerateOptions) -> Result<String, reqwest::Error> {
        let body = ChatCompletionRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            messages: vec![ChatMessage::user(prompt)],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            stream: false,
        };

        let response = self
            .authorize(self.client.post(self.url("/v1/chat/completions")))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Ok(format!("[HTTP {}] {}", status.as_u16(), truncate(&text)));
        }

        let payload: Value = response.json().await?;
        Ok(chat_text(&payload))
    }

    async fn probe(&self, request: RequestBuilder) -> Result<Response, reqwest::Error> {
        self.authorize(request).timeout(self.health_timeout).send().await
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> String {
        if !self.is_configured() {
            return "[MODEL_ENDPOINT not configured]".to_string();
        }

        if let Some(text) = self.try_completion(prompt, options).await {
            return text;
        }

        match self.chat_completion(prompt, options).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("Generation request to {} failed: {}", self.endpoint, err);
                format!("[Provider error: {}]", err)
            }
        }
    }

    async fn health(&self) -> HealthReport {
        let mut report = HealthReport::new(PROVIDER_NAME, self.endpoint.clone());
        if !self.is_configured() {
            report.reason = Some("MODEL_ENDPOINT not set".to_string());
            return report;
        }

        for path in HEALTH_PATHS {
            if let Ok(response) = self.probe(self.client.get(self.url(path))).await {
                if response.status().is_success() {
                    let text = response.text().await.unwrap_or_default();
                    report.ok = true;
                    report.status = Some(truncate(&text));
                    return report;
                }
            }
        }

        let ping = self
            .client
            .post(self.url("/completion"))
            .json(&json!({"prompt": "ping", "n_predict": 1}));
        match self.probe(ping).await {
            Ok(response) if response.status().is_success() => {
                report.ok = true;
                report.status = Some("completion ping ok".to_string());
            }
            Ok(response) => {
                let code = format!("HTTP {}", response.status().as_u16());
                report.status = Some(code.clone());
                report.reason = Some(code);
            }
            Err(err) => {
                report.reason = Some(err.to_string());
            }
        }
        report
    }
}

/// `choices[0].message.content`, then `text`, then the raw JSON.
fn chat_text(payload: &Value) -> String {
    if let Some(content) = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return content.to_string();
    }
    if let Some(text) = payload.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    payload.to_string()
}

fn truncate(text: &str) -> String {
    text.chars().take(DIAGNOSTIC_CHARS).collect()
}
