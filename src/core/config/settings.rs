use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Typed view over the merged `config.yml` + `secrets.yaml` + environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub retrieval: RetrievalSettings,
    pub events: EventSettings,
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Base URL of the generation backend. Empty means "not configured".
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub health_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: "local".to_string(),
            api_key: None,
            timeout_secs: 60,
            health_timeout_secs: 5,
        }
    }
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Characters of each hit copied into the grounding prompt.
    pub excerpt_chars: usize,
    pub answer_max_tokens: u32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            excerpt_chars: 800,
            answer_max_tokens: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub queue_capacity: usize,
    pub enqueue_timeout_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            enqueue_timeout_ms: 500,
            stop_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Directory ingested at startup; falls back to `AppPaths::docs_dir`.
    pub docs_path: Option<PathBuf>,
    pub extensions: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            docs_path: None,
            extensions: vec![".txt".to_string(), ".md".to_string(), ".log".to_string()],
        }
    }
}
