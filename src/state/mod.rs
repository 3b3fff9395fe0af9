use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::core::errors::CoreError;
use crate::events::{handler, AuditTrail, Event, EventBus, EventKind};
use crate::llm::{GenerationProvider, HttpProvider};
use crate::orchestrator::Orchestrator;
use crate::rag::{DirectoryIngestor, DocumentStore, IngestReport, MemoryStore, Retriever};

pub mod error;

use error::InitializationError;

/// Application context shared by the CLI and tests.
///
/// Owns the store, the event bus, the provider and the orchestrator, and
/// wires the directory ingestor to `ingest.requested`. The bus worker is
/// only running between [`start`](Self::start) and [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Arc<Settings>,
    pub store: Arc<dyn DocumentStore>,
    pub bus: EventBus,
    pub audit: Arc<AuditTrail>,
    pub provider: Arc<dyn GenerationProvider>,
    pub orchestrator: Orchestrator,
    pub ingestor: DirectoryIngestor,
}

impl AppState {
    /// Loads the merged configuration under `paths` and builds the context.
    pub fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config.load_settings().map_err(InitializationError::Config)?;
        Self::with_settings(paths, settings)
    }

    /// Builds the context from already-resolved settings.
    pub fn with_settings(
        paths: Arc<AppPaths>,
        settings: Settings,
    ) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let bus = EventBus::new(&settings.events);
        let provider: Arc<dyn GenerationProvider> = Arc::new(
            HttpProvider::new(&settings.provider).map_err(InitializationError::Provider)?,
        );
        let orchestrator = Orchestrator::new(
            bus.clone(),
            Retriever::new(store.clone()),
            provider.clone(),
            &settings.retrieval,
        );
        let ingestor = DirectoryIngestor::new(&settings.ingest);
        let audit = AuditTrail::new();
        audit.attach(&bus).map_err(InitializationError::Audit)?;

        let state = AppState {
            paths,
            config,
            settings: Arc::new(settings),
            store,
            bus,
            audit,
            provider,
            orchestrator,
            ingestor,
        };
        state
            .subscribe_ingestor()
            .map_err(InitializationError::Ingestor)?;

        tracing::info!(
            "Initialized (endpoint: {})",
            if state.settings.provider.endpoint.is_empty() {
                "<not configured>"
            } else {
                state.settings.provider.endpoint.as_str()
            }
        );
        Ok(Arc::new(state))
    }

    pub fn start(&self) {
        self.bus.start();
    }

    pub async fn shutdown(&self) {
        self.bus.stop().await;
    }

    /// Directory ingested at startup: `ingest.docs_path` or `<data>/docs`.
    pub fn docs_dir(&self) -> PathBuf {
        self.settings
            .ingest
            .docs_path
            .clone()
            .unwrap_or_else(|| self.paths.docs_dir.clone())
    }

    /// Ingests the documents directory if it exists.
    pub async fn ingest_docs_dir(&self) -> Result<Option<IngestReport>, CoreError> {
        let dir = self.docs_dir();
        if !dir.exists() {
            tracing::debug!("No documents directory at {}", dir.display());
            return Ok(None);
        }
        self.ingest(&dir).await.map(Some)
    }

    pub async fn ingest(&self, path: &Path) -> Result<IngestReport, CoreError> {
        self.ingestor.ingest(path, self.store.as_ref()).await
    }

    /// Runs ingestion for every `ingest.requested` event and reports the
    /// outcome as `ingest.completed`.
    fn subscribe_ingestor(&self) -> Result<(), CoreError> {
        let state = self.clone();
        self.bus.subscribe(
            EventKind::IngestRequested.as_str(),
            handler(move |event: &Event| {
                let path = event
                    .payload
                    .get("path")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("ingest.requested without a path"))?;
                let runtime = tokio::runtime::Handle::try_current()?;
                let state = state.clone();
                runtime.spawn(async move {
                    let payload = match state.ingest(Path::new(&path)).await {
                        Ok(report) => json!({ "path": path, "ingested": report.ingested }),
                        Err(err) => {
                            tracing::warn!("Ingestion of {} failed: {}", path, err);
                            json!({ "path": path, "error": err.to_string() })
                        }
                    };
                    if let Err(err) = state.bus.publish(EventKind::IngestCompleted, payload, Value::Null) {
                        tracing::warn!("Failed to publish ingest.completed: {}", err);
                    }
                });
                Ok(())
            }),
        )
    }
}
