use std::sync::Arc;

use serde_json::{json, Value};

use super::result::RunResult;
use crate::core::config::RetrievalSettings;
use crate::core::errors::CoreError;
use crate::events::{into_fields, EventBus, EventKind};
use crate::llm::{GenerateOptions, GenerationProvider};
use crate::rag::{citations, ContextBuilder, Retriever, ScoredDocument};

/// Runs a question through retrieval and generation, publishing
/// `run.started`, `retrieve.done` and `run.completed` on the bus.
#[derive(Clone)]
pub struct Orchestrator {
    bus: EventBus,
    retriever: Retriever,
    provider: Arc<dyn GenerationProvider>,
    context: ContextBuilder,
    answer_max_tokens: u32,
}

impl Orchestrator {
    pub fn new(
        bus: EventBus,
        retriever: Retriever,
        provider: Arc<dyn GenerationProvider>,
        settings: &RetrievalSettings,
    ) -> Self {
        Self {
            bus,
            retriever,
            provider,
            context: ContextBuilder::new(settings.excerpt_chars),
            answer_max_tokens: settings.answer_max_tokens,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    pub async fn run_query(&self, question: &str, top_k: usize) -> RunResult {
        let mut meta = json!({ "question": question, "top_k": top_k });
        self.emit(EventKind::RunStarted, json!({ "stage": "query" }), meta.clone());

        match self.answer(question, top_k, &meta).await {
            Ok((answer, hits)) => {
                meta["n_hits"] = json!(hits.len());
                self.emit(EventKind::RunCompleted, json!({ "status": "ok" }), meta);
                RunResult::answered(
                    answer,
                    citations(&hits),
                    into_fields(json!({ "n_hits": hits.len() })),
                )
            }
            Err(err) => {
                let error = err.to_string();
                tracing::error!("Query failed: {}", error);
                self.emit(
                    EventKind::RunCompleted,
                    json!({ "status": "error", "error": error }),
                    meta,
                );
                RunResult::failed(error)
            }
        }
    }

    /// Publishes `ingest.requested`; the subscribed ingestor does the work.
    pub fn ingest_path(&self, path: &str) -> RunResult {
        self.emit(EventKind::IngestRequested, json!({ "path": path }), Value::Null);
        RunResult::answered(
            format!("Ingestion requested for: {}", path),
            Vec::new(),
            Default::default(),
        )
    }

    async fn answer(
        &self,
        question: &str,
        top_k: usize,
        run_meta: &Value,
    ) -> Result<(String, Vec<ScoredDocument>), CoreError> {
        let hits = self.retriever.retrieve(question, top_k).await?;
        self.emit(EventKind::RetrieveDone, json!({ "n_hits": hits.len() }), run_meta.clone());

        let prompt = self.context.build_prompt(question, &hits);
        let options = GenerateOptions::default().with_max_tokens(self.answer_max_tokens);
        let answer = self.provider.generate(&prompt, &options).await;
        Ok((answer, hits))
    }

    fn emit(&self, kind: EventKind, payload: Value, meta: Value) {
        if let Err(err) = self.bus.publish(kind, payload, meta) {
            tracing::warn!("Failed to publish lifecycle event: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::events::{handler, Event};
    use crate::llm::HealthReport;
    use crate::rag::{Document, DocumentStore, MemoryStore};

    #[derive(Default)]
    struct RecordingProvider {
        prompts: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl GenerationProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &str, options: &GenerateOptions) -> String {
            self.prompts.lock().unwrap().push((prompt.to_string(), options.max_tokens));
            "Twenty days.".to_string()
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        async fn documents(&self) -> Result<Vec<Document>, CoreError> {
            Err(CoreError::Store("disk on fire".to_string()))
        }

        async fn upsert(&self, _document: Document) -> Result<(), CoreError> {
            Ok(())
        }

        async fn count(&self) -> Result<usize, CoreError> {
            Ok(0)
        }
    }

    fn record_all(bus: &EventBus) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        for topic in ["run.*", "retrieve.*", "ingest.*"] {
            let sink = sink.clone();
            bus.subscribe(
                topic,
                handler(move |event: &Event| {
                    sink.lock().unwrap().push(event.clone());
                    Ok(())
                }),
            )
            .unwrap();
        }
        seen
    }

    fn orchestrator(store: Arc<dyn DocumentStore>, provider: Arc<dyn GenerationProvider>) -> Orchestrator {
        Orchestrator::new(
            EventBus::default(),
            Retriever::new(store),
            provider,
            &RetrievalSettings::default(),
        )
    }

    #[tokio::test]
    async fn answers_with_citations_and_lifecycle_events() {
        let store = MemoryStore::with_documents(vec![
            Document::new("1", "Leave policy", "Employees get twenty leave days.", "/docs/leave.md", "md"),
            Document::new("2", "Travel", "Economy only.", "/docs/travel.md", "md"),
        ]);
        let provider = Arc::new(RecordingProvider::default());
        let orch = orchestrator(Arc::new(store), provider.clone());
        let seen = record_all(orch.bus());

        let result = orch.run_query("leave days", 5).await;

        assert!(result.ok);
        assert_eq!(result.answer, "Twenty days.");
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].path, "/docs/leave.md");
        assert_eq!(result.meta["n_hits"], 1);
        assert!(result.error.is_none());

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.contains("[1] Leave policy\nEmployees get twenty leave days."));
        assert!(prompts[0].0.ends_with("Question: leave days\nAnswer:"));
        assert_eq!(prompts[0].1, 600);

        let events = seen.lock().unwrap();
        let topics: Vec<_> = events.iter().map(|e| e.topic().to_string()).collect();
        assert_eq!(topics, vec!["run.started", "retrieve.done", "run.completed"]);
        assert_eq!(events[0].payload["stage"], "query");
        assert_eq!(events[0].meta["question"], "leave days");
        assert_eq!(events[0].meta["top_k"], 5);
        assert_eq!(events[1].payload["n_hits"], 1);
        assert_eq!(events[1].meta["question"], "leave days");
        assert_eq!(events[1].meta["top_k"], 5);
        assert_eq!(events[2].payload["status"], "ok");
        assert_eq!(events[2].meta["n_hits"], 1);
    }

    #[tokio::test]
    async fn store_failure_becomes_error_result() {
        let provider = Arc::new(RecordingProvider::default());
        let orch = orchestrator(Arc::new(BrokenStore), provider.clone());
        let seen = record_all(orch.bus());

        let result = orch.run_query("anything", 3).await;

        assert!(!result.ok);
        assert!(result.error.as_deref().unwrap_or_default().contains("disk on fire"));
        assert!(provider.prompts.lock().unwrap().is_empty());

        let events = seen.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.topic(), "run.completed");
        assert_eq!(last.payload["status"], "error");
        assert!(last.payload["error"].as_str().unwrap().contains("disk on fire"));
    }

    #[tokio::test]
    async fn no_hits_still_generates() {
        let provider = Arc::new(RecordingProvider::default());
        let orch = orchestrator(Arc::new(MemoryStore::new()), provider.clone());

        let result = orch.run_query("unknown topic", 5).await;

        assert!(result.ok);
        assert!(result.citations.is_empty());
        assert_eq!(result.meta["n_hits"], 0);
        assert_eq!(provider.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ingest_path_only_publishes_request() {
        let orch = orchestrator(Arc::new(MemoryStore::new()), Arc::new(RecordingProvider::default()));
        let seen = record_all(orch.bus());

        let result = orch.ingest_path("/srv/docs");

        assert!(result.ok);
        assert_eq!(result.answer, "Ingestion requested for: /srv/docs");
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic(), "ingest.requested");
        assert_eq!(events[0].payload["path"], "/srv/docs");
    }

    #[tokio::test]
    async fn default_health_reports_ok() {
        let report: HealthReport = RecordingProvider::default().health().await;
        assert!(report.ok);
        assert_eq!(report.provider, "recording");
    }
}
