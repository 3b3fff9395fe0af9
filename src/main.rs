use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use covenant_backend::core;
use covenant_backend::core::config::AppPaths;
use covenant_backend::events::{handler, Event};
use covenant_backend::state::AppState;

const INGEST_WAIT: Duration = Duration::from_secs(120);

/// Retrieval-augmented question answering over a local document folder
#[derive(Parser, Debug)]
#[command(name = "covenant")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a question from the ingested documents
    Query {
        question: String,

        /// Number of documents to ground the answer on
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Ingest a file or directory and report how many documents were read
    Ingest { path: PathBuf },
    /// Probe the generation backend
    Health,
    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let paths = Arc::new(AppPaths::new());
    core::logging::init(&paths);
    let state = AppState::initialize(paths).context("Failed to initialize application state")?;
    state.start();

    let outcome = run(&state, args.command).await;
    state.shutdown().await;

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(state: &Arc<AppState>, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::Query { question, top_k } => {
            if let Err(err) = state.ingest_docs_dir().await {
                tracing::warn!("Startup ingestion failed: {}", err);
            }
            let top_k = top_k.unwrap_or(state.settings.retrieval.top_k);
            let result = state.orchestrator.run_query(&question, top_k).await;
            Ok(serde_json::to_value(result)?)
        }
        Command::Ingest { path } => ingest(state, path).await,
        Command::Health => Ok(serde_json::to_value(state.provider.health().await)?),
        Command::Config => {
            let effective = state.config.effective_config()?;
            Ok(state.config.redact_sensitive_values(&effective))
        }
    }
}

/// Requests ingestion through the bus and waits for `ingest.completed`.
async fn ingest(state: &Arc<AppState>, path: PathBuf) -> anyhow::Result<Value> {
    let (tx, rx) = oneshot::channel::<Value>();
    let tx = Mutex::new(Some(tx));
    state.bus.subscribe(
        "ingest.completed",
        handler(move |event: &Event| {
            if let Some(tx) = tx.lock().map_err(|e| anyhow::anyhow!("{}", e))?.take() {
                let _ = tx.send(Value::Object(event.payload.clone()));
            }
            Ok(())
        }),
    )?;

    let request = state.orchestrator.ingest_path(&path.display().to_string());
    let completed = tokio::time::timeout(INGEST_WAIT, rx)
        .await
        .context("Timed out waiting for ingestion")?
        .context("Ingestion handler went away")?;

    Ok(json!({ "request": request, "completed": completed }))
}
