pub mod core;
pub mod events;
pub mod llm;
pub mod orchestrator;
pub mod rag;
pub mod state;
