//! Query orchestration: retrieve, ground, generate, report.

mod result;
mod runner;

pub use result::RunResult;
pub use runner::Orchestrator;
