use serde::Serialize;

use crate::events::Fields;
use crate::rag::Citation;

/// Outcome of an orchestrator entry point. Failures are carried in `error`
/// with `ok == false`; callers never see a `Result::Err`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    pub ok: bool,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub meta: Fields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    pub fn answered(answer: impl Into<String>, citations: Vec<Citation>, meta: Fields) -> Self {
        Self {
            ok: true,
            answer: answer.into(),
            citations,
            meta,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
