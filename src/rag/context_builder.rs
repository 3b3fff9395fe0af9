//! Grounding prompt assembly.
//!
//! Formats ranked hits as numbered excerpts, then appends the question so
//! the model answers from the supplied context only.

use serde::{Deserialize, Serialize};

use super::retriever::ScoredDocument;

const PREAMBLE: &str = "You are Covenant. Answer using ONLY the context below. \
If the answer is not present, say you don't know.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ContextBuilder {
    /// Characters of each document copied into the prompt.
    excerpt_chars: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(800)
    }
}

impl ContextBuilder {
    pub fn new(excerpt_chars: usize) -> Self {
        Self { excerpt_chars }
    }

    /// `[n] title` headers, each followed by the document excerpt,
    /// separated by blank lines.
    pub fn build_context(&self, hits: &[ScoredDocument]) -> String {
        hits.iter()
            .enumerate()
            .map(|(i, hit)| {
                let excerpt: String = hit.document.content.chars().take(self.excerpt_chars).collect();
                format!("[{}] {}\n{}", i + 1, hit.document.title, excerpt)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn build_prompt(&self, question: &str, hits: &[ScoredDocument]) -> String {
        format!(
            "{}\n\nContext:\n{}\n\nQuestion: {}\nAnswer:",
            PREAMBLE,
            self.build_context(hits),
            question
        )
    }
}

/// Citations in ranking order.
pub fn citations(hits: &[ScoredDocument]) -> Vec<Citation> {
    hits.iter()
        .map(|hit| Citation {
            title: hit.document.title.clone(),
            path: hit.document.source_path.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::store::Document;

    fn hit(title: &str, content: &str, path: &str) -> ScoredDocument {
        ScoredDocument {
            document: Document::new("id", title, content, path, "md"),
            score: 1,
        }
    }

    #[test]
    fn prompt_numbers_hits_and_ends_with_question() {
        let hits = vec![
            hit("Leave policy", "Twenty days per year.", "/docs/leave.md"),
            hit("Travel", "Economy only.", "/docs/travel.md"),
        ];

        let prompt = ContextBuilder::default().build_prompt("How many leave days?", &hits);

        assert!(prompt.starts_with("You are Covenant. Answer using ONLY the context below."));
        assert!(prompt.contains(
            "Context:\n[1] Leave policy\nTwenty days per year.\n\n[2] Travel\nEconomy only.\n\n"
        ));
        assert!(prompt.ends_with("Question: How many leave days?\nAnswer:"));
    }

    #[test]
    fn excerpts_are_truncated_by_characters() {
        let hits = vec![hit("Long", &"é".repeat(1000), "/docs/long.md")];
        let context = ContextBuilder::new(800).build_context(&hits);
        assert_eq!(context.chars().filter(|c| *c == 'é').count(), 800);
    }

    #[test]
    fn empty_hits_still_produce_a_prompt() {
        let prompt = ContextBuilder::default().build_prompt("anything?", &[]);
        assert!(prompt.contains("Context:\n\n\nQuestion: anything?"));
    }

    #[test]
    fn citations_follow_ranking() {
        let hits = vec![hit("B", "", "/b"), hit("A", "", "/a")];
        assert_eq!(
            citations(&hits),
            vec![
                Citation { title: "B".to_string(), path: "/b".to_string() },
                Citation { title: "A".to_string(), path: "/a".to_string() },
            ]
        );
    }
}
