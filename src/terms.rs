//! Term extraction.
//!
//! Turns a question into at most a few short search terms. The term model
//! is asked first; any provider failure falls back to substring matching
//! against a fixed vocabulary. Neither path ever returns an error.

use std::sync::Arc;

use crate::llm::{CompletionRequest, Generator, Message};

/// Hits returned by the vocabulary fallback.
const FALLBACK_LIMIT: usize = 3;

/// Where a term set came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermExtraction {
    /// Terms named by the model.
    Terms(Vec<String>),
    /// The model said the question has no research terms. Callers skip
    /// graph search entirely.
    NoTerms,
    /// The model was unreachable; vocabulary hits, possibly none.
    Fallback(Vec<String>),
}

impl TermExtraction {
    pub fn terms(&self) -> &[String] {
        match self {
            TermExtraction::Terms(t) | TermExtraction::Fallback(t) => t,
            TermExtraction::NoTerms => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms().is_empty()
    }
}

pub struct TermExtractor {
    generator: Arc<dyn Generator>,
    model: String,
    max_terms: usize,
    vocabulary: Vec<String>,
}

impl TermExtractor {
    pub fn new(
        generator: Arc<dyn Generator>,
        model: impl Into<String>,
        max_terms: usize,
        vocabulary: Vec<String>,
    ) -> Self {
        Self {
            generator,
            model: model.into(),
            max_terms,
            vocabulary,
        }
    }

    pub async fn extract(&self, question: &str) -> TermExtraction {
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::user(build_prompt(question))],
        )
        .temperature(0.0)
        .max_tokens(50);

        match self.generator.complete(&request).await {
            Ok(completion) => {
                let extraction = parse_terms(&completion.text, self.max_terms);
                tracing::debug!(?extraction, "extracted search terms");
                extraction
            }
            Err(e) => {
                let terms = fallback_terms(question, &self.vocabulary);
                tracing::warn!(error = %e, ?terms, "term extraction failed, using vocabulary");
                TermExtraction::Fallback(terms)
            }
        }
    }
}

fn build_prompt(question: &str) -> String {
    format!(
        r#"Extract 1-3 key technical/research terms from this question that would be useful for searching an academic paper database.
Only return terms related to research topics, methods, or technical concepts. Ignore conversational words.
If the question is not about research/technical topics, return "NONE".

Question: "{question}"

Return only the search terms as a comma-separated list, or "NONE". Examples:
- "Explain transformers" -> transformer, attention mechanism
- "What's the latest in computer vision?" -> computer vision, vision models
- "Can I ask about sports?" -> NONE
- "Papers about BERT" -> BERT, language model
- "How does reinforcement learning work?" -> reinforcement learning

Search terms:"#
    )
}

/// Parse a model reply: `NONE` or empty means no terms, otherwise a
/// comma-separated list capped at `max_terms`.
pub fn parse_terms(raw: &str, max_terms: usize) -> TermExtraction {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
        return TermExtraction::NoTerms;
    }

    let terms: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().trim_matches('"').trim())
        .filter(|t| !t.is_empty())
        .take(max_terms)
        .map(str::to_string)
        .collect();

    if terms.is_empty() {
        TermExtraction::NoTerms
    } else {
        TermExtraction::Terms(terms)
    }
}

/// Vocabulary entries contained in the question, in vocabulary order.
pub fn fallback_terms(question: &str, vocabulary: &[String]) -> Vec<String> {
    let question = question.to_lowercase();
    vocabulary
        .iter()
        .filter(|term| question.contains(term.to_lowercase().as_str()))
        .take(FALLBACK_LIMIT)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_fallback_vocabulary;
    use crate::llm::DisabledGenerator;

    #[test]
    fn test_parse_terms() {
        assert_eq!(
            parse_terms(" transformer , attention mechanism,, ", 3),
            TermExtraction::Terms(vec![
                "transformer".to_string(),
                "attention mechanism".to_string()
            ])
        );
        assert_eq!(parse_terms("a, b, c, d", 3).terms().len(), 3);
    }

    #[test]
    fn test_none_sentinel_is_case_insensitive() {
        assert_eq!(parse_terms("NONE", 3), TermExtraction::NoTerms);
        assert_eq!(parse_terms("none", 3), TermExtraction::NoTerms);
        assert_eq!(parse_terms("  ", 3), TermExtraction::NoTerms);
        assert_eq!(parse_terms(", ,", 3), TermExtraction::NoTerms);
    }

    #[test]
    fn test_fallback_keeps_vocabulary_order() {
        let vocab = default_fallback_vocabulary();
        let terms = fallback_terms("How does BERT use attention?", &vocab);
        assert_eq!(terms, vec!["attention", "bert"]);
    }

    #[test]
    fn test_fallback_capped_at_three() {
        let vocab = default_fallback_vocabulary();
        let terms = fallback_terms(
            "transformer attention bert gpt vision language model",
            &vocab,
        );
        assert_eq!(terms, vec!["transformer", "attention", "bert"]);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back() {
        let extractor = TermExtractor::new(
            Arc::new(DisabledGenerator),
            "m",
            3,
            default_fallback_vocabulary(),
        );
        let out = extractor.extract("Explain diffusion models").await;
        assert_eq!(out, TermExtraction::Fallback(vec!["diffusion".to_string()]));

        let out = extractor.extract("What's for lunch?").await;
        assert!(out.is_empty());
    }
}
