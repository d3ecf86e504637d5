//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use research_graph::config::DbConfig;
use research_graph::error::{Error, Result};
use research_graph::llm::{
    Completion, CompletionRequest, FragmentStream, Generator, MessageRole, Usage,
};
use research_graph::models::PaperRecord;
use research_graph::store::GraphStore;

/// A fresh store in a temporary directory. Keep the `TempDir` alive.
pub async fn test_store() -> (TempDir, GraphStore) {
    let tmp = TempDir::new().unwrap();
    let config = DbConfig {
        path: tmp.path().join("graph.sqlite"),
        ..DbConfig::default()
    };
    let store = GraphStore::open(&config).await.unwrap();
    (tmp, store)
}

pub fn record(raw_id: &str, title: &str, abstract_text: &str, authors: &[&str]) -> PaperRecord {
    let mut r = PaperRecord::new(raw_id, title, "arxiv");
    r.abstract_text = abstract_text.to_string();
    r.authors = authors.iter().map(|a| a.to_string()).collect();
    r.published_date = NaiveDate::from_ymd_opt(2023, 1, 15);
    r
}

/// Scripted generator.
///
/// Requests that open with a system message are chat turns and get
/// `answer` / `fragments`; everything else is a term or entity extraction
/// prompt and gets `extraction`.
pub struct FakeGenerator {
    pub extraction: std::result::Result<String, String>,
    pub answer: String,
    /// `Err` items become stream errors.
    pub fragments: Vec<std::result::Result<String, String>>,
    /// Fail when a stream is opened.
    pub refuse_stream: bool,
    pub calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn new(extraction: &str) -> Self {
        Self {
            extraction: Ok(extraction.to_string()),
            answer: "answer".to_string(),
            fragments: Vec::new(),
            refuse_stream: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            extraction: Err("provider down".to_string()),
            ..Self::new("")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn is_chat(request: &CompletionRequest) -> bool {
    request
        .messages
        .first()
        .map(|m| m.role == MessageRole::System)
        .unwrap_or(false)
}

#[async_trait]
impl Generator for FakeGenerator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = if is_chat(request) {
            self.answer.clone()
        } else {
            self.extraction
                .clone()
                .map_err(|e| Error::upstream("fake", e))?
        };
        Ok(Completion {
            text,
            usage: Usage {
                prompt_tokens: 12,
                completion_tokens: 3,
                total_tokens: 15,
            },
        })
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<FragmentStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_stream {
            return Err(Error::upstream("fake", "HTTP 503"));
        }
        let items: Vec<Result<String>> = self
            .fragments
            .iter()
            .cloned()
            .map(|f| f.map_err(Error::Stream))
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}
