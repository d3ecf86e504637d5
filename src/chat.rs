//! Chat orchestration.
//!
//! One turn runs: term extraction → context retrieval → prompt assembly →
//! generation. [`ChatOrchestrator::chat`] returns the whole answer with
//! token usage; [`stream_chat`] yields [`ChatFrame`]s in the order
//! `context`, `content`*, then `done` or a single `error`.

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::llm::{create_generator, CompletionRequest, Generator, Message, Usage};
use crate::retrieve::{truncate_abstract, ContextRetriever, GraphContext};
use crate::store::GraphStore;
use crate::terms::TermExtractor;

pub const SYSTEM_PROMPT: &str = "You are an expert AI research assistant specializing in helping researchers explore academic papers, concepts, and methodologies.

Your capabilities:
- Access to a knowledge graph of research papers, concepts, methods, authors, datasets, and metrics
- Deep understanding of machine learning, natural language processing, and AI research
- Ability to explain complex research concepts clearly
- Providing insights about research trends, connections, and recommendations

When answering:
1. Use the provided context from the knowledge graph when available
2. Cite specific papers, concepts, or methods from the context
3. Be concise but informative
4. If you don't have relevant information in the context, say so clearly
5. Suggest related papers or concepts when appropriate
6. Use markdown formatting for better readability

Always be helpful, accurate, and research-focused.";

pub const NO_CONTEXT: &str =
    "No relevant information found in the knowledge graph for this query.";

/// Client-facing `error` frame messages. Details go to the log only.
pub const PREPARE_FAILED: &str = "could not look up context for this question";
pub const GENERATION_UNAVAILABLE: &str = "the language model is unavailable";
pub const GENERATION_INTERRUPTED: &str = "the response was interrupted";

/// Identifiers cited by an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sources {
    pub papers: Vec<String>,
    pub concepts: Vec<String>,
    pub methods: Vec<String>,
}

impl Sources {
    pub fn from_context(context: &GraphContext) -> Self {
        Self {
            papers: context.papers.iter().map(|p| p.arxiv_id.clone()).collect(),
            concepts: context.concepts.iter().map(|c| c.name.clone()).collect(),
            methods: context.methods.iter().map(|m| m.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub context: GraphContext,
    pub sources: Sources,
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Empty {}

/// One line of the streaming protocol: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ChatFrame {
    Context(GraphContext),
    Content(String),
    Done(Empty),
    Error(String),
}

impl ChatFrame {
    /// Serialize as one newline-terminated JSON line.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "data": e.to_string() }).to_string()
        });
        line.push('\n');
        line
    }
}

pub type FrameStream = Pin<Box<dyn Stream<Item = ChatFrame> + Send>>;

pub struct ChatOrchestrator {
    terms: TermExtractor,
    retriever: ContextRetriever,
    generator: Arc<dyn Generator>,
    chat_model: String,
    history_turns: usize,
}

/// Context and messages for one turn, ready for the provider.
pub struct PreparedTurn {
    pub context: GraphContext,
    pub request: CompletionRequest,
}

impl ChatOrchestrator {
    pub fn new(
        terms: TermExtractor,
        retriever: ContextRetriever,
        generator: Arc<dyn Generator>,
        chat_model: impl Into<String>,
        history_turns: usize,
    ) -> Self {
        Self {
            terms,
            retriever,
            generator,
            chat_model: chat_model.into(),
            history_turns,
        }
    }

    /// Wire the configured generator, term extractor and retriever over `store`.
    pub fn from_config(config: &Config, store: GraphStore) -> Result<Self> {
        let generator = create_generator(&config.llm)?;
        let terms = TermExtractor::new(
            generator.clone(),
            config.llm.term_model.clone(),
            config.retrieval.max_terms,
            config.retrieval.fallback_vocabulary.clone(),
        );
        let retriever = ContextRetriever::new(store, config.retrieval.per_category_limit);
        Ok(Self::new(
            terms,
            retriever,
            generator,
            config.llm.chat_model.clone(),
            config.retrieval.history_turns,
        ))
    }

    /// Extract terms, retrieve context and assemble the prompt.
    pub async fn prepare(&self, message: &str, history: &[Message]) -> Result<PreparedTurn> {
        let extraction = self.terms.extract(message).await;
        let context = self.retriever.retrieve(extraction.terms()).await?;
        tracing::info!(
            terms = ?extraction.terms(),
            papers = context.papers.len(),
            concepts = context.concepts.len(),
            methods = context.methods.len(),
            "context assembled"
        );
        let messages = build_messages(&context, message, history, self.history_turns);
        Ok(PreparedTurn {
            context,
            request: CompletionRequest::new(self.chat_model.clone(), messages),
        })
    }

    pub async fn chat(&self, message: &str, history: &[Message]) -> Result<ChatResponse> {
        let turn = self.prepare(message, history).await?;
        let completion = self.generator.complete(&turn.request).await?;
        Ok(ChatResponse {
            response: completion.text,
            sources: Sources::from_context(&turn.context),
            context: turn.context,
            usage: completion.usage,
        })
    }
}

/// Stream one turn as frames.
///
/// Failures never escape as errors: whatever goes wrong becomes one
/// `error` frame with a fixed message and the stream ends. Dropping the stream drops the
/// provider stream with it.
pub fn stream_chat(
    orchestrator: Arc<ChatOrchestrator>,
    message: String,
    history: Vec<Message>,
) -> FrameStream {
    let frames = async_stream::stream! {
        let turn = match orchestrator.prepare(&message, &history).await {
            Ok(turn) => turn,
            Err(e) => {
                tracing::error!(error = %e, "failed to prepare chat turn");
                yield ChatFrame::Error(PREPARE_FAILED.to_string());
                return;
            }
        };

        let mut fragments = match orchestrator.generator.stream(&turn.request).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to open generation stream");
                yield ChatFrame::Error(GENERATION_UNAVAILABLE.to_string());
                return;
            }
        };

        yield ChatFrame::Context(turn.context);

        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => yield ChatFrame::Content(text),
                Err(e) => {
                    tracing::error!(error = %e, "generation stream failed");
                    yield ChatFrame::Error(GENERATION_INTERRUPTED.to_string());
                    return;
                }
            }
        }

        yield ChatFrame::Done(Empty {});
    };
    Box::pin(frames)
}

/// CLI entry point for `rgraph ask`: one streamed turn printed to stdout.
pub async fn run_ask(config: &Config, question: &str, show_context: bool) -> anyhow::Result<()> {
    let store = GraphStore::open(&config.db).await?;
    let orchestrator = Arc::new(ChatOrchestrator::from_config(config, store.clone())?);

    let mut frames = stream_chat(orchestrator, question.to_string(), Vec::new());
    let mut failed = None;
    while let Some(frame) = frames.next().await {
        match frame {
            ChatFrame::Context(context) => {
                if show_context {
                    println!("{}\n", render_context(&context));
                }
            }
            ChatFrame::Content(text) => {
                print!("{}", text);
                std::io::Write::flush(&mut std::io::stdout())?;
            }
            ChatFrame::Done(_) => println!(),
            ChatFrame::Error(message) => failed = Some(message),
        }
    }

    store.close().await;
    match failed {
        Some(message) => anyhow::bail!("chat failed: {}", message),
        None => Ok(()),
    }
}

/// System prompt, the last `history_turns` messages, then the question
/// with the rendered context.
pub fn build_messages(
    context: &GraphContext,
    message: &str,
    history: &[Message],
    history_turns: usize,
) -> Vec<Message> {
    let mut messages = vec![Message::system(SYSTEM_PROMPT)];
    let skip = history.len().saturating_sub(history_turns);
    messages.extend(history[skip..].iter().cloned());
    messages.push(Message::user(format!(
        "Context from Knowledge Graph:\n{}\n\nUser Question: {}",
        render_context(context),
        message
    )));
    messages
}

/// Markdown rendering of a context for the prompt.
pub fn render_context(context: &GraphContext) -> String {
    if context.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let mut parts: Vec<String> = Vec::new();

    if !context.papers.is_empty() {
        parts.push("## Relevant Papers:".to_string());
        for (i, paper) in context.papers.iter().enumerate() {
            let mut authors = paper
                .authors
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            if paper.authors.len() > 3 {
                authors.push_str(" et al.");
            }

            parts.push(format!("\n{}. **{}**", i + 1, paper.title));
            parts.push(format!("   - Authors: {}", authors));
            parts.push(format!("   - ArXiv ID: {}", paper.arxiv_id));
            if let Some(ref date) = paper.published_date {
                parts.push(format!("   - Published: {}", date));
            }
            if !paper.concepts.is_empty() {
                parts.push(format!("   - Concepts: {}", paper.concepts.join(", ")));
            }
            if !paper.methods.is_empty() {
                parts.push(format!("   - Methods: {}", paper.methods.join(", ")));
            }
            if !paper.abstract_text.is_empty() {
                parts.push(format!(
                    "   - Abstract: {}",
                    truncate_abstract(&paper.abstract_text)
                ));
            }
        }
    }

    for (header, entities) in [
        ("\n## Relevant Concepts:", &context.concepts),
        ("\n## Relevant Methods:", &context.methods),
    ] {
        if entities.is_empty() {
            continue;
        }
        parts.push(header.to_string());
        for e in entities {
            parts.push(format!(
                "- **{}** ({}) - used in {} papers",
                e.name,
                e.category.as_deref().unwrap_or("unknown"),
                e.paper_count
            ));
        }
    }

    parts.join("\n")
}
