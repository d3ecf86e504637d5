//! Papers service, context retrieval and chat orchestration.

mod common;

use futures_util::StreamExt;
use std::sync::Arc;

use common::{record, test_store, FakeGenerator};
use research_graph::chat::{
    render_context, stream_chat, ChatFrame, ChatOrchestrator, GENERATION_INTERRUPTED,
    GENERATION_UNAVAILABLE, NO_CONTEXT, PREPARE_FAILED,
};
use research_graph::config::default_fallback_vocabulary;
use research_graph::entities::{write_entities, ExtractedConcept, ExtractedEntities, ExtractedMethod};
use research_graph::error::Error;
use research_graph::ingest::{ingest_record, ingest_records};
use research_graph::llm::{Generator, Message};
use research_graph::papers::{self, PaperCreate};
use research_graph::retrieve::ContextRetriever;
use research_graph::store::GraphStore;
use research_graph::terms::TermExtractor;

async fn seed_attention(store: &GraphStore) {
    let rec = record(
        "1706.03762v5",
        "Attention Is All You Need",
        &"The dominant sequence transduction models use attention. ".repeat(12),
        &[
            "Ashish Vaswani",
            "Noam Shazeer",
            "Niki Parmar",
            "Jakob Uszkoreit",
            "Llion Jones",
        ],
    );
    let (paper, _) = ingest_record(store, &rec).await.unwrap();
    let entities = ExtractedEntities {
        concepts: vec![
            ExtractedConcept {
                name: "Self-Attention".to_string(),
                category: "Architecture".to_string(),
                confidence: 1.0,
            },
            ExtractedConcept {
                name: "Transformer".to_string(),
                category: "Architecture".to_string(),
                confidence: 1.0,
            },
        ],
        methods: vec![ExtractedMethod {
            name: "Multi-Head Attention".to_string(),
            algorithm_type: "attention".to_string(),
        }],
        ..Default::default()
    };
    write_entities(store, &paper, &entities).await.unwrap();
}

fn orchestrator(store: &GraphStore, generator: Arc<dyn Generator>) -> ChatOrchestrator {
    let terms = TermExtractor::new(generator.clone(), "term-model", 3, default_fallback_vocabulary());
    let retriever = ContextRetriever::new(store.clone(), 5);
    ChatOrchestrator::new(terms, retriever, generator, "chat-model", 10)
}

// ─── Papers service ─────────────────────────────────────────────────

#[tokio::test]
async fn test_list_papers_pages_with_total() {
    let (_tmp, store) = test_store().await;
    let records: Vec<_> = (1..=5)
        .map(|i| record(&format!("2301.0000{}", i), &format!("Paper {}", i), "", &[]))
        .collect();
    ingest_records(&store, &records).await;

    let page = papers::list_papers(&store, 2, 2).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.page, 2);
    assert_eq!(page.papers.len(), 2);

    let last = papers::list_papers(&store, 3, 2).await.unwrap();
    assert_eq!(last.papers.len(), 1);

    assert!(matches!(
        papers::list_papers(&store, 0, 10).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        papers::list_papers(&store, 1, 101).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_search_scores_title_over_abstract() {
    let (_tmp, store) = test_store().await;
    ingest_records(
        &store,
        &[
            record("2301.00001", "Graph networks", "We study diffusion on graphs.", &[]),
            record("2301.00002", "Diffusion models", "Score-based diffusion.", &[]),
            record("2301.00003", "Unrelated", "Nothing here.", &[]),
        ],
    )
    .await;

    let results = papers::search_papers(&store, "Diffusion", 10).await.unwrap();
    let ranked: Vec<_> = results
        .iter()
        .map(|r| (r.paper.arxiv_id.as_str(), r.score))
        .collect();
    assert_eq!(ranked, vec![("2301.00002", 3.0), ("2301.00001", 1.0)]);

    assert!(matches!(
        papers::search_papers(&store, "  ", 10).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_get_paper_by_versioned_id() {
    let (_tmp, store) = test_store().await;
    seed_attention(&store).await;

    let detail = papers::get_paper(&store, "1706.03762v1").await.unwrap();
    assert_eq!(detail.paper.arxiv_id, "1706.03762");
    assert_eq!(detail.paper.display_id, "1706.03762v5");
    assert_eq!(detail.authors.len(), 5);
    assert_eq!(detail.authors[0], "Ashish Vaswani");
    assert_eq!(detail.methods, vec!["Multi-Head Attention"]);

    let err = papers::get_paper(&store, "0000.00000").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_create_paper_through_ingestion() {
    let (_tmp, store) = test_store().await;
    let body = PaperCreate {
        arxiv_id: "2402.12345v2".to_string(),
        title: "Submitted".to_string(),
        abstract_text: "By hand.".to_string(),
        authors: vec!["Jane Doe".to_string()],
        categories: vec!["cs.IR".to_string()],
        published_date: None,
        pdf_url: None,
    };
    let created = papers::create_paper(&store, body.clone()).await.unwrap();
    assert_eq!(created.arxiv_id, "2402.12345");

    let again = papers::create_paper(&store, body).await.unwrap();
    assert_eq!(again.arxiv_id, "2402.12345");
    assert_ne!(created.message, again.message);

    let paper = store.get_paper("2402.12345").await.unwrap().unwrap();
    assert_eq!(paper.source.as_deref(), Some("api"));
    assert_eq!(store.count_edges(None).await.unwrap(), 1);
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_attention_context_is_bounded() {
    let (_tmp, store) = test_store().await;
    seed_attention(&store).await;

    let retriever = ContextRetriever::new(store.clone(), 5);
    let context = retriever.retrieve(&["attention".to_string()]).await.unwrap();

    assert_eq!(context.papers.len(), 1);
    let paper = &context.papers[0];
    assert_eq!(paper.arxiv_id, "1706.03762");
    assert_eq!(paper.authors.len(), 3);
    assert!(paper.abstract_text.chars().count() <= 303);
    assert!(paper.abstract_text.ends_with("..."));
    assert_eq!(paper.concepts.len(), 2);

    let concepts: Vec<_> = context.concepts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(concepts, vec!["Self-Attention"]);
    assert_eq!(context.concepts[0].paper_count, 1);
    assert_eq!(context.concepts[0].category.as_deref(), Some("Architecture"));
    assert_eq!(context.methods[0].name, "Multi-Head Attention");

    let text = render_context(&context);
    assert!(text.contains("   - Authors: Ashish Vaswani, Noam Shazeer, Niki Parmar\n"));
    assert!(text.contains("- **Multi-Head Attention** (attention) - used in 1 papers"));
}

#[tokio::test]
async fn test_terms_hitting_same_paper_dedup() {
    let (_tmp, store) = test_store().await;
    seed_attention(&store).await;

    let retriever = ContextRetriever::new(store.clone(), 5);
    let context = retriever
        .retrieve(&["attention".to_string(), "sequence transduction".to_string()])
        .await
        .unwrap();
    assert_eq!(context.papers.len(), 1);
}

#[tokio::test]
async fn test_empty_terms_give_empty_context() {
    let (_tmp, store) = test_store().await;
    seed_attention(&store).await;

    let retriever = ContextRetriever::new(store.clone(), 5);
    let context = retriever.retrieve(&[]).await.unwrap();
    assert!(context.is_empty());
    assert_eq!(render_context(&context), NO_CONTEXT);
}

// ─── Chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_reports_sources_and_usage() {
    let (_tmp, store) = test_store().await;
    seed_attention(&store).await;

    let mut fake = FakeGenerator::new("attention");
    fake.answer = "Self-attention relates positions.".to_string();
    let chat = orchestrator(&store, Arc::new(fake));

    let response = chat
        .chat("Explain attention", &[Message::user("hi"), Message::assistant("hello")])
        .await
        .unwrap();
    assert_eq!(response.response, "Self-attention relates positions.");
    assert_eq!(response.sources.papers, vec!["1706.03762"]);
    assert_eq!(response.sources.concepts, vec!["Self-Attention"]);
    assert_eq!(response.sources.methods, vec!["Multi-Head Attention"]);
    assert_eq!(response.usage.total_tokens, 15);
}

#[tokio::test]
async fn test_no_terms_skips_graph() {
    let (_tmp, store) = test_store().await;
    seed_attention(&store).await;

    let chat = orchestrator(&store, Arc::new(FakeGenerator::new("NONE")));
    let turn = chat.prepare("Can I ask about sports?", &[]).await.unwrap();
    assert!(turn.context.is_empty());
    let last = turn.request.messages.last().unwrap();
    assert!(last.content.contains(NO_CONTEXT));
}

#[tokio::test]
async fn test_provider_outage_uses_vocabulary() {
    let (_tmp, store) = test_store().await;
    seed_attention(&store).await;

    let chat = orchestrator(&store, Arc::new(FakeGenerator::failing()));
    let turn = chat.prepare("How does attention work?", &[]).await.unwrap();
    assert_eq!(turn.context.papers.len(), 1);
}

#[tokio::test]
async fn test_stream_frame_order() {
    let (_tmp, store) = test_store().await;
    seed_attention(&store).await;

    let mut fake = FakeGenerator::new("attention");
    fake.fragments = vec![Ok("Hel".to_string()), Ok("lo".to_string())];
    let chat = Arc::new(orchestrator(&store, Arc::new(fake)));

    let frames: Vec<ChatFrame> = stream_chat(chat, "Explain attention".to_string(), Vec::new())
        .collect()
        .await;
    assert_eq!(frames.len(), 4);
    match &frames[0] {
        ChatFrame::Context(ctx) => assert_eq!(ctx.papers.len(), 1),
        other => panic!("expected context frame, got {:?}", other),
    }
    assert_eq!(frames[1], ChatFrame::Content("Hel".to_string()));
    assert_eq!(frames[2], ChatFrame::Content("lo".to_string()));
    assert!(matches!(frames[3], ChatFrame::Done(_)));
}

#[tokio::test]
async fn test_stream_error_mid_generation() {
    let (_tmp, store) = test_store().await;

    let mut fake = FakeGenerator::new("NONE");
    fake.fragments = vec![
        Ok("Hel".to_string()),
        Err("connection reset".to_string()),
        Ok("never".to_string()),
    ];
    let chat = Arc::new(orchestrator(&store, Arc::new(fake)));

    let frames: Vec<ChatFrame> = stream_chat(chat, "hi".to_string(), Vec::new())
        .collect()
        .await;
    assert_eq!(frames.len(), 3);
    assert!(matches!(frames[0], ChatFrame::Context(_)));
    assert_eq!(frames[1], ChatFrame::Content("Hel".to_string()));
    match &frames[2] {
        ChatFrame::Error(msg) => {
            assert_eq!(msg, GENERATION_INTERRUPTED);
            assert!(!msg.contains("connection reset"));
        }
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_refused_emits_single_error() {
    let (_tmp, store) = test_store().await;

    let mut fake = FakeGenerator::new("NONE");
    fake.refuse_stream = true;
    let chat = Arc::new(orchestrator(&store, Arc::new(fake)));

    let frames: Vec<ChatFrame> = stream_chat(chat, "hi".to_string(), Vec::new())
        .collect()
        .await;
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ChatFrame::Error(msg) => {
            assert_eq!(msg, GENERATION_UNAVAILABLE);
            assert!(!msg.contains("503"));
        }
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_with_closed_store_hides_store_error() {
    let (_tmp, store) = test_store().await;
    let chat = Arc::new(orchestrator(&store, Arc::new(FakeGenerator::new("attention"))));
    store.close().await;

    let frames: Vec<ChatFrame> = stream_chat(chat, "attention?".to_string(), Vec::new())
        .collect()
        .await;
    assert_eq!(frames, vec![ChatFrame::Error(PREPARE_FAILED.to_string())]);
}
