//! HTTP surface driven over a real socket.

mod common;

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use common::{test_store, FakeGenerator};
use research_graph::chat::ChatOrchestrator;
use research_graph::config::default_fallback_vocabulary;
use research_graph::retrieve::ContextRetriever;
use research_graph::server::{router, AppState};
use research_graph::store::GraphStore;
use research_graph::terms::TermExtractor;

async fn start_server(store: GraphStore, generator: FakeGenerator) -> SocketAddr {
    let generator = Arc::new(generator);
    let terms = TermExtractor::new(generator.clone(), "t", 3, default_fallback_vocabulary());
    let retriever = ContextRetriever::new(store.clone(), 5);
    let chat = ChatOrchestrator::new(terms, retriever, generator, "c", 10);
    let app = router(AppState::new(store, chat));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

#[tokio::test]
async fn test_papers_endpoints() {
    let (_tmp, store) = test_store().await;
    let addr = start_server(store, FakeGenerator::new("NONE")).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "connected");

    let resp = client
        .post(format!("{}/papers", base))
        .json(&json!({
            "arxiv_id": "2402.00001v3",
            "title": "Sparse Mixture of Experts",
            "abstract": "Routing tokens to experts.",
            "authors": ["Jane Doe", "John Roe"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["arxiv_id"], "2402.00001");

    let body: Value = client
        .get(format!("{}/papers?page=1&page_size=10", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["papers"][0]["title"], "Sparse Mixture of Experts");

    let resp = client
        .get(format!("{}/papers/2402.00001v1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["display_id"], "2402.00001v3");
    assert_eq!(body["abstract"], "Routing tokens to experts.");
    assert_eq!(body["authors"], json!(["Jane Doe", "John Roe"]));

    let body: Value = client
        .get(format!("{}/papers/search?q=experts&limit=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body[0]["paper"]["arxiv_id"], "2402.00001");
    assert_eq!(body[0]["score"], 3.0);

    let resp = client
        .get(format!("{}/papers/1999.99999", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    for bad in ["/papers/search?q=", "/papers?page=0", "/papers?page_size=500"] {
        let resp = client.get(format!("{}{}", base, bad)).send().await.unwrap();
        assert_eq!(resp.status(), 400, "{}", bad);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn test_chat_endpoints() {
    let (_tmp, store) = test_store().await;
    let mut fake = FakeGenerator::new("NONE");
    fake.answer = "I have no papers on that.".to_string();
    fake.fragments = vec![Ok("Hel".to_string()), Ok("lo".to_string())];
    let addr = start_server(store, fake).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({
            "message": "Can I ask about sports?",
            "conversation_history": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["response"], "I have no papers on that.");
    assert_eq!(body["sources"]["papers"], json!([]));
    assert_eq!(body["usage"]["total_tokens"], 15);

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/chat/stream", base))
        .json(&json!({ "message": "hello", "history": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/x-ndjson"
    );
    let text = resp.text().await.unwrap();
    let frames: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let types: Vec<_> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["context", "content", "content", "done"]);
    assert_eq!(frames[1]["data"], "Hel");
    assert_eq!(frames[3]["data"], json!({}));
}

#[tokio::test]
async fn test_health_reports_store_outage() {
    let (_tmp, store) = test_store().await;
    let addr = start_server(store.clone(), FakeGenerator::new("NONE")).await;
    store.close().await;

    let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["store"], "unavailable");
}
