//! Source connectors against a local HTTP fixture.

mod common;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;

use common::test_store;
use research_graph::config::{ArxivConnectorConfig, HubConnectorConfig};
use research_graph::connector_arxiv::ArxivConnector;
use research_graph::connector_hub::HubConnector;
use research_graph::error::Error;
use research_graph::ingest::ingest_record;
use research_graph::models::PaperRecord;
use research_graph::sources::PaperSource;

fn feed(ids: &[&str]) -> String {
    let entries: String = ids
        .iter()
        .map(|id| {
            format!(
                "<entry><id>http://arxiv.org/abs/{id}v1</id><title>Paper {id}</title>\
                 <summary>About {id}.</summary><author><name>Ada Lovelace</name></author></entry>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><feed xmlns="http://www.w3.org/2005/Atom">{entries}</feed>"#)
}

async fn arxiv_query(Query(params): Query<HashMap<String, String>>) -> (StatusCode, String) {
    match params.get("start").map(String::as_str) {
        Some("0") => (StatusCode::OK, feed(&["2401.00001", "2401.00002"])),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "busy".to_string()),
    }
}

async fn daily_papers() -> Json<Value> {
    let mut items: Vec<Value> = (1..=6)
        .map(|i| json!({ "paper": { "id": format!("2402.0000{}", i), "title": format!("Daily {}", i), "upvotes": i } }))
        .collect();
    items.insert(0, json!({ "paper": { "id": "2402.00000", "title": "Quiet" } }));
    Json(Value::Array(items))
}

async fn start_fixture() -> SocketAddr {
    let app = Router::new()
        .route("/arxiv/query", get(arxiv_query))
        .route(
            "/arxiv/down",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        )
        .route("/hub/daily_papers", get(daily_papers));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

fn arxiv_config(addr: SocketAddr, path: &str) -> ArxivConnectorConfig {
    ArxivConnectorConfig {
        base_url: format!("http://{}/arxiv/{}", addr, path),
        page_size: 2,
        page_delay_ms: 0,
        ..ArxivConnectorConfig::default()
    }
}

#[tokio::test]
async fn test_arxiv_keeps_pages_before_a_failed_page() {
    let addr = start_fixture().await;
    let connector = ArxivConnector::new(&arxiv_config(addr, "query")).unwrap();

    let records = connector.fetch_papers("cat:cs.LG", 6).await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.base_id.as_str()).collect();
    assert_eq!(ids, vec!["2401.00001", "2401.00002"]);
    assert_eq!(records[0].authors, vec!["Ada Lovelace"]);
}

#[tokio::test]
async fn test_arxiv_first_page_failure_is_an_error() {
    let addr = start_fixture().await;
    let connector = ArxivConnector::new(&arxiv_config(addr, "down")).unwrap();

    let err = connector.fetch_papers("cat:cs.LG", 6).await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_hub_daily_listing_respects_max_results() {
    let addr = start_fixture().await;
    let connector = HubConnector::new(&HubConnectorConfig {
        base_url: format!("http://{}/hub", addr),
        ..HubConnectorConfig::default()
    })
    .unwrap();

    let date = chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let records = connector.daily_papers(date, 3).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].base_id, "2402.00000");
    assert_eq!(records[0].hub_upvotes, None);
    assert_eq!(records[1].hub_upvotes, Some(1));
    assert!(records.iter().all(|r| r.on_hub));
}

#[tokio::test]
async fn test_listing_without_upvotes_keeps_stored_count() {
    let (_tmp, store) = test_store().await;

    let mut first = PaperRecord::new("2402.00009", "Counted", "huggingface");
    first.on_hub = true;
    first.hub_upvotes = Some(42);
    ingest_record(&store, &first).await.unwrap();

    let mut again = PaperRecord::new("2402.00009v2", "Counted", "huggingface");
    again.on_hub = true;
    ingest_record(&store, &again).await.unwrap();

    let paper = store.get_paper("2402.00009").await.unwrap().unwrap();
    assert_eq!(paper.hub_upvotes, Some(42));
    assert_eq!(paper.on_hub, Some(true));
    assert_eq!(paper.display_id, "2402.00009v2");
}

#[tokio::test]
async fn test_unreachable_source_is_named_by_connector() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = ArxivConnector::new(&arxiv_config(addr, "query")).unwrap();
    match connector.fetch_papers("cat:cs.LG", 2).await {
        Err(Error::Upstream { source_name, .. }) => assert_eq!(source_name, "arxiv"),
        other => panic!("expected upstream error, got {:?}", other.map(|r| r.len())),
    }

    let hub = HubConnector::new(&HubConnectorConfig {
        base_url: format!("http://{}/hub", addr),
        ..HubConnectorConfig::default()
    })
    .unwrap();
    match hub.search_papers("diffusion", 5).await {
        Err(Error::Upstream { source_name, .. }) => assert_eq!(source_name, "huggingface"),
        other => panic!("expected upstream error, got {:?}", other.map(|r| r.len())),
    }
}
