//! Shared ingestion routine.
//!
//! Connectors emit [`PaperRecord`]s; this module turns them into Paper and
//! Author nodes plus `AUTHORED_BY` edges through the resolver. Running it
//! twice over the same records leaves node and edge counts unchanged.
//!
//! Field policy for a paper:
//!
//! - **on create**: title, abstract, published date, pdf url,
//!   `citation_count = 0`, source tag, hub url/upvotes for hub records.
//! - **on match**: hub upvotes when the record carries them.
//! - **both**: `display_id`, so the most recently ingested version shows.
//! - **grow**: categories.

use anyhow::Result as CliResult;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;

use crate::config::Config;
use crate::connector_arxiv::ArxivConnector;
use crate::connector_hub::HubConnector;
use crate::error::Result;
use crate::models::{author_key, EdgeType, NodeLabel, PaperRecord};
use crate::resolver::{upsert_edge, upsert_node, EdgeUpsert, NodeRef, NodeUpsert};
use crate::sources::PaperSource;
use crate::store::GraphStore;

/// Counters reported by one ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub fetched: usize,
    pub papers_created: usize,
    pub papers_updated: usize,
    pub authors_linked: usize,
    pub failed: usize,
}

impl IngestStats {
    fn absorb(&mut self, other: &IngestStats) {
        self.fetched += other.fetched;
        self.papers_created += other.papers_created;
        self.papers_updated += other.papers_updated;
        self.authors_linked += other.authors_linked;
        self.failed += other.failed;
    }
}

/// Upsert one paper and its authors.
pub async fn ingest_record(store: &GraphStore, record: &PaperRecord) -> Result<(NodeRef, usize)> {
    let mut upsert = NodeUpsert::new(NodeLabel::Paper, record.base_id.clone())
        .on_create("title", record.title.clone())
        .on_create("abstract", record.abstract_text.clone())
        .on_create("citation_count", 0)
        .on_create("source", record.source.clone())
        .always("display_id", record.raw_id.clone())
        .grow("categories", record.categories.iter().cloned());

    if let Some(date) = record.published_date {
        upsert = upsert.on_create("published_date", date.format("%Y-%m-%d").to_string());
    }
    if let Some(ref pdf) = record.pdf_url {
        upsert = upsert.on_create("pdf_url", pdf.clone());
    }
    if record.on_hub {
        upsert = upsert
            .on_create(
                "hub_url",
                format!("https://huggingface.co/papers/{}", record.base_id),
            )
            .always("on_hub", true);
    }
    if let Some(upvotes) = record.hub_upvotes {
        upsert = upsert.always("hub_upvotes", upvotes);
    }

    let paper = upsert_node(store, &upsert).await?;
    let linked = link_authors(store, &paper, &record.authors).await?;
    Ok((paper, linked))
}

/// Create Author nodes and `AUTHORED_BY {position}` edges, positions from 1.
///
/// Returns the number of edges newly created.
pub async fn link_authors(store: &GraphStore, paper: &NodeRef, authors: &[String]) -> Result<usize> {
    let mut created = 0;
    for (idx, name) in authors.iter().enumerate() {
        let key = author_key(name);
        if key.is_empty() {
            continue;
        }
        let author = upsert_node(
            store,
            &NodeUpsert::new(NodeLabel::Author, key).on_create("name", name.trim()),
        )
        .await?;
        let edge = upsert_edge(
            store,
            &EdgeUpsert::new(paper, EdgeType::AuthoredBy, &author)
                .on_create("position", Value::from(idx as i64 + 1)),
        )
        .await?;
        if edge.created {
            created += 1;
        }
    }
    Ok(created)
}

/// Ingest a batch. A failing record is logged and counted; the rest continue.
pub async fn ingest_records(store: &GraphStore, records: &[PaperRecord]) -> IngestStats {
    let mut stats = IngestStats {
        fetched: records.len(),
        ..Default::default()
    };

    for record in records {
        match ingest_record(store, record).await {
            Ok((paper, linked)) => {
                if paper.created {
                    stats.papers_created += 1;
                } else {
                    stats.papers_updated += 1;
                }
                stats.authors_linked += linked;
            }
            Err(e) => {
                tracing::warn!(arxiv_id = %record.base_id, error = %e, "failed to ingest paper");
                stats.failed += 1;
            }
        }
    }

    stats
}

/// Which feed `rgraph ingest` reads.
#[derive(Debug, Clone)]
pub enum IngestTarget {
    Arxiv {
        query: Option<String>,
        max_results: Option<usize>,
    },
    HubDaily {
        days: u32,
        max_results: Option<usize>,
    },
    HubSearch {
        query: String,
        max_results: Option<usize>,
    },
}

/// CLI entry point for `rgraph ingest`.
pub async fn run_ingest(config: &Config, target: IngestTarget) -> CliResult<()> {
    let store = GraphStore::open(&config.db).await?;

    let (label, stats) = match target {
        IngestTarget::Arxiv { query, max_results } => {
            let connector = ArxivConnector::new(&config.connectors.arxiv)?;
            let query = query.unwrap_or_else(|| config.connectors.arxiv.default_query.clone());
            let max = max_results.unwrap_or(config.connectors.arxiv.max_results);
            tracing::info!(%query, max, "fetching arxiv papers");
            let records = connector.fetch_papers(&query, max).await?;
            ("arxiv", ingest_records(&store, &records).await)
        }
        IngestTarget::HubDaily { days, max_results } => {
            let connector = HubConnector::new(&config.connectors.hub)?;
            let max = max_results.unwrap_or(config.connectors.hub.max_results);
            let mut total = IngestStats::default();
            let today = Utc::now().date_naive();
            for offset in 0..days {
                let remaining = max.saturating_sub(total.fetched);
                if remaining == 0 {
                    break;
                }
                if offset > 0 {
                    tokio::time::sleep(connector.request_delay()).await;
                }
                let date = today - ChronoDuration::days(offset as i64);
                match connector.daily_papers(date, remaining).await {
                    Ok(records) => {
                        tracing::info!(%date, found = records.len(), "hub daily papers");
                        total.absorb(&ingest_records(&store, &records).await);
                    }
                    Err(e) => {
                        tracing::warn!(%date, error = %e, "skipping hub daily page");
                    }
                }
            }
            ("hub-daily", total)
        }
        IngestTarget::HubSearch { query, max_results } => {
            let connector = HubConnector::new(&config.connectors.hub)?;
            let max = max_results.unwrap_or(config.connectors.hub.max_results);
            let records = connector.search_papers(&query, max).await?;
            ("hub-search", ingest_records(&store, &records).await)
        }
    };

    println!("ingest {}", label);
    println!("  fetched: {} records", stats.fetched);
    println!("  papers created: {}", stats.papers_created);
    println!("  papers updated: {}", stats.papers_updated);
    println!("  author links created: {}", stats.authors_linked);
    if stats.failed > 0 {
        println!("  failed: {}", stats.failed);
    }
    println!("ok");

    store.close().await;
    Ok(())
}
