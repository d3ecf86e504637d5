//! Paper service.
//!
//! Get, list, search and create papers. Used by the `rgraph get`,
//! `rgraph papers` and `rgraph search` commands and by the `/papers` HTTP
//! routes.

use anyhow::Result as CliResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ingest::ingest_record;
use crate::models::{base_id, EdgeType, NodeLabel, Paper, PaperRecord};
use crate::store::GraphStore;

pub const MAX_PAGE_SIZE: usize = 100;
pub const MAX_SEARCH_LIMIT: usize = 100;
/// Query words considered by [`search_papers`]; the rest are ignored.
const MAX_QUERY_WORDS: usize = 8;
const CANDIDATES_PER_WORD: usize = 100;
const DETAIL_NEIGHBOURS: usize = 50;

/// A paper with its linked authors and entities.
#[derive(Debug, Clone, Serialize)]
pub struct PaperDetail {
    #[serde(flatten)]
    pub paper: Paper,
    pub authors: Vec<String>,
    pub concepts: Vec<String>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaperPage {
    pub papers: Vec<Paper>,
    pub page: usize,
    pub page_size: usize,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredPaper {
    pub paper: Paper,
    pub score: f64,
}

/// Body of `POST /papers`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperCreate {
    pub arxiv_id: String,
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub published_date: Option<NaiveDate>,
    #[serde(default)]
    pub pdf_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaperCreated {
    pub arxiv_id: String,
    pub message: String,
}

/// Look up a paper by versioned or base id.
pub async fn get_paper(store: &GraphStore, id: &str) -> Result<PaperDetail> {
    let key = base_id(id.trim());
    let paper = store
        .get_paper(key)
        .await?
        .ok_or_else(|| Error::not_found(NodeLabel::Paper.as_str(), key))?;

    let mut names = Vec::with_capacity(3);
    for edge_type in [EdgeType::AuthoredBy, EdgeType::Introduces, EdgeType::Proposes] {
        let nodes = store
            .neighbours(NodeLabel::Paper, key, edge_type, DETAIL_NEIGHBOURS)
            .await?;
        names.push(
            nodes
                .iter()
                .map(|n| n.display_name().to_string())
                .collect::<Vec<_>>(),
        );
    }
    let methods = names.pop().unwrap_or_default();
    let concepts = names.pop().unwrap_or_default();
    let authors = names.pop().unwrap_or_default();

    Ok(PaperDetail {
        paper,
        authors,
        concepts,
        methods,
    })
}

/// One page of papers, newest first. `page` counts from 1.
pub async fn list_papers(store: &GraphStore, page: usize, page_size: usize) -> Result<PaperPage> {
    if page == 0 {
        return Err(Error::InvalidInput("page must be >= 1".to_string()));
    }
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(Error::InvalidInput(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let offset = (page - 1).saturating_mul(page_size);
    let papers = store.list_papers(offset, page_size).await?;
    let total = store.count_papers().await?;

    Ok(PaperPage {
        papers,
        page,
        page_size,
        total,
    })
}

/// Keyword search over titles and abstracts.
///
/// Each query word scores 2 when it occurs in the title and 1 when it
/// occurs in the abstract. Highest score first, ties by id.
pub async fn search_papers(store: &GraphStore, query: &str, limit: usize) -> Result<Vec<ScoredPaper>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::InvalidInput("query must not be empty".to_string()));
    }
    if limit == 0 || limit > MAX_SEARCH_LIMIT {
        return Err(Error::InvalidInput(format!(
            "limit must be between 1 and {}",
            MAX_SEARCH_LIMIT
        )));
    }

    let words = query_words(query);
    let mut candidates: HashMap<String, Paper> = HashMap::new();
    for word in &words {
        for paper in store.search_papers(word, CANDIDATES_PER_WORD).await? {
            candidates.entry(paper.arxiv_id.clone()).or_insert(paper);
        }
    }

    let mut scored: Vec<ScoredPaper> = candidates
        .into_values()
        .map(|paper| ScoredPaper {
            score: score_paper(&paper, &words),
            paper,
        })
        .filter(|s| s.score > 0.0)
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.paper.arxiv_id.cmp(&b.paper.arxiv_id))
    });
    scored.truncate(limit);
    Ok(scored)
}

fn query_words(query: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for w in query.split_whitespace().map(str::to_lowercase) {
        if !words.contains(&w) {
            words.push(w);
        }
        if words.len() == MAX_QUERY_WORDS {
            break;
        }
    }
    words
}

pub fn score_paper(paper: &Paper, words: &[String]) -> f64 {
    let title = paper.title.to_lowercase();
    let abstract_text = paper.abstract_text.to_lowercase();
    words
        .iter()
        .map(|w| {
            let mut s = 0.0;
            if title.contains(w.as_str()) {
                s += 2.0;
            }
            if abstract_text.contains(w.as_str()) {
                s += 1.0;
            }
            s
        })
        .sum()
}

/// Create (or merge into) a paper through the ingestion routine.
pub async fn create_paper(store: &GraphStore, input: PaperCreate) -> Result<PaperCreated> {
    let raw_id = input.arxiv_id.trim();
    if base_id(raw_id).is_empty() {
        return Err(Error::InvalidInput("arxiv_id must not be empty".to_string()));
    }
    if input.title.trim().is_empty() {
        return Err(Error::InvalidInput("title must not be empty".to_string()));
    }

    let mut record = PaperRecord::new(raw_id, input.title.trim(), "api");
    record.abstract_text = input.abstract_text;
    record.authors = input.authors;
    record.categories = input.categories;
    record.published_date = input.published_date;
    record.pdf_url = input.pdf_url;

    let (paper, _) = ingest_record(store, &record).await?;
    tracing::info!(arxiv_id = %paper.key, created = paper.created, "paper submitted");

    let message = if paper.created {
        "Paper created successfully"
    } else {
        "Paper already exists; merged"
    };
    Ok(PaperCreated {
        arxiv_id: paper.key,
        message: message.to_string(),
    })
}

// ============ CLI ============

/// CLI entry point for `rgraph get`.
pub async fn run_get(config: &Config, id: &str) -> CliResult<()> {
    let store = GraphStore::open(&config.db).await?;
    let detail = get_paper(&store, id).await;
    store.close().await;
    let detail = detail?;
    let p = &detail.paper;

    println!("--- Paper ---");
    println!("arxiv_id:     {}", p.arxiv_id);
    println!("display_id:   {}", p.display_id);
    println!("title:        {}", p.title);
    if let Some(date) = p.published_date {
        println!("published:    {}", date);
    }
    if !p.categories.is_empty() {
        println!("categories:   {}", p.categories.join(", "));
    }
    if let Some(ref url) = p.pdf_url {
        println!("pdf_url:      {}", url);
    }
    if let Some(ref source) = p.source {
        println!("source:       {}", source);
    }
    if let Some(upvotes) = p.hub_upvotes {
        println!("hub_upvotes:  {}", upvotes);
    }
    for pass in p.enrichment.passes() {
        if let Some(at) = p.enrichment.completed_at(pass) {
            println!("enriched:     {} at {}", pass, at.to_rfc3339());
        }
    }
    println!();

    println!("--- Authors ({}) ---", detail.authors.len());
    for a in &detail.authors {
        println!("{}", a);
    }
    println!();
    if !detail.concepts.is_empty() {
        println!("concepts: {}", detail.concepts.join(", "));
    }
    if !detail.methods.is_empty() {
        println!("methods:  {}", detail.methods.join(", "));
    }
    println!();

    println!("--- Abstract ---");
    println!("{}", p.abstract_text);
    Ok(())
}

/// CLI entry point for `rgraph papers`.
pub async fn run_papers(config: &Config, page: usize, page_size: usize) -> CliResult<()> {
    let store = GraphStore::open(&config.db).await?;
    let result = list_papers(&store, page, page_size).await;
    store.close().await;
    let result = result?;

    if result.papers.is_empty() {
        println!("No papers on page {} ({} total).", result.page, result.total);
        return Ok(());
    }
    for p in &result.papers {
        let date = p
            .published_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "----------".to_string());
        println!("{}  {:<14} {}", date, p.arxiv_id, p.title);
    }
    println!(
        "page {} ({} per page, {} total)",
        result.page, result.page_size, result.total
    );
    Ok(())
}

/// CLI entry point for `rgraph search`.
pub async fn run_search(config: &Config, query: &str, limit: usize) -> CliResult<()> {
    let store = GraphStore::open(&config.db).await?;
    let results = search_papers(&store, query, limit).await;
    store.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.1}] {} ({})",
            i + 1,
            r.score,
            r.paper.title,
            r.paper.arxiv_id
        );
    }
    Ok(())
}
