//! Context retrieval.
//!
//! Fans a term set out across the graph and merges the hits into one
//! bounded [`GraphContext`]:
//!
//! 1. For each term, papers whose title or abstract contains it, each with
//!    up to 3 authors, 5 concepts and 3 methods via outgoing edges.
//! 2. For each term, concepts and methods whose name contains it, with the
//!    number of papers linking to them.
//! 3. Merge across terms, deduplicating by identity key. Papers keep
//!    first-seen order; concepts and methods are ranked by paper count,
//!    ties by key.
//! 4. Cap every category at `per_category_limit`.
//!
//! An empty term set yields an empty context without touching the store.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::models::{EdgeType, NodeLabel, Paper};
use crate::store::{EntitySummary, GraphStore, NodeRow};

const MAX_AUTHORS: usize = 3;
const MAX_CONCEPTS_PER_PAPER: usize = 5;
const MAX_METHODS_PER_PAPER: usize = 3;
/// Characters of abstract kept in a context, before the ellipsis.
pub const ABSTRACT_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPaper {
    pub arxiv_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub published_date: Option<String>,
    pub authors: Vec<String>,
    pub concepts: Vec<String>,
    pub methods: Vec<String>,
}

/// Grounding context passed to prompt assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphContext {
    pub papers: Vec<ContextPaper>,
    pub concepts: Vec<EntitySummary>,
    pub methods: Vec<EntitySummary>,
}

impl GraphContext {
    pub fn is_empty(&self) -> bool {
        self.papers.is_empty() && self.concepts.is_empty() && self.methods.is_empty()
    }
}

#[derive(Clone)]
pub struct ContextRetriever {
    store: GraphStore,
    per_category_limit: usize,
}

impl ContextRetriever {
    pub fn new(store: GraphStore, per_category_limit: usize) -> Self {
        Self {
            store,
            per_category_limit,
        }
    }

    pub async fn retrieve(&self, terms: &[String]) -> Result<GraphContext> {
        let mut context = GraphContext::default();
        if terms.is_empty() {
            return Ok(context);
        }
        let limit = self.per_category_limit;

        let mut seen: HashSet<String> = HashSet::new();
        'terms: for term in terms {
            let papers = self.store.search_papers(term, limit).await?;
            tracing::debug!(%term, found = papers.len(), "paper search");
            for paper in papers {
                if context.papers.len() >= limit {
                    break 'terms;
                }
                if seen.insert(paper.arxiv_id.clone()) {
                    context.papers.push(self.context_paper(paper).await?);
                }
            }
        }

        context.concepts = self
            .ranked_entities(terms, NodeLabel::Concept, EdgeType::Introduces, "category")
            .await?;
        context.methods = self
            .ranked_entities(terms, NodeLabel::Method, EdgeType::Proposes, "algorithm_type")
            .await?;

        Ok(context)
    }

    async fn context_paper(&self, paper: Paper) -> Result<ContextPaper> {
        let names = |rows: Vec<NodeRow>| -> Vec<String> {
            rows.iter().map(|n| n.display_name().to_string()).collect()
        };
        let key = paper.arxiv_id.as_str();
        let authors = self
            .store
            .neighbours(NodeLabel::Paper, key, EdgeType::AuthoredBy, MAX_AUTHORS)
            .await?;
        let concepts = self
            .store
            .neighbours(NodeLabel::Paper, key, EdgeType::Introduces, MAX_CONCEPTS_PER_PAPER)
            .await?;
        let methods = self
            .store
            .neighbours(NodeLabel::Paper, key, EdgeType::Proposes, MAX_METHODS_PER_PAPER)
            .await?;

        Ok(ContextPaper {
            title: paper.title,
            abstract_text: truncate_abstract(&paper.abstract_text),
            published_date: paper.published_date.map(|d| d.format("%Y-%m-%d").to_string()),
            authors: names(authors),
            concepts: names(concepts),
            methods: names(methods),
            arxiv_id: paper.arxiv_id,
        })
    }

    async fn ranked_entities(
        &self,
        terms: &[String],
        label: NodeLabel,
        edge_type: EdgeType,
        category_field: &str,
    ) -> Result<Vec<EntitySummary>> {
        let mut merged: HashMap<String, EntitySummary> = HashMap::new();
        for term in terms {
            let hits = self
                .store
                .search_entities(label, edge_type, category_field, term, self.per_category_limit)
                .await?;
            for hit in hits {
                merged.entry(hit.key.clone()).or_insert(hit);
            }
        }
        Ok(rank_entities(merged.into_values().collect(), self.per_category_limit))
    }
}

/// Most linked first, ties by key, capped.
pub fn rank_entities(mut entities: Vec<EntitySummary>, limit: usize) -> Vec<EntitySummary> {
    entities.sort_by(|a, b| {
        b.paper_count
            .cmp(&a.paper_count)
            .then_with(|| a.key.cmp(&b.key))
    });
    entities.truncate(limit);
    entities
}

/// Cut to [`ABSTRACT_PREVIEW_CHARS`] characters plus `...`. Applying it
/// twice gives the same text.
pub fn truncate_abstract(text: &str) -> String {
    let len = text.chars().count();
    if len <= ABSTRACT_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(ABSTRACT_PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}
