//! Core data models.
//!
//! Three families of types live here:
//!
//! - **Graph vocabulary**: [`NodeLabel`], [`EdgeType`], [`EnrichmentPass`].
//! - **Stored entities** as they leave the store adapter: [`Paper`],
//!   [`EnrichmentState`].
//! - **Connector output** before it touches the graph: [`PaperRecord`],
//!   [`ArtifactRecord`], [`RepositoryRecord`], [`HubPaperMetadata`], [`HubRepos`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Node type. Together with an identity key it names exactly one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    Paper,
    Author,
    Concept,
    Method,
    Dataset,
    Metric,
    Model,
    DatasetArtifact,
    Space,
    Repository,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Paper => "Paper",
            NodeLabel::Author => "Author",
            NodeLabel::Concept => "Concept",
            NodeLabel::Method => "Method",
            NodeLabel::Dataset => "Dataset",
            NodeLabel::Metric => "Metric",
            NodeLabel::Model => "Model",
            NodeLabel::DatasetArtifact => "DatasetArtifact",
            NodeLabel::Space => "Space",
            NodeLabel::Repository => "Repository",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// Paper → Author
    AuthoredBy,
    /// Paper → Concept
    Introduces,
    /// Paper → Method
    Proposes,
    /// Paper → Dataset
    EvaluatesOn,
    /// Paper → Metric
    UsesMetric,
    /// Repository → Paper
    Implements,
    /// Model → Paper
    Cites,
    /// DatasetArtifact → Paper
    References,
    /// Space → Paper
    Demonstrates,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::AuthoredBy => "AUTHORED_BY",
            EdgeType::Introduces => "INTRODUCES",
            EdgeType::Proposes => "PROPOSES",
            EdgeType::EvaluatesOn => "EVALUATES_ON",
            EdgeType::UsesMetric => "USES_METRIC",
            EdgeType::Implements => "IMPLEMENTS",
            EdgeType::Cites => "CITES",
            EdgeType::References => "REFERENCES",
            EdgeType::Demonstrates => "DEMONSTRATES",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An independent process that augments existing papers from one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentPass {
    Authors,
    Entities,
    Hub,
}

impl EnrichmentPass {
    pub const ALL: [EnrichmentPass; 3] = [
        EnrichmentPass::Authors,
        EnrichmentPass::Entities,
        EnrichmentPass::Hub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentPass::Authors => "authors",
            EnrichmentPass::Entities => "entities",
            EnrichmentPass::Hub => "hub",
        }
    }

    /// Paper property holding the completion timestamp. Present means done.
    pub fn flag_key(&self) -> &'static str {
        match self {
            EnrichmentPass::Authors => "author_enriched_at",
            EnrichmentPass::Entities => "entity_enriched_at",
            EnrichmentPass::Hub => "hub_enriched_at",
        }
    }

    /// Paper property holding the time of the last attempt that left the
    /// flag unset. Papers retried most recently are selected last.
    pub fn attempt_key(&self) -> &'static str {
        match self {
            EnrichmentPass::Authors => "author_attempted_at",
            EnrichmentPass::Entities => "entity_attempted_at",
            EnrichmentPass::Hub => "hub_attempted_at",
        }
    }

    /// Outgoing edge type that already provides what the pass would add.
    /// Papers with such an edge are not selected.
    pub fn provided_by(&self) -> Option<EdgeType> {
        match self {
            EnrichmentPass::Authors => Some(EdgeType::AuthoredBy),
            _ => None,
        }
    }

    /// Pass that must have completed before this one selects a paper.
    pub fn prerequisite(&self) -> Option<EnrichmentPass> {
        match self {
            EnrichmentPass::Hub => Some(EnrichmentPass::Entities),
            _ => None,
        }
    }

    pub fn is_flag_key(key: &str) -> bool {
        Self::ALL.iter().any(|p| p.flag_key() == key)
    }
}

impl fmt::Display for EnrichmentPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrichmentPass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authors" => Ok(EnrichmentPass::Authors),
            "entities" => Ok(EnrichmentPass::Entities),
            "hub" => Ok(EnrichmentPass::Hub),
            other => Err(format!(
                "unknown enrichment pass '{}'. Available: authors, entities, hub",
                other
            )),
        }
    }
}

/// Completed enrichment passes of one paper, with completion times.
///
/// Only ever grows: the store writes flags with an insert-only operation
/// and nothing removes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EnrichmentState {
    completed: BTreeMap<EnrichmentPass, DateTime<Utc>>,
}

impl EnrichmentState {
    pub fn from_props(props: &serde_json::Map<String, serde_json::Value>) -> Self {
        let completed = EnrichmentPass::ALL
            .iter()
            .filter_map(|pass| {
                let raw = props.get(pass.flag_key())?.as_str()?;
                let at = DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc);
                Some((*pass, at))
            })
            .collect();
        Self { completed }
    }

    pub fn is_complete(&self, pass: EnrichmentPass) -> bool {
        self.completed.contains_key(&pass)
    }

    pub fn completed_at(&self, pass: EnrichmentPass) -> Option<DateTime<Utc>> {
        self.completed.get(&pass).copied()
    }

    pub fn passes(&self) -> impl Iterator<Item = EnrichmentPass> + '_ {
        self.completed.keys().copied()
    }
}

/// A paper as read back from the graph.
#[derive(Debug, Clone, Serialize)]
pub struct Paper {
    /// Version-free identity key, e.g. `2301.00001`.
    pub arxiv_id: String,
    /// Identifier as last seen from a source, e.g. `2301.00001v2`.
    pub display_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub published_date: Option<NaiveDate>,
    pub categories: Vec<String>,
    pub pdf_url: Option<String>,
    pub citation_count: i64,
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_upvotes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_hub: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_ai_summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hub_keywords: Vec<String>,
    pub enrichment: EnrichmentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============ Connector output ============

/// A paper as produced by a source connector, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperRecord {
    /// Identifier exactly as the source reported it (may carry `vN`).
    pub raw_id: String,
    /// Identity key: `raw_id` without its version suffix.
    pub base_id: String,
    pub title: String,
    pub abstract_text: String,
    pub published_date: Option<NaiveDate>,
    pub categories: Vec<String>,
    pub pdf_url: Option<String>,
    pub authors: Vec<String>,
    /// Provenance tag: `arxiv`, `huggingface`, `api`.
    pub source: String,
    /// Listed on the model hub.
    pub on_hub: bool,
    /// Only set when the hub reported a count.
    pub hub_upvotes: Option<i64>,
}

impl PaperRecord {
    /// Minimal record keyed by `raw_id`; optional fields empty.
    pub fn new(raw_id: &str, title: &str, source: &str) -> Self {
        Self {
            raw_id: raw_id.to_string(),
            base_id: base_id(raw_id).to_string(),
            title: title.to_string(),
            abstract_text: String::new(),
            published_date: None,
            categories: Vec::new(),
            pdf_url: None,
            authors: Vec::new(),
            source: source.to_string(),
            on_hub: false,
            hub_upvotes: None,
        }
    }
}

/// Kind of model-hub artifact linked to a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    Dataset,
    Space,
}

impl ArtifactKind {
    pub fn label(&self) -> NodeLabel {
        match self {
            ArtifactKind::Model => NodeLabel::Model,
            ArtifactKind::Dataset => NodeLabel::DatasetArtifact,
            ArtifactKind::Space => NodeLabel::Space,
        }
    }

    /// Edge from the artifact to the paper.
    pub fn edge_type(&self) -> EdgeType {
        match self {
            ArtifactKind::Model => EdgeType::Cites,
            ArtifactKind::Dataset => EdgeType::References,
            ArtifactKind::Space => EdgeType::Demonstrates,
        }
    }

    pub fn url(&self, hub_id: &str) -> String {
        match self {
            ArtifactKind::Model => format!("https://huggingface.co/{}", hub_id),
            ArtifactKind::Dataset => format!("https://huggingface.co/datasets/{}", hub_id),
            ArtifactKind::Space => format!("https://huggingface.co/spaces/{}", hub_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRecord {
    pub kind: ArtifactKind,
    pub hub_id: String,
    pub likes: i64,
    /// Spaces have no download counter.
    pub downloads: Option<i64>,
    pub author: Option<String>,
    pub sdk: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryRecord {
    pub url: String,
    pub name: String,
    pub stars: i64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HubPaperMetadata {
    pub upvotes: Option<i64>,
    pub discussion_id: Option<String>,
    pub ai_summary: Option<String>,
    pub keywords: Vec<String>,
    pub published_at: Option<String>,
    pub repository: Option<RepositoryRecord>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HubRepos {
    pub models: Vec<ArtifactRecord>,
    pub datasets: Vec<ArtifactRecord>,
    pub spaces: Vec<ArtifactRecord>,
}

impl HubRepos {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.datasets.is_empty() && self.spaces.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.models
            .iter()
            .chain(self.datasets.iter())
            .chain(self.spaces.iter())
    }
}

// ============ Identifier helpers ============

/// Strip a trailing version suffix (`v2`, `v13`) from an arXiv identifier.
///
/// ```
/// use research_graph::models::base_id;
/// assert_eq!(base_id("2301.00001v2"), "2301.00001");
/// assert_eq!(base_id("2301.00001"), "2301.00001");
/// assert_eq!(base_id("solv-int/9901001v1"), "solv-int/9901001");
/// ```
pub fn base_id(raw: &str) -> &str {
    let raw = raw.trim();
    if let Some(pos) = raw.rfind('v') {
        let (head, tail) = raw.split_at(pos);
        let digits = &tail[1..];
        if !head.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return head;
        }
    }
    raw
}

/// Identity key for an author: lowercase, whitespace runs become `-`.
pub fn author_key(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Identity key for concepts, methods, datasets and metrics.
///
/// Case-normalised so "BERT" and "Bert" resolve to one node.
pub fn entity_key(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
