//! LLM entity extraction.
//!
//! Asks the extraction model for the concepts, methods, datasets and
//! metrics a paper introduces or uses, then writes them to the graph as
//! nodes linked from the paper.
//!
//! Extraction never raises. After `max_attempts` unparsable or failed
//! replies the caller gets [`Extraction::Failed`] and decides, via the
//! pass policy, whether the paper counts as attempted.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, Generator, Message};
use crate::models::{entity_key, EdgeType, NodeLabel};
use crate::resolver::{upsert_edge, upsert_node, EdgeUpsert, NodeRef, NodeUpsert};
use crate::store::GraphStore;

/// Characters of abstract sent to the model.
const MAX_ABSTRACT_CHARS: usize = 1500;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedConcept {
    pub name: String,
    #[serde(default = "default_concept_category")]
    pub category: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedMethod {
    pub name: String,
    #[serde(default = "default_algorithm_type")]
    pub algorithm_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedDataset {
    pub name: String,
    #[serde(default = "default_domain")]
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedMetric {
    pub name: String,
    #[serde(default = "default_higher_is_better")]
    pub higher_is_better: bool,
}

fn default_concept_category() -> String {
    "Other".to_string()
}
fn default_confidence() -> f64 {
    0.9
}
fn default_algorithm_type() -> String {
    "other".to_string()
}
fn default_domain() -> String {
    "Other".to_string()
}
fn default_higher_is_better() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExtractedEntities {
    #[serde(default)]
    pub concepts: Vec<ExtractedConcept>,
    #[serde(default)]
    pub methods: Vec<ExtractedMethod>,
    #[serde(default)]
    pub datasets: Vec<ExtractedDataset>,
    #[serde(default)]
    pub metrics: Vec<ExtractedMetric>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
            && self.methods.is_empty()
            && self.datasets.is_empty()
            && self.metrics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.concepts.len() + self.methods.len() + self.datasets.len() + self.metrics.len()
    }
}

/// Outcome of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found(ExtractedEntities),
    /// The model answered but named nothing.
    Nothing,
    /// Every attempt failed; carries the last error message.
    Failed(String),
}

pub struct EntityExtractor {
    generator: Arc<dyn Generator>,
    model: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl EntityExtractor {
    pub fn new(
        generator: Arc<dyn Generator>,
        model: impl Into<String>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            generator,
            model: model.into(),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub async fn extract(&self, arxiv_id: &str, title: &str, abstract_text: &str) -> Extraction {
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::user(build_prompt(title, abstract_text))],
        )
        .temperature(0.0)
        .max_tokens(2000);

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let outcome = match self.generator.complete(&request).await {
                Ok(completion) => parse_entities(&completion.text),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(entities) if entities.is_empty() => return Extraction::Nothing,
                Ok(entities) => return Extraction::Found(entities),
                Err(e) => {
                    tracing::warn!(%arxiv_id, attempt, error = %e, "entity extraction attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Extraction::Failed(last_error)
    }
}

pub fn build_prompt(title: &str, abstract_text: &str) -> String {
    let abstract_text: String = abstract_text.chars().take(MAX_ABSTRACT_CHARS).collect();
    format!(
        r#"You are an AI research expert. Analyze this academic paper and extract structured information.

Paper Title: {title}
Abstract: {abstract_text}

Extract the following entities from the paper:

1. **Concepts**: High-level AI/ML concepts introduced or heavily featured (e.g., "Transformer", "Self-Attention", "Reinforcement Learning")
2. **Methods**: Specific techniques, algorithms, or approaches (e.g., "Multi-Head Attention", "Adam Optimizer", "Dropout")
3. **Datasets**: Datasets mentioned for training or evaluation (e.g., "ImageNet", "GLUE", "CIFAR-10")
4. **Metrics**: Evaluation metrics used (e.g., "BLEU", "Accuracy", "F1 Score", "Perplexity")

Return ONLY a valid JSON object with this exact structure:
{{
  "concepts": [
    {{"name": "concept name", "category": "Architecture|Training|Evaluation|Other", "confidence": 0.0-1.0}}
  ],
  "methods": [
    {{"name": "method name", "algorithm_type": "optimization|regularization|attention|other"}}
  ],
  "datasets": [
    {{"name": "dataset name", "domain": "Computer Vision|NLP|Audio|Other"}}
  ],
  "metrics": [
    {{"name": "metric name", "higher_is_better": true|false}}
  ]
}}

Rules:
- Only extract entities explicitly mentioned in the text
- Use standard naming (e.g., "BERT" not "bert" or "Bert")
- Confidence: 1.0 for explicit mentions, 0.7-0.9 for implied
- Return empty arrays if no entities found
- Do not include explanations, only the JSON
"#
    )
}

/// Parse a model reply, tolerating a markdown code fence around the JSON.
pub fn parse_entities(raw: &str) -> Result<ExtractedEntities> {
    let body = strip_code_fence(raw.trim());
    if let Ok(entities) = serde_json::from_str::<ExtractedEntities>(body) {
        return Ok(entities);
    }

    // Prose around the object: retry on the outermost braces.
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<ExtractedEntities>(&body[start..=end])
                .map_err(|e| Error::Extraction(format!("unparsable entity JSON: {}", e)))
        }
        _ => Err(Error::Extraction(format!(
            "no JSON object in reply: {}",
            body.chars().take(80).collect::<String>()
        ))),
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.find("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// Write extracted entities as nodes linked from `paper`.
///
/// Returns the number of edges newly created.
pub async fn write_entities(
    store: &GraphStore,
    paper: &NodeRef,
    entities: &ExtractedEntities,
) -> Result<usize> {
    let mut created = 0;

    for c in &entities.concepts {
        let Some(node) = entity_node(store, NodeLabel::Concept, &c.name, |u| {
            u.on_create("category", c.category.clone())
        })
        .await?
        else {
            continue;
        };
        let confidence = c.confidence.clamp(0.0, 1.0);
        created += link(
            store,
            EdgeUpsert::new(paper, EdgeType::Introduces, &node).on_create("confidence", confidence),
        )
        .await?;
    }

    for m in &entities.methods {
        let Some(node) = entity_node(store, NodeLabel::Method, &m.name, |u| {
            u.on_create("algorithm_type", m.algorithm_type.clone())
        })
        .await?
        else {
            continue;
        };
        created += link(
            store,
            EdgeUpsert::new(paper, EdgeType::Proposes, &node).on_create("is_primary", true),
        )
        .await?;
    }

    for d in &entities.datasets {
        let Some(node) = entity_node(store, NodeLabel::Dataset, &d.name, |u| {
            u.on_create("domain", d.domain.clone())
        })
        .await?
        else {
            continue;
        };
        created += link(store, EdgeUpsert::new(paper, EdgeType::EvaluatesOn, &node)).await?;
    }

    for m in &entities.metrics {
        let Some(node) = entity_node(store, NodeLabel::Metric, &m.name, |u| {
            u.on_create("higher_is_better", m.higher_is_better)
        })
        .await?
        else {
            continue;
        };
        created += link(store, EdgeUpsert::new(paper, EdgeType::UsesMetric, &node)).await?;
    }

    Ok(created)
}

async fn entity_node(
    store: &GraphStore,
    label: NodeLabel,
    name: &str,
    extra: impl FnOnce(NodeUpsert) -> NodeUpsert,
) -> Result<Option<NodeRef>> {
    let key = entity_key(name);
    if key.is_empty() {
        return Ok(None);
    }
    let upsert = extra(
        NodeUpsert::new(label, key)
            .on_create("name", name.trim())
            .on_create("description", ""),
    );
    upsert_node(store, &upsert).await.map(Some)
}

async fn link(store: &GraphStore, edge: EdgeUpsert) -> Result<usize> {
    Ok(usize::from(upsert_edge(store, &edge).await?.created))
}
