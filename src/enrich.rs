//! Enrichment orchestrator.
//!
//! A pass selects papers missing its flag, asks a worker for data about
//! each one, writes what came back through the resolver, and sets the
//! flag. Passes are sequential per source and separated by a fixed delay.
//!
//! | Pass | Worker | No match | Failure | Delay |
//! |------|--------|----------|---------|-------|
//! | `authors` | arXiv lookup by id | retry | retry | 1500 ms |
//! | `entities` | LLM extraction | mark | mark | 1000 ms |
//! | `hub` | hub metadata + repos | mark, `on_hub = false` | retry | 2000 ms |
//!
//! "mark" sets the flag anyway so the paper is not selected again;
//! "retry" leaves it unset for the next run. Both are overridable per pass
//! under `[enrichment.<pass>]`.
//!
//! A failing paper never aborts the batch.

use anyhow::Result as CliResult;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, EnrichmentConfig, PassPolicy};
use crate::connector_arxiv::ArxivConnector;
use crate::connector_hub::HubConnector;
use crate::entities::{write_entities, EntityExtractor, ExtractedEntities, Extraction};
use crate::error::{Error, Result};
use crate::ingest::link_authors;
use crate::llm::create_generator;
use crate::models::{
    ArtifactRecord, EdgeType, EnrichmentPass, HubPaperMetadata, HubRepos, NodeLabel, Paper,
};
use crate::resolver::{upsert_edge, upsert_node, EdgeUpsert, NodeRef, NodeUpsert};
use crate::sources::{HubSource, PaperSource};
use crate::store::GraphStore;

/// What a worker found for one paper.
#[derive(Debug)]
pub enum WorkOutcome<T> {
    Found(T),
    NoMatch,
}

/// Pass-specific half of an enrichment pass.
#[async_trait]
pub trait EnrichmentWorker: Send + Sync {
    type Output: Send;

    fn pass(&self) -> EnrichmentPass;

    /// Call the external source. Only [`Error::Upstream`] failures are
    /// retried by the orchestrator.
    async fn fetch(&self, paper: &Paper) -> Result<WorkOutcome<Self::Output>>;

    async fn write(&self, store: &GraphStore, paper: &Paper, output: Self::Output) -> Result<()>;

    /// Record a "looked, found nothing" result on the paper.
    async fn write_no_match(&self, _store: &GraphStore, _paper: &Paper) -> Result<()> {
        Ok(())
    }
}

/// Effective settings for one pass after applying config overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSettings {
    pub request_delay: Duration,
    pub on_no_match: PassPolicy,
    pub on_failure: PassPolicy,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl PassSettings {
    pub fn resolve(pass: EnrichmentPass, config: &EnrichmentConfig) -> Self {
        let (delay_ms, no_match, failure, overrides) = match pass {
            EnrichmentPass::Authors => {
                (1500, PassPolicy::Retry, PassPolicy::Retry, &config.authors)
            }
            EnrichmentPass::Entities => {
                (1000, PassPolicy::Mark, PassPolicy::Mark, &config.entities)
            }
            EnrichmentPass::Hub => (2000, PassPolicy::Mark, PassPolicy::Retry, &config.hub),
        };
        Self {
            request_delay: Duration::from_millis(overrides.request_delay_ms.unwrap_or(delay_ms)),
            on_no_match: overrides.on_no_match.unwrap_or(no_match),
            on_failure: overrides.on_failure.unwrap_or(failure),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Counters for one pass run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub selected: usize,
    pub enriched: usize,
    pub no_match: usize,
    pub failed: usize,
    /// Flags newly set, whatever the outcome.
    pub marked: usize,
}

/// Run one pass over up to `limit` papers.
///
/// Errors only when the selection query itself fails.
pub async fn run_pass<W: EnrichmentWorker + ?Sized>(
    store: &GraphStore,
    worker: &W,
    settings: &PassSettings,
    limit: usize,
) -> Result<PassReport> {
    let pass = worker.pass();
    let papers = store.papers_missing_pass(pass, limit).await?;
    let mut report = PassReport {
        selected: papers.len(),
        ..Default::default()
    };
    tracing::info!(%pass, selected = papers.len(), "enrichment pass started");

    for (idx, paper) in papers.iter().enumerate() {
        if idx > 0 && !settings.request_delay.is_zero() {
            tokio::time::sleep(settings.request_delay).await;
        }

        let arxiv_id = paper.arxiv_id.as_str();
        let mark = match fetch_with_retry(worker, paper, settings).await {
            Ok(WorkOutcome::Found(output)) => match worker.write(store, paper, output).await {
                Ok(()) => {
                    report.enriched += 1;
                    true
                }
                Err(e) => {
                    // Partially written; the flag stays unset whatever the policy.
                    tracing::warn!(%pass, %arxiv_id, error = %e, "failed to write enrichment");
                    report.failed += 1;
                    false
                }
            },
            Ok(WorkOutcome::NoMatch) => {
                report.no_match += 1;
                if let Err(e) = worker.write_no_match(store, paper).await {
                    tracing::warn!(%pass, %arxiv_id, error = %e, "failed to record no-match");
                }
                tracing::info!(%pass, %arxiv_id, "no match");
                settings.on_no_match == PassPolicy::Mark
            }
            Err(e) => {
                tracing::warn!(%pass, %arxiv_id, error = %e, "enrichment failed");
                report.failed += 1;
                settings.on_failure == PassPolicy::Mark
            }
        };

        if mark {
            match store.mark_pass_complete(arxiv_id, pass, Utc::now()).await {
                Ok(true) => report.marked += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(%pass, %arxiv_id, error = %e, "failed to set enrichment flag")
                }
            }
        } else if let Err(e) = store.record_pass_attempt(arxiv_id, pass, Utc::now()).await {
            tracing::warn!(%pass, %arxiv_id, error = %e, "failed to record attempt");
        }
    }

    tracing::info!(
        %pass,
        enriched = report.enriched,
        no_match = report.no_match,
        failed = report.failed,
        "enrichment pass finished"
    );
    Ok(report)
}

async fn fetch_with_retry<W: EnrichmentWorker + ?Sized>(
    worker: &W,
    paper: &Paper,
    settings: &PassSettings,
) -> Result<WorkOutcome<W::Output>> {
    let mut attempt = 1;
    loop {
        match worker.fetch(paper).await {
            Err(e @ Error::Upstream { .. }) if attempt < settings.max_attempts => {
                tracing::debug!(
                    pass = %worker.pass(),
                    arxiv_id = %paper.arxiv_id,
                    attempt,
                    error = %e,
                    "retrying enrichment fetch"
                );
                attempt += 1;
                tokio::time::sleep(settings.retry_delay).await;
            }
            other => return other,
        }
    }
}

fn paper_ref(paper: &Paper) -> NodeRef {
    NodeRef::existing(NodeLabel::Paper, paper.arxiv_id.clone())
}

// ============ Authors ============

/// Looks a paper up in the academic feed and links its authors.
pub struct AuthorWorker {
    source: Arc<dyn PaperSource>,
}

impl AuthorWorker {
    pub fn new(source: Arc<dyn PaperSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl EnrichmentWorker for AuthorWorker {
    type Output = Vec<String>;

    fn pass(&self) -> EnrichmentPass {
        EnrichmentPass::Authors
    }

    async fn fetch(&self, paper: &Paper) -> Result<WorkOutcome<Vec<String>>> {
        match self.source.lookup(&paper.arxiv_id).await? {
            Some(record) if !record.authors.is_empty() => Ok(WorkOutcome::Found(record.authors)),
            _ => Ok(WorkOutcome::NoMatch),
        }
    }

    async fn write(&self, store: &GraphStore, paper: &Paper, authors: Vec<String>) -> Result<()> {
        link_authors(store, &paper_ref(paper), &authors).await?;
        Ok(())
    }
}

// ============ Entities ============

/// Extracts concepts, methods, datasets and metrics with the LLM.
pub struct EntityWorker {
    extractor: EntityExtractor,
}

impl EntityWorker {
    pub fn new(extractor: EntityExtractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl EnrichmentWorker for EntityWorker {
    type Output = ExtractedEntities;

    fn pass(&self) -> EnrichmentPass {
        EnrichmentPass::Entities
    }

    async fn fetch(&self, paper: &Paper) -> Result<WorkOutcome<ExtractedEntities>> {
        match self
            .extractor
            .extract(&paper.arxiv_id, &paper.title, &paper.abstract_text)
            .await
        {
            Extraction::Found(entities) => Ok(WorkOutcome::Found(entities)),
            Extraction::Nothing => Ok(WorkOutcome::NoMatch),
            Extraction::Failed(msg) => Err(Error::Extraction(msg)),
        }
    }

    async fn write(
        &self,
        store: &GraphStore,
        paper: &Paper,
        entities: ExtractedEntities,
    ) -> Result<()> {
        let created = write_entities(store, &paper_ref(paper), &entities).await?;
        tracing::info!(
            arxiv_id = %paper.arxiv_id,
            concepts = entities.concepts.len(),
            methods = entities.methods.len(),
            datasets = entities.datasets.len(),
            metrics = entities.metrics.len(),
            edges_created = created,
            "entities written"
        );
        Ok(())
    }
}

// ============ Hub ============

/// Pulls hub metadata and linked artifacts for a paper.
pub struct HubWorker {
    hub: Arc<dyn HubSource>,
}

impl HubWorker {
    pub fn new(hub: Arc<dyn HubSource>) -> Self {
        Self { hub }
    }
}

const HUB_SOURCE: &str = "huggingface";

#[async_trait]
impl EnrichmentWorker for HubWorker {
    type Output = (HubPaperMetadata, HubRepos);

    fn pass(&self) -> EnrichmentPass {
        EnrichmentPass::Hub
    }

    async fn fetch(&self, paper: &Paper) -> Result<WorkOutcome<(HubPaperMetadata, HubRepos)>> {
        let Some(metadata) = self.hub.paper_metadata(&paper.arxiv_id).await? else {
            return Ok(WorkOutcome::NoMatch);
        };
        let repos = self.hub.paper_repos(&paper.arxiv_id).await?;
        Ok(WorkOutcome::Found((metadata, repos)))
    }

    async fn write(
        &self,
        store: &GraphStore,
        paper: &Paper,
        (metadata, repos): (HubPaperMetadata, HubRepos),
    ) -> Result<()> {
        let mut update = NodeUpsert::new(NodeLabel::Paper, paper.arxiv_id.clone())
            .on_match(
                "hub_url",
                format!("https://huggingface.co/papers/{}", paper.arxiv_id),
            )
            .on_match("hub_keywords", metadata.keywords.clone())
            .on_match("on_hub", true);
        if let Some(upvotes) = metadata.upvotes {
            update = update.on_match("hub_upvotes", upvotes);
        }
        if let Some(ref id) = metadata.discussion_id {
            update = update.on_match("hub_discussion_id", id.clone());
        }
        if let Some(ref summary) = metadata.ai_summary {
            update = update.on_match("hub_ai_summary", summary.clone());
        }
        if let Some(ref published) = metadata.published_at {
            update = update.on_match("hub_published_at", published.clone());
        }
        let paper_node = upsert_node(store, &update).await?;

        if let Some(ref repo) = metadata.repository {
            let node = upsert_node(
                store,
                &NodeUpsert::new(NodeLabel::Repository, repo.url.clone())
                    .on_create("name", repo.name.clone())
                    .on_create("source", repo.source.clone())
                    .always("stars", repo.stars),
            )
            .await?;
            upsert_edge(
                store,
                &EdgeUpsert::new(&node, EdgeType::Implements, &paper_node)
                    .on_create("source", repo.source.clone()),
            )
            .await?;
        }

        for artifact in repos.all() {
            write_artifact(store, &paper_node, artifact).await?;
        }

        tracing::info!(
            arxiv_id = %paper.arxiv_id,
            upvotes = ?metadata.upvotes,
            models = repos.models.len(),
            datasets = repos.datasets.len(),
            spaces = repos.spaces.len(),
            "hub metadata written"
        );
        Ok(())
    }

    async fn write_no_match(&self, store: &GraphStore, paper: &Paper) -> Result<()> {
        upsert_node(
            store,
            &NodeUpsert::new(NodeLabel::Paper, paper.arxiv_id.clone()).on_match("on_hub", false),
        )
        .await?;
        Ok(())
    }
}

async fn write_artifact(
    store: &GraphStore,
    paper: &NodeRef,
    artifact: &ArtifactRecord,
) -> Result<()> {
    let mut upsert = NodeUpsert::new(artifact.kind.label(), artifact.hub_id.clone())
        .on_create("name", artifact.hub_id.clone())
        .on_create("url", artifact.kind.url(&artifact.hub_id))
        .always("likes", artifact.likes);
    if let Some(downloads) = artifact.downloads {
        upsert = upsert.always("downloads", downloads);
    }
    if let Some(ref author) = artifact.author {
        upsert = upsert.on_create("author", author.clone());
    }
    if let Some(ref sdk) = artifact.sdk {
        upsert = upsert.on_create("sdk", sdk.clone());
    }
    let node = upsert_node(store, &upsert).await?;
    upsert_edge(
        store,
        &EdgeUpsert::new(&node, artifact.kind.edge_type(), paper).on_create("source", HUB_SOURCE),
    )
    .await?;
    Ok(())
}

// ============ CLI ============

/// CLI entry point for `rgraph enrich <pass>`.
pub async fn run_enrich(config: &Config, pass: EnrichmentPass, limit: Option<usize>) -> CliResult<()> {
    let store = GraphStore::open(&config.db).await?;
    let settings = PassSettings::resolve(pass, &config.enrichment);
    let limit = limit.unwrap_or(config.enrichment.batch_size);

    let report = match pass {
        EnrichmentPass::Authors => {
            let source = Arc::new(ArxivConnector::new(&config.connectors.arxiv)?);
            run_pass(&store, &AuthorWorker::new(source), &settings, limit).await?
        }
        EnrichmentPass::Entities => {
            if !config.llm.is_enabled() {
                anyhow::bail!("entity extraction requires an llm provider; set [llm] provider");
            }
            let generator = create_generator(&config.llm)?;
            let extractor = EntityExtractor::new(
                generator,
                config.llm.extraction_model.clone(),
                settings.max_attempts,
                settings.retry_delay,
            );
            run_pass(&store, &EntityWorker::new(extractor), &settings, limit).await?
        }
        EnrichmentPass::Hub => {
            let hub = Arc::new(HubConnector::new(&config.connectors.hub)?);
            run_pass(&store, &HubWorker::new(hub), &settings, limit).await?
        }
    };

    println!("enrich {}", pass);
    println!("  selected: {}", report.selected);
    println!("  enriched: {}", report.enriched);
    println!("  no match: {}", report.no_match);
    println!("  failed: {}", report.failed);
    println!("  flags set: {}", report.marked);
    println!("ok");

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PassOverrides;

    #[test]
    fn test_default_policies_per_pass() {
        let config = EnrichmentConfig::default();

        let authors = PassSettings::resolve(EnrichmentPass::Authors, &config);
        assert_eq!(authors.on_no_match, PassPolicy::Retry);
        assert_eq!(authors.on_failure, PassPolicy::Retry);
        assert_eq!(authors.request_delay, Duration::from_millis(1500));

        let entities = PassSettings::resolve(EnrichmentPass::Entities, &config);
        assert_eq!(entities.on_no_match, PassPolicy::Mark);
        assert_eq!(entities.on_failure, PassPolicy::Mark);

        let hub = PassSettings::resolve(EnrichmentPass::Hub, &config);
        assert_eq!(hub.on_no_match, PassPolicy::Mark);
        assert_eq!(hub.on_failure, PassPolicy::Retry);
        assert_eq!(hub.request_delay, Duration::from_millis(2000));
        assert_eq!(hub.max_attempts, 3);
    }

    #[test]
    fn test_overrides_apply() {
        let config = EnrichmentConfig {
            hub: PassOverrides {
                request_delay_ms: Some(0),
                on_no_match: Some(PassPolicy::Retry),
                on_failure: None,
            },
            ..EnrichmentConfig::default()
        };
        let hub = PassSettings::resolve(EnrichmentPass::Hub, &config);
        assert_eq!(hub.request_delay, Duration::ZERO);
        assert_eq!(hub.on_no_match, PassPolicy::Retry);
        assert_eq!(hub.on_failure, PassPolicy::Retry);
    }
}
