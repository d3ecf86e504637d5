//! Connector traits.
//!
//! Connectors turn one external feed into [`PaperRecord`]s or hub
//! metadata. They never write to the graph; [`crate::ingest`] and
//! [`crate::enrich`] do that with what they return. Tests substitute
//! fixture implementations.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{HubPaperMetadata, HubRepos, PaperRecord};

/// An academic-repository metadata feed.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Short provenance tag written to created papers, e.g. `"arxiv"`.
    fn name(&self) -> &str;

    /// Up to `max_results` papers matching `query`, newest first.
    ///
    /// A malformed entry is skipped; only a failure of the feed itself
    /// is an error.
    async fn fetch_papers(&self, query: &str, max_results: usize) -> Result<Vec<PaperRecord>>;

    /// One paper by version-free identifier. `Ok(None)` when the feed
    /// does not know it.
    async fn lookup(&self, base_id: &str) -> Result<Option<PaperRecord>>;
}

/// A model hub that links papers to models, datasets and demos.
#[async_trait]
pub trait HubSource: Send + Sync {
    /// Hub page metadata for a paper. `Ok(None)` when the hub has no page.
    async fn paper_metadata(&self, base_id: &str) -> Result<Option<HubPaperMetadata>>;

    /// Artifacts citing the paper. Empty when the hub knows none.
    async fn paper_repos(&self, base_id: &str) -> Result<HubRepos>;
}
