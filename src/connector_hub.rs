//! Hugging Face hub connector.
//!
//! Four JSON endpoints under `{base_url}`:
//!
//! | Endpoint | Used for | 404 means |
//! |----------|----------|-----------|
//! | `GET /papers/{id}` | paper page metadata, linked GitHub repo | no page |
//! | `GET /arxiv/{id}/repos` | models, datasets, spaces citing the paper | none |
//! | `GET /daily_papers?date=` | daily listing for `ingest hub-daily` | error |
//! | `GET /papers/search?q=` | search listing for `ingest hub-search` | error |
//!
//! Listing items are sometimes wrapped in a `paper` object and sometimes
//! not; both shapes are accepted. An item that does not decode is skipped.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::config::HubConnectorConfig;
use crate::error::{Error, Result};
use crate::models::{
    base_id, ArtifactKind, ArtifactRecord, HubPaperMetadata, HubRepos, PaperRecord,
    RepositoryRecord,
};
use crate::sources::HubSource;

const SOURCE_NAME: &str = "huggingface";

pub struct HubConnector {
    client: reqwest::Client,
    config: HubConnectorConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaperJson {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    upvotes: Option<i64>,
    published_at: Option<String>,
    discussion_id: Option<String>,
    #[serde(rename = "ai_summary")]
    ai_summary: Option<String>,
    #[serde(rename = "ai_keywords", default)]
    ai_keywords: Vec<String>,
    github_repo: Option<String>,
    #[serde(default)]
    github_stars: i64,
    #[serde(default)]
    authors: Vec<AuthorJson>,
}

#[derive(Debug, Deserialize)]
struct AuthorJson {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReposJson {
    #[serde(default)]
    models: Vec<ArtifactJson>,
    #[serde(default)]
    datasets: Vec<ArtifactJson>,
    #[serde(default)]
    spaces: Vec<ArtifactJson>,
}

#[derive(Debug, Deserialize)]
struct ArtifactJson {
    id: String,
    #[serde(default)]
    likes: i64,
    downloads: Option<i64>,
    author: Option<String>,
    sdk: Option<String>,
}

impl HubConnector {
    pub fn new(config: &HubConnectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("research-graph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("hub http client: {}", e)))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Pause callers should leave between listing requests.
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.config.request_delay_ms)
    }

    /// GET a JSON document. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| Error::upstream(SOURCE_NAME, e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::upstream(
                SOURCE_NAME,
                format!("HTTP {} from {}", resp.status(), path),
            ));
        }

        let body = resp
            .json::<T>()
            .await
            .map_err(|e| Error::upstream(SOURCE_NAME, format!("bad body from {}: {}", path, e)))?;
        Ok(Some(body))
    }

    /// Papers featured on one day, at most `max_results`.
    pub async fn daily_papers(&self, date: NaiveDate, max_results: usize) -> Result<Vec<PaperRecord>> {
        let items: Vec<serde_json::Value> = self
            .get_json(
                "/daily_papers",
                &[
                    ("date", date.format("%Y-%m-%d").to_string()),
                    ("limit", max_results.to_string()),
                ],
            )
            .await?
            .ok_or_else(|| Error::upstream(SOURCE_NAME, "daily_papers returned 404"))?;
        Ok(listing_records(items, max_results))
    }

    /// Free-text paper search, at most `max_results`.
    pub async fn search_papers(&self, query: &str, max_results: usize) -> Result<Vec<PaperRecord>> {
        let items: Vec<serde_json::Value> = self
            .get_json(
                "/papers/search",
                &[("q", query.to_string()), ("limit", max_results.to_string())],
            )
            .await?
            .ok_or_else(|| Error::upstream(SOURCE_NAME, "papers/search returned 404"))?;
        Ok(listing_records(items, max_results))
    }
}

#[async_trait]
impl HubSource for HubConnector {
    async fn paper_metadata(&self, base_id: &str) -> Result<Option<HubPaperMetadata>> {
        let paper: Option<PaperJson> = self.get_json(&format!("/papers/{}", base_id), &[]).await?;
        Ok(paper.map(metadata_from_json))
    }

    async fn paper_repos(&self, base_id: &str) -> Result<HubRepos> {
        let repos: ReposJson = self
            .get_json(&format!("/arxiv/{}/repos", base_id), &[])
            .await?
            .unwrap_or_default();
        Ok(repos_from_json(repos, self.config.max_artifacts))
    }
}

fn metadata_from_json(paper: PaperJson) -> HubPaperMetadata {
    let repository = paper
        .github_repo
        .filter(|url| !url.trim().is_empty())
        .map(|url| RepositoryRecord {
            name: repo_name(&url),
            url,
            stars: paper.github_stars,
            source: SOURCE_NAME.to_string(),
        });

    HubPaperMetadata {
        upvotes: paper.upvotes,
        discussion_id: paper.discussion_id,
        ai_summary: paper.ai_summary,
        keywords: paper.ai_keywords,
        published_at: paper.published_at,
        repository,
    }
}

fn repos_from_json(repos: ReposJson, max_artifacts: usize) -> HubRepos {
    let convert = |items: Vec<ArtifactJson>, kind: ArtifactKind| -> Vec<ArtifactRecord> {
        items
            .into_iter()
            .filter(|a| !a.id.is_empty())
            .take(max_artifacts)
            .map(|a| ArtifactRecord {
                kind,
                hub_id: a.id,
                likes: a.likes,
                downloads: a.downloads,
                author: a.author,
                sdk: a.sdk,
            })
            .collect()
    };

    HubRepos {
        models: convert(repos.models, ArtifactKind::Model),
        datasets: convert(repos.datasets, ArtifactKind::Dataset),
        spaces: convert(repos.spaces, ArtifactKind::Space),
    }
}

/// `https://github.com/org/repo/` → `org/repo`.
fn repo_name(url: &str) -> String {
    url.trim()
        .trim_start_matches("https://github.com/")
        .trim_start_matches("http://github.com/")
        .trim_matches('/')
        .to_string()
}

/// Decodable items in listing order, capped at `max_results`.
fn listing_records(items: Vec<serde_json::Value>, max_results: usize) -> Vec<PaperRecord> {
    items
        .into_iter()
        .filter_map(|item| {
            let inner = match item.get("paper") {
                Some(p) if p.is_object() => p.clone(),
                _ => item,
            };
            match serde_json::from_value::<PaperJson>(inner) {
                Ok(p) if !p.id.trim().is_empty() && !p.title.trim().is_empty() => {
                    Some(record_from_listing(p))
                }
                Ok(p) => {
                    tracing::warn!(id = %p.id, "skipping hub listing item without id or title");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable hub listing item");
                    None
                }
            }
        })
        .take(max_results)
        .collect()
}

fn record_from_listing(p: PaperJson) -> PaperRecord {
    let raw_id = p.id.trim().to_string();
    let published_date = p
        .published_at
        .as_deref()
        .and_then(|d| d.get(..10))
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

    PaperRecord {
        base_id: base_id(&raw_id).to_string(),
        title: p.title.split_whitespace().collect::<Vec<_>>().join(" "),
        abstract_text: p.summary.trim().to_string(),
        published_date,
        categories: Vec::new(),
        pdf_url: Some(format!("https://arxiv.org/pdf/{}", raw_id)),
        authors: p
            .authors
            .into_iter()
            .map(|a| a.name.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect(),
        source: SOURCE_NAME.to_string(),
        on_hub: true,
        hub_upvotes: p.upvotes,
        raw_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_with_github_repo() {
        let paper: PaperJson = serde_json::from_value(json!({
            "id": "2301.00001",
            "title": "T",
            "upvotes": 42,
            "discussionId": "abc",
            "ai_summary": "short",
            "ai_keywords": ["llm", "rag"],
            "publishedAt": "2023-01-01T00:00:00.000Z",
            "githubRepo": "https://github.com/org/repo",
            "githubStars": 120
        }))
        .unwrap();
        let meta = metadata_from_json(paper);
        assert_eq!(meta.upvotes, Some(42));
        assert_eq!(meta.keywords, vec!["llm", "rag"]);
        let repo = meta.repository.unwrap();
        assert_eq!(repo.name, "org/repo");
        assert_eq!(repo.stars, 120);
        assert_eq!(repo.source, "huggingface");
    }

    #[test]
    fn test_metadata_without_repo() {
        let paper: PaperJson = serde_json::from_value(json!({ "id": "1" })).unwrap();
        let meta = metadata_from_json(paper);
        assert_eq!(meta.upvotes, None);
        assert!(meta.repository.is_none());
    }

    #[test]
    fn test_repos_capped_per_kind() {
        let models: Vec<_> = (0..15)
            .map(|i| json!({ "id": format!("org/model-{}", i), "likes": i }))
            .collect();
        let repos: ReposJson = serde_json::from_value(json!({
            "models": models,
            "spaces": [{ "id": "org/demo", "likes": 3, "sdk": "gradio" }]
        }))
        .unwrap();
        let repos = repos_from_json(repos, 10);
        assert_eq!(repos.models.len(), 10);
        assert!(repos.datasets.is_empty());
        assert_eq!(repos.spaces[0].sdk.as_deref(), Some("gradio"));
        assert_eq!(repos.spaces[0].kind, ArtifactKind::Space);
        assert_eq!(repos.all().count(), 11);
    }

    #[test]
    fn test_listing_accepts_wrapped_and_flat_items() {
        let items = vec![
            json!({ "paper": { "id": "2301.00001v2", "title": "Wrapped", "summary": " s ",
                               "publishedAt": "2023-01-05T10:00:00Z", "upvotes": 7,
                               "authors": [{ "name": "Ada Lovelace" }] } }),
            json!({ "id": "2301.00002", "title": "Flat" }),
            json!({ "paper": { "title": "No id" } }),
            json!({ "id": "2301.00003", "title": "  " }),
        ];
        let records = listing_records(items, 10);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].base_id, "2301.00001");
        assert_eq!(records[0].raw_id, "2301.00001v2");
        assert_eq!(records[0].abstract_text, "s");
        assert_eq!(records[0].hub_upvotes, Some(7));
        assert_eq!(records[0].authors, vec!["Ada Lovelace"]);
        assert_eq!(records[0].published_date, NaiveDate::from_ymd_opt(2023, 1, 5));
        assert_eq!(records[1].title, "Flat");
        assert_eq!(records[1].source, "huggingface");
        assert!(records[1].on_hub);
        assert_eq!(records[1].hub_upvotes, None);
    }

    #[test]
    fn test_listing_capped_after_skipping_bad_items() {
        let mut items = vec![json!({ "paper": { "title": "No id" } })];
        items.extend((1..=6).map(|i| json!({ "id": format!("2301.0000{}", i), "title": "P" })));
        let records = listing_records(items, 4);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].base_id, "2301.00001");
        assert_eq!(records[3].base_id, "2301.00004");
    }
}
