//! TOML configuration.
//!
//! Every section is optional; missing sections and fields fall back to the
//! defaults below, so an empty file is a valid (offline) configuration.
//!
//! ```toml
//! [db]
//! path = "./data/graph.sqlite"
//! max_connections = 10
//!
//! [llm]
//! provider = "openai"
//! chat_model = "gpt-4o-mini"
//!
//! [enrichment.hub]
//! on_no_match = "mark"
//! on_failure = "retry"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

impl Config {
    /// Defaults only. Used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/graph.sqlite")
}
fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` (any OpenAI-compatible endpoint) or `"disabled"`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_term_model")]
    pub term_model: String,
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            chat_model: default_chat_model(),
            term_model: default_term_model(),
            extraction_model: default_extraction_model(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_term_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Cap on papers, concepts and methods in one grounding context.
    #[serde(default = "default_per_category_limit")]
    pub per_category_limit: usize,
    /// Conversation turns kept when assembling a prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_max_terms")]
    pub max_terms: usize,
    /// Known domain terms used when the term extractor cannot reach the LLM.
    #[serde(default = "default_fallback_vocabulary")]
    pub fallback_vocabulary: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            per_category_limit: default_per_category_limit(),
            history_turns: default_history_turns(),
            max_terms: default_max_terms(),
            fallback_vocabulary: default_fallback_vocabulary(),
        }
    }
}

fn default_per_category_limit() -> usize {
    5
}
fn default_history_turns() -> usize {
    10
}
fn default_max_terms() -> usize {
    3
}

pub fn default_fallback_vocabulary() -> Vec<String> {
    [
        "transformer",
        "attention",
        "bert",
        "gpt",
        "vision",
        "language model",
        "neural network",
        "deep learning",
        "reinforcement learning",
        "nlp",
        "computer vision",
        "diffusion",
        "gan",
        "vit",
        "llm",
        "convolution",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub arxiv: ArxivConnectorConfig,
    #[serde(default)]
    pub hub: HubConnectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArxivConnectorConfig {
    #[serde(default = "default_arxiv_base_url")]
    pub base_url: String,
    #[serde(default = "default_arxiv_query")]
    pub default_query: String,
    /// Entries requested per feed page.
    #[serde(default = "default_arxiv_page_size")]
    pub page_size: usize,
    /// Upper bound on entries fetched by one invocation.
    #[serde(default = "default_arxiv_max_results")]
    pub max_results: usize,
    /// Pause between feed pages.
    #[serde(default = "default_arxiv_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_connector_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ArxivConnectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_arxiv_base_url(),
            default_query: default_arxiv_query(),
            page_size: default_arxiv_page_size(),
            max_results: default_arxiv_max_results(),
            page_delay_ms: default_arxiv_page_delay_ms(),
            timeout_secs: default_connector_timeout_secs(),
        }
    }
}

fn default_arxiv_base_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}
fn default_arxiv_query() -> String {
    "cat:cs.LG".to_string()
}
fn default_arxiv_page_size() -> usize {
    50
}
fn default_arxiv_max_results() -> usize {
    100
}
fn default_arxiv_page_delay_ms() -> u64 {
    3000
}
fn default_connector_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct HubConnectorConfig {
    #[serde(default = "default_hub_base_url")]
    pub base_url: String,
    /// Per-kind cap on linked models, datasets and spaces.
    #[serde(default = "default_max_artifacts")]
    pub max_artifacts: usize,
    /// Upper bound on papers taken from one listing invocation.
    #[serde(default = "default_hub_max_results")]
    pub max_results: usize,
    /// Pause between listing requests (daily pages, search queries).
    #[serde(default = "default_hub_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_connector_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HubConnectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_hub_base_url(),
            max_artifacts: default_max_artifacts(),
            max_results: default_hub_max_results(),
            request_delay_ms: default_hub_request_delay_ms(),
            timeout_secs: default_connector_timeout_secs(),
        }
    }
}

fn default_hub_base_url() -> String {
    "https://huggingface.co/api".to_string()
}
fn default_max_artifacts() -> usize {
    10
}
fn default_hub_max_results() -> usize {
    100
}
fn default_hub_request_delay_ms() -> u64 {
    2000
}

/// What an enrichment pass does with a paper's flag when the worker comes
/// back empty-handed.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PassPolicy {
    /// Set the flag anyway: the paper counts as attempted and is not selected again.
    Mark,
    /// Leave the flag unset so the next run picks the paper up again.
    Retry,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    /// Papers selected per pass invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts per external call before the worker gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub authors: PassOverrides,
    #[serde(default)]
    pub entities: PassOverrides,
    #[serde(default)]
    pub hub: PassOverrides,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            authors: PassOverrides::default(),
            entities: PassOverrides::default(),
            hub: PassOverrides::default(),
        }
    }
}

/// Per-pass settings; unset fields use the pass's built-in defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PassOverrides {
    pub request_delay_ms: Option<u64>,
    pub on_no_match: Option<PassPolicy>,
    pub on_failure: Option<PassPolicy>,
}

fn default_batch_size() -> usize {
    100
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    if config.retrieval.per_category_limit == 0 {
        anyhow::bail!("retrieval.per_category_limit must be >= 1");
    }
    if config.retrieval.max_terms == 0 || config.retrieval.max_terms > 10 {
        anyhow::bail!("retrieval.max_terms must be in [1, 10]");
    }

    if config.connectors.arxiv.page_size == 0 || config.connectors.arxiv.page_size > 2000 {
        anyhow::bail!("connectors.arxiv.page_size must be in [1, 2000]");
    }

    if config.enrichment.max_attempts == 0 {
        anyhow::bail!("enrichment.max_attempts must be >= 1");
    }
    if config.enrichment.batch_size == 0 {
        anyhow::bail!("enrichment.batch_size must be >= 1");
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.per_category_limit, 5);
        assert_eq!(config.retrieval.history_turns, 10);
        assert_eq!(config.db.max_connections, 10);
        assert!(!config.llm.is_enabled());
        assert_eq!(config.retrieval.fallback_vocabulary.len(), 16);
    }

    #[test]
    fn test_pass_overrides_parse() {
        let config: Config = toml::from_str(
            r#"
[enrichment]
max_attempts = 5

[enrichment.hub]
on_no_match = "retry"
request_delay_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(config.enrichment.max_attempts, 5);
        assert_eq!(config.enrichment.hub.on_no_match, Some(PassPolicy::Retry));
        assert_eq!(config.enrichment.hub.request_delay_ms, Some(0));
        assert_eq!(config.enrichment.hub.on_failure, None);
        assert_eq!(config.enrichment.authors.on_failure, None);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config: Config = toml::from_str("[llm]\nprovider = \"mystery\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let config: Config = toml::from_str("[retrieval]\nper_category_limit = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }
}
