//! # Research Graph CLI (`rgraph`)
//!
//! ## Usage
//!
//! ```bash
//! rgraph --config ./config/rgraph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rgraph init` | Create the SQLite database and the graph schema |
//! | `rgraph ingest arxiv` | Ingest papers from the arXiv Atom feed |
//! | `rgraph ingest hub-daily` | Ingest the hub's daily papers |
//! | `rgraph ingest hub-search` | Ingest hub search results |
//! | `rgraph enrich <pass>` | Run one enrichment pass (`authors`, `entities`, `hub`) |
//! | `rgraph search "<query>"` | Scored keyword search over papers |
//! | `rgraph get <id>` | Show one paper with authors and entities |
//! | `rgraph papers` | List papers page by page |
//! | `rgraph ask "<question>"` | Ask the assistant, streaming the answer |
//! | `rgraph serve` | Start the HTTP API |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `research_graph=info`).

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use research_graph::config::{self, Config};
use research_graph::ingest::{self, IngestTarget};
use research_graph::models::EnrichmentPass;
use research_graph::store::GraphStore;
use research_graph::{chat, enrich, papers, server};

/// Research Graph CLI: a knowledge graph of research papers with
/// graph-grounded chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "rgraph",
    about = "Research Graph: a research-paper knowledge graph with enrichment and graph-grounded chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest papers from a source.
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },

    /// Run one enrichment pass over papers that have not completed it.
    Enrich {
        /// `authors`, `entities` or `hub`.
        pass: EnrichmentPass,

        /// Maximum number of papers to process (default `enrichment.batch_size`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search papers by keyword.
    Search {
        query: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show a paper by arXiv id (with or without version suffix).
    Get { id: String },

    /// List papers, newest first.
    Papers {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },

    /// Ask the research assistant a question.
    Ask {
        question: String,

        /// Print the retrieved graph context before the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IngestSource {
    /// arXiv Atom feed.
    Arxiv {
        /// Search query (default `connectors.arxiv.default_query`).
        #[arg(long)]
        query: Option<String>,

        /// Maximum number of papers (default `connectors.arxiv.max_results`).
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Hub daily papers for the last N days.
    HubDaily {
        #[arg(long, default_value_t = 1)]
        days: u32,

        /// Maximum number of papers across all days (default `connectors.hub.max_results`).
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Hub paper search.
    HubSearch {
        #[arg(long)]
        query: String,

        /// Maximum number of papers (default `connectors.hub.max_results`).
        #[arg(long)]
        max_results: Option<usize>,
    },
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("research_graph=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = GraphStore::open(&cfg.db).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { source } => {
            let target = match source {
                IngestSource::Arxiv { query, max_results } => {
                    IngestTarget::Arxiv { query, max_results }
                }
                IngestSource::HubDaily { days, max_results } => {
                    IngestTarget::HubDaily { days, max_results }
                }
                IngestSource::HubSearch { query, max_results } => {
                    IngestTarget::HubSearch { query, max_results }
                }
            };
            ingest::run_ingest(&cfg, target).await?;
        }
        Commands::Enrich { pass, limit } => {
            enrich::run_enrich(&cfg, pass, limit).await?;
        }
        Commands::Search { query, limit } => {
            papers::run_search(&cfg, &query, limit).await?;
        }
        Commands::Get { id } => {
            papers::run_get(&cfg, &id).await?;
        }
        Commands::Papers { page, page_size } => {
            papers::run_papers(&cfg, page, page_size).await?;
        }
        Commands::Ask {
            question,
            show_context,
        } => {
            chat::run_ask(&cfg, &question, show_context).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
