//! # Research Graph
//!
//! A knowledge graph of research papers with a multi-source enrichment
//! pipeline and a chat assistant grounded in the graph.
//!
//! Papers are ingested from an academic repository feed and a model hub,
//! enriched in independent passes (authors, LLM-extracted entities, hub
//! artifacts), and queried through a term-extraction → retrieval →
//! generation pipeline exposed over a CLI and an HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Connectors  │──▶│   Resolver   │──▶│ Graph store  │
//! │ arXiv / Hub │   │ idempotent   │   │   (SQLite)   │
//! └─────────────┘   │   upserts    │   └──────┬───────┘
//!        ▲          └──────────────┘          │
//!        │                 ▲                  ▼
//! ┌──────┴──────┐          │          ┌──────────────┐
//! │ Enrichment  │──────────┘          │  Retrieval   │
//! │   passes    │                     │ + chat (LLM) │
//! └─────────────┘                     └──────┬───────┘
//!                                  ┌─────────┴────────┐
//!                                  ▼                  ▼
//!                             ┌─────────┐        ┌─────────┐
//!                             │   CLI   │        │  HTTP   │
//!                             │(rgraph) │        │ (axum)  │
//!                             └─────────┘        └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rgraph init
//! rgraph ingest arxiv --query "cat:cs.CL" --max-results 50
//! rgraph enrich authors --limit 20
//! rgraph enrich entities --limit 20
//! rgraph enrich hub --limit 20
//! rgraph ask "How does self-attention work?"
//! rgraph serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`db`] | Connection pool |
//! | [`migrate`] | Graph schema |
//! | [`models`] | Labels, edge types, paper and connector records |
//! | [`store`] | Graph store adapter |
//! | [`resolver`] | Idempotent node and edge upserts |
//! | [`sources`] | Connector traits |
//! | [`connector_arxiv`] | Academic repository Atom feed |
//! | [`connector_hub`] | Model hub JSON API |
//! | [`ingest`] | Shared ingestion routine |
//! | [`llm`] | Generative provider abstraction |
//! | [`entities`] | LLM entity extraction |
//! | [`enrich`] | Enrichment passes |
//! | [`terms`] | Search term extraction |
//! | [`retrieve`] | Context retrieval |
//! | [`chat`] | Chat orchestration |
//! | [`papers`] | Paper service |
//! | [`server`] | HTTP server |

pub mod chat;
pub mod config;
pub mod connector_arxiv;
pub mod connector_hub;
pub mod db;
pub mod enrich;
pub mod entities;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod papers;
pub mod resolver;
pub mod retrieve;
pub mod server;
pub mod sources;
pub mod store;
pub mod terms;
