//! HTTP server.
//!
//! Exposes the paper service and the chat assistant as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Store connectivity and version; 503 when the store is down |
//! | `GET`  | `/papers?page&page_size` | One page of papers with the total count |
//! | `POST` | `/papers` | Create or merge a paper; 201 |
//! | `GET`  | `/papers/search?q&limit` | Scored keyword search |
//! | `GET`  | `/papers/{id}` | One paper by versioned or base id |
//! | `POST` | `/chat` | Single-shot answer with context, sources and usage |
//! | `POST` | `/chat/stream` | Newline-delimited JSON frames |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `store_unavailable` (503), `internal` (500). Internal errors carry a
//! generic message; the detail goes to the log.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{stream_chat, ChatOrchestrator, ChatResponse};
use crate::config::Config;
use crate::error::Error;
use crate::llm::Message;
use crate::papers::{self, PaperCreate, PaperCreated, PaperDetail, PaperPage, ScoredPaper};
use crate::store::GraphStore;

const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    store: GraphStore,
    chat: Arc<ChatOrchestrator>,
}

impl AppState {
    pub fn new(store: GraphStore, chat: ChatOrchestrator) -> Self {
        Self {
            store,
            chat: Arc::new(chat),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/papers", get(handle_list_papers).post(handle_create_paper))
        .route("/papers/search", get(handle_search_papers))
        .route("/papers/{id}", get(handle_get_paper))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on `[server].bind` and run until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = GraphStore::open(&config.db).await?;
    let chat = ChatOrchestrator::from_config(config, store.clone())?;
    let app = router(AppState::new(store.clone(), chat));

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("research graph API listening on http://{}", bind_addr);
    tracing::info!(%bind_addr, llm = %config.llm.provider, "server started");

    let served = axum::serve(listener, app).await;
    store.close().await;
    served?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { .. } => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: err.to_string(),
            },
            Error::InvalidInput(message) => bad_request(message),
            Error::Connectivity(ref detail) => {
                tracing::error!(error = %detail, "graph store unavailable");
                AppError {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    code: "store_unavailable",
                    message: "graph store unavailable".to_string(),
                }
            }
            other => {
                tracing::error!(error = %other, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: &'static str,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let version = env!("CARGO_PKG_VERSION");
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                store: "connected",
                version,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    store: "unavailable",
                    version,
                }),
            )
        }
    }
}

// ============ /papers ============

#[derive(Deserialize)]
struct ListParams {
    page: Option<usize>,
    page_size: Option<usize>,
}

async fn handle_list_papers(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PaperPage>, AppError> {
    let page = papers::list_papers(
        &state.store,
        params.page.unwrap_or(1),
        params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    )
    .await?;
    Ok(Json(page))
}

async fn handle_create_paper(
    State(state): State<AppState>,
    Json(body): Json<PaperCreate>,
) -> Result<(StatusCode, Json<PaperCreated>), AppError> {
    let created = papers::create_paper(&state.store, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

async fn handle_search_papers(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<ScoredPaper>>, AppError> {
    let q = params.q.unwrap_or_default();
    let results = papers::search_papers(
        &state.store,
        &q,
        params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
    )
    .await?;
    Ok(Json(results))
}

async fn handle_get_paper(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaperDetail>, AppError> {
    Ok(Json(papers::get_paper(&state.store, &id).await?))
}

// ============ /chat ============

/// Body of `POST /chat` and `POST /chat/stream`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, alias = "conversation_history")]
    pub history: Vec<Message>,
}

impl ChatRequest {
    fn validated(self) -> Result<Self, AppError> {
        if self.message.trim().is_empty() {
            return Err(bad_request("message must not be empty"));
        }
        Ok(self)
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let body = body.validated()?;
    let response = state.chat.chat(&body.message, &body.history).await?;
    Ok(Json(response))
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let body = body.validated()?;
    let frames = stream_chat(state.chat.clone(), body.message, body.history)
        .map(|frame| Ok::<_, Infallible>(frame.to_ndjson()));

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(frames),
    )
        .into_response())
}
