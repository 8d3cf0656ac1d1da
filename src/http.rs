//! HTTP API for the agent dashboard.
//!
//! Thin layer over the live queue (reads) and the conversation manager
//! (writes). A store failure surfaces as `503` with `"retryable": true`,
//! never as an empty queue.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::{CacheManager, CacheStats};
use crate::config::GlobalConfig;
use crate::models::conversation::{Conversation, ConversationStatus, Message, MessageKind, Sender};
use crate::models::listing::{ListingFilter, DEFAULT_LISTING_LIMIT};
use crate::models::scope::{PartnerId, Scope};
use crate::models::summary::ClassifiedSummary;
use crate::orchestrator::conversation_manager::ConversationManager;
use crate::persistence::conversation_repo::ConversationRepo;
use crate::persistence::db::Database;
use crate::queue::executor::QueryExecutor;
use crate::queue::live_queue::LiveQueue;
use crate::{AppError, Result};

/// Shared state handed to every request handler.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Cached read path.
    pub live_queue: LiveQueue,
    /// Write path.
    pub conversations: ConversationManager,
}

impl AppState {
    /// Wire the store, executor, cache, live queue and write path together.
    ///
    /// One cache instance per state; the write path invalidates that same instance.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, db: Arc<Database>) -> Self {
        let repo = ConversationRepo::new(db);
        let executor = QueryExecutor::new(Arc::new(repo.clone()), config.query_timeout());
        let live_queue = LiveQueue::new(executor, CacheManager::new(), config.cache_ttls());
        let conversations = ConversationManager::new(repo, live_queue.hook());
        Self {
            config,
            live_queue,
            conversations,
        }
    }
}

/// Queue or listing payload.
#[derive(Debug, Serialize)]
struct SummaryPage {
    scope: String,
    items: Vec<ClassifiedSummary>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    retryable: bool,
}

#[derive(Debug, Deserialize)]
struct OpenRequest {
    #[serde(default)]
    scope_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageRequest {
    sender: Sender,
    #[serde(default, rename = "type")]
    kind: MessageKind,
    content: String,
}

#[derive(Debug, Deserialize)]
struct PanicRequest {
    in_panic_room: bool,
}

#[derive(Debug, Deserialize)]
struct ReminderRequest {
    active: bool,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: ConversationStatus,
}

/// Raw listing query string. The partner is validated by hand so a bad id
/// gets the same JSON error as the partner queue route.
#[derive(Debug, Deserialize)]
struct ListingQuery {
    #[serde(default)]
    status: Option<ConversationStatus>,
    #[serde(default)]
    partner: Option<String>,
    #[serde(default)]
    panic_only: bool,
    #[serde(default)]
    limit: Option<u32>,
}

impl ListingQuery {
    fn into_filter(self) -> Result<ListingFilter> {
        Ok(ListingFilter {
            status: self.status,
            partner: self.partner.as_deref().map(PartnerId::parse).transpose()?,
            panic_only: self.panic_only,
            limit: self.limit.unwrap_or(DEFAULT_LISTING_LIMIT),
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidScope(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Config(_) | Self::Db(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(err = %self, "request failed");
        }
        let body = ErrorBody {
            retryable: self.is_retryable(),
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

async fn global_queue(State(state): State<Arc<AppState>>) -> Result<Json<SummaryPage>> {
    let queue = state.live_queue.get(&Scope::Global).await?;
    Ok(Json(SummaryPage {
        scope: Scope::Global.to_string(),
        items: queue.to_vec(),
    }))
}

async fn partner_queue(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<String>,
) -> Result<Json<SummaryPage>> {
    let scope = Scope::partner(&partner_id)?;
    let queue = state.live_queue.get(&scope).await?;
    Ok(Json(SummaryPage {
        scope: scope.to_string(),
        items: queue.to_vec(),
    }))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<SummaryPage>> {
    let listing = state.live_queue.list(query.into_filter()?).await?;
    Ok(Json(SummaryPage {
        scope: "listing".into(),
        items: listing.to_vec(),
    }))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    Ok(Json(state.conversations.fetch(&id).await?))
}

async fn open_conversation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenRequest>,
) -> Result<(StatusCode, Json<Conversation>)> {
    let created = state.conversations.open(request.scope_ref).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PostMessageRequest>,
) -> Result<Json<Conversation>> {
    let message = Message {
        sender: request.sender,
        kind: request.kind,
        content: request.content,
        timestamp: Utc::now(),
        read_by_agent: request.sender == Sender::Agent,
    };
    Ok(Json(state.conversations.post_message(&id, message).await?))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    Ok(Json(state.conversations.mark_read(&id).await?))
}

async fn set_panic_room(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PanicRequest>,
) -> Result<Json<Conversation>> {
    let updated = if request.in_panic_room {
        state.conversations.enter_panic_room(&id).await?
    } else {
        state.conversations.exit_panic_room(&id).await?
    };
    Ok(Json(updated))
}

async fn set_reminder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ReminderRequest>,
) -> Result<Json<Conversation>> {
    Ok(Json(
        state.conversations.set_reminder(&id, request.active).await?,
    ))
}

async fn handle_reminder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    Ok(Json(state.conversations.handle_reminder(&id).await?))
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Conversation>> {
    Ok(Json(
        state.conversations.set_status(&id, request.status).await?,
    ))
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.live_queue.cache().stats())
}

/// Build the dashboard router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/queue", get(global_queue))
        .route("/queue/partners/{partner_id}", get(partner_queue))
        .route("/conversations", get(list_conversations).post(open_conversation))
        .route("/conversations/{id}", get(get_conversation))
        .route("/conversations/{id}/messages", post(post_message))
        .route("/conversations/{id}/read", post(mark_read))
        .route("/conversations/{id}/panic", post(set_panic_room))
        .route("/conversations/{id}/reminder", post(set_reminder))
        .route("/conversations/{id}/reminder/handled", post(handle_reminder))
        .route("/conversations/{id}/status", post(set_status))
        .route("/cache/stats", get(cache_stats))
        .with_state(state)
}

/// Serve the dashboard API on `config.http_port` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the listener cannot bind or the server fails.
pub async fn serve_http(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], state.config.http_port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Io(format!("failed to bind {bind}: {err}")))?;
    serve_listener(listener, state, ct).await
}

/// Serve the dashboard API on an already-bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_listener(
    listener: TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http api listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| {
            error!(%err, "http server failed");
            AppError::Io(format!("http server failed: {err}"))
        })
}
