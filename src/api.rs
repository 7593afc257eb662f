//! REST API server for bounded-memory chat
//!
//! Exposes conversation sessions over HTTP so any front end can chat with
//! the configured model under the configured memory policy.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::documents::WebpageReader;
use crate::error::MemoryError;
use crate::llm::ChatModel;
use crate::session::{resolve_session_id, SessionStore};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Either a single `message`, or a client-side transcript in `messages`
/// whose last user entry is taken as the new turn. History lives server
/// side, so earlier entries are ignored.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    fn user_text(&self) -> Option<&str> {
        let not_blank = |text: &&str| !text.trim().is_empty();

        self.message.as_deref().filter(not_blank).or_else(|| {
            self.messages
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| m.content.as_str())
                .filter(not_blank)
        })
    }
}

/// Reference document for a session: page URLs to fetch, literal text, or
/// both (fetched pages first)
#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    pub text: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn error_status(error: &MemoryError) -> StatusCode {
    match error {
        MemoryError::MemoryUpdateFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        MemoryError::LlmError(_) | MemoryError::HttpError(_) | MemoryError::Document(_) => {
            StatusCode::BAD_GATEWAY
        }
        MemoryError::InvalidTurn(_) => StatusCode::BAD_REQUEST,
        MemoryError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionStore>,
    pub model: Arc<dyn ChatModel>,
    pub documents: Arc<WebpageReader>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(user_text) = req.user_text() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No user message found".into())),
        );
    };

    let session_id = resolve_session_id(req.session_id.as_deref());

    let session = match state.sessions.get_or_create(session_id).await {
        Ok(session) => session,
        Err(e) => {
            return (
                error_status(&e),
                Json(ApiResponse::error(format!("Failed to open session: {}", e))),
            )
        }
    };

    let result = session.lock().await.send(user_text, state.model.as_ref()).await;
    drop(session);

    match result {
        Ok(report) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id.to_string(),
                "reply": report.reply,
                "memory": report.memory,
            }))),
        ),
        Err(e) => {
            warn!(%session_id, "Chat turn failed: {}", e);
            state.sessions.discard_if_pristine(session_id).await;
            (
                error_status(&e),
                Json(ApiResponse::error(format!("Chat turn failed: {}", e))),
            )
        }
    }
}

/// =============================
/// Session Endpoints
/// =============================

async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = resolve_session_id(Some(&id));

    match state.sessions.get(session_id).await {
        Some(session) => {
            let session = session.lock().await;
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "session_id": session_id.to_string(),
                    "context": session.context().map(|turn| turn.content()),
                    "turns": session.log().turns(),
                }))),
            )
        }
        None => {
            let e = MemoryError::SessionNotFound(id);
            (error_status(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

async fn delete_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = resolve_session_id(Some(&id));

    if state.sessions.remove(session_id).await {
        info!(%session_id, "Session removed");
        (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id.to_string(),
                "removed": true,
            }))),
        )
    } else {
        let e = MemoryError::SessionNotFound(id);
        (error_status(&e), Json(ApiResponse::error(e.to_string())))
    }
}

/// =============================
/// Context Endpoints
/// =============================

async fn put_context(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ContextRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = resolve_session_id(Some(&id));

    let mut parts = Vec::new();
    if !req.urls.is_empty() {
        match state.documents.read_all(&req.urls).await {
            Ok(document) => parts.push(document),
            Err(e) => {
                warn!(%session_id, "Failed to load context documents: {}", e);
                return (error_status(&e), Json(ApiResponse::error(e.to_string())));
            }
        }
    }
    if let Some(text) = req.text.filter(|t| !t.trim().is_empty()) {
        parts.push(text);
    }
    if parts.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Provide at least one URL or some text".into())),
        );
    }
    let document = crate::documents::combine_documents(&parts);

    let session = match state.sessions.get_or_create(session_id).await {
        Ok(session) => session,
        Err(e) => return (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    };

    let mut session = session.lock().await;
    match session.set_context(&document) {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id.to_string(),
                "context_chars": document.len(),
            }))),
        ),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn delete_context(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = resolve_session_id(Some(&id));

    match state.sessions.get(session_id).await {
        Some(session) => {
            let cleared = session.lock().await.clear_context();
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "session_id": session_id.to_string(),
                    "cleared": cleared,
                }))),
            )
        }
        None => {
            let e = MemoryError::SessionNotFound(id);
            (error_status(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route(
            "/api/sessions/:id/context",
            put(put_context).delete(delete_context),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
