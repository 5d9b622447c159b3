//! Chat turns and conversation lifecycle — §6 `/api/chat/*`, `/api/conversations*`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use loomgraph_core::types::ConversationId;
use loomgraph_llm::ops::PiiDetection;
use loomgraph_pipeline::context::{AssembledContext, RelatedContextItem};
use loomgraph_pipeline::TurnEvent;
use loomgraph_store::types::{Conversation, ProcessingLogEntry};

use crate::app::AppState;
use crate::error::ApiError;

fn unauthorized() -> ApiError {
    ApiError {
        status: axum::http::StatusCode::UNAUTHORIZED,
        body: crate::error::ErrorBody {
            error: "unauthorized".to_string(),
            code: "UNAUTHORIZED",
        },
    }
}

fn bad_request(message: &str, code: &'static str) -> ApiError {
    ApiError {
        status: axum::http::StatusCode::BAD_REQUEST,
        body: crate::error::ErrorBody {
            error: message.to_string(),
            code,
        },
    }
}

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub user_id: String,
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    state.store.get_or_create_user(&req.user_id)?;
    let id = ConversationId::new().to_string();
    let conversation = state.store.create_conversation(&id, &req.user_id)?;
    Ok(Json(conversation))
}

#[derive(Deserialize)]
pub struct ListConversationsQuery {
    pub user_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListConversationsQuery>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    let conversations = state.store.list_user_conversations(&q.user_id, q.limit)?;
    Ok(Json(conversations))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// `GET /api/chat/history/:userId` (§6) — same projection as
/// `/api/conversations`, addressed by path instead of a query parameter.
pub async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    let conversations = state.store.list_user_conversations(&user_id, q.limit)?;
    Ok(Json(conversations))
}

#[derive(Deserialize)]
pub struct DebugContextQuery {
    #[serde(default)]
    pub query: String,
}

/// `GET /api/chat/context/:userId` (§6, debug) — renders the exact context
/// block a chat turn would see, without running a completion.
pub async fn debug_context(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(q): Query<DebugContextQuery>,
) -> Result<Json<AssembledContext>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    let ctx = loomgraph_pipeline::context::assemble(state.store.as_ref(), state.vector.as_deref(), &user_id, &q.query).await;
    Ok(Json(ctx))
}

#[derive(Serialize)]
pub struct StatusReply {
    pub processed: bool,
    pub is_useful: Option<bool>,
    pub usefulness_reason: Option<String>,
    pub processing_log: Option<ProcessingLogEntry>,
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Result<Json<StatusReply>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    let conversation =
        state
            .store
            .get_conversation(&conversation_id)?
            .ok_or_else(|| loomgraph_store::error::StoreError::ConversationNotFound {
                id: conversation_id.clone(),
            })?;
    let processing_log = state.store.get_processing_log_for_conversation(&conversation_id)?;
    Ok(Json(StatusReply {
        processed: conversation.processed,
        is_useful: conversation.is_useful,
        usefulness_reason: conversation.usefulness_reason,
        processing_log,
    }))
}

#[derive(Deserialize)]
pub struct DeleteConversationRequest {
    pub user_id: String,
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    Json(req): Json<DeleteConversationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    state
        .store
        .delete_conversation_from_user_graph(&conversation_id, &req.user_id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Deserialize)]
pub struct ConsentRequest {
    pub consent_global: bool,
}

pub async fn set_consent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(req): Json<ConsentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    state.store.set_consent_global(&user_id, req.consent_global)?;
    Ok(Json(serde_json::json!({ "consent_global": req.consent_global })))
}

#[derive(Deserialize)]
pub struct ChatMessageIn {
    #[allow(dead_code)]
    pub role: String,
    pub content: String,
}

/// `messages` is the full client-side history; only the final element (a
/// user turn) is authoritative for routing and PII analysis — everything
/// before it is already persisted server-side from prior turns.
#[derive(Deserialize)]
pub struct SendRequest {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub messages: Vec<ChatMessageIn>,
    pub global_sharing_consent: Option<bool>,
}

#[derive(Serialize)]
pub struct SendMessageReply {
    pub response: String,
    pub conversation_id: String,
    pub related_context: Vec<RelatedContextItem>,
    pub suggested_topics: Vec<String>,
    pub pii_detection: Option<PiiDetection>,
    pub global_sharing_blocked: bool,
}

fn last_message(messages: &[ChatMessageIn]) -> Result<&str, ApiError> {
    messages
        .last()
        .map(|m| m.content.as_str())
        .ok_or_else(|| bad_request("messages must not be empty", "empty_message"))
}

/// Resolve the conversation to turn on: the caller's `conversationId` if
/// given, otherwise a freshly created one (§4.1: conversationId is optional,
/// the server creates one when absent).
fn resolve_conversation(state: &AppState, user_id: &str, conversation_id: Option<String>) -> Result<String, ApiError> {
    state.store.get_or_create_user(user_id)?;
    match conversation_id {
        Some(id) => Ok(id),
        None => {
            let id = ConversationId::new().to_string();
            state.store.create_conversation(&id, user_id)?;
            Ok(id)
        }
    }
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendMessageReply>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    let message = last_message(&req.messages)?.to_string();
    let conversation_id = resolve_conversation(&state, &req.user_id, req.conversation_id)?;

    let turn = loomgraph_pipeline::turn::run(
        state.store.as_ref(),
        state.vector.as_deref(),
        state.provider.as_ref(),
        &state.model,
        &conversation_id,
        &req.user_id,
        &message,
        req.global_sharing_consent,
    )
    .await?;

    Ok(Json(SendMessageReply {
        response: turn.reply,
        conversation_id,
        related_context: turn.related_context,
        suggested_topics: turn.suggested_topics,
        pii_detection: turn.pii_detection,
        global_sharing_blocked: turn.global_sharing_blocked,
    }))
}

pub async fn stream_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    let message = last_message(&req.messages)?.to_string();
    let conversation_id = resolve_conversation(&state, &req.user_id, req.conversation_id)?;

    let cancel = CancellationToken::new();
    state
        .active_operations
        .insert(conversation_id.clone(), cancel.clone());

    let rx = loomgraph_pipeline::stream::start(
        Arc::clone(&state.store),
        state.vector.clone(),
        Arc::clone(&state.provider),
        state.model.clone(),
        conversation_id.clone(),
        req.user_id.clone(),
        message,
        req.global_sharing_consent,
        cancel,
    )
    .await?;

    let active = Arc::clone(&state);
    let conversation_id_for_frames = conversation_id.clone();
    let conversation_id_for_cleanup = conversation_id.clone();
    let stream = ReceiverStream::new(rx).map(move |event| {
        let frame = match event {
            TurnEvent::TextDelta(text) => Event::default().data(
                serde_json::json!({ "text": text, "conversationId": conversation_id_for_frames }).to_string(),
            ),
            TurnEvent::Done { .. } => {
                active.active_operations.remove(&conversation_id_for_cleanup);
                Event::default().data(
                    serde_json::json!({ "done": true, "conversationId": conversation_id_for_frames }).to_string(),
                )
            }
            TurnEvent::Error(message) => {
                active.active_operations.remove(&conversation_id_for_cleanup);
                Event::default().data(serde_json::json!({ "error": message }).to_string())
            }
        };
        Ok(frame)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn stop_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    let stopped = match state.active_operations.get(&conversation_id) {
        Some(token) => {
            token.cancel();
            true
        }
        None => false,
    };
    Ok(Json(serde_json::json!({ "stopped": stopped })))
}

#[derive(Deserialize)]
pub struct PiiConsentRequest {
    pub conversation_id: String,
    pub consent: bool,
}

#[derive(Serialize)]
pub struct PiiConsentReply {
    pub success: bool,
    pub global_sharing_blocked: bool,
}

/// `POST /api/chat/pii-consent` (§6) — the out-of-band reply a client sends
/// when a turn came back with `piiDetection` set and consent omitted.
pub async fn pii_consent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PiiConsentRequest>,
) -> Result<Json<PiiConsentReply>, ApiError> {
    if !crate::auth::check(&state, &headers) {
        return Err(unauthorized());
    }
    if !req.consent {
        state.store.set_global_sharing_blocked(&req.conversation_id, true)?;
    }
    let global_sharing_blocked = state.store.is_global_sharing_blocked(&req.conversation_id)?;
    Ok(Json(PiiConsentReply {
        success: true,
        global_sharing_blocked,
    }))
}
