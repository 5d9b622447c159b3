//! Graph aggregate endpoints — §6 `/api/graph/*`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use loomgraph_core::types::normalize_topic_name;
use loomgraph_store::types::{GlobalKnowledgeMap, Topic, UserKnowledgeMap};

use crate::app::AppState;
use crate::error::ApiError;

/// `GET /api/graph/user/:userId/map` and `.../full` (§6) — the combined
/// stats/graph/topics/relations/insights/conversations view for one user.
pub async fn user_map(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserKnowledgeMap>, ApiError> {
    let map = state.store.get_user_knowledge_map(&user_id)?;
    Ok(Json(map))
}

pub async fn user_topics(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Topic>>, ApiError> {
    let topics = state.store.get_all_user_topics(&user_id)?;
    Ok(Json(topics))
}

#[derive(Deserialize)]
pub struct GlobalMapQuery {
    /// Caller identifying itself so its own contributions are excluded from
    /// the global view, same rule `getGlobalInsights` applies (§4.1 item 2).
    /// Absent means no exclusion.
    #[serde(default)]
    pub user_id: String,
}

pub async fn global_map(
    State(state): State<Arc<AppState>>,
    Query(q): Query<GlobalMapQuery>,
) -> Result<Json<GlobalKnowledgeMap>, ApiError> {
    let map = state.store.get_global_knowledge_map(&q.user_id)?;
    Ok(Json(map))
}

#[derive(Deserialize)]
pub struct GraphSuggestionsQuery {
    /// Comma-separated topic names (§6: `?topics=a,b`), not IDs.
    pub topics: String,
    #[serde(default = "default_suggestion_limit")]
    pub limit: usize,
}

fn default_suggestion_limit() -> usize {
    5
}

pub async fn graph_suggestions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<GraphSuggestionsQuery>,
) -> Result<Json<Vec<Topic>>, ApiError> {
    let mut topic_ids = Vec::new();
    for name in q.topics.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(topic) = state.store.get_topic_by_name(&normalize_topic_name(name))? {
            topic_ids.push(topic.id);
        }
    }
    let topics = state.store.get_suggested_topics(&topic_ids, q.limit)?;
    Ok(Json(topics))
}

#[derive(Deserialize)]
pub struct LinkTopicsRequest {
    pub topic1: String,
    pub topic2: String,
    pub strength: Option<f64>,
}

#[derive(Serialize)]
pub struct LinkTopicsReply {
    pub linked: bool,
}

pub async fn link_topics(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LinkTopicsRequest>,
) -> Result<Json<LinkTopicsReply>, ApiError> {
    let a = state.store.get_or_create_topic(&req.topic1)?;
    let b = state.store.get_or_create_topic(&req.topic2)?;
    state.store.link_topics_with_strength(a.id, b.id, req.strength)?;
    Ok(Json(LinkTopicsReply { linked: true }))
}
