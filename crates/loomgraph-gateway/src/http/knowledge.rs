//! Insight browsing, ingestion and semantic search — §6 `/api/knowledge/*`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use loomgraph_store::types::InsightWithTopics;
use loomgraph_vector::VectorHit;

use crate::app::AppState;
use crate::error::ApiError;

/// Fixed importance for any insight that did not come out of the processor's
/// own analysis step, same value the processor stamps on its extractions
/// (§4.3: one fixed importance regardless of ingestion path).
const INGESTED_INSIGHT_IMPORTANCE: f64 = 0.7;

/// Upper bound for the per-user insight count used by `stats` — large enough
/// that no real user's history is truncated, without relying on an unbounded
/// `LIMIT`.
const STATS_INSIGHT_SCAN_LIMIT: usize = 1_000_000;

#[derive(Deserialize)]
pub struct SearchRequest {
    pub user_id: String,
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    3
}

pub async fn search(State(state): State<Arc<AppState>>, Json(req): Json<SearchRequest>) -> Json<Vec<VectorHit>> {
    let hits = loomgraph_vector::search_or_empty(state.vector.as_deref(), &req.query, &req.user_id, req.limit).await;
    Json(hits)
}

/// `POST /api/knowledge/add` (§6) — the insight-ingestion path used by
/// collaborators outside a chat turn (e.g. an email-ingestion process). The
/// insight still needs an owning conversation: the caller is expected to
/// have created one (`POST /api/conversations`) and pass its id, the same
/// invariant every other insight in the graph satisfies (§4.3).
#[derive(Deserialize)]
pub struct AddInsightRequest {
    pub user_id: String,
    pub conversation_id: String,
    pub content: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Serialize)]
pub struct AddInsightReply {
    pub insight: InsightWithTopics,
}

pub async fn add(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddInsightRequest>,
) -> Result<Json<AddInsightReply>, ApiError> {
    state.store.get_or_create_user(&req.user_id)?;
    let insight = state.store.save_insight(
        &req.conversation_id,
        &req.user_id,
        &req.content,
        INGESTED_INSIGHT_IMPORTANCE,
    )?;

    let mut topic_ids = Vec::with_capacity(req.topics.len());
    for name in &req.topics {
        let topic = state.store.get_or_create_topic(name)?;
        state.store.link_insight_topic(insight.id, topic.id)?;
        state.store.link_conversation_topic(&req.conversation_id, topic.id)?;
        topic_ids.push(topic.id);
    }
    for i in 0..topic_ids.len() {
        for j in (i + 1)..topic_ids.len() {
            state.store.link_topics(topic_ids[i], topic_ids[j])?;
        }
    }

    if let Some(vector) = state.vector.as_ref() {
        let vector_ref = format!("insight_{}", insight.id);
        if vector.store(&vector_ref, &req.content, &req.user_id, &req.topics).await.is_ok() {
            state.store.set_insight_vector_ref(insight.id, &vector_ref)?;
        }
    }

    Ok(Json(AddInsightReply {
        insight: InsightWithTopics {
            insight,
            topics: req.topics,
        },
    }))
}

/// `DELETE /api/knowledge/:insightId` (§6). Deleting an id that doesn't
/// exist is a no-op, not an error — the end state the caller wants ("this
/// insight is gone") already holds either way.
pub async fn delete_insight(
    State(state): State<Arc<AppState>>,
    Path(insight_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let vector_ref = state.store.delete_insight(insight_id)?;
    if let (Some(vector), Some(vector_ref)) = (state.vector.as_ref(), vector_ref.as_deref()) {
        let _ = vector.delete(vector_ref).await;
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Serialize)]
pub struct KnowledgeStats {
    pub insight_count: usize,
    pub topic_count: usize,
    pub vector_enabled: bool,
}

/// `GET /api/knowledge/stats/:userId` (§6) — a per-user summary, distinct
/// from the processor-wide counters at `/api/processor/stats`.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<KnowledgeStats>, ApiError> {
    let insights = state.store.get_recent_user_insights(&user_id, STATS_INSIGHT_SCAN_LIMIT)?;
    let topics = state.store.get_all_user_topics(&user_id)?;
    Ok(Json(KnowledgeStats {
        insight_count: insights.len(),
        topic_count: topics.len(),
        vector_enabled: state.vector.is_some(),
    }))
}
