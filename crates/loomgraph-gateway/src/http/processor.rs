//! Read-only visibility into the deferred processor — §6 `/api/processor/*`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use loomgraph_processor::engine::TickSummary;
use loomgraph_store::types::{DueConversation, ProcessingLogEntry};

use crate::app::AppState;
use crate::error::ApiError;

/// `POST /api/processor/run` (§6) — trigger a tick out of band. Guarded by
/// `processor_run_lock` so a caller that fires while a tick is already in
/// flight waits on it and gets that tick's result instead of starting a
/// second, overlapping one (§5).
pub async fn run_now(State(state): State<Arc<AppState>>) -> Result<Json<TickSummary>, ApiError> {
    let _guard = state.processor_run_lock.lock().await;
    let summary = state.processor.tick().await?;
    Ok(Json(summary))
}

/// `GET /api/processor/pending` (§6) — read-only preview of what the next
/// tick would pick up, using the same idle-threshold/batch-size the
/// background loop ticks with.
pub async fn pending(State(state): State<Arc<AppState>>) -> Result<Json<Vec<DueConversation>>, ApiError> {
    let config = state.processor.config();
    let due = state.store.get_due_conversations(config.idle_threshold_secs, config.batch_size)?;
    Ok(Json(due))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn processing_logs(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Vec<ProcessingLogEntry>>, ApiError> {
    let logs = state.store.get_processing_logs(q.limit)?;
    Ok(Json(logs))
}

#[derive(Serialize)]
pub struct StatsBody {
    pub total_processed: usize,
    pub useful_count: usize,
    pub not_useful_count: usize,
}

pub async fn processor_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsBody>, ApiError> {
    let stats = state.store.get_processor_stats()?;
    Ok(Json(StatsBody {
        total_processed: stats.total_processed,
        useful_count: stats.useful_count,
        not_useful_count: stats.not_useful_count,
    }))
}
