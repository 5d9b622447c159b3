use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use loomgraph_core::config::LoomgraphConfig;
use loomgraph_llm::provider::LlmProvider;
use loomgraph_processor::ProcessorEngine;
use loomgraph_store::GraphStore;
use loomgraph_vector::VectorAdapter;

/// Shared state handed to every Axum handler.
pub struct AppState {
    pub config: LoomgraphConfig,
    pub store: Arc<GraphStore>,
    pub vector: Option<Arc<VectorAdapter>>,
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub processor: Arc<ProcessorEngine>,
    /// Serializes `/api/processor/run`: a second caller while a tick is
    /// already in flight waits on this lock and gets that tick's result
    /// rather than spawning a parallel run (§5).
    pub processor_run_lock: Mutex<()>,
    /// In-flight streaming turns, keyed by conversation ID — `/stop` cancels
    /// the matching token to abort a running SSE completion.
    pub active_operations: DashMap<String, CancellationToken>,
}

impl AppState {
    pub fn new(
        config: LoomgraphConfig,
        store: Arc<GraphStore>,
        vector: Option<Arc<VectorAdapter>>,
        provider: Arc<dyn LlmProvider>,
        model: String,
        processor: Arc<ProcessorEngine>,
    ) -> Self {
        Self {
            config,
            store,
            vector,
            provider,
            model,
            processor,
            processor_run_lock: Mutex::new(()),
            active_operations: DashMap::new(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ping", get(crate::http::health::ping_handler))
        .route("/api/health", get(crate::http::health::health_handler))
        .route("/api/chat/send", post(crate::http::chat::send_message))
        .route("/api/chat/stream", post(crate::http::chat::stream_message))
        .route("/api/chat/pii-consent", post(crate::http::chat::pii_consent))
        .route("/api/chat/history/{user_id}", get(crate::http::chat::history))
        .route("/api/chat/context/{user_id}", get(crate::http::chat::debug_context))
        .route("/api/chat/status/{conversation_id}", get(crate::http::chat::status))
        .route("/api/chat/{conversation_id}", delete(crate::http::chat::delete_conversation))
        .route(
            "/api/chat/{conversation_id}/stop",
            post(crate::http::chat::stop_stream),
        )
        .route("/api/conversations", post(crate::http::chat::create_conversation))
        .route("/api/conversations", get(crate::http::chat::list_conversations))
        .route("/api/users/{user_id}/consent", post(crate::http::chat::set_consent))
        .route("/api/graph/user/{user_id}/map", get(crate::http::graph::user_map))
        .route("/api/graph/user/{user_id}/full", get(crate::http::graph::user_map))
        .route("/api/graph/user/{user_id}/topics", get(crate::http::graph::user_topics))
        .route("/api/graph/global", get(crate::http::graph::global_map))
        .route(
            "/api/graph/suggestions",
            get(crate::http::graph::graph_suggestions),
        )
        .route("/api/graph/link-topics", post(crate::http::graph::link_topics))
        .route("/api/knowledge/search", post(crate::http::knowledge::search))
        .route("/api/knowledge/add", post(crate::http::knowledge::add))
        .route(
            "/api/knowledge/{insight_id}",
            delete(crate::http::knowledge::delete_insight),
        )
        .route("/api/knowledge/stats/{user_id}", get(crate::http::knowledge::stats))
        .route("/api/processor/run", post(crate::http::processor::run_now))
        .route("/api/processor/pending", get(crate::http::processor::pending))
        .route(
            "/api/processor/logs",
            get(crate::http::processor::processing_logs),
        )
        .route(
            "/api/processor/stats",
            get(crate::http::processor::processor_stats),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::compression::CompressionLayer::new())
}
