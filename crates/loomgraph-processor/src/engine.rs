//! Deferred conversation processor (§4.2): on a fixed tick, pick up idle
//! conversations nobody has touched in a while, judge each one with the LLM,
//! and promote the useful ones into the graph — topics, topic relations,
//! insights, and (when not blocked) the global pool.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use loomgraph_core::config::ProcessorConfig;
use loomgraph_llm::provider::LlmProvider;
use loomgraph_store::types::DueConversation;
use loomgraph_store::GraphStore;
use loomgraph_vector::VectorAdapter;

use crate::error::Result;

/// Stamped as the `reason` on a conversation that failed promotion, per the
/// exactly-once contract: a conversation is marked processed exactly once,
/// whether or not the attempt succeeded, so it is never retried forever.
const PROCESSING_ERROR_REASON: &str = "Processing error";

/// Fixed importance assigned to every insight extracted by the analyser.
const EXTRACTED_INSIGHT_IMPORTANCE: f64 = 0.7;

/// Outcome of a single tick, returned to callers that trigger a run over
/// HTTP so they can report what happened instead of a bare `Ok(())`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TickSummary {
    pub processed: usize,
    pub useful: usize,
    pub not_useful: usize,
    pub results: Vec<ConversationOutcome>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationOutcome {
    pub conversation_id: String,
    pub is_useful: bool,
    pub reason: String,
}

pub struct ProcessorEngine {
    store: Arc<GraphStore>,
    vector: Option<Arc<VectorAdapter>>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    config: ProcessorConfig,
}

impl ProcessorEngine {
    pub fn new(
        store: Arc<GraphStore>,
        vector: Option<Arc<VectorAdapter>>,
        provider: Arc<dyn LlmProvider>,
        model: String,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            vector,
            provider,
            model,
            config,
        }
    }

    /// Main loop. Ticks at `config.tick_interval_secs` until `shutdown`
    /// broadcasts `true`. Takes `Arc<Self>` rather than `self` so a caller
    /// can keep a handle to trigger an out-of-band tick (the `/api/processor/run`
    /// endpoint) alongside the background loop.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("processor engine started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.tick_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("processor tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("processor engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process every conversation currently eligible (idle past the
    /// threshold and not yet `processed`), up to `config.batch_size`.
    pub async fn tick(&self) -> Result<TickSummary> {
        let due = self
            .store
            .get_due_conversations(self.config.idle_threshold_secs, self.config.batch_size)?;

        let mut summary = TickSummary::default();
        for conversation in due {
            let outcome = self.process_one(&conversation).await;
            summary.processed += 1;
            if outcome.is_useful {
                summary.useful += 1;
            } else {
                summary.not_useful += 1;
            }
            summary.results.push(outcome);
        }
        Ok(summary)
    }

    async fn process_one(&self, due: &DueConversation) -> ConversationOutcome {
        let messages = match self.store.get_messages(&due.id) {
            Ok(m) => m,
            Err(e) => {
                warn!(conversation_id = %due.id, error = %e, "failed to load conversation, skipping tick");
                return ConversationOutcome {
                    conversation_id: due.id.clone(),
                    is_useful: false,
                    reason: e.to_string(),
                };
            }
        };
        let transcript: Vec<(String, String)> = messages
            .iter()
            .map(|m| (m.role.as_str().to_string(), m.content.clone()))
            .collect();

        let analysis = loomgraph_llm::ops::analyze_conversation(self.provider.as_ref(), &self.model, &transcript).await;

        if !analysis.is_useful {
            if let Err(e) = self.store.mark_processed(&due.id, false, Some(analysis.reason.as_str()), None) {
                warn!(conversation_id = %due.id, error = %e, "failed to mark not-useful conversation processed");
            }
            let _ = self
                .store
                .append_processing_log(&due.id, &due.user_id, false, Some(analysis.reason.as_str()), &[], 0);
            return ConversationOutcome {
                conversation_id: due.id.clone(),
                is_useful: false,
                reason: analysis.reason,
            };
        }

        let conversation_id = due.id.clone();
        let user_id = due.user_id.clone();
        let topics = analysis.topics.clone();
        let insight_contents = analysis.insights.clone();
        let summary = analysis.summary.clone();
        let reason = analysis.reason.clone();

        let promotion: std::result::Result<Vec<i64>, loomgraph_store::error::StoreError> =
            self.store.with_transaction(|conn| {
                let mut topic_ids = Vec::with_capacity(topics.len());
                for name in &topics {
                    let topic = loomgraph_store::topics::get_or_create_topic(conn, name)?;
                    topic_ids.push(topic.id);
                }
                for i in 0..topic_ids.len() {
                    for j in (i + 1)..topic_ids.len() {
                        loomgraph_store::topics::link_topics(conn, topic_ids[i], topic_ids[j])?;
                    }
                    loomgraph_store::insights::link_conversation_topic(conn, &conversation_id, topic_ids[i])?;
                }

                let mut insight_ids = Vec::with_capacity(insight_contents.len());
                for content in &insight_contents {
                    let insight = loomgraph_store::insights::save_insight(
                        conn,
                        &conversation_id,
                        &user_id,
                        content,
                        EXTRACTED_INSIGHT_IMPORTANCE,
                    )?;
                    for topic_id in &topic_ids {
                        loomgraph_store::insights::link_insight_topic(conn, insight.id, *topic_id)?;
                    }
                    insight_ids.push(insight.id);
                }

                loomgraph_store::conversations::mark_processed(conn, &conversation_id, true, Some(&reason), Some(&summary))?;

                let consents_to_global_sharing = loomgraph_store::users::get_user(conn, &user_id)?
                    .map(|u| u.consent_global)
                    .unwrap_or(false);
                if consents_to_global_sharing {
                    loomgraph_store::insights::upsert_global_insight(conn, &conversation_id, &summary, &topic_ids)?;
                }

                loomgraph_store::processing_log::append_log(
                    conn,
                    &conversation_id,
                    &user_id,
                    true,
                    Some(&reason),
                    &topics,
                    insight_contents.len() as u32,
                )?;

                Ok(insight_ids)
            });

        match promotion {
            Ok(insight_ids) => {
                info!(
                    conversation_id = %due.id,
                    topics = topics.len(),
                    insights = insight_ids.len(),
                    "processor: conversation promoted"
                );
                self.embed_insights(&insight_ids, &insight_contents, &due.user_id, &topics).await;
                ConversationOutcome {
                    conversation_id: due.id.clone(),
                    is_useful: true,
                    reason,
                }
            }
            Err(e) => {
                error!(conversation_id = %due.id, error = %e, "processor: promotion failed, marking processed anyway");
                if let Err(e) = self.store.mark_processed(&due.id, false, Some(PROCESSING_ERROR_REASON), None) {
                    error!(conversation_id = %due.id, error = %e, "processor: failed to stamp processing error");
                }
                ConversationOutcome {
                    conversation_id: due.id.clone(),
                    is_useful: false,
                    reason: PROCESSING_ERROR_REASON.to_string(),
                }
            }
        }
    }

    /// Embed and store each newly-promoted insight in the vector index.
    /// Runs after the SQL transaction commits — a failure here only means
    /// the insight lacks a `vector_ref` and won't surface in semantic
    /// search; it never rolls back the promotion (§7).
    async fn embed_insights(&self, insight_ids: &[i64], contents: &[String], user_id: &str, topics: &[String]) {
        let Some(vector) = self.vector.as_ref() else {
            return;
        };
        for (id, content) in insight_ids.iter().zip(contents.iter()) {
            let vector_ref = format!("insight_{id}");
            match vector.store(&vector_ref, content, user_id, topics).await {
                Ok(()) => {
                    if let Err(e) = self.store.set_insight_vector_ref(*id, &vector_ref) {
                        warn!(insight_id = id, error = %e, "failed to record vector_ref");
                    }
                }
                Err(e) => {
                    warn!(insight_id = id, error = %e, "failed to embed insight, leaving it graph-only");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loomgraph_llm::provider::{ChatRequest, ChatResponse, ProviderError};
    use loomgraph_store::types::MessageRole;
    use rusqlite::Connection;

    struct FakeAnalyzer {
        is_useful: bool,
    }

    #[async_trait]
    impl LlmProvider for FakeAnalyzer {
        fn name(&self) -> &str {
            "fake-analyzer"
        }

        async fn send(&self, req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            let content = if self.is_useful {
                r#"{"is_useful": true, "reason": "taught durable fact", "topics": ["rust", "async"],
                    "insights": ["likes rust", "works on async runtimes"], "summary": "discussed rust async internals",
                    "related_topics": [], "is_complete": true}"#
            } else {
                r#"{"is_useful": false, "reason": "just small talk", "topics": [], "insights": [],
                    "summary": "", "related_topics": [], "is_complete": true}"#
            };
            Ok(ChatResponse {
                content: content.to_string(),
                model: "fake".to_string(),
                tokens_in: 10,
                tokens_out: 10,
                stop_reason: "end_turn".to_string(),
            })
        }
    }

    fn seeded_store() -> (Arc<GraphStore>, DueConversation) {
        let store = Arc::new(GraphStore::new(Connection::open_in_memory().unwrap()).unwrap());
        store.get_or_create_user("u1").unwrap();
        store.create_conversation("c1", "u1").unwrap();
        store.add_message("c1", MessageRole::User, "how do rust async runtimes work?").unwrap();
        store.add_message("c1", MessageRole::Assistant, "they poll futures on an executor").unwrap();
        (store, DueConversation { id: "c1".to_string(), user_id: "u1".to_string() })
    }

    #[tokio::test]
    async fn promotes_useful_conversation_into_graph_and_shares_globally_with_consent() {
        let (store, due) = seeded_store();
        store.set_consent_global("u1", true).unwrap();
        let engine = ProcessorEngine::new(
            Arc::clone(&store),
            None,
            Arc::new(FakeAnalyzer { is_useful: true }),
            "fake-model".to_string(),
            ProcessorConfig::default(),
        );

        let outcome = engine.process_one(&due).await;
        assert!(outcome.is_useful);

        let conversation = store.get_conversation("c1").unwrap().unwrap();
        assert!(conversation.processed);
        assert_eq!(conversation.is_useful, Some(true));

        let insights = store.get_recent_user_insights("u1", 10).unwrap();
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].insight.importance_score, EXTRACTED_INSIGHT_IMPORTANCE);

        let topics = store.get_all_user_topics("u1").unwrap();
        assert_eq!(topics.len(), 2);

        let global = store.get_global_insights("someone-else", 10).unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].content, "discussed rust async internals");
    }

    #[tokio::test]
    async fn promotion_without_consent_never_publishes_globally() {
        let (store, due) = seeded_store();
        let engine = ProcessorEngine::new(
            Arc::clone(&store),
            None,
            Arc::new(FakeAnalyzer { is_useful: true }),
            "fake-model".to_string(),
            ProcessorConfig::default(),
        );

        engine.process_one(&due).await;

        let conversation = store.get_conversation("c1").unwrap().unwrap();
        assert!(conversation.processed);
        assert_eq!(conversation.is_useful, Some(true));

        // the user never opted into global sharing (consent_global defaults
        // to false), so the conversation's summary must not leak.
        let global = store.get_global_insights("someone-else", 10).unwrap();
        assert!(global.is_empty());

        // personal promotion still happens regardless of global consent.
        let insights = store.get_recent_user_insights("u1", 10).unwrap();
        assert_eq!(insights.len(), 2);
    }

    #[tokio::test]
    async fn marks_not_useful_conversation_processed_without_promotion() {
        let (store, due) = seeded_store();
        let engine = ProcessorEngine::new(
            Arc::clone(&store),
            None,
            Arc::new(FakeAnalyzer { is_useful: false }),
            "fake-model".to_string(),
            ProcessorConfig::default(),
        );

        engine.process_one(&due).await;

        let conversation = store.get_conversation("c1").unwrap().unwrap();
        assert!(conversation.processed);
        assert_eq!(conversation.is_useful, Some(false));
        assert!(store.get_recent_user_insights("u1", 10).unwrap().is_empty());
    }
}
