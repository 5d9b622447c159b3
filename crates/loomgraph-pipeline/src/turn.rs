//! The blocking chat turn (§4.1 items 1-3, 5-6): classify the query, assemble
//! context, run the completion, persist both messages in order, then run the
//! PII gate.

use tracing::info;

use loomgraph_llm::ops::PiiDetection;
use loomgraph_llm::provider::{ChatResponse, LlmProvider, Message as LlmMessage, Role};
use loomgraph_store::types::MessageRole;
use loomgraph_store::GraphStore;
use loomgraph_vector::VectorAdapter;

use crate::context::RelatedContextItem;
use crate::error::{PipelineError, Result};
use crate::{context, pii};

/// Number of prior messages (both roles) pulled into the completion request.
const HISTORY_WINDOW: usize = 40;

pub struct ChatTurn {
    pub reply: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub related_context: Vec<RelatedContextItem>,
    pub suggested_topics: Vec<String>,
    pub pii_detection: Option<PiiDetection>,
    pub global_sharing_blocked: bool,
}

/// Number of topic-graph neighbors offered back as `suggestedTopics`.
const MAX_SUGGESTED_TOPICS: usize = 5;

/// Run one non-streaming chat turn for an existing conversation.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    store: &GraphStore,
    vector: Option<&VectorAdapter>,
    provider: &dyn LlmProvider,
    model: &str,
    conversation_id: &str,
    user_id: &str,
    message: &str,
    global_sharing_consent: Option<bool>,
) -> Result<ChatTurn> {
    if message.trim().is_empty() {
        return Err(PipelineError::EmptyMessage);
    }
    store
        .get_conversation(conversation_id)?
        .ok_or_else(|| PipelineError::ConversationNotFound(conversation_id.to_string()))?;

    let classification = loomgraph_llm::ops::classify_query(provider, model, message).await;

    let assembled = if classification.is_trivial {
        context::AssembledContext::default()
    } else {
        context::assemble(store, vector, user_id, message).await
    };
    let ctx = assembled.text;

    let history = store.get_messages(conversation_id)?;
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut llm_messages: Vec<LlmMessage> = history[start..]
        .iter()
        .map(|m| LlmMessage {
            role: match m.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            },
            content: m.content.clone(),
        })
        .collect();
    llm_messages.push(LlmMessage {
        role: Role::User,
        content: message.to_string(),
    });

    // Persist the user turn before the completion runs, so a concurrent
    // read of this conversation sees it even if the completion is slow.
    store.add_message(conversation_id, MessageRole::User, message)?;

    let ChatResponse {
        content,
        model: used_model,
        tokens_in,
        tokens_out,
        ..
    } = loomgraph_llm::ops::chat(
        provider,
        model,
        llm_messages,
        Some(ctx.as_str()).filter(|c| !c.is_empty()),
        classification.suggested_response_length,
    )
    .await?;

    store.add_message(conversation_id, MessageRole::Assistant, &content)?;

    info!(
        conversation_id = %conversation_id,
        tokens_in,
        tokens_out,
        model = %used_model,
        "pipeline: chat turn complete"
    );

    let pii = pii::run(store, provider, model, conversation_id, message, &content, global_sharing_consent).await;

    let suggested_topics = suggest_topics(store, user_id);

    Ok(ChatTurn {
        reply: content,
        model: used_model,
        tokens_in,
        tokens_out,
        related_context: assembled.related,
        suggested_topics,
        pii_detection: pii.detection,
        global_sharing_blocked: pii.global_sharing_blocked,
    })
}

/// Topic-graph neighbors of the topics the user has already engaged with,
/// offered back as the response's `suggestedTopics`.
fn suggest_topics(store: &GraphStore, user_id: &str) -> Vec<String> {
    let topics = store.get_all_user_topics(user_id).unwrap_or_default();
    if topics.is_empty() {
        return Vec::new();
    }
    let topic_ids: Vec<i64> = topics.iter().map(|t| t.id).collect();
    store
        .get_suggested_topics(&topic_ids, MAX_SUGGESTED_TOPICS)
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loomgraph_llm::provider::ProviderError;
    use rusqlite::Connection;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn send(&self, req: &loomgraph_llm::provider::ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            if req.response_format_json {
                return Ok(ChatResponse {
                    content: "{\"is_trivial\": false, \"suggested_response_length\": \"short\"}".to_string(),
                    model: "echo-model".to_string(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "end_turn".to_string(),
                });
            }
            let last = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ChatResponse {
                content: format!("echo: {last}"),
                model: "echo-model".to_string(),
                tokens_in: 3,
                tokens_out: 3,
                stop_reason: "end_turn".to_string(),
            })
        }
    }

    fn store() -> GraphStore {
        GraphStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn rejects_empty_message() {
        let store = store();
        let provider = EchoProvider;
        let err = run(&store, None, &provider, "m", "c1", "u1", "   ", None).await.unwrap_err();
        assert_eq!(err.code(), "empty_message");
    }

    #[tokio::test]
    async fn persists_user_then_assistant_message() {
        let store = store();
        store.get_or_create_user("u1").unwrap();
        store.create_conversation("c1", "u1").unwrap();
        let provider = EchoProvider;

        let turn = run(&store, None, &provider, "m", "c1", "u1", "hello", None).await.unwrap();
        assert_eq!(turn.reply, "echo: hello");
        assert!(!turn.global_sharing_blocked);

        let messages = store.get_messages("c1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "echo: hello");
    }

    #[tokio::test]
    async fn errors_on_unknown_conversation() {
        let store = store();
        let provider = EchoProvider;
        let err = run(&store, None, &provider, "m", "missing", "u1", "hi", None).await.unwrap_err();
        assert_eq!(err.code(), "conversation_not_found");
    }
}
