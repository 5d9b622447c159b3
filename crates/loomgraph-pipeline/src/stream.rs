//! Streaming counterpart of [`crate::turn::run`]. The completion is
//! consumed on a background task and forwarded to the caller over a
//! channel so the HTTP layer can turn it into SSE frames without holding
//! the store lock or the provider call open on its own task.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use loomgraph_llm::provider::{LlmProvider, Message as LlmMessage, Role, StreamEvent};
use loomgraph_store::types::MessageRole;
use loomgraph_store::GraphStore;
use loomgraph_vector::VectorAdapter;

use crate::error::{PipelineError, Result};
use crate::{context, pii};

const HISTORY_WINDOW: usize = 40;

/// Event surfaced to the HTTP layer for a streaming turn.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    TextDelta(String),
    Done { model: String, tokens_in: u32, tokens_out: u32 },
    Error(String),
}

/// Start a streaming chat turn. Returns a receiver of [`TurnEvent`]s; the
/// user and assistant messages are persisted on the background task, in
/// the same order as the blocking turn, once the provider stream completes.
#[allow(clippy::too_many_arguments)]
#[allow(clippy::too_many_arguments)]
pub async fn start(
    store: std::sync::Arc<GraphStore>,
    vector: Option<std::sync::Arc<VectorAdapter>>,
    provider: std::sync::Arc<dyn LlmProvider>,
    model: String,
    conversation_id: String,
    user_id: String,
    message: String,
    global_sharing_consent: Option<bool>,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<TurnEvent>> {
    if message.trim().is_empty() {
        return Err(PipelineError::EmptyMessage);
    }
    store
        .get_conversation(&conversation_id)?
        .ok_or_else(|| PipelineError::ConversationNotFound(conversation_id.clone()))?;

    let (out_tx, out_rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let classification = loomgraph_llm::ops::classify_query(provider.as_ref(), &model, &message).await;

        let ctx = if classification.is_trivial {
            String::new()
        } else {
            context::assemble(&store, vector.as_deref(), &user_id, &message).await.text
        };

        let history = match store.get_messages(&conversation_id) {
            Ok(h) => h,
            Err(e) => {
                let _ = out_tx.send(TurnEvent::Error(e.to_string())).await;
                return;
            }
        };
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
            content: message.clone(),
        });

        if let Err(e) = store.add_message(&conversation_id, MessageRole::User, &message) {
            let _ = out_tx.send(TurnEvent::Error(e.to_string())).await;
            return;
        }

        let (inner_tx, mut inner_rx) = mpsc::channel(64);
        let provider_for_task = provider.clone();
        let ctx_opt = Some(ctx).filter(|c| !c.is_empty());
        let length = classification.suggested_response_length;
        let send_task = tokio::spawn(async move {
            loomgraph_llm::ops::chat_stream(
                provider_for_task.as_ref(),
                &model,
                llm_messages,
                ctx_opt.as_deref(),
                length,
                inner_tx,
            )
            .await
        });

        let mut full_reply = String::new();
        let mut done_meta: Option<(String, u32, u32)> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = out_tx.send(TurnEvent::Error("cancelled".to_string())).await;
                    break;
                }
                event = inner_rx.recv() => {
                    match event {
                        Some(StreamEvent::TextDelta { text }) => {
                            full_reply.push_str(&text);
                            if out_tx.send(TurnEvent::TextDelta(text)).await.is_err() {
                                break;
                            }
                        }
                        Some(StreamEvent::Done { model, tokens_in, tokens_out, .. }) => {
                            done_meta = Some((model, tokens_in, tokens_out));
                        }
                        Some(StreamEvent::Error { message }) => {
                            let _ = out_tx.send(TurnEvent::Error(message)).await;
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        match send_task.await {
            Ok(Err(e)) => warn!(error = %e, "streaming provider call failed"),
            Err(e) => warn!(error = %e, "streaming provider task panicked"),
            Ok(Ok(())) => {}
        }

        if let Some((model, tokens_in, tokens_out)) = done_meta {
            if !full_reply.is_empty() {
                if let Err(e) = store.add_message(&conversation_id, MessageRole::Assistant, &full_reply) {
                    let _ = out_tx.send(TurnEvent::Error(e.to_string())).await;
                    return;
                }
                info!(
                    conversation_id = %conversation_id,
                    tokens_in, tokens_out, model = %model,
                    "pipeline: streaming chat turn complete"
                );
                pii::run(
                    store.as_ref(),
                    provider.as_ref(),
                    &model,
                    &conversation_id,
                    &message,
                    &full_reply,
                    global_sharing_consent,
                )
                .await;
            }
            let _ = out_tx
                .send(TurnEvent::Done {
                    model,
                    tokens_in,
                    tokens_out,
                })
                .await;
        }
    });

    Ok(out_rx)
}
