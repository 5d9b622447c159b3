use thiserror::Error;

use loomgraph_llm::provider::ProviderError;
use loomgraph_store::error::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("message cannot be empty")]
    EmptyMessage,
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Store(e) => e.code(),
            PipelineError::Provider(_) => "provider_error",
            PipelineError::ConversationNotFound(_) => "conversation_not_found",
            PipelineError::EmptyMessage => "empty_message",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
