use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    #[error("Conversation {id} is not owned by user {user_id}")]
    NotOwner { id: String, user_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            StoreError::UserNotFound { .. } => "USER_NOT_FOUND",
            StoreError::NotOwner { .. } => "NOT_OWNER",
            StoreError::Serialization(_) => "SERIALIZATION_ERROR",
            StoreError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
