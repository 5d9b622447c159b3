use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use loomgraph_pipeline::PipelineError;
use loomgraph_processor::ProcessorError;
use loomgraph_store::error::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::ConversationNotFound { .. } | StoreError::UserNotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::NotOwner { .. } => StatusCode::FORBIDDEN,
            StoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            StoreError::Database(_) | StoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody {
                error: e.to_string(),
                code: e.code(),
            },
        }
    }
}

impl From<ProcessorError> for ApiError {
    fn from(e: ProcessorError) -> Self {
        let ProcessorError::Store(store_err) = e;
        store_err.into()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::EmptyMessage => StatusCode::BAD_REQUEST,
            PipelineError::Store(StoreError::ConversationNotFound { .. } | StoreError::UserNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            PipelineError::Store(StoreError::NotOwner { .. }) => StatusCode::FORBIDDEN,
            PipelineError::Store(StoreError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Provider(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            body: ErrorBody {
                error: e.to_string(),
                code: e.code(),
            },
        }
    }
}
