use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("index API error ({status}): {message}")]
    IndexApi { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, VectorError>;
