use thiserror::Error;

use loomgraph_store::error::StoreError;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
