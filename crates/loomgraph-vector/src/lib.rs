pub mod client;
pub mod error;
pub mod types;

pub use client::{search_or_empty, VectorAdapter};
pub use error::{Result, VectorError};
pub use types::VectorHit;
