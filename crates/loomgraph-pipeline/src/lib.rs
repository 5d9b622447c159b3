pub mod context;
pub mod error;
pub mod pii;
pub mod stream;
pub mod turn;

pub use error::{PipelineError, Result};
pub use stream::TurnEvent;
pub use turn::ChatTurn;
