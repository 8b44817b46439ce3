//! Message repository: the storage façade used by application features.

mod batch;
mod messages;

pub use batch::{BatchOptions, BatchResult, ProgressFn};
pub use messages::MessageRepository;
