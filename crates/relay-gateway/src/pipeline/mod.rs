//! Off-request-path processing of inbound messages.

pub mod dedup;
pub mod handler;
pub mod ordering;
pub mod spawner;

pub use dedup::DedupGuard;
pub use handler::ConversationHandler;
pub use ordering::SenderLocks;
pub use spawner::{QueuedSpawner, TaskSpawner, TokioSpawner};
