pub mod chunk;
pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::MemoryError;
pub use manager::MemoryManager;
pub use types::{ConversationMessage, KnowledgeChunk};
