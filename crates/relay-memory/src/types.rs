use serde::{Deserialize, Serialize};

/// A retrievable slice of a knowledge document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub collection: String,
    /// Path of the document the chunk came from.
    pub source: String,
    pub chunk_index: i64,
    pub content: String,
}

/// Single conversation message of one session (one WhatsApp sender).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub session_key: String,
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    pub model_used: Option<String>,
    pub created_at: String,
}
