use async_trait::async_trait;
use serde::Serialize;

use relay_memory::MemoryError;

use crate::provider::ProviderError;

/// Everything that can go wrong while producing an answer or (re)loading the
/// knowledge base. Callers on the webhook path map every variant to the
/// fallback reply.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("knowledge store error: {0}")]
    Memory(#[from] MemoryError),

    #[error("model returned an empty answer")]
    EmptyAnswer,
}

/// Outcome of a knowledge (re)load.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeReport {
    pub collection: String,
    pub source: String,
    pub chunks: usize,
}

/// Question answering over the knowledge base.
///
/// `session_id` groups turns into one conversation (the sender's WhatsApp id
/// on the webhook path); `None` runs a stateless query.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn query(&self, question: &str, session_id: Option<&str>) -> Result<String, AgentError>;

    /// Re-read the source document and replace the indexed chunks.
    async fn load_knowledge(&self) -> Result<KnowledgeReport, AgentError>;
}
