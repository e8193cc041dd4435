pub mod generator;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod rag;

pub use generator::{AgentError, AnswerGenerator, KnowledgeReport};
pub use provider::{LlmProvider, NullProvider, ProviderError};
pub use rag::RagAgent;
