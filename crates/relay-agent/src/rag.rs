use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use relay_core::config::{AgentConfig, KnowledgeConfig};
use relay_memory::MemoryManager;

use crate::generator::{AgentError, AnswerGenerator, KnowledgeReport};
use crate::prompt::PromptBuilder;
use crate::provider::{ChatRequest, LlmProvider, Message, Role};

/// Retrieval-augmented answerer: FTS5 search over the knowledge collection,
/// per-session history, one provider call.
pub struct RagAgent {
    provider: Box<dyn LlmProvider>,
    memory: Arc<MemoryManager>,
    prompt: PromptBuilder,
    model: String,
    max_tokens: u32,
    top_k: usize,
    history_turns: usize,
    document_path: PathBuf,
    collection: String,
    chunk_chars: usize,
}

impl RagAgent {
    pub fn new(
        provider: Box<dyn LlmProvider>,
        memory: Arc<MemoryManager>,
        prompt: PromptBuilder,
        model: String,
        document_path: impl Into<PathBuf>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            memory,
            prompt,
            model,
            max_tokens: 1024,
            top_k: 5,
            history_turns: 10,
            document_path: document_path.into(),
            collection: collection.into(),
            chunk_chars: 1200,
        }
    }

    /// Wire an agent from the `[agent]` and `[knowledge]` config sections.
    pub fn from_config(
        provider: Box<dyn LlmProvider>,
        memory: Arc<MemoryManager>,
        agent: &AgentConfig,
        knowledge: &KnowledgeConfig,
    ) -> Self {
        let mut prompt = PromptBuilder::new(agent.name.clone());
        if !agent.instructions.is_empty() {
            prompt = prompt.with_instructions(agent.instructions.clone());
        }
        let mut rag = Self::new(
            provider,
            memory,
            prompt,
            agent.model.clone(),
            knowledge.document_path.clone(),
            knowledge.table_name.clone(),
        );
        rag.max_tokens = agent.max_tokens;
        rag.top_k = agent.top_k;
        rag.history_turns = agent.history_turns;
        rag.chunk_chars = knowledge.chunk_chars;
        rag
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn history(&self, session_id: &str) -> Vec<Message> {
        if self.history_turns == 0 {
            return Vec::new();
        }
        match self.memory.get_history(session_id, self.history_turns) {
            Ok(rows) => rows
                .into_iter()
                .map(|m| Message {
                    role: Role::from_stored(&m.role),
                    content: m.content,
                })
                .collect(),
            Err(e) => {
                warn!(session = %session_id, error = %e, "history lookup failed, continuing without it");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl AnswerGenerator for RagAgent {
    async fn query(&self, question: &str, session_id: Option<&str>) -> Result<String, AgentError> {
        let knowledge = match self.memory.knowledge_search(&self.collection, question, self.top_k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "knowledge search failed");
                Vec::new()
            }
        };

        let mut messages = session_id.map(|s| self.history(s)).unwrap_or_default();
        messages.push(Message {
            role: Role::User,
            content: question.to_string(),
        });

        let req = ChatRequest {
            model: self.model.clone(),
            system: self.prompt.build(&knowledge),
            messages,
            max_tokens: self.max_tokens,
        };
        debug!(
            provider = %self.provider.name(),
            chunks = knowledge.len(),
            history = req.messages.len() - 1,
            "querying model"
        );

        let resp = self.provider.send(&req).await?;
        let answer = resp.content.trim();
        if answer.is_empty() {
            return Err(AgentError::EmptyAnswer);
        }
        info!(
            model = %resp.model,
            tokens_in = resp.tokens_in,
            tokens_out = resp.tokens_out,
            "answer generated"
        );

        if let Some(session) = session_id {
            let saved = self
                .memory
                .save_message(session, "user", question, None)
                .and_then(|_| {
                    self.memory
                        .save_message(session, "assistant", answer, Some(resp.model.as_str()))
                });
            if let Err(e) = saved {
                warn!(session = %session, error = %e, "failed to persist conversation turn");
            }
        }

        Ok(answer.to_string())
    }

    async fn load_knowledge(&self) -> Result<KnowledgeReport, AgentError> {
        let chunks =
            self.memory
                .load_document(&self.document_path, &self.collection, self.chunk_chars)?;
        Ok(KnowledgeReport {
            collection: self.collection.clone(),
            source: self.document_path.display().to_string(),
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    use relay_memory::MemoryError;

    use crate::provider::{ChatResponse, NullProvider, ProviderError};

    /// Records every request and answers with a fixed string.
    struct EchoProvider {
        answer: String,
        seen: Arc<Mutex<Vec<ChatRequest>>>,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.seen.lock().unwrap().push(req.clone());
            Ok(ChatResponse {
                content: self.answer.clone(),
                model: "echo-1".to_string(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
            })
        }
    }

    fn agent_with(answer: &str) -> (RagAgent, Arc<Mutex<Vec<ChatRequest>>>, Arc<MemoryManager>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let memory = Arc::new(MemoryManager::in_memory().unwrap());
        let provider = EchoProvider {
            answer: answer.to_string(),
            seen: Arc::clone(&seen),
        };
        let agent = RagAgent::new(
            Box::new(provider),
            Arc::clone(&memory),
            PromptBuilder::new("Export Copilot"),
            "gpt-4o".to_string(),
            "/nonexistent/kb.md",
            "MSME_INFO",
        );
        (agent, seen, memory)
    }

    #[tokio::test]
    async fn retrieved_chunks_reach_the_system_prompt() {
        let (agent, seen, memory) = agent_with("You need an IEC.");
        memory
            .replace_collection(
                "MSME_INFO",
                "kb.md",
                &["The IEC is issued by DGFT within two days.".to_string()],
            )
            .unwrap();

        let answer = agent.query("Who issues the IEC?", None).await.unwrap();
        assert_eq!(answer, "You need an IEC.");

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system.contains("issued by DGFT"));
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn session_history_is_replayed_and_extended() {
        let (agent, seen, memory) = agent_with("  Second answer.  ");
        memory.save_message("911234567890", "user", "first", None).unwrap();
        memory
            .save_message("911234567890", "assistant", "first answer", Some("gpt-4o"))
            .unwrap();

        let answer = agent.query("second", Some("911234567890")).await.unwrap();
        assert_eq!(answer, "Second answer.");

        let requests = seen.lock().unwrap();
        let roles: Vec<_> = requests[0].messages.iter().map(|m| m.role.clone()).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);

        let history = memory.get_history("911234567890", 10).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].content, "Second answer.");
        assert_eq!(history[3].model_used.as_deref(), Some("echo-1"));
    }

    #[tokio::test]
    async fn stateless_query_stores_nothing() {
        let (agent, _seen, memory) = agent_with("ok");
        agent.query("hello", None).await.unwrap();
        assert!(memory.get_history("hello", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_answer_is_an_error() {
        let (agent, _seen, _memory) = agent_with("   \n");
        let err = agent.query("anything", Some("1")).await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyAnswer));
    }

    #[tokio::test]
    async fn null_provider_surfaces_unavailable() {
        let memory = Arc::new(MemoryManager::in_memory().unwrap());
        let agent = RagAgent::new(
            Box::new(NullProvider),
            memory,
            PromptBuilder::new("Bot"),
            "gpt-4o".to_string(),
            "kb.md",
            "MSME_INFO",
        );
        let err = agent.query("hi", None).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Provider(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn load_knowledge_reports_chunk_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Export incentives under RoDTEP.\n\nDuty drawback rates.").unwrap();

        let memory = Arc::new(MemoryManager::in_memory().unwrap());
        let agent = RagAgent::new(
            Box::new(NullProvider),
            Arc::clone(&memory),
            PromptBuilder::new("Bot"),
            "gpt-4o".to_string(),
            file.path(),
            "MSME_INFO",
        );
        let report = agent.load_knowledge().await.unwrap();
        assert_eq!(report.collection, "MSME_INFO");
        assert_eq!(report.chunks, 1);
        assert_eq!(memory.chunk_count("MSME_INFO").unwrap(), 1);
    }

    #[tokio::test]
    async fn load_knowledge_missing_file_is_memory_error() {
        let (agent, _seen, _memory) = agent_with("ok");
        let err = agent.load_knowledge().await.unwrap_err();
        assert!(matches!(err, AgentError::Memory(MemoryError::Document { .. })));
    }
}
