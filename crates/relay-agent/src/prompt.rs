use relay_memory::KnowledgeChunk;

/// Total cap for retrieved knowledge injected into one prompt (characters).
const MAX_CONTEXT_CHARS: usize = 12_000;

/// Behaviour rules for the WhatsApp export advisor.
const DEFAULT_INSTRUCTIONS: &[&str] = &[
    "You are an AI Export Advisor helping Indian MSMEs with international trade.",
    "Search your knowledge base for export information, compliance, documentation, and market intelligence.",
    "Provide practical, step-by-step guidance tailored for WhatsApp messages.",
    "Be professional, clear, and helpful.",
    "Keep responses concise but informative for mobile viewing.",
    "Use bullet points sparingly and only when necessary.",
    "Reply in plain text; WhatsApp does not render markdown.",
];

/// Builds the system prompt: identity + instructions + retrieved knowledge.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    name: String,
    instructions: Vec<String>,
}

impl PromptBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: DEFAULT_INSTRUCTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_instructions(mut self, instructions: Vec<String>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Render the system prompt for one question.
    pub fn build(&self, knowledge: &[KnowledgeChunk]) -> String {
        let mut out = format!("You are {}.\n\n## Instructions\n", self.name);
        for line in &self.instructions {
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }

        out.push_str("\n## Knowledge base\n");
        if knowledge.is_empty() {
            out.push_str(
                "No matching knowledge base entries were found. Answer from general \
                 knowledge and say so when you are unsure.\n",
            );
            return out;
        }

        let mut used = 0usize;
        for (i, chunk) in knowledge.iter().enumerate() {
            let section = format!("[{}] {}\n\n", i + 1, chunk.content);
            let len = section.chars().count();
            if used + len > MAX_CONTEXT_CHARS {
                break;
            }
            out.push_str(&section);
            used += len;
        }
        out.push_str("Base your answer on the entries above when they are relevant.\n");
        out
    }
}
